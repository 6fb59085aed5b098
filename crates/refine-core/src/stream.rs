use crate::errors::GatewayError;
use crate::messages::{AssistantMessage, StopReason, ToolCallBlock};

/// Incremental output of one generation call.
///
/// A well-formed stream opens with `Start`, carries any number of text
/// deltas and finished lookups, and closes with `Done`. `Error` may replace
/// the remainder at any point.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta {
        delta: String,
    },
    ToolCallEnd {
        tool_call: ToolCallBlock,
    },
    /// The assembled reply. `stop_reason` is authoritative when the message
    /// itself carries none.
    Done {
        message: AssistantMessage,
        stop_reason: StopReason,
    },
    Error {
        error: GatewayError,
    },
}
