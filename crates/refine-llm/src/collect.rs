use futures::{Stream, StreamExt};

use refine_core::errors::GatewayError;
use refine_core::messages::AssistantMessage;
use refine_core::stream::StreamEvent;

/// Drain a provider stream into the final assistant message.
///
/// An `Error` event aborts with that error; a stream that ends without
/// `Done` is reported as interrupted.
pub async fn collect_message<S>(mut stream: S) -> Result<AssistantMessage, GatewayError>
where
    S: Stream<Item = StreamEvent> + Unpin,
{
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Done { mut message, stop_reason } => {
                message.stop_reason.get_or_insert(stop_reason);
                return Ok(message);
            }
            StreamEvent::Error { error } => return Err(error),
            StreamEvent::Start | StreamEvent::TextDelta { .. } | StreamEvent::ToolCallEnd { .. } => {}
        }
    }
    Err(GatewayError::StreamInterrupted(
        "stream ended without a final message".into(),
    ))
}
