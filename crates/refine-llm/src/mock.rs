//! Scripted provider for tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use refine_core::context::LlmContext;
use refine_core::errors::GatewayError;
use refine_core::ids::ToolCallId;
use refine_core::messages::{AssistantContent, AssistantMessage, StopReason, ToolCallBlock};
use refine_core::provider::{EventStream, LlmProvider, StreamOptions};
use refine_core::stream::StreamEvent;

/// One scripted reply.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Events yielded by the returned stream.
    Stream(Vec<StreamEvent>),
    /// Returned from `stream` before any event.
    Error(GatewayError),
    /// Sleep, then behave like the inner reply.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    fn finished(message: AssistantMessage, mut events: Vec<StreamEvent>) -> Self {
        let stop_reason = message.stop_reason.unwrap_or(StopReason::EndTurn);
        events.insert(0, StreamEvent::Start);
        events.push(StreamEvent::Done { message, stop_reason });
        Self::Stream(events)
    }

    pub fn stream_text(text: &str) -> Self {
        Self::finished(
            AssistantMessage::text(text),
            vec![StreamEvent::TextDelta { delta: text.to_string() }],
        )
    }

    /// A reply whose text is `value` serialized.
    pub fn stream_json(value: &serde_json::Value) -> Self {
        Self::stream_text(&value.to_string())
    }

    /// A reply that asks for a single lookup.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        let call = ToolCallBlock {
            id: ToolCallId::new(),
            name: name.to_string(),
            arguments,
        };
        let message = AssistantMessage {
            content: vec![AssistantContent::ToolCall(call.clone())],
            stop_reason: Some(StopReason::ToolUse),
        };
        Self::finished(message, vec![StreamEvent::ToolCallEnd { tool_call: call }])
    }

    /// A stream that breaks off with `error` after starting.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

#[derive(Default)]
struct Script {
    pending: VecDeque<MockResponse>,
    seen: Vec<LlmContext>,
}

/// Serves [`MockResponse`]s in order and keeps every context it was sent.
///
/// Running out of replies is an `InvalidRequest`, so a test that makes
/// more calls than it scripted fails loudly.
pub struct MockProvider {
    script: Mutex<Script>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(Script {
                pending: responses.into(),
                seen: Vec::new(),
            }),
        }
    }

    pub fn call_count(&self) -> usize {
        self.script.lock().seen.len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().pending.len()
    }

    pub fn requests(&self) -> Vec<LlmContext> {
        self.script.lock().seen.clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let (call, next) = {
            let mut script = self.script.lock();
            script.seen.push(context.clone());
            (script.seen.len(), script.pending.pop_front())
        };
        let mut response = next.ok_or_else(|| {
            GatewayError::InvalidRequest(format!("mock provider has no reply for call {call}"))
        })?;

        loop {
            response = match response {
                MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
                MockResponse::Error(error) => return Err(error),
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    *inner
                }
            };
        }
    }
}
