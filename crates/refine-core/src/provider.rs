use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::stream::StreamEvent;

/// A provider's response, event by event.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Per-request sampling limits. Unset fields use the backend default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// A generation backend. Every drafting, review and verification call goes
/// through [`LlmProvider::stream`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError>;
}
