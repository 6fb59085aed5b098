use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use refine_core::context::LlmContext;
use refine_core::errors::GatewayError;
use refine_core::messages::AssistantContent;
use refine_core::provider::{EventStream, LlmProvider, StreamOptions};
use refine_core::stream::StreamEvent;

use crate::converter;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Messages API provider. Each call is a single request; the response is
/// replayed as a stream of events so callers can treat every backend alike.
pub struct AnthropicProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    api_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            api_url: API_URL.to_string(),
        })
    }

    /// Point the provider at a different endpoint (proxies, test servers).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn replay(message: refine_core::messages::AssistantMessage) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::Start];
    for block in &message.content {
        match block {
            AssistantContent::Text { text } if !text.is_empty() => {
                events.push(StreamEvent::TextDelta {
                    delta: text.clone(),
                });
            }
            AssistantContent::Text { .. } => {}
            AssistantContent::ToolCall(tc) => events.push(StreamEvent::ToolCallEnd {
                tool_call: tc.clone(),
            }),
        }
    }
    let stop_reason = message
        .stop_reason
        .unwrap_or(refine_core::messages::StopReason::EndTurn);
    events.push(StreamEvent::Done {
        message,
        stop_reason,
    });
    events
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, messages = context.messages.len()))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let body = converter::build_request_body(context, options, &self.model);

        let resp = self
            .client
            .post(&self.api_url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(CONNECT_TIMEOUT)
                } else {
                    GatewayError::NetworkError(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let hint = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status, body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after: hint },
                other => other,
            });
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::StreamInterrupted(e.to_string()))?;
        let message = converter::parse_response(&json)?;
        debug!(
            tool_calls = message.tool_calls().len(),
            stop_reason = ?message.stop_reason,
            "provider response received"
        );

        Ok(Box::pin(stream::iter(replay(message))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refine_core::ids::ToolCallId;
    use refine_core::messages::{AssistantMessage, StopReason, ToolCallBlock};

    #[test]
    fn replay_orders_events() {
        let message = AssistantMessage {
            content: vec![
                AssistantContent::Text { text: "checking".into() },
                AssistantContent::ToolCall(ToolCallBlock {
                    id: ToolCallId::from_raw("toolu_1"),
                    name: "search".into(),
                    arguments: serde_json::json!({}),
                }),
            ],
            stop_reason: Some(StopReason::ToolUse),
        };
        let events = replay(message);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], StreamEvent::Start));
        assert!(matches!(events[1], StreamEvent::TextDelta { .. }));
        assert!(matches!(events[2], StreamEvent::ToolCallEnd { .. }));
        assert!(matches!(
            events[3],
            StreamEvent::Done { stop_reason: StopReason::ToolUse, .. }
        ));
    }

    #[test]
    fn retry_after_header() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
    }

    #[test]
    fn provider_identity() {
        let provider = AnthropicProvider::new(SecretString::from("sk-test"), "claude-x").unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), "claude-x");
    }
}
