//! Generation turns: timeout and cancellation around each call, the bounded
//! evidence-lookup loop, and structured judgments with corrective retry.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use refine_core::context::LlmContext;
use refine_core::ids::SessionId;
use refine_core::messages::{AssistantMessage, Message, ToolCallBlock};
use refine_core::provider::{LlmProvider, StreamOptions};
use refine_core::tools::{Tool, ToolContext, ToolError};
use refine_llm::{collect_message, corrective_prompt, JudgmentParseError};

use crate::error::{EngineError, Result};

/// Shared handle for one session's generation calls.
#[derive(Clone)]
pub struct Conversation {
    provider: Arc<dyn LlmProvider>,
    options: StreamOptions,
    timeout: Duration,
    cancel: CancellationToken,
    session_id: SessionId,
}

impl Conversation {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        options: StreamOptions,
        timeout: Duration,
        cancel: CancellationToken,
        session_id: SessionId,
    ) -> Self {
        Self {
            provider,
            options,
            timeout,
            cancel,
            session_id,
        }
    }

    /// One request/response exchange.
    pub async fn turn(&self, context: &LlmContext) -> Result<AssistantMessage> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Aborted);
        }
        let call = async {
            let stream = self.provider.stream(context, &self.options).await?;
            collect_message(stream).await
        };
        match tokio::time::timeout(self.timeout, call).await {
            Ok(message) => Ok(message?),
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }

    /// Continue `transcript` until the model answers without tool calls or
    /// `max_rounds` lookup rounds are spent; the last turn is then made with
    /// no tools offered. Every turn is appended to `transcript`. Returns the
    /// final text.
    pub async fn run_with_tools(
        &self,
        system_prompt: &str,
        transcript: &mut Vec<Message>,
        tools: &[Arc<dyn Tool>],
        max_rounds: u32,
    ) -> Result<String> {
        let definitions: Vec<_> = tools.iter().map(|t| t.to_definition()).collect();
        let mut rounds = 0u32;
        loop {
            let offer_tools = rounds < max_rounds && !definitions.is_empty();
            let context = LlmContext::new(system_prompt, transcript.clone())
                .with_tools(if offer_tools { definitions.clone() } else { Vec::new() });
            let message = self.turn(&context).await?;

            if !offer_tools || !message.has_tool_calls() {
                let text = message.text_content();
                // Tool calls made when none were offered have no results to pair
                // with; keep only the text.
                let message = if message.has_tool_calls() {
                    Message::assistant_text(text.clone())
                } else {
                    Message::Assistant(message)
                };
                transcript.push(message);
                return Ok(text);
            }

            let calls: Vec<ToolCallBlock> = message.tool_calls().into_iter().cloned().collect();
            transcript.push(Message::Assistant(message));
            let results = join_all(calls.iter().map(|call| self.execute_tool(call, tools))).await;
            for result in results {
                transcript.push(result?);
            }
            rounds += 1;
            debug!(rounds, max_rounds, calls = calls.len(), "evidence lookup round");
        }
    }

    async fn execute_tool(&self, call: &ToolCallBlock, tools: &[Arc<dyn Tool>]) -> Result<Message> {
        let Some(tool) = tools.iter().find(|t| t.name() == call.name) else {
            warn!(tool_name = %call.name, "tool not found");
            return Ok(Message::tool_result(
                call.id.clone(),
                format!("Tool not found: {}", call.name),
                true,
            ));
        };
        let ctx = ToolContext {
            session_id: self.session_id.clone(),
            cancel: self.cancel.clone(),
        };
        match tool.execute(call.arguments.clone(), &ctx).await {
            Ok(result) => Ok(Message::tool_result(call.id.clone(), result.content, result.is_error)),
            Err(ToolError::Cancelled) => Err(EngineError::Aborted),
            Err(e) => {
                warn!(tool_name = %call.name, error = %e, "tool execution failed");
                Ok(Message::tool_result(call.id.clone(), e.to_string(), true))
            }
        }
    }

    /// Ask for a structured judgment and parse it with `parse`. An
    /// unparseable answer is followed by a corrective turn, up to `attempts`
    /// answers in total.
    #[allow(clippy::too_many_arguments)]
    pub async fn judge<T, F>(
        &self,
        stage: &'static str,
        system_prompt: &str,
        prompt: String,
        tools: &[Arc<dyn Tool>],
        max_rounds: u32,
        attempts: u32,
        parse: F,
    ) -> Result<T>
    where
        F: Fn(&str) -> std::result::Result<T, JudgmentParseError>,
    {
        let mut transcript = vec![Message::user_text(prompt)];
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            let text = self
                .run_with_tools(system_prompt, &mut transcript, tools, max_rounds)
                .await?;
            match parse(&text) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(stage, attempt, attempts, reason = %e.reason, "unparseable judgment");
                    transcript.push(Message::user_text(corrective_prompt(&e)));
                }
            }
        }
        Err(EngineError::MalformedJudgment { stage, attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use refine_core::errors::GatewayError;
    use refine_core::ids::ToolCallId;
    use refine_core::messages::{AssistantContent, StopReason};
    use refine_core::stream::StreamEvent;
    use refine_core::tools::ToolResult;
    use refine_llm::{parse_structured, MockProvider, MockResponse};
    use serde::Deserialize;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the query"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"query": {"type": "string"}}})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            if let Some(ms) = args["delay_ms"].as_u64() {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Ok(ToolResult::text(format!("echo: {}", args["query"].as_str().unwrap_or(""))))
        }
    }

    #[derive(Debug, Deserialize)]
    struct Verdict {
        status: String,
    }

    fn conversation(mock: Arc<MockProvider>, timeout: Duration) -> Conversation {
        Conversation::new(
            mock,
            StreamOptions::default(),
            timeout,
            CancellationToken::new(),
            SessionId::from_raw("review_test"),
        )
    }

    fn tools() -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(Echo)]
    }

    #[tokio::test]
    async fn tool_results_are_fed_back() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("echo", json!({"query": "registers"})),
            MockResponse::stream_text("final draft"),
        ]));
        let conv = conversation(mock.clone(), Duration::from_secs(5));
        let mut transcript = vec![Message::user_text("write")];
        let text = conv.run_with_tools("sys", &mut transcript, &tools(), 5).await.unwrap();

        assert_eq!(text, "final draft");
        assert_eq!(transcript.len(), 4);
        let Message::ToolResult(result) = &transcript[2] else {
            panic!("expected tool result");
        };
        assert_eq!(result.text_content(), "echo: registers");
        assert!(!result.is_error);
        let second = &mock.requests()[1];
        assert_eq!(second.tools.len(), 1);
        assert_eq!(second.messages.len(), 3);
    }

    #[tokio::test]
    async fn lookup_rounds_are_bounded() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("echo", json!({"query": "a"})),
            MockResponse::tool_call("echo", json!({"query": "b"})),
            MockResponse::tool_call("echo", json!({"query": "c"})),
        ]));
        let conv = conversation(mock.clone(), Duration::from_secs(5));
        let mut transcript = vec![Message::user_text("write")];
        conv.run_with_tools("sys", &mut transcript, &tools(), 2).await.unwrap();

        assert_eq!(mock.call_count(), 3);
        assert!(!mock.requests()[2].offers_tools());
        // The unanswerable tool call on the final turn is not kept.
        let Some(Message::Assistant(last)) = transcript.last() else {
            panic!("expected assistant message");
        };
        assert!(!last.has_tool_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_in_one_round_run_together_in_call_order() {
        let call = |id: &str, query: &str, delay_ms: u64| {
            AssistantContent::ToolCall(ToolCallBlock {
                id: ToolCallId::from_raw(id),
                name: "echo".into(),
                arguments: json!({"query": query, "delay_ms": delay_ms}),
            })
        };
        let message = AssistantMessage {
            content: vec![call("toolu_a", "slow", 200), call("toolu_b", "fast", 50)],
            stop_reason: Some(StopReason::ToolUse),
        };
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::Stream(vec![
                StreamEvent::Start,
                StreamEvent::Done {
                    message,
                    stop_reason: StopReason::ToolUse,
                },
            ]),
            MockResponse::stream_text("done"),
        ]));
        let conv = conversation(mock, Duration::from_secs(5));
        let mut transcript = vec![Message::user_text("write")];

        let started = tokio::time::Instant::now();
        conv.run_with_tools("sys", &mut transcript, &tools(), 5).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));

        let ids: Vec<&str> = transcript[2..4]
            .iter()
            .map(|m| match m {
                Message::ToolResult(r) => r.tool_call_id.as_str(),
                other => panic!("expected tool result, got {other:?}"),
            })
            .collect();
        assert_eq!(ids, ["toolu_a", "toolu_b"]);
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_result() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("missing", json!({})),
            MockResponse::stream_text("done"),
        ]));
        let conv = conversation(mock, Duration::from_secs(5));
        let mut transcript = vec![Message::user_text("write")];
        conv.run_with_tools("sys", &mut transcript, &tools(), 5).await.unwrap();
        let Message::ToolResult(result) = &transcript[2] else {
            panic!("expected tool result");
        };
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Tool not found: missing");
    }

    #[tokio::test]
    async fn judge_retries_with_corrective_prompt() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text("I think it is valid."),
            MockResponse::stream_json(&json!({"status": "valid"})),
        ]));
        let conv = conversation(mock.clone(), Duration::from_secs(5));
        let verdict: Verdict = conv
            .judge("verification", "sys", "check".into(), &[], 0, 3, parse_structured)
            .await
            .unwrap();
        assert_eq!(verdict.status, "valid");

        let retry = &mock.requests()[1];
        assert_eq!(retry.messages.len(), 3);
        let Message::User(corrective) = &retry.messages[2] else {
            panic!("expected corrective user message");
        };
        assert!(corrective.text_content().contains("could not be parsed"));
    }

    #[tokio::test]
    async fn judge_gives_up_after_attempts() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text("nope"),
            MockResponse::stream_text("still nope"),
        ]));
        let conv = conversation(mock.clone(), Duration::from_secs(5));
        let err = conv
            .judge::<Verdict, _>("content review", "sys", "x".into(), &[], 0, 2, parse_structured)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MalformedJudgment { stage: "content review", attempts: 2 }
        ));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(60),
            MockResponse::stream_text("late"),
        )]));
        let conv = conversation(mock, Duration::from_secs(10));
        let err = conv.turn(&LlmContext::empty()).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(d) if d == Duration::from_secs(10)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn cancelled_session_makes_no_call() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::stream_text("x")]));
        let conv = conversation(mock.clone(), Duration::from_secs(5));
        conv.cancel.cancel();
        let err = conv.turn(&LlmContext::empty()).await.unwrap_err();
        assert!(matches!(err, EngineError::Aborted));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn gateway_errors_propagate() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::stream_error(
            GatewayError::ProviderOverloaded,
        )]));
        let conv = conversation(mock, Duration::from_secs(5));
        let err = conv.turn(&LlmContext::empty()).await.unwrap_err();
        assert!(matches!(err, EngineError::Gateway(GatewayError::ProviderOverloaded)));
    }
}
