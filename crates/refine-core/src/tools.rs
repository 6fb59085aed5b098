//! Tools a generation call may invoke mid-turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ids::SessionId;

/// Passed to every tool execution.
pub struct ToolContext {
    pub session_id: SessionId,
    pub cancel: CancellationToken,
}

/// Text handed back to the model. `is_error` results are still shown to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// What the provider is told about a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Looks a word up in a fixed glossary.
    struct Glossary;

    #[async_trait]
    impl Tool for Glossary {
        fn name(&self) -> &str {
            "glossary"
        }
        fn description(&self) -> &str {
            "Define a term"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"term": {"type": "string"}}, "required": ["term"]})
        }
        async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            if ctx.cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            match args["term"].as_str() {
                Some("lexer") => Ok(ToolResult::text("splits source text into tokens")),
                Some(other) => Ok(ToolResult::error(format!("unknown term '{other}'"))),
                None => Err(ToolError::InvalidArguments("term is required".into())),
            }
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: SessionId::from_raw("tools_test"),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn definition_mirrors_tool() {
        let def = Glossary.to_definition();
        assert_eq!(def.name, "glossary");
        assert_eq!(def.parameters_schema["required"][0], "term");
    }

    #[tokio::test]
    async fn results_errors_and_cancellation() {
        let found = Glossary.execute(json!({"term": "lexer"}), &ctx()).await.unwrap();
        assert!(!found.is_error);

        let missing = Glossary.execute(json!({"term": "monad"}), &ctx()).await.unwrap();
        assert!(missing.is_error);

        let bad = Glossary.execute(json!({}), &ctx()).await;
        assert!(matches!(bad, Err(ToolError::InvalidArguments(_))));

        let cancelled = ctx();
        cancelled.cancel.cancel();
        let err = Glossary.execute(json!({"term": "lexer"}), &cancelled).await;
        assert!(matches!(err, Err(ToolError::Cancelled)));
    }
}
