use crate::messages::Message;
use crate::tools::ToolDefinition;

/// One provider request: system prompt, transcript so far, offered tools.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            messages,
            tools: Vec::new(),
        }
    }

    /// Offer `tools` on this request. An empty list offers none.
    pub fn with_tools(self, tools: Vec<ToolDefinition>) -> Self {
        Self { tools, ..self }
    }

    pub fn offers_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tools_are_opt_in() {
        let ctx = LlmContext::new("sys", vec![Message::user_text("hi")]);
        assert_eq!(ctx.system_prompt.as_deref(), Some("sys"));
        assert!(!ctx.offers_tools());

        let ctx = ctx.with_tools(vec![ToolDefinition {
            name: "search".into(),
            description: String::new(),
            parameters_schema: json!({"type": "object"}),
        }]);
        assert!(ctx.offers_tools());
        assert!(!ctx.clone().with_tools(Vec::new()).offers_tools());
    }
}
