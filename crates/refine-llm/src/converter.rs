//! Translation between the engine's message model and the Messages API wire
//! format.

use serde_json::{json, Value};

use refine_core::context::LlmContext;
use refine_core::errors::GatewayError;
use refine_core::ids::ToolCallId;
use refine_core::messages::{
    AssistantContent, AssistantMessage, Message, StopReason, ToolCallBlock, ToolResultMessage,
    UserMessage,
};
use refine_core::provider::StreamOptions;

pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Build the request body for a single non-streaming Messages call.
pub fn build_request_body(context: &LlmContext, options: &StreamOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "stream": false,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": convert_messages(&context.messages),
    });

    if let Some(system) = context.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        body["system"] = json!(system);
    }
    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }
    if context.offers_tools() {
        body["tools"] = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect();
    }

    body
}

/// Tool results travel as `user` turns. Consecutive results are merged into
/// one turn so the wire transcript keeps alternating roles.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for msg in messages {
        match msg {
            Message::User(user) => result.push(convert_user_message(user)),
            Message::Assistant(asst) => result.push(convert_assistant_message(asst)),
            Message::ToolResult(tr) => {
                let block = convert_tool_result(tr);
                let merged = result
                    .last_mut()
                    .filter(|last| last["role"] == "user" && is_tool_result_turn(last))
                    .and_then(|last| last["content"].as_array_mut())
                    .map(|content| content.push(block.clone()))
                    .is_some();
                if !merged {
                    result.push(json!({"role": "user", "content": [block]}));
                }
            }
        }
    }

    result
}

fn is_tool_result_turn(turn: &Value) -> bool {
    turn["content"]
        .as_array()
        .is_some_and(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
}

fn convert_user_message(msg: &UserMessage) -> Value {
    json!({
        "role": "user",
        "content": [{"type": "text", "text": msg.text_content()}],
    })
}

fn convert_assistant_message(msg: &AssistantMessage) -> Value {
    let content: Vec<Value> = msg
        .content
        .iter()
        .filter_map(|c| match c {
            AssistantContent::Text { text } if text.is_empty() => None,
            AssistantContent::Text { text } => Some(json!({"type": "text", "text": text})),
            AssistantContent::ToolCall(tc) => Some(json!({
                "type": "tool_use",
                "id": tc.id.as_str(),
                "name": tc.name,
                "input": tc.arguments,
            })),
        })
        .collect();
    json!({"role": "assistant", "content": content})
}

fn convert_tool_result(msg: &ToolResultMessage) -> Value {
    let mut block = json!({
        "type": "tool_result",
        "tool_use_id": msg.tool_call_id.as_str(),
        "content": msg.text_content(),
    });
    if msg.is_error {
        block["is_error"] = json!(true);
    }
    block
}

/// Parse a Messages API response body into an assistant message.
pub fn parse_response(body: &Value) -> Result<AssistantMessage, GatewayError> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| GatewayError::MalformedResponse("response has no content array".into()))?;

    let mut content = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => content.push(AssistantContent::Text {
                text: block["text"].as_str().unwrap_or_default().to_string(),
            }),
            Some("tool_use") => {
                let id = block["id"].as_str().ok_or_else(|| {
                    GatewayError::MalformedResponse("tool_use block without id".into())
                })?;
                let name = block["name"].as_str().ok_or_else(|| {
                    GatewayError::MalformedResponse("tool_use block without name".into())
                })?;
                content.push(AssistantContent::ToolCall(ToolCallBlock {
                    id: ToolCallId::from_raw(id),
                    name: name.to_string(),
                    arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                }));
            }
            // thinking and other block kinds carry nothing the engine uses
            _ => {}
        }
    }

    Ok(AssistantMessage {
        content,
        stop_reason: Some(parse_stop_reason(body["stop_reason"].as_str())),
    })
}

pub fn parse_stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}
