//! Chat-Completions wire format: request body construction and response
//! parsing.

use serde_json::Value;

use za_domain::jsonutil::{excerpt, extract_error_envelope, looks_like_json};
use za_domain::message::{ChatResponse, Message, Role, ToolCall, ToolDefinition};
use za_domain::{Error, Result};

use crate::ActiveModel;

/// Length cap for body excerpts quoted in error details.
const ERROR_EXCERPT_CHARS: usize = 300;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.tool_name,
                            "arguments": tc.arguments,
                        }
                    })
                })
                .collect();
            let mut obj = serde_json::json!({
                "role": "assistant",
                "tool_calls": tool_calls,
            });
            obj["content"] = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            obj
        }
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

/// Wrap a tool definition in the strict function schema: every declared
/// property is required and no extras are accepted.
pub fn strict_tool_schema(def: &ToolDefinition) -> Value {
    let mut parameters = def.parameters.clone();
    if let Some(obj) = parameters.as_object_mut() {
        let required: Vec<Value> = obj
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| props.keys().map(|k| Value::String(k.clone())).collect())
            .unwrap_or_default();
        obj.insert("additionalProperties".into(), Value::Bool(false));
        obj.insert("required".into(), Value::Array(required));
    }
    serde_json::json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": parameters,
            "strict": true,
        }
    })
}

/// Build the Chat-Completions request body.
pub fn build_chat_body(model: &ActiveModel, messages: &[Message], tools: &[ToolDefinition]) -> Value {
    let wire_messages: Vec<Value> = messages.iter().map(msg_to_wire).collect();

    let mut body = serde_json::json!({
        "model": model.model_id,
        "messages": wire_messages,
    });
    if !tools.is_empty() {
        let wire_tools: Vec<Value> = tools.iter().map(strict_tool_schema).collect();
        body["tools"] = Value::Array(wire_tools);
    }
    if let Some(effort) = &model.reasoning_effort {
        body["reasoning_effort"] = Value::String(effort.clone());
    }
    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize a tool-call `arguments` field: providers send either a JSON
/// string or an inline JSON value; we always carry the string form.
pub(crate) fn normalize_arguments(args: &Value) -> String {
    match args {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id").and_then(|v| v.as_str()).unwrap_or("call_0");
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let arguments = func
                .get("arguments")
                .map(normalize_arguments)
                .unwrap_or_else(|| "{}".to_string());
            Some(ToolCall {
                id: id.to_string(),
                tool_name,
                arguments,
            })
        })
        .collect()
}

/// Parse a Chat-Completions response body.
pub fn parse_chat_response(provider: &str, body: &str) -> Result<ChatResponse> {
    if !looks_like_json(body) {
        return Err(Error::Provider {
            provider: provider.to_string(),
            detail: format!("non-JSON response: {}", excerpt(body, ERROR_EXCERPT_CHARS)),
        });
    }

    let root: Value = serde_json::from_str(body)
        .map_err(|e| Error::ResponseParse(format!("{provider}: {e}")))?;

    if let Some(detail) = extract_error_envelope(&root) {
        return Err(Error::Provider {
            provider: provider.to_string(),
            detail,
        });
    }

    let choice = root
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or(Error::ResponseMissingChoices)?;

    let message = choice.get("message").ok_or(Error::ResponseMissingChoices)?;

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let reasoning = message
        .get("reasoning_content")
        .or_else(|| message.get("thinking"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(ChatResponse {
        text,
        reasoning,
        tool_calls: parse_tool_calls(message),
        finish_reason,
    })
}

/// Parse a models-listing body (`{"data":[{"id": ...}, ...]}`).
pub fn parse_models_response(provider: &str, body: &str) -> Result<Vec<String>> {
    if !looks_like_json(body) {
        return Err(Error::Provider {
            provider: provider.to_string(),
            detail: format!("non-JSON response: {}", excerpt(body, ERROR_EXCERPT_CHARS)),
        });
    }
    let root: Value = serde_json::from_str(body)
        .map_err(|e| Error::ResponseParse(format!("{provider}: {e}")))?;
    if let Some(detail) = extract_error_envelope(&root) {
        return Err(Error::Provider {
            provider: provider.to_string(),
            detail,
        });
    }
    let mut ids: Vec<String> = root
        .get("data")
        .and_then(|d| d.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m.get("id").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    ids.sort();
    Ok(ids)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
