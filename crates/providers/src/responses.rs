//! Responses-stream wire format: request body construction and SSE
//! assembly into a uniform [`ChatResponse`].
//!
//! The protocol has no tool_result item, so tool-role messages are
//! re-sent as user messages with a `[tool]\n` prefix. Tool calls arrive
//! as an `item` event naming the function followed by argument deltas.

use serde_json::Value;

use za_domain::message::{ChatResponse, Message, Role, ToolCall, ToolDefinition};
use za_domain::{Error, Result};

use crate::chat::normalize_arguments;
use crate::sse::data_payloads;
use crate::ActiveModel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn input_item(role: &str, text: &str) -> Value {
    let content_type = if role == "assistant" {
        "output_text"
    } else {
        "input_text"
    };
    serde_json::json!({
        "type": "message",
        "role": role,
        "content": [{"type": content_type, "text": text}],
    })
}

/// Build the Responses-stream request body.
///
/// System messages are folded into `instructions`; everything else
/// becomes an `input` item.
pub fn build_responses_body(
    model: &ActiveModel,
    messages: &[Message],
    tools: &[ToolDefinition],
) -> Value {
    let mut instructions = String::new();
    let mut input: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                if !instructions.is_empty() {
                    instructions.push('\n');
                }
                instructions.push_str(&msg.content);
            }
            Role::Tool => {
                input.push(input_item("user", &format!("[tool]\n{}", msg.content)));
            }
            Role::Assistant => input.push(input_item("assistant", &msg.content)),
            Role::User => input.push(input_item("user", &msg.content)),
        }
    }

    let wire_tools: Vec<Value> = tools
        .iter()
        .map(|def| {
            serde_json::json!({
                "type": "function",
                "name": def.name,
                "description": def.description,
                "parameters": def.parameters,
                "strict": true,
            })
        })
        .collect();

    serde_json::json!({
        "model": model.model_id,
        "instructions": instructions,
        "input": input,
        "tools": wire_tools,
        "tool_choice": "auto",
        "parallel_tool_calls": false,
        "store": false,
        "stream": true,
        "include": ["reasoning.encrypted_content"],
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Assembly {
    text: String,
    tool_name: Option<String>,
    tool_args: String,
    /// True while `tool_args` still holds the seed copied from the item
    /// event. The first argument delta replaces the seed so a provider
    /// that sends both never doubles the prefix.
    args_seeded: bool,
}

impl Assembly {
    fn apply(&mut self, event: &Value) {
        // A function_call item opens tool-call accumulation.
        if let Some(item) = event.get("item") {
            if item.get("type").and_then(|v| v.as_str()) == Some("function_call") {
                self.tool_name = item
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                self.tool_args.clear();
                self.args_seeded = false;
                if let Some(seed) = item.get("arguments") {
                    let seed = normalize_arguments(seed);
                    if !seed.is_empty() {
                        self.tool_args = seed;
                        self.args_seeded = true;
                    }
                }
                return;
            }
        }

        let Some(event_type) = event.get("type").and_then(|v| v.as_str()) else {
            return;
        };

        if event_type.ends_with("function_call_arguments.delta") {
            if let Some(delta) = event.get("delta").and_then(|v| v.as_str()) {
                if self.args_seeded {
                    self.tool_args.clear();
                    self.args_seeded = false;
                }
                self.tool_args.push_str(delta);
            }
            return;
        }

        if event_type.ends_with(".delta") {
            let piece = event
                .get("delta")
                .and_then(|v| v.as_str())
                .or_else(|| event.get("text").and_then(|v| v.as_str()))
                .or_else(|| event.get("output_text").and_then(|v| v.as_str()));
            if let Some(p) = piece {
                self.text.push_str(p);
            }
        }
    }

    fn finish(self) -> ChatResponse {
        if let Some(name) = self.tool_name {
            ChatResponse {
                text: String::new(),
                reasoning: None,
                tool_calls: vec![ToolCall {
                    id: "call_0".into(),
                    tool_name: name,
                    arguments: self.tool_args,
                }],
                finish_reason: Some("tool_calls".into()),
            }
        } else {
            ChatResponse {
                text: self.text,
                reasoning: None,
                tool_calls: Vec::new(),
                finish_reason: Some("stop".into()),
            }
        }
    }
}

/// Parse a complete Responses-stream body.
///
/// Bodies without any `data:` lines fall back to the non-stream JSON
/// shape (an `output[]` array).
pub fn parse_responses_stream(provider: &str, body: &str) -> Result<ChatResponse> {
    let payloads = data_payloads(body);
    if payloads.is_empty() {
        return parse_responses_json(provider, body);
    }

    let mut assembly = Assembly::default();
    for payload in payloads {
        if payload == "[DONE]" {
            break;
        }
        let event: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(provider, error = %e, "skipping malformed SSE event");
                continue;
            }
        };
        assembly.apply(&event);
    }
    Ok(assembly.finish())
}

/// Non-stream fallback: `{"output":[...]}` with either a single
/// function_call item or text content to concatenate.
fn parse_responses_json(provider: &str, body: &str) -> Result<ChatResponse> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| Error::ResponseParse(format!("{provider}: {e}")))?;

    if let Some(detail) = za_domain::jsonutil::extract_error_envelope(&root) {
        return Err(Error::Provider {
            provider: provider.to_string(),
            detail,
        });
    }

    let output = root
        .get("output")
        .and_then(|o| o.as_array())
        .ok_or(Error::ResponseMissingChoices)?;

    let mut text = String::new();
    for item in output {
        match item.get("type").and_then(|v| v.as_str()) {
            Some("function_call") => {
                let name = item
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        Error::ResponseParse(format!("{provider}: function_call item without name"))
                    })?;
                let arguments = item
                    .get("arguments")
                    .map(normalize_arguments)
                    .unwrap_or_else(|| "{}".into());
                return Ok(ChatResponse {
                    text: String::new(),
                    reasoning: None,
                    tool_calls: vec![ToolCall {
                        id: "call_0".into(),
                        tool_name: name.to_string(),
                        arguments,
                    }],
                    finish_reason: Some("tool_calls".into()),
                });
            }
            _ => {
                if let Some(t) = item.get("text").and_then(|v| v.as_str()) {
                    text.push_str(t);
                }
                if let Some(parts) = item.get("content").and_then(|c| c.as_array()) {
                    for part in parts {
                        if let Some(t) = part.get("text").and_then(|v| v.as_str()) {
                            text.push_str(t);
                        }
                    }
                }
            }
        }
    }

    Ok(ChatResponse {
        text,
        reasoning: None,
        tool_calls: Vec::new(),
        finish_reason: Some("stop".into()),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ActiveModel {
        ActiveModel {
            provider_id: "openai".into(),
            model_id: "gpt-5".into(),
            api_key: Some("k".into()),
            reasoning_effort: None,
        }
    }

    #[test]
    fn body_folds_system_into_instructions() {
        let msgs = vec![
            Message::system("be terse"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::tool_result("call_1", "file contents"),
        ];
        let body = build_responses_body(&model(), &msgs, &[]);
        assert_eq!(body["instructions"], "be terse");

        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 3);
        assert_eq!(input[0]["content"][0]["type"], "input_text");
        assert_eq!(input[1]["content"][0]["type"], "output_text");
        // Tool results re-enter as prefixed user messages.
        assert_eq!(input[2]["role"], "user");
        assert_eq!(input[2]["content"][0]["text"], "[tool]\nfile contents");
    }

    #[test]
    fn body_sets_stream_contract_fields() {
        let body = build_responses_body(&model(), &[Message::user("hi")], &[]);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["parallel_tool_calls"], false);
        assert_eq!(body["store"], false);
        assert_eq!(body["stream"], true);
        assert_eq!(body["include"][0], "reasoning.encrypted_content");
    }

    #[test]
    fn assembles_tool_call_from_item_and_deltas() {
        let body = concat!(
            "data: {\"item\":{\"type\":\"function_call\",\"name\":\"read_file\"}}\n\n",
            "data: {\"type\":\"response.function_call_arguments.delta\",\"delta\":\"{\\\"path\\\":\\\"/tmp/\"}\n\n",
            "data: {\"type\":\"response.function_call_arguments.delta\",\"delta\":\"x\\\"}\"}\n\n",
            "data: [DONE]\n\n",
        );
        let resp = parse_responses_stream("openai", body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool_name, "read_file");
        assert_eq!(resp.tool_calls[0].arguments, "{\"path\":\"/tmp/x\"}");
        assert_eq!(resp.tool_calls[0].id, "call_0");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert!(resp.text.is_empty());
    }

    #[test]
    fn first_delta_clears_seeded_arguments() {
        // The item event pre-fills arguments AND deltas repeat them; the
        // seed must not double the prefix.
        let body = concat!(
            "data: {\"item\":{\"type\":\"function_call\",\"name\":\"bash\",\"arguments\":\"{\\\"command\\\":\\\"ls\\\"}\"}}\n\n",
            "data: {\"type\":\"response.function_call_arguments.delta\",\"delta\":\"{\\\"command\\\":\"}\n\n",
            "data: {\"type\":\"response.function_call_arguments.delta\",\"delta\":\"\\\"ls\\\"}\"}\n\n",
            "data: [DONE]\n\n",
        );
        let resp = parse_responses_stream("openai", body).unwrap();
        assert_eq!(resp.tool_calls[0].arguments, "{\"command\":\"ls\"}");
    }

    #[test]
    fn seed_alone_survives_without_deltas() {
        let body = concat!(
            "data: {\"item\":{\"type\":\"function_call\",\"name\":\"list_dir\",\"arguments\":{\"path\":\".\"}}}\n\n",
            "data: [DONE]\n\n",
        );
        let resp = parse_responses_stream("openai", body).unwrap();
        assert_eq!(resp.tool_calls[0].arguments, "{\"path\":\".\"}");
    }

    #[test]
    fn text_deltas_accumulate() {
        let body = concat!(
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hel\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"lo\"}\n\n",
            "data: [DONE]\n\n",
        );
        let resp = parse_responses_stream("openai", body).unwrap();
        assert_eq!(resp.text, "Hello");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn malformed_events_are_skipped() {
        let body = concat!(
            "data: {not json\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"ok\"}\n\n",
        );
        let resp = parse_responses_stream("openai", body).unwrap();
        assert_eq!(resp.text, "ok");
    }

    #[test]
    fn non_stream_fallback_function_call() {
        let body = r#"{"output":[{"type":"function_call","name":"bash","arguments":"{\"command\":\"ls\"}"}]}"#;
        let resp = parse_responses_stream("openai", body).unwrap();
        assert_eq!(resp.tool_calls[0].tool_name, "bash");
    }

    #[test]
    fn non_stream_fallback_concatenates_text() {
        let body = r#"{"output":[{"type":"message","content":[{"type":"output_text","text":"a"},{"type":"output_text","text":"b"}]},{"type":"message","text":"c"}]}"#;
        let resp = parse_responses_stream("openai", body).unwrap();
        assert_eq!(resp.text, "abc");
    }

    #[test]
    fn fallback_without_output_is_missing_choices() {
        let err = parse_responses_stream("openai", r#"{"id":"resp_1"}"#).unwrap_err();
        assert!(matches!(err, Error::ResponseMissingChoices));
    }
}
