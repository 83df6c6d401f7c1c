//! The WebSocket JSON protocol.
//!
//! Every frame is a UTF-8 JSON object with a `type` field. The two
//! `assistant_output` shapes (streamed kind-tagged and final) share one
//! tag; the untagged inner enum picks the shape.

use serde::{Deserialize, Serialize};

use za_context::SessionSummary;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    SetProject {
        path: String,
    },
    ListDir {
        #[serde(default)]
        path: Option<String>,
    },
    UserInput {
        text: String,
    },
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ListSessions,
    LoadSession {
        id: String,
    },
    RenameSession {
        id: String,
        title: String,
    },
    GetModelInfo,
    ListModels,
    SetModel {
        provider_id: String,
        model_id: String,
        #[serde(default)]
        reasoning_effort: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One streamed or final assistant frame.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AssistantOutput {
    /// Intermediate, kind-tagged event.
    Stream { kind: StreamKind, content: String },
    /// The full final result of a turn.
    Final {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        command_output: String,
        tool_output: String,
        tool_calls: u32,
        error_count: u32,
        files_touched: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Status,
    Thinking,
    Tool,
    Event,
}

/// One turn as shipped inside `session_loaded`.
#[derive(Debug, Clone, Serialize)]
pub struct TurnView {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub tool_calls: u32,
    pub error_count: u32,
    pub files_touched: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelOption {
    pub provider_id: String,
    pub display_name: String,
    pub connected: bool,
    pub key_env: String,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Connected {
        client_id: String,
    },
    ProjectSet {
        path: String,
    },
    FileList {
        files: Vec<String>,
    },
    DirList {
        path: String,
        dirs: Vec<String>,
    },
    FileContent {
        path: String,
        content: String,
    },
    FileSaved {
        path: String,
    },
    AssistantOutput(AssistantOutput),
    RecentSessions {
        sessions: Vec<SessionSummary>,
    },
    SessionLoaded {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        project_path: Option<String>,
        turns: Vec<TurnView>,
    },
    SessionTitleUpdated {
        id: String,
        title: String,
    },
    ModelInfo {
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model_id: Option<String>,
        connected: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_effort: Option<String>,
    },
    ModelOptions {
        providers: Vec<ModelOption>,
    },
    Status {
        content: String,
    },
    Error {
        content: String,
    },
    DevReload,
}

impl Outbound {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "outbound frame failed to serialize");
            r#"{"type":"error","content":"internal serialization failure"}"#.to_string()
        })
    }
}

/// Guard applied to every text frame before JSON parsing: trim, reject
/// empty, reject anything that does not open an object.
pub fn parse_text_frame(raw: &str) -> Result<Inbound, ()> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return Err(());
    }
    serde_json::from_str::<Inbound>(trimmed).map_err(|_| ())
}

/// The canonical malformed-frame reply.
pub fn invalid_json() -> Outbound {
    Outbound::Error {
        content: "Invalid JSON".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn inbound_round_trips() {
        let msg: Inbound =
            serde_json::from_str(r#"{"type":"user_input","text":"hello"}"#).unwrap();
        assert!(matches!(msg, Inbound::UserInput { ref text } if text == "hello"));

        let msg: Inbound = serde_json::from_str(r#"{"type":"list_dir"}"#).unwrap();
        assert!(matches!(msg, Inbound::ListDir { path: None }));

        let msg: Inbound = serde_json::from_str(
            r#"{"type":"set_model","provider_id":"openai","model_id":"gpt-5"}"#,
        )
        .unwrap();
        assert!(matches!(msg, Inbound::SetModel { reasoning_effort: None, .. }));
    }

    #[test]
    fn frame_guard_rejects_junk() {
        assert!(parse_text_frame("").is_err());
        assert!(parse_text_frame("   ").is_err());
        assert!(parse_text_frame("[1,2,3]").is_err());
        assert!(parse_text_frame("not json").is_err());
        assert!(parse_text_frame(r#"{"type":"no_such_type"}"#).is_err());
        assert!(parse_text_frame(r#"  {"type":"list_sessions"} "#).is_ok());
    }

    #[test]
    fn streamed_assistant_output_shape() {
        let frame = Outbound::AssistantOutput(AssistantOutput::Stream {
            kind: StreamKind::Thinking,
            content: "hmm".into(),
        });
        let v: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(v["type"], "assistant_output");
        assert_eq!(v["kind"], "thinking");
        assert_eq!(v["content"], "hmm");
    }

    #[test]
    fn final_assistant_output_shape() {
        let frame = Outbound::AssistantOutput(AssistantOutput::Final {
            content: "done".into(),
            reasoning: None,
            command_output: "ls output".into(),
            tool_output: "everything".into(),
            tool_calls: 3,
            error_count: 0,
            files_touched: vec!["a.txt".into()],
        });
        let v: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(v["type"], "assistant_output");
        assert!(v.get("kind").is_none());
        assert_eq!(v["tool_calls"], 3);
        assert_eq!(v["files_touched"][0], "a.txt");
    }

    #[test]
    fn error_frame_shape() {
        let v: Value = serde_json::from_str(&invalid_json().to_json()).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["content"], "Invalid JSON");
    }

    #[test]
    fn outbound_snake_case_tags() {
        let v: Value = serde_json::from_str(
            &Outbound::SessionTitleUpdated {
                id: "abcd".into(),
                title: "t".into(),
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(v["type"], "session_title_updated");

        let v: Value = serde_json::from_str(&Outbound::DevReload.to_json()).unwrap();
        assert_eq!(v["type"], "dev_reload");
    }
}
