//! The tool registry: named local capabilities with JSON-schema
//! parameters, a classification bitfield, and an async execute fn.
//!
//! Tool identity is the name plus its flags; the loop consults the
//! flags to enforce mutation evidence and to intercept `respond_text`
//! before dispatch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use za_domain::message::ToolDefinition;

use crate::{exec, file_ops, web_fetch};

/// Classification bitfield for a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolFlags {
    pub is_read: bool,
    pub is_mutating: bool,
    pub is_respond_text: bool,
}

#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// A registered tool: schema, flags, primary path argument, handler.
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub flags: ToolFlags,
    /// Name of the argument that carries the tool's primary file path,
    /// recorded into the turn's `files_touched`.
    pub path_arg: Option<&'static str>,
    handler: Arc<dyn ToolHandler>,
}

/// Name → tool map with a stable definition order.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        definition: ToolDefinition,
        flags: ToolFlags,
        path_arg: Option<&'static str>,
        handler: Arc<dyn ToolHandler>,
    ) {
        let name = definition.name.clone();
        self.order.push(name.clone());
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                flags,
                path_arg,
                handler,
            },
        );
    }

    /// The built-in tool set rooted at a workspace directory.
    pub fn builtin(workspace_root: PathBuf) -> Self {
        let mut registry = Self::new();
        let http = reqwest::Client::new();

        registry.register(
            ToolDefinition {
                name: "bash".into(),
                description: "Run a shell command in the workspace root; stdout and stderr are merged and a non-zero exit appends an [exit N] marker.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string", "description": "Shell command to run"},
                    },
                }),
            },
            ToolFlags::default(),
            None,
            Arc::new(BashTool {
                root: workspace_root.clone(),
            }),
        );

        registry.register(
            ToolDefinition {
                name: "read_file".into(),
                description: "Read a file, optionally a line range via offset and limit.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path relative to the workspace root"},
                        "offset": {"type": ["integer", "null"], "description": "First line to read (0-indexed)"},
                        "limit": {"type": ["integer", "null"], "description": "Maximum number of lines"},
                    },
                }),
            },
            ToolFlags {
                is_read: true,
                ..Default::default()
            },
            Some("path"),
            Arc::new(ReadFileTool {
                root: workspace_root.clone(),
            }),
        );

        registry.register(
            ToolDefinition {
                name: "write_file".into(),
                description: "Create or overwrite a file with the given content.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path relative to the workspace root"},
                        "content": {"type": "string", "description": "Full file content"},
                    },
                }),
            },
            ToolFlags {
                is_mutating: true,
                ..Default::default()
            },
            Some("path"),
            Arc::new(WriteFileTool {
                root: workspace_root.clone(),
            }),
        );

        registry.register(
            ToolDefinition {
                name: "replace_in_file".into(),
                description: "Replace one exact occurrence of old_text with new_text. Fails when the match is missing or ambiguous.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path relative to the workspace root"},
                        "old_text": {"type": "string", "description": "Exact text to replace"},
                        "new_text": {"type": "string", "description": "Replacement text"},
                    },
                }),
            },
            ToolFlags {
                is_mutating: true,
                ..Default::default()
            },
            Some("path"),
            Arc::new(ReplaceTool {
                root: workspace_root.clone(),
            }),
        );

        registry.register(
            ToolDefinition {
                name: "list_dir".into(),
                description: "List a directory; subdirectories first with a trailing slash.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": ["string", "null"], "description": "Directory relative to the workspace root; defaults to '.'"},
                    },
                }),
            },
            ToolFlags {
                is_read: true,
                ..Default::default()
            },
            Some("path"),
            Arc::new(ListDirTool {
                root: workspace_root,
            }),
        );

        registry.register(
            ToolDefinition {
                name: "web_fetch".into(),
                description: "Fetch an http(s) URL and return the body text.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "url": {"type": "string", "description": "URL to fetch"},
                    },
                }),
            },
            ToolFlags {
                is_read: true,
                ..Default::default()
            },
            None,
            Arc::new(WebFetchTool { http }),
        );

        registry.register(
            ToolDefinition {
                name: "respond_text".into(),
                description: "Finish the task and deliver the final answer to the user.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "text": {"type": "string", "description": "The final answer"},
                    },
                }),
            },
            ToolFlags {
                is_respond_text: true,
                ..Default::default()
            },
            None,
            Arc::new(RespondTextTool),
        );

        registry
    }

    /// Tool definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn flags(&self, name: &str) -> Option<ToolFlags> {
        self.tools.get(name).map(|t| t.flags)
    }

    /// Extract the primary path argument of a call, if the tool has one.
    pub fn primary_path(&self, name: &str, args_json: &str) -> Option<String> {
        let arg = self.tools.get(name)?.path_arg?;
        let args: Value = serde_json::from_str(args_json).ok()?;
        args.get(arg)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Execute a tool by name. Unknown tools and argument decode
    /// failures are tool errors, not turn failures.
    pub async fn dispatch(&self, name: &str, args_json: &str) -> Result<String, String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| format!("unknown tool '{name}'"))?;
        let args: Value = if args_json.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(args_json)
                .map_err(|e| format!("invalid arguments for '{name}': {e}"))?
        };
        tool.handler.execute(args).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn decode<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments for '{tool}': {e}"))
}

struct BashTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for BashTool {
    async fn execute(&self, args: Value) -> Result<String, String> {
        exec::bash(&self.root, decode("bash", args)?).await
    }
}

struct ReadFileTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for ReadFileTool {
    async fn execute(&self, args: Value) -> Result<String, String> {
        file_ops::read_file(&self.root, decode("read_file", args)?).await
    }
}

struct WriteFileTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for WriteFileTool {
    async fn execute(&self, args: Value) -> Result<String, String> {
        file_ops::write_file(&self.root, decode("write_file", args)?).await
    }
}

struct ReplaceTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for ReplaceTool {
    async fn execute(&self, args: Value) -> Result<String, String> {
        file_ops::replace_in_file(&self.root, decode("replace_in_file", args)?).await
    }
}

struct ListDirTool {
    root: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for ListDirTool {
    async fn execute(&self, mut args: Value) -> Result<String, String> {
        // Strict schemas force every property, so a null path means "use
        // the default".
        if let Some(obj) = args.as_object_mut() {
            if obj.get("path").is_some_and(Value::is_null) {
                obj.remove("path");
            }
        }
        file_ops::list_dir(&self.root, decode("list_dir", args)?).await
    }
}

struct WebFetchTool {
    http: reqwest::Client,
}

#[async_trait::async_trait]
impl ToolHandler for WebFetchTool {
    async fn execute(&self, args: Value) -> Result<String, String> {
        web_fetch::web_fetch(&self.http, decode("web_fetch", args)?).await
    }
}

/// The loop intercepts respond_text before dispatch; executing it
/// directly just echoes the text back.
struct RespondTextTool;

#[async_trait::async_trait]
impl ToolHandler for RespondTextTool {
    async fn execute(&self, args: Value) -> Result<String, String> {
        Ok(args
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
