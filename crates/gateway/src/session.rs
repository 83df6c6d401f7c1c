//! Per-client session management.
//!
//! Each WebSocket connection owns one [`Session`]. Inbound messages
//! mutate it sequentially (the connection task is the only writer);
//! model runs additionally serialize across sessions through the global
//! run lock in [`AppState`].

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use za_context::{EventKind, ProjectContext};
use za_domain::config::SelectedModel;
use za_engine::guard::DEFAULT_RETRY_BUDGET;
use za_engine::{run_turn_guarded, TodoList, TurnInput, TurnSink};
use za_providers::{auth, spec};
use za_tools::file_ops::{self, ReadFileRequest, WriteFileRequest};
use za_tools::strip_ansi;
use za_tools::ToolRegistry;

use crate::protocol::{
    AssistantOutput, Inbound, ModelOption, Outbound, StreamKind, TurnView,
};
use crate::state::AppState;

/// One connected client.
pub struct Session {
    pub client_id: String,
    pub project: Option<ProjectContext>,
    pub todo: TodoList,
    tx: UnboundedSender<Outbound>,
}

impl Session {
    pub fn new(client_id: String, tx: UnboundedSender<Outbound>) -> Self {
        Self {
            client_id,
            project: None,
            todo: TodoList::new(),
            tx,
        }
    }

    pub fn send(&self, msg: Outbound) {
        let _ = self.tx.send(msg);
    }

    fn send_error(&self, content: impl Into<String>) {
        self.send(Outbound::Error {
            content: content.into(),
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn handle_inbound(state: &AppState, session: &mut Session, msg: Inbound) {
    match msg {
        Inbound::SetProject { path } => set_project(state, session, &path),
        Inbound::ListDir { path } => list_dir(session, path.as_deref()),
        Inbound::UserInput { text } => user_input(state, session, &text).await,
        Inbound::ReadFile { path } => read_file(session, &path).await,
        Inbound::WriteFile { path, content } => write_file(session, &path, content).await,
        Inbound::ListSessions => {
            session.send(Outbound::RecentSessions {
                sessions: state.store.list_sessions(),
            });
        }
        Inbound::LoadSession { id } => load_session(state, session, &id),
        Inbound::RenameSession { id, title } => match state.store.rename_session(&id, &title) {
            Ok(title) => session.send(Outbound::SessionTitleUpdated { id, title }),
            Err(e) => session.send_error(e.to_string()),
        },
        Inbound::GetModelInfo => model_info(session),
        Inbound::ListModels => list_models(state, session).await,
        Inbound::SetModel {
            provider_id,
            model_id,
            reasoning_effort,
        } => set_model(session, provider_id, model_id, reasoning_effort),
    }
}

// ── Project & files ────────────────────────────────────────────────

fn set_project(state: &AppState, session: &mut Session, path: &str) {
    match state.store.open_project(Path::new(path)) {
        Ok(ctx) => {
            for warning in &ctx.warnings {
                session.send(Outbound::Status {
                    content: format!("context recovery: {warning}"),
                });
            }
            let root = ctx
                .window
                .project_path
                .clone()
                .unwrap_or_else(|| path.to_string());
            session.send(Outbound::ProjectSet { path: root.clone() });
            session.send(Outbound::FileList {
                files: top_level_files(Path::new(&root)),
            });
            session.project = Some(ctx);
        }
        Err(e) => session.send_error(e.to_string()),
    }
}

fn list_dir(session: &Session, path: Option<&str>) {
    let base = match path {
        Some(p) => PathBuf::from(p),
        None => dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
    };
    let canonical = match base.canonicalize() {
        Ok(c) => c,
        Err(e) => {
            session.send_error(format!("cannot list '{}': {e}", base.display()));
            return;
        }
    };

    let mut dirs_out: Vec<String> = Vec::new();
    if canonical.parent().is_some() {
        dirs_out.push("..".into());
    }
    if let Ok(entries) = std::fs::read_dir(&canonical) {
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        dirs_out.extend(names);
    }

    session.send(Outbound::DirList {
        path: canonical.to_string_lossy().into_owned(),
        dirs: dirs_out,
    });
}

fn project_root(session: &Session) -> Option<PathBuf> {
    session
        .project
        .as_ref()
        .and_then(|p| p.window.project_path.clone())
        .map(PathBuf::from)
}

async fn read_file(session: &Session, path: &str) {
    let Some(root) = project_root(session) else {
        session.send_error("no project set");
        return;
    };
    match file_ops::read_file(
        &root,
        ReadFileRequest {
            path: path.to_string(),
            offset: None,
            limit: None,
        },
    )
    .await
    {
        Ok(content) => session.send(Outbound::FileContent {
            path: path.to_string(),
            content,
        }),
        Err(e) => session.send_error(e),
    }
}

async fn write_file(session: &Session, path: &str, content: String) {
    let Some(root) = project_root(session) else {
        session.send_error("no project set");
        return;
    };
    match file_ops::write_file(
        &root,
        WriteFileRequest {
            path: path.to_string(),
            content,
        },
    )
    .await
    {
        Ok(_) => session.send(Outbound::FileSaved {
            path: path.to_string(),
        }),
        Err(e) => session.send_error(e),
    }
}

fn top_level_files(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| {
            let mut name = e.file_name().to_string_lossy().into_owned();
            if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            name
        })
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

// ── Sessions ───────────────────────────────────────────────────────

fn load_session(state: &AppState, session: &mut Session, id: &str) {
    match state.store.open_by_id(id) {
        Ok(ctx) => {
            let turns: Vec<TurnView> = ctx
                .window
                .turns
                .iter()
                .map(|t| TurnView {
                    role: match t.role {
                        za_context::TurnRole::User => "user".into(),
                        za_context::TurnRole::Assistant => "assistant".into(),
                    },
                    content: t.content.clone(),
                    reasoning: t.reasoning.clone(),
                    tool_calls: t.tool_calls_count,
                    error_count: t.error_count,
                    files_touched: t.files_touched.clone(),
                })
                .collect();
            session.send(Outbound::SessionLoaded {
                id: id.to_string(),
                title: ctx.window.title.clone(),
                project_path: ctx.window.project_path.clone(),
                turns,
            });
            session.project = Some(ctx);
        }
        Err(e) => session.send_error(e.to_string()),
    }
}

// ── Model selection ────────────────────────────────────────────────

fn model_info(session: &Session) {
    match SelectedModel::load() {
        Ok(Some(selected)) => {
            let connected = spec::find(&selected.provider_id)
                .map(|p| auth::resolve_key(p).is_some())
                .unwrap_or(false);
            session.send(Outbound::ModelInfo {
                provider_id: Some(selected.provider_id),
                model_id: Some(selected.model_id),
                connected,
                reasoning_effort: selected.reasoning_effort,
            });
        }
        Ok(None) => session.send(Outbound::ModelInfo {
            provider_id: None,
            model_id: None,
            connected: false,
            reasoning_effort: None,
        }),
        Err(e) => session.send_error(e.to_string()),
    }
}

async fn list_models(state: &AppState, session: &Session) {
    let mut providers = Vec::with_capacity(spec::PROVIDERS.len());
    for provider in spec::PROVIDERS {
        let key = auth::resolve_key(provider);
        let models = match &key {
            Some(resolved) => state
                .client
                .list_models(provider.provider_id, &resolved.key)
                .await
                .unwrap_or_else(|e| {
                    tracing::debug!(provider = provider.provider_id, error = %e, "models listing failed");
                    Vec::new()
                }),
            None => Vec::new(),
        };
        providers.push(ModelOption {
            provider_id: provider.provider_id.to_string(),
            display_name: provider.display_name.to_string(),
            connected: key.is_some(),
            key_env: provider.key_env.to_string(),
            models,
        });
    }
    session.send(Outbound::ModelOptions { providers });
}

fn set_model(
    session: &Session,
    provider_id: String,
    model_id: String,
    reasoning_effort: Option<String>,
) {
    let Some(provider) = spec::find(&provider_id) else {
        session.send_error(format!("unknown provider '{provider_id}'"));
        return;
    };
    let selected = SelectedModel {
        provider_id,
        model_id,
        reasoning_effort,
    };
    if let Err(e) = selected.save() {
        session.send_error(e.to_string());
        return;
    }
    session.send(Outbound::ModelInfo {
        provider_id: Some(selected.provider_id),
        model_id: Some(selected.model_id),
        connected: auth::resolve_key(provider).is_some(),
        reasoning_effort: selected.reasoning_effort,
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The turn protocol
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn user_input(state: &AppState, session: &mut Session, text: &str) {
    let request = text.trim();
    if request.is_empty() {
        return;
    }

    session.send(Outbound::Status {
        content: "Running agent...".into(),
    });

    // One model run at a time, process-wide.
    let _run_permit = state.run_lock.lock().await;

    let model = match state.resolve_active_model() {
        Ok(m) => m,
        Err(e) => {
            session.send_error(e.to_string());
            return;
        }
    };

    // Default to the working directory when no project was chosen.
    if session.project.is_none() {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        match state.store.open_project(&cwd) {
            Ok(ctx) => session.project = Some(ctx),
            Err(e) => {
                session.send_error(e.to_string());
                return;
            }
        }
    }
    let ctx = session.project.as_mut().expect("project just ensured");

    if let Err(e) = ctx.append_user_turn(request) {
        session
            .tx
            .send(Outbound::Error {
                content: format!("failed to persist turn: {e}"),
            })
            .ok();
        return;
    }

    let assembled = za_context::assemble::assemble(&ctx.window, &Default::default());
    let mut prior = Vec::with_capacity(assembled.history.len() + 1);
    if let Some(preamble) = &assembled.preamble {
        prior.push(za_domain::Message::system(preamble.clone()));
    }
    // The user turn just appended is re-sent as the live request, not as
    // history.
    let history_len = assembled.history.len().saturating_sub(1);
    prior.extend(assembled.history.into_iter().take(history_len));

    let workspace = ctx
        .window
        .project_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let registry = ToolRegistry::builtin(workspace);
    let sink = WsSink::new(session.tx.clone());

    let result = run_turn_guarded(
        state.client.as_ref(),
        &registry,
        &sink,
        &state.cancel,
        TurnInput {
            model: &model,
            system_prompt: None,
            user_request: request,
            prior_messages: &prior,
            todo: &session.todo,
        },
        DEFAULT_RETRY_BUDGET,
    )
    .await;

    match result {
        Ok(turn) => {
            if let Err(e) = ctx.append_assistant_turn(
                &turn.response,
                turn.reasoning.as_deref(),
                turn.tool_calls,
                turn.error_count,
                &turn.files_touched,
            ) {
                tracing::warn!(error = %e, "assistant turn persist failed");
            }
            if let Err(e) = ctx.persist() {
                tracing::warn!(error = %e, "snapshot persist failed");
            }

            let (command_output, tool_output) = sink.into_captured();
            session.send(Outbound::AssistantOutput(AssistantOutput::Final {
                content: turn.response,
                reasoning: turn.reasoning,
                command_output,
                tool_output,
                tool_calls: turn.tool_calls,
                error_count: turn.error_count,
                files_touched: turn.files_touched,
            }));
        }
        Err(e) => {
            let detail = state
                .client
                .last_error()
                .unwrap_or_else(|| e.to_string());
            let _ = ctx.append_trace(
                EventKind::ErrorEvent,
                serde_json::json!({ "detail": &detail }),
            );
            session.send_error(detail);
        }
    }

    state.cancel.reset();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct SinkCapture {
    tool_output: String,
    command_output: String,
    /// The previous tool frame was a bash call line; the next one is
    /// its output.
    pending_bash_output: bool,
}

/// Marshals loop events into `assistant_output` stream frames and
/// captures tool output for the final frame.
pub struct WsSink {
    tx: UnboundedSender<Outbound>,
    capture: Mutex<SinkCapture>,
}

impl WsSink {
    pub fn new(tx: UnboundedSender<Outbound>) -> Self {
        Self {
            tx,
            capture: Mutex::new(SinkCapture::default()),
        }
    }

    fn emit(&self, kind: StreamKind, content: &str) {
        let stripped = strip_ansi(content);
        let _ = self
            .tx
            .send(Outbound::AssistantOutput(AssistantOutput::Stream {
                kind,
                content: stripped,
            }));
    }

    pub fn into_captured(self) -> (String, String) {
        let capture = self.capture.into_inner();
        (capture.command_output, capture.tool_output)
    }
}

impl TurnSink for WsSink {
    fn status(&self, content: &str) {
        self.emit(StreamKind::Status, content);
    }

    fn thinking(&self, content: &str) {
        self.emit(StreamKind::Thinking, content);
    }

    fn tool(&self, content: &str) {
        let stripped = strip_ansi(content);
        {
            let mut capture = self.capture.lock();
            if capture.pending_bash_output {
                capture.command_output.push_str(&stripped);
                capture.command_output.push('\n');
                capture.pending_bash_output = false;
            } else if stripped.starts_with("bash ") {
                capture.pending_bash_output = true;
            }
            capture.tool_output.push_str(&stripped);
            capture.tool_output.push('\n');
        }
        self.emit(StreamKind::Tool, content);
    }

    fn event(&self, content: &str) {
        self.emit(StreamKind::Event, content);
    }
}
