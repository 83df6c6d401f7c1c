//! The Context Store facade.
//!
//! Owns the on-disk layout `contexts-v2/<project_id_hex>/{meta.json,
//! events.ndjson, snapshot.json}` and every mutation of it. Loading
//! replays the event log over the snapshot through the reducer; any
//! integrity failure degrades to a fresh window with a recorded warning
//! instead of refusing to start.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use za_domain::config::CompactionConfig;
use za_domain::{Error, Result};

use crate::events::{self, EventKind, EventRecord};
use crate::identity;
use crate::reducer;
use crate::snapshot::{self, Meta, Snapshot};
use crate::window::{self, ContextWindow, Turn, TurnRole};

/// Listing entry for one stored session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub updated: DateTime<Utc>,
    pub turn_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

/// Store root handle.
pub struct ContextStore {
    root: PathBuf,
    cfg: CompactionConfig,
}

impl ContextStore {
    pub fn new(root: PathBuf, cfg: CompactionConfig) -> Self {
        Self { root, cfg }
    }

    /// Open the store at its default location under the config dir.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(
            za_domain::config::contexts_dir()?,
            CompactionConfig::default(),
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open (or create) the project context for a directory.
    pub fn open_project(&self, project_root: &Path) -> Result<ProjectContext> {
        let canonical = identity::canonical_project_root(project_root)?;
        let id = identity::project_id_hex(&canonical);
        self.open_dir(&id, Some(canonical.to_string_lossy().into_owned()))
    }

    /// Open an existing session by its hex id (for `load_session`).
    pub fn open_by_id(&self, id: &str) -> Result<ProjectContext> {
        let dir = self.root.join(id);
        if !dir.is_dir() {
            return Err(Error::Store(format!("no stored session '{id}'")));
        }
        self.open_dir(id, None)
    }

    fn open_dir(&self, id: &str, project_root: Option<String>) -> Result<ProjectContext> {
        let dir = self.root.join(id);
        std::fs::create_dir_all(&dir)?;

        let meta_path = dir.join("meta.json");
        let meta = match snapshot::read_meta(&meta_path)? {
            Some(m) => m,
            None => {
                let root = project_root.clone().unwrap_or_default();
                let m = Meta::new(id, root);
                snapshot::write_json_atomic(&meta_path, &m)?;
                m
            }
        };

        let mut warnings = Vec::new();

        let events_path = dir.join("events.ndjson");
        let log = match events::read_events(&events_path) {
            Ok(read) => {
                if !read.warnings.is_empty() {
                    events::truncate_torn_tail(&events_path)?;
                    warnings.extend(read.warnings);
                }
                read.events
            }
            Err(e) => {
                warnings.push(format!("event log unreadable, starting fresh: {e}"));
                tracing::warn!(session = id, error = %e, "event log unreadable; starting fresh");
                Vec::new()
            }
        };

        let snap = snapshot::read_snapshot(&dir.join("snapshot.json"));
        let (mut window, next_seq) = match reducer::reduce(snap, &log, id, &self.cfg) {
            Ok(w) => {
                let next = log.iter().map(|e| e.event_seq).max().unwrap_or(0) + 1;
                (w, next)
            }
            Err(e) => {
                warnings.push(format!("context integrity check failed, starting fresh: {e}"));
                tracing::warn!(session = id, error = %e, "reducer rejected stored context; starting fresh");
                let next = log.iter().map(|e| e.event_seq).max().unwrap_or(0) + 1;
                (ContextWindow::new(&self.cfg), next)
            }
        };

        if window.project_path.is_none() {
            window.project_path = project_root.or_else(|| {
                let root = meta.project_root.clone();
                (!root.is_empty()).then_some(root)
            });
        }

        let mut ctx = ProjectContext {
            dir,
            session_id: id.to_string(),
            meta,
            window,
            next_seq,
            warnings,
        };

        // Derive a missing or path-like title from the first user turn
        // and persist it right away.
        if window::title_needs_derivation(ctx.window.title.as_deref()) {
            if let Some(first_user) = ctx
                .window
                .turns
                .iter()
                .find(|t| t.role == TurnRole::User)
                .map(|t| t.content.clone())
            {
                ctx.window.title = Some(window::derive_title(&first_user));
                ctx.write_snapshot()?;
            }
        }

        Ok(ctx)
    }

    /// Scan the store for sessions, newest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut sessions: Vec<SessionSummary> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let snap_path = entry.path().join("snapshot.json");
                let snap = snapshot::read_snapshot(&snap_path)?;
                let updated: DateTime<Utc> = std::fs::metadata(&snap_path)
                    .and_then(|m| m.modified())
                    .map(DateTime::from)
                    .unwrap_or_else(|_| Utc::now());
                Some(SessionSummary {
                    id: entry.file_name().to_string_lossy().into_owned(),
                    title: snap.title.clone(),
                    updated,
                    turn_count: snap.working_window.turns.len(),
                    project_path: snap.project_path,
                })
            })
            .collect();

        sessions.sort_by(|a, b| b.updated.cmp(&a.updated));
        sessions
    }

    /// Rename a stored session. The title is whitespace-normalized and
    /// must be non-empty.
    pub fn rename_session(&self, id: &str, title: &str) -> Result<String> {
        let normalized = window::compact_whitespace(title, 80);
        if normalized.is_empty() {
            return Err(Error::Store("session title must not be empty".into()));
        }
        let mut ctx = self.open_by_id(id)?;
        ctx.window.title = Some(normalized.clone());
        ctx.write_snapshot()?;
        Ok(normalized)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProjectContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An open project session: the reduced window plus append access to
/// the event log.
pub struct ProjectContext {
    dir: PathBuf,
    session_id: String,
    pub meta: Meta,
    pub window: ContextWindow,
    next_seq: u64,
    pub warnings: Vec<String>,
}

impl ProjectContext {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append(&mut self, kind: EventKind, payload: Value) -> Result<EventRecord> {
        let record = EventRecord::new(self.next_seq, self.session_id.clone(), kind, payload);
        events::append_event(&self.dir.join("events.ndjson"), &record)?;
        self.next_seq += 1;
        Ok(record)
    }

    /// Append a user turn to the log and the window.
    pub fn append_user_turn(&mut self, content: &str) -> Result<()> {
        let record = self.append(EventKind::UserTurn, serde_json::json!({ "content": content }))?;
        let mut turn = Turn::user(content);
        turn.created_at = record_time(&record);
        self.window.turns.push(turn);
        if window::title_needs_derivation(self.window.title.as_deref()) {
            self.window.title = Some(window::derive_title(content));
        }
        Ok(())
    }

    /// Append an assistant turn with its work metadata.
    pub fn append_assistant_turn(
        &mut self,
        content: &str,
        reasoning: Option<&str>,
        tool_calls_count: u32,
        error_count: u32,
        files_touched: &[String],
    ) -> Result<()> {
        let record = self.append(
            EventKind::AssistantTurn,
            serde_json::json!({
                "content": content,
                "reasoning": reasoning,
                "tool_calls_count": tool_calls_count,
                "error_count": error_count,
                "files_touched": files_touched,
            }),
        )?;
        let mut turn = Turn::assistant(content);
        turn.created_at = record_time(&record);
        turn.reasoning = reasoning.filter(|s| !s.is_empty()).map(str::to_string);
        turn.tool_calls_count = tool_calls_count;
        turn.error_count = error_count;
        turn.files_touched = files_touched.to_vec();
        self.window.turns.push(turn);
        Ok(())
    }

    /// Append a trace-only event (tool, status, decision, error).
    pub fn append_trace(&mut self, kind: EventKind, payload: Value) -> Result<()> {
        debug_assert!(!matches!(kind, EventKind::UserTurn | EventKind::AssistantTurn));
        self.append(kind, payload)?;
        Ok(())
    }

    /// Compact when over budget and write the snapshot.
    pub fn persist(&mut self) -> Result<()> {
        if self.window.compact() {
            self.meta.last_compacted_at = Some(Utc::now());
            snapshot::write_json_atomic(&self.dir.join("meta.json"), &self.meta)?;
        }
        self.write_snapshot()
    }

    fn write_snapshot(&self) -> Result<()> {
        let snap = Snapshot::from_window(self.next_seq.saturating_sub(1), &self.window);
        snapshot::write_json_atomic(&self.dir.join("snapshot.json"), &snap)
    }
}

/// The in-memory turn carries the record's millisecond timestamp so a
/// replayed window is identical to the one it was appended into.
fn record_time(record: &EventRecord) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(record.ts).unwrap_or_else(Utc::now)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
