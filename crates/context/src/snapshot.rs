//! Snapshot and meta records.
//!
//! Both are whole-file JSON documents written via temp file + fsync +
//! rename, so readers only ever observe a complete payload. A snapshot
//! that fails to parse is ignored and the reducer replays the full log.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use za_domain::{Error, Result};

use crate::window::ContextWindow;

pub const SCHEMA_VERSION: u32 = 2;

/// Per-project metadata (`meta.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub schema_version: u32,
    pub project_id: String,
    pub project_root: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_compacted_at: Option<DateTime<Utc>>,
    #[serde(default = "default_integrity_mode")]
    pub integrity_mode: String,
}

fn default_integrity_mode() -> String {
    "strict".into()
}

impl Meta {
    pub fn new(project_id: impl Into<String>, project_root: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            project_id: project_id.into(),
            project_root: project_root.into(),
            created_at: Utc::now(),
            last_compacted_at: None,
            integrity_mode: default_integrity_mode(),
        }
    }
}

/// Coalesced window state (`snapshot.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_applied_event_seq: u64,
    pub working_window: ContextWindow,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub durable_facts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

impl Snapshot {
    pub fn from_window(last_applied_event_seq: u64, window: &ContextWindow) -> Self {
        Self {
            last_applied_event_seq,
            working_window: window.clone(),
            durable_facts: window.durable_facts.clone(),
            title: window.title.clone(),
            project_path: window.project_path.clone(),
        }
    }

    /// Rebuild the in-memory window, letting the snapshot's top-level
    /// fields win over whatever the serialized window carried.
    pub fn into_window(self) -> ContextWindow {
        let mut window = self.working_window;
        window.durable_facts = self.durable_facts;
        window.title = self.title;
        window.project_path = self.project_path;
        window
    }
}

/// Write any serializable document atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Store(format!("'{}' has no parent directory", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().sync_data()?;
    tmp.persist(path)
        .map_err(|e| Error::Store(format!("persisting '{}': {e}", path.display())))?;
    Ok(())
}

/// Read a snapshot, treating parse failures as absence.
pub fn read_snapshot(path: &Path) -> Option<Snapshot> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable snapshot; replaying log");
            None
        }
    }
}

/// Read the meta record. Unlike snapshots, a corrupt meta is an error:
/// it anchors project identity.
pub fn read_meta(path: &Path) -> Result<Option<Meta>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let meta: Meta =
        serde_json::from_str(&raw).map_err(|e| Error::Store(format!("corrupt meta.json: {e}")))?;
    Ok(Some(meta))
}
