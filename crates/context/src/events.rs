//! Append-only NDJSON event log.
//!
//! One record per line, monotonically sequenced. Appends flush before
//! returning; a partial final line (torn write, crash) is discarded on
//! read and the next append continues from the last good sequence.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use za_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserTurn,
    AssistantTurn,
    ToolEvent,
    StatusEvent,
    DecisionEvent,
    ErrorEvent,
}

/// A single on-disk event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_seq: u64,
    pub session_id: String,
    /// Milliseconds since the epoch.
    pub ts: i64,
    pub kind: EventKind,
    pub payload: Value,
}

impl EventRecord {
    pub fn new(event_seq: u64, session_id: impl Into<String>, kind: EventKind, payload: Value) -> Self {
        Self {
            event_seq,
            session_id: session_id.into(),
            ts: chrono::Utc::now().timestamp_millis(),
            kind,
            payload,
        }
    }
}

/// Result of reading an event log back.
#[derive(Debug)]
pub struct EventLogRead {
    pub events: Vec<EventRecord>,
    /// Non-fatal recovery notes (discarded tail, skipped garbage).
    pub warnings: Vec<String>,
}

/// Append one record as a single flushed line.
pub fn append_event(path: &Path, record: &EventRecord) -> Result<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

/// Drop a torn final line so the next append starts clean.
///
/// Returns true when bytes were removed. A log whose last byte is a
/// newline is untouched.
pub fn truncate_torn_tail(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let raw = std::fs::read(path)?;
    if raw.is_empty() || raw.ends_with(b"\n") {
        return Ok(false);
    }
    let keep = raw.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1);
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    file.sync_data()?;
    Ok(true)
}

/// Read every intact record from the log.
///
/// Only the final line may be damaged (append-only discipline); a
/// malformed record anywhere else is an integrity error.
pub fn read_events(path: &Path) -> Result<EventLogRead> {
    if !path.exists() {
        return Ok(EventLogRead {
            events: Vec::new(),
            warnings: Vec::new(),
        });
    }

    let raw = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = raw.lines().collect();
    let mut events = Vec::with_capacity(lines.len());
    let mut warnings = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventRecord>(line) {
            Ok(rec) => events.push(rec),
            Err(e) => {
                if idx == lines.len() - 1 {
                    warnings.push(format!(
                        "discarded truncated tail record at line {}",
                        idx + 1
                    ));
                    tracing::warn!(path = %path.display(), "event log ends in a partial record; tail discarded");
                } else {
                    return Err(Error::Store(format!(
                        "corrupt event record at line {}: {e}",
                        idx + 1
                    )));
                }
            }
        }
    }

    Ok(EventLogRead { events, warnings })
}
