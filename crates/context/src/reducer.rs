//! The deterministic reducer: `(snapshot?, events) → ContextWindow`.
//!
//! Events are applied in `event_seq` order. A sequence gap or a record
//! from a different session is an integrity error; the caller falls back
//! to a fresh window with a visible warning. Same input stream, same
//! output — the reducer touches no clocks and no globals.

use serde_json::Value;

use za_domain::config::CompactionConfig;
use za_domain::{Error, Result};

use crate::events::{EventKind, EventRecord};
use crate::snapshot::Snapshot;
use crate::window::{ContextWindow, Turn, TurnRole};

/// Replay `events` on top of `snapshot` (or an empty window).
///
/// Only events with `event_seq > snapshot.last_applied_event_seq` are
/// applied; the event slice may include older records.
pub fn reduce(
    snapshot: Option<Snapshot>,
    events: &[EventRecord],
    expected_session: &str,
    cfg: &CompactionConfig,
) -> Result<ContextWindow> {
    let (mut window, applied_until) = match snapshot {
        Some(s) => {
            let seq = s.last_applied_event_seq;
            if let Some(max_seq) = events.iter().map(|e| e.event_seq).max() {
                if seq > max_seq {
                    return Err(Error::Store(format!(
                        "snapshot is ahead of the event log (snapshot seq {seq}, log max {max_seq})"
                    )));
                }
            } else if seq > 0 {
                return Err(Error::Store(format!(
                    "snapshot is ahead of the event log (snapshot seq {seq}, log empty)"
                )));
            }
            (s.into_window(), seq)
        }
        None => (ContextWindow::new(cfg), 0),
    };

    let mut last_seq = applied_until;
    for event in events {
        if event.session_id != expected_session {
            return Err(Error::Store(format!(
                "event {} belongs to session '{}' (expected '{}')",
                event.event_seq, event.session_id, expected_session
            )));
        }
        if event.event_seq <= applied_until {
            if event.event_seq > last_seq {
                last_seq = event.event_seq;
            }
            continue;
        }
        if event.event_seq != last_seq + 1 {
            return Err(Error::Store(format!(
                "event sequence gap: expected {}, found {}",
                last_seq + 1,
                event.event_seq
            )));
        }
        last_seq = event.event_seq;
        apply(&mut window, event);
    }

    Ok(window)
}

fn apply(window: &mut ContextWindow, event: &EventRecord) {
    match event.kind {
        EventKind::UserTurn => {
            window.turns.push(turn_from_payload(TurnRole::User, event));
        }
        EventKind::AssistantTurn => {
            window
                .turns
                .push(turn_from_payload(TurnRole::Assistant, event));
        }
        // Trace-only kinds: kept in the log for audit, no window effect.
        EventKind::ToolEvent
        | EventKind::StatusEvent
        | EventKind::DecisionEvent
        | EventKind::ErrorEvent => {}
    }
}

fn turn_from_payload(role: TurnRole, event: &EventRecord) -> Turn {
    let p = &event.payload;
    Turn {
        role,
        content: str_field(p, "content"),
        reasoning: p
            .get("reasoning")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        tool_calls_count: u32_field(p, "tool_calls_count"),
        error_count: u32_field(p, "error_count"),
        files_touched: p
            .get("files_touched")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        created_at: chrono::DateTime::from_timestamp_millis(event.ts)
            .unwrap_or_else(chrono::Utc::now),
    }
}

fn str_field(p: &Value, key: &str) -> String {
    p.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

fn u32_field(p: &Value, key: &str) -> u32 {
    p.get(key).and_then(Value::as_u64).unwrap_or(0) as u32
}
