//! The in-memory conversation window and its deterministic compaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use za_domain::config::CompactionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One persisted conversation turn. Append-only; never mutated after
/// the write that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls_count: u32,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_touched: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            reasoning: None,
            tool_calls_count: 0,
            error_count: 0,
            files_touched: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            reasoning: None,
            tool_calls_count: 0,
            error_count: 0,
            files_touched: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn chars(&self) -> usize {
        self.content.len() + self.reasoning.as_deref().map_or(0, str::len)
    }
}

/// Derived conversation state; rebuildable by replaying the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub max_chars: usize,
    pub keep_recent_turns: usize,
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub durable_facts: Vec<String>,
}

impl ContextWindow {
    pub fn new(cfg: &CompactionConfig) -> Self {
        Self {
            max_chars: cfg.max_chars,
            keep_recent_turns: cfg.keep_recent_turns,
            turns: Vec::new(),
            title: None,
            project_path: None,
            summary: None,
            durable_facts: Vec::new(),
        }
    }

    pub fn total_chars(&self) -> usize {
        self.turns.iter().map(Turn::chars).sum()
    }

    /// Fold the oldest turns into the summary until the window fits both
    /// the character and turn-count budgets.
    ///
    /// Deterministic and idempotent: the fold text depends only on the
    /// folded turns, so re-running compaction on an already-compacted
    /// window changes nothing.
    pub fn compact(&mut self) -> bool {
        let over_turns = self.turns.len() > self.keep_recent_turns;
        let over_chars = self.total_chars() > self.max_chars;
        if !over_turns && !over_chars {
            return false;
        }

        let mut fold_until = self.turns.len().saturating_sub(self.keep_recent_turns);
        // Keep folding past the turn budget while still over the
        // character budget, but always retain the most recent turn pair.
        let min_keep = 2.min(self.turns.len());
        while fold_until < self.turns.len() - min_keep
            && self.turns[fold_until..].iter().map(Turn::chars).sum::<usize>() > self.max_chars
        {
            fold_until += 1;
        }
        if fold_until == 0 {
            return false;
        }

        let folded: Vec<Turn> = self.turns.drain(..fold_until).collect();
        let mut summary = self.summary.take().unwrap_or_default();
        for turn in &folded {
            match turn.role {
                TurnRole::User => {
                    summary.push_str("- ");
                    summary.push_str(&compact_whitespace(&turn.content, 100));
                    summary.push('\n');
                }
                TurnRole::Assistant => {
                    if !turn.files_touched.is_empty() {
                        summary.push_str("  touched: ");
                        summary.push_str(&turn.files_touched.join(", "));
                        summary.push('\n');
                    }
                }
            }
        }
        self.summary = Some(summary);
        true
    }
}

/// Collapse runs of whitespace and cap the result at `max` characters,
/// appending an ellipsis when truncated.
pub fn compact_whitespace(s: &str, max: usize) -> String {
    let collapsed: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max).collect();
    format!("{cut}…")
}

/// Derive a window title from the first user turn.
pub fn derive_title(first_user_content: &str) -> String {
    compact_whitespace(first_user_content, 80)
}

/// A persisted title that is missing or looks like a bare absolute path
/// should be replaced by a derived one.
pub fn title_needs_derivation(title: Option<&str>) -> bool {
    match title {
        None => true,
        Some(t) => t.trim().is_empty() || t.trim_start().starts_with('/'),
    }
}
