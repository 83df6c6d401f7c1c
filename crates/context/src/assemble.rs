//! Prompt assembly: turn the window into the message array sent to the
//! provider, under strict per-section byte budgets.
//!
//! Sections never duplicate a turn; when the recent-turn budget would
//! overflow, older turns are dropped before newer ones.

use za_domain::message::Message;

use crate::window::{ContextWindow, TurnRole};

/// Per-section byte budgets. Defaults are sized for a 32k-char window.
#[derive(Debug, Clone)]
pub struct AssemblyBudgets {
    pub recent_turn_bytes: usize,
    pub durable_fact_bytes: usize,
    pub summary_bytes: usize,
}

impl Default for AssemblyBudgets {
    fn default() -> Self {
        Self {
            recent_turn_bytes: 24_000,
            durable_fact_bytes: 2_000,
            summary_bytes: 4_000,
        }
    }
}

/// The assembled context: an optional system preamble (summary + durable
/// facts) and the retained conversation history.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub preamble: Option<String>,
    pub history: Vec<Message>,
}

pub fn assemble(window: &ContextWindow, budgets: &AssemblyBudgets) -> AssembledContext {
    let mut sections: Vec<String> = Vec::new();

    if let Some(summary) = window.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        let capped = cap_bytes(summary, budgets.summary_bytes);
        sections.push(format!("Earlier conversation summary:\n{capped}"));
    }

    if !window.durable_facts.is_empty() {
        let mut facts = String::new();
        for fact in &window.durable_facts {
            let line = format!("- {fact}\n");
            if facts.len() + line.len() > budgets.durable_fact_bytes {
                break;
            }
            facts.push_str(&line);
        }
        if !facts.is_empty() {
            sections.push(format!("Durable facts:\n{facts}"));
        }
    }

    // Walk turns newest-first, keeping whole turns until the budget is
    // spent, then restore chronological order.
    let mut kept: Vec<Message> = Vec::new();
    let mut spent = 0usize;
    for turn in window.turns.iter().rev() {
        let cost = turn.content.len();
        if !kept.is_empty() && spent + cost > budgets.recent_turn_bytes {
            break;
        }
        spent += cost;
        let msg = match turn.role {
            TurnRole::User => Message::user(&turn.content),
            TurnRole::Assistant => Message::assistant(&turn.content),
        };
        kept.push(msg);
    }
    kept.reverse();

    AssembledContext {
        preamble: if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        },
        history: kept,
    }
}

fn cap_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut boundary = max;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}…", &s[..boundary])
}
