//! The timeline sink: typed streaming of intermediate turn events.
//!
//! The loop reports through this interface; the session manager's
//! implementation marshals the strings into WebSocket frames, the REPL
//! prints them. The sink must outlive the turn it observes.

/// Receiver for intermediate events during a turn.
pub trait TurnSink: Send + Sync {
    /// Coarse progress ("Running agent...", "Retrying...").
    fn status(&self, _content: &str) {}
    /// Model reasoning text.
    fn thinking(&self, _content: &str) {}
    /// Tool activity: the call line and its (sanitized) output.
    fn tool(&self, _content: &str) {}
    /// Anything else worth a timeline row.
    fn event(&self, _content: &str) {}
}

/// Sink that drops everything; used by tests and batch callers.
pub struct NullSink;

impl TurnSink for NullSink {}
