//! Process-wide escalating cancellation.
//!
//! One activation cancels the current turn cooperatively; a second
//! requests process exit; a third forces immediate termination. The
//! level clears between turns.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

pub const LEVEL_CANCEL_TURN: u8 = 1;
pub const LEVEL_EXIT: u8 = 2;
pub const LEVEL_FORCE: u8 = 3;

pub struct CancelState {
    level: AtomicU8,
    notify: Notify,
}

impl CancelState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            level: AtomicU8::new(0),
            notify: Notify::new(),
        })
    }

    /// Escalate one level and return the new level.
    pub fn activate(&self) -> u8 {
        let prev = self
            .level
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |l| {
                Some(l.saturating_add(1).min(LEVEL_FORCE))
            })
            .unwrap_or(LEVEL_FORCE);
        self.notify.notify_waiters();
        prev.saturating_add(1).min(LEVEL_FORCE)
    }

    pub fn level(&self) -> u8 {
        self.level.load(Ordering::Acquire)
    }

    /// The current turn should stop at its next checkpoint.
    pub fn is_cancelled(&self) -> bool {
        self.level() >= LEVEL_CANCEL_TURN
    }

    /// The process should exit after the turn unwinds.
    pub fn exit_requested(&self) -> bool {
        self.level() >= LEVEL_EXIT
    }

    pub fn force_exit(&self) -> bool {
        self.level() >= LEVEL_FORCE
    }

    /// Resolve as soon as cancellation is (or already was) requested.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register the waiter before re-checking, so an activation
            // landing between the check and the await still wakes us.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Clear a turn-level cancellation between turns. Exit requests are
    /// sticky.
    pub fn reset(&self) {
        let _ = self.level.compare_exchange(
            LEVEL_CANCEL_TURN,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
