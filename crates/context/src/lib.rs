pub mod assemble;
pub mod events;
pub mod identity;
pub mod reducer;
pub mod snapshot;
pub mod store;
pub mod window;

// Re-exports for convenience.
pub use events::{EventKind, EventRecord};
pub use snapshot::{Meta, Snapshot};
pub use store::{ContextStore, ProjectContext, SessionSummary};
pub use window::{ContextWindow, Turn, TurnRole};
