pub mod config;
pub mod error;
pub mod jsonutil;
pub mod message;

// Re-exports for convenience.
pub use error::{Error, Result};
pub use message::{ChatResponse, Message, Role, ToolCall, ToolDefinition};
