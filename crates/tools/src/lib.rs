pub mod exec;
pub mod file_ops;
pub mod registry;
pub mod sanitize;
pub mod web_fetch;

// Re-exports for convenience.
pub use registry::{ToolFlags, ToolRegistry};
pub use sanitize::{cap_output, strip_ansi, MAX_TOOL_OUTPUT_BYTES};
