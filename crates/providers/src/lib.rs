pub mod auth;
pub mod chat;
pub mod dispatch;
pub mod responses;
pub mod spec;
pub(crate) mod sse;

// Re-exports for convenience.
pub use dispatch::ProviderClient;
pub use spec::{ProviderSpec, PROVIDERS};

use serde::{Deserialize, Serialize};

/// Runtime model tuple: the persisted selection joined with the resolved
/// credential. Materialized fresh for every turn; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveModel {
    pub provider_id: String,
    pub model_id: String,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

/// Connection status for a provider, derived on demand from the
/// credential sources.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderState {
    pub provider_id: String,
    pub connected: bool,
}
