//! Shared application state.

use std::sync::Arc;

use tokio::sync::Mutex;

use za_context::ContextStore;
use za_domain::config::{CompactionConfig, SelectedModel};
use za_domain::{Error, Result};
use za_engine::CancelState;
use za_providers::{auth, spec, ActiveModel, ProviderClient};

/// State shared by every connection and the REPL.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ContextStore>,
    pub client: Arc<ProviderClient>,
    /// Serializes model runs across all sessions: the remote provider is
    /// the contended resource, and one in-flight run keeps the streamed
    /// token output unambiguous.
    pub run_lock: Arc<Mutex<()>>,
    pub cancel: Arc<CancelState>,
    pub compaction: CompactionConfig,
}

impl AppState {
    pub fn new(store: ContextStore) -> Self {
        Self {
            store: Arc::new(store),
            client: Arc::new(ProviderClient::new()),
            run_lock: Arc::new(Mutex::new(())),
            cancel: CancelState::new(),
            compaction: CompactionConfig::default(),
        }
    }

    /// Join the persisted model selection with the resolved credential.
    pub fn resolve_active_model(&self) -> Result<ActiveModel> {
        let selected = SelectedModel::load()?
            .ok_or_else(|| Error::Config("no model selected; use set_model first".into()))?;
        let provider = spec::find(&selected.provider_id)
            .ok_or_else(|| Error::UnsupportedProvider(selected.provider_id.clone()))?;
        let key = auth::resolve_key(provider)
            .map(|k| k.key)
            .ok_or_else(|| Error::Auth(auth::guidance(provider)))?;
        Ok(ActiveModel {
            provider_id: selected.provider_id,
            model_id: selected.model_id,
            api_key: Some(key),
            reasoning_effort: selected.reasoning_effort,
        })
    }
}
