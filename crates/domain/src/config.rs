//! On-disk configuration: the selected model record and tunables.
//!
//! Everything lives under `~/.config/zagent/`. Single-record files are
//! JSON written via temp-file + rename so a crash never leaves a partial
//! payload behind.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The persisted model selection (single-record config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedModel {
    pub provider_id: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

/// Compaction tunables. The defaults are observed values, not contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
}

fn default_max_chars() -> usize {
    32_000
}

fn default_keep_recent_turns() -> usize {
    20
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            keep_recent_turns: default_keep_recent_turns(),
        }
    }
}

/// Resolve the zagent configuration directory (`~/.config/zagent`).
///
/// `HOME` must resolve; without it there is nowhere to keep credentials
/// or the context store.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Config("HOME is not set; cannot locate the config directory".into()))?;
    Ok(home.join(".config").join("zagent"))
}

/// Path of the single-record selected-model config.
pub fn selected_model_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("model.json"))
}

/// Path of the key=value credentials file.
pub fn credentials_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("credentials"))
}

/// Directory holding per-provider OAuth token files.
pub fn oauth_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("oauth"))
}

/// Root of the v2 context store.
pub fn contexts_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("contexts-v2"))
}

impl SelectedModel {
    /// Load the persisted selection, or `None` when nothing was saved yet
    /// or the record does not parse.
    pub fn load() -> Result<Option<Self>> {
        let path = selected_model_path()?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(model) => Ok(Some(model)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed model config");
                Ok(None)
            }
        }
    }

    /// Persist the selection atomically (temp file + rename).
    pub fn save(&self) -> Result<()> {
        let path = selected_model_path()?;
        let dir = path
            .parent()
            .ok_or_else(|| Error::Config("model config path has no parent".into()))?;
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_data()?;
        tmp.persist(&path)
            .map_err(|e| Error::Config(format!("persisting model config: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compaction_defaults() {
        let cfg = CompactionConfig::default();
        assert_eq!(cfg.max_chars, 32_000);
        assert_eq!(cfg.keep_recent_turns, 20);
    }

    #[test]
    fn compaction_deserializes_with_missing_fields() {
        let cfg: CompactionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_chars, 32_000);
    }

    #[test]
    fn selected_model_round_trips() {
        let m = SelectedModel {
            provider_id: "openrouter".into(),
            model_id: "qwen/qwen3-coder".into(),
            reasoning_effort: Some("high".into()),
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: SelectedModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn reasoning_effort_omitted_when_absent() {
        let m = SelectedModel {
            provider_id: "groq".into(),
            model_id: "llama-3.3-70b".into(),
            reasoning_effort: None,
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(!json.contains("reasoning_effort"));
    }
}
