//! Credential resolution.
//!
//! Per request the key for a provider is resolved in a fixed order:
//!
//! 1. The provider's environment variable (`key_env`), when non-empty.
//! 2. An OAuth-style JSON file `~/.config/zagent/oauth/<provider>.json`
//!    with a readable `token` field.
//! 3. The shared credentials file `~/.config/zagent/credentials`
//!    (key=value lines, `#` comments).
//!
//! When nothing resolves the provider is unauthenticated and
//! [`guidance`] produces the message shown to the user.

use std::collections::HashMap;
use std::io::Write;

use za_domain::config::{credentials_path, oauth_dir};
use za_domain::error::{Error, Result};

use crate::spec::ProviderSpec;
use crate::ProviderState;

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Env,
    OauthFile,
    CredentialsFile,
}

/// A resolved credential with its provenance.
#[derive(Clone)]
pub struct ResolvedKey {
    pub key: String,
    pub source: KeySource,
}

// Manual Debug impl to avoid leaking key values.
impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("source", &self.source)
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// Resolve the effective key for a provider, or `None` when every source
/// came up empty.
pub fn resolve_key(spec: &ProviderSpec) -> Option<ResolvedKey> {
    // 1. Environment variable.
    if let Ok(val) = std::env::var(spec.key_env) {
        if !val.trim().is_empty() {
            return Some(ResolvedKey {
                key: val,
                source: KeySource::Env,
            });
        }
    }

    // 2. OAuth-style token file.
    if let Some(token) = read_oauth_token(spec.provider_id) {
        return Some(ResolvedKey {
            key: token,
            source: KeySource::OauthFile,
        });
    }

    // 3. Stored credentials file.
    if let Some(key) = read_credentials().remove(spec.provider_id) {
        return Some(ResolvedKey {
            key,
            source: KeySource::CredentialsFile,
        });
    }

    None
}

/// Derived connection status for a provider.
pub fn provider_state(spec: &ProviderSpec) -> ProviderState {
    ProviderState {
        provider_id: spec.provider_id.to_string(),
        connected: resolve_key(spec).is_some(),
    }
}

/// Guidance for the unauthenticated state.
pub fn guidance(spec: &ProviderSpec) -> String {
    format!(
        "no credential found for {}: set {} or add '{}=<key>' to the credentials file",
        spec.display_name, spec.key_env, spec.provider_id,
    )
}

fn read_oauth_token(provider_id: &str) -> Option<String> {
    let path = oauth_dir().ok()?.join(format!("{provider_id}.json"));
    let raw = std::fs::read_to_string(&path).ok()?;
    let value: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed OAuth token file");
            return None;
        }
    };
    value
        .get("token")
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}

fn read_credentials() -> HashMap<String, String> {
    let Ok(path) = credentials_path() else {
        return HashMap::new();
    };
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return HashMap::new();
    };
    parse_credentials(&raw)
}

fn parse_credentials(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let (k, v) = (k.trim(), v.trim());
            if !k.is_empty() && !v.is_empty() {
                map.insert(k.to_string(), v.to_string());
            }
        }
    }
    map
}

/// Persist an OAuth token for a provider.
///
/// Writes `{"token": ...}` to a temp file, restricts permissions, then
/// renames into place. A partially-written payload is never observable.
pub fn write_oauth_token(provider_id: &str, token: &str) -> Result<()> {
    let dir = oauth_dir()?;
    std::fs::create_dir_all(&dir)?;

    let payload = serde_json::json!({ "token": token });
    let json = serde_json::to_string_pretty(&payload)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().sync_data()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tmp.as_file().set_permissions(perms)?;
    }

    let path = dir.join(format!("{provider_id}.json"));
    tmp.persist(&path)
        .map_err(|e| Error::Auth(format!("persisting OAuth token: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_credentials_skips_comments_and_blanks() {
        let map = parse_credentials(
            "# providers\n\nopenai=sk-aaa\n  openrouter = or-bbb  \nbroken-line\n=novalue\n",
        );
        assert_eq!(map.get("openai").map(String::as_str), Some("sk-aaa"));
        assert_eq!(map.get("openrouter").map(String::as_str), Some("or-bbb"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn parse_credentials_keeps_equals_in_value() {
        let map = parse_credentials("deepseek=abc=def\n");
        assert_eq!(map.get("deepseek").map(String::as_str), Some("abc=def"));
    }

    #[test]
    fn guidance_names_the_env_var() {
        let spec = crate::spec::find("groq").unwrap();
        let g = guidance(spec);
        assert!(g.contains("GROQ_API_KEY"));
        assert!(g.contains("groq"));
    }

    #[test]
    fn resolved_key_debug_does_not_leak() {
        let rk = ResolvedKey {
            key: "super-secret-value".into(),
            source: KeySource::Env,
        };
        let s = format!("{rk:?}");
        assert!(!s.contains("super-secret-value"));
    }
}
