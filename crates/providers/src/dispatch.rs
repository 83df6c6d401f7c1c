//! Provider dispatch.
//!
//! [`ProviderClient`] owns the HTTP client and the last-error slot, picks
//! the wire protocol for each call, and applies the github-copilot bearer
//! exchange and responses→chat fallback.

use parking_lot::Mutex;
use serde_json::Value;

use za_domain::jsonutil::{excerpt, extract_error_envelope, looks_like_json};
use za_domain::message::{ChatResponse, Message, ToolDefinition};
use za_domain::{Error, Result};

use crate::spec::{self, ProviderSpec};
use crate::{auth, chat, responses, ActiveModel};

/// Length cap for body excerpts quoted in error details.
const ERROR_EXCERPT_CHARS: usize = 300;

/// Error-detail substrings that trigger the copilot responses→chat
/// retry. This list is contract, recorded from upstream error bodies;
/// do not generalize it.
const COPILOT_FALLBACK_MARKERS: &[&str] = &[
    "forbidden",
    "Terms of Service",
    "not supported",
    "model_not_supported",
];

fn is_copilot_fallback_detail(detail: &str) -> bool {
    COPILOT_FALLBACK_MARKERS.iter().any(|m| detail.contains(m))
}

/// Mask substrings that look like API keys or bearer tokens so raw
/// secrets never reach logs or the UI.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One client instance per session. Holds the last human-readable
/// provider error so the UI can surface it; the slot is cleared at the
/// start of every call.
pub struct ProviderClient {
    http: reqwest::Client,
    last_error: Mutex<Option<String>>,
}

impl Default for ProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderClient {
    pub fn new() -> Self {
        // No client-side timeout: long tool-heavy completions are normal
        // and cancellation is cooperative at the turn level.
        Self {
            http: reqwest::Client::new(),
            last_error: Mutex::new(None),
        }
    }

    /// The detail of the most recent failed call, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Run one model call, choosing the wire protocol per provider.
    pub async fn complete(
        &self,
        model: &ActiveModel,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        *self.last_error.lock() = None;

        let result = self.dispatch(model, messages, tools).await;
        if let Err(e) = &result {
            *self.last_error.lock() = Some(mask_secrets(&e.to_string()));
        }
        result
    }

    async fn dispatch(
        &self,
        model: &ActiveModel,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let provider = spec::find(&model.provider_id)
            .ok_or_else(|| Error::UnsupportedProvider(model.provider_id.clone()))?;

        let key = model
            .api_key
            .clone()
            .ok_or_else(|| Error::Auth(auth::guidance(provider)))?;

        match provider.provider_id {
            "openai" if spec::is_subscription_token(&key) => {
                self.responses_call(provider, &key, model, messages, tools)
                    .await
            }
            "github-copilot" => {
                let bearer = self.exchange_copilot_bearer(provider, &key).await;
                if provider.endpoints.responses.is_some() {
                    match self
                        .responses_call(provider, &bearer, model, messages, tools)
                        .await
                    {
                        Ok(resp) => Ok(resp),
                        Err(Error::Provider { detail, .. })
                            if is_copilot_fallback_detail(&detail) =>
                        {
                            tracing::debug!(detail, "copilot responses rejected, retrying chat");
                            self.chat_call(provider, &bearer, model, messages, tools)
                                .await
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    self.chat_call(provider, &bearer, model, messages, tools)
                        .await
                }
            }
            _ => self.chat_call(provider, &key, model, messages, tools).await,
        }
    }

    /// List model ids for a provider.
    pub async fn list_models(&self, provider_id: &str, key: &str) -> Result<Vec<String>> {
        let provider = spec::find(provider_id)
            .ok_or_else(|| Error::UnsupportedProvider(provider_id.to_string()))?;
        let url = provider
            .endpoints
            .models
            .ok_or_else(|| Error::UnsupportedProvider(provider_id.to_string()))?;

        let resp = self
            .base_request(self.http.get(url), provider, key)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        let body = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(provider_error(provider, status.as_u16(), &body));
        }
        chat::parse_models_response(provider.provider_id, &body)
    }

    // ── Wire-protocol calls ────────────────────────────────────────

    async fn chat_call(
        &self,
        provider: &'static ProviderSpec,
        key: &str,
        model: &ActiveModel,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let body = chat::build_chat_body(model, messages, tools);
        tracing::debug!(provider = provider.provider_id, model = %model.model_id, "chat request");

        let resp = self
            .base_request(self.http.post(provider.endpoints.chat), provider, key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(provider_error(provider, status.as_u16(), &text));
        }
        chat::parse_chat_response(provider.provider_id, &text)
    }

    async fn responses_call(
        &self,
        provider: &'static ProviderSpec,
        key: &str,
        model: &ActiveModel,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let url = provider
            .endpoints
            .responses
            .ok_or_else(|| Error::UnsupportedProvider(provider.provider_id.to_string()))?;
        let body = responses::build_responses_body(model, messages, tools);
        tracing::debug!(provider = provider.provider_id, model = %model.model_id, "responses request");

        let mut req = self
            .base_request(self.http.post(url), provider, key)
            .header("accept", "text/event-stream");
        if provider.provider_id == "github-copilot" {
            req = req
                .header("x-initiator", "agent")
                .header("Openai-Intent", "conversation-edits");
        }

        let resp = req.json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(provider_error(provider, status.as_u16(), &text));
        }
        responses::parse_responses_stream(provider.provider_id, &text)
    }

    // ── Copilot bearer exchange ────────────────────────────────────

    /// Resolve the effective copilot bearer: keys that already look
    /// JWT-like pass through; anything else is exchanged, falling back
    /// to the raw key when the exchange fails.
    async fn exchange_copilot_bearer(&self, provider: &'static ProviderSpec, key: &str) -> String {
        if spec::looks_jwt_like(key) {
            return key.to_string();
        }
        let Some(url) = provider.endpoints.token_exchange else {
            return key.to_string();
        };

        let result = self
            .http
            .get(url)
            .header("Authorization", format!("token {key}"))
            .header("accept-encoding", "identity")
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(v) => v
                    .get("token")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| key.to_string()),
                Err(e) => {
                    tracing::warn!(error = %e, "copilot token exchange returned unreadable body");
                    key.to_string()
                }
            },
            Ok(resp) => {
                tracing::warn!(status = resp.status().as_u16(), "copilot token exchange rejected");
                key.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "copilot token exchange failed");
                key.to_string()
            }
        }
    }

    // ── Shared request assembly ────────────────────────────────────

    fn base_request(
        &self,
        builder: reqwest::RequestBuilder,
        provider: &'static ProviderSpec,
        key: &str,
    ) -> reqwest::RequestBuilder {
        let mut req = builder
            .header("Authorization", format!("Bearer {key}"))
            .header("Content-Type", "application/json")
            .header("accept-encoding", "identity");
        for (name, value) in provider.required_headers {
            req = req.header(*name, *value);
        }
        if let Some(ua) = provider.user_agent {
            req = req.header("User-Agent", ua);
        }
        req
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Build the Provider error for a non-success HTTP status, preferring
/// the machine-readable envelope when the body carries one.
fn provider_error(provider: &'static ProviderSpec, status: u16, body: &str) -> Error {
    let detail = if looks_like_json(body) {
        serde_json::from_str::<Value>(body)
            .ok()
            .as_ref()
            .and_then(extract_error_envelope)
            .unwrap_or_else(|| excerpt(body, ERROR_EXCERPT_CHARS))
    } else {
        excerpt(body, ERROR_EXCERPT_CHARS)
    };
    Error::Provider {
        provider: provider.provider_id.to_string(),
        detail: format!("HTTP {status} - {detail}"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
