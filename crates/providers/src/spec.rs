//! Static provider registry.
//!
//! Endpoint URLs are part of the auth contract and must match the
//! provider documentation byte for byte. Specs are immutable; runtime
//! state (keys, connectivity) is derived elsewhere.

/// Endpoint set for one provider. `chat` is always present.
#[derive(Debug, Clone, Copy)]
pub struct Endpoints {
    pub chat: &'static str,
    pub responses: Option<&'static str>,
    pub models: Option<&'static str>,
    pub token_exchange: Option<&'static str>,
}

/// One upstream LLM service.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub provider_id: &'static str,
    pub display_name: &'static str,
    pub endpoints: Endpoints,
    /// Headers added to every request beyond the auth baseline.
    pub required_headers: &'static [(&'static str, &'static str)],
    pub user_agent: Option<&'static str>,
    /// Environment variable consulted first during key resolution.
    pub key_env: &'static str,
    /// Whether subscription-style (OAuth-like) tokens are accepted.
    pub supports_subscription: bool,
}

pub const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        provider_id: "openai",
        display_name: "OpenAI",
        endpoints: Endpoints {
            chat: "https://api.openai.com/v1/chat/completions",
            responses: Some("https://api.openai.com/v1/responses"),
            models: Some("https://api.openai.com/v1/models"),
            token_exchange: None,
        },
        required_headers: &[],
        user_agent: None,
        key_env: "OPENAI_API_KEY",
        supports_subscription: true,
    },
    ProviderSpec {
        provider_id: "openrouter",
        display_name: "OpenRouter",
        endpoints: Endpoints {
            chat: "https://openrouter.ai/api/v1/chat/completions",
            responses: None,
            models: Some("https://openrouter.ai/api/v1/models"),
            token_exchange: None,
        },
        required_headers: &[
            ("HTTP-Referer", "https://github.com/zagent/zagent"),
            ("X-Title", "zagent"),
        ],
        user_agent: None,
        key_env: "OPENROUTER_API_KEY",
        supports_subscription: false,
    },
    ProviderSpec {
        provider_id: "github-copilot",
        display_name: "GitHub Copilot",
        endpoints: Endpoints {
            chat: "https://api.githubcopilot.com/chat/completions",
            responses: Some("https://api.githubcopilot.com/responses"),
            models: Some("https://api.githubcopilot.com/models"),
            token_exchange: Some("https://api.github.com/copilot_internal/v2/token"),
        },
        required_headers: &[
            ("Editor-Version", "vscode/1.96.0"),
            ("Editor-Plugin-Version", "copilot-chat/0.23.2"),
            ("Copilot-Integration-Id", "vscode-chat"),
        ],
        user_agent: Some("GitHubCopilotChat/0.23.2"),
        key_env: "GITHUB_COPILOT_TOKEN",
        supports_subscription: true,
    },
    ProviderSpec {
        provider_id: "groq",
        display_name: "Groq",
        endpoints: Endpoints {
            chat: "https://api.groq.com/openai/v1/chat/completions",
            responses: None,
            models: Some("https://api.groq.com/openai/v1/models"),
            token_exchange: None,
        },
        required_headers: &[],
        user_agent: None,
        key_env: "GROQ_API_KEY",
        supports_subscription: false,
    },
    ProviderSpec {
        provider_id: "deepseek",
        display_name: "DeepSeek",
        endpoints: Endpoints {
            chat: "https://api.deepseek.com/chat/completions",
            responses: None,
            models: Some("https://api.deepseek.com/models"),
            token_exchange: None,
        },
        required_headers: &[],
        user_agent: None,
        key_env: "DEEPSEEK_API_KEY",
        supports_subscription: false,
    },
];

/// Look up a provider by its stable id.
pub fn find(provider_id: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|p| p.provider_id == provider_id)
}

/// Heuristic: a key that does not carry the sentinel API-key prefix and
/// contains at least two dots is a subscription-style (OAuth-like) token.
pub fn is_subscription_token(key: &str) -> bool {
    !key.starts_with("sk-") && key.matches('.').count() >= 2
}

/// Heuristic: an already-exchanged bearer looks JWT-like when it has at
/// least two dots or starts with the base64url JSON header prefix.
pub fn looks_jwt_like(key: &str) -> bool {
    key.matches('.').count() >= 2 || key.starts_with("eyJ")
}
