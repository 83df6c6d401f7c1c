/// Shared error type used across all zagent crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {detail}")]
    Provider { provider: String, detail: String },

    #[error("response parse: {0}")]
    ResponseParse(String),

    #[error("response contained no choices or output")]
    ResponseMissingChoices,

    #[error("provider '{0}' defines no endpoint for this operation")]
    UnsupportedProvider(String),

    #[error("model violated the tool-interface contract: {0}")]
    ProtocolViolation(String),

    #[error("stuck loop: {0}")]
    StuckLoop(String),

    #[error("step limit reached")]
    StepLimit,

    #[error("operation cancelled")]
    Cancelled,

    #[error("tool {tool}: {detail}")]
    Tool { tool: String, detail: String },

    #[error("store: {0}")]
    Store(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error aborts the whole turn rather than a single
    /// tool call. Tool errors feed back into the transcript instead.
    pub fn is_turn_fatal(&self) -> bool {
        !matches!(self, Error::Tool { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display_includes_both_fields() {
        let e = Error::Provider {
            provider: "openai".into(),
            detail: "HTTP 429 - rate limited".into(),
        };
        let s = e.to_string();
        assert!(s.contains("openai"));
        assert!(s.contains("rate limited"));
    }

    #[test]
    fn tool_errors_are_not_turn_fatal() {
        let e = Error::Tool {
            tool: "bash".into(),
            detail: "exit 1".into(),
        };
        assert!(!e.is_turn_fatal());
        assert!(Error::StepLimit.is_turn_fatal());
    }
}
