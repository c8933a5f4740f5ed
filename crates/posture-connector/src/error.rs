//! Error types shared by all directory providers.

use thiserror::Error;

/// Result type alias using `ConnectorError`.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors that can occur when talking to a directory provider.
///
/// The scan pipeline cares about three distinctions: configuration problems
/// (fail fast, before any phase runs), authentication problems (operators
/// must re-issue credentials, retrying is pointless), and transient problems
/// (retried with bounded backoff, then absorbed as a phase failure).
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Credential blob or provider settings are malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider rejected the credential or the delegated scope (401/403).
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Provider signalled rate limiting (429).
    #[error("Rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// Timeout or 5xx-class response; safe to retry.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// The API for a category is disabled or unlicensed on the tenant.
    #[error("Category unsupported by provider: {0}")]
    Unsupported(String),

    /// Retry budget for a single page request was exhausted.
    #[error("Maximum retries ({attempts}) exceeded: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Provider returned an API-level error payload.
    #[error("Provider API error: {code} - {message}")]
    Api { code: String, message: String },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl ConnectorError {
    /// True when the error means the stored credential must be re-issued.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// True when retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transient(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
