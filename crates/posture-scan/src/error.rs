//! Scan pipeline error taxonomy.
//!
//! Propagation policy: configuration and authentication problems surface
//! synchronously to the triggering caller; transient provider errors and
//! phase failures are absorbed into the persisted scan log; anything else
//! fails the run and lands in its `error_message`.

use posture_connector::ConnectorError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the scan pipeline and service layer.
#[derive(Debug, Error)]
pub enum ScanError {
    /// No provider credential stored for the organization.
    #[error("Provider not configured for organization {0}")]
    NotConfigured(Uuid),

    /// Credential blob or provider settings invalid; fails before any phase.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider rejected the credential; operators must re-issue it.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A scan is already running for the organization; rejected, not queued.
    #[error("Scan already in progress for organization {0}")]
    RunConflict(Uuid),

    /// Lookup by id/key failed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database failure.
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Anything else; fails the run and preserves partial data.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ScanError {
    /// Classifies a `verify_credentials` failure for the synchronous caller.
    #[must_use]
    pub fn from_verification(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Config(msg) => Self::Configuration(msg),
            ConnectorError::Auth(msg) => Self::Authentication(msg),
            other => Self::Unexpected(other.to_string()),
        }
    }
}

/// Renders a connector error as the phase-failure string recorded in the
/// scan log and echoed by checks that depend on the failed category.
#[must_use]
pub fn phase_error_label(err: &ConnectorError) -> String {
    match err {
        ConnectorError::Auth(msg) => format!("AuthenticationError: {msg}"),
        ConnectorError::Config(msg) => format!("ConfigurationError: {msg}"),
        ConnectorError::RateLimited { .. }
        | ConnectorError::Transient(_)
        | ConnectorError::RetriesExhausted { .. } => format!("TransientProviderError: {err}"),
        ConnectorError::Unsupported(msg) => format!("PhaseFailure: {msg}"),
        other => format!("ProviderError: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_keep_their_taxonomy_label() {
        let label = phase_error_label(&ConnectorError::Auth("insufficient scope".into()));
        assert_eq!(label, "AuthenticationError: insufficient scope");
    }

    #[test]
    fn retries_exhausted_is_transient() {
        let label = phase_error_label(&ConnectorError::RetriesExhausted {
            attempts: 4,
            last_error: "rate limited".into(),
        });
        assert!(label.starts_with("TransientProviderError:"));
    }

    #[test]
    fn verification_errors_classify() {
        assert!(matches!(
            ScanError::from_verification(ConnectorError::Auth("denied".into())),
            ScanError::Authentication(_)
        ));
        assert!(matches!(
            ScanError::from_verification(ConnectorError::Config("bad key".into())),
            ScanError::Configuration(_)
        ));
    }
}
