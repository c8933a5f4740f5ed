//! Graph provider configuration.

use posture_connector::{sanitize_credential_text, ConnectorError, ConnectorResult};
use secrecy::SecretString;
use serde::Deserialize;

/// App registration credentials for the client-credentials flow.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

/// Configuration for the Graph provider.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub credentials: GraphCredentials,
    /// Graph API base URL (`https://graph.microsoft.com/v1.0`); overridable
    /// for tests.
    pub graph_base_url: String,
    /// Token endpoint base (`https://login.microsoftonline.com`).
    pub login_base_url: String,
}

impl GraphConfig {
    /// Parses a pasted credential blob of the form
    /// `{"tenant_id": ..., "client_id": ..., "client_secret": ...}`.
    /// The blob is sanitized before JSON parsing.
    ///
    /// # Errors
    ///
    /// `ConnectorError::Config` when the blob is malformed or fields are
    /// empty.
    pub fn from_credential_json(raw_blob: &str) -> ConnectorResult<Self> {
        let clean = sanitize_credential_text(raw_blob);
        let credentials: GraphCredentials = serde_json::from_str(&clean)
            .map_err(|e| ConnectorError::Config(format!("Invalid Graph credential: {e}")))?;

        if credentials.tenant_id.is_empty() || credentials.client_id.is_empty() {
            return Err(ConnectorError::Config(
                "Graph credential requires tenant_id and client_id".into(),
            ));
        }

        Ok(Self {
            credentials,
            graph_base_url: "https://graph.microsoft.com/v1.0".to_string(),
            login_base_url: "https://login.microsoftonline.com".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_credential_blob() {
        let blob = r#"{"tenant_id":"t-1","client_id":"c-1","client_secret":"s-1"}"#;
        let cfg = GraphConfig::from_credential_json(blob).unwrap();
        assert_eq!(cfg.credentials.tenant_id, "t-1");
        assert_eq!(cfg.graph_base_url, "https://graph.microsoft.com/v1.0");
    }

    #[test]
    fn sanitizes_smart_quotes() {
        let blob = "{\u{201C}tenant_id\u{201D}:\u{201C}t\u{201D},\u{201C}client_id\u{201D}:\u{201C}c\u{201D},\u{201C}client_secret\u{201D}:\u{201C}s\u{201D}}";
        assert!(GraphConfig::from_credential_json(blob).is_ok());
    }

    #[test]
    fn rejects_empty_tenant() {
        let blob = r#"{"tenant_id":"","client_id":"c","client_secret":"s"}"#;
        assert!(matches!(
            GraphConfig::from_credential_json(blob),
            Err(ConnectorError::Config(_))
        ));
    }
}
