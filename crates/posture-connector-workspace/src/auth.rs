//! Service-account authentication with domain-wide delegation.
//!
//! Workspace admin APIs require a service account asserting a signed JWT
//! (RS256) with the impersonated admin in the `sub` claim, exchanged at the
//! token endpoint for a bearer token. Tokens are cached until shortly before
//! expiry.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use posture_connector::{ConnectorError, ConnectorResult};

use crate::config::WorkspaceConfig;
use crate::WORKSPACE_SCOPES;

/// OAuth2 token response from the Google token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// JWT claim set for the service-account assertion.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Cached bearer token.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Token cache for the Workspace provider.
pub struct TokenCache {
    config: WorkspaceConfig,
    http_client: reqwest::Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    /// Grace period before expiry that triggers a refresh.
    grace_period: Duration,
}

impl TokenCache {
    /// Creates a new token cache.
    #[must_use]
    pub fn new(config: WorkspaceConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
            grace_period: Duration::minutes(5),
        }
    }

    /// Gets a valid access token, refreshing if necessary.
    #[instrument(skip(self), fields(admin = %self.config.admin_email))]
    pub async fn get_token(&self) -> ConnectorResult<String> {
        {
            let cache = self.cached_token.read().await;
            if let Some(ref token) = *cache {
                if !token.is_expired(self.grace_period) {
                    debug!("Using cached token");
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("Refreshing access token");
        let new_token = self.acquire_token().await?;

        {
            let mut cache = self.cached_token.write().await;
            *cache = Some(new_token.clone());
        }

        Ok(new_token.access_token)
    }

    /// Signs a fresh assertion and exchanges it for a bearer token.
    #[instrument(skip(self))]
    async fn acquire_token(&self) -> ConnectorResult<CachedToken> {
        let now = Utc::now();
        let claims = AssertionClaims {
            iss: &self.config.key.client_email,
            sub: &self.config.admin_email,
            scope: WORKSPACE_SCOPES.join(" "),
            aud: &self.config.key.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };

        let encoding_key =
            EncodingKey::from_rsa_pem(self.config.key.private_key.expose_secret().as_bytes())
                .map_err(|e| {
                    ConnectorError::Config(format!("Invalid service account private key: {e}"))
                })?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| ConnectorError::Auth(format!("Failed to sign assertion: {e}")))?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.config.key.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| ConnectorError::Auth(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Auth(format!(
                "Token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::Auth(format!("Malformed token response: {e}")))?;

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }
}
