//! OAuth2 client-credentials authentication for Microsoft Graph.

use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use posture_connector::{ConnectorError, ConnectorResult};

use crate::config::GraphConfig;

/// Token response from the Microsoft identity platform.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
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

/// Token cache for the Graph provider.
pub struct TokenCache {
    config: GraphConfig,
    http_client: reqwest::Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
    grace_period: Duration,
}

impl TokenCache {
    /// Creates a new token cache.
    #[must_use]
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
            grace_period: Duration::minutes(5),
        }
    }

    /// Gets a valid access token, refreshing if necessary.
    #[instrument(skip(self), fields(tenant = %self.config.credentials.tenant_id))]
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

    async fn acquire_token(&self) -> ConnectorResult<CachedToken> {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.login_base_url, self.config.credentials.tenant_id
        );
        // Scope is derived from the Graph host so sovereign clouds keep
        // working when the base URL is overridden.
        let scope = format!(
            "{}/.default",
            self.config
                .graph_base_url
                .trim_end_matches("/v1.0")
                .trim_end_matches('/')
        );

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", &self.config.credentials.client_id),
            (
                "client_secret",
                self.config.credentials.client_secret.expose_secret(),
            ),
            ("scope", &scope),
        ];

        let now = Utc::now();
        let response = self
            .http_client
            .post(&token_url)
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
