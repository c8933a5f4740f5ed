//! Authenticated HTTP client for Google admin APIs with retry handling.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use posture_connector::{ConnectorError, ConnectorResult, RetryPolicy};

use crate::auth::TokenCache;

/// Error envelope returned by Google APIs.
#[derive(Debug, Deserialize)]
struct GoogleError {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    errors: Vec<GoogleErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    reason: String,
}

/// HTTP client for Admin SDK, Groups Settings and Alert Center endpoints.
///
/// One retry budget per request: 429 honors `Retry-After`, 5xx backs off
/// exponentially, both bounded by the policy. 401/403 are terminal and are
/// mapped to `Auth` (or `Unsupported` when the API is disabled for the
/// tenant).
pub struct AdminClient {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    retry_policy: RetryPolicy,
}

impl AdminClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Config` if the HTTP client cannot be built.
    pub fn new(token_cache: Arc<TokenCache>) -> ConnectorResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConnectorError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            token_cache,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Performs a GET request, returning the raw JSON body.
    #[instrument(skip(self))]
    pub async fn get_json(&self, url: &str) -> ConnectorResult<serde_json::Value> {
        let mut attempt = 0u32;

        loop {
            let token = self.token_cache.get_token().await?;

            let response = self
                .http_client
                .get(url)
                .bearer_auth(&token)
                .send()
                .await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                if !self.retry_policy.should_retry(attempt) {
                    return Err(ConnectorError::RetriesExhausted {
                        attempts: attempt,
                        last_error: "rate limited".to_string(),
                    });
                }
                let delay = self.retry_policy.delay_for(attempt, retry_after);
                warn!(attempt, ?delay, "Rate limited, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if matches!(
                status,
                reqwest::StatusCode::BAD_GATEWAY
                    | reqwest::StatusCode::SERVICE_UNAVAILABLE
                    | reqwest::StatusCode::GATEWAY_TIMEOUT
            ) {
                if !self.retry_policy.should_retry(attempt) {
                    return Err(ConnectorError::RetriesExhausted {
                        attempts: attempt,
                        last_error: format!("transient error {status}"),
                    });
                }
                let delay = self.retry_policy.delay_for(attempt, None);
                warn!(%status, attempt, ?delay, "Transient error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if status.is_success() {
                return response.json().await.map_err(ConnectorError::from);
            }

            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }
    }
}

/// Maps a terminal Google error response onto the connector taxonomy.
fn classify_error(status: reqwest::StatusCode, body: &str) -> ConnectorError {
    if let Ok(parsed) = serde_json::from_str::<GoogleError>(body) {
        let disabled = parsed.error.errors.iter().any(|d| {
            matches!(
                d.reason.as_str(),
                "accessNotConfigured" | "SERVICE_DISABLED" | "notFound"
            )
        });
        if disabled {
            return ConnectorError::Unsupported(parsed.error.message);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return ConnectorError::Auth(parsed.error.message);
        }
        return ConnectorError::Api {
            code: parsed.error.code.to_string(),
            message: parsed.error.message,
        };
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return ConnectorError::Auth(format!("{status}: {body}"));
    }

    ConnectorError::Api {
        code: status.to_string(),
        message: body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_disabled_api_as_unsupported() {
        let body = r#"{"error":{"code":403,"message":"Access Not Configured",
            "errors":[{"reason":"accessNotConfigured"}]}}"#;
        let err = classify_error(reqwest::StatusCode::FORBIDDEN, body);
        assert!(matches!(err, ConnectorError::Unsupported(_)));
    }

    #[test]
    fn classifies_forbidden_as_auth() {
        let body = r#"{"error":{"code":403,"message":"Not Authorized to access this resource",
            "errors":[{"reason":"forbidden"}]}}"#;
        let err = classify_error(reqwest::StatusCode::FORBIDDEN, body);
        assert!(err.is_auth());
    }

    #[test]
    fn unparsable_body_still_maps_auth_status() {
        let err = classify_error(reqwest::StatusCode::UNAUTHORIZED, "nope");
        assert!(err.is_auth());
    }
}
