//! Microsoft Graph HTTP client with OData error handling and retries.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use posture_connector::{ConnectorError, ConnectorResult, RetryPolicy};

use crate::auth::TokenCache;

/// OData error response envelope.
#[derive(Debug, Deserialize)]
struct ODataError {
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    code: String,
    message: String,
}

/// Authenticated Graph client. Retries 429 (honoring `Retry-After`) and
/// 5xx with bounded exponential backoff; 401/403 map to `Auth`.
pub struct GraphClient {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    retry_policy: RetryPolicy,
}

impl GraphClient {
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

    /// GET returning the raw JSON body.
    #[instrument(skip(self))]
    pub async fn get_json(&self, url: &str) -> ConnectorResult<serde_json::Value> {
        let response = self.get_with_retry(url, false).await?;
        response.json().await.map_err(ConnectorError::from)
    }

    /// GET for `$count` endpoints, which return a bare number as text and
    /// require the eventual-consistency header.
    #[instrument(skip(self))]
    pub async fn get_count(&self, url: &str) -> ConnectorResult<i64> {
        let response = self.get_with_retry(url, true).await?;
        let text = response.text().await?;
        text.trim()
            .parse::<i64>()
            .map_err(|_| ConnectorError::Api {
                code: "count".to_string(),
                message: format!("Unexpected $count response: {text}"),
            })
    }

    async fn get_with_retry(
        &self,
        url: &str,
        eventual_consistency: bool,
    ) -> ConnectorResult<reqwest::Response> {
        let mut attempt = 0u32;

        loop {
            let token = self.token_cache.get_token().await?;

            let mut request = self.http_client.get(url).bearer_auth(&token);
            if eventual_consistency {
                request = request.header("ConsistencyLevel", "eventual");
            }
            let response = request.send().await?;
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
                warn!(attempt, ?delay, "Throttled by Graph, backing off");
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
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }
    }
}

/// Maps a terminal OData error onto the connector taxonomy.
fn classify_error(status: reqwest::StatusCode, body: &str) -> ConnectorError {
    if let Ok(parsed) = serde_json::from_str::<ODataError>(body) {
        // Unlicensed workloads (for example Intune) surface as not-found or
        // licence errors rather than authorization failures.
        if parsed.error.code == "ResourceNotFound"
            || parsed.error.message.to_lowercase().contains("license")
        {
            return ConnectorError::Unsupported(parsed.error.message);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return ConnectorError::Auth(format!(
                "{}: {}",
                parsed.error.code, parsed.error.message
            ));
        }
        return ConnectorError::Api {
            code: parsed.error.code,
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
    fn classifies_request_denied_as_auth() {
        let body =
            r#"{"error":{"code":"Authorization_RequestDenied","message":"Insufficient privileges"}}"#;
        let err = classify_error(reqwest::StatusCode::FORBIDDEN, body);
        assert!(err.is_auth());
    }

    #[test]
    fn classifies_unlicensed_as_unsupported() {
        let body = r#"{"error":{"code":"ResourceNotFound","message":"Resource not found"}}"#;
        let err = classify_error(reqwest::StatusCode::NOT_FOUND, body);
        assert!(matches!(err, ConnectorError::Unsupported(_)));
    }
}
