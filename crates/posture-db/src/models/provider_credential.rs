//! Stored provider credential configuration, one row per organization.
//!
//! The credential blob is persisted only after `verify_credentials()` has
//! accepted it; the service layer owns that ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Provider credential settings for an organization.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProviderCredential {
    pub org_id: Uuid,
    pub provider: String,
    /// Sanitized credential blob (service-account key JSON or client
    /// credential JSON depending on the provider).
    pub credential: String,
    /// Impersonated admin identity, where the provider requires delegation.
    pub admin_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderCredential {
    /// Insert or replace the credential for an organization.
    pub async fn upsert(
        pool: &PgPool,
        org_id: Uuid,
        provider: &str,
        credential: &str,
        admin_email: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO provider_credentials (org_id, provider, credential, admin_email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (org_id) DO UPDATE SET
                provider = EXCLUDED.provider,
                credential = EXCLUDED.credential,
                admin_email = EXCLUDED.admin_email,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(provider)
        .bind(credential)
        .bind(admin_email)
        .fetch_one(pool)
        .await
    }

    /// The stored credential for an organization, if configured.
    pub async fn find(pool: &PgPool, org_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM provider_credentials
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(pool)
        .await
    }
}
