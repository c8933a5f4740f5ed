//! Third-party OAuth grant mirror.

use chrono::{DateTime, Utc};
use posture_connector::GrantRecord;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::UpsertCounts;

/// A mirrored OAuth grant, aggregated per client application.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OAuthGrant {
    pub id: Uuid,
    pub org_id: Uuid,
    pub client_id: String,
    pub display_text: String,
    pub scopes: Vec<String>,
    pub user_count: i64,
    pub verified: bool,
    /// HIGH / MEDIUM / LOW, computed from scopes at mapping time.
    pub risk_level: String,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthGrant {
    /// Upsert one batch by (org, client id).
    pub async fn upsert_batch(
        pool: &PgPool,
        org_id: Uuid,
        records: &[GrantRecord],
    ) -> Result<UpsertCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oauth_grants WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&mut *tx)
            .await?;

        for r in records {
            sqlx::query(
                r#"
                INSERT INTO oauth_grants (
                    org_id, client_id, display_text, scopes, user_count, verified, risk_level
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (org_id, client_id) DO UPDATE SET
                    display_text = EXCLUDED.display_text,
                    scopes = EXCLUDED.scopes,
                    user_count = EXCLUDED.user_count,
                    verified = EXCLUDED.verified,
                    risk_level = EXCLUDED.risk_level,
                    stale = FALSE,
                    updated_at = NOW()
                "#,
            )
            .bind(org_id)
            .bind(&r.client_id)
            .bind(&r.display_text)
            .bind(&r.scopes)
            .bind(r.user_count)
            .bind(r.verified)
            .bind(r.risk_level.to_string())
            .execute(&mut *tx)
            .await?;
        }

        let after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oauth_grants WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        let inserted = u64::try_from(after - before).unwrap_or(0);
        Ok(UpsertCounts {
            inserted,
            updated: (records.len() as u64).saturating_sub(inserted),
        })
    }

    /// Explicit sweep for client ids absent from the latest full sync.
    pub async fn mark_stale_absent(
        pool: &PgPool,
        org_id: Uuid,
        seen_keys: &[String],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_grants
            SET stale = TRUE, updated_at = NOW()
            WHERE org_id = $1 AND stale = FALSE AND NOT (client_id = ANY($2))
            "#,
        )
        .bind(org_id)
        .bind(seen_keys)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All grants for an organization.
    pub async fn list(pool: &PgPool, org_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM oauth_grants
            WHERE org_id = $1
            ORDER BY client_id
            "#,
        )
        .bind(org_id)
        .fetch_all(pool)
        .await
    }
}
