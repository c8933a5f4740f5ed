//! Directory account mirror.
//!
//! Accounts are never deleted by sync: suspension is a flag from the
//! provider, and an account absent from a full listing can only be flagged
//! `stale` by the explicit sweep operation. Identity history is preserved.

use chrono::{DateTime, Utc};
use posture_connector::AccountRecord;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::UpsertCounts;

/// A mirrored directory user account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DirectoryAccount {
    pub id: Uuid,
    pub org_id: Uuid,
    pub primary_email: String,
    pub display_name: String,
    pub is_admin: bool,
    pub is_delegated_admin: bool,
    pub suspended: bool,
    pub archived: bool,
    pub two_sv_enrolled: bool,
    pub two_sv_enforced: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub org_unit_path: Option<String>,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DirectoryAccount {
    /// Upsert one batch by natural key (org, primary email), one transaction
    /// per batch. Returns inserted/updated counts.
    pub async fn upsert_batch(
        pool: &PgPool,
        org_id: Uuid,
        records: &[AccountRecord],
    ) -> Result<UpsertCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let before: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM directory_accounts WHERE org_id = $1")
                .bind(org_id)
                .fetch_one(&mut *tx)
                .await?;

        for r in records {
            sqlx::query(
                r#"
                INSERT INTO directory_accounts (
                    org_id, primary_email, display_name, is_admin, is_delegated_admin,
                    suspended, archived, two_sv_enrolled, two_sv_enforced,
                    last_login, org_unit_path
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (org_id, primary_email) DO UPDATE SET
                    display_name = EXCLUDED.display_name,
                    is_admin = EXCLUDED.is_admin,
                    is_delegated_admin = EXCLUDED.is_delegated_admin,
                    suspended = EXCLUDED.suspended,
                    archived = EXCLUDED.archived,
                    two_sv_enrolled = EXCLUDED.two_sv_enrolled,
                    two_sv_enforced = EXCLUDED.two_sv_enforced,
                    last_login = EXCLUDED.last_login,
                    org_unit_path = EXCLUDED.org_unit_path,
                    stale = FALSE,
                    updated_at = NOW()
                "#,
            )
            .bind(org_id)
            .bind(&r.primary_email)
            .bind(&r.display_name)
            .bind(r.is_admin)
            .bind(r.is_delegated_admin)
            .bind(r.suspended)
            .bind(r.archived)
            .bind(r.two_sv_enrolled)
            .bind(r.two_sv_enforced)
            .bind(r.last_login)
            .bind(&r.org_unit_path)
            .execute(&mut *tx)
            .await?;
        }

        let after: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM directory_accounts WHERE org_id = $1")
                .bind(org_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        // Only one scan per organization runs at a time, so the count delta
        // is exactly the number of inserts in this batch.
        let inserted = u64::try_from(after - before).unwrap_or(0);
        Ok(UpsertCounts {
            inserted,
            updated: (records.len() as u64).saturating_sub(inserted),
        })
    }

    /// Explicit sweep: flag rows whose natural key was absent from the most
    /// recent full sync. Never deletes.
    pub async fn mark_stale_absent(
        pool: &PgPool,
        org_id: Uuid,
        seen_keys: &[String],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE directory_accounts
            SET stale = TRUE, updated_at = NOW()
            WHERE org_id = $1 AND stale = FALSE AND NOT (primary_email = ANY($2))
            "#,
        )
        .bind(org_id)
        .bind(seen_keys)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All accounts for an organization, ordered by natural key.
    pub async fn list(pool: &PgPool, org_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM directory_accounts
            WHERE org_id = $1
            ORDER BY primary_email
            "#,
        )
        .bind(org_id)
        .fetch_all(pool)
        .await
    }
}
