//! Managed device mirror.

use chrono::{DateTime, Utc};
use posture_connector::DeviceRecord;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::UpsertCounts;

/// A mirrored managed/enrolled device.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ManagedDevice {
    pub id: Uuid,
    pub org_id: Uuid,
    pub device_id: String,
    pub device_type: String,
    pub model: Option<String>,
    pub os: Option<String>,
    pub approval_status: Option<String>,
    pub compromised_status: Option<String>,
    pub encryption_status: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub owner_email: Option<String>,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedDevice {
    /// Upsert one batch by (org, device id).
    pub async fn upsert_batch(
        pool: &PgPool,
        org_id: Uuid,
        records: &[DeviceRecord],
    ) -> Result<UpsertCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let before: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM managed_devices WHERE org_id = $1")
                .bind(org_id)
                .fetch_one(&mut *tx)
                .await?;

        for r in records {
            sqlx::query(
                r#"
                INSERT INTO managed_devices (
                    org_id, device_id, device_type, model, os, approval_status,
                    compromised_status, encryption_status, last_sync, owner_email
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (org_id, device_id) DO UPDATE SET
                    device_type = EXCLUDED.device_type,
                    model = EXCLUDED.model,
                    os = EXCLUDED.os,
                    approval_status = EXCLUDED.approval_status,
                    compromised_status = EXCLUDED.compromised_status,
                    encryption_status = EXCLUDED.encryption_status,
                    last_sync = EXCLUDED.last_sync,
                    owner_email = EXCLUDED.owner_email,
                    stale = FALSE,
                    updated_at = NOW()
                "#,
            )
            .bind(org_id)
            .bind(&r.device_id)
            .bind(&r.device_type)
            .bind(&r.model)
            .bind(&r.os)
            .bind(&r.approval_status)
            .bind(&r.compromised_status)
            .bind(&r.encryption_status)
            .bind(r.last_sync)
            .bind(&r.owner_email)
            .execute(&mut *tx)
            .await?;
        }

        let after: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM managed_devices WHERE org_id = $1")
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

    /// Explicit sweep for device ids absent from the latest full sync.
    pub async fn mark_stale_absent(
        pool: &PgPool,
        org_id: Uuid,
        seen_keys: &[String],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE managed_devices
            SET stale = TRUE, updated_at = NOW()
            WHERE org_id = $1 AND stale = FALSE AND NOT (device_id = ANY($2))
            "#,
        )
        .bind(org_id)
        .bind(seen_keys)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All devices for an organization.
    pub async fn list(pool: &PgPool, org_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM managed_devices
            WHERE org_id = $1
            ORDER BY device_id
            "#,
        )
        .bind(org_id)
        .fetch_all(pool)
        .await
    }
}
