//! Security alert mirror.
//!
//! The alert description is a loosely structured payload preserved as JSONB;
//! flattening for display happens in the connector's `AlertDetail`, never in
//! the rule engine.

use chrono::{DateTime, Utc};
use posture_connector::AlertRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use super::UpsertCounts;

/// A mirrored provider security alert.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub org_id: Uuid,
    pub alert_id: String,
    pub alert_type: String,
    pub source: String,
    pub severity: String,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub detail: Option<JsonValue>,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecurityAlert {
    /// Upsert one batch by (org, alert id).
    pub async fn upsert_batch(
        pool: &PgPool,
        org_id: Uuid,
        records: &[AlertRecord],
    ) -> Result<UpsertCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let before: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM security_alerts WHERE org_id = $1")
                .bind(org_id)
                .fetch_one(&mut *tx)
                .await?;

        for r in records {
            let detail = r
                .detail
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .unwrap_or(None);
            sqlx::query(
                r#"
                INSERT INTO security_alerts (
                    org_id, alert_id, alert_type, source, severity, status,
                    start_time, end_time, detail
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (org_id, alert_id) DO UPDATE SET
                    alert_type = EXCLUDED.alert_type,
                    source = EXCLUDED.source,
                    severity = EXCLUDED.severity,
                    status = EXCLUDED.status,
                    start_time = EXCLUDED.start_time,
                    end_time = EXCLUDED.end_time,
                    detail = EXCLUDED.detail,
                    stale = FALSE,
                    updated_at = NOW()
                "#,
            )
            .bind(org_id)
            .bind(&r.alert_id)
            .bind(&r.alert_type)
            .bind(&r.source)
            .bind(r.severity.to_string())
            .bind(&r.status)
            .bind(r.start_time)
            .bind(r.end_time)
            .bind(detail)
            .execute(&mut *tx)
            .await?;
        }

        let after: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM security_alerts WHERE org_id = $1")
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

    /// Explicit sweep for alert ids absent from the latest full sync.
    pub async fn mark_stale_absent(
        pool: &PgPool,
        org_id: Uuid,
        seen_keys: &[String],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE security_alerts
            SET stale = TRUE, updated_at = NOW()
            WHERE org_id = $1 AND stale = FALSE AND NOT (alert_id = ANY($2))
            "#,
        )
        .bind(org_id)
        .bind(seen_keys)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All alerts for an organization.
    pub async fn list(pool: &PgPool, org_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM security_alerts
            WHERE org_id = $1
            ORDER BY alert_id
            "#,
        )
        .bind(org_id)
        .fetch_all(pool)
        .await
    }
}
