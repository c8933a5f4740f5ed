//! Organizational unit mirror with operator-owned annotations.
//!
//! `risk_tags` and `risk_notes` belong to operators, not to sync: the upsert
//! column list deliberately excludes them, so they survive every scan. They
//! change only through `set_annotations`.

use chrono::{DateTime, Utc};
use posture_connector::OrgUnitRecord;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::UpsertCounts;

/// A mirrored organizational unit.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgUnit {
    pub id: Uuid,
    pub org_id: Uuid,
    pub path: String,
    pub name: String,
    pub user_count: i64,
    pub risk_tags: Vec<String>,
    pub risk_notes: String,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrgUnit {
    /// Upsert one batch by (org, path). Annotation fields are untouched.
    pub async fn upsert_batch(
        pool: &PgPool,
        org_id: Uuid,
        records: &[OrgUnitRecord],
    ) -> Result<UpsertCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM org_units WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&mut *tx)
            .await?;

        for r in records {
            sqlx::query(
                r#"
                INSERT INTO org_units (org_id, path, name, user_count)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (org_id, path) DO UPDATE SET
                    name = EXCLUDED.name,
                    user_count = EXCLUDED.user_count,
                    stale = FALSE,
                    updated_at = NOW()
                "#,
            )
            .bind(org_id)
            .bind(&r.path)
            .bind(&r.name)
            .bind(r.user_count)
            .execute(&mut *tx)
            .await?;
        }

        let after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM org_units WHERE org_id = $1")
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

    /// Replace the operator annotations on one org unit.
    pub async fn set_annotations(
        pool: &PgPool,
        org_id: Uuid,
        path: &str,
        risk_tags: &[String],
        risk_notes: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE org_units
            SET risk_tags = $3, risk_notes = $4, updated_at = NOW()
            WHERE org_id = $1 AND path = $2
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(path)
        .bind(risk_tags)
        .bind(risk_notes)
        .fetch_optional(pool)
        .await
    }

    /// Explicit sweep for paths absent from the latest full sync.
    pub async fn mark_stale_absent(
        pool: &PgPool,
        org_id: Uuid,
        seen_keys: &[String],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE org_units
            SET stale = TRUE, updated_at = NOW()
            WHERE org_id = $1 AND stale = FALSE AND NOT (path = ANY($2))
            "#,
        )
        .bind(org_id)
        .bind(seen_keys)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All org units for an organization.
    pub async fn list(pool: &PgPool, org_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM org_units
            WHERE org_id = $1
            ORDER BY path
            "#,
        )
        .bind(org_id)
        .fetch_all(pool)
        .await
    }
}
