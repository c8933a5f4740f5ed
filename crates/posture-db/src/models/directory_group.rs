//! Directory group mirror.

use chrono::{DateTime, Utc};
use posture_connector::GroupRecord;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::UpsertCounts;

/// A mirrored directory group.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DirectoryGroup {
    pub id: Uuid,
    pub org_id: Uuid,
    pub group_key: String,
    pub display_name: String,
    pub member_count: i64,
    pub allow_external_members: bool,
    pub who_can_join: Option<String>,
    pub who_can_post: Option<String>,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DirectoryGroup {
    /// Upsert one batch by (org, group key).
    pub async fn upsert_batch(
        pool: &PgPool,
        org_id: Uuid,
        records: &[GroupRecord],
    ) -> Result<UpsertCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let before: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM directory_groups WHERE org_id = $1")
                .bind(org_id)
                .fetch_one(&mut *tx)
                .await?;

        for r in records {
            sqlx::query(
                r#"
                INSERT INTO directory_groups (
                    org_id, group_key, display_name, member_count,
                    allow_external_members, who_can_join, who_can_post
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (org_id, group_key) DO UPDATE SET
                    display_name = EXCLUDED.display_name,
                    member_count = EXCLUDED.member_count,
                    allow_external_members = EXCLUDED.allow_external_members,
                    who_can_join = EXCLUDED.who_can_join,
                    who_can_post = EXCLUDED.who_can_post,
                    stale = FALSE,
                    updated_at = NOW()
                "#,
            )
            .bind(org_id)
            .bind(&r.group_key)
            .bind(&r.display_name)
            .bind(r.member_count)
            .bind(r.allow_external_members)
            .bind(&r.who_can_join)
            .bind(&r.who_can_post)
            .execute(&mut *tx)
            .await?;
        }

        let after: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM directory_groups WHERE org_id = $1")
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

    /// Explicit sweep for keys absent from the latest full sync.
    pub async fn mark_stale_absent(
        pool: &PgPool,
        org_id: Uuid,
        seen_keys: &[String],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE directory_groups
            SET stale = TRUE, updated_at = NOW()
            WHERE org_id = $1 AND stale = FALSE AND NOT (group_key = ANY($2))
            "#,
        )
        .bind(org_id)
        .bind(seen_keys)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All groups for an organization.
    pub async fn list(pool: &PgPool, org_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM directory_groups
            WHERE org_id = $1
            ORDER BY group_key
            "#,
        )
        .bind(org_id)
        .fetch_all(pool)
        .await
    }
}
