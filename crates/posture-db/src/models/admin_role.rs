//! Admin role and role assignment mirrors.

use chrono::{DateTime, Utc};
use posture_connector::RoleRecord;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::UpsertCounts;

/// A mirrored administrative role.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AdminRole {
    pub id: Uuid,
    pub org_id: Uuid,
    pub role_id: String,
    pub name: String,
    pub is_super_admin: bool,
    pub is_system_role: bool,
    pub privileges: Vec<String>,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One assignment of a role to an assignee, customer-wide or org-unit scoped.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoleAssignment {
    pub id: Uuid,
    pub org_id: Uuid,
    pub assignment_id: String,
    pub role_id: String,
    pub assignee: String,
    pub scope_org_unit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdminRole {
    /// Upsert one batch of roles and their assignments by natural key.
    pub async fn upsert_batch(
        pool: &PgPool,
        org_id: Uuid,
        records: &[RoleRecord],
    ) -> Result<UpsertCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_roles WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&mut *tx)
            .await?;

        for r in records {
            sqlx::query(
                r#"
                INSERT INTO admin_roles (
                    org_id, role_id, name, is_super_admin, is_system_role, privileges
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (org_id, role_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    is_super_admin = EXCLUDED.is_super_admin,
                    is_system_role = EXCLUDED.is_system_role,
                    privileges = EXCLUDED.privileges,
                    stale = FALSE,
                    updated_at = NOW()
                "#,
            )
            .bind(org_id)
            .bind(&r.role_id)
            .bind(&r.name)
            .bind(r.is_super_admin)
            .bind(r.is_system_role)
            .bind(&r.privileges)
            .execute(&mut *tx)
            .await?;

            for a in &r.assignments {
                sqlx::query(
                    r#"
                    INSERT INTO role_assignments (
                        org_id, assignment_id, role_id, assignee, scope_org_unit
                    )
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (org_id, assignment_id) DO UPDATE SET
                        role_id = EXCLUDED.role_id,
                        assignee = EXCLUDED.assignee,
                        scope_org_unit = EXCLUDED.scope_org_unit,
                        updated_at = NOW()
                    "#,
                )
                .bind(org_id)
                .bind(&a.assignment_id)
                .bind(&r.role_id)
                .bind(&a.assignee)
                .bind(&a.scope_org_unit)
                .execute(&mut *tx)
                .await?;
            }
        }

        let after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_roles WHERE org_id = $1")
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

    /// Explicit sweep for role ids absent from the latest full sync.
    pub async fn mark_stale_absent(
        pool: &PgPool,
        org_id: Uuid,
        seen_keys: &[String],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE admin_roles
            SET stale = TRUE, updated_at = NOW()
            WHERE org_id = $1 AND stale = FALSE AND NOT (role_id = ANY($2))
            "#,
        )
        .bind(org_id)
        .bind(seen_keys)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All roles for an organization.
    pub async fn list(pool: &PgPool, org_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM admin_roles
            WHERE org_id = $1
            ORDER BY role_id
            "#,
        )
        .bind(org_id)
        .fetch_all(pool)
        .await
    }
}

impl RoleAssignment {
    /// All assignments for an organization.
    pub async fn list(pool: &PgPool, org_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM role_assignments
            WHERE org_id = $1
            ORDER BY assignment_id
            "#,
        )
        .bind(org_id)
        .fetch_all(pool)
        .await
    }
}
