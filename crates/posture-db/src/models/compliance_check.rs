//! Compliance check results, append-only per scan run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

/// Verdict status of one compliance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warning,
    /// The check's own evaluation failed (for example its source phase did
    /// not sync); recorded, never dropped.
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Unknown check status: {s}")),
        }
    }
}

/// A persisted compliance check verdict.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ComplianceCheck {
    pub id: Uuid,
    pub scan_run_id: Uuid,
    pub org_id: Uuid,
    pub check_id: String,
    pub category: String,
    pub title: String,
    pub status: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting one check verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComplianceCheck {
    pub check_id: String,
    pub category: String,
    pub title: String,
    pub status: CheckStatus,
    pub details: String,
}

impl ComplianceCheck {
    /// Get the status enum.
    #[must_use]
    pub fn status(&self) -> CheckStatus {
        self.status.parse().unwrap_or(CheckStatus::Error)
    }

    /// Insert all verdicts for one scan run in a single transaction.
    pub async fn insert_for_run(
        pool: &PgPool,
        scan_run_id: Uuid,
        org_id: Uuid,
        checks: &[NewComplianceCheck],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        for c in checks {
            sqlx::query(
                r#"
                INSERT INTO compliance_checks (
                    scan_run_id, org_id, check_id, category, title, status, details
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(scan_run_id)
            .bind(org_id)
            .bind(&c.check_id)
            .bind(&c.category)
            .bind(&c.title)
            .bind(c.status.to_string())
            .bind(&c.details)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Verdicts for one run, ordered by (category, check id).
    pub async fn list_for_run(pool: &PgPool, scan_run_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM compliance_checks
            WHERE scan_run_id = $1
            ORDER BY category, check_id
            "#,
        )
        .bind(scan_run_id)
        .fetch_all(pool)
        .await
    }

    /// Verdicts of the most recent completed run for an organization.
    pub async fn list_latest_completed(
        pool: &PgPool,
        org_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT c.* FROM compliance_checks c
            JOIN scan_runs r ON r.id = c.scan_run_id
            WHERE r.org_id = $1
              AND r.id = (
                  SELECT id FROM scan_runs
                  WHERE org_id = $1 AND status = 'completed'
                  ORDER BY started_at DESC
                  LIMIT 1
              )
            ORDER BY c.category, c.check_id
            "#,
        )
        .bind(org_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_status_round_trips() {
        for s in [
            CheckStatus::Pass,
            CheckStatus::Fail,
            CheckStatus::Warning,
            CheckStatus::Error,
        ] {
            assert_eq!(s.to_string().parse::<CheckStatus>().unwrap(), s);
        }
    }
}
