//! Scan run model — the durable scan log.
//!
//! One row per scan run, append-only. The partial unique index
//! `ux_scan_runs_running` enforces at most one running scan per organization,
//! so mutual exclusion survives process restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

/// Status of a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Scan is currently executing.
    Running,
    /// All phases finished and checks were recorded.
    Completed,
    /// An unexpected error (or the watchdog) terminated the run.
    Failed,
}

impl ScanStatus {
    /// Check if this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown scan status: {s}")),
        }
    }
}

/// A scan run record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanRun {
    pub id: Uuid,
    pub org_id: Uuid,
    pub provider: String,
    pub status: String,
    pub phase: Option<String>,
    pub completed_phases: i32,
    pub total_phases: i32,
    pub triggered_by: String,
    pub phase_outcomes: JsonValue,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanRun {
    /// Get the status enum.
    #[must_use]
    pub fn status(&self) -> ScanStatus {
        self.status.parse().unwrap_or(ScanStatus::Failed)
    }

    /// Create a new running scan run.
    ///
    /// Fails with a unique-violation error if a running row already exists
    /// for the organization; callers map that to a conflict error.
    pub async fn create(
        pool: &PgPool,
        org_id: Uuid,
        provider: &str,
        triggered_by: &str,
        total_phases: i32,
        first_phase: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO scan_runs (org_id, provider, status, phase, total_phases, triggered_by)
            VALUES ($1, $2, 'running', $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(provider)
        .bind(first_phase)
        .bind(total_phases)
        .bind(triggered_by)
        .fetch_one(pool)
        .await
    }

    /// Find the running scan for an organization, if any.
    pub async fn find_running(pool: &PgPool, org_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM scan_runs
            WHERE org_id = $1 AND status = 'running'
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .fetch_optional(pool)
        .await
    }

    /// Most recent run for an organization, any status.
    pub async fn find_latest(pool: &PgPool, org_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM scan_runs
            WHERE org_id = $1
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .fetch_optional(pool)
        .await
    }

    /// Most recent completed run for an organization.
    pub async fn find_latest_completed(
        pool: &PgPool,
        org_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM scan_runs
            WHERE org_id = $1 AND status = 'completed'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .fetch_optional(pool)
        .await
    }

    /// The N most recent runs, newest first.
    pub async fn list_recent(
        pool: &PgPool,
        org_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM scan_runs
            WHERE org_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Record a finished phase: bump the counter, move to the next phase name
    /// and append the outcome. Persisted immediately so a crash mid-scan
    /// leaves an accurate "got to phase K of N" record.
    pub async fn advance_phase(
        pool: &PgPool,
        id: Uuid,
        completed_phases: i32,
        next_phase: Option<&str>,
        outcome: &JsonValue,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE scan_runs
            SET completed_phases = $2,
                phase = COALESCE($3, phase),
                phase_outcomes = phase_outcomes || $4::jsonb,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(completed_phases)
        .bind(next_phase)
        .bind(outcome)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Transition to completed.
    pub async fn mark_completed(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE scan_runs
            SET status = 'completed', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Transition to failed, preserving whatever partial data was written.
    pub async fn mark_failed(pool: &PgPool, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE scan_runs
            SET status = 'failed', error_message = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Watchdog: fail running rows older than the cutoff so the per-org
    /// exclusion lock is eventually released after a provider outage or
    /// process crash. Returns the number of rows failed.
    pub async fn fail_overdue(
        pool: &PgPool,
        older_than: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE scan_runs
            SET status = 'failed',
                error_message = 'scan timed out',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running' AND started_at < $1
            "#,
        )
        .bind(older_than)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [ScanStatus::Running, ScanStatus::Completed, ScanStatus::Failed] {
            assert_eq!(s.to_string().parse::<ScanStatus>().unwrap(), s);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ScanStatus::Running.is_terminal());
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
    }
}
