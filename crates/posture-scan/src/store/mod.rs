//! Snapshot store boundary.
//!
//! The only shared mutable resource in the pipeline. `PgSnapshotStore` is the
//! production implementation over the posture-db models; the in-memory
//! implementation backs the test suite.

mod memory;
mod pg;

pub use memory::InMemorySnapshotStore;
pub use pg::PgSnapshotStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use posture_connector::{DirectoryRecord, SyncCategory};
use posture_db::models::{
    ComplianceCheck, NewComplianceCheck, OrgUnit, ProviderCredential, ScanRun, UpsertCounts,
};

use crate::error::ScanError;
use crate::phase::PhaseOutcome;
use crate::snapshot::Snapshot;

/// Persistence boundary for the scan pipeline.
///
/// Upserts are natural-key, last-writer-wins per organization; at most one
/// running scan per organization may exist (`create_run` enforces it).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Creates a running scan-log row.
    ///
    /// # Errors
    ///
    /// `ScanError::RunConflict` when a running row already exists for the
    /// organization.
    async fn create_run(
        &self,
        org_id: Uuid,
        provider: &str,
        triggered_by: &str,
        total_phases: i32,
        first_phase: &str,
    ) -> Result<ScanRun, ScanError>;

    async fn find_running(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError>;

    async fn latest_run(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError>;

    async fn latest_completed_run(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError>;

    async fn recent_runs(&self, org_id: Uuid, limit: i64) -> Result<Vec<ScanRun>, ScanError>;

    /// Persists one finished phase: counter, next phase name, outcome.
    async fn advance_phase(
        &self,
        run_id: Uuid,
        completed_phases: i32,
        next_phase: Option<&str>,
        outcome: &PhaseOutcome,
    ) -> Result<(), ScanError>;

    async fn complete_run(&self, run_id: Uuid) -> Result<(), ScanError>;

    async fn fail_run(&self, run_id: Uuid, error: &str) -> Result<(), ScanError>;

    /// Watchdog sweep: fails running rows started before the cutoff.
    async fn fail_overdue_runs(&self, cutoff: DateTime<Utc>) -> Result<u64, ScanError>;

    /// Natural-key upsert of one batch of records for a category.
    async fn upsert_records(
        &self,
        org_id: Uuid,
        category: SyncCategory,
        records: &[DirectoryRecord],
    ) -> Result<UpsertCounts, ScanError>;

    /// Explicit absence sweep: flags `category` rows whose natural key is
    /// missing from `seen_keys` as stale. Never deletes, and the scan
    /// pipeline itself never calls it. Returns the number of newly flagged
    /// rows.
    async fn mark_stale_absent(
        &self,
        org_id: Uuid,
        category: SyncCategory,
        seen_keys: &[String],
    ) -> Result<u64, ScanError>;

    /// Loads the current-state mirror for the rule engine and export.
    async fn load_snapshot(&self, org_id: Uuid) -> Result<Snapshot, ScanError>;

    async fn insert_checks(
        &self,
        run_id: Uuid,
        org_id: Uuid,
        checks: &[NewComplianceCheck],
    ) -> Result<(), ScanError>;

    async fn checks_for_run(&self, run_id: Uuid) -> Result<Vec<ComplianceCheck>, ScanError>;

    /// Checks of the most recent completed run, ordered (category, check id).
    async fn latest_completed_checks(
        &self,
        org_id: Uuid,
    ) -> Result<Vec<ComplianceCheck>, ScanError>;

    /// Replaces operator annotations on one org unit.
    ///
    /// # Errors
    ///
    /// `ScanError::NotFound` when the path is not mirrored.
    async fn set_org_unit_annotations(
        &self,
        org_id: Uuid,
        path: &str,
        risk_tags: &[String],
        risk_notes: &str,
    ) -> Result<OrgUnit, ScanError>;

    async fn upsert_credential(
        &self,
        org_id: Uuid,
        provider: &str,
        credential: &str,
        admin_email: Option<&str>,
    ) -> Result<(), ScanError>;

    async fn find_credential(&self, org_id: Uuid) -> Result<Option<ProviderCredential>, ScanError>;
}
