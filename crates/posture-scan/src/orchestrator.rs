//! Scan orchestrator: sequences phases under the per-organization run lock.
//!
//! `start_scan` verifies the credential synchronously, claims the lock by
//! inserting the running scan-log row, then executes the pipeline on a
//! detached task. Phase failures are recorded and the scan continues; store
//! failures fail the run, keeping whatever partial data was already
//! upserted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, instrument};
use uuid::Uuid;

use posture_connector::DirectoryProvider;
use posture_db::models::ScanRun;

use crate::error::ScanError;
use crate::phase::run_phase;
use crate::rules;
use crate::store::SnapshotStore;

/// Drives one scan run from trigger to verdicts.
#[derive(Clone)]
pub struct ScanOrchestrator {
    store: Arc<dyn SnapshotStore>,
}

impl ScanOrchestrator {
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Triggers a scan for an organization.
    ///
    /// Verifies the credential, creates the running scan-log row (the
    /// per-organization lock) and spawns the pipeline. Returns the created
    /// run immediately; progress is observable through the scan log.
    ///
    /// # Errors
    ///
    /// `ScanError::Authentication`/`Configuration` when verification fails;
    /// `ScanError::RunConflict` when a scan is already running.
    #[instrument(skip(self, provider), fields(provider = provider.display_name()))]
    pub async fn start_scan(
        &self,
        org_id: Uuid,
        provider: Arc<dyn DirectoryProvider>,
        triggered_by: &str,
    ) -> Result<ScanRun, ScanError> {
        provider
            .verify_credentials()
            .await
            .map_err(ScanError::from_verification)?;

        let categories = provider.categories();
        let first = categories
            .first()
            .ok_or_else(|| ScanError::Unexpected("provider declares no sync categories".into()))?;
        let run = self
            .store
            .create_run(
                org_id,
                &provider.provider_type().to_string(),
                triggered_by,
                categories.len() as i32,
                first.as_str(),
            )
            .await?;

        info!(run_id = %run.id, total_phases = run.total_phases, "scan started");

        let orchestrator = self.clone();
        let spawned_run = run.clone();
        tokio::spawn(async move {
            // Failures are persisted to the scan log inside execute.
            let _ = orchestrator.execute(provider.as_ref(), &spawned_run).await;
        });

        Ok(run)
    }

    /// Runs the full pipeline for an already-created run: every phase in
    /// provider order, then the rule engine, then completion. Called on a
    /// detached task by `start_scan`; tests call it inline.
    pub async fn execute(
        &self,
        provider: &dyn DirectoryProvider,
        run: &ScanRun,
    ) -> Result<(), ScanError> {
        match self.run_pipeline(provider, run).await {
            Ok(()) => {
                info!(run_id = %run.id, "scan completed");
                Ok(())
            }
            Err(err) => {
                error!(run_id = %run.id, error = %err, "scan run failed");
                self.store.fail_run(run.id, &err.to_string()).await?;
                Err(err)
            }
        }
    }

    async fn run_pipeline(
        &self,
        provider: &dyn DirectoryProvider,
        run: &ScanRun,
    ) -> Result<(), ScanError> {
        let categories = provider.categories();
        let mut phase_errors = BTreeMap::new();

        for (index, category) in categories.iter().enumerate() {
            let outcome =
                run_phase(provider, self.store.as_ref(), run.org_id, *category).await?;
            if let Some(err) = &outcome.error {
                phase_errors.insert(*category, err.clone());
            }
            let next_phase = categories.get(index + 1).map(|c| c.as_str());
            let completed = i32::try_from(index + 1).unwrap_or(i32::MAX);
            self.store
                .advance_phase(run.id, completed, next_phase, &outcome)
                .await?;
        }

        let mut snapshot = self.store.load_snapshot(run.org_id).await?;
        snapshot.as_of = Some(run.started_at);
        snapshot.phase_errors = phase_errors;

        let checks = rules::run_checks(provider.provider_type(), &snapshot);
        self.store.insert_checks(run.id, run.org_id, &checks).await?;
        self.store.complete_run(run.id).await?;
        Ok(())
    }

    /// Watchdog sweep: fails running rows older than `max_age` so the
    /// per-organization lock is eventually released after a crash or hung
    /// provider. Returns the number of runs failed.
    pub async fn sweep_overdue(&self, max_age: Duration) -> Result<u64, ScanError> {
        let cutoff = Utc::now() - max_age;
        let failed = self.store.fail_overdue_runs(cutoff).await?;
        if failed > 0 {
            info!(failed, "watchdog failed overdue scan runs");
        }
        Ok(failed)
    }
}
