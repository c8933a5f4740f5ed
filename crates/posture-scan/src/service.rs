//! Service layer: the boundary contracts consumed by the API tier.
//!
//! Everything here is synchronous from the caller's point of view except the
//! scan body itself, which `trigger_scan` hands to the orchestrator's
//! detached task.

use std::sync::Arc;

use chrono::Duration;
use tracing::instrument;
use uuid::Uuid;

use posture_connector::{sanitize_credential_text, DirectoryProvider, ProviderType, SyncCategory};
use posture_connector_graph::{GraphConfig, GraphProvider};
use posture_connector_workspace::{WorkspaceConfig, WorkspaceProvider};
use posture_db::models::{ComplianceCheck, OrgUnit, ProviderCredential, ScanRun};

use crate::error::ScanError;
use crate::export::{export_csv, ExportTarget};
use crate::orchestrator::ScanOrchestrator;
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;

/// Workspace Admin SDK alias for "the customer the impersonated admin
/// belongs to"; avoids storing the numeric customer id separately.
const WORKSPACE_CUSTOMER_ALIAS: &str = "my_customer";

/// Application-facing entry points for scans, checks, credentials,
/// annotations and export.
#[derive(Clone)]
pub struct ScanService {
    store: Arc<dyn SnapshotStore>,
    orchestrator: ScanOrchestrator,
}

impl ScanService {
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        let orchestrator = ScanOrchestrator::new(Arc::clone(&store));
        Self {
            store,
            orchestrator,
        }
    }

    /// Starts a scan for an organization. Manual and scheduled triggers both
    /// land here, differing only in `actor`.
    ///
    /// # Errors
    ///
    /// `NotConfigured` when no credential is stored, `RunConflict` when a
    /// scan is already running, `Configuration`/`Authentication` when the
    /// stored credential no longer verifies.
    #[instrument(skip(self))]
    pub async fn trigger_scan(&self, org_id: Uuid, actor: &str) -> Result<ScanRun, ScanError> {
        let credential = self
            .store
            .find_credential(org_id)
            .await?
            .ok_or(ScanError::NotConfigured(org_id))?;
        let provider = build_provider(&credential)?;
        self.orchestrator.start_scan(org_id, provider, actor).await
    }

    /// The most recent run, any status.
    pub async fn scan_status(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError> {
        self.store.latest_run(org_id).await
    }

    /// The N most recent runs, newest first.
    pub async fn scan_history(&self, org_id: Uuid, limit: i64) -> Result<Vec<ScanRun>, ScanError> {
        self.store.recent_runs(org_id, limit).await
    }

    /// Checks of the latest completed run, ordered (category, check id).
    pub async fn latest_checks(&self, org_id: Uuid) -> Result<Vec<ComplianceCheck>, ScanError> {
        self.store.latest_completed_checks(org_id).await
    }

    /// Sanitizes, parses and verifies a credential payload, then persists it.
    /// Nothing is stored when verification fails.
    #[instrument(skip(self, raw_blob))]
    pub async fn configure_credentials(
        &self,
        org_id: Uuid,
        provider: ProviderType,
        raw_blob: &str,
        admin_email: Option<&str>,
    ) -> Result<(), ScanError> {
        let candidate = build_provider_from_parts(provider, raw_blob, admin_email)?;
        candidate
            .verify_credentials()
            .await
            .map_err(ScanError::from_verification)?;

        let clean = sanitize_credential_text(raw_blob);
        self.store
            .upsert_credential(org_id, &provider.to_string(), &clean, admin_email)
            .await
    }

    /// Writes operator annotations on one org unit. Scan-independent; the
    /// annotation fields are never touched by sync.
    pub async fn annotate_org_unit(
        &self,
        org_id: Uuid,
        path: &str,
        risk_tags: &[String],
        risk_notes: &str,
    ) -> Result<OrgUnit, ScanError> {
        self.store
            .set_org_unit_annotations(org_id, path, risk_tags, risk_notes)
            .await
    }

    /// Flags rows of one category absent from the supplied key set as stale.
    /// Explicit operator action; sync itself never marks or deletes anything.
    pub async fn sweep_absent(
        &self,
        org_id: Uuid,
        category: SyncCategory,
        seen_keys: &[String],
    ) -> Result<u64, ScanError> {
        self.store.mark_stale_absent(org_id, category, seen_keys).await
    }

    /// CSV projection of one entity collection or the latest check set.
    pub async fn export(&self, org_id: Uuid, target: ExportTarget) -> Result<String, ScanError> {
        // The check set is independent of the mirror; skip the snapshot load.
        if target == ExportTarget::Checks {
            let checks = self.store.latest_completed_checks(org_id).await?;
            return export_csv(&Snapshot::default(), &checks, target);
        }
        let snapshot = self.store.load_snapshot(org_id).await?;
        export_csv(&snapshot, &[], target)
    }

    /// Watchdog sweep; see `ScanOrchestrator::sweep_overdue`.
    pub async fn sweep_overdue(&self, max_age: Duration) -> Result<u64, ScanError> {
        self.orchestrator.sweep_overdue(max_age).await
    }
}

/// Builds a provider from the stored credential row.
fn build_provider(
    credential: &ProviderCredential,
) -> Result<Arc<dyn DirectoryProvider>, ScanError> {
    let provider_type: ProviderType = credential
        .provider
        .parse()
        .map_err(ScanError::Configuration)?;
    build_provider_from_parts(
        provider_type,
        &credential.credential,
        credential.admin_email.as_deref(),
    )
}

fn build_provider_from_parts(
    provider: ProviderType,
    raw_blob: &str,
    admin_email: Option<&str>,
) -> Result<Arc<dyn DirectoryProvider>, ScanError> {
    match provider {
        ProviderType::Workspace => {
            let admin = admin_email.ok_or_else(|| {
                ScanError::Configuration(
                    "Workspace requires an admin email for delegation".to_string(),
                )
            })?;
            let config =
                WorkspaceConfig::from_credential_json(raw_blob, WORKSPACE_CUSTOMER_ALIAS, admin)
                    .map_err(ScanError::from_verification)?;
            Ok(Arc::new(
                WorkspaceProvider::new(config).map_err(ScanError::from_verification)?,
            ))
        }
        ProviderType::Graph => {
            let config =
                GraphConfig::from_credential_json(raw_blob).map_err(ScanError::from_verification)?;
            Ok(Arc::new(
                GraphProvider::new(config).map_err(ScanError::from_verification)?,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_without_admin_email_is_configuration_error() {
        let err = build_provider_from_parts(ProviderType::Workspace, "{}", None)
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn graph_rejects_malformed_credential() {
        let err = build_provider_from_parts(ProviderType::Graph, "not json", None)
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::Configuration(_)));
    }
}
