//! Postgres-backed snapshot store over the posture-db models.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use posture_connector::{
    AccountRecord, AlertRecord, DeviceRecord, DirectoryRecord, GrantRecord, GroupRecord,
    OrgUnitRecord, RoleRecord, SyncCategory,
};
use posture_db::models::{
    AdminRole, ComplianceCheck, DirectoryAccount, DirectoryGroup, ManagedDevice,
    NewComplianceCheck, OAuthGrant, OrgUnit, ProviderCredential, RoleAssignment, ScanRun,
    SecurityAlert, UpsertCounts,
};

use crate::error::ScanError;
use crate::phase::PhaseOutcome;
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;

/// Production snapshot store backed by the relational mirror.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn create_run(
        &self,
        org_id: Uuid,
        provider: &str,
        triggered_by: &str,
        total_phases: i32,
        first_phase: &str,
    ) -> Result<ScanRun, ScanError> {
        match ScanRun::create(
            &self.pool,
            org_id,
            provider,
            triggered_by,
            total_phases,
            first_phase,
        )
        .await
        {
            Ok(run) => Ok(run),
            // The partial unique index on running rows is the per-org lock.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ScanError::RunConflict(org_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_running(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError> {
        Ok(ScanRun::find_running(&self.pool, org_id).await?)
    }

    async fn latest_run(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError> {
        Ok(ScanRun::find_latest(&self.pool, org_id).await?)
    }

    async fn latest_completed_run(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError> {
        Ok(ScanRun::find_latest_completed(&self.pool, org_id).await?)
    }

    async fn recent_runs(&self, org_id: Uuid, limit: i64) -> Result<Vec<ScanRun>, ScanError> {
        Ok(ScanRun::list_recent(&self.pool, org_id, limit).await?)
    }

    async fn advance_phase(
        &self,
        run_id: Uuid,
        completed_phases: i32,
        next_phase: Option<&str>,
        outcome: &PhaseOutcome,
    ) -> Result<(), ScanError> {
        let appended = json!([outcome]);
        Ok(ScanRun::advance_phase(&self.pool, run_id, completed_phases, next_phase, &appended)
            .await?)
    }

    async fn complete_run(&self, run_id: Uuid) -> Result<(), ScanError> {
        Ok(ScanRun::mark_completed(&self.pool, run_id).await?)
    }

    async fn fail_run(&self, run_id: Uuid, error: &str) -> Result<(), ScanError> {
        Ok(ScanRun::mark_failed(&self.pool, run_id, error).await?)
    }

    async fn fail_overdue_runs(&self, cutoff: DateTime<Utc>) -> Result<u64, ScanError> {
        Ok(ScanRun::fail_overdue(&self.pool, cutoff).await?)
    }

    async fn upsert_records(
        &self,
        org_id: Uuid,
        category: SyncCategory,
        records: &[DirectoryRecord],
    ) -> Result<UpsertCounts, ScanError> {
        let counts = match category {
            SyncCategory::Accounts => {
                let rows: Vec<AccountRecord> = records
                    .iter()
                    .filter_map(|r| match r {
                        DirectoryRecord::Account(a) => Some(a.clone()),
                        _ => None,
                    })
                    .collect();
                DirectoryAccount::upsert_batch(&self.pool, org_id, &rows).await?
            }
            SyncCategory::Groups => {
                let rows: Vec<GroupRecord> = records
                    .iter()
                    .filter_map(|r| match r {
                        DirectoryRecord::Group(g) => Some(g.clone()),
                        _ => None,
                    })
                    .collect();
                DirectoryGroup::upsert_batch(&self.pool, org_id, &rows).await?
            }
            SyncCategory::OauthGrants => {
                let rows: Vec<GrantRecord> = records
                    .iter()
                    .filter_map(|r| match r {
                        DirectoryRecord::Grant(g) => Some(g.clone()),
                        _ => None,
                    })
                    .collect();
                OAuthGrant::upsert_batch(&self.pool, org_id, &rows).await?
            }
            SyncCategory::Devices => {
                let rows: Vec<DeviceRecord> = records
                    .iter()
                    .filter_map(|r| match r {
                        DirectoryRecord::Device(d) => Some(d.clone()),
                        _ => None,
                    })
                    .collect();
                ManagedDevice::upsert_batch(&self.pool, org_id, &rows).await?
            }
            SyncCategory::Alerts => {
                let rows: Vec<AlertRecord> = records
                    .iter()
                    .filter_map(|r| match r {
                        DirectoryRecord::Alert(a) => Some(a.clone()),
                        _ => None,
                    })
                    .collect();
                SecurityAlert::upsert_batch(&self.pool, org_id, &rows).await?
            }
            SyncCategory::OrgUnits => {
                let rows: Vec<OrgUnitRecord> = records
                    .iter()
                    .filter_map(|r| match r {
                        DirectoryRecord::OrgUnit(o) => Some(o.clone()),
                        _ => None,
                    })
                    .collect();
                OrgUnit::upsert_batch(&self.pool, org_id, &rows).await?
            }
            SyncCategory::AdminRoles => {
                let rows: Vec<RoleRecord> = records
                    .iter()
                    .filter_map(|r| match r {
                        DirectoryRecord::Role(role) => Some(role.clone()),
                        _ => None,
                    })
                    .collect();
                AdminRole::upsert_batch(&self.pool, org_id, &rows).await?
            }
        };
        Ok(counts)
    }

    async fn mark_stale_absent(
        &self,
        org_id: Uuid,
        category: SyncCategory,
        seen_keys: &[String],
    ) -> Result<u64, ScanError> {
        let swept = match category {
            SyncCategory::Accounts => {
                DirectoryAccount::mark_stale_absent(&self.pool, org_id, seen_keys).await?
            }
            SyncCategory::Groups => {
                DirectoryGroup::mark_stale_absent(&self.pool, org_id, seen_keys).await?
            }
            SyncCategory::OauthGrants => {
                OAuthGrant::mark_stale_absent(&self.pool, org_id, seen_keys).await?
            }
            SyncCategory::Devices => {
                ManagedDevice::mark_stale_absent(&self.pool, org_id, seen_keys).await?
            }
            SyncCategory::Alerts => {
                SecurityAlert::mark_stale_absent(&self.pool, org_id, seen_keys).await?
            }
            SyncCategory::OrgUnits => {
                OrgUnit::mark_stale_absent(&self.pool, org_id, seen_keys).await?
            }
            SyncCategory::AdminRoles => {
                AdminRole::mark_stale_absent(&self.pool, org_id, seen_keys).await?
            }
        };
        Ok(swept)
    }

    async fn load_snapshot(&self, org_id: Uuid) -> Result<Snapshot, ScanError> {
        Ok(Snapshot {
            org_id,
            as_of: None,
            accounts: DirectoryAccount::list(&self.pool, org_id).await?,
            groups: DirectoryGroup::list(&self.pool, org_id).await?,
            grants: OAuthGrant::list(&self.pool, org_id).await?,
            devices: ManagedDevice::list(&self.pool, org_id).await?,
            alerts: SecurityAlert::list(&self.pool, org_id).await?,
            org_units: OrgUnit::list(&self.pool, org_id).await?,
            roles: AdminRole::list(&self.pool, org_id).await?,
            role_assignments: RoleAssignment::list(&self.pool, org_id).await?,
            phase_errors: Default::default(),
        })
    }

    async fn insert_checks(
        &self,
        run_id: Uuid,
        org_id: Uuid,
        checks: &[NewComplianceCheck],
    ) -> Result<(), ScanError> {
        Ok(ComplianceCheck::insert_for_run(&self.pool, run_id, org_id, checks).await?)
    }

    async fn checks_for_run(&self, run_id: Uuid) -> Result<Vec<ComplianceCheck>, ScanError> {
        Ok(ComplianceCheck::list_for_run(&self.pool, run_id).await?)
    }

    async fn latest_completed_checks(
        &self,
        org_id: Uuid,
    ) -> Result<Vec<ComplianceCheck>, ScanError> {
        Ok(ComplianceCheck::list_latest_completed(&self.pool, org_id).await?)
    }

    async fn set_org_unit_annotations(
        &self,
        org_id: Uuid,
        path: &str,
        risk_tags: &[String],
        risk_notes: &str,
    ) -> Result<OrgUnit, ScanError> {
        OrgUnit::set_annotations(&self.pool, org_id, path, risk_tags, risk_notes)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("org unit {path}")))
    }

    async fn upsert_credential(
        &self,
        org_id: Uuid,
        provider: &str,
        credential: &str,
        admin_email: Option<&str>,
    ) -> Result<(), ScanError> {
        ProviderCredential::upsert(&self.pool, org_id, provider, credential, admin_email).await?;
        Ok(())
    }

    async fn find_credential(&self, org_id: Uuid) -> Result<Option<ProviderCredential>, ScanError> {
        Ok(ProviderCredential::find(&self.pool, org_id).await?)
    }
}
