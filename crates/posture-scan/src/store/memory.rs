//! In-memory snapshot store for tests.
//!
//! Mirrors the Postgres semantics that matter to callers: natural-key
//! upserts that reset `stale` and preserve org-unit annotations, the
//! one-running-scan-per-organization rule, append-only runs and checks.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use posture_connector::{DirectoryRecord, SyncCategory};
use posture_db::models::{
    AdminRole, ComplianceCheck, DirectoryAccount, DirectoryGroup, ManagedDevice,
    NewComplianceCheck, OAuthGrant, OrgUnit, ProviderCredential, RoleAssignment, ScanRun,
    ScanStatus, SecurityAlert, UpsertCounts,
};

use crate::error::ScanError;
use crate::phase::PhaseOutcome;
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;

type Keyed<T> = BTreeMap<(Uuid, String), T>;

#[derive(Default)]
struct State {
    runs: Vec<ScanRun>,
    accounts: Keyed<DirectoryAccount>,
    groups: Keyed<DirectoryGroup>,
    grants: Keyed<OAuthGrant>,
    devices: Keyed<ManagedDevice>,
    alerts: Keyed<SecurityAlert>,
    org_units: Keyed<OrgUnit>,
    roles: Keyed<AdminRole>,
    role_assignments: Keyed<RoleAssignment>,
    checks: Vec<ComplianceCheck>,
    credentials: BTreeMap<Uuid, ProviderCredential>,
}

/// Test double for the snapshot store; no database required.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    state: RwLock<State>,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// All runs ever created, in creation order. Test-only inspection.
    #[must_use]
    pub fn runs(&self) -> Vec<ScanRun> {
        self.read().runs.clone()
    }
}

fn upsert_into<T, F>(
    map: &mut Keyed<T>,
    org_id: Uuid,
    key: String,
    counts: &mut UpsertCounts,
    apply: F,
) where
    F: FnOnce(Option<&T>) -> T,
{
    match map.get(&(org_id, key.clone())) {
        Some(existing) => {
            let next = apply(Some(existing));
            map.insert((org_id, key), next);
            counts.updated += 1;
        }
        None => {
            let next = apply(None);
            map.insert((org_id, key), next);
            counts.inserted += 1;
        }
    }
}

fn sweep_absent<T>(
    map: &mut Keyed<T>,
    org_id: Uuid,
    seen_keys: &[String],
    mark: impl Fn(&mut T) -> bool,
) -> u64 {
    let mut swept = 0;
    for ((owner, key), row) in map.iter_mut() {
        if *owner == org_id && !seen_keys.contains(key) && mark(row) {
            swept += 1;
        }
    }
    swept
}

fn per_org<T: Clone>(map: &Keyed<T>, org_id: Uuid) -> Vec<T> {
    map.iter()
        .filter(|((org, _), _)| *org == org_id)
        .map(|(_, v)| v.clone())
        .collect()
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn create_run(
        &self,
        org_id: Uuid,
        provider: &str,
        triggered_by: &str,
        total_phases: i32,
        first_phase: &str,
    ) -> Result<ScanRun, ScanError> {
        let mut state = self.write();
        let conflict = state
            .runs
            .iter()
            .any(|r| r.org_id == org_id && r.status() == ScanStatus::Running);
        if conflict {
            return Err(ScanError::RunConflict(org_id));
        }
        let now = Utc::now();
        let run = ScanRun {
            id: Uuid::new_v4(),
            org_id,
            provider: provider.to_string(),
            status: ScanStatus::Running.to_string(),
            phase: Some(first_phase.to_string()),
            completed_phases: 0,
            total_phases,
            triggered_by: triggered_by.to_string(),
            phase_outcomes: json!([]),
            error_message: None,
            started_at: now,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.runs.push(run.clone());
        Ok(run)
    }

    async fn find_running(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError> {
        Ok(self
            .read()
            .runs
            .iter()
            .find(|r| r.org_id == org_id && r.status() == ScanStatus::Running)
            .cloned())
    }

    async fn latest_run(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError> {
        Ok(self
            .read()
            .runs
            .iter()
            .filter(|r| r.org_id == org_id)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn latest_completed_run(&self, org_id: Uuid) -> Result<Option<ScanRun>, ScanError> {
        Ok(self
            .read()
            .runs
            .iter()
            .filter(|r| r.org_id == org_id && r.status() == ScanStatus::Completed)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn recent_runs(&self, org_id: Uuid, limit: i64) -> Result<Vec<ScanRun>, ScanError> {
        let mut runs: Vec<ScanRun> = self
            .read()
            .runs
            .iter()
            .filter(|r| r.org_id == org_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(runs)
    }

    async fn advance_phase(
        &self,
        run_id: Uuid,
        completed_phases: i32,
        next_phase: Option<&str>,
        outcome: &PhaseOutcome,
    ) -> Result<(), ScanError> {
        let mut state = self.write();
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| ScanError::NotFound(format!("scan run {run_id}")))?;
        run.completed_phases = completed_phases;
        if let Some(phase) = next_phase {
            run.phase = Some(phase.to_string());
        }
        if let Some(outcomes) = run.phase_outcomes.as_array_mut() {
            outcomes.push(json!(outcome));
        }
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_run(&self, run_id: Uuid) -> Result<(), ScanError> {
        let mut state = self.write();
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| ScanError::NotFound(format!("scan run {run_id}")))?;
        run.status = ScanStatus::Completed.to_string();
        run.completed_at = Some(Utc::now());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_run(&self, run_id: Uuid, error: &str) -> Result<(), ScanError> {
        let mut state = self.write();
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| ScanError::NotFound(format!("scan run {run_id}")))?;
        run.status = ScanStatus::Failed.to_string();
        run.error_message = Some(error.to_string());
        run.completed_at = Some(Utc::now());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_overdue_runs(&self, cutoff: DateTime<Utc>) -> Result<u64, ScanError> {
        let mut state = self.write();
        let mut failed = 0;
        for run in &mut state.runs {
            if run.status() == ScanStatus::Running && run.started_at < cutoff {
                run.status = ScanStatus::Failed.to_string();
                run.error_message = Some("scan timed out".to_string());
                run.completed_at = Some(Utc::now());
                run.updated_at = Utc::now();
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn upsert_records(
        &self,
        org_id: Uuid,
        category: SyncCategory,
        records: &[DirectoryRecord],
    ) -> Result<UpsertCounts, ScanError> {
        let mut state = self.write();
        let mut counts = UpsertCounts::default();
        let now = Utc::now();

        for record in records {
            debug_assert_eq!(record.category(), category);
            match record {
                DirectoryRecord::Account(a) => {
                    let a = a.clone();
                    upsert_into(
                        &mut state.accounts,
                        org_id,
                        a.primary_email.clone(),
                        &mut counts,
                        |existing| DirectoryAccount {
                            id: existing.map_or_else(Uuid::new_v4, |e| e.id),
                            org_id,
                            primary_email: a.primary_email.clone(),
                            display_name: a.display_name.clone(),
                            is_admin: a.is_admin,
                            is_delegated_admin: a.is_delegated_admin,
                            suspended: a.suspended,
                            archived: a.archived,
                            two_sv_enrolled: a.two_sv_enrolled,
                            two_sv_enforced: a.two_sv_enforced,
                            last_login: a.last_login,
                            org_unit_path: a.org_unit_path.clone(),
                            stale: false,
                            created_at: existing.map_or(now, |e| e.created_at),
                            updated_at: now,
                        },
                    );
                }
                DirectoryRecord::Group(g) => {
                    let g = g.clone();
                    upsert_into(
                        &mut state.groups,
                        org_id,
                        g.group_key.clone(),
                        &mut counts,
                        |existing| DirectoryGroup {
                            id: existing.map_or_else(Uuid::new_v4, |e| e.id),
                            org_id,
                            group_key: g.group_key.clone(),
                            display_name: g.display_name.clone(),
                            member_count: g.member_count,
                            allow_external_members: g.allow_external_members,
                            who_can_join: g.who_can_join.clone(),
                            who_can_post: g.who_can_post.clone(),
                            stale: false,
                            created_at: existing.map_or(now, |e| e.created_at),
                            updated_at: now,
                        },
                    );
                }
                DirectoryRecord::Grant(g) => {
                    let g = g.clone();
                    upsert_into(
                        &mut state.grants,
                        org_id,
                        g.client_id.clone(),
                        &mut counts,
                        |existing| OAuthGrant {
                            id: existing.map_or_else(Uuid::new_v4, |e| e.id),
                            org_id,
                            client_id: g.client_id.clone(),
                            display_text: g.display_text.clone(),
                            scopes: g.scopes.clone(),
                            user_count: g.user_count,
                            verified: g.verified,
                            risk_level: g.risk_level.to_string(),
                            stale: false,
                            created_at: existing.map_or(now, |e| e.created_at),
                            updated_at: now,
                        },
                    );
                }
                DirectoryRecord::Device(d) => {
                    let d = d.clone();
                    upsert_into(
                        &mut state.devices,
                        org_id,
                        d.device_id.clone(),
                        &mut counts,
                        |existing| ManagedDevice {
                            id: existing.map_or_else(Uuid::new_v4, |e| e.id),
                            org_id,
                            device_id: d.device_id.clone(),
                            device_type: d.device_type.clone(),
                            model: d.model.clone(),
                            os: d.os.clone(),
                            approval_status: d.approval_status.clone(),
                            compromised_status: d.compromised_status.clone(),
                            encryption_status: d.encryption_status.clone(),
                            last_sync: d.last_sync,
                            owner_email: d.owner_email.clone(),
                            stale: false,
                            created_at: existing.map_or(now, |e| e.created_at),
                            updated_at: now,
                        },
                    );
                }
                DirectoryRecord::Alert(a) => {
                    let a = a.clone();
                    let detail = a.detail.as_ref().and_then(|d| serde_json::to_value(d).ok());
                    upsert_into(
                        &mut state.alerts,
                        org_id,
                        a.alert_id.clone(),
                        &mut counts,
                        |existing| SecurityAlert {
                            id: existing.map_or_else(Uuid::new_v4, |e| e.id),
                            org_id,
                            alert_id: a.alert_id.clone(),
                            alert_type: a.alert_type.clone(),
                            source: a.source.clone(),
                            severity: a.severity.to_string(),
                            status: a.status.clone(),
                            start_time: a.start_time,
                            end_time: a.end_time,
                            detail,
                            stale: false,
                            created_at: existing.map_or(now, |e| e.created_at),
                            updated_at: now,
                        },
                    );
                }
                DirectoryRecord::OrgUnit(o) => {
                    let o = o.clone();
                    upsert_into(
                        &mut state.org_units,
                        org_id,
                        o.path.clone(),
                        &mut counts,
                        // Annotations are operator-owned; sync never touches them.
                        |existing| OrgUnit {
                            id: existing.map_or_else(Uuid::new_v4, |e| e.id),
                            org_id,
                            path: o.path.clone(),
                            name: o.name.clone(),
                            user_count: o.user_count,
                            risk_tags: existing.map_or_else(Vec::new, |e| e.risk_tags.clone()),
                            risk_notes: existing.map_or_else(String::new, |e| e.risk_notes.clone()),
                            stale: false,
                            created_at: existing.map_or(now, |e| e.created_at),
                            updated_at: now,
                        },
                    );
                }
                DirectoryRecord::Role(r) => {
                    let r = r.clone();
                    upsert_into(
                        &mut state.roles,
                        org_id,
                        r.role_id.clone(),
                        &mut counts,
                        |existing| AdminRole {
                            id: existing.map_or_else(Uuid::new_v4, |e| e.id),
                            org_id,
                            role_id: r.role_id.clone(),
                            name: r.name.clone(),
                            is_super_admin: r.is_super_admin,
                            is_system_role: r.is_system_role,
                            privileges: r.privileges.clone(),
                            stale: false,
                            created_at: existing.map_or(now, |e| e.created_at),
                            updated_at: now,
                        },
                    );
                    for a in &r.assignments {
                        let existing = state
                            .role_assignments
                            .get(&(org_id, a.assignment_id.clone()));
                        let row = RoleAssignment {
                            id: existing.map_or_else(Uuid::new_v4, |e| e.id),
                            org_id,
                            assignment_id: a.assignment_id.clone(),
                            role_id: r.role_id.clone(),
                            assignee: a.assignee.clone(),
                            scope_org_unit: a.scope_org_unit.clone(),
                            created_at: existing.map_or(now, |e| e.created_at),
                            updated_at: now,
                        };
                        state
                            .role_assignments
                            .insert((org_id, a.assignment_id.clone()), row);
                    }
                }
            }
        }
        Ok(counts)
    }

    async fn mark_stale_absent(
        &self,
        org_id: Uuid,
        category: SyncCategory,
        seen_keys: &[String],
    ) -> Result<u64, ScanError> {
        let mut state = self.write();
        let now = Utc::now();
        macro_rules! sweep {
            ($map:expr) => {
                sweep_absent(&mut $map, org_id, seen_keys, |row| {
                    if row.stale {
                        return false;
                    }
                    row.stale = true;
                    row.updated_at = now;
                    true
                })
            };
        }
        let swept = match category {
            SyncCategory::Accounts => sweep!(state.accounts),
            SyncCategory::Groups => sweep!(state.groups),
            SyncCategory::OauthGrants => sweep!(state.grants),
            SyncCategory::Devices => sweep!(state.devices),
            SyncCategory::Alerts => sweep!(state.alerts),
            SyncCategory::OrgUnits => sweep!(state.org_units),
            SyncCategory::AdminRoles => sweep!(state.roles),
        };
        Ok(swept)
    }

    async fn load_snapshot(&self, org_id: Uuid) -> Result<Snapshot, ScanError> {
        let state = self.read();
        Ok(Snapshot {
            org_id,
            as_of: None,
            accounts: per_org(&state.accounts, org_id),
            groups: per_org(&state.groups, org_id),
            grants: per_org(&state.grants, org_id),
            devices: per_org(&state.devices, org_id),
            alerts: per_org(&state.alerts, org_id),
            org_units: per_org(&state.org_units, org_id),
            roles: per_org(&state.roles, org_id),
            role_assignments: per_org(&state.role_assignments, org_id),
            phase_errors: Default::default(),
        })
    }

    async fn insert_checks(
        &self,
        run_id: Uuid,
        org_id: Uuid,
        checks: &[NewComplianceCheck],
    ) -> Result<(), ScanError> {
        let mut state = self.write();
        let now = Utc::now();
        for c in checks {
            state.checks.push(ComplianceCheck {
                id: Uuid::new_v4(),
                scan_run_id: run_id,
                org_id,
                check_id: c.check_id.clone(),
                category: c.category.clone(),
                title: c.title.clone(),
                status: c.status.to_string(),
                details: c.details.clone(),
                created_at: now,
            });
        }
        Ok(())
    }

    async fn checks_for_run(&self, run_id: Uuid) -> Result<Vec<ComplianceCheck>, ScanError> {
        let mut checks: Vec<ComplianceCheck> = self
            .read()
            .checks
            .iter()
            .filter(|c| c.scan_run_id == run_id)
            .cloned()
            .collect();
        checks.sort_by(|a, b| (&a.category, &a.check_id).cmp(&(&b.category, &b.check_id)));
        Ok(checks)
    }

    async fn latest_completed_checks(
        &self,
        org_id: Uuid,
    ) -> Result<Vec<ComplianceCheck>, ScanError> {
        let latest = self.latest_completed_run(org_id).await?;
        match latest {
            Some(run) => self.checks_for_run(run.id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn set_org_unit_annotations(
        &self,
        org_id: Uuid,
        path: &str,
        risk_tags: &[String],
        risk_notes: &str,
    ) -> Result<OrgUnit, ScanError> {
        let mut state = self.write();
        let unit = state
            .org_units
            .get_mut(&(org_id, path.to_string()))
            .ok_or_else(|| ScanError::NotFound(format!("org unit {path}")))?;
        unit.risk_tags = risk_tags.to_vec();
        unit.risk_notes = risk_notes.to_string();
        unit.updated_at = Utc::now();
        Ok(unit.clone())
    }

    async fn upsert_credential(
        &self,
        org_id: Uuid,
        provider: &str,
        credential: &str,
        admin_email: Option<&str>,
    ) -> Result<(), ScanError> {
        let mut state = self.write();
        let now = Utc::now();
        let created_at = state
            .credentials
            .get(&org_id)
            .map_or(now, |c| c.created_at);
        state.credentials.insert(
            org_id,
            ProviderCredential {
                org_id,
                provider: provider.to_string(),
                credential: credential.to_string(),
                admin_email: admin_email.map(str::to_string),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn find_credential(&self, org_id: Uuid) -> Result<Option<ProviderCredential>, ScanError> {
        Ok(self.read().credentials.get(&org_id).cloned())
    }
}
