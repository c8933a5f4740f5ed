//! End-to-end pipeline tests against a mock provider and the in-memory
//! snapshot store: full clean runs, degraded-provider runs, mutual exclusion,
//! upsert semantics and verdict determinism.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use posture_connector::{
    AccountRecord, AlertDetail, AlertRecord, AlertSeverity, ConnectorError, ConnectorResult,
    DeviceRecord, DirectoryProvider, DirectoryRecord, GrantRecord, GrantRiskLevel, GroupRecord,
    OrgUnitRecord, PageCursor, ProviderType, RecordPage, RoleAssignmentRecord, RoleRecord,
    SyncCategory,
};
use posture_db::models::{CheckStatus, ScanStatus};
use posture_scan::rules::run_checks;
use posture_scan::store::InMemorySnapshotStore;
use posture_scan::{run_phase, ExportTarget, ScanOrchestrator, ScanService, SnapshotStore};

const CATEGORIES: &[SyncCategory] = &[
    SyncCategory::Accounts,
    SyncCategory::Groups,
    SyncCategory::OauthGrants,
    SyncCategory::Devices,
    SyncCategory::Alerts,
    SyncCategory::OrgUnits,
    SyncCategory::AdminRoles,
];

const PAGE_SIZE: usize = 40;

/// Scripted provider: fixed record sets per category, served in pages of
/// `PAGE_SIZE`, with optional injected auth failures per category.
#[derive(Default)]
struct MockDirectory {
    records: BTreeMap<SyncCategory, Vec<DirectoryRecord>>,
    auth_fail: BTreeSet<SyncCategory>,
}

impl MockDirectory {
    fn with(mut self, category: SyncCategory, records: Vec<DirectoryRecord>) -> Self {
        self.records.insert(category, records);
        self
    }

    fn failing_auth(mut self, category: SyncCategory) -> Self {
        self.auth_fail.insert(category);
        self
    }
}

#[async_trait]
impl DirectoryProvider for MockDirectory {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Workspace
    }

    fn display_name(&self) -> &str {
        "Mock Directory"
    }

    fn categories(&self) -> &'static [SyncCategory] {
        CATEGORIES
    }

    async fn verify_credentials(&self) -> ConnectorResult<()> {
        Ok(())
    }

    async fn fetch_page(
        &self,
        category: SyncCategory,
        cursor: Option<PageCursor>,
    ) -> ConnectorResult<RecordPage> {
        if self.auth_fail.contains(&category) {
            return Err(ConnectorError::Auth(
                "API returned 403: insufficient permissions".to_string(),
            ));
        }
        let all = self.records.get(&category).cloned().unwrap_or_default();
        let offset: usize = cursor
            .map(|c| c.0.parse().unwrap_or(0))
            .unwrap_or(0);
        let end = (offset + PAGE_SIZE).min(all.len());
        let next = (end < all.len()).then(|| PageCursor(end.to_string()));
        Ok(RecordPage {
            records: all[offset..end].to_vec(),
            next,
        })
    }
}

fn account(email: &str, suspended: bool, enrolled: bool, admin: bool) -> DirectoryRecord {
    DirectoryRecord::Account(AccountRecord {
        primary_email: email.to_string(),
        display_name: format!("User {email}"),
        is_admin: admin,
        is_delegated_admin: false,
        suspended,
        archived: false,
        two_sv_enrolled: enrolled,
        two_sv_enforced: false,
        last_login: Some(Utc::now()),
        org_unit_path: Some("/".to_string()),
    })
}

/// 100 accounts: 20 suspended, 80 active of which 72 are 2SV-enrolled (90%).
/// The two admins are among the enrolled.
fn clean_accounts() -> Vec<DirectoryRecord> {
    (0..100)
        .map(|i| {
            let suspended = i < 20;
            let enrolled = (20..92).contains(&i);
            let admin = i == 20 || i == 21;
            account(&format!("user{i:03}@example.com"), suspended, enrolled, admin)
        })
        .collect()
}

fn healthy_directory() -> MockDirectory {
    MockDirectory::default()
        .with(SyncCategory::Accounts, clean_accounts())
        .with(
            SyncCategory::Groups,
            vec![DirectoryRecord::Group(GroupRecord {
                group_key: "eng@example.com".to_string(),
                display_name: "Engineering".to_string(),
                member_count: 40,
                allow_external_members: false,
                who_can_join: Some("INVITED_CAN_JOIN".to_string()),
                who_can_post: Some("ALL_MEMBERS_CAN_POST".to_string()),
            })],
        )
        .with(
            SyncCategory::OauthGrants,
            vec![DirectoryRecord::Grant(GrantRecord {
                client_id: "calendar-sync.apps.example.com".to_string(),
                display_text: "Calendar Sync".to_string(),
                scopes: vec!["openid".to_string(), "profile".to_string()],
                user_count: 12,
                verified: true,
                risk_level: GrantRiskLevel::Low,
            })],
        )
        .with(
            SyncCategory::Devices,
            vec![DirectoryRecord::Device(DeviceRecord {
                device_id: "device-1".to_string(),
                device_type: "ANDROID".to_string(),
                model: Some("Pixel 8".to_string()),
                os: Some("Android 15".to_string()),
                approval_status: Some("APPROVED".to_string()),
                compromised_status: Some("No compromise detected".to_string()),
                encryption_status: Some("Encrypted".to_string()),
                last_sync: Some(Utc::now()),
                owner_email: Some("user020@example.com".to_string()),
            })],
        )
        .with(
            SyncCategory::Alerts,
            vec![DirectoryRecord::Alert(AlertRecord {
                alert_id: "alert-1".to_string(),
                alert_type: "Suspicious login".to_string(),
                source: "Google identity".to_string(),
                severity: AlertSeverity::Medium,
                status: "CLOSED".to_string(),
                start_time: Some(Utc::now() - Duration::days(3)),
                end_time: Some(Utc::now() - Duration::days(2)),
                detail: AlertDetail::from_json(&serde_json::json!({"ip": "203.0.113.9"})),
            })],
        )
        .with(
            SyncCategory::OrgUnits,
            vec![DirectoryRecord::OrgUnit(OrgUnitRecord {
                path: "/".to_string(),
                name: "Root".to_string(),
                user_count: 100,
            })],
        )
        .with(
            SyncCategory::AdminRoles,
            vec![DirectoryRecord::Role(RoleRecord {
                role_id: "role-super".to_string(),
                name: "_SEED_ADMIN_ROLE".to_string(),
                is_super_admin: true,
                is_system_role: true,
                privileges: vec!["SUPER_ADMIN".to_string()],
                assignments: vec![
                    RoleAssignmentRecord {
                        assignment_id: "assign-1".to_string(),
                        assignee: "user020@example.com".to_string(),
                        scope_org_unit: None,
                    },
                    RoleAssignmentRecord {
                        assignment_id: "assign-2".to_string(),
                        assignee: "user021@example.com".to_string(),
                        scope_org_unit: None,
                    },
                ],
            })],
        )
}

async fn execute_scan(
    store: &Arc<InMemorySnapshotStore>,
    provider: &MockDirectory,
    org_id: Uuid,
) -> Uuid {
    let orchestrator = ScanOrchestrator::new(Arc::clone(store) as Arc<dyn SnapshotStore>);
    let run = store
        .create_run(org_id, "workspace", "test", CATEGORIES.len() as i32, "accounts")
        .await
        .expect("create run");
    orchestrator
        .execute(provider, &run)
        .await
        .expect("scan executes");
    run.id
}

#[tokio::test]
async fn clean_run_completes_with_all_verdicts() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let provider = healthy_directory();
    let org_id = Uuid::new_v4();

    let run_id = execute_scan(&store, &provider, org_id).await;

    let run = store.latest_run(org_id).await.unwrap().unwrap();
    assert_eq!(run.status(), ScanStatus::Completed);
    assert_eq!(run.completed_phases, 7);
    assert!(run.error_message.is_none());
    let outcomes = run.phase_outcomes.as_array().unwrap();
    assert_eq!(outcomes.len(), 7);
    assert!(outcomes.iter().all(|o| o["error"].is_null()));

    let checks = store.checks_for_run(run_id).await.unwrap();
    assert_eq!(checks.len(), 11);
    assert!(checks.iter().all(|c| c.status() == CheckStatus::Pass));
}

#[tokio::test]
async fn two_sv_coverage_at_ninety_percent_passes() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let provider = healthy_directory();
    let org_id = Uuid::new_v4();

    let run_id = execute_scan(&store, &provider, org_id).await;

    let checks = store.checks_for_run(run_id).await.unwrap();
    let coverage = checks.iter().find(|c| c.check_id == "WS-ACC-01").unwrap();
    assert_eq!(coverage.status(), CheckStatus::Pass);
    assert!(coverage.details.contains("72 of 80"));
    assert!(coverage.details.contains("90.0%"));
}

#[tokio::test]
async fn degraded_alerts_phase_still_completes_the_run() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let provider = healthy_directory().failing_auth(SyncCategory::Alerts);
    let org_id = Uuid::new_v4();

    let run_id = execute_scan(&store, &provider, org_id).await;

    let run = store.latest_run(org_id).await.unwrap().unwrap();
    assert_eq!(run.status(), ScanStatus::Completed);
    assert_eq!(run.completed_phases, 7);

    let outcomes = run.phase_outcomes.as_array().unwrap();
    let alerts_outcome = outcomes
        .iter()
        .find(|o| o["category"] == "alerts")
        .unwrap();
    let error = alerts_outcome["error"].as_str().unwrap();
    assert!(error.starts_with("AuthenticationError:"));

    let checks = store.checks_for_run(run_id).await.unwrap();
    let alert_check = checks.iter().find(|c| c.check_id == "WS-ALR-01").unwrap();
    assert_eq!(alert_check.status(), CheckStatus::Error);
    assert!(alert_check.details.starts_with("AuthenticationError:"));

    // Checks over healthy categories are unaffected.
    let coverage = checks.iter().find(|c| c.check_id == "WS-ACC-01").unwrap();
    assert_eq!(coverage.status(), CheckStatus::Pass);
}

#[tokio::test]
async fn second_trigger_is_rejected_while_running() {
    let store = InMemorySnapshotStore::new();
    let org_id = Uuid::new_v4();

    store
        .create_run(org_id, "workspace", "test", 7, "accounts")
        .await
        .unwrap();
    let err = store
        .create_run(org_id, "workspace", "scheduler", 7, "accounts")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        posture_scan::ScanError::RunConflict(id) if id == org_id
    ));
    assert_eq!(store.runs().len(), 1);

    // A different organization is unaffected.
    store
        .create_run(Uuid::new_v4(), "workspace", "test", 7, "accounts")
        .await
        .unwrap();
}

#[tokio::test]
async fn upserts_are_idempotent_for_every_category() {
    let store = InMemorySnapshotStore::new();
    let org_id = Uuid::new_v4();
    let provider = healthy_directory();

    for category in CATEGORIES {
        let records = provider.records.get(category).cloned().unwrap_or_default();

        let first = store
            .upsert_records(org_id, *category, &records)
            .await
            .unwrap();
        assert_eq!(first.inserted, records.len() as u64, "{category} first pass");
        assert_eq!(first.updated, 0, "{category} first pass");

        let second = store
            .upsert_records(org_id, *category, &records)
            .await
            .unwrap();
        assert_eq!(second.inserted, 0, "{category} second pass");
        assert_eq!(second.updated, records.len() as u64, "{category} second pass");
    }

    let snapshot = store.load_snapshot(org_id).await.unwrap();
    assert_eq!(snapshot.accounts.len(), 100);
    assert_eq!(snapshot.groups.len(), 1);
    assert_eq!(snapshot.grants.len(), 1);
    assert_eq!(snapshot.devices.len(), 1);
    assert_eq!(snapshot.alerts.len(), 1);
    assert_eq!(snapshot.org_units.len(), 1);
    assert_eq!(snapshot.roles.len(), 1);
    assert_eq!(snapshot.role_assignments.len(), 2);
}

#[tokio::test]
async fn swept_rows_drop_out_of_verdicts() {
    let store = InMemorySnapshotStore::new();
    let org_id = Uuid::new_v4();
    let records = vec![
        account("kept@example.com", false, true, false),
        account("gone@example.com", false, false, false),
    ];
    store
        .upsert_records(org_id, SyncCategory::Accounts, &records)
        .await
        .unwrap();

    // One of two active accounts enrolled: coverage sits at 50%.
    let mut snapshot = store.load_snapshot(org_id).await.unwrap();
    snapshot.as_of = Some(Utc::now());
    let before = run_checks(ProviderType::Workspace, &snapshot);
    let coverage = before.iter().find(|c| c.check_id == "WS-ACC-01").unwrap();
    assert_eq!(coverage.status, CheckStatus::Warning);

    let seen = vec!["kept@example.com".to_string()];
    let swept = store
        .mark_stale_absent(org_id, SyncCategory::Accounts, &seen)
        .await
        .unwrap();
    assert_eq!(swept, 1);

    // Sweeping again with the same keys is a no-op.
    let again = store
        .mark_stale_absent(org_id, SyncCategory::Accounts, &seen)
        .await
        .unwrap();
    assert_eq!(again, 0);

    // The flagged account no longer counts against coverage.
    let mut snapshot = store.load_snapshot(org_id).await.unwrap();
    snapshot.as_of = Some(Utc::now());
    let after = run_checks(ProviderType::Workspace, &snapshot);
    let coverage = after.iter().find(|c| c.check_id == "WS-ACC-01").unwrap();
    assert_eq!(coverage.status, CheckStatus::Pass);
    assert!(coverage.details.contains("1 of 1"));
}

#[tokio::test]
async fn phase_runner_pages_through_the_listing() {
    let store = InMemorySnapshotStore::new();
    let provider = MockDirectory::default().with(SyncCategory::Accounts, clean_accounts());
    let org_id = Uuid::new_v4();

    // 100 records over pages of 40.
    let outcome = run_phase(&provider, &store, org_id, SyncCategory::Accounts)
        .await
        .unwrap();
    assert!(outcome.succeeded());
    assert_eq!(outcome.record_count, 100);
    assert_eq!(outcome.inserted, 100);
    assert_eq!(outcome.updated, 0);
}

#[tokio::test]
async fn annotations_survive_resync() {
    let store = InMemorySnapshotStore::new();
    let org_id = Uuid::new_v4();
    let unit = |count| {
        vec![DirectoryRecord::OrgUnit(OrgUnitRecord {
            path: "/Contractors".to_string(),
            name: "Contractors".to_string(),
            user_count: count,
        })]
    };

    store
        .upsert_records(org_id, SyncCategory::OrgUnits, &unit(10))
        .await
        .unwrap();
    store
        .set_org_unit_annotations(
            org_id,
            "/Contractors",
            &["external".to_string(), "review-quarterly".to_string()],
            "Third-party staff, least privilege",
        )
        .await
        .unwrap();

    // Next sync updates the mirrored fields only.
    store
        .upsert_records(org_id, SyncCategory::OrgUnits, &unit(14))
        .await
        .unwrap();

    let snapshot = store.load_snapshot(org_id).await.unwrap();
    let contractors = snapshot
        .org_units
        .iter()
        .find(|o| o.path == "/Contractors")
        .unwrap();
    assert_eq!(contractors.user_count, 14);
    assert_eq!(contractors.risk_tags, vec!["external", "review-quarterly"]);
    assert_eq!(contractors.risk_notes, "Third-party staff, least privilege");
}

#[tokio::test]
async fn annotating_unknown_org_unit_is_not_found() {
    let store = InMemorySnapshotStore::new();
    let err = store
        .set_org_unit_annotations(Uuid::new_v4(), "/Nope", &[], "")
        .await
        .unwrap_err();
    assert!(matches!(err, posture_scan::ScanError::NotFound(_)));
}

#[tokio::test]
async fn identical_snapshots_yield_identical_verdicts() {
    let store = InMemorySnapshotStore::new();
    let provider = healthy_directory();
    let org_id = Uuid::new_v4();

    for category in CATEGORIES {
        run_phase(&provider, &store, org_id, *category)
            .await
            .unwrap();
    }

    let mut snapshot = store.load_snapshot(org_id).await.unwrap();
    snapshot.as_of = Some(Utc::now());

    let first = run_checks(ProviderType::Workspace, &snapshot);
    let second = run_checks(ProviderType::Workspace, &snapshot);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );

    // Stable (category, id) ordering.
    let order: Vec<(String, String)> = first
        .iter()
        .map(|c| (c.category.clone(), c.check_id.clone()))
        .collect();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);
}

#[tokio::test]
async fn watchdog_releases_the_run_lock() {
    let store = InMemorySnapshotStore::new();
    let org_id = Uuid::new_v4();
    store
        .create_run(org_id, "workspace", "test", 7, "accounts")
        .await
        .unwrap();

    let failed = store
        .fail_overdue_runs(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(failed, 1);

    let run = store.latest_run(org_id).await.unwrap().unwrap();
    assert_eq!(run.status(), ScanStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("scan timed out"));
    assert!(store.find_running(org_id).await.unwrap().is_none());

    // The lock is released; a new scan can start.
    store
        .create_run(org_id, "workspace", "test", 7, "accounts")
        .await
        .unwrap();
}

#[tokio::test]
async fn latest_checks_come_from_the_latest_completed_run() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let org_id = Uuid::new_v4();

    execute_scan(&store, &healthy_directory(), org_id).await;
    let second_run_id = execute_scan(
        &store,
        &healthy_directory().failing_auth(SyncCategory::Alerts),
        org_id,
    )
    .await;

    let latest = store.latest_completed_checks(org_id).await.unwrap();
    assert!(!latest.is_empty());
    assert!(latest.iter().all(|c| c.scan_run_id == second_run_id));
}

#[tokio::test]
async fn checks_export_projects_the_latest_completed_run() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let org_id = Uuid::new_v4();
    execute_scan(&store, &healthy_directory(), org_id).await;

    let service = ScanService::new(Arc::clone(&store) as Arc<dyn SnapshotStore>);
    let csv = service.export(org_id, ExportTarget::Checks).await.unwrap();

    let mut lines = csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "check_id,category,title,status,details"
    );
    assert_eq!(csv.lines().count(), 12);
    assert!(csv.contains("WS-ACC-01"));
}
