//! CSV projections of the snapshot and the latest check set.

use chrono::{DateTime, Utc};
use std::fmt;

use posture_db::models::ComplianceCheck;

use crate::error::ScanError;
use crate::snapshot::Snapshot;

/// What to project into the CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTarget {
    Accounts,
    Groups,
    Grants,
    Devices,
    Alerts,
    OrgUnits,
    AdminRoles,
    Checks,
}

impl fmt::Display for ExportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accounts => "accounts",
            Self::Groups => "groups",
            Self::Grants => "grants",
            Self::Devices => "devices",
            Self::Alerts => "alerts",
            Self::OrgUnits => "org_units",
            Self::AdminRoles => "admin_roles",
            Self::Checks => "checks",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ExportTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accounts" => Ok(Self::Accounts),
            "groups" => Ok(Self::Groups),
            "grants" | "oauth_grants" => Ok(Self::Grants),
            "devices" => Ok(Self::Devices),
            "alerts" => Ok(Self::Alerts),
            "org_units" => Ok(Self::OrgUnits),
            "admin_roles" | "roles" => Ok(Self::AdminRoles),
            "checks" => Ok(Self::Checks),
            _ => Err(format!("Unknown export target: {s}")),
        }
    }
}

fn time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Renders one entity collection (or the supplied check set) as CSV.
///
/// Rows follow the snapshot's natural-key ordering, so exports of identical
/// snapshots are byte-identical.
pub fn export_csv(
    snapshot: &Snapshot,
    checks: &[ComplianceCheck],
    target: ExportTarget,
) -> Result<String, ScanError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let write = |e: csv::Error| ScanError::Unexpected(format!("csv write failed: {e}"));

    match target {
        ExportTarget::Accounts => {
            writer
                .write_record([
                    "primary_email",
                    "display_name",
                    "is_admin",
                    "suspended",
                    "archived",
                    "two_sv_enrolled",
                    "two_sv_enforced",
                    "last_login",
                    "org_unit_path",
                    "stale",
                ])
                .map_err(write)?;
            for a in &snapshot.accounts {
                writer
                    .write_record([
                        a.primary_email.clone(),
                        a.display_name.clone(),
                        a.is_admin.to_string(),
                        a.suspended.to_string(),
                        a.archived.to_string(),
                        a.two_sv_enrolled.to_string(),
                        a.two_sv_enforced.to_string(),
                        time(a.last_login),
                        a.org_unit_path.clone().unwrap_or_default(),
                        a.stale.to_string(),
                    ])
                    .map_err(write)?;
            }
        }
        ExportTarget::Groups => {
            writer
                .write_record([
                    "group_key",
                    "display_name",
                    "member_count",
                    "allow_external_members",
                    "who_can_join",
                    "who_can_post",
                    "stale",
                ])
                .map_err(write)?;
            for g in &snapshot.groups {
                writer
                    .write_record([
                        g.group_key.clone(),
                        g.display_name.clone(),
                        g.member_count.to_string(),
                        g.allow_external_members.to_string(),
                        g.who_can_join.clone().unwrap_or_default(),
                        g.who_can_post.clone().unwrap_or_default(),
                        g.stale.to_string(),
                    ])
                    .map_err(write)?;
            }
        }
        ExportTarget::Grants => {
            writer
                .write_record([
                    "client_id",
                    "display_text",
                    "scopes",
                    "user_count",
                    "verified",
                    "risk_level",
                    "stale",
                ])
                .map_err(write)?;
            for g in &snapshot.grants {
                writer
                    .write_record([
                        g.client_id.clone(),
                        g.display_text.clone(),
                        g.scopes.join(" "),
                        g.user_count.to_string(),
                        g.verified.to_string(),
                        g.risk_level.clone(),
                        g.stale.to_string(),
                    ])
                    .map_err(write)?;
            }
        }
        ExportTarget::Devices => {
            writer
                .write_record([
                    "device_id",
                    "device_type",
                    "model",
                    "os",
                    "approval_status",
                    "compromised_status",
                    "encryption_status",
                    "last_sync",
                    "owner_email",
                    "stale",
                ])
                .map_err(write)?;
            for d in &snapshot.devices {
                writer
                    .write_record([
                        d.device_id.clone(),
                        d.device_type.clone(),
                        d.model.clone().unwrap_or_default(),
                        d.os.clone().unwrap_or_default(),
                        d.approval_status.clone().unwrap_or_default(),
                        d.compromised_status.clone().unwrap_or_default(),
                        d.encryption_status.clone().unwrap_or_default(),
                        time(d.last_sync),
                        d.owner_email.clone().unwrap_or_default(),
                        d.stale.to_string(),
                    ])
                    .map_err(write)?;
            }
        }
        ExportTarget::Alerts => {
            writer
                .write_record([
                    "alert_id",
                    "alert_type",
                    "source",
                    "severity",
                    "status",
                    "start_time",
                    "end_time",
                    "stale",
                ])
                .map_err(write)?;
            for a in &snapshot.alerts {
                writer
                    .write_record([
                        a.alert_id.clone(),
                        a.alert_type.clone(),
                        a.source.clone(),
                        a.severity.clone(),
                        a.status.clone(),
                        time(a.start_time),
                        time(a.end_time),
                        a.stale.to_string(),
                    ])
                    .map_err(write)?;
            }
        }
        ExportTarget::OrgUnits => {
            writer
                .write_record([
                    "path",
                    "name",
                    "user_count",
                    "risk_tags",
                    "risk_notes",
                    "stale",
                ])
                .map_err(write)?;
            for o in &snapshot.org_units {
                writer
                    .write_record([
                        o.path.clone(),
                        o.name.clone(),
                        o.user_count.to_string(),
                        o.risk_tags.join(";"),
                        o.risk_notes.clone(),
                        o.stale.to_string(),
                    ])
                    .map_err(write)?;
            }
        }
        ExportTarget::AdminRoles => {
            writer
                .write_record([
                    "role_id",
                    "name",
                    "is_super_admin",
                    "is_system_role",
                    "privileges",
                    "assignees",
                    "stale",
                ])
                .map_err(write)?;
            for r in &snapshot.roles {
                let mut assignees: Vec<String> = snapshot
                    .role_assignments
                    .iter()
                    .filter(|a| a.role_id == r.role_id)
                    .map(|a| a.assignee.clone())
                    .collect();
                assignees.sort();
                writer
                    .write_record([
                        r.role_id.clone(),
                        r.name.clone(),
                        r.is_super_admin.to_string(),
                        r.is_system_role.to_string(),
                        r.privileges.join(";"),
                        assignees.join(";"),
                        r.stale.to_string(),
                    ])
                    .map_err(write)?;
            }
        }
        ExportTarget::Checks => {
            writer
                .write_record(["check_id", "category", "title", "status", "details"])
                .map_err(write)?;
            for c in checks {
                writer
                    .write_record([
                        c.check_id.clone(),
                        c.category.clone(),
                        c.title.clone(),
                        c.status.clone(),
                        c.details.clone(),
                    ])
                    .map_err(write)?;
            }
        }
    }

    writer
        .flush()
        .map_err(|e| ScanError::Unexpected(format!("csv flush failed: {e}")))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| ScanError::Unexpected(format!("csv buffer failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| ScanError::Unexpected(format!("csv not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use posture_db::models::DirectoryAccount;
    use uuid::Uuid;

    fn account(email: &str, admin: bool) -> DirectoryAccount {
        let now = Utc::now();
        DirectoryAccount {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            primary_email: email.to_string(),
            display_name: "Test".to_string(),
            is_admin: admin,
            is_delegated_admin: false,
            suspended: false,
            archived: false,
            two_sv_enrolled: true,
            two_sv_enforced: false,
            last_login: None,
            org_unit_path: Some("/".to_string()),
            stale: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn exports_accounts_with_header() {
        let snapshot = Snapshot {
            accounts: vec![account("a@example.com", true)],
            ..Default::default()
        };
        let csv = export_csv(&snapshot, &[], ExportTarget::Accounts).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("primary_email,"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("a@example.com,Test,true,"));
    }

    #[test]
    fn export_target_parses() {
        assert_eq!(
            "oauth_grants".parse::<ExportTarget>().unwrap(),
            ExportTarget::Grants
        );
        assert!("bogus".parse::<ExportTarget>().is_err());
    }

    #[test]
    fn empty_snapshot_yields_header_only() {
        let csv = export_csv(&Snapshot::default(), &[], ExportTarget::Groups).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }
}
