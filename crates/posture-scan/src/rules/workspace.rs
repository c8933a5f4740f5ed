//! Google Workspace check bank.
//!
//! IDs are stable and ordering-significant; details strings list offenders in
//! sorted order so verdicts stay byte-identical for identical snapshots.

use chrono::Duration;

use posture_connector::SyncCategory;

use super::{coverage_verdict, sorted_list, CheckDef, Verdict};
use crate::snapshot::Snapshot;

/// Active accounts without a login newer than this are dormant.
const DORMANT_DAYS: i64 = 90;

pub const CHECKS: &[CheckDef] = &[
    CheckDef {
        id: "WS-ACC-01",
        category: "accounts",
        title: "Two-step verification coverage",
        eval: two_sv_coverage,
    },
    CheckDef {
        id: "WS-ACC-02",
        category: "accounts",
        title: "Admins enrolled in two-step verification",
        eval: admin_two_sv,
    },
    CheckDef {
        id: "WS-ACC-03",
        category: "accounts",
        title: "Suspended accounts retaining admin privileges",
        eval: suspended_admins,
    },
    CheckDef {
        id: "WS-ACC-04",
        category: "accounts",
        title: "Dormant active accounts",
        eval: dormant_accounts,
    },
    CheckDef {
        id: "WS-GRP-01",
        category: "groups",
        title: "Groups allowing external members",
        eval: external_member_groups,
    },
    CheckDef {
        id: "WS-OAU-01",
        category: "oauth_grants",
        title: "High-risk third-party OAuth grants",
        eval: high_risk_grants,
    },
    CheckDef {
        id: "WS-OAU-02",
        category: "oauth_grants",
        title: "Unverified applications holding grants",
        eval: unverified_grants,
    },
    CheckDef {
        id: "WS-DEV-01",
        category: "devices",
        title: "Compromised managed devices",
        eval: compromised_devices,
    },
    CheckDef {
        id: "WS-DEV-02",
        category: "devices",
        title: "Unencrypted managed devices",
        eval: unencrypted_devices,
    },
    CheckDef {
        id: "WS-ALR-01",
        category: "alerts",
        title: "Open high-severity alerts",
        eval: open_high_alerts,
    },
    CheckDef {
        id: "WS-ROL-01",
        category: "admin_roles",
        title: "Super admin count within recommended bounds",
        eval: super_admin_count,
    },
];

fn two_sv_coverage(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Accounts)?;
    let active: Vec<_> = snapshot.active_accounts().filter(|a| !a.stale).collect();
    let enrolled = active.iter().filter(|a| a.two_sv_enrolled).count();
    Ok(coverage_verdict(
        enrolled,
        active.len(),
        "2-step verification enrolled",
    ))
}

fn admin_two_sv(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Accounts)?;
    let offenders: Vec<String> = snapshot
        .active_accounts()
        .filter(|a| !a.stale && (a.is_admin || a.is_delegated_admin) && !a.two_sv_enrolled)
        .map(|a| a.primary_email.clone())
        .collect();
    if offenders.is_empty() {
        Ok(Verdict::pass("All active admins are enrolled in 2SV"))
    } else {
        Ok(Verdict::fail(format!(
            "{} admin account(s) without 2SV: {}",
            offenders.len(),
            sorted_list(offenders)
        )))
    }
}

fn suspended_admins(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Accounts)?;
    let offenders: Vec<String> = snapshot
        .accounts
        .iter()
        .filter(|a| !a.stale && a.suspended && a.is_admin)
        .map(|a| a.primary_email.clone())
        .collect();
    if offenders.is_empty() {
        Ok(Verdict::pass("No suspended accounts retain admin privileges"))
    } else {
        Ok(Verdict::fail(format!(
            "{} suspended admin account(s): {}",
            offenders.len(),
            sorted_list(offenders)
        )))
    }
}

fn dormant_accounts(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Accounts)?;
    let as_of = snapshot
        .as_of
        .ok_or_else(|| "snapshot reference time unavailable".to_string())?;
    let threshold = as_of - Duration::days(DORMANT_DAYS);
    let dormant: Vec<String> = snapshot
        .active_accounts()
        .filter(|a| !a.stale && a.last_login.map_or(true, |t| t < threshold))
        .map(|a| a.primary_email.clone())
        .collect();
    if dormant.is_empty() {
        Ok(Verdict::pass(format!(
            "No active account has been idle for {DORMANT_DAYS}+ days"
        )))
    } else {
        Ok(Verdict::warning(format!(
            "{} active account(s) idle for {DORMANT_DAYS}+ days: {}",
            dormant.len(),
            sorted_list(dormant)
        )))
    }
}

fn external_member_groups(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Groups)?;
    let open: Vec<String> = snapshot
        .groups
        .iter()
        .filter(|g| !g.stale && g.allow_external_members)
        .map(|g| g.group_key.clone())
        .collect();
    if open.is_empty() {
        Ok(Verdict::pass("No group allows external members"))
    } else {
        Ok(Verdict::warning(format!(
            "{} group(s) allow external members: {}",
            open.len(),
            sorted_list(open)
        )))
    }
}

fn high_risk_grants(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::OauthGrants)?;
    let risky: Vec<String> = snapshot
        .grants
        .iter()
        .filter(|g| !g.stale && g.risk_level == "HIGH")
        .map(|g| format!("{} ({} users)", g.display_text, g.user_count))
        .collect();
    if risky.is_empty() {
        Ok(Verdict::pass("No high-risk OAuth grants"))
    } else {
        Ok(Verdict::fail(format!(
            "{} high-risk grant(s): {}",
            risky.len(),
            sorted_list(risky)
        )))
    }
}

fn unverified_grants(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::OauthGrants)?;
    let unverified: Vec<String> = snapshot
        .grants
        .iter()
        .filter(|g| !g.stale && !g.verified)
        .map(|g| g.display_text.clone())
        .collect();
    if unverified.is_empty() {
        Ok(Verdict::pass("All granted applications are verified"))
    } else {
        Ok(Verdict::warning(format!(
            "{} unverified application(s) hold grants: {}",
            unverified.len(),
            sorted_list(unverified)
        )))
    }
}

fn compromised_devices(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Devices)?;
    let compromised: Vec<String> = snapshot
        .devices
        .iter()
        .filter(|d| {
            !d.stale
                && d.compromised_status.as_deref().is_some_and(|s| {
                    s.eq_ignore_ascii_case("compromise detected")
                        || s.eq_ignore_ascii_case("compromised")
                })
        })
        .map(|d| d.device_id.clone())
        .collect();
    if compromised.is_empty() {
        Ok(Verdict::pass("No managed device reports compromise"))
    } else {
        Ok(Verdict::fail(format!(
            "{} compromised device(s): {}",
            compromised.len(),
            sorted_list(compromised)
        )))
    }
}

fn unencrypted_devices(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Devices)?;
    let unencrypted: Vec<String> = snapshot
        .devices
        .iter()
        .filter(|d| {
            !d.stale
                && d.encryption_status.as_deref().is_some_and(|s| {
                    let s = s.to_lowercase();
                    s == "not encrypted" || s == "notencrypted" || s == "unencrypted"
                })
        })
        .map(|d| d.device_id.clone())
        .collect();
    if unencrypted.is_empty() {
        Ok(Verdict::pass("All managed devices report encryption"))
    } else {
        Ok(Verdict::warning(format!(
            "{} unencrypted device(s): {}",
            unencrypted.len(),
            sorted_list(unencrypted)
        )))
    }
}

fn open_high_alerts(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Alerts)?;
    let open: Vec<String> = snapshot
        .alerts
        .iter()
        .filter(|a| {
            !a.stale
                && a.severity == "HIGH"
                && !a.status.eq_ignore_ascii_case("closed")
                && a.end_time.is_none()
        })
        .map(|a| a.alert_type.clone())
        .collect();
    if open.is_empty() {
        Ok(Verdict::pass("No open high-severity alerts"))
    } else {
        Ok(Verdict::fail(format!(
            "{} open high-severity alert(s): {}",
            open.len(),
            sorted_list(open)
        )))
    }
}

fn super_admin_count(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::AdminRoles)?;
    let super_roles: Vec<&str> = snapshot
        .roles
        .iter()
        .filter(|r| !r.stale && r.is_super_admin)
        .map(|r| r.role_id.as_str())
        .collect();
    let mut holders: Vec<String> = snapshot
        .role_assignments
        .iter()
        .filter(|a| super_roles.contains(&a.role_id.as_str()))
        .map(|a| a.assignee.clone())
        .collect();
    holders.sort();
    holders.dedup();

    let details = format!(
        "{} super admin(s): {}",
        holders.len(),
        sorted_list(holders.clone())
    );
    // CIS recommends between 2 and 4 super admins.
    if holders.len() < 2 {
        Ok(Verdict::warning(details))
    } else if holders.len() > 4 {
        Ok(Verdict::fail(details))
    } else {
        Ok(Verdict::pass(details))
    }
}
