//! Microsoft Graph tenant check bank.
//!
//! Mirrors the Workspace bank where the control is the same posture concern,
//! with Graph-specific predicates (compliance state, jailbreak flag, Global
//! Administrator sprawl).

use posture_connector::SyncCategory;

use super::{coverage_verdict, sorted_list, CheckDef, Verdict};
use crate::snapshot::Snapshot;

pub const CHECKS: &[CheckDef] = &[
    CheckDef {
        id: "MS-ACC-01",
        category: "accounts",
        title: "MFA registration coverage",
        eval: mfa_coverage,
    },
    CheckDef {
        id: "MS-ACC-02",
        category: "accounts",
        title: "Admins registered for MFA",
        eval: admin_mfa,
    },
    CheckDef {
        id: "MS-GRP-01",
        category: "groups",
        title: "Publicly joinable groups",
        eval: public_groups,
    },
    CheckDef {
        id: "MS-OAU-01",
        category: "oauth_grants",
        title: "High-risk application grants",
        eval: high_risk_grants,
    },
    CheckDef {
        id: "MS-OAU-02",
        category: "oauth_grants",
        title: "Grants to apps without a verified publisher",
        eval: unverified_grants,
    },
    CheckDef {
        id: "MS-DEV-01",
        category: "devices",
        title: "Noncompliant managed devices",
        eval: noncompliant_devices,
    },
    CheckDef {
        id: "MS-DEV-02",
        category: "devices",
        title: "Jailbroken or rooted devices",
        eval: jailbroken_devices,
    },
    CheckDef {
        id: "MS-ALR-01",
        category: "alerts",
        title: "Open high-severity alerts",
        eval: open_high_alerts,
    },
    CheckDef {
        id: "MS-ROL-01",
        category: "admin_roles",
        title: "Global Administrator count within recommended bounds",
        eval: global_admin_count,
    },
];

fn mfa_coverage(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Accounts)?;
    let active: Vec<_> = snapshot.active_accounts().filter(|a| !a.stale).collect();
    let registered = active.iter().filter(|a| a.two_sv_enrolled).count();
    Ok(coverage_verdict(registered, active.len(), "MFA registered"))
}

fn admin_mfa(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Accounts)?;
    let offenders: Vec<String> = snapshot
        .active_accounts()
        .filter(|a| !a.stale && a.is_admin && !a.two_sv_enrolled)
        .map(|a| a.primary_email.clone())
        .collect();
    if offenders.is_empty() {
        Ok(Verdict::pass("All active admins are registered for MFA"))
    } else {
        Ok(Verdict::fail(format!(
            "{} admin account(s) without MFA: {}",
            offenders.len(),
            sorted_list(offenders)
        )))
    }
}

fn public_groups(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Groups)?;
    let public: Vec<String> = snapshot
        .groups
        .iter()
        .filter(|g| !g.stale && g.allow_external_members)
        .map(|g| g.display_name.clone())
        .collect();
    if public.is_empty() {
        Ok(Verdict::pass("No group has public visibility"))
    } else {
        Ok(Verdict::warning(format!(
            "{} group(s) with public visibility: {}",
            public.len(),
            sorted_list(public)
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
        Ok(Verdict::pass("No high-risk application grants"))
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
        Ok(Verdict::pass(
            "All granted applications have a verified publisher",
        ))
    } else {
        Ok(Verdict::warning(format!(
            "{} grant(s) to apps without a verified publisher: {}",
            unverified.len(),
            sorted_list(unverified)
        )))
    }
}

fn noncompliant_devices(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Devices)?;
    let noncompliant: Vec<String> = snapshot
        .devices
        .iter()
        .filter(|d| {
            !d.stale
                && d.approval_status
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case("noncompliant"))
        })
        .map(|d| d.device_id.clone())
        .collect();
    if noncompliant.is_empty() {
        Ok(Verdict::pass("All managed devices are compliant"))
    } else {
        Ok(Verdict::fail(format!(
            "{} noncompliant device(s): {}",
            noncompliant.len(),
            sorted_list(noncompliant)
        )))
    }
}

fn jailbroken_devices(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::Devices)?;
    let jailbroken: Vec<String> = snapshot
        .devices
        .iter()
        .filter(|d| {
            !d.stale
                && d.compromised_status
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case("true"))
        })
        .map(|d| d.device_id.clone())
        .collect();
    if jailbroken.is_empty() {
        Ok(Verdict::pass("No device reports jailbreak or root"))
    } else {
        Ok(Verdict::fail(format!(
            "{} jailbroken device(s): {}",
            jailbroken.len(),
            sorted_list(jailbroken)
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
                && !a.status.eq_ignore_ascii_case("resolved")
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

fn global_admin_count(snapshot: &Snapshot) -> Result<Verdict, String> {
    snapshot.require(SyncCategory::AdminRoles)?;
    let global_roles: Vec<&str> = snapshot
        .roles
        .iter()
        .filter(|r| !r.stale && r.is_super_admin)
        .map(|r| r.role_id.as_str())
        .collect();
    let mut holders: Vec<String> = snapshot
        .role_assignments
        .iter()
        .filter(|a| global_roles.contains(&a.role_id.as_str()))
        .map(|a| a.assignee.clone())
        .collect();
    holders.sort();
    holders.dedup();

    let details = format!(
        "{} Global Administrator(s): {}",
        holders.len(),
        sorted_list(holders.clone())
    );
    if holders.len() < 2 {
        Ok(Verdict::warning(details))
    } else if holders.len() > 4 {
        Ok(Verdict::fail(details))
    } else {
        Ok(Verdict::pass(details))
    }
}
