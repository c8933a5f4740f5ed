//! Compliance rule engine.
//!
//! A fixed, code-defined check bank per provider. Every registered check is
//! evaluated against the snapshot and recorded — an evaluation error becomes
//! an ERROR verdict, never a dropped row. Verdicts are a pure function of the
//! snapshot: the only clock available is `Snapshot::as_of` and all listings
//! are rendered in sorted order, so identical snapshots produce identical
//! verdict rows.

pub mod tenant;
pub mod workspace;

use posture_connector::ProviderType;
use posture_db::models::{CheckStatus, NewComplianceCheck};

use crate::snapshot::Snapshot;

/// The outcome of one check evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: CheckStatus,
    pub details: String,
}

impl Verdict {
    pub fn pass(details: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Pass,
            details: details.into(),
        }
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Fail,
            details: details.into(),
        }
    }

    pub fn warning(details: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warning,
            details: details.into(),
        }
    }
}

/// One registered compliance check.
pub struct CheckDef {
    pub id: &'static str,
    pub category: &'static str,
    pub title: &'static str,
    pub eval: fn(&Snapshot) -> Result<Verdict, String>,
}

/// The check bank for a provider.
#[must_use]
pub fn checks_for(provider: ProviderType) -> &'static [CheckDef] {
    match provider {
        ProviderType::Workspace => workspace::CHECKS,
        ProviderType::Graph => tenant::CHECKS,
    }
}

/// Evaluates the full bank for a provider in stable (category, id) order.
#[must_use]
pub fn run_checks(provider: ProviderType, snapshot: &Snapshot) -> Vec<NewComplianceCheck> {
    let mut defs: Vec<&CheckDef> = checks_for(provider).iter().collect();
    defs.sort_by_key(|d| (d.category, d.id));

    defs.into_iter()
        .map(|def| {
            let (status, details) = match (def.eval)(snapshot) {
                Ok(verdict) => (verdict.status, verdict.details),
                Err(message) => (CheckStatus::Error, message),
            };
            NewComplianceCheck {
                check_id: def.id.to_string(),
                category: def.category.to_string(),
                title: def.title.to_string(),
                status,
                details,
            }
        })
        .collect()
}

/// Coverage verdict shared by the 2SV/MFA checks: PASS at 80%, WARNING at
/// 50%, FAIL below. An organization with no active accounts passes.
fn coverage_verdict(covered: usize, active: usize, label: &str) -> Verdict {
    if active == 0 {
        return Verdict::pass(format!("No active accounts to evaluate for {label}"));
    }
    let pct = covered as f64 / active as f64 * 100.0;
    let details = format!("{covered} of {active} active accounts ({pct:.1}%) have {label}");
    if pct >= 80.0 {
        Verdict::pass(details)
    } else if pct >= 50.0 {
        Verdict::warning(details)
    } else {
        Verdict::fail(details)
    }
}

/// Sorted, comma-joined listing for deterministic details strings.
fn sorted_list(mut items: Vec<String>) -> String {
    items.sort();
    items.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use posture_db::models::CheckStatus;

    #[test]
    fn coverage_thresholds() {
        assert_eq!(coverage_verdict(72, 80, "2SV").status, CheckStatus::Pass);
        assert_eq!(coverage_verdict(40, 80, "2SV").status, CheckStatus::Warning);
        assert_eq!(coverage_verdict(10, 80, "2SV").status, CheckStatus::Fail);
        assert_eq!(coverage_verdict(0, 0, "2SV").status, CheckStatus::Pass);
    }

    #[test]
    fn coverage_details_are_stable() {
        let a = coverage_verdict(72, 80, "2SV enrollment");
        let b = coverage_verdict(72, 80, "2SV enrollment");
        assert_eq!(a.details, b.details);
        assert!(a.details.contains("90.0%"));
    }

    #[test]
    fn listings_sort() {
        let list = sorted_list(vec!["zoe@x".into(), "amy@x".into()]);
        assert_eq!(list, "amy@x, zoe@x");
    }
}
