//! Database models.
//!
//! Snapshot mirror tables carry a `stale` flag instead of ever being deleted
//! by sync; `scan_runs` and `compliance_checks` are append-only.

pub mod admin_role;
pub mod compliance_check;
pub mod directory_account;
pub mod directory_group;
pub mod managed_device;
pub mod oauth_grant;
pub mod org_unit;
pub mod provider_credential;
pub mod scan_run;
pub mod security_alert;

pub use admin_role::{AdminRole, RoleAssignment};
pub use compliance_check::{CheckStatus, ComplianceCheck, NewComplianceCheck};
pub use directory_account::DirectoryAccount;
pub use directory_group::DirectoryGroup;
pub use managed_device::ManagedDevice;
pub use oauth_grant::OAuthGrant;
pub use org_unit::OrgUnit;
pub use provider_credential::ProviderCredential;
pub use scan_run::{ScanRun, ScanStatus};
pub use security_alert::SecurityAlert;

use serde::{Deserialize, Serialize};

/// Inserted/updated row counts returned by batch upserts, recorded per phase
/// for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertCounts {
    /// Merge counts from another batch.
    pub fn absorb(&mut self, other: UpsertCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}
