//! Read-only view over the just-synced snapshot tables.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use posture_connector::SyncCategory;
use posture_db::models::{
    AdminRole, DirectoryAccount, DirectoryGroup, ManagedDevice, OAuthGrant, OrgUnit,
    RoleAssignment, SecurityAlert,
};

/// Everything the rule engine may look at for one organization.
///
/// `as_of` is the run's start time and the only clock checks are allowed to
/// consult; together with the mirrored rows it makes verdicts a pure function
/// of the snapshot. `phase_errors` carries the recorded failure of any phase
/// that did not sync, so dependent checks can report ERROR instead of a
/// misleading PASS/FAIL.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub org_id: Uuid,
    pub as_of: Option<DateTime<Utc>>,
    pub accounts: Vec<DirectoryAccount>,
    pub groups: Vec<DirectoryGroup>,
    pub grants: Vec<OAuthGrant>,
    pub devices: Vec<ManagedDevice>,
    pub alerts: Vec<SecurityAlert>,
    pub org_units: Vec<OrgUnit>,
    pub roles: Vec<AdminRole>,
    pub role_assignments: Vec<RoleAssignment>,
    pub phase_errors: BTreeMap<SyncCategory, String>,
}

impl Snapshot {
    /// Fails with the recorded phase error when `category` did not sync.
    pub fn require(&self, category: SyncCategory) -> Result<(), String> {
        match self.phase_errors.get(&category) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Accounts that are neither suspended nor archived.
    #[must_use]
    pub fn active_accounts(&self) -> impl Iterator<Item = &DirectoryAccount> {
        self.accounts.iter().filter(|a| !a.suspended && !a.archived)
    }
}
