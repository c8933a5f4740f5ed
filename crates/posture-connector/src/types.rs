//! Normalized directory records exchanged between providers and the scanner.
//!
//! Each provider maps its native payloads into these shapes; everything
//! downstream (phase runner, snapshot store, rule engine) is provider-blind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Supported directory providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Google Workspace (Admin SDK + Alert Center).
    Workspace,
    /// Microsoft Graph cloud tenant.
    Graph,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workspace => write!(f, "workspace"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "workspace" => Ok(Self::Workspace),
            "graph" => Ok(Self::Graph),
            _ => Err(format!("Unknown provider type: {s}")),
        }
    }
}

/// One synchronization phase. Phases execute in the order declared by each
/// provider's `DirectoryProvider::categories()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCategory {
    Accounts,
    Groups,
    OauthGrants,
    Devices,
    Alerts,
    OrgUnits,
    AdminRoles,
}

impl SyncCategory {
    /// Stable name used in scan-log rows and export headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Groups => "groups",
            Self::OauthGrants => "oauth_grants",
            Self::Devices => "devices",
            Self::Alerts => "alerts",
            Self::OrgUnits => "org_units",
            Self::AdminRoles => "admin_roles",
        }
    }
}

impl fmt::Display for SyncCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accounts" => Ok(Self::Accounts),
            "groups" => Ok(Self::Groups),
            "oauth_grants" => Ok(Self::OauthGrants),
            "devices" => Ok(Self::Devices),
            "alerts" => Ok(Self::Alerts),
            "org_units" => Ok(Self::OrgUnits),
            "admin_roles" => Ok(Self::AdminRoles),
            _ => Err(format!("Unknown sync category: {s}")),
        }
    }
}

/// Risk classification for an OAuth grant, computed at mapping time from the
/// granted scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GrantRiskLevel {
    High,
    Medium,
    Low,
}

impl GrantRiskLevel {
    /// Classifies a scope list. Scopes granting mail, file, directory or
    /// admin access are high risk; any other write scope is medium.
    #[must_use]
    pub fn from_scopes(scopes: &[String]) -> Self {
        const HIGH_MARKERS: &[&str] = &[
            "admin",
            "mail.",
            "gmail",
            "drive",
            "files.readwrite",
            "directory.readwrite",
            "full_access",
        ];
        let lowered: Vec<String> = scopes.iter().map(|s| s.to_lowercase()).collect();
        if lowered
            .iter()
            .any(|s| HIGH_MARKERS.iter().any(|m| s.contains(m)))
        {
            return Self::High;
        }
        if lowered
            .iter()
            .any(|s| s.contains("write") || s.contains("manage"))
        {
            return Self::Medium;
        }
        Self::Low
    }
}

impl fmt::Display for GrantRiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

impl std::str::FromStr for GrantRiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            _ => Err(format!("Unknown risk level: {s}")),
        }
    }
}

/// Severity of a provider security alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    High,
    Medium,
    Low,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            _ => Err(format!("Unknown alert severity: {s}")),
        }
    }
}

/// Loosely structured alert description payload.
///
/// Providers return free-form nested data here; it is preserved as a tagged
/// tree and flattened only for display. `BTreeMap` keeps the rendering stable
/// across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertDetail {
    Text(String),
    List(Vec<AlertDetail>),
    Map(BTreeMap<String, AlertDetail>),
}

impl AlertDetail {
    /// Builds a detail tree from arbitrary provider JSON. Scalars become
    /// text, arrays become lists, objects become maps; nulls vanish.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Self::Text(b.to_string())),
            serde_json::Value::Number(n) => Some(Self::Text(n.to_string())),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(items) => Some(Self::List(
                items.iter().filter_map(Self::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Some(Self::Map(
                map.iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|d| (k.clone(), d)))
                    .collect(),
            )),
        }
    }

    /// Flattens the tree into a single human-readable line.
    #[must_use]
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(Self::flatten)
                .collect::<Vec<_>>()
                .join("; "),
            Self::Map(map) => map
                .iter()
                .map(|(k, v)| format!("{k}: {}", v.flatten()))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// A directory user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Provider primary identifier (email for Workspace, UPN for Graph).
    pub primary_email: String,
    pub display_name: String,
    pub is_admin: bool,
    pub is_delegated_admin: bool,
    pub suspended: bool,
    pub archived: bool,
    pub two_sv_enrolled: bool,
    pub two_sv_enforced: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub org_unit_path: Option<String>,
}

/// A directory group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Group email or object id.
    pub group_key: String,
    pub display_name: String,
    pub member_count: i64,
    pub allow_external_members: bool,
    pub who_can_join: Option<String>,
    pub who_can_post: Option<String>,
}

/// A third-party OAuth grant, aggregated per client application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRecord {
    pub client_id: String,
    pub display_text: String,
    pub scopes: Vec<String>,
    pub user_count: i64,
    /// False when the provider could not verify the application publisher.
    pub verified: bool,
    pub risk_level: GrantRiskLevel,
}

/// A managed/enrolled device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub device_type: String,
    pub model: Option<String>,
    pub os: Option<String>,
    pub approval_status: Option<String>,
    pub compromised_status: Option<String>,
    pub encryption_status: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub owner_email: Option<String>,
}

/// A provider security alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: String,
    pub alert_type: String,
    pub source: String,
    pub severity: AlertSeverity,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub detail: Option<AlertDetail>,
}

/// An organizational unit. Local annotations (risk tags/notes) are owned by
/// the snapshot store and never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgUnitRecord {
    /// Hierarchical path, the natural key.
    pub path: String,
    pub name: String,
    pub user_count: i64,
}

/// One assignment of an admin role to an assignee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignmentRecord {
    pub assignment_id: String,
    pub assignee: String,
    /// None means customer-wide; Some(path) means scoped to an org unit.
    pub scope_org_unit: Option<String>,
}

/// An administrative role with its privilege list and assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    pub role_id: String,
    pub name: String,
    pub is_super_admin: bool,
    pub is_system_role: bool,
    pub privileges: Vec<String>,
    pub assignments: Vec<RoleAssignmentRecord>,
}

/// Tagged union over every record kind a provider page can carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryRecord {
    Account(AccountRecord),
    Group(GroupRecord),
    Grant(GrantRecord),
    Device(DeviceRecord),
    Alert(AlertRecord),
    OrgUnit(OrgUnitRecord),
    Role(RoleRecord),
}

impl DirectoryRecord {
    /// The category this record belongs to.
    #[must_use]
    pub fn category(&self) -> SyncCategory {
        match self {
            Self::Account(_) => SyncCategory::Accounts,
            Self::Group(_) => SyncCategory::Groups,
            Self::Grant(_) => SyncCategory::OauthGrants,
            Self::Device(_) => SyncCategory::Devices,
            Self::Alert(_) => SyncCategory::Alerts,
            Self::OrgUnit(_) => SyncCategory::OrgUnits,
            Self::Role(_) => SyncCategory::AdminRoles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grant_risk_from_scopes() {
        let high = vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()];
        assert_eq!(GrantRiskLevel::from_scopes(&high), GrantRiskLevel::High);

        let medium = vec!["https://www.googleapis.com/auth/calendar.write".to_string()];
        assert_eq!(GrantRiskLevel::from_scopes(&medium), GrantRiskLevel::Medium);

        let low = vec!["openid".to_string(), "profile".to_string()];
        assert_eq!(GrantRiskLevel::from_scopes(&low), GrantRiskLevel::Low);
    }

    #[test]
    fn alert_detail_flatten_is_stable() {
        let value = json!({
            "zeta": ["one", "two"],
            "alpha": { "nested": 42, "flag": true },
        });
        let detail = AlertDetail::from_json(&value).unwrap();
        // Map keys render in sorted order regardless of input order.
        assert_eq!(
            detail.flatten(),
            "alpha: flag: true; nested: 42; zeta: one; two"
        );
        // Flattening twice yields the same text.
        assert_eq!(detail.flatten(), detail.flatten());
    }

    #[test]
    fn alert_detail_drops_nulls() {
        let value = json!({ "a": null, "b": "kept" });
        let detail = AlertDetail::from_json(&value).unwrap();
        assert_eq!(detail.flatten(), "b: kept");
    }

    #[test]
    fn sync_category_round_trips() {
        for c in [
            SyncCategory::Accounts,
            SyncCategory::Groups,
            SyncCategory::OauthGrants,
            SyncCategory::Devices,
            SyncCategory::Alerts,
            SyncCategory::OrgUnits,
            SyncCategory::AdminRoles,
        ] {
            assert_eq!(c.as_str().parse::<SyncCategory>().unwrap(), c);
        }
    }
}
