//! Directory Connector Contract for posture
//!
//! Defines the provider-agnostic capability interface that the scan
//! orchestrator consumes: paginated listing of security-relevant directory
//! state (accounts, groups, OAuth grants, devices, alerts, org units, admin
//! roles) plus a cheap credential-verification call.
//!
//! Concrete implementations live in `posture-connector-workspace` (Google
//! Workspace Admin SDK) and `posture-connector-graph` (Microsoft Graph).

mod backoff;
mod error;
mod sanitize;
mod traits;
mod types;

pub use backoff::RetryPolicy;
pub use error::{ConnectorError, ConnectorResult};
pub use sanitize::sanitize_credential_text;
pub use traits::{DirectoryProvider, PageCursor, RecordPage};
pub use types::{
    AccountRecord, AlertDetail, AlertRecord, AlertSeverity, DeviceRecord, DirectoryRecord,
    GrantRecord, GrantRiskLevel, GroupRecord, OrgUnitRecord, ProviderType, RoleAssignmentRecord,
    RoleRecord, SyncCategory,
};
