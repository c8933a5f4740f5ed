//! Google Workspace directory provider for posture
//!
//! Implements the `DirectoryProvider` contract against the Admin SDK
//! Directory API, Groups Settings API and Alert Center API, using a service
//! account with domain-wide delegation (JWT-bearer grant impersonating a
//! Workspace admin).
//!
//! Sync categories, in phase order: accounts, groups, OAuth grants, devices,
//! alerts, org units, admin roles.

mod auth;
mod client;
mod config;
mod mappers;
mod provider;

pub use auth::TokenCache;
pub use client::AdminClient;
pub use config::{ServiceAccountKey, WorkspaceConfig};
pub use provider::WorkspaceProvider;

/// OAuth scopes requested for the delegated admin identity. Read-only
/// everywhere; the scanner never mutates remote state.
pub const WORKSPACE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/admin.directory.user.readonly",
    "https://www.googleapis.com/auth/admin.directory.group.readonly",
    "https://www.googleapis.com/auth/admin.directory.device.mobile.readonly",
    "https://www.googleapis.com/auth/admin.directory.orgunit.readonly",
    "https://www.googleapis.com/auth/admin.directory.rolemanagement.readonly",
    "https://www.googleapis.com/auth/admin.directory.user.security",
    "https://www.googleapis.com/auth/apps.groups.settings",
    "https://www.googleapis.com/auth/apps.alerts",
];
