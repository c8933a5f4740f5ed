//! Microsoft Graph directory provider for posture
//!
//! Implements the `DirectoryProvider` contract against a cloud tenant via
//! Microsoft Graph, using OAuth2 client-credentials authentication and OData
//! pagination (`@odata.nextLink` carried as the opaque page cursor).
//!
//! Sync categories, in phase order: accounts, groups, OAuth grants, devices,
//! alerts, org units (administrative units), admin roles.

mod auth;
mod client;
mod config;
mod mappers;
mod provider;

pub use auth::TokenCache;
pub use client::GraphClient;
pub use config::{GraphConfig, GraphCredentials};
pub use provider::GraphProvider;
