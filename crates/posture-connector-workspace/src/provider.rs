//! `DirectoryProvider` implementation for Google Workspace.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use posture_connector::{
    ConnectorError, ConnectorResult, DirectoryProvider, DirectoryRecord, PageCursor, ProviderType,
    RecordPage, SyncCategory,
};

use crate::auth::TokenCache;
use crate::client::AdminClient;
use crate::config::WorkspaceConfig;
use crate::mappers;

/// Phase order for Workspace scans.
const CATEGORIES: &[SyncCategory] = &[
    SyncCategory::Accounts,
    SyncCategory::Groups,
    SyncCategory::OauthGrants,
    SyncCategory::Devices,
    SyncCategory::Alerts,
    SyncCategory::OrgUnits,
    SyncCategory::AdminRoles,
];

/// Google Workspace directory provider.
pub struct WorkspaceProvider {
    config: WorkspaceConfig,
    client: AdminClient,
}

impl WorkspaceProvider {
    /// Creates a provider from parsed configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Config` if the HTTP client cannot be built.
    pub fn new(config: WorkspaceConfig) -> ConnectorResult<Self> {
        let token_cache = Arc::new(TokenCache::new(config.clone()));
        let client = AdminClient::new(token_cache)?;
        Ok(Self { config, client })
    }

    fn items<'a>(body: &'a Value, key: &str) -> &'a [Value] {
        body.get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn next_cursor(body: &Value) -> Option<PageCursor> {
        body.get("nextPageToken")
            .and_then(Value::as_str)
            .map(|t| PageCursor(t.to_string()))
    }

    async fn fetch_accounts(&self, cursor: Option<PageCursor>) -> ConnectorResult<RecordPage> {
        let mut url = format!(
            "{}/users?customer={}&maxResults=500&projection=full",
            self.config.directory_base_url, self.config.customer_id
        );
        if let Some(PageCursor(token)) = cursor {
            url.push_str(&format!("&pageToken={token}"));
        }
        let body = self.client.get_json(&url).await?;

        let mut records = Vec::new();
        for user in Self::items(&body, "users") {
            records.push(DirectoryRecord::Account(mappers::map_account(user)?));
        }
        Ok(RecordPage {
            records,
            next: Self::next_cursor(&body),
        })
    }

    async fn fetch_groups(&self, cursor: Option<PageCursor>) -> ConnectorResult<RecordPage> {
        let mut url = format!(
            "{}/groups?customer={}&maxResults=200",
            self.config.directory_base_url, self.config.customer_id
        );
        if let Some(PageCursor(token)) = cursor {
            url.push_str(&format!("&pageToken={token}"));
        }
        let body = self.client.get_json(&url).await?;

        let mut records = Vec::new();
        for group in Self::items(&body, "groups") {
            let settings = match group.get("email").and_then(Value::as_str) {
                Some(email) => {
                    let settings_url =
                        format!("{}/{}?alt=json", self.config.groups_settings_base_url, email);
                    match self.client.get_json(&settings_url).await {
                        Ok(v) => Some(v),
                        Err(e) => {
                            // Missing settings degrade to closed defaults.
                            warn!(group = email, error = %e, "Group settings unavailable");
                            None
                        }
                    }
                }
                None => None,
            };
            records.push(DirectoryRecord::Group(mappers::map_group(
                group,
                settings.as_ref(),
            )?));
        }
        Ok(RecordPage {
            records,
            next: Self::next_cursor(&body),
        })
    }

    /// Token listings are per-user, so grants are aggregated across the whole
    /// user population and returned as a single terminal page.
    async fn fetch_grants(&self) -> ConnectorResult<RecordPage> {
        let mut user_tokens: Vec<(String, Vec<Value>)> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/users?customer={}&maxResults=500&fields=users(primaryEmail),nextPageToken",
                self.config.directory_base_url, self.config.customer_id
            );
            if let Some(ref token) = page_token {
                url.push_str(&format!("&pageToken={token}"));
            }
            let body = self.client.get_json(&url).await?;

            for user in Self::items(&body, "users") {
                let Some(email) = user.get("primaryEmail").and_then(Value::as_str) else {
                    continue;
                };
                let tokens_url =
                    format!("{}/users/{}/tokens", self.config.directory_base_url, email);
                let tokens = self.client.get_json(&tokens_url).await?;
                let items = Self::items(&tokens, "items").to_vec();
                user_tokens.push((email.to_string(), items));
            }

            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        let records = mappers::aggregate_grants(&user_tokens)
            .into_iter()
            .map(DirectoryRecord::Grant)
            .collect();
        Ok(RecordPage {
            records,
            next: None,
        })
    }

    async fn fetch_devices(&self, cursor: Option<PageCursor>) -> ConnectorResult<RecordPage> {
        let mut url = format!(
            "{}/customer/{}/devices/mobile?maxResults=100",
            self.config.directory_base_url, self.config.customer_id
        );
        if let Some(PageCursor(token)) = cursor {
            url.push_str(&format!("&pageToken={token}"));
        }
        let body = self.client.get_json(&url).await?;

        let mut records = Vec::new();
        for device in Self::items(&body, "mobiledevices") {
            records.push(DirectoryRecord::Device(mappers::map_device(device)?));
        }
        Ok(RecordPage {
            records,
            next: Self::next_cursor(&body),
        })
    }

    async fn fetch_alerts(&self, cursor: Option<PageCursor>) -> ConnectorResult<RecordPage> {
        let mut url = format!("{}/alerts?pageSize=100", self.config.alert_center_base_url);
        if let Some(PageCursor(token)) = cursor {
            url.push_str(&format!("&pageToken={token}"));
        }
        let body = self.client.get_json(&url).await?;

        let mut records = Vec::new();
        for alert in Self::items(&body, "alerts") {
            records.push(DirectoryRecord::Alert(mappers::map_alert(alert)?));
        }
        Ok(RecordPage {
            records,
            next: Self::next_cursor(&body),
        })
    }

    /// Org units arrive in one listing; user counts are tallied from a
    /// lightweight pass over the user population.
    async fn fetch_org_units(&self) -> ConnectorResult<RecordPage> {
        let url = format!(
            "{}/customer/{}/orgunits?type=all",
            self.config.directory_base_url, self.config.customer_id
        );
        let body = self.client.get_json(&url).await?;

        let mut counts: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut users_url = format!(
                "{}/users?customer={}&maxResults=500&fields=users(orgUnitPath),nextPageToken",
                self.config.directory_base_url, self.config.customer_id
            );
            if let Some(ref token) = page_token {
                users_url.push_str(&format!("&pageToken={token}"));
            }
            let users = self.client.get_json(&users_url).await?;
            for user in Self::items(&users, "users") {
                if let Some(path) = user.get("orgUnitPath").and_then(Value::as_str) {
                    *counts.entry(path.to_string()).or_insert(0) += 1;
                }
            }
            page_token = users
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        let mut records = Vec::new();
        for unit in Self::items(&body, "organizationUnits") {
            let count = unit
                .get("orgUnitPath")
                .and_then(Value::as_str)
                .and_then(|p| counts.get(p).copied())
                .unwrap_or(0);
            records.push(DirectoryRecord::OrgUnit(mappers::map_org_unit(unit, count)?));
        }
        Ok(RecordPage {
            records,
            next: None,
        })
    }

    /// Roles and their assignments are joined client-side and returned as a
    /// single terminal page.
    async fn fetch_admin_roles(&self) -> ConnectorResult<RecordPage> {
        let mut assignments_by_role: std::collections::HashMap<String, Vec<_>> =
            std::collections::HashMap::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = format!(
                "{}/customer/{}/roleassignments?maxResults=200",
                self.config.directory_base_url, self.config.customer_id
            );
            if let Some(ref token) = page_token {
                url.push_str(&format!("&pageToken={token}"));
            }
            let body = self.client.get_json(&url).await?;
            for item in Self::items(&body, "items") {
                let role_id = item.get("roleId").map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                if let (Some(role_id), Some(assignment)) =
                    (role_id, mappers::map_role_assignment(item))
                {
                    assignments_by_role.entry(role_id).or_default().push(assignment);
                }
            }
            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = format!(
                "{}/customer/{}/roles?maxResults=100",
                self.config.directory_base_url, self.config.customer_id
            );
            if let Some(ref token) = page_token {
                url.push_str(&format!("&pageToken={token}"));
            }
            let body = self.client.get_json(&url).await?;
            for role in Self::items(&body, "items") {
                let role_id = role.get("roleId").map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                let assignments = role_id
                    .and_then(|id| assignments_by_role.remove(&id))
                    .unwrap_or_default();
                records.push(DirectoryRecord::Role(mappers::map_role(role, assignments)?));
            }
            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        Ok(RecordPage {
            records,
            next: None,
        })
    }
}

#[async_trait]
impl DirectoryProvider for WorkspaceProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Workspace
    }

    fn display_name(&self) -> &str {
        "Google Workspace"
    }

    fn categories(&self) -> &'static [SyncCategory] {
        CATEGORIES
    }

    #[instrument(skip(self))]
    async fn verify_credentials(&self) -> ConnectorResult<()> {
        let url = format!(
            "{}/users?customer={}&maxResults=1",
            self.config.directory_base_url, self.config.customer_id
        );
        self.client.get_json(&url).await?;
        debug!("Workspace credentials verified");
        Ok(())
    }

    async fn fetch_page(
        &self,
        category: SyncCategory,
        cursor: Option<PageCursor>,
    ) -> ConnectorResult<RecordPage> {
        match category {
            SyncCategory::Accounts => self.fetch_accounts(cursor).await,
            SyncCategory::Groups => self.fetch_groups(cursor).await,
            SyncCategory::OauthGrants => self.fetch_grants().await,
            SyncCategory::Devices => self.fetch_devices(cursor).await,
            SyncCategory::Alerts => self.fetch_alerts(cursor).await,
            SyncCategory::OrgUnits => self.fetch_org_units().await,
            SyncCategory::AdminRoles => self.fetch_admin_roles().await,
        }
    }
}

impl std::fmt::Debug for WorkspaceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceProvider")
            .field("customer_id", &self.config.customer_id)
            .field("admin_email", &self.config.admin_email)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_is_fixed() {
        assert_eq!(CATEGORIES.len(), 7);
        assert_eq!(CATEGORIES[0], SyncCategory::Accounts);
        assert_eq!(CATEGORIES[6], SyncCategory::AdminRoles);
    }
}
