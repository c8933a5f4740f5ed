//! `DirectoryProvider` implementation for Microsoft Graph.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use posture_connector::{
    ConnectorError, ConnectorResult, DirectoryProvider, DirectoryRecord, PageCursor, ProviderType,
    RecordPage, SyncCategory,
};

use crate::auth::TokenCache;
use crate::client::GraphClient;
use crate::config::GraphConfig;
use crate::mappers::{self, MfaRegistration};

/// Phase order for Graph tenant scans.
const CATEGORIES: &[SyncCategory] = &[
    SyncCategory::Accounts,
    SyncCategory::Groups,
    SyncCategory::OauthGrants,
    SyncCategory::Devices,
    SyncCategory::Alerts,
    SyncCategory::OrgUnits,
    SyncCategory::AdminRoles,
];

const USER_SELECT: &str = "id,userPrincipalName,displayName,accountEnabled,signInActivity";

/// Microsoft Graph directory provider.
pub struct GraphProvider {
    config: GraphConfig,
    client: GraphClient,
    /// MFA registration report, fetched once per provider instance and
    /// joined into every accounts page.
    registration: OnceCell<BTreeMap<String, MfaRegistration>>,
}

impl GraphProvider {
    /// Creates a provider from parsed configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Config` if the HTTP client cannot be built.
    pub fn new(config: GraphConfig) -> ConnectorResult<Self> {
        let token_cache = Arc::new(TokenCache::new(config.clone()));
        let client = GraphClient::new(token_cache)?;
        Ok(Self {
            config,
            client,
            registration: OnceCell::new(),
        })
    }

    fn items<'a>(body: &'a Value) -> &'a [Value] {
        body.get("value")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn next_cursor(body: &Value) -> Option<PageCursor> {
        body.get("@odata.nextLink")
            .and_then(Value::as_str)
            .map(|l| PageCursor(l.to_string()))
    }

    /// Cursors carry the absolute `@odata.nextLink` URL from the previous
    /// page; anything that does not parse is rejected before a request goes
    /// out.
    fn validated_link(link: &str) -> ConnectorResult<String> {
        Ok(url::Url::parse(link)?.into())
    }

    /// Pages an OData listing to exhaustion, collecting every item.
    async fn collect_all(&self, first_url: String) -> ConnectorResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut url = first_url;
        loop {
            let body = self.client.get_json(&url).await?;
            items.extend(Self::items(&body).iter().cloned());
            match body.get("@odata.nextLink").and_then(Value::as_str) {
                Some(next) => url = Self::validated_link(next)?,
                None => break,
            }
        }
        Ok(items)
    }

    async fn registration_map(&self) -> ConnectorResult<&BTreeMap<String, MfaRegistration>> {
        self.registration
            .get_or_try_init(|| async {
                let url = format!(
                    "{}/reports/authenticationMethods/userRegistrationDetails",
                    self.config.graph_base_url
                );
                match self.collect_all(url).await {
                    Ok(items) => Ok(mappers::registration_map(&items)),
                    // An unlicensed reports workload degrades to "no MFA
                    // data" instead of failing the accounts phase.
                    Err(ConnectorError::Unsupported(msg)) => {
                        warn!(error = %msg, "MFA registration report unavailable");
                        Ok(BTreeMap::new())
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn fetch_accounts(&self, cursor: Option<PageCursor>) -> ConnectorResult<RecordPage> {
        let registration = self.registration_map().await?;
        let url = match cursor {
            Some(PageCursor(link)) => Self::validated_link(&link)?,
            None => format!(
                "{}/users?$select={USER_SELECT}&$top=999",
                self.config.graph_base_url
            ),
        };
        let body = self.client.get_json(&url).await?;

        let mut records = Vec::new();
        for user in Self::items(&body) {
            let reg = user
                .get("userPrincipalName")
                .and_then(Value::as_str)
                .and_then(|upn| registration.get(upn));
            records.push(DirectoryRecord::Account(mappers::map_account(user, reg)?));
        }
        Ok(RecordPage {
            records,
            next: Self::next_cursor(&body),
        })
    }

    async fn fetch_groups(&self, cursor: Option<PageCursor>) -> ConnectorResult<RecordPage> {
        let url = match cursor {
            Some(PageCursor(link)) => Self::validated_link(&link)?,
            None => format!(
                "{}/groups?$select=id,displayName,mail,visibility&$top=999",
                self.config.graph_base_url
            ),
        };
        let body = self.client.get_json(&url).await?;

        let mut records = Vec::new();
        for group in Self::items(&body) {
            let member_count = match group.get("id").and_then(Value::as_str) {
                Some(id) => {
                    let count_url =
                        format!("{}/groups/{id}/members/$count", self.config.graph_base_url);
                    match self.client.get_count(&count_url).await {
                        Ok(n) => n,
                        Err(e) => {
                            warn!(group = id, error = %e, "Member count unavailable");
                            0
                        }
                    }
                }
                None => 0,
            };
            records.push(DirectoryRecord::Group(mappers::map_group(group, member_count)?));
        }
        Ok(RecordPage {
            records,
            next: Self::next_cursor(&body),
        })
    }

    /// Permission grants are aggregated per client service principal and
    /// returned as a single terminal page.
    async fn fetch_grants(&self) -> ConnectorResult<RecordPage> {
        let grants = self
            .collect_all(format!(
                "{}/oauth2PermissionGrants?$top=999",
                self.config.graph_base_url
            ))
            .await?;

        let mut names: BTreeMap<String, (String, bool)> = BTreeMap::new();
        for grant in &grants {
            let Some(client_id) = grant.get("clientId").and_then(Value::as_str) else {
                continue;
            };
            if names.contains_key(client_id) {
                continue;
            }
            let sp_url = format!(
                "{}/servicePrincipals/{client_id}?$select=displayName,verifiedPublisher",
                self.config.graph_base_url
            );
            let entry = match self.client.get_json(&sp_url).await {
                Ok(sp) => {
                    let name = sp
                        .get("displayName")
                        .and_then(Value::as_str)
                        .unwrap_or(client_id)
                        .to_string();
                    let verified = sp
                        .get("verifiedPublisher")
                        .and_then(|v| v.get("verifiedPublisherId"))
                        .and_then(Value::as_str)
                        .is_some();
                    (name, verified)
                }
                Err(e) => {
                    warn!(client = client_id, error = %e, "Service principal lookup failed");
                    (client_id.to_string(), false)
                }
            };
            names.insert(client_id.to_string(), entry);
        }

        let records = mappers::aggregate_grants(&grants, &names)
            .into_iter()
            .map(DirectoryRecord::Grant)
            .collect();
        Ok(RecordPage {
            records,
            next: None,
        })
    }

    async fn fetch_devices(&self, cursor: Option<PageCursor>) -> ConnectorResult<RecordPage> {
        let url = match cursor {
            Some(PageCursor(link)) => Self::validated_link(&link)?,
            None => format!(
                "{}/deviceManagement/managedDevices?$top=100",
                self.config.graph_base_url
            ),
        };
        let body = self.client.get_json(&url).await?;

        let mut records = Vec::new();
        for device in Self::items(&body) {
            records.push(DirectoryRecord::Device(mappers::map_device(device)?));
        }
        Ok(RecordPage {
            records,
            next: Self::next_cursor(&body),
        })
    }

    async fn fetch_alerts(&self, cursor: Option<PageCursor>) -> ConnectorResult<RecordPage> {
        let url = match cursor {
            Some(PageCursor(link)) => Self::validated_link(&link)?,
            None => format!("{}/security/alerts_v2?$top=100", self.config.graph_base_url),
        };
        let body = self.client.get_json(&url).await?;

        let mut records = Vec::new();
        for alert in Self::items(&body) {
            records.push(DirectoryRecord::Alert(mappers::map_alert(alert)?));
        }
        Ok(RecordPage {
            records,
            next: Self::next_cursor(&body),
        })
    }

    async fn fetch_org_units(&self, cursor: Option<PageCursor>) -> ConnectorResult<RecordPage> {
        let url = match cursor {
            Some(PageCursor(link)) => Self::validated_link(&link)?,
            None => format!(
                "{}/directory/administrativeUnits?$top=100",
                self.config.graph_base_url
            ),
        };
        let body = self.client.get_json(&url).await?;

        let mut records = Vec::new();
        for unit in Self::items(&body) {
            let user_count = match unit.get("id").and_then(Value::as_str) {
                Some(id) => {
                    let count_url = format!(
                        "{}/directory/administrativeUnits/{id}/members/$count",
                        self.config.graph_base_url
                    );
                    self.client.get_count(&count_url).await.unwrap_or(0)
                }
                None => 0,
            };
            records.push(DirectoryRecord::OrgUnit(mappers::map_org_unit(unit, user_count)?));
        }
        Ok(RecordPage {
            records,
            next: Self::next_cursor(&body),
        })
    }

    /// Role definitions and assignments are joined client-side and returned
    /// as a single terminal page.
    async fn fetch_admin_roles(&self) -> ConnectorResult<RecordPage> {
        let assignments = self
            .collect_all(format!(
                "{}/roleManagement/directory/roleAssignments?$top=999",
                self.config.graph_base_url
            ))
            .await?;

        let mut by_role: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for item in &assignments {
            if let Some((role_id, assignment)) = mappers::map_role_assignment(item) {
                by_role.entry(role_id).or_default().push(assignment);
            }
        }

        let definitions = self
            .collect_all(format!(
                "{}/roleManagement/directory/roleDefinitions?$top=100",
                self.config.graph_base_url
            ))
            .await?;

        let mut records = Vec::new();
        for role in &definitions {
            let assignments = role
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| by_role.remove(id))
                .unwrap_or_default();
            records.push(DirectoryRecord::Role(mappers::map_role(role, assignments)?));
        }
        Ok(RecordPage {
            records,
            next: None,
        })
    }
}

#[async_trait]
impl DirectoryProvider for GraphProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Graph
    }

    fn display_name(&self) -> &str {
        "Microsoft Graph"
    }

    fn categories(&self) -> &'static [SyncCategory] {
        CATEGORIES
    }

    #[instrument(skip(self))]
    async fn verify_credentials(&self) -> ConnectorResult<()> {
        let url = format!(
            "{}/users?$select=id&$top=1",
            self.config.graph_base_url
        );
        self.client.get_json(&url).await?;
        debug!("Graph credentials verified");
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
            SyncCategory::OrgUnits => self.fetch_org_units(cursor).await,
            SyncCategory::AdminRoles => self.fetch_admin_roles().await,
        }
    }
}

impl std::fmt::Debug for GraphProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphProvider")
            .field("tenant_id", &self.config.credentials.tenant_id)
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
        assert_eq!(CATEGORIES[2], SyncCategory::OauthGrants);
    }
}
