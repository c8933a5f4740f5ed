//! Mapping from Graph payloads to normalized records.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use posture_connector::{
    AccountRecord, AlertDetail, AlertRecord, AlertSeverity, ConnectorError, ConnectorResult,
    DeviceRecord, GrantRecord, GrantRiskLevel, GroupRecord, OrgUnitRecord, RoleAssignmentRecord,
    RoleRecord,
};

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

fn time_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// MFA registration state per user, prefetched from the authentication
/// methods report and joined into the user listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MfaRegistration {
    pub is_admin: bool,
    pub mfa_registered: bool,
    pub mfa_capable: bool,
}

/// Parses the registration report into a map keyed by user principal name.
pub fn registration_map(items: &[Value]) -> BTreeMap<String, MfaRegistration> {
    items
        .iter()
        .filter_map(|item| {
            let upn = str_field(item, "userPrincipalName")?;
            Some((
                upn,
                MfaRegistration {
                    is_admin: item.get("isAdmin").and_then(Value::as_bool).unwrap_or(false),
                    mfa_registered: item
                        .get("isMfaRegistered")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    mfa_capable: item
                        .get("isMfaCapable")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                },
            ))
        })
        .collect()
}

/// Maps one entry from `/users`.
pub fn map_account(
    value: &Value,
    registration: Option<&MfaRegistration>,
) -> ConnectorResult<AccountRecord> {
    let upn = str_field(value, "userPrincipalName").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "User entry missing userPrincipalName".to_string(),
    })?;
    let reg = registration.copied().unwrap_or_default();

    Ok(AccountRecord {
        primary_email: upn,
        display_name: str_field(value, "displayName").unwrap_or_default(),
        is_admin: reg.is_admin,
        is_delegated_admin: false,
        suspended: !value
            .get("accountEnabled")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        archived: false,
        two_sv_enrolled: reg.mfa_registered,
        two_sv_enforced: reg.mfa_registered && reg.mfa_capable,
        last_login: value
            .get("signInActivity")
            .and_then(|v| v.get("lastSignInDateTime"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        org_unit_path: None,
    })
}

/// Maps one entry from `/groups` with a separately fetched member count.
pub fn map_group(value: &Value, member_count: i64) -> ConnectorResult<GroupRecord> {
    let id = str_field(value, "id").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "Group entry missing id".to_string(),
    })?;
    let visibility = str_field(value, "visibility");

    Ok(GroupRecord {
        group_key: str_field(value, "mail").unwrap_or(id),
        display_name: str_field(value, "displayName").unwrap_or_default(),
        member_count,
        // Public groups are joinable/readable tenant-wide, the closest
        // analogue to external membership exposure.
        allow_external_members: visibility.as_deref() == Some("Public"),
        who_can_join: visibility,
        who_can_post: None,
    })
}

/// Aggregates `/oauth2PermissionGrants` entries by client service principal.
/// `names` maps service-principal ids to (display name, verified publisher).
pub fn aggregate_grants(
    grants: &[Value],
    names: &BTreeMap<String, (String, bool)>,
) -> Vec<GrantRecord> {
    struct Agg {
        scopes: Vec<String>,
        user_count: i64,
    }

    let mut by_client: BTreeMap<String, Agg> = BTreeMap::new();
    for grant in grants {
        let Some(client_id) = str_field(grant, "clientId") else {
            continue;
        };
        let scopes: Vec<String> = str_field(grant, "scope")
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect();
        let principal_grant = str_field(grant, "consentType").as_deref() == Some("Principal");

        let entry = by_client.entry(client_id).or_insert_with(|| Agg {
            scopes: Vec::new(),
            user_count: 0,
        });
        if principal_grant {
            entry.user_count += 1;
        }
        for s in scopes {
            if !entry.scopes.contains(&s) {
                entry.scopes.push(s);
            }
        }
    }

    by_client
        .into_iter()
        .map(|(client_id, agg)| {
            let (display_text, verified) = names
                .get(&client_id)
                .cloned()
                .unwrap_or_else(|| (client_id.clone(), false));
            let mut scopes = agg.scopes;
            scopes.sort();
            let risk_level = GrantRiskLevel::from_scopes(&scopes);
            GrantRecord {
                client_id,
                display_text,
                scopes,
                user_count: agg.user_count,
                verified,
                risk_level,
            }
        })
        .collect()
}

/// Maps one entry from `/deviceManagement/managedDevices`.
pub fn map_device(value: &Value) -> ConnectorResult<DeviceRecord> {
    let device_id = str_field(value, "id").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "Device entry missing id".to_string(),
    })?;
    let encrypted = value.get("isEncrypted").and_then(Value::as_bool);

    Ok(DeviceRecord {
        device_id,
        device_type: str_field(value, "operatingSystem").unwrap_or_default(),
        model: str_field(value, "model"),
        os: str_field(value, "osVersion"),
        approval_status: str_field(value, "complianceState"),
        compromised_status: str_field(value, "jailBroken"),
        encryption_status: encrypted.map(|e| {
            if e {
                "encrypted".to_string()
            } else {
                "notEncrypted".to_string()
            }
        }),
        last_sync: time_field(value, "lastSyncDateTime"),
        owner_email: str_field(value, "userPrincipalName"),
    })
}

/// Maps one entry from `/security/alerts_v2`.
pub fn map_alert(value: &Value) -> ConnectorResult<AlertRecord> {
    let alert_id = str_field(value, "id").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "Alert entry missing id".to_string(),
    })?;
    let severity = match str_field(value, "severity").unwrap_or_default().as_str() {
        "high" => AlertSeverity::High,
        "medium" => AlertSeverity::Medium,
        _ => AlertSeverity::Low,
    };

    Ok(AlertRecord {
        alert_id,
        alert_type: str_field(value, "title").unwrap_or_default(),
        source: str_field(value, "serviceSource").unwrap_or_default(),
        severity,
        status: str_field(value, "status").unwrap_or_default(),
        start_time: time_field(value, "createdDateTime"),
        end_time: time_field(value, "resolvedDateTime"),
        detail: value.get("description").and_then(AlertDetail::from_json),
    })
}

/// Maps one entry from `/directory/administrativeUnits` with a separately
/// fetched member count. Administrative units are flat, so the path is the
/// display name rooted at "/".
pub fn map_org_unit(value: &Value, user_count: i64) -> ConnectorResult<OrgUnitRecord> {
    let name = str_field(value, "displayName").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "Administrative unit missing displayName".to_string(),
    })?;

    Ok(OrgUnitRecord {
        path: format!("/{name}"),
        name,
        user_count,
    })
}

/// Maps one entry from `/roleManagement/directory/roleDefinitions` joined
/// with its assignments.
pub fn map_role(
    value: &Value,
    assignments: Vec<RoleAssignmentRecord>,
) -> ConnectorResult<RoleRecord> {
    let role_id = str_field(value, "id").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "Role definition missing id".to_string(),
    })?;
    let name = str_field(value, "displayName").unwrap_or_default();

    let privileges = value
        .get("rolePermissions")
        .and_then(Value::as_array)
        .map(|perms| {
            perms
                .iter()
                .filter_map(|p| p.get("allowedResourceActions").and_then(Value::as_array))
                .flatten()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(RoleRecord {
        is_super_admin: name == "Global Administrator",
        is_system_role: value
            .get("isBuiltIn")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        role_id,
        name,
        privileges,
        assignments,
    })
}

/// Maps one entry from `/roleManagement/directory/roleAssignments`, returning
/// the owning role id alongside the record.
pub fn map_role_assignment(value: &Value) -> Option<(String, RoleAssignmentRecord)> {
    let role_id = str_field(value, "roleDefinitionId")?;
    let assignment_id = str_field(value, "id")?;
    let scope = str_field(value, "directoryScopeId");
    Some((
        role_id,
        RoleAssignmentRecord {
            assignment_id,
            assignee: str_field(value, "principalId").unwrap_or_default(),
            scope_org_unit: scope.filter(|s| s != "/"),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_account_with_registration() {
        let value = json!({
            "userPrincipalName": "kim@contoso.com",
            "displayName": "Kim Lee",
            "accountEnabled": false,
            "signInActivity": { "lastSignInDateTime": "2026-03-01T12:00:00Z" }
        });
        let reg = MfaRegistration {
            is_admin: true,
            mfa_registered: true,
            mfa_capable: true,
        };
        let account = map_account(&value, Some(&reg)).unwrap();
        assert!(account.suspended);
        assert!(account.is_admin);
        assert!(account.two_sv_enrolled);
        assert!(account.last_login.is_some());
    }

    #[test]
    fn public_group_is_flagged_external() {
        let value = json!({
            "id": "g-1",
            "displayName": "All Hands",
            "mail": "allhands@contoso.com",
            "visibility": "Public"
        });
        let group = map_group(&value, 250).unwrap();
        assert_eq!(group.group_key, "allhands@contoso.com");
        assert!(group.allow_external_members);
        assert_eq!(group.member_count, 250);
    }

    #[test]
    fn aggregates_grants_by_client() {
        let grants = vec![
            json!({"clientId": "sp-1", "consentType": "Principal",
                   "principalId": "u-1", "scope": "Mail.Read openid"}),
            json!({"clientId": "sp-1", "consentType": "Principal",
                   "principalId": "u-2", "scope": "Mail.Read"}),
            json!({"clientId": "sp-2", "consentType": "AllPrincipals",
                   "scope": "User.Read"}),
        ];
        let mut names = BTreeMap::new();
        names.insert("sp-1".to_string(), ("Mail App".to_string(), true));
        let mapped = aggregate_grants(&grants, &names);

        assert_eq!(mapped.len(), 2);
        let mail = mapped.iter().find(|g| g.client_id == "sp-1").unwrap();
        assert_eq!(mail.user_count, 2);
        assert_eq!(mail.display_text, "Mail App");
        assert_eq!(mail.risk_level, GrantRiskLevel::High);

        let other = mapped.iter().find(|g| g.client_id == "sp-2").unwrap();
        assert_eq!(other.user_count, 0);
        assert!(!other.verified);
    }

    #[test]
    fn global_admin_role_is_super_admin() {
        let value = json!({
            "id": "r-1",
            "displayName": "Global Administrator",
            "isBuiltIn": true,
            "rolePermissions": [{ "allowedResourceActions": ["microsoft.directory/*"] }]
        });
        let role = map_role(&value, vec![]).unwrap();
        assert!(role.is_super_admin);
        assert!(role.is_system_role);
        assert_eq!(role.privileges, vec!["microsoft.directory/*"]);
    }

    #[test]
    fn tenant_wide_assignment_has_no_scope() {
        let (_role, assignment) = map_role_assignment(&json!({
            "id": "ra-1",
            "roleDefinitionId": "r-1",
            "principalId": "u-9",
            "directoryScopeId": "/"
        }))
        .unwrap();
        assert!(assignment.scope_org_unit.is_none());
    }
}
