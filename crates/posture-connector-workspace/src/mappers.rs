//! Mapping from Admin SDK / Alert Center payloads to normalized records.

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

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn time_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Maps one entry from `users.list`.
pub fn map_account(value: &Value) -> ConnectorResult<AccountRecord> {
    let primary_email = str_field(value, "primaryEmail")
        .ok_or_else(|| ConnectorError::Api {
            code: "mapping".to_string(),
            message: "User entry missing primaryEmail".to_string(),
        })?;

    Ok(AccountRecord {
        primary_email,
        display_name: value
            .get("name")
            .and_then(|n| n.get("fullName"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        is_admin: bool_field(value, "isAdmin"),
        is_delegated_admin: bool_field(value, "isDelegatedAdmin"),
        suspended: bool_field(value, "suspended"),
        archived: bool_field(value, "archived"),
        two_sv_enrolled: bool_field(value, "isEnrolledIn2Sv"),
        two_sv_enforced: bool_field(value, "isEnforcedIn2Sv"),
        last_login: time_field(value, "lastLoginTime"),
        org_unit_path: str_field(value, "orgUnitPath"),
    })
}

/// Maps one entry from `groups.list`, enriched with its Groups Settings
/// document when available. Settings booleans arrive as the strings
/// "true"/"false".
pub fn map_group(group: &Value, settings: Option<&Value>) -> ConnectorResult<GroupRecord> {
    let group_key = str_field(group, "email").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "Group entry missing email".to_string(),
    })?;

    let settings_flag = |key: &str| -> bool {
        settings
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    };

    Ok(GroupRecord {
        group_key,
        display_name: str_field(group, "name").unwrap_or_default(),
        member_count: group
            .get("directMembersCount")
            .and_then(|v| {
                v.as_i64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            })
            .unwrap_or(0),
        allow_external_members: settings_flag("allowExternalMembers"),
        who_can_join: settings.and_then(|s| str_field(s, "whoCanJoin")),
        who_can_post: settings.and_then(|s| str_field(s, "whoCanPostMessage")),
    })
}

/// Maps one entry from `mobiledevices.list`.
pub fn map_device(value: &Value) -> ConnectorResult<DeviceRecord> {
    let device_id = str_field(value, "deviceId").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "Device entry missing deviceId".to_string(),
    })?;

    Ok(DeviceRecord {
        device_id,
        device_type: str_field(value, "type").unwrap_or_default(),
        model: str_field(value, "model"),
        os: str_field(value, "os"),
        approval_status: str_field(value, "status"),
        compromised_status: str_field(value, "deviceCompromisedStatus"),
        encryption_status: str_field(value, "encryptionStatus"),
        last_sync: time_field(value, "lastSync"),
        owner_email: value
            .get("email")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(String::from),
    })
}

/// Maps one entry from Alert Center `alerts.list`.
pub fn map_alert(value: &Value) -> ConnectorResult<AlertRecord> {
    let alert_id = str_field(value, "alertId").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "Alert entry missing alertId".to_string(),
    })?;

    let metadata = value.get("metadata");
    let severity = metadata
        .and_then(|m| m.get("severity"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<AlertSeverity>().ok())
        .unwrap_or(AlertSeverity::Low);

    Ok(AlertRecord {
        alert_id,
        alert_type: str_field(value, "type").unwrap_or_default(),
        source: str_field(value, "source").unwrap_or_default(),
        severity,
        status: metadata
            .and_then(|m| m.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        start_time: time_field(value, "startTime"),
        end_time: time_field(value, "endTime"),
        detail: value.get("data").and_then(AlertDetail::from_json),
    })
}

/// Maps one entry from `orgunits.list` plus a per-path user tally.
pub fn map_org_unit(value: &Value, user_count: i64) -> ConnectorResult<OrgUnitRecord> {
    let path = str_field(value, "orgUnitPath").ok_or_else(|| ConnectorError::Api {
        code: "mapping".to_string(),
        message: "Org unit entry missing orgUnitPath".to_string(),
    })?;

    Ok(OrgUnitRecord {
        name: str_field(value, "name").unwrap_or_else(|| path.clone()),
        path,
        user_count,
    })
}

/// Maps one entry from `roles.list` together with its assignments.
pub fn map_role(value: &Value, assignments: Vec<RoleAssignmentRecord>) -> ConnectorResult<RoleRecord> {
    let role_id = value
        .get("roleId")
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .ok_or_else(|| ConnectorError::Api {
            code: "mapping".to_string(),
            message: "Role entry missing roleId".to_string(),
        })?;

    let privileges = value
        .get("rolePrivileges")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(|p| str_field(p, "privilegeName"))
                .collect()
        })
        .unwrap_or_default();

    Ok(RoleRecord {
        role_id,
        name: str_field(value, "roleName").unwrap_or_default(),
        is_super_admin: bool_field(value, "isSuperAdminRole"),
        is_system_role: bool_field(value, "isSystemRole"),
        privileges,
        assignments,
    })
}

/// Maps one entry from `roleassignments.list`.
pub fn map_role_assignment(value: &Value) -> Option<RoleAssignmentRecord> {
    let assignment_id = value.get("roleAssignmentId").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })?;
    let scope_org_unit = match str_field(value, "scopeType").as_deref() {
        Some("ORG_UNIT") => str_field(value, "orgUnitId"),
        _ => None,
    };
    Some(RoleAssignmentRecord {
        assignment_id,
        assignee: str_field(value, "assignedTo").unwrap_or_default(),
        scope_org_unit,
    })
}

/// Aggregates per-user token listings into one grant per client application.
/// `user_tokens` pairs each user with the `items` of their `tokens.list`.
pub fn aggregate_grants(user_tokens: &[(String, Vec<Value>)]) -> Vec<GrantRecord> {
    struct Agg {
        display_text: String,
        scopes: Vec<String>,
        user_count: i64,
        verified: bool,
    }

    let mut by_client: BTreeMap<String, Agg> = BTreeMap::new();

    for (_user, tokens) in user_tokens {
        for token in tokens {
            let Some(client_id) = str_field(token, "clientId") else {
                continue;
            };
            let scopes: Vec<String> = token
                .get("scopes")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            // "anonymous" marks apps Google could not attribute to a
            // registered developer.
            let verified = !bool_field(token, "anonymous");
            let display_text = str_field(token, "displayText").unwrap_or_else(|| client_id.clone());

            let entry = by_client.entry(client_id).or_insert_with(|| Agg {
                display_text,
                scopes: Vec::new(),
                user_count: 0,
                verified,
            });
            entry.user_count += 1;
            entry.verified = entry.verified && verified;
            for s in scopes {
                if !entry.scopes.contains(&s) {
                    entry.scopes.push(s);
                }
            }
        }
    }

    by_client
        .into_iter()
        .map(|(client_id, agg)| {
            let mut scopes = agg.scopes;
            scopes.sort();
            let risk_level = GrantRiskLevel::from_scopes(&scopes);
            GrantRecord {
                client_id,
                display_text: agg.display_text,
                scopes,
                user_count: agg.user_count,
                verified: agg.verified,
                risk_level,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_account_fields() {
        let value = json!({
            "primaryEmail": "kim@example.com",
            "name": { "fullName": "Kim Lee" },
            "isAdmin": true,
            "suspended": false,
            "isEnrolledIn2Sv": true,
            "isEnforcedIn2Sv": false,
            "lastLoginTime": "2026-01-15T08:30:00.000Z",
            "orgUnitPath": "/Engineering"
        });
        let account = map_account(&value).unwrap();
        assert_eq!(account.primary_email, "kim@example.com");
        assert!(account.is_admin);
        assert!(account.two_sv_enrolled);
        assert!(!account.two_sv_enforced);
        assert_eq!(account.org_unit_path.as_deref(), Some("/Engineering"));
        assert!(account.last_login.is_some());
    }

    #[test]
    fn account_without_email_is_rejected() {
        assert!(map_account(&json!({ "name": {} })).is_err());
    }

    #[test]
    fn maps_group_with_settings() {
        let group = json!({
            "email": "eng@example.com",
            "name": "Engineering",
            "directMembersCount": "14"
        });
        let settings = json!({
            "allowExternalMembers": "true",
            "whoCanJoin": "CAN_REQUEST_TO_JOIN",
            "whoCanPostMessage": "ALL_MEMBERS_CAN_POST"
        });
        let mapped = map_group(&group, Some(&settings)).unwrap();
        assert_eq!(mapped.member_count, 14);
        assert!(mapped.allow_external_members);
        assert_eq!(mapped.who_can_join.as_deref(), Some("CAN_REQUEST_TO_JOIN"));
    }

    #[test]
    fn group_without_settings_defaults_closed() {
        let group = json!({ "email": "ops@example.com", "name": "Ops" });
        let mapped = map_group(&group, None).unwrap();
        assert!(!mapped.allow_external_members);
    }

    #[test]
    fn maps_alert_severity_and_detail() {
        let value = json!({
            "alertId": "a-1",
            "type": "Suspicious login",
            "source": "Google identity",
            "startTime": "2026-02-01T00:00:00Z",
            "metadata": { "severity": "HIGH", "status": "NOT_STARTED" },
            "data": { "loginDetails": { "ipAddress": "203.0.113.7" } }
        });
        let alert = map_alert(&value).unwrap();
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.status, "NOT_STARTED");
        let detail = alert.detail.unwrap();
        assert!(detail.flatten().contains("203.0.113.7"));
    }

    #[test]
    fn aggregates_grants_across_users() {
        let tokens_a = vec![json!({
            "clientId": "app-1.apps.example",
            "displayText": "Mail Sync",
            "scopes": ["https://www.googleapis.com/auth/gmail.readonly"],
            "anonymous": false
        })];
        let tokens_b = vec![
            json!({
                "clientId": "app-1.apps.example",
                "displayText": "Mail Sync",
                "scopes": ["openid"],
                "anonymous": false
            }),
            json!({
                "clientId": "app-2.apps.example",
                "displayText": "Calendar Helper",
                "scopes": ["openid"],
                "anonymous": true
            }),
        ];
        let grants = aggregate_grants(&[
            ("a@example.com".to_string(), tokens_a),
            ("b@example.com".to_string(), tokens_b),
        ]);

        assert_eq!(grants.len(), 2);
        let mail = grants.iter().find(|g| g.client_id == "app-1.apps.example").unwrap();
        assert_eq!(mail.user_count, 2);
        assert_eq!(mail.risk_level, GrantRiskLevel::High);
        assert!(mail.scopes.contains(&"openid".to_string()));

        let cal = grants.iter().find(|g| g.client_id == "app-2.apps.example").unwrap();
        assert!(!cal.verified);
        assert_eq!(cal.risk_level, GrantRiskLevel::Low);
    }

    #[test]
    fn maps_role_with_assignments() {
        let role = json!({
            "roleId": "123",
            "roleName": "_SEED_ADMIN_ROLE",
            "isSuperAdminRole": true,
            "isSystemRole": true,
            "rolePrivileges": [{ "privilegeName": "SUPER_ADMIN" }]
        });
        let assignment = map_role_assignment(&json!({
            "roleAssignmentId": "900",
            "assignedTo": "user-id-1",
            "scopeType": "ORG_UNIT",
            "orgUnitId": "ou-5"
        }))
        .unwrap();
        let mapped = map_role(&role, vec![assignment]).unwrap();
        assert!(mapped.is_super_admin);
        assert_eq!(mapped.privileges, vec!["SUPER_ADMIN"]);
        assert_eq!(mapped.assignments[0].scope_org_unit.as_deref(), Some("ou-5"));
    }
}
