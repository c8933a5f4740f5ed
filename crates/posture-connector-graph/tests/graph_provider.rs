//! HTTP-level tests for the Graph provider against a mock Microsoft
//! identity platform and Graph API.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use posture_connector::{
    ConnectorError, DirectoryProvider, DirectoryRecord, PageCursor, ProviderType, SyncCategory,
};
use posture_connector_graph::{GraphConfig, GraphCredentials, GraphProvider};

fn test_config(server: &MockServer) -> GraphConfig {
    GraphConfig {
        credentials: GraphCredentials {
            tenant_id: "tenant-1".to_string(),
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string().into(),
        },
        graph_base_url: format!("{}/v1.0", server.uri()),
        login_base_url: server.uri(),
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "test-token"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn verifies_credentials_with_a_single_user_page() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "u-1" }]
        })))
        .mount(&server)
        .await;

    let provider = GraphProvider::new(test_config(&server)).unwrap();
    provider.verify_credentials().await.unwrap();
    assert_eq!(provider.provider_type(), ProviderType::Graph);
}

#[tokio::test]
async fn denied_verification_is_an_auth_error() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": "Authorization_RequestDenied",
                "message": "Insufficient privileges to complete the operation."
            }
        })))
        .mount(&server)
        .await;

    let provider = GraphProvider::new(test_config(&server)).unwrap();
    let err = provider.verify_credentials().await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn accounts_page_joins_the_mfa_registration_report() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path(
            "/v1.0/reports/authenticationMethods/userRegistrationDetails",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "userPrincipalName": "alice@contoso.com",
                "isAdmin": true,
                "isMfaRegistered": true,
                "isMfaCapable": true
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "userPrincipalName": "alice@contoso.com",
                    "displayName": "Alice",
                    "accountEnabled": true
                },
                {
                    "userPrincipalName": "bob@contoso.com",
                    "displayName": "Bob",
                    "accountEnabled": false
                }
            ]
        })))
        .mount(&server)
        .await;

    let provider = GraphProvider::new(test_config(&server)).unwrap();
    let page = provider
        .fetch_page(SyncCategory::Accounts, None)
        .await
        .unwrap();

    assert!(page.next.is_none());
    assert_eq!(page.records.len(), 2);
    let DirectoryRecord::Account(alice) = &page.records[0] else {
        panic!("expected account record");
    };
    assert!(alice.is_admin);
    assert!(alice.two_sv_enrolled);
    assert!(!alice.suspended);
    let DirectoryRecord::Account(bob) = &page.records[1] else {
        panic!("expected account record");
    };
    assert!(!bob.two_sv_enrolled);
    assert!(bob.suspended);
}

#[tokio::test]
async fn unlicensed_registration_report_degrades_to_no_mfa_data() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path(
            "/v1.0/reports/authenticationMethods/userRegistrationDetails",
        ))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": "AadPremiumLicenseRequired",
                "message": "Tenant is not licensed for this feature."
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "userPrincipalName": "alice@contoso.com",
                "displayName": "Alice",
                "accountEnabled": true
            }]
        })))
        .mount(&server)
        .await;

    let provider = GraphProvider::new(test_config(&server)).unwrap();
    let page = provider
        .fetch_page(SyncCategory::Accounts, None)
        .await
        .unwrap();

    let DirectoryRecord::Account(alice) = &page.records[0] else {
        panic!("expected account record");
    };
    assert!(!alice.two_sv_enrolled);
    assert!(!alice.is_admin);
}

#[tokio::test]
async fn follows_odata_next_links() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path(
            "/v1.0/reports/authenticationMethods/userRegistrationDetails",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "userPrincipalName": "alice@contoso.com", "accountEnabled": true }],
            "@odata.nextLink": format!("{}/v1.0/users-continued", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users-continued"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "userPrincipalName": "bob@contoso.com", "accountEnabled": true }]
        })))
        .mount(&server)
        .await;

    let provider = GraphProvider::new(test_config(&server)).unwrap();
    let first = provider
        .fetch_page(SyncCategory::Accounts, None)
        .await
        .unwrap();
    assert_eq!(first.records.len(), 1);
    let cursor = first.next.expect("next link");

    let second = provider
        .fetch_page(SyncCategory::Accounts, Some(cursor))
        .await
        .unwrap();
    assert_eq!(second.records.len(), 1);
    assert!(second.next.is_none());
}

#[tokio::test]
async fn throttled_request_is_retried() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_string("slow down"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "u-1" }]
        })))
        .mount(&server)
        .await;

    let provider = GraphProvider::new(test_config(&server)).unwrap();
    provider.verify_credentials().await.unwrap();
}

#[tokio::test]
async fn malformed_next_link_is_rejected_before_any_request() {
    let server = MockServer::start().await;

    let provider = GraphProvider::new(test_config(&server)).unwrap();
    let err = provider
        .fetch_page(
            SyncCategory::Devices,
            Some(PageCursor("not a link".to_string())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Url(_)));
}

#[tokio::test]
async fn unlicensed_device_workload_is_unsupported() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/deviceManagement/managedDevices"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "code": "ResourceNotFound",
                "message": "Resource not found for the segment 'managedDevices'."
            }
        })))
        .mount(&server)
        .await;

    let provider = GraphProvider::new(test_config(&server)).unwrap();
    let err = provider
        .fetch_page(SyncCategory::Devices, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Unsupported(_)));
}
