//! Backend adapters and session against a mock Vault/OpenBao server

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vals_secret_controller::backend::{
    AuthMode, BackendClientFactory, BackendError, BackendSession, BackendSettings, BackendType,
    LeaseOperations, OpenBaoSecretsClient, SecretsClient, VaultSecretsClient,
};
use vals_secret_controller::controller::resolver::{BackendResolver, ValueResolver};
use vals_secret_controller::crd::VaultRole;

fn settings(address: String, auth: AuthMode) -> BackendSettings {
    BackendSettings {
        backend: BackendType::OpenBao,
        address,
        auth,
        skip_verify: false,
        namespace: None,
    }
}

fn approle() -> AuthMode {
    AuthMode::AppRole {
        role_id: "controller".to_string(),
        secret_id: "secret-id".to_string(),
        mount: "approle".to_string(),
    }
}

/// Response envelope every endpoint wraps its payload in
fn envelope(data: serde_json::Value, auth: serde_json::Value) -> serde_json::Value {
    json!({
        "request_id": "5e3f2a8c-1b7d-4c55-9a43-0d2a61f4e9b1",
        "lease_id": "",
        "lease_duration": 0,
        "renewable": false,
        "data": data,
        "wrap_info": null,
        "warnings": null,
        "auth": auth
    })
}

fn login_response(token: &str) -> serde_json::Value {
    envelope(
        serde_json::Value::Null,
        json!({
            "client_token": token,
            "accessor": "0e9e354a-520f-df04-6867-ee81cae3d42d",
            "policies": ["default", "vals-controller"],
            "token_policies": ["default", "vals-controller"],
            "metadata": { "role_name": "controller" },
            "lease_duration": 3600,
            "renewable": true,
            "entity_id": "4a2b8e3c-9f1d-4b7e-a6c5-2d8f0e1b3a79",
            "token_type": "service",
            "orphan": true
        }),
    )
}

fn orders_role() -> VaultRole {
    VaultRole {
        role: "orders".to_string(),
        mount: "database".to_string(),
    }
}

#[tokio::test]
async fn test_read_sends_token_and_namespace() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app"))
        .and(header("X-Vault-Token", "s.root"))
        .and(header("X-Vault-Namespace", "team-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "r-1",
            "data": { "data": { "password": "s3cr3t" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(server.uri(), AuthMode::Token("s.root".to_string()));
    settings.namespace = Some("team-a".to_string());
    let client = OpenBaoSecretsClient::new(settings).unwrap();

    let response = client.read("secret/data/app").await.unwrap().unwrap();
    assert_eq!(response.request_id, "r-1");
    assert_eq!(
        response.data.unwrap()["data"]["password"],
        json!("s3cr3t")
    );
}

#[tokio::test]
async fn test_read_missing_path_is_none() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
        .mount(&server)
        .await;

    let client =
        OpenBaoSecretsClient::new(settings(server.uri(), AuthMode::Token("s.root".to_string()))).unwrap();

    assert!(client.read("secret/data/missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_error_body_becomes_api_error() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/database/creds/orders"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errors": ["1 error occurred", "permission denied"]
        })))
        .mount(&server)
        .await;

    let client =
        OpenBaoSecretsClient::new(settings(server.uri(), AuthMode::Token("s.root".to_string()))).unwrap();

    let err = client.read("database/creds/orders").await.unwrap_err();
    match &err {
        BackendError::Api { status, message } => {
            assert_eq!(*status, 403);
            assert_eq!(message, "1 error occurred; permission denied");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_permission_denied());
}

#[tokio::test]
async fn test_approle_login_token_is_used_afterwards() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .and(body_json(json!({ "role_id": "controller", "secret_id": "secret-id" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response("s.approle")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app"))
        .and(header("X-Vault-Token", "s.approle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "k": "v" } })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenBaoSecretsClient::new(settings(server.uri(), approle())).unwrap();
    let auth = client.login().await.unwrap();

    assert_eq!(auth.token(), Some("s.approle"));
    assert!(auth.is_renewable());
    assert_eq!(auth.ttl(), 3600);
    let data = client.read("secret/data/app").await.unwrap().unwrap();
    assert_eq!(data.data_str("k").as_deref(), Some("v"));
}

#[tokio::test]
async fn test_userpass_login_failure_is_auth_error() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/userpass/login/controller"))
        .and(body_json(json!({ "password": "wrong" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": ["invalid username or password"]
        })))
        .mount(&server)
        .await;

    let client = OpenBaoSecretsClient::new(settings(
        server.uri(),
        AuthMode::UserPass {
            username: "controller".to_string(),
            password: "wrong".to_string(),
            mount: "userpass".to_string(),
        },
    ))
    .unwrap();

    let err = client.login().await.unwrap_err();
    assert!(matches!(err, BackendError::Auth(ref m) if m.contains("invalid username or password")));
}

#[tokio::test]
async fn test_token_login_reads_lookup_self() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/token/lookup-self"))
        .and(header("X-Vault-Token", "s.root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            json!({
                "accessor": "8609694a-cdbc-db9b-d345-e782dbb562ed",
                "creation_time": 1_714_560_000,
                "creation_ttl": 2_764_800,
                "display_name": "token",
                "entity_id": "",
                "expire_time": "2024-06-02T12:00:00Z",
                "explicit_max_ttl": 0,
                "id": "s.root",
                "identity_policies": null,
                "issue_time": "2024-05-01T12:00:00Z",
                "meta": null,
                "num_uses": 0,
                "orphan": false,
                "path": "auth/token/create",
                "policies": ["default"],
                "renewable": true,
                "ttl": 1800,
                "type": "service"
            }),
            serde_json::Value::Null,
        )))
        .mount(&server)
        .await;

    let client =
        OpenBaoSecretsClient::new(settings(server.uri(), AuthMode::Token("s.root".to_string()))).unwrap();
    let auth = client.login().await.unwrap();

    assert_eq!(auth.token(), Some("s.root"));
    assert!(auth.is_renewable());
    assert_eq!(auth.ttl(), 1800);
}

#[tokio::test]
async fn test_lease_calls_use_sys_leases_endpoints() {
    common::init_rustls();
    let server = MockServer::start().await;
    let lease = "database/creds/orders/abc";
    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/renew"))
        .and(body_json(json!({ "lease_id": lease, "increment": 3600 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lease_id": lease,
            "lease_duration": 3600,
            "renewable": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/revoke"))
        .and(body_json(json!({ "lease_id": lease })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        OpenBaoSecretsClient::new(settings(server.uri(), AuthMode::Token("s.root".to_string()))).unwrap();

    let renewed = client.renew(lease, 3600).await.unwrap();
    assert_eq!(renewed.lease_duration, 3600);
    client.revoke(lease).await.unwrap();
}

async fn mount_orders_engine(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/database/creds/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lease_id": "database/creds/orders/abc",
            "lease_duration": 3600,
            "renewable": true,
            "data": { "username": "v-orders-x1", "password": "A1a-pw" }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/database/config/database"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "connection_details": {
                    "connection_url": "postgresql://{{username}}:{{password}}@db:5432/orders",
                    "hosts": ["db-0", "db-1"],
                    "port": 5432
                }
            }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_issue_credentials_with_connection_details() {
    common::init_rustls();
    let server = MockServer::start().await;
    mount_orders_engine(&server).await;

    let session = BackendSession::new(Arc::new(BackendClientFactory::new(Some(settings(
        server.uri(),
        AuthMode::Token("s.root".to_string()),
    )))));

    let creds = session.issue_credentials(&orders_role()).await.unwrap();

    assert_eq!(creds.username, "v-orders-x1");
    assert_eq!(creds.password, "A1a-pw");
    assert_eq!(creds.lease_id, "database/creds/orders/abc");
    assert_eq!(creds.lease_duration, 3600);
    assert_eq!(
        creds.connection_url.as_deref(),
        Some("postgresql://v-orders-x1:A1a-pw@db:5432/orders")
    );
    assert_eq!(creds.hosts.as_deref(), Some("db-0:5432,db-1:5432"));
}

#[tokio::test]
async fn test_issue_credentials_without_config_access() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/database/creds/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lease_id": "database/creds/orders/abc",
            "lease_duration": 60,
            "data": { "username": "u", "password": "p" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/database/config/database"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let session = BackendSession::new(Arc::new(BackendClientFactory::new(Some(settings(
        server.uri(),
        AuthMode::Token("s.root".to_string()),
    )))));

    let creds = session.issue_credentials(&orders_role()).await.unwrap();
    assert_eq!(creds.username, "u");
    assert_eq!(creds.connection_url, None);
    assert_eq!(creds.hosts, None);
}

#[tokio::test]
async fn test_denied_request_reauthenticates_and_retries() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response("s.fresh")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/lookup"))
        .and(header("X-Vault-Token", "s.fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "id": "database/creds/orders/abc", "ttl": 100 }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/lookup"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errors": ["permission denied"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = BackendSession::new(Arc::new(BackendClientFactory::new(Some(settings(
        server.uri(),
        approle(),
    )))))
    .with_retry_policy(3, Duration::ZERO);
    session.set_token("s.stale").await;

    assert!(session.is_lease_valid("database/creds/orders/abc").await);
    assert_eq!(session.current_token().as_deref(), Some("s.fresh"));
}

#[tokio::test]
async fn test_non_permission_errors_are_not_retried() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/leases/revoke"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": ["invalid lease ID"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = BackendSession::new(Arc::new(BackendClientFactory::new(Some(settings(
        server.uri(),
        AuthMode::Token("s.root".to_string()),
    )))))
    .with_retry_policy(3, Duration::ZERO);

    let err = session.revoke_lease("nope").await.unwrap_err();
    assert!(matches!(err, BackendError::Api { status: 400, .. }));
}

fn kv2_response(data: serde_json::Value) -> serde_json::Value {
    envelope(
        json!({
            "data": data,
            "metadata": {
                "created_time": "2024-05-01T12:00:00.000000Z",
                "custom_metadata": null,
                "deletion_time": "",
                "destroyed": false,
                "version": 3
            }
        }),
        serde_json::Value::Null,
    )
}

#[tokio::test]
async fn test_vault_kv2_read_unwraps_latest_version() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/data/teams/orders"))
        .and(header("X-Vault-Token", "s.root"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(kv2_response(json!({ "password": "s3cr3t" }))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(server.uri(), AuthMode::Token("s.root".to_string()));
    settings.backend = BackendType::Vault;
    let client = VaultSecretsClient::new(settings).unwrap();

    let data = client.read_kv2("kv", "teams/orders").await.unwrap().unwrap();
    assert_eq!(data["password"], json!("s3cr3t"));
    assert_eq!(client.backend(), BackendType::Vault);
}

#[tokio::test]
async fn test_kv2_read_of_missing_secret_is_none() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/data/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
        .mount(&server)
        .await;

    let client =
        OpenBaoSecretsClient::new(settings(server.uri(), AuthMode::Token("s.root".to_string()))).unwrap();

    assert!(client.read_kv2("kv", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_resolver_falls_back_to_kv2() {
    common::init_rustls();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/app"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(kv2_response(json!({ "user": "orders" }))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = Arc::new(BackendSession::new(Arc::new(BackendClientFactory::new(Some(
        settings(server.uri(), AuthMode::Token("s.root".to_string())),
    )))));
    let resolver = BackendResolver::new(Some(session));

    assert_eq!(
        resolver.resolve("ref+openbao://secret/app#user").await.unwrap(),
        "orders"
    );
}
