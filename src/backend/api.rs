//! # API Connection
//!
//! Connection to the Vault HTTP API v1, which OpenBao serves unchanged. Both
//! flavor adapters are built on it.
//!
//! Authentication, token lookup and renewal, and KV v2 reads go through
//! `vaultrs`. Logical reads and writes and the `sys/leases` endpoints are sent
//! directly with `reqwest`: callers need the whole response envelope (lease id,
//! lease duration, renewability), which the typed `vaultrs` endpoints strip,
//! and `vaultrs` has no lease endpoints.
//!
//! References:
//! - [Vault HTTP API](https://developer.hashicorp.com/vault/api-docs)
//! - [OpenBao HTTP API](https://openbao.org/api-docs/)

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, debug_span, error, info, Instrument};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;

use super::env::{AuthMode, BackendSettings};
use super::{AuthInfo, BackendError, SecretResponse};
use crate::constants::BACKEND_REQUEST_TIMEOUT_SECS;

/// Error body returned by the API: `{"errors": ["..."]}`
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Shared connection state of a flavor adapter
///
/// Cheap to clone; clones share the HTTP connection pool and token.
#[derive(Clone)]
pub struct ApiConnection {
    inner: Arc<Inner>,
}

struct Inner {
    http_client: Client,
    // rebuilt whenever the token changes
    vault: RwLock<Arc<VaultClient>>,
    settings: BackendSettings,
    token: RwLock<Option<String>>,
}

impl std::fmt::Debug for ApiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConnection")
            .field("backend", &self.inner.settings.backend)
            .field("address", &self.inner.settings.address)
            .field("auth", &self.inner.settings.auth.name())
            .finish_non_exhaustive()
    }
}

/// `vaultrs` client for `settings`, sending `token` when it is not empty
fn build_vault_client(settings: &BackendSettings, token: &str) -> Result<VaultClient, BackendError> {
    let mut builder = VaultClientSettingsBuilder::default();
    builder
        .address(&settings.address)
        .token(token)
        .verify(!settings.skip_verify)
        .timeout(Some(Duration::from_secs(BACKEND_REQUEST_TIMEOUT_SECS)));
    if let Some(namespace) = &settings.namespace {
        builder.namespace(Some(namespace.clone()));
    }

    let client_settings = builder.build().map_err(|e| {
        BackendError::Configuration(format!("invalid {} client settings: {e}", settings.backend))
    })?;
    VaultClient::new(client_settings).map_err(|e| {
        BackendError::Configuration(format!("cannot create {} client: {e}", settings.backend))
    })
}

impl From<ClientError> for BackendError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::APIError { code, errors } => Self::Api {
                status: code,
                message: errors.join("; "),
            },
            other => Self::Request(other.to_string()),
        }
    }
}

/// Convert the `auth` block of a `vaultrs` response
fn auth_response(auth: vaultrs::api::AuthInfo) -> SecretResponse {
    SecretResponse {
        auth: Some(AuthInfo {
            client_token: auth.client_token,
            accessor: auth.accessor,
            policies: auth.policies,
            lease_duration: i64::try_from(auth.lease_duration).unwrap_or(i64::MAX),
            renewable: auth.renewable,
        }),
        ..Default::default()
    }
}

impl ApiConnection {
    /// Build a connection; token auth adopts the configured token immediately
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub fn new(settings: BackendSettings) -> Result<Self, BackendError> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(settings.skip_verify)
            .timeout(Duration::from_secs(BACKEND_REQUEST_TIMEOUT_SECS))
            .build()?;

        let token = match &settings.auth {
            AuthMode::Token(token) => Some(token.clone()),
            _ => None,
        };
        let vault = build_vault_client(&settings, token.as_deref().unwrap_or_default())?;

        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                vault: RwLock::new(Arc::new(vault)),
                settings,
                token: RwLock::new(token),
            }),
        })
    }

    /// Settings this connection was built from
    #[must_use]
    pub fn settings(&self) -> &BackendSettings {
        &self.inner.settings
    }

    fn current_token(&self) -> Option<String> {
        self.inner
            .token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn vault(&self) -> Arc<VaultClient> {
        Arc::clone(
            &self
                .inner
                .vault
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// Send `token` with every later request; `None` sends no token
    pub fn adopt_token(&self, token: Option<String>) {
        match build_vault_client(&self.inner.settings, token.as_deref().unwrap_or_default()) {
            Ok(client) => {
                *self
                    .inner
                    .vault
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Arc::new(client);
            }
            Err(e) => error!(error = %e, "Cannot rebuild backend client for the new token"),
        }
        *self
            .inner
            .token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = token;
    }

    fn make_request(&self, method: Method, path: &str, body: Option<Value>) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/v1/{}",
            self.inner.settings.address,
            path.trim_start_matches('/')
        );

        let mut request = self.inner.http_client.request(method, url);

        if let Some(token) = self.current_token() {
            request = request.header("X-Vault-Token", token);
        }
        if let Some(namespace) = &self.inner.settings.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        request
    }

    /// Send a request and decode the standard response envelope
    ///
    /// `Ok(None)` for empty bodies and, when `missing_ok`, for 404.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        missing_ok: bool,
    ) -> Result<Option<SecretResponse>, BackendError> {
        let span = debug_span!(
            "backend.request",
            backend = %self.inner.settings.backend,
            http.method = %method,
            path = path
        );

        async move {
            let response = self.make_request(method, path, body).send().await?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND && missing_ok {
                debug!("Nothing found at {}", path);
                return Ok(None);
            }
            if status == StatusCode::NO_CONTENT {
                return Ok(None);
            }

            let text = response.text().await?;
            if !status.is_success() {
                return Err(handle_error_response(status, &text));
            }
            if text.trim().is_empty() {
                return Ok(None);
            }

            serde_json::from_str::<SecretResponse>(&text)
                .map(Some)
                .map_err(|e| BackendError::Decode(format!("{path}: {e}")))
        }
        .instrument(span)
        .await
    }

    async fn send_required(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<SecretResponse, BackendError> {
        self.send(method, path, body, false)
            .await?
            .ok_or_else(|| BackendError::Decode(format!("{path}: empty response")))
    }

    /// Authenticate with the configured auth mode and adopt the resulting token
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn login(&self) -> Result<SecretResponse, BackendError> {
        let auth = &self.inner.settings.auth;
        let result = match auth {
            AuthMode::Token(_) => self.login_token().await,
            AuthMode::UserPass {
                username,
                password,
                mount,
            } => {
                let client = self.login_client();
                vaultrs::auth::userpass::login(client.as_ref(), mount, username, password)
                    .await
                    .map(auth_response)
                    .map_err(BackendError::from)
            }
            AuthMode::AppRole {
                role_id,
                secret_id,
                mount,
            } => {
                let client = self.login_client();
                vaultrs::auth::approle::login(client.as_ref(), mount, role_id, secret_id)
                    .await
                    .map(auth_response)
                    .map_err(BackendError::from)
            }
            AuthMode::Kubernetes {
                role,
                mount,
                jwt_path,
            } => {
                let jwt = tokio::fs::read_to_string(jwt_path).await.map_err(|e| {
                    BackendError::Auth(format!("cannot read service account token {jwt_path}: {e}"))
                })?;
                let client = self.login_client();
                vaultrs::auth::kubernetes::login(client.as_ref(), mount, role, jwt.trim())
                    .await
                    .map(auth_response)
                    .map_err(BackendError::from)
            }
        };

        let response = result.map_err(|e| match e {
            BackendError::Auth(_) | BackendError::Transport(_) | BackendError::Request(_) => e,
            other => BackendError::Auth(format!("{} login failed: {other}", auth.name())),
        })?;

        let token = response
            .token()
            .ok_or_else(|| BackendError::Auth(format!("{} login did not return a token", auth.name())))?
            .to_string();
        self.adopt_token(Some(token));

        info!(
            backend = %self.inner.settings.backend,
            auth = auth.name(),
            renewable = response.is_renewable(),
            ttl = response.ttl(),
            "🔐 Logged in to secrets backend"
        );
        Ok(response)
    }

    /// A client without a token; a stale token must not reach a login endpoint
    fn login_client(&self) -> Arc<VaultClient> {
        self.adopt_token(None);
        self.vault()
    }

    async fn login_token(&self) -> Result<SecretResponse, BackendError> {
        let token = self
            .current_token()
            .ok_or_else(|| BackendError::Auth("token auth configured without a token".to_string()))?;
        let lookup = self.lookup_self().await?;

        let renewable = lookup
            .data_str("renewable")
            .is_some_and(|r| r == "true");
        let ttl = lookup
            .data_str("ttl")
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();

        Ok(SecretResponse {
            auth: Some(AuthInfo {
                client_token: token,
                lease_duration: ttl,
                renewable,
                ..Default::default()
            }),
            ..lookup
        })
    }

    /// Look up the current token; the lookup fields land in `data`
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn lookup_self(&self) -> Result<SecretResponse, BackendError> {
        let lookup = vaultrs::token::lookup_self(self.vault().as_ref()).await?;
        let data = match serde_json::to_value(&lookup) {
            Ok(Value::Object(map)) => map.into_iter().collect::<HashMap<_, _>>(),
            Ok(_) => HashMap::new(),
            Err(e) => return Err(BackendError::Decode(format!("token lookup: {e}"))),
        };
        Ok(SecretResponse {
            data: Some(data),
            ..Default::default()
        })
    }

    /// Extend the current token by `increment` seconds
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn renew_self(&self, increment: i64) -> Result<SecretResponse, BackendError> {
        let increment = format!("{increment}s");
        let auth = vaultrs::token::renew_self(self.vault().as_ref(), Some(increment.as_str())).await?;
        let response = auth_response(auth);
        if let Some(token) = response.token() {
            self.adopt_token(Some(token.to_string()));
        }
        Ok(response)
    }

    /// Latest version of a KV v2 secret; `Ok(None)` when it does not exist
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn read_kv2(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<Option<HashMap<String, Value>>, BackendError> {
        let span = debug_span!(
            "backend.kv2_read",
            backend = %self.inner.settings.backend,
            mount = mount,
            path = path
        );
        async move {
            match vaultrs::kv2::read::<HashMap<String, Value>>(self.vault().as_ref(), mount, path).await {
                Ok(data) => Ok(Some(data)),
                Err(ClientError::APIError { code: 404, .. }) => {
                    debug!("No KV v2 secret at {}/{}", mount, path);
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            }
        }
        .instrument(span)
        .await
    }

    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn read(&self, path: &str) -> Result<Option<SecretResponse>, BackendError> {
        self.send(Method::GET, path, None, true).await
    }

    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn write(
        &self,
        path: &str,
        data: HashMap<String, Value>,
    ) -> Result<Option<SecretResponse>, BackendError> {
        let body = Value::Object(data.into_iter().collect());
        self.send(Method::POST, path, Some(body), false).await
    }

    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn renew(&self, lease_id: &str, increment: i64) -> Result<SecretResponse, BackendError> {
        self.send_required(
            Method::PUT,
            "sys/leases/renew",
            Some(json!({ "lease_id": lease_id, "increment": increment })),
        )
        .await
    }

    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn revoke(&self, lease_id: &str) -> Result<(), BackendError> {
        self.send(
            Method::PUT,
            "sys/leases/revoke",
            Some(json!({ "lease_id": lease_id })),
            false,
        )
        .await
        .map(|_| ())
    }

    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn lookup(&self, lease_id: &str) -> Result<SecretResponse, BackendError> {
        self.send_required(
            Method::PUT,
            "sys/leases/lookup",
            Some(json!({ "lease_id": lease_id })),
        )
        .await
    }
}

/// Turn an error response into a [`BackendError::Api`]
fn handle_error_response(status: StatusCode, error_text: &str) -> BackendError {
    let message = match serde_json::from_str::<ApiErrorResponse>(error_text) {
        Ok(body) if !body.errors.is_empty() => body.errors.join("; "),
        _ => error_text.trim().to_string(),
    };
    BackendError::Api {
        status: status.as_u16(),
        message,
    }
}
