//! # Secrets Backend
//!
//! Backend-agnostic access to Vault and OpenBao.
//!
//! Each flavor has its own adapter ([`VaultSecretsClient`],
//! [`OpenBaoSecretsClient`]) built on a shared [`ApiConnection`], and
//! [`BackendClientFactory`] picks the adapter from the detected
//! [`BackendType`]. Callers depend only on the [`SecretsClient`] trait.
//!
//! ## Module Structure
//!
//! - `env.rs` - Backend and auth mode detection from environment variables
//! - `api.rs` - Connection shared by the adapters (`vaultrs` plus raw lease calls)
//! - `vault.rs` - Vault adapter
//! - `openbao.rs` - OpenBao adapter
//! - `watcher.rs` - Long-lived lease/token renewal task
//! - `session.rs` - Shared client handle, token and retry-with-reauth
//! - `token.rs` - Token lifecycle manager
//! - `credentials.rs` - Database secrets engine operations

mod api;
mod credentials;
mod env;
mod openbao;
mod session;
mod token;
mod vault;
mod watcher;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use api::ApiConnection;
pub use credentials::{DatabaseCredentials, LeaseOperations};
pub use env::{detect_auth_mode, detect_backend, env_with_prefix, AuthMode, BackendSettings};
pub use openbao::OpenBaoSecretsClient;
pub use session::{BackendClientFactory, BackendSession, ClientFactory};
pub use token::{start_token_management, TokenManager, TokenState};
pub use vault::VaultSecretsClient;
pub use watcher::{LeaseWatcher, RenewalOutput, WatchEvent};

/// Which flavor of backend is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    Vault,
    OpenBao,
}

impl BackendType {
    /// Prefix of the environment variables read for this backend
    #[must_use]
    pub fn env_prefix(self) -> &'static str {
        match self {
            Self::Vault => "VAULT",
            Self::OpenBao => "BAO",
        }
    }

    /// The other flavor, used for cross-prefix fallback
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Vault => Self::OpenBao,
            Self::OpenBao => Self::Vault,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vault => write!(f, "vault"),
            Self::OpenBao => write!(f, "openbao"),
        }
    }
}

/// Errors returned by backend operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no secrets backend configured: set either BAO_ADDR or VAULT_ADDR")]
    NotConfigured,
    #[error("invalid backend configuration: {0}")]
    Configuration(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("backend returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("request to secrets backend failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("secrets backend client error: {0}")]
    Request(String),
    #[error("unexpected backend response: {0}")]
    Decode(String),
    #[error("operation failed after {attempts} retries: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<BackendError>,
    },
}

impl BackendError {
    /// Whether the backend rejected the token (HTTP 403 / permission denied)
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Api { status, message } => {
                *status == 403 || message.to_lowercase().contains("permission denied")
            }
            Self::Auth(message) => message.to_lowercase().contains("permission denied"),
            _ => false,
        }
    }

    /// Whether the error is a missing or invalid configuration rather than a runtime failure
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured | Self::Configuration(_))
    }
}

/// Authentication block of a login or token renewal response
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AuthInfo {
    #[serde(default)]
    pub client_token: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub lease_duration: i64,
    #[serde(default)]
    pub renewable: bool,
}

/// Uniform response of every backend call
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SecretResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub lease_duration: i64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub data: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub auth: Option<AuthInfo>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

impl SecretResponse {
    /// Value of `key` in `data` rendered as a string
    ///
    /// Strings are returned as-is, numbers and booleans in their JSON form.
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<String> {
        self.data.as_ref()?.get(key).and_then(value_to_string)
    }

    /// Token carried by the response, if any
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .map(|a| a.client_token.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Whether the token or lease can be extended
    #[must_use]
    pub fn is_renewable(&self) -> bool {
        self.auth.as_ref().map_or(self.renewable, |a| a.renewable)
    }

    /// Seconds left on the token or lease
    #[must_use]
    pub fn ttl(&self) -> i64 {
        self.auth
            .as_ref()
            .map_or(self.lease_duration, |a| a.lease_duration)
    }
}

/// Scalar JSON values as strings; objects and arrays serialised
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Operations every backend flavor supports
#[async_trait]
pub trait SecretsClient: Send + Sync + fmt::Debug {
    /// Authenticate with the configured auth mode and adopt the resulting token
    async fn login(&self) -> Result<SecretResponse, BackendError>;

    /// Replace the token sent with every request
    fn set_token(&self, token: &str);

    /// Read a path; `Ok(None)` when nothing exists there
    async fn read(&self, path: &str) -> Result<Option<SecretResponse>, BackendError>;

    /// Latest version of the KV v2 secret at `path` under `mount`; `Ok(None)`
    /// when it does not exist
    async fn read_kv2(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<Option<HashMap<String, Value>>, BackendError>;

    /// Write `data` to a path
    async fn write(
        &self,
        path: &str,
        data: HashMap<String, Value>,
    ) -> Result<Option<SecretResponse>, BackendError>;

    /// Extend a lease by `increment` seconds
    async fn renew(&self, lease_id: &str, increment: i64) -> Result<SecretResponse, BackendError>;

    /// Revoke a lease
    async fn revoke(&self, lease_id: &str) -> Result<(), BackendError>;

    /// Look up a lease; fails when it does not exist
    async fn lookup(&self, lease_id: &str) -> Result<SecretResponse, BackendError>;

    /// Look up the current token
    async fn lookup_self(&self) -> Result<SecretResponse, BackendError>;

    /// Start renewing the lease or token held by `secret`
    fn new_lease_watcher(&self, secret: &SecretResponse) -> Result<LeaseWatcher, BackendError>;

    /// Flavor of this client
    fn backend(&self) -> BackendType;

    /// Base address of the backend
    fn address(&self) -> &str;
}
