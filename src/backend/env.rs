//! # Backend Settings
//!
//! Resolves which backend to talk to and how to authenticate from environment
//! variables. Every `{PREFIX}_*` variable falls back to the other prefix when
//! unset, so `BAO_TOKEN` and `VAULT_TOKEN` are interchangeable.

use tracing::warn;

use super::{BackendError, BackendType};
use crate::constants::SERVICE_ACCOUNT_TOKEN_PATH;

/// How the client obtains its token, in order of precedence
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// `{PREFIX}_TOKEN`
    Token(String),
    /// `{PREFIX}_LOGIN_USER` and `{PREFIX}_LOGIN_PASSWORD`
    UserPass {
        username: String,
        password: String,
        mount: String,
    },
    /// `{PREFIX}_APP_ROLE` and `{PREFIX}_SECRET_ID`
    AppRole {
        role_id: String,
        secret_id: String,
        mount: String,
    },
    /// Service account JWT exchanged for `{PREFIX}_ROLE_ID`
    Kubernetes {
        role: String,
        mount: String,
        jwt_path: String,
    },
}

impl AuthMode {
    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::UserPass { .. } => "userpass",
            Self::AppRole { .. } => "approle",
            Self::Kubernetes { .. } => "kubernetes",
        }
    }
}

// Credentials stay out of logs
impl std::fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(***)"),
            Self::UserPass {
                username, mount, ..
            } => f
                .debug_struct("UserPass")
                .field("username", username)
                .field("mount", mount)
                .finish_non_exhaustive(),
            Self::AppRole { role_id, mount, .. } => f
                .debug_struct("AppRole")
                .field("role_id", role_id)
                .field("mount", mount)
                .finish_non_exhaustive(),
            Self::Kubernetes {
                role,
                mount,
                jwt_path,
            } => f
                .debug_struct("Kubernetes")
                .field("role", role)
                .field("mount", mount)
                .field("jwt_path", jwt_path)
                .finish(),
        }
    }
}

/// Everything needed to build a backend client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub backend: BackendType,
    pub address: String,
    pub auth: AuthMode,
    pub skip_verify: bool,
    /// Enterprise/OpenBao namespace sent as `X-Vault-Namespace`
    pub namespace: Option<String>,
}

impl BackendSettings {
    /// Resolve settings from the process environment
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub fn from_env() -> Result<Self, BackendError> {
        Self::from_lookup(process_env)
    }

    /// Resolve settings through an arbitrary variable lookup
    ///
    /// Fails with [`BackendError::NotConfigured`] when neither address is set and
    /// with [`BackendError::Configuration`] when no auth mode can be derived.
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BackendError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (backend, address) = detect_backend(&lookup)?;
        let auth = detect_auth_mode(&lookup, backend)?;
        let skip_verify = env_with_prefix(&lookup, backend, "SKIP_VERIFY").is_some_and(|v| {
            let v = v.to_lowercase();
            v == "true" || v == "1" || v == "yes"
        });
        let namespace = env_with_prefix(&lookup, backend, "NAMESPACE");

        Ok(Self {
            backend,
            address: address.trim_end_matches('/').to_string(),
            auth,
            skip_verify,
            namespace,
        })
    }
}

/// Non-empty process environment variable
pub(crate) fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Pick the backend flavor from `BAO_ADDR` / `VAULT_ADDR`
///
/// OpenBao wins when both are set; the conflict is logged.
#[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
pub fn detect_backend<F>(lookup: &F) -> Result<(BackendType, String), BackendError>
where
    F: Fn(&str) -> Option<String>,
{
    let bao = lookup("BAO_ADDR").filter(|v| !v.is_empty());
    let vault = lookup("VAULT_ADDR").filter(|v| !v.is_empty());

    match (bao, vault) {
        (Some(bao), Some(vault)) => {
            warn!(
                bao_addr = %bao,
                vault_addr = %vault,
                "⚠️  Both BAO_ADDR and VAULT_ADDR are set, using OpenBao"
            );
            Ok((BackendType::OpenBao, bao))
        }
        (Some(bao), None) => Ok((BackendType::OpenBao, bao)),
        (None, Some(vault)) => Ok((BackendType::Vault, vault)),
        (None, None) => Err(BackendError::NotConfigured),
    }
}

/// Read `{PREFIX}_{suffix}`, falling back to the other backend's prefix
pub fn env_with_prefix<F>(lookup: &F, backend: BackendType, suffix: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    [backend, backend.other()]
        .into_iter()
        .find_map(|b| lookup(&format!("{}_{suffix}", b.env_prefix())).filter(|v| !v.is_empty()))
}

/// Work out the auth mode: token, userpass, approle, then Kubernetes
#[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
pub fn detect_auth_mode<F>(lookup: &F, backend: BackendType) -> Result<AuthMode, BackendError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| env_with_prefix(lookup, backend, suffix);

    if let Some(token) = var("TOKEN") {
        return Ok(AuthMode::Token(token));
    }

    if let (Some(username), Some(password)) = (var("LOGIN_USER"), var("LOGIN_PASSWORD")) {
        return Ok(AuthMode::UserPass {
            username,
            password,
            mount: var("USERPASS_MOUNT_PATH").unwrap_or_else(|| "userpass".to_string()),
        });
    }

    if let (Some(role_id), Some(secret_id)) = (var("APP_ROLE"), var("SECRET_ID")) {
        return Ok(AuthMode::AppRole {
            role_id,
            secret_id,
            mount: var("APPROLE_MOUNT_PATH").unwrap_or_else(|| "approle".to_string()),
        });
    }

    let role = var("ROLE_ID").ok_or_else(|| {
        BackendError::Configuration(format!(
            "no authentication configured: set {0}_TOKEN, {0}_LOGIN_USER/{0}_LOGIN_PASSWORD, \
             {0}_APP_ROLE/{0}_SECRET_ID or {0}_ROLE_ID",
            backend.env_prefix()
        ))
    })?;

    Ok(AuthMode::Kubernetes {
        role,
        mount: var("KUBERNETES_MOUNT_POINT").unwrap_or_else(|| "kubernetes".to_string()),
        jwt_path: SERVICE_ACCOUNT_TOKEN_PATH.to_string(),
    })
}
