//! # Vault Adapter
//!
//! [`SecretsClient`] for HashiCorp Vault. Enterprise namespaces are sent with
//! every request when `VAULT_NAMESPACE` is set.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use super::api::ApiConnection;
use super::env::BackendSettings;
use super::watcher::{self, LeaseWatcher};
use super::{BackendError, BackendType, SecretResponse, SecretsClient};

/// Client for a Vault server
#[derive(Debug, Clone)]
pub struct VaultSecretsClient {
    api: ApiConnection,
}

impl VaultSecretsClient {
    /// Build a client from settings detected for Vault
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub fn new(settings: BackendSettings) -> Result<Self, BackendError> {
        if settings.backend != BackendType::Vault {
            return Err(BackendError::Configuration(format!(
                "Vault client cannot use {} settings",
                settings.backend
            )));
        }
        Ok(Self {
            api: ApiConnection::new(settings)?,
        })
    }
}

#[async_trait]
impl SecretsClient for VaultSecretsClient {
    async fn login(&self) -> Result<SecretResponse, BackendError> {
        self.api.login().await
    }

    fn set_token(&self, token: &str) {
        self.api.adopt_token(Some(token.to_string()));
    }

    async fn read(&self, path: &str) -> Result<Option<SecretResponse>, BackendError> {
        self.api.read(path).await
    }

    async fn read_kv2(
        &self,
        mount: &str,
        path: &str,
    ) -> Result<Option<HashMap<String, Value>>, BackendError> {
        self.api.read_kv2(mount, path).await
    }

    async fn write(
        &self,
        path: &str,
        data: HashMap<String, Value>,
    ) -> Result<Option<SecretResponse>, BackendError> {
        self.api.write(path, data).await
    }

    async fn renew(&self, lease_id: &str, increment: i64) -> Result<SecretResponse, BackendError> {
        self.api.renew(lease_id, increment).await
    }

    async fn revoke(&self, lease_id: &str) -> Result<(), BackendError> {
        self.api.revoke(lease_id).await
    }

    async fn lookup(&self, lease_id: &str) -> Result<SecretResponse, BackendError> {
        self.api.lookup(lease_id).await
    }

    async fn lookup_self(&self) -> Result<SecretResponse, BackendError> {
        self.api.lookup_self().await
    }

    fn new_lease_watcher(&self, secret: &SecretResponse) -> Result<LeaseWatcher, BackendError> {
        if !secret.is_renewable() {
            return Err(BackendError::Configuration(
                "cannot watch a Vault secret that is not renewable".to_string(),
            ));
        }
        Ok(watcher::spawn(self.api.clone(), secret.clone()))
    }

    fn backend(&self) -> BackendType {
        BackendType::Vault
    }

    fn address(&self) -> &str {
        &self.api.settings().address
    }
}
