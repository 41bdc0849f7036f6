//! # OpenBao Adapter
//!
//! [`SecretsClient`] for OpenBao. Namespaces are sent with every request when
//! `BAO_NAMESPACE` is set.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use super::api::ApiConnection;
use super::env::BackendSettings;
use super::watcher::{self, LeaseWatcher};
use super::{BackendError, BackendType, SecretResponse, SecretsClient};

/// Client for an OpenBao server
#[derive(Debug, Clone)]
pub struct OpenBaoSecretsClient {
    api: ApiConnection,
}

impl OpenBaoSecretsClient {
    /// Build a client from settings detected for OpenBao
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub fn new(settings: BackendSettings) -> Result<Self, BackendError> {
        if settings.backend != BackendType::OpenBao {
            return Err(BackendError::Configuration(format!(
                "OpenBao client cannot use {} settings",
                settings.backend
            )));
        }
        Ok(Self {
            api: ApiConnection::new(settings)?,
        })
    }
}

#[async_trait]
impl SecretsClient for OpenBaoSecretsClient {
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
                "cannot watch an OpenBao secret that is not renewable".to_string(),
            ));
        }
        Ok(watcher::spawn(self.api.clone(), secret.clone()))
    }

    fn backend(&self) -> BackendType {
        BackendType::OpenBao
    }

    fn address(&self) -> &str {
        &self.api.settings().address
    }
}
