//! # Backend Session
//!
//! Owns the live backend client and the current token for the whole process.
//!
//! The client handle sits behind a read/write lock with double-checked creation,
//! so concurrent reconciliations share one client and only one of them builds it.
//! The token has its own lock so routine token updates never stall client reads.

use std::future::Future;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use super::env::BackendSettings;
use super::openbao::OpenBaoSecretsClient;
use super::vault::VaultSecretsClient;
use super::{BackendError, BackendType, SecretsClient};
use crate::constants::{BACKEND_MAX_RETRIES, BACKEND_RETRY_DELAY_SECS};
use crate::observability::metrics;

/// Builds backend clients for the session
pub trait ClientFactory: Send + Sync + std::fmt::Debug {
    /// Create a fresh client
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    fn create(&self) -> Result<Arc<dyn SecretsClient>, BackendError>;

    /// Address reported in metrics and logs
    fn address(&self) -> String;
}

/// Builds the adapter matching the detected backend flavor
///
/// Without settings every `create` fails with [`BackendError::NotConfigured`].
#[derive(Debug, Clone)]
pub struct BackendClientFactory {
    settings: Option<BackendSettings>,
}

impl BackendClientFactory {
    #[must_use]
    pub fn new(settings: Option<BackendSettings>) -> Self {
        Self { settings }
    }
}

impl ClientFactory for BackendClientFactory {
    fn create(&self) -> Result<Arc<dyn SecretsClient>, BackendError> {
        let settings = self.settings.clone().ok_or(BackendError::NotConfigured)?;
        Ok(match settings.backend {
            BackendType::Vault => Arc::new(VaultSecretsClient::new(settings)?),
            BackendType::OpenBao => Arc::new(OpenBaoSecretsClient::new(settings)?),
        })
    }

    fn address(&self) -> String {
        self.settings
            .as_ref()
            .map(|s| s.address.clone())
            .unwrap_or_default()
    }
}

/// Shared backend client, token and retry-with-reauth policy
pub struct BackendSession {
    factory: Arc<dyn ClientFactory>,
    client: RwLock<Option<Arc<dyn SecretsClient>>>,
    token: StdRwLock<Option<String>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field("factory", &self.factory)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl BackendSession {
    #[must_use]
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            client: RwLock::new(None),
            token: StdRwLock::new(None),
            max_retries: BACKEND_MAX_RETRIES,
            retry_delay: Duration::from_secs(BACKEND_RETRY_DELAY_SECS),
        }
    }

    /// Override the retry-with-reauth bound and delay
    #[must_use]
    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Address of the configured backend
    #[must_use]
    pub fn address(&self) -> String {
        self.factory.address()
    }

    /// Return the live client, creating it on first use
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn get_or_create(&self) -> Result<Arc<dyn SecretsClient>, BackendError> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(Arc::clone(client));
        }

        let mut guard = self.client.write().await;
        // another task may have created it while we waited for the write lock
        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }

        let client = self.build_client()?;
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Throw the current client away and build a new one
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn force_refresh(&self) -> Result<Arc<dyn SecretsClient>, BackendError> {
        let mut guard = self.client.write().await;
        let client = self.build_client()?;
        *guard = Some(Arc::clone(&client));
        info!(addr = %self.factory.address(), "♻️  Recreated secrets backend client");
        Ok(client)
    }

    fn build_client(&self) -> Result<Arc<dyn SecretsClient>, BackendError> {
        let client = self.factory.create().inspect_err(|e| {
            metrics::set_vault_error(&self.factory.address(), chrono::Utc::now().timestamp());
            warn!(addr = %self.factory.address(), error = %e, "Failed to create secrets backend client");
        })?;
        metrics::set_vault_error(&self.factory.address(), 0);

        if let Some(token) = self.current_token() {
            client.set_token(&token);
        }
        Ok(client)
    }

    /// Store `token` and apply it to the live client
    pub async fn set_token(&self, token: &str) {
        *self
            .token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(token.to_string());

        if let Some(client) = self.client.read().await.as_ref() {
            client.set_token(token);
        }
    }

    /// Token most recently stored in the session
    #[must_use]
    pub fn current_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Recreate the client and log in again
    async fn reauthenticate(&self) {
        let client = match self.force_refresh().await {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Could not recreate backend client for re-authentication");
                return;
            }
        };

        match client.login().await {
            Ok(auth) => {
                if let Some(token) = auth.token() {
                    self.set_token(token).await;
                }
            }
            Err(e) => warn!(error = %e, "Re-authentication failed"),
        }
    }

    /// Run a backend operation, re-authenticating and retrying on permission errors
    ///
    /// Errors other than permission denied are returned immediately. After
    /// `max_retries` denied attempts the last error is wrapped in
    /// [`BackendError::RetriesExhausted`].
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub async fn execute_with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, BackendError>
    where
        F: FnMut(Arc<dyn SecretsClient>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            let client = self.get_or_create().await?;

            match operation(client).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_permission_denied() => {
                    warn!(
                        attempt = attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "🔄 Backend denied the request, re-authenticating"
                    );
                    last_error = Some(e);
                    self.reauthenticate().await;
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(BackendError::RetriesExhausted {
            attempts: self.max_retries,
            source: Box::new(last_error.unwrap_or(BackendError::Auth(
                "permission denied".to_string(),
            ))),
        })
    }
}
