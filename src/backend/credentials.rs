//! # Database Secrets Engine
//!
//! Credential issue, renewal, revocation and lease lookup, all routed through
//! the session's retry-with-reauth wrapper.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::session::BackendSession;
use super::{value_to_string, BackendError, SecretResponse};
use crate::crd::VaultRole;

/// Credentials issued by a database secrets engine
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    /// Full backend lease id, e.g. `database/creds/app/abc`
    pub lease_id: String,
    pub lease_duration: i64,
    /// Connection URL with the credentials substituted
    pub connection_url: Option<String>,
    /// `host:port` list, comma separated
    pub hosts: Option<String>,
}

impl std::fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("lease_id", &self.lease_id)
            .field("lease_duration", &self.lease_duration)
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

/// Lease-level operations used by the leased credential reconciler
#[async_trait]
pub trait LeaseOperations: Send + Sync {
    /// Issue new credentials for `role`
    async fn issue_credentials(&self, role: &VaultRole) -> Result<DatabaseCredentials, BackendError>;

    /// Extend a lease by `increment` seconds
    async fn renew_lease(&self, lease_id: &str, increment: i64) -> Result<SecretResponse, BackendError>;

    /// Revoke a lease
    async fn revoke_lease(&self, lease_id: &str) -> Result<(), BackendError>;

    /// Whether the backend still knows the lease
    async fn is_lease_valid(&self, lease_id: &str) -> bool;
}

#[async_trait]
impl LeaseOperations for BackendSession {
    async fn issue_credentials(&self, role: &VaultRole) -> Result<DatabaseCredentials, BackendError> {
        let creds_path = role.creds_path();
        let issued = self
            .execute_with_retry(|client| {
                let path = creds_path.clone();
                async move { client.read(&path).await }
            })
            .await?
            .ok_or_else(|| BackendError::Decode("backend did not return credentials".to_string()))?;

        let username = issued.data_str("username").filter(|u| !u.is_empty());
        let password = issued.data_str("password").filter(|p| !p.is_empty());
        let (Some(username), Some(password)) = (username, password) else {
            return Err(BackendError::Decode(
                "backend did not return credentials".to_string(),
            ));
        };

        let config_path = role.config_path();
        let config = self
            .execute_with_retry(|client| {
                let path = config_path.clone();
                async move { client.read(&path).await }
            })
            .await;

        let (connection_url, hosts) = match config {
            Ok(Some(config)) => connection_details(&config, &username, &password)?,
            Ok(None) => (None, None),
            Err(e) => {
                info!(path = %config_path, error = %e, "Could not get access details for the database");
                (None, None)
            }
        };

        debug!(lease_id = %issued.lease_id, ttl = issued.lease_duration, "Issued database credentials");

        Ok(DatabaseCredentials {
            username,
            password,
            lease_id: issued.lease_id,
            lease_duration: issued.lease_duration,
            connection_url,
            hosts,
        })
    }

    async fn renew_lease(&self, lease_id: &str, increment: i64) -> Result<SecretResponse, BackendError> {
        self.execute_with_retry(|client| {
            let lease_id = lease_id.to_string();
            async move { client.renew(&lease_id, increment).await }
        })
        .await
    }

    async fn revoke_lease(&self, lease_id: &str) -> Result<(), BackendError> {
        self.execute_with_retry(|client| {
            let lease_id = lease_id.to_string();
            async move { client.revoke(&lease_id).await }
        })
        .await
    }

    async fn is_lease_valid(&self, lease_id: &str) -> bool {
        let lookup = self
            .execute_with_retry(|client| {
                let lease_id = lease_id.to_string();
                async move { client.lookup(&lease_id).await }
            })
            .await;

        match lookup {
            Ok(_) => true,
            Err(e) => {
                debug!(lease_id = %lease_id, error = %e, "Lease lookup failed");
                false
            }
        }
    }
}

/// Pull `connection_url` and `hosts` out of a database connection config
///
/// The URL gets the issued username and password substituted; each host gets
/// the configured port appended when both are known.
fn connection_details(
    config: &SecretResponse,
    username: &str,
    password: &str,
) -> Result<(Option<String>, Option<String>), BackendError> {
    let details = config
        .data
        .as_ref()
        .and_then(|d| d.get("connection_details"))
        .and_then(Value::as_object)
        .ok_or_else(|| {
            BackendError::Decode(
                "backend did not return the connection details for the database".to_string(),
            )
        })?;

    let connection_url = details
        .get("connection_url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(|u| {
            u.replacen("{{username}}", username, 1)
                .replacen("{{password}}", password, 1)
        });

    let hosts = match details.get("hosts") {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(value_to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Some(other) => value_to_string(other),
        None => None,
    }
    .filter(|h| !h.is_empty());

    let port = details
        .get("port")
        .and_then(value_to_string)
        .filter(|p| !p.is_empty());

    let hosts = match (hosts, port) {
        (Some(hosts), Some(port)) => Some(
            hosts
                .split(',')
                .map(|h| format!("{}:{port}", h.trim()))
                .collect::<Vec<_>>()
                .join(","),
        ),
        (hosts, _) => hosts,
    };

    Ok((connection_url, hosts))
}
