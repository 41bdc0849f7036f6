//! # ManagedLeasedCredential
//!
//! Dynamic database credential issued and leased by Vault or OpenBao.

use std::collections::BTreeMap;

use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ManagedLeasedCredential Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: secret-management.microscaler.io/v1
/// kind: ManagedLeasedCredential
/// metadata:
///   name: orders-db
///   namespace: default
/// spec:
///   secretName: orders-db-credentials
///   vault:
///     mount: database
///     role: orders
///   renew: true
///   rollout:
///     - kind: Deployment
///       name: orders-api
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ManagedLeasedCredential",
    group = "secret-management.microscaler.io",
    version = "v1",
    namespaced,
    shortname = "mlc",
    printcolumn = r#"{"name":"Secret", "type":"string", "jsonPath":".spec.secretName"}, {"name":"Role", "type":"string", "jsonPath":".spec.vault.role"}, {"name":"Renew", "type":"boolean", "jsonPath":".spec.renew"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedLeasedCredentialSpec {
    /// Destination Secret name, defaults to the object name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// Issuing endpoint, `{mount}/creds/{role}`
    pub vault: VaultRole,
    /// Output key renames, e.g. `username: DB_USER`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secret: BTreeMap<String, String>,
    /// Extend the current lease instead of issuing new credentials when possible
    #[serde(default)]
    pub renew: bool,
    /// Workloads restarted after the credential changes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollout: Vec<RolloutTarget>,
    /// Output key to template body; replaces the default output when set
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template: BTreeMap<String, String>,
}

/// Database secrets engine mount and role
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct VaultRole {
    pub role: String,
    pub mount: String,
}

impl VaultRole {
    /// Path new credentials are read from
    #[must_use]
    pub fn creds_path(&self) -> String {
        format!("{}/creds/{}", self.mount, self.role)
    }

    /// Path of the connection configuration for this mount
    #[must_use]
    pub fn config_path(&self) -> String {
        format!("{}/config/{}", self.mount, self.mount)
    }

    /// Full backend lease id for a stored lease suffix
    #[must_use]
    pub fn lease_path(&self, lease_id: &str) -> String {
        format!("{}/creds/{}/{lease_id}", self.mount, self.role)
    }
}

/// Workload restarted after rotation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct RolloutTarget {
    /// `Deployment` or `StatefulSet`
    pub kind: String,
    pub name: String,
}

impl ManagedLeasedCredential {
    /// Name of the Secret this object writes
    #[must_use]
    pub fn secret_name(&self) -> String {
        self.spec
            .secret_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    /// Output key for a base credential field, honouring the rename map
    #[must_use]
    pub fn output_key<'a>(&'a self, field: &'a str) -> &'a str {
        self.spec
            .secret
            .get(field)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .unwrap_or(field)
    }
}
