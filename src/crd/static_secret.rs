//! # ManagedStaticSecret
//!
//! Declarative secret whose values are resolved from references.

use std::collections::BTreeMap;

use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ManagedStaticSecret Custom Resource Definition
///
/// Every entry in `data` is resolved and written to a Secret owned by this object.
///
/// # Example
///
/// ```yaml
/// apiVersion: secret-management.microscaler.io/v1
/// kind: ManagedStaticSecret
/// metadata:
///   name: app-credentials
///   namespace: default
/// spec:
///   ttl: 3600
///   data:
///     username:
///       ref: ref+vault://secret/app#username
///     password:
///       ref: ref+vault://secret/app#password
///     ca.crt:
///       ref: ref+k8s://cert-manager/root-ca#ca.crt
///   template:
///     config.yaml: |
///       user: {{ .username }}
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ManagedStaticSecret",
    group = "secret-management.microscaler.io",
    version = "v1",
    namespaced,
    shortname = "mss",
    printcolumn = r#"{"name":"Secret", "type":"string", "jsonPath":".spec.name"}, {"name":"TTL", "type":"integer", "jsonPath":".spec.ttl"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedStaticSecretSpec {
    /// Destination Secret name, defaults to the object name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Output key to value reference
    #[serde(default)]
    pub data: BTreeMap<String, DataSource>,
    /// Output key to template body, rendered against the resolved values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template: BTreeMap<String, String>,
    /// Seconds before the destination Secret is resolved again
    /// 0 uses the controller default
    #[serde(default)]
    pub ttl: i64,
    /// Destination Secret type
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
    /// Databases whose user password follows the resolved value
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<Database>,
}

/// A single value reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    /// Backend URI, `ref+k8s://namespace/secret#key` pointer, or a literal
    #[serde(rename = "ref")]
    pub reference: String,
    /// `base64` or `text` (default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl DataSource {
    /// Whether the resolved value must be base64-decoded
    #[must_use]
    pub fn is_base64(&self) -> bool {
        self.encoding
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("base64"))
    }
}

/// Database whose user password is kept in sync with this secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    /// `postgres`, `mysql` or `elastic`
    pub driver: String,
    /// Admin credentials used to change the password
    pub login_credentials: DatabaseLoginCredentials,
    /// Port, engine default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Key in `data` holding the user name to update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_key: Option<String>,
    /// Key in `data` holding the new password
    pub password_key: String,
    /// MySQL host part of the account, `%` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_host: Option<String>,
    /// Hosts tried in order until one succeeds
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Reference to the Secret holding database admin credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseLoginCredentials {
    pub secret_name: String,
    /// Defaults to the namespace of the ManagedStaticSecret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Key holding the admin user name, engine default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_key: Option<String>,
    pub password_key: String,
}

impl ManagedStaticSecret {
    /// Name of the Secret this object writes
    #[must_use]
    pub fn secret_name(&self) -> String {
        self.spec
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    /// Destination Secret type
    #[must_use]
    pub fn secret_type(&self) -> String {
        self.spec
            .secret_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Opaque".to_string())
    }
}
