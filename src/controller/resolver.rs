//! # Value Resolver
//!
//! Turns value references into plain strings.
//!
//! | Reference | Source |
//! |---|---|
//! | `ref+vault://path#key`, `ref+openbao://path#key` | secrets backend (KV v1 or v2) |
//! | `ref+echo://text` | the text itself |
//! | `ref+file://path#key` | a local file, optionally a key inside YAML/JSON |
//! | anything else, including unknown `ref+` schemes | returned verbatim |
//!
//! `ref+k8s://namespace/secret#key` pointers are not resolved here; they are
//! parsed with [`K8sSecretRef::parse`] and read through the object store.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::backend::{BackendError, BackendSession};

/// Prefix of pointers into Kubernetes Secrets
pub const K8S_REF_PREFIX: &str = "ref+k8s://";

const REF_PREFIX: &str = "ref+";

static K8S_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ref\+k8s://(?P<namespace>\S+)/(?P<secretName>\S+)#(?P<key>\S+)")
        .expect("Failed to compile ref+k8s pattern - this should never happen")
});

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("malformed reference {0:?}")]
    Malformed(String),
    #[error("nothing found at {0:?}")]
    NotFound(String),
    #[error("secrets backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// Resolves a single reference to its value
#[async_trait]
pub trait ValueResolver: Send + Sync {
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    async fn resolve(&self, reference: &str) -> Result<String, ResolveError>;
}

/// A parsed `ref+k8s://namespace/secret#key` pointer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct K8sSecretRef {
    pub namespace: String,
    pub secret_name: String,
    pub key: String,
}

impl K8sSecretRef {
    /// Parse a pointer; `None` when it does not have all three parts
    #[must_use]
    pub fn parse(reference: &str) -> Option<Self> {
        let caps = K8S_REF.captures(reference)?;
        Some(Self {
            namespace: caps.name("namespace")?.as_str().to_string(),
            secret_name: caps.name("secretName")?.as_str().to_string(),
            key: caps.name("key")?.as_str().to_string(),
        })
    }
}

/// Whether `reference` points into a Kubernetes Secret
#[must_use]
pub fn is_k8s_ref(reference: &str) -> bool {
    reference.starts_with(K8S_REF_PREFIX)
}

/// Resolver backed by the shared secrets backend session
#[derive(Debug, Clone)]
pub struct BackendResolver {
    session: Option<Arc<BackendSession>>,
}

impl BackendResolver {
    /// Without a session, backend references fail with [`BackendError::NotConfigured`]
    #[must_use]
    pub fn new(session: Option<Arc<BackendSession>>) -> Self {
        Self { session }
    }

    async fn read_backend(&self, reference: &str, rest: &str) -> Result<String, ResolveError> {
        let session = self.session.as_ref().ok_or(BackendError::NotConfigured)?;
        let (path, fragment) = split_fragment(rest);
        // query parameters select backend options we do not support per reference
        let path = path.split('?').next().unwrap_or_default().trim_matches('/');
        if path.is_empty() {
            return Err(ResolveError::Malformed(reference.to_string()));
        }

        let mut data = read_path(session, path).await?;
        if data.is_none() {
            if let Some((mount, secret)) = kv2_location(path) {
                debug!(mount = mount, path = secret, "Retrying reference as a KV v2 secret");
                data = read_kv2(session, mount, secret).await?;
            }
        }
        let data = data.ok_or_else(|| ResolveError::NotFound(reference.to_string()))?;

        select(&data, fragment).ok_or_else(|| ResolveError::NotFound(reference.to_string()))
    }
}

#[async_trait]
impl ValueResolver for BackendResolver {
    async fn resolve(&self, reference: &str) -> Result<String, ResolveError> {
        let Some(without_prefix) = reference.strip_prefix(REF_PREFIX) else {
            return Ok(reference.to_string());
        };
        let Some((scheme, rest)) = without_prefix.split_once("://") else {
            return Ok(reference.to_string());
        };

        match scheme {
            "vault" | "openbao" => self.read_backend(reference, rest).await,
            "echo" => Ok(split_fragment(rest).0.to_string()),
            "file" => read_file(reference, rest).await,
            other => {
                debug!(scheme = other, "Unknown reference scheme, using the reference verbatim");
                Ok(reference.to_string())
            }
        }
    }
}

async fn read_path(session: &BackendSession, path: &str) -> Result<Option<Value>, ResolveError> {
    let response = session
        .execute_with_retry(|client| {
            let path = path.to_string();
            async move { client.read(&path).await }
        })
        .await?;

    Ok(response.and_then(|r| r.data).map(|data| {
        let data = Value::Object(data.into_iter().collect());
        unwrap_kv2(data)
    }))
}

async fn read_kv2(
    session: &BackendSession,
    mount: &str,
    secret: &str,
) -> Result<Option<Value>, ResolveError> {
    let data = session
        .execute_with_retry(|client| {
            let (mount, secret) = (mount.to_string(), secret.to_string());
            async move { client.read_kv2(&mount, &secret).await }
        })
        .await?;
    Ok(data.map(|data| Value::Object(data.into_iter().collect())))
}

/// `secret/app` is mount `secret`, secret `app`; paths already under `data/` are left alone
fn kv2_location(path: &str) -> Option<(&str, &str)> {
    let (mount, rest) = path.split_once('/')?;
    if rest.starts_with("data/") || rest.is_empty() {
        return None;
    }
    Some((mount, rest))
}

/// KV v2 wraps values as `{"data": {...}, "metadata": {...}}`
fn unwrap_kv2(data: Value) -> Value {
    match data {
        Value::Object(mut map)
            if map.len() == 2
                && map.get("data").is_some_and(Value::is_object)
                && map.contains_key("metadata") =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn split_fragment(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment.trim_start_matches('/'))),
        None => (rest, None),
    }
}

/// Walk `fragment` (`a/b/c`) into `data`; no fragment selects the whole document
fn select(data: &Value, fragment: Option<&str>) -> Option<String> {
    let mut current = data;
    if let Some(fragment) = fragment.filter(|f| !f.is_empty()) {
        for segment in fragment.split('/') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
    }
    match current {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

async fn read_file(reference: &str, rest: &str) -> Result<String, ResolveError> {
    let (path, fragment) = split_fragment(rest);
    if path.is_empty() {
        return Err(ResolveError::Malformed(reference.to_string()));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ResolveError::Io {
            path: path.to_string(),
            source,
        })?;

    let Some(fragment) = fragment else {
        return Ok(content);
    };
    let document: Value = serde_yaml::from_str(&content).map_err(|e| ResolveError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    select(&document, Some(fragment)).ok_or_else(|| ResolveError::NotFound(reference.to_string()))
}
