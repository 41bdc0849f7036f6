//! # Object Store
//!
//! The slice of the Kubernetes API the reconcilers need: destination Secrets,
//! finalizers on the managed objects, and rollout targets.
//!
//! Reconcilers only see [`ObjectStore`]; [`KubeStore`] is the live
//! implementation and tests substitute an in-memory one.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use std::fmt;
use tracing::debug;

use crate::constants::MANAGED_BY;
use crate::crd::{ManagedLeasedCredential, ManagedStaticSecret};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// The two managed kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedKind {
    StaticSecret,
    LeasedCredential,
}

impl ManagedKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StaticSecret => "ManagedStaticSecret",
            Self::LeasedCredential => "ManagedLeasedCredential",
        }
    }
}

impl fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workloads that can be restarted after a credential change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    /// Case-insensitive kind lookup; `None` for kinds that cannot be rolled out
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "deployment" => Some(Self::Deployment),
            "statefulset" => Some(Self::StatefulSet),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kubernetes operations used by the reconcilers
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a Secret; `Ok(None)` when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    /// Create a Secret; [`StoreError::AlreadyExists`] when the name is taken
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Replace an existing Secret
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Delete a Secret; [`StoreError::NotFound`] when it does not exist
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Overwrite the finalizer list of a managed object
    async fn set_finalizers(
        &self,
        kind: ManagedKind,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError>;

    /// Ready replicas of a workload; `Ok(None)` when it does not exist
    async fn ready_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>, StoreError>;

    /// Set an annotation on a workload's pod template
    async fn annotate_pod_template(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError>;
}

/// [`ObjectStore`] over a live cluster
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map 404 and 409 onto the typed variants
fn classify(error: kube::Error, kind: &str, namespace: &str, name: &str) -> StoreError {
    match error {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        }
        other => StoreError::Api(other),
    }
}

fn object_key(secret: &Secret) -> Result<(String, String), StoreError> {
    let namespace = secret
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| StoreError::Invalid("secret has no namespace".to_string()))?;
    let name = secret
        .metadata
        .name
        .clone()
        .ok_or_else(|| StoreError::Invalid("secret has no name".to_string()))?;
    Ok((namespace, name))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        match self.secrets(namespace).get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = object_key(secret)?;
        self.secrets(&namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| classify(e, "Secret", &namespace, &name))
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = object_key(secret)?;
        let api = self.secrets(&namespace);

        // replace needs the live resourceVersion
        let mut secret = secret.clone();
        if secret.metadata.resource_version.is_none() {
            let current = api
                .get(&name)
                .await
                .map_err(|e| classify(e, "Secret", &namespace, &name))?;
            secret.metadata.resource_version = current.metadata.resource_version;
        }

        api.replace(&name, &PostParams::default(), &secret)
            .await
            .map_err(|e| classify(e, "Secret", &namespace, &name))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, "Secret", namespace, name))
    }

    async fn set_finalizers(
        &self,
        kind: ManagedKind,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        let params = PatchParams::apply(MANAGED_BY);

        let result = match kind {
            ManagedKind::StaticSecret => {
                let api: Api<ManagedStaticSecret> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await.map(|_| ())
            }
            ManagedKind::LeasedCredential => {
                let api: Api<ManagedLeasedCredential> =
                    Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await.map(|_| ())
            }
        };
        result.map_err(|e| classify(e, kind.as_str(), namespace, name))
    }

    async fn ready_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>, StoreError> {
        let result = match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.get(name)
                    .await
                    .map(|d| d.status.and_then(|s| s.ready_replicas).unwrap_or(0))
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.get(name)
                    .await
                    .map(|s| s.status.and_then(|s| s.ready_replicas).unwrap_or(0))
            }
        };

        match result {
            Ok(ready) => Ok(Some(ready)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn annotate_pod_template(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": { key: value }
                    }
                }
            }
        });
        let params = PatchParams::default();
        debug!(kind = %kind, namespace, name, "Patching pod template annotation");

        let result = match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await.map(|_| ())
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await.map(|_| ())
            }
        };
        result.map_err(|e| classify(e, kind.as_str(), namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_kind_parse() {
        assert_eq!(WorkloadKind::parse("Deployment"), Some(WorkloadKind::Deployment));
        assert_eq!(WorkloadKind::parse("deployment"), Some(WorkloadKind::Deployment));
        assert_eq!(WorkloadKind::parse("STATEFULSET"), Some(WorkloadKind::StatefulSet));
        assert_eq!(WorkloadKind::parse("DaemonSet"), None);
        assert_eq!(WorkloadKind::parse(""), None);
    }

    #[test]
    fn test_object_key_requires_name_and_namespace() {
        let mut secret = Secret::default();
        assert!(matches!(object_key(&secret), Err(StoreError::Invalid(_))));
        secret.metadata.namespace = Some("ns".to_string());
        secret.metadata.name = Some("s".to_string());
        assert_eq!(
            object_key(&secret).expect("complete key"),
            ("ns".to_string(), "s".to_string())
        );
    }

    #[test]
    fn test_error_predicates() {
        let not_found = StoreError::NotFound {
            kind: "Secret".to_string(),
            namespace: "ns".to_string(),
            name: "s".to_string(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_already_exists());
        assert_eq!(not_found.to_string(), "Secret ns/s not found");
    }
}
