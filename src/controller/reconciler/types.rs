//! # Types
//!
//! Shared reconciler context and the reconciliation error taxonomy.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::backend::{BackendError, BackendSession, LeaseOperations};
use crate::config::ControllerConfig;
use crate::controller::backoff::ErrorBackoff;
use crate::controller::events::{recording_enabled, EventSink, KubeEventSink};
use crate::controller::resolver::{BackendResolver, ResolveError, ValueResolver};
use crate::controller::store::{KubeStore, ObjectStore, StoreError};
use crate::database::{DatabaseRotator, EngineRotator};

/// Errors that end a reconciliation pass
///
/// Every variant is retried through the error policy with the jittered
/// per-object backoff.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The object or the controller is misconfigured
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The backend rejected our credentials
    #[error("authentication error: {0}")]
    Auth(String),
    /// A value or credential could not be resolved
    #[error("resolution failed: {0}")]
    Resolution(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for ReconcilerError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::NotConfigured | BackendError::Configuration(_) => {
                Self::Configuration(error.to_string())
            }
            BackendError::Auth(message) => Self::Auth(message),
            BackendError::Decode(message) => Self::Resolution(message),
            other => Self::Backend(other),
        }
    }
}

/// Source of the current time, replaceable in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Everything a reconciliation pass needs, shared by both kinds
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ObjectStore>,
    pub resolver: Arc<dyn ValueResolver>,
    /// `None` when no backend address is configured
    pub leases: Option<Arc<dyn LeaseOperations>>,
    pub events: Arc<dyn EventSink>,
    pub databases: Arc<dyn DatabaseRotator>,
    pub config: ControllerConfig,
    // Consecutive failures per object (identified by namespace/name)
    pub backoff: Arc<ErrorBackoff>,
    pub clock: Clock,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("leases", &self.leases.is_some())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Context with no backend, no database rotation and the system clock
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        resolver: Arc<dyn ValueResolver>,
        events: Arc<dyn EventSink>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            leases: None,
            events,
            databases: Arc::new(EngineRotator),
            config,
            backoff: Arc::new(ErrorBackoff::new()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Live context over a cluster client and an optional backend session
    #[must_use]
    pub fn from_client(
        client: Client,
        session: Option<Arc<BackendSession>>,
        config: ControllerConfig,
    ) -> Self {
        let reconciler = Self::new(
            Arc::new(KubeStore::new(client.clone())),
            Arc::new(BackendResolver::new(session.clone())),
            Arc::new(KubeEventSink::new(client)),
            config,
        );
        match session {
            Some(session) => reconciler.with_leases(session),
            None => reconciler,
        }
    }

    #[must_use]
    pub fn with_leases(mut self, leases: Arc<dyn LeaseOperations>) -> Self {
        self.leases = Some(leases);
        self
    }

    #[must_use]
    pub fn with_databases(mut self, databases: Arc<dyn DatabaseRotator>) -> Self {
        self.databases = databases;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Lease operations, or a configuration error when no backend is set up
    pub fn leases(&self) -> Result<&Arc<dyn LeaseOperations>, ReconcilerError> {
        self.leases.as_ref().ok_or_else(|| {
            ReconcilerError::Configuration(
                "no secrets backend configured: set either BAO_ADDR or VAULT_ADDR".to_string(),
            )
        })
    }

    /// Publish an event unless recording is disabled for this object
    pub async fn record(
        &self,
        annotations: Option<&BTreeMap<String, String>>,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: impl Into<String> + Send,
    ) {
        if recording_enabled(annotations, self.config.record_changes) {
            self.events
                .publish(object, type_, reason, Some(note.into()))
                .await;
        }
    }
}
