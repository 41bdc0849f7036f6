//! # Events
//!
//! Kubernetes Event recording for both reconcilers.
//!
//! Events are fire-and-forget: failures are logged and never fail a
//! reconciliation. Whether an object gets events at all is decided by
//! [`recording_enabled`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::collections::BTreeMap;
use tracing::warn;

use crate::constants::{MANAGED_BY, RECORD_ANNOTATION};

/// Publishes events about managed objects
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    );
}

/// Event sink backed by `kube::runtime::events::Recorder`
pub struct KubeEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

impl KubeEventSink {
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: MANAGED_BY.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object).await {
            warn!(
                reason,
                object = ?object.name,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(
        &self,
        _object: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _note: Option<String>,
    ) {
    }
}

/// Whether events should be recorded for an object
///
/// A non-empty `record` annotation other than `"true"` disables recording;
/// otherwise the global switch decides.
#[must_use]
pub fn recording_enabled(annotations: Option<&BTreeMap<String, String>>, global: bool) -> bool {
    match annotations
        .and_then(|a| a.get(RECORD_ANNOTATION))
        .map(String::as_str)
    {
        Some(value) if !value.is_empty() && value != "true" => false,
        _ => global,
    }
}

/// Event reasons
pub mod reasons {
    pub const UPDATED: &str = "Updated";
    pub const FAILED: &str = "Failed";
    pub const DELETED: &str = "Deleted";
    pub const RENEWED: &str = "Renewed";
    pub const INVALID_LEASE: &str = "InvalidLease";
    pub const FORCED: &str = "Forced";
    pub const ROLLOUT: &str = "Rollout";
    pub const DATABASE: &str = "DatabaseUpdate";
}
