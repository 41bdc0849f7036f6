//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loops.
//! This module handles reconciliation errors and watch stream errors.

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::controller::backoff::ErrorBackoff;
use crate::controller::reconciler::utils::object_key;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::observability::metrics;

/// Requeue a failed object with the jittered per-object backoff
///
/// The failure count for the object grows on every call and is cleared by the
/// reconciler after its next successful pass. Configuration errors are
/// polled at the base period instead.
pub fn handle_reconciliation_error<K>(
    obj: Arc<K>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = %kind,
        resource.name = %name,
        resource.namespace = %namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {:?}", namespace, name, error);
    metrics::increment_reconciliation_errors(&kind);

    let key = object_key(&namespace, &name);
    if let ReconcilerError::Configuration(message) = error {
        let period = ctx.config.reconcile_period();
        warn!(
            "⚙️ Configuration error for {}/{}, polling again in {}s: {}",
            namespace,
            name,
            period.as_secs(),
            message
        );
        return Action::requeue(requeue_delay(error, &ctx.backoff, &key, period));
    }

    let delay = requeue_delay(error, &ctx.backoff, &key, ctx.config.reconcile_period());
    let error_count = ctx.backoff.failure_count(&key);

    let next_trigger_time = ctx.now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    info!(
        "🔄 Retrying with jittered backoff: {:.1}s (error count: {})",
        delay.as_secs_f64(),
        error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {:.1}s)",
        next_trigger_time.to_rfc3339(),
        delay.as_secs_f64()
    );

    Action::requeue(delay)
}

/// Delay before the next pass of a failed object
///
/// Configuration errors end the pass without counting as a failure, so the
/// object is polled again after the base period. Everything else grows the
/// per-object backoff.
pub fn requeue_delay(
    error: &ReconcilerError,
    backoff: &ErrorBackoff,
    key: &str,
    period: Duration,
) -> Duration {
    match error {
        ReconcilerError::Configuration(_) => period,
        _ => backoff.record_failure(key),
    }
}

/// How a failed watch stream should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// 401, RBAC revoked or token expired
    Unauthorized,
    /// 410, resource version too old
    Expired,
    /// 429, API server storage reinitializing
    TooManyRequests,
    /// 404, CRD missing or object deleted
    NotFound,
    Other,
}

/// Classify a watch error from its debug rendering
///
/// 404 is checked before 401 since a plain-text 404 body surfaces as a serde
/// error mentioning `WatchFailed`.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 = (error_string.contains("401") || error_string.contains("Unauthorized"))
        && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        WatchErrorClass::Unauthorized
    } else if is_410 {
        WatchErrorClass::Expired
    } else if is_429 {
        WatchErrorClass::TooManyRequests
    } else if is_not_found {
        WatchErrorClass::NotFound
    } else {
        WatchErrorClass::Other
    }
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorClass::Unauthorized => {
            error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
            error!("🔍 SRE Diagnostics:");
            error!("   1. Verify ClusterRole 'vals-secret-controller' still exists:");
            error!("      kubectl get clusterrole vals-secret-controller");
            error!("   2. Verify the ClusterRoleBinding still binds the ServiceAccount:");
            error!("      kubectl get clusterrolebinding vals-secret-controller -o yaml");
            error!("   3. Verify RBAC permissions are still active:");
            error!("      kubectl auth can-i list managedstaticsecrets --as=system:serviceaccount:<namespace>:vals-secret-controller --all-namespaces");
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorClass::Expired => {
            warn!("Watch resource version expired (410) - this is normal during pod restarts, watch will restart");
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorClass::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = std::cmp::min(current_backoff.saturating_mul(2), max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
            None
        }
        WatchErrorClass::NotFound => {
            let resource_info = if error_string.contains("integer `404`") {
                "CRD or resource may have been deleted (404 returned as plain text)"
            } else if error_string.contains("ManagedStaticSecret") {
                "ManagedStaticSecret resource"
            } else if error_string.contains("ManagedLeasedCredential") {
                "ManagedLeasedCredential resource"
            } else {
                "Resource"
            };
            warn!(
                "{} not found (404) - this may be normal if resource was deleted or CRD is missing. Error: {}",
                resource_info, error_string
            );
            Some(())
        }
        WatchErrorClass::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}
