//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `vals_operator_secret_failures` - Errors generating static secrets
//! - `vals_operator_dbsecret_failures` - Errors generating leased credentials
//! - `vals_operator_secret_error` - Timestamp of the last static secret failure
//! - `vals_operator_dbsecret_error` - Timestamp of the last leased credential failure
//! - `vals_operator_secret_info` - Timestamp of the last static secret update
//! - `vals_operator_dbsecret_info` - Timestamp of the last leased credential update
//! - `vals_operator_dbsecret_expire_time` - Lease expiry of a leased credential
//! - `vals_operator_vault_error` - Timestamp of the last backend client failure
//! - `vals_operator_vault_token_error` - Timestamp of the last backend login failure
//! - `vals_operator_secret_retrieve_time` - Milliseconds spent resolving values
//! - `vals_operator_secret_creation_time` - Milliseconds spent writing the Secret
//! - `vals_operator_dbsecret_revokation_error` - Timestamp of the last failed revocation
//! - `vals_operator_dbsecret_deletion_error` - Timestamp of the last failed Secret deletion
//! - `vals_operator_reconciliations_total` - Reconciliations by kind
//! - `vals_operator_reconciliation_errors_total` - Reconciliation errors by kind
//!
//! Timestamp gauges are unix seconds; `0` means the error has cleared.

use anyhow::Result;
use prometheus::{GaugeVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

const OBJECT_LABELS: &[&str] = &["secret", "namespace"];

static SECRET_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vals_operator_secret_failures",
        "Number of errors generating secrets",
    )
    .expect("Failed to create SECRET_FAILURES metric - this should never happen")
});

static DBSECRET_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vals_operator_dbsecret_failures",
        "Number of errors generating DB secrets",
    )
    .expect("Failed to create DBSECRET_FAILURES metric - this should never happen")
});

static SECRET_ERROR: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "vals_operator_secret_error",
            "Reports timestamp from when a secret last failed to be updated",
        ),
        OBJECT_LABELS,
    )
    .expect("Failed to create SECRET_ERROR metric - this should never happen")
});

static DBSECRET_ERROR: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "vals_operator_dbsecret_error",
            "Reports timestamp from when a DB secret last failed to be updated",
        ),
        OBJECT_LABELS,
    )
    .expect("Failed to create DBSECRET_ERROR metric - this should never happen")
});

static SECRET_INFO: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "vals_operator_secret_info",
            "Tracks secret, timestamp is when it was last updated",
        ),
        OBJECT_LABELS,
    )
    .expect("Failed to create SECRET_INFO metric - this should never happen")
});

static DBSECRET_INFO: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "vals_operator_dbsecret_info",
            "Tracks database secret, timestamp is when it was last updated",
        ),
        OBJECT_LABELS,
    )
    .expect("Failed to create DBSECRET_INFO metric - this should never happen")
});

static DBSECRET_EXPIRE_TIME: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "vals_operator_dbsecret_expire_time",
            "Reports when the database credential lease expires",
        ),
        OBJECT_LABELS,
    )
    .expect("Failed to create DBSECRET_EXPIRE_TIME metric - this should never happen")
});

static VAULT_ERROR: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "vals_operator_vault_error",
            "Timestamp if the secrets backend is used and fails",
        ),
        &["addr"],
    )
    .expect("Failed to create VAULT_ERROR metric - this should never happen")
});

static VAULT_TOKEN_ERROR: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "vals_operator_vault_token_error",
            "Timestamp if the backend token is invalid or expired",
        ),
        &["addr"],
    )
    .expect("Failed to create VAULT_TOKEN_ERROR metric - this should never happen")
});

static SECRET_RETRIEVE_TIME: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new(
            "vals_operator_secret_retrieve_time",
            "Time in ms it took to get the secret",
        ),
        OBJECT_LABELS,
    )
    .expect("Failed to create SECRET_RETRIEVE_TIME metric - this should never happen")
});

static SECRET_CREATION_TIME: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new(
            "vals_operator_secret_creation_time",
            "Time in ms it took to create the secret",
        ),
        OBJECT_LABELS,
    )
    .expect("Failed to create SECRET_CREATION_TIME metric - this should never happen")
});

static DBSECRET_REVOKATION_ERROR: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "vals_operator_dbsecret_revokation_error",
            "Timestamp of when the lease could not be revoked",
        ),
        OBJECT_LABELS,
    )
    .expect("Failed to create DBSECRET_REVOKATION_ERROR metric - this should never happen")
});

static DBSECRET_DELETION_ERROR: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "vals_operator_dbsecret_deletion_error",
            "Timestamp of when the secret could not be deleted",
        ),
        OBJECT_LABELS,
    )
    .expect("Failed to create DBSECRET_DELETION_ERROR metric - this should never happen")
});

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vals_operator_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vals_operator_reconciliation_errors_total",
            "Total number of reconciliation errors",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

/// Register every metric with the controller registry
#[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SECRET_FAILURES.clone()))?;
    REGISTRY.register(Box::new(DBSECRET_FAILURES.clone()))?;
    REGISTRY.register(Box::new(SECRET_ERROR.clone()))?;
    REGISTRY.register(Box::new(DBSECRET_ERROR.clone()))?;
    REGISTRY.register(Box::new(SECRET_INFO.clone()))?;
    REGISTRY.register(Box::new(DBSECRET_INFO.clone()))?;
    REGISTRY.register(Box::new(DBSECRET_EXPIRE_TIME.clone()))?;
    REGISTRY.register(Box::new(VAULT_ERROR.clone()))?;
    REGISTRY.register(Box::new(VAULT_TOKEN_ERROR.clone()))?;
    REGISTRY.register(Box::new(SECRET_RETRIEVE_TIME.clone()))?;
    REGISTRY.register(Box::new(SECRET_CREATION_TIME.clone()))?;
    REGISTRY.register(Box::new(DBSECRET_REVOKATION_ERROR.clone()))?;
    REGISTRY.register(Box::new(DBSECRET_DELETION_ERROR.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    Ok(())
}

/// Snapshot of all registered metric families
#[must_use]
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_secret_failures() {
    SECRET_FAILURES.inc();
}

pub fn increment_dbsecret_failures() {
    DBSECRET_FAILURES.inc();
}

pub fn set_secret_error(secret: &str, namespace: &str, timestamp: i64) {
    SECRET_ERROR.with_label_values(&[secret, namespace]).set(timestamp);
}

pub fn set_dbsecret_error(secret: &str, namespace: &str, timestamp: i64) {
    DBSECRET_ERROR.with_label_values(&[secret, namespace]).set(timestamp);
}

pub fn set_secret_info(secret: &str, namespace: &str, timestamp: i64) {
    SECRET_INFO.with_label_values(&[secret, namespace]).set(timestamp);
}

pub fn set_dbsecret_info(secret: &str, namespace: &str, timestamp: i64) {
    DBSECRET_INFO.with_label_values(&[secret, namespace]).set(timestamp);
}

pub fn set_dbsecret_expire_time(secret: &str, namespace: &str, timestamp: i64) {
    DBSECRET_EXPIRE_TIME
        .with_label_values(&[secret, namespace])
        .set(timestamp);
}

pub fn set_vault_error(addr: &str, timestamp: i64) {
    VAULT_ERROR.with_label_values(&[addr]).set(timestamp);
}

pub fn set_vault_token_error(addr: &str, timestamp: i64) {
    VAULT_TOKEN_ERROR.with_label_values(&[addr]).set(timestamp);
}

pub fn set_secret_retrieve_time(secret: &str, namespace: &str, millis: f64) {
    SECRET_RETRIEVE_TIME
        .with_label_values(&[secret, namespace])
        .set(millis);
}

pub fn set_secret_creation_time(secret: &str, namespace: &str, millis: f64) {
    SECRET_CREATION_TIME
        .with_label_values(&[secret, namespace])
        .set(millis);
}

pub fn set_dbsecret_revokation_error(secret: &str, namespace: &str, timestamp: i64) {
    DBSECRET_REVOKATION_ERROR
        .with_label_values(&[secret, namespace])
        .set(timestamp);
}

pub fn set_dbsecret_deletion_error(secret: &str, namespace: &str, timestamp: i64) {
    DBSECRET_DELETION_ERROR
        .with_label_values(&[secret, namespace])
        .set(timestamp);
}

/// Drop every per-object series of a deleted object
pub fn forget_object(secret: &str, namespace: &str) {
    let labels = [secret, namespace];
    for gauge in [
        &*SECRET_ERROR,
        &*DBSECRET_ERROR,
        &*SECRET_INFO,
        &*DBSECRET_INFO,
        &*DBSECRET_EXPIRE_TIME,
        &*DBSECRET_REVOKATION_ERROR,
        &*DBSECRET_DELETION_ERROR,
    ] {
        // absent series are fine
        let _ = gauge.remove_label_values(&labels);
    }
    for gauge in [&*SECRET_RETRIEVE_TIME, &*SECRET_CREATION_TIME] {
        let _ = gauge.remove_label_values(&labels);
    }
}
