//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_METRICS_PORT, DEFAULT_RECONCILE_PERIOD_SECS,
    DEFAULT_SERVER_STARTUP_TIMEOUT_SECS, DEFAULT_TTL_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
};

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Requeue period after a successful or skipped reconciliation (seconds)
    pub reconcile_period_secs: u64,
    /// TTL applied to static secrets that do not declare one (seconds)
    pub default_ttl_secs: i64,
    /// Namespaces that are never reconciled
    pub exclude_namespaces: Vec<String>,
    /// Namespaces to watch; empty means the whole cluster
    pub watch_namespaces: Vec<String>,
    /// Global switch for Kubernetes event recording
    /// Overridable per object with the `record` annotation
    pub record_changes: bool,
    /// HTTP port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Maximum concurrent reconciliations per managed kind
    pub max_concurrent_reconciliations: u16,
    /// How long to wait for the HTTP server to come up (seconds)
    pub server_startup_timeout_secs: u64,
    /// Delay before restarting a watch stream that ended or failed (seconds)
    pub watch_restart_delay_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconcile_period_secs: DEFAULT_RECONCILE_PERIOD_SECS,
            default_ttl_secs: DEFAULT_TTL_SECS,
            exclude_namespaces: Vec::new(),
            watch_namespaces: Vec::new(),
            record_changes: true,
            metrics_port: DEFAULT_METRICS_PORT,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            reconcile_period_secs: var_or_default(
                &lookup,
                "RECONCILE_PERIOD_SECS",
                DEFAULT_RECONCILE_PERIOD_SECS,
            ),
            default_ttl_secs: var_or_default(&lookup, "DEFAULT_TTL_SECS", DEFAULT_TTL_SECS),
            exclude_namespaces: var_list(&lookup, "EXCLUDE_NAMESPACES"),
            watch_namespaces: var_list(&lookup, "WATCH_NAMESPACES"),
            record_changes: var_or_default_bool(&lookup, "RECORD_CHANGES", true),
            metrics_port: var_or_default(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
            max_concurrent_reconciliations: var_or_default(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            server_startup_timeout_secs: var_or_default(
                &lookup,
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            watch_restart_delay_secs: var_or_default(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
        }
    }

    /// Whether objects in `namespace` are skipped entirely
    #[must_use]
    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.exclude_namespaces.iter().any(|ns| ns == namespace)
    }

    /// Get base reconcile period duration
    #[must_use]
    pub fn reconcile_period(&self) -> Duration {
        Duration::from_secs(self.reconcile_period_secs)
    }

    /// Get server startup timeout duration
    #[must_use]
    pub fn server_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.server_startup_timeout_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read variable or return default value
fn var_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read variable as boolean or return default
fn var_or_default_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            let v_lower = v.trim().to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read a comma separated list, dropping empty entries
fn var_list<F>(lookup: &F, key: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}
