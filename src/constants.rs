//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group shared by both managed kinds and the bookkeeping annotations
pub const API_GROUP: &str = "secret-management.microscaler.io";

/// Value stamped on the `app.kubernetes.io/managed-by` label
pub const MANAGED_BY: &str = "vals-secret-controller";

/// Label identifying the controller that owns a destination Secret
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Annotation written by `kubectl apply`; never copied onto destination Secrets
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Timestamp of the last successful write to a destination Secret
pub const LAST_UPDATED_ANNOTATION: &str = "secret-management.microscaler.io/last-updated";

/// Per-object override of the global event recording switch
pub const RECORD_ANNOTATION: &str = "secret-management.microscaler.io/record";

/// Trailing segment of the backend lease id
pub const LEASE_ID_ANNOTATION: &str = "secret-management.microscaler.io/lease-id";

/// Lease duration in seconds, reused as the renewal increment
pub const LEASE_DURATION_ANNOTATION: &str = "secret-management.microscaler.io/lease-duration";

/// Lease expiry as unix seconds
pub const EXPIRES_ON_ANNOTATION: &str = "secret-management.microscaler.io/expires-on";

/// Marker left after a failed renewal so the next pass reissues
pub const FORCE_ANNOTATION: &str = "secret-management.microscaler.io/force";

/// Template hash used to detect template-only changes
pub const HASH_ANNOTATION: &str = "secret-management.microscaler.io/hash";

/// Prefix of the hidden Secret keys holding the base credential behind a template
pub const BASE_CREDENTIAL_KEY_PREFIX: &str = ".base.";

/// Pod template annotation bumped to trigger a rollout
pub const RESTARTED_AT_ANNOTATION: &str = "secret-management.microscaler.io/restartedAt";

/// Finalizer guarding destination Secret cleanup for static secrets
pub const STATIC_SECRET_FINALIZER: &str = "secret-management.microscaler.io/static-secret";

/// Finalizer guarding lease revocation and cleanup for leased credentials
pub const LEASED_CREDENTIAL_FINALIZER: &str =
    "secret-management.microscaler.io/leased-credential";

/// Layout of the last-updated annotation (UTC)
pub const TIME_LAYOUT: &str = "%Y-%m-%dT%H.%M.%SZ";

/// Default HTTP server port for metrics and health checks
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Base requeue period after a successful reconciliation (seconds)
pub const DEFAULT_RECONCILE_PERIOD_SECS: u64 = 5;

/// Default time-to-live of a static destination Secret (seconds)
pub const DEFAULT_TTL_SECS: i64 = 300;

/// Default delay before restarting watch stream after errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Initial backoff after the API server asks watchers to slow down (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1000;

/// Ceiling of the watch slow-down backoff (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Default maximum number of concurrent reconciliations per kind
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Leased credentials are treated as expired this long before `expires-on` (seconds)
pub const LEASE_EXPIRY_GRACE_SECS: i64 = 120;

/// Reconciliation error backoff floor (seconds)
pub const ERROR_BACKOFF_MIN_SECS: u64 = 3;

/// Reconciliation error backoff ceiling (seconds)
pub const ERROR_BACKOFF_MAX_SECS: u64 = 120;

/// Growth factor of the reconciliation error backoff
pub const ERROR_BACKOFF_FACTOR: f64 = 1.5;

/// Fraction of the error backoff applied as +/- jitter
pub const ERROR_BACKOFF_JITTER_FRACTION: f64 = 0.1;

/// Token re-authentication backoff starting value (seconds)
pub const TOKEN_BACKOFF_INITIAL_SECS: u64 = 5;

/// Token re-authentication backoff ceiling (seconds)
pub const TOKEN_BACKOFF_MAX_SECS: u64 = 60;

/// Token re-authentication backoff multiplier
pub const TOKEN_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Pause between leaving the watch state and logging in again (seconds)
pub const TOKEN_SETTLE_DELAY_SECS: u64 = 5;

/// Attempts made by the retry-with-reauth wrapper
pub const BACKEND_MAX_RETRIES: u32 = 3;

/// Delay between retry-with-reauth attempts (seconds)
pub const BACKEND_RETRY_DELAY_SECS: u64 = 2;

/// Timeout applied to every backend HTTP request (seconds)
pub const BACKEND_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Service account token used for Kubernetes auth against the backend
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
