//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, backend authentication and Kubernetes client setup.

use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use crate::backend::{
    start_token_management, AuthMode, BackendClientFactory, BackendError, BackendSession,
    BackendSettings,
};
use crate::config::ControllerConfig;
use crate::constants::DEFAULT_SERVER_POLL_INTERVAL_MS;
use crate::controller::reconciler::{
    leased_credential, static_secret, Reconciler, ReconcilerError,
};
use crate::crd::{ManagedLeasedCredential, ManagedStaticSecret};
use crate::observability::metrics;
use crate::server::{start_server, ServerState};

/// Environment variable of an older release; its presence is a fatal misconfiguration
const LEGACY_AUTH_METHOD_VAR: &str = "VAULT_AUTH_METHOD";

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    pub client: Client,
    /// Reconciler context shared by both kinds
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Background token lifecycle task, when one was started
    pub token_manager: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("token_manager", &self.token_manager.is_some())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Backend session and token lifecycle
/// - Kubernetes client creation
/// - Reconcile existing resources
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vals_secret_controller=info".into()),
        )
        .init();

    info!("Starting vals-secret-controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    if !provider_installed {
        warn!("rustls crypto provider was already installed");
    }

    if std::env::var_os(LEGACY_AUTH_METHOD_VAR).is_some() {
        error!(
            "{} is no longer supported, authentication is derived from the BAO_*/VAULT_* variables",
            LEGACY_AUTH_METHOD_VAR
        );
        anyhow::bail!("{LEGACY_AUTH_METHOD_VAR} is set");
    }

    let config = ControllerConfig::from_env();
    info!(
        reconcile_period_secs = config.reconcile_period_secs,
        default_ttl_secs = config.default_ttl_secs,
        record_changes = config.record_changes,
        exclude_namespaces = ?config.exclude_namespaces,
        watch_namespaces = ?config.watch_namespaces,
        "Controller configuration loaded"
    );

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, config.server_startup_timeout()).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let (session, token_manager) = connect_backend().await?;

    let reconciler = Arc::new(Reconciler::from_client(client.clone(), session, config));

    reconcile_existing_resources(
        &namespaced_apis::<ManagedStaticSecret>(&client, &reconciler.config.watch_namespaces),
        &reconciler,
        static_secret::reconcile,
    )
    .await?;
    reconcile_existing_resources(
        &namespaced_apis::<ManagedLeasedCredential>(&client, &reconciler.config.watch_namespaces),
        &reconciler,
        leased_credential::reconcile,
    )
    .await?;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        token_manager,
    })
}

/// Build the backend session and start its token lifecycle
///
/// No backend address means the controller runs without one; leased
/// credentials then fail with a configuration error when reconciled.
async fn connect_backend() -> Result<(Option<Arc<BackendSession>>, Option<JoinHandle<()>>)> {
    let settings = match BackendSettings::from_env() {
        Ok(settings) => settings,
        Err(BackendError::NotConfigured) => {
            warn!("No secrets backend configured (BAO_ADDR / VAULT_ADDR unset)");
            return Ok((None, None));
        }
        Err(e) => return Err(e).context("Invalid secrets backend configuration"),
    };

    info!(
        backend = %settings.backend,
        address = %settings.address,
        auth = settings.auth.name(),
        skip_verify = settings.skip_verify,
        "🔐 Secrets backend configured"
    );

    let token_auth = matches!(settings.auth, AuthMode::Token(_));
    let session = Arc::new(BackendSession::new(Arc::new(BackendClientFactory::new(Some(
        settings,
    )))));

    let token_manager = match start_token_management(Arc::clone(&session), token_auth).await {
        Ok(handle) => {
            if handle.is_some() {
                info!("✅ Token lifecycle manager started");
            }
            handle
        }
        Err(e) => {
            error!("❌ Backend authentication failed: {}", e);
            metrics::set_vault_token_error(&session.address(), chrono::Utc::now().timestamp());
            None
        }
    };

    Ok((Some(session), token_manager))
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &JoinHandle<()>,
    startup_timeout: Duration,
) -> Result<()> {
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

fn namespaced_apis<K>(client: &Client, watch_namespaces: &[String]) -> Vec<Api<K>>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    if watch_namespaces.is_empty() {
        vec![Api::all(client.clone())]
    } else {
        watch_namespaces
            .iter()
            .map(|ns| Api::namespaced(client.clone(), ns))
            .collect()
    }
}

/// Reconcile resources that existed before the controller started
///
/// Failures are logged per resource; the watch retries them afterwards.
async fn reconcile_existing_resources<K, F, Fut>(
    apis: &[Api<K>],
    reconciler: &Arc<Reconciler>,
    mut reconcile: F,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
    F: FnMut(Arc<K>, Arc<Reconciler>) -> Fut,
    Fut: Future<Output = Result<Action, ReconcilerError>>,
{
    let kind = K::kind(&()).to_string();
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.reconcile_existing",
        resource.kind = %kind
    );

    async move {
        let mut items = Vec::new();
        for api in apis {
            match api.list(&ListParams::default()).await {
                Ok(list) => items.extend(list.items),
                Err(e) => {
                    error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
                    error!("Installation: cargo run --bin crdgen | kubectl apply -f -");
                    warn!("Continuing despite {} queryability check failure - controller will retry", kind);
                    return Ok(());
                }
            }
        }

        if items.is_empty() {
            info!("No existing {} resources found, watch will pick up new resources", kind);
            return Ok(());
        }

        log_startup_summary(&kind, &items);

        for item in items {
            let name = item.name_any();
            let namespace = item.namespace().unwrap_or_default();
            match reconcile(Arc::new(item), Arc::clone(reconciler)).await {
                Ok(_action) => {
                    info!(resource.name = %name, resource.namespace = %namespace, "reconciliation.success");
                }
                Err(e) => {
                    error!(
                        "Failed to reconcile existing resource {} in namespace {}: {}",
                        name, namespace, e
                    );
                }
            }
        }

        info!("Completed reconciliation of existing {} resources", kind);
        Ok(())
    }
    .instrument(span)
    .await
}

/// Tabulate resources by namespace for operations visibility
fn log_startup_summary<K: Resource>(kind: &str, items: &[K]) {
    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in items {
        by_namespace
            .entry(item.namespace().unwrap_or_default())
            .or_default()
            .push(item.name_any());
    }

    info!("Resource Kind: {}", kind);
    info!("Total Resources: {}", items.len());
    info!("Namespaces: {}", by_namespace.len());
    for (namespace, mut names) in by_namespace {
        names.sort();
        let listing = if names.len() <= 3 {
            names.join(", ")
        } else {
            format!("{}, ... ({} total)", names[..3].join(", "), names.len())
        };
        info!("Namespace: {}", namespace);
        info!("  Resources ({}): {}", names.len(), listing);
    }
}
