//! # Watch Loop
//!
//! One controller per managed kind (and per watched namespace), each watching
//! its custom resource plus the Secrets it owns. The controllers run side by
//! side and are restarted when their watch stream ends.

use futures::future::LocalBoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::runtime::controller::{self, Action};
use kube::runtime::{watcher, Controller};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::constants::{
    DEFAULT_WATCH_BACKOFF_MAX_MS, DEFAULT_WATCH_BACKOFF_START_MS, MANAGED_BY, MANAGED_BY_LABEL,
};
use crate::controller::reconciler::{
    leased_credential, static_secret, Reconciler, ReconcilerError,
};
use crate::crd::{ManagedLeasedCredential, ManagedStaticSecret};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;

/// Run every controller until a shutdown signal is received
#[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loops...");

    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let mut controllers: Vec<LocalBoxFuture<'static, ()>> = Vec::new();
    for scope in watch_scopes(&reconciler.config.watch_namespaces) {
        let static_secrets: Api<ManagedStaticSecret> = scoped_api(&client, scope.as_deref());
        let leased_credentials: Api<ManagedLeasedCredential> =
            scoped_api(&client, scope.as_deref());
        let secrets: Api<Secret> = scoped_api(&client, scope.as_deref());

        info!(
            namespace = scope.as_deref().unwrap_or("*"),
            "Watching ManagedStaticSecret and ManagedLeasedCredential resources"
        );

        controllers.push(
            run_controller(
                static_secrets,
                secrets.clone(),
                static_secret::reconcile,
                Arc::clone(&reconciler),
                Arc::clone(&server_state),
            )
            .boxed_local(),
        );
        controllers.push(
            run_controller(
                leased_credentials,
                secrets,
                leased_credential::reconcile,
                Arc::clone(&reconciler),
                Arc::clone(&server_state),
            )
            .boxed_local(),
        );
    }

    futures::future::join_all(controllers).await;

    info!("Controller stopped gracefully");
    Ok(())
}

/// Namespaces to watch, `None` meaning the whole cluster
fn watch_scopes(watch_namespaces: &[String]) -> Vec<Option<String>> {
    if watch_namespaces.is_empty() {
        vec![None]
    } else {
        watch_namespaces.iter().cloned().map(Some).collect()
    }
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run one controller, restarting its watch when the stream ends
async fn run_controller<K, F, Fut>(
    api: Api<K>,
    secrets: Api<Secret>,
    reconcile: F,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: FnMut(Arc<K>, Arc<Reconciler>) -> Fut + Clone,
    Fut: Future<Output = Result<Action, ReconcilerError>> + Send + 'static,
{
    let kind = K::kind(&()).to_string();
    let backoff_duration_ms = Arc::new(AtomicU64::new(DEFAULT_WATCH_BACKOFF_START_MS));
    let restart_delay = reconciler.config.watch_restart_delay();
    let owned_secrets =
        watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY}"));
    let controller_config = controller::Config::default()
        .concurrency(reconciler.config.max_concurrent_reconciliations);

    loop {
        if !server_state.ready() {
            info!(kind = %kind, "Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop",
            resource.kind = %kind
        );

        info!("Starting {} controller...", kind);
        let backoff = Arc::clone(&backoff_duration_ms);
        Controller::new(api.clone(), watcher::Config::default().any_semantic())
            .owns(secrets.clone(), owned_secrets.clone())
            .with_config(controller_config.clone())
            .shutdown_on_signal()
            .run(
                reconcile.clone(),
                handle_reconciliation_error::<K>,
                Arc::clone(&reconciler),
            )
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                async move {
                    match &x {
                        Ok(_) => {
                            backoff.store(
                                DEFAULT_WATCH_BACKOFF_START_MS,
                                std::sync::atomic::Ordering::Relaxed,
                            );
                            debug!("watch.event.success");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                DEFAULT_WATCH_BACKOFF_MAX_MS,
                                restart_delay,
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.ready() {
            info!(kind = %kind, "Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "{} watch stream ended, restarting in {} seconds...",
            kind,
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }
}
