//! # Watch Loop
//!
//! Controller watch loops for `ExternalSecret`, `SecretStore` and
//! `ClusterSecretStore` resources, plus the generator state GC sweep.

use crate::config::ControllerConfig;
use crate::constants::{LABEL_MANAGED, LABEL_MANAGED_VALUE};
use crate::controller::reconciler::{
    reconcile, reconcile_cluster_store, reconcile_store, Reconciler,
};
use crate::controller::server::ServerState;
use crate::crd::{ClusterSecretStore, ExternalSecret, SecretStore};
use crate::generator;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Run the controller watch loop
///
/// Watches `ExternalSecret` resources and the target secrets they own, and
/// restarts the watch when the stream ends or fails. Store validation and
/// generator state GC run as background tasks alongside it.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: Arc<ControllerConfig>,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let backoff_duration_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));

    // Mark not ready on SIGTERM/SIGINT so probes fail while in-flight
    // reconciliations drain
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    tokio::spawn(generator::gc::run(
        Arc::clone(&reconciler.states),
        config.generator_gc_interval(),
    ));
    spawn_store_controllers(&client, &reconciler);

    let external_secrets: Api<ExternalSecret> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let managed_selector = format!("{LABEL_MANAGED}={LABEL_MANAGED_VALUE}");

    loop {
        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = Arc::clone(&backoff_duration_ms);
        let backoff_start_ms = config.backoff_start_ms;
        let max_backoff_ms = config.backoff_max_ms;
        let watch_restart_delay = config.watch_restart_delay_secs;
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );
        let _watch_guard = watch_span.enter();

        Controller::new(
            external_secrets.clone(),
            watcher::Config::default().any_semantic(),
        )
        .owns(
            secrets.clone(),
            watcher::Config::default().labels(&managed_selector),
        )
        .with_config(
            controller::Config::default().concurrency(config.max_concurrent_reconciliations),
        )
        .shutdown_on_signal()
        .run(
            reconcile,
            |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
            Arc::clone(&reconciler),
        )
        .filter_map(move |event| {
            let backoff = Arc::clone(&backoff);
            async move {
                match &event {
                    Ok((obj, action)) => {
                        backoff.store(backoff_start_ms, Ordering::Relaxed);
                        debug!(resource = %obj, action = ?action, "watch.event.reconciled");
                        Some(event)
                    }
                    Err(e) => {
                        let error_string = format!("{e:?}");
                        handle_watch_stream_error(
                            &error_string,
                            &backoff,
                            max_backoff_ms,
                            watch_restart_delay,
                        )
                        .await
                        .map(|()| event)
                    }
                }
            }
        })
        .for_each(|_| futures::future::ready(()))
        .await;

        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay_secs = config.watch_restart_delay_after_end_secs;
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay_secs
        );
        tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Spawn the `SecretStore` and `ClusterSecretStore` validation controllers
fn spawn_store_controllers(client: &Client, reconciler: &Arc<Reconciler>) {
    let stores: Api<SecretStore> = Api::all(client.clone());
    let store_ctx = Arc::clone(reconciler);
    tokio::spawn(async move {
        Controller::new(stores, watcher::Config::default())
            .shutdown_on_signal()
            .run(
                reconcile_store,
                |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
                store_ctx,
            )
            .for_each(|event| {
                if let Err(e) = event {
                    warn!(error = ?e, "SecretStore watch error");
                }
                futures::future::ready(())
            })
            .await;
        info!("SecretStore controller stopped");
    });

    let cluster_stores: Api<ClusterSecretStore> = Api::all(client.clone());
    let cluster_store_ctx = Arc::clone(reconciler);
    tokio::spawn(async move {
        Controller::new(cluster_stores, watcher::Config::default())
            .shutdown_on_signal()
            .run(
                reconcile_cluster_store,
                |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
                cluster_store_ctx,
            )
            .for_each(|event| {
                if let Err(e) = event {
                    warn!(error = ?e, "ClusterSecretStore watch error");
                }
                futures::future::ready(())
            })
            .await;
        info!("ClusterSecretStore controller stopped");
    });
}
