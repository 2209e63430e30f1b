//! # Secret Sync Controller
//!
//! A Kubernetes controller that syncs secrets from external backends and
//! generators into Kubernetes Secrets.
//!
//! ## Overview
//!
//! 1. **Watching `ExternalSecret` resources** across all namespaces, plus the target secrets they own
//! 2. **Aggregating source data** from `SecretStore`/`ClusterSecretStore` backends and generators
//! 3. **Rewriting and templating** the aggregated map into the target secret shape
//! 4. **Reconciling the target** according to creation and deletion policies
//!
//! Stateful generators keep durable `GeneratorState` records that are
//! garbage collected once superseded.
//!
//! ## Endpoints
//!
//! - `/metrics` Prometheus metrics
//! - `/healthz` and `/readyz` probes

use anyhow::Result;
use secret_sync_controller::runtime::initialization::initialize;
use secret_sync_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.reconciler, init.server_state, init.config).await
}
