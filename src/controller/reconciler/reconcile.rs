//! # Reconciliation Logic
//!
//! Kubernetes glue around a sync pass: finalizer bookkeeping, status and
//! trigger-cause writes, and requeue decisions. The pass enforces the
//! reconcile deadline itself so a timed-out pass still rolls back and
//! reports its failure.
//! Errors are returned to the error policy, which owns the retry backoff.

use super::status::{
    ready_condition, record_trigger_cause, set_ready_condition, status_patch, update_status,
};
use super::sync::{release_generator_states, sync, SyncContext};
use super::types::{Reconciler, ReconcilerError};
use crate::constants::{
    DEFAULT_STORE_VALIDATION_INTERVAL_SECS, FINALIZER_GENERATOR_STATE,
};
use crate::crd::{ClusterSecretStore, ExternalSecret, SecretStore, SecretStoreStatus, StoreProvider};
use crate::observability::metrics;
use crate::provider::{new_client, ValidationResult};
use crate::store::kube::merge_patch_params;
use anyhow::Context;
use chrono::{DateTime, Utc};
use kube::api::Patch;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, Instrument};

impl Reconciler {
    /// Store views for one pass starting at `now`
    #[must_use]
    pub fn sync_context(&self, now: DateTime<Utc>) -> SyncContext<'_> {
        SyncContext {
            resolver: self.resolver.as_ref(),
            reader: self.reader.as_ref(),
            targets: self.targets.as_ref(),
            states: Arc::clone(&self.states),
            gc_grace: self.config.generator_state_gc_grace(),
            deadline: Some(self.config.reconcile_timeout()),
            now,
        }
    }
}

/// Reconcile one `ExternalSecret`
pub async fn reconcile(
    es: Arc<ExternalSecret>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = es.name_any();
    let namespace = es.namespace().unwrap_or_else(|| "default".to_string());
    let span = tracing::span!(
        tracing::Level::INFO,
        "reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.kind = "ExternalSecret"
    );
    reconcile_internal(es, ctx, namespace).instrument(span).await
}

async fn reconcile_internal(
    es: Arc<ExternalSecret>,
    ctx: Arc<Reconciler>,
    namespace: String,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations();
    let api: Api<ExternalSecret> = Api::namespaced(ctx.client.clone(), &namespace);
    let has_finalizer = es.finalizers().iter().any(|f| f == FINALIZER_GENERATOR_STATE);

    if es.meta().deletion_timestamp.is_some() {
        if has_finalizer {
            release_generator_states(&ctx.sync_context(Utc::now()), &es)
                .await
                .context("Failed to release generator state")?;
            set_finalizer(&api, &es, false).await?;
            info!("Released generator state and removed finalizer");
        }
        return Ok(Action::await_change());
    }

    if es.uses_generators() && !has_finalizer {
        set_finalizer(&api, &es, true).await?;
    }

    let outcome = sync(&ctx.sync_context(Utc::now()), &es).await;

    if let Some(trigger) = &outcome.trigger {
        record_trigger_cause(&api, &es, trigger).await?;
    }
    update_status(&api, &es, &outcome.status).await?;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    if let Some(error) = outcome.error {
        return Err(ReconcilerError::ReconciliationFailed(anyhow::Error::new(error)));
    }

    ctx.reset_backoff(es.as_ref());
    debug!(
        action = ?outcome.action,
        requeue_after = ?outcome.requeue_after,
        duration_secs = start.elapsed().as_secs_f64(),
        "Reconciliation complete"
    );
    Ok(outcome
        .requeue_after
        .map_or_else(Action::await_change, Action::requeue))
}

/// Add or remove the generator state finalizer
async fn set_finalizer(
    api: &Api<ExternalSecret>,
    es: &ExternalSecret,
    present: bool,
) -> Result<(), ReconcilerError> {
    let mut finalizers: Vec<String> = es
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER_GENERATOR_STATE)
        .cloned()
        .collect();
    if present {
        finalizers.push(FINALIZER_GENERATOR_STATE.to_string());
    }
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&es.name_any(), &merge_patch_params(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

/// Check a store's backend and build its status
async fn store_status(
    provider: &StoreProvider,
    previous: Option<&SecretStoreStatus>,
    ctx: &Reconciler,
) -> SecretStoreStatus {
    let result = match new_client(provider, &ctx.config) {
        Ok(client) => client.validate().await,
        Err(e) => ValidationResult::Error(e.to_string()),
    };
    let (ready, reason, message) = match result {
        ValidationResult::Ready => (true, "Valid", "store validated".to_string()),
        ValidationResult::Unknown => (true, "ValidationUnknown", "store cannot be validated".to_string()),
        ValidationResult::Error(message) => (false, "InvalidProviderConfig", message),
    };
    let mut status = previous.cloned().unwrap_or_default();
    let previous_ready = status
        .conditions
        .iter()
        .find(|c| c.r#type == crate::constants::CONDITION_READY)
        .cloned();
    set_ready_condition(
        &mut status.conditions,
        ready_condition(previous_ready.as_ref(), ready, reason, message, Utc::now()),
    );
    status
}

async fn patch_store_status<K>(
    api: &Api<K>,
    name: &str,
    status: &SecretStoreStatus,
) -> Result<(), ReconcilerError>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    api.patch_status(name, &merge_patch_params(), &status_patch(status))
        .await?;
    Ok(())
}

/// Validate a `SecretStore` backend and report it as the Ready condition
pub async fn reconcile_store(
    store: Arc<SecretStore>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let namespace = store.namespace().unwrap_or_else(|| "default".to_string());
    let status = store_status(&store.spec.provider, store.status.as_ref(), &ctx).await;
    if store.status.as_ref() != Some(&status) {
        let api: Api<SecretStore> = Api::namespaced(ctx.client.clone(), &namespace);
        patch_store_status(&api, &store.name_any(), &status).await?;
    }
    ctx.reset_backoff(store.as_ref());
    Ok(Action::requeue(Duration::from_secs(
        DEFAULT_STORE_VALIDATION_INTERVAL_SECS,
    )))
}

/// Validate a `ClusterSecretStore` backend and report it as the Ready condition
pub async fn reconcile_cluster_store(
    store: Arc<ClusterSecretStore>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let status = store_status(&store.spec.provider, store.status.as_ref(), &ctx).await;
    if store.status.as_ref() != Some(&status) {
        let api: Api<ClusterSecretStore> = Api::all(ctx.client.clone());
        patch_store_status(&api, &store.name_any(), &status).await?;
    }
    ctx.reset_backoff(store.as_ref());
    Ok(Action::requeue(Duration::from_secs(
        DEFAULT_STORE_VALIDATION_INTERVAL_SECS,
    )))
}
