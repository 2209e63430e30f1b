//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::store::kube::{KubeGeneratorStateStore, KubeResourceReader, KubeSourceResolver, KubeTargetStore};
use crate::store::{GeneratorStateStore, ResourceReader, SourceResolver, TargetStore};
use kube::{Client, Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared reconcile context
///
/// The store traits are held as trait objects so the same reconcile code
/// runs against the cluster and against in-memory stores.
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub config: Arc<ControllerConfig>,
    pub resolver: Arc<dyn SourceResolver>,
    pub reader: Arc<dyn ResourceReader>,
    pub targets: Arc<dyn TargetStore>,
    pub states: Arc<dyn GeneratorStateStore>,
    // Backoff state per resource (identified by namespace/name)
    // Lives in the error policy layer so failing resources never block the watch
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Reconciler backed by the Kubernetes API
    #[must_use]
    pub fn new(client: Client, config: Arc<ControllerConfig>) -> Self {
        Self {
            resolver: Arc::new(KubeSourceResolver::new(client.clone(), Arc::clone(&config))),
            reader: Arc::new(KubeResourceReader::new(client.clone())),
            targets: Arc::new(KubeTargetStore::new(client.clone())),
            states: Arc::new(KubeGeneratorStateStore::new(client.clone())),
            client,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Key of `obj` in [`Reconciler::backoff_states`]
    #[must_use]
    pub fn backoff_key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
        format!(
            "{}/{}/{}",
            K::kind(&()),
            obj.namespace().unwrap_or_default(),
            obj.name_any()
        )
    }

    /// Forget the error history of a resource after a successful pass
    pub fn reset_backoff<K: Resource<DynamicType = ()>>(&self, obj: &K) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(&Self::backoff_key(obj)) {
                state.reset();
            }
        }
    }
}
