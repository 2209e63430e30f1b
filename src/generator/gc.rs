//! # Generator State GC
//!
//! Periodic sweep over `GeneratorState` records whose deadline has passed.
//! Each expired record is handed back to its generator for cleanup and then
//! deleted. A failed cleanup or delete keeps the record so the next sweep
//! retries it, without holding back the other expired records.

use super::for_kind;
use crate::crd::GeneratorState;
use crate::observability::metrics;
use crate::store::{GeneratorStateStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Collect every record expired at `now`, returns how many were deleted
///
/// Only listing the records can fail the sweep.
pub async fn sweep(
    store: &dyn GeneratorStateStore,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let records = store.list_all().await?;
    let mut collected = 0;
    for record in records
        .iter()
        .filter(|r| r.gc_deadline().is_some_and(|d| d <= now))
    {
        match collect(store, record).await {
            Ok(true) => collected += 1,
            Ok(false) => {}
            Err(e) => warn!(
                record = record.metadata.name.as_deref().unwrap_or_default(),
                error = %e,
                "Failed to delete generator state, retrying on the next sweep"
            ),
        }
    }
    Ok(collected)
}

async fn collect(store: &dyn GeneratorStateStore, record: &GeneratorState) -> Result<bool, StoreError> {
    let (Some(name), Some(namespace)) = (
        record.metadata.name.as_deref(),
        record.metadata.namespace.as_deref(),
    ) else {
        return Ok(false);
    };

    let kind = record
        .spec
        .resource
        .get("kind")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let spec = record
        .spec
        .resource
        .get("spec")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    match for_kind(kind) {
        Some(generator) => {
            if let Err(e) = generator.cleanup(&spec, &record.spec.state).await {
                warn!(
                    record = name,
                    namespace = namespace,
                    error = %e,
                    "Generator cleanup failed, keeping state for the next sweep"
                );
                return Ok(false);
            }
        }
        None => warn!(
            record = name,
            kind = kind,
            "No generator for recorded kind, deleting state without cleanup"
        ),
    }

    store.delete(namespace, name).await?;
    metrics::increment_generator_states_collected();
    debug!(record = name, namespace = namespace, "Collected generator state");
    Ok(true)
}

/// Sweep forever at `interval`
pub async fn run(store: Arc<dyn GeneratorStateStore>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Starting generator state GC");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match sweep(store.as_ref(), Utc::now()).await {
            Ok(0) => {}
            Ok(n) => info!(collected = n, "Generator state GC sweep finished"),
            Err(e) => error!(error = %e, "Generator state GC sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GeneratorStateSpec;
    use crate::store::memory::MemoryGeneratorStateStore;

    async fn record(
        store: &MemoryGeneratorStateStore,
        name: &str,
        deadline: Option<DateTime<Utc>>,
        fail_cleanup: bool,
    ) {
        let mut state = GeneratorState::new(
            name,
            GeneratorStateSpec {
                garbage_collection_deadline: deadline.map(|d| d.to_rfc3339()),
                resource: serde_json::json!({
                    "kind": "Fake",
                    "spec": {"data": {}, "failCleanup": fail_cleanup}
                }),
                state: serde_json::json!({}),
            },
        );
        state.metadata.namespace = Some("default".to_string());
        store.create(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_collects_only_expired_records() {
        let store = MemoryGeneratorStateStore::default();
        let now = Utc::now();
        record(&store, "expired", Some(now - chrono::Duration::seconds(1)), false).await;
        record(&store, "pending", Some(now + chrono::Duration::seconds(300)), false).await;
        record(&store, "active", None, false).await;

        assert_eq!(sweep(&store, now).await.unwrap(), 1);
        let names: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|r| r.metadata.name)
            .collect();
        assert_eq!(names, vec!["active".to_string(), "pending".to_string()]);
    }

    /// Refuses to delete one record
    struct StuckDelete {
        inner: MemoryGeneratorStateStore,
        stuck: &'static str,
    }

    #[async_trait::async_trait]
    impl GeneratorStateStore for StuckDelete {
        async fn list(
            &self,
            namespace: &str,
            owner_key: &str,
        ) -> Result<Vec<GeneratorState>, StoreError> {
            self.inner.list(namespace, owner_key).await
        }

        async fn list_all(&self) -> Result<Vec<GeneratorState>, StoreError> {
            self.inner.list_all().await
        }

        async fn create(&self, state: &GeneratorState) -> Result<GeneratorState, StoreError> {
            self.inner.create(state).await
        }

        async fn set_gc_deadline(
            &self,
            namespace: &str,
            name: &str,
            deadline: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.set_gc_deadline(namespace, name, deadline).await
        }

        async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
            if name == self.stuck {
                return Err(StoreError::Conflict {
                    kind: "GeneratorState",
                    name: name.to_string(),
                    message: "delete rejected".to_string(),
                });
            }
            self.inner.delete(namespace, name).await
        }
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_stop_sweep() {
        let store = StuckDelete {
            inner: MemoryGeneratorStateStore::default(),
            stuck: "a-stuck",
        };
        let now = Utc::now();
        record(&store.inner, "a-stuck", Some(now), false).await;
        record(&store.inner, "b-expired", Some(now), false).await;

        assert_eq!(sweep(&store, now).await.unwrap(), 1);
        let names: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .filter_map(|r| r.metadata.name)
            .collect();
        assert_eq!(names, vec!["a-stuck".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_record() {
        let store = MemoryGeneratorStateStore::default();
        let now = Utc::now();
        record(&store, "stuck", Some(now), true).await;

        assert_eq!(sweep(&store, now).await.unwrap(), 0);
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }
}
