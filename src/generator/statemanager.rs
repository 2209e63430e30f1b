//! # Generator State Transactions
//!
//! Collects the state record writes of one reconcile pass. Nothing touches
//! the store until the pass ends with exactly one of [`Manager::commit`] or
//! [`Manager::rollback`]; both consume the manager.
//!
//! Among the unflagged records of one owner key, the one with the newest
//! creation timestamp is the latest state. Superseded records are flagged
//! with a deadline of `now + grace` instead of being deleted, so a reconcile
//! working from a stale cache never races a delete. The GC sweep removes
//! them once the deadline has passed.

use super::{Generator, GeneratorError};
use crate::constants::LABEL_GENERATOR_OWNER_KEY;
use crate::crd::{GeneratorState, GeneratorStateSpec};
use crate::store::{GeneratorStateStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error("{}", join_messages(.0))]
    Multiple(Vec<StateError>),
}

fn join_messages(errors: &[StateError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StateError {
    /// Fold a list of errors into at most one
    fn join(mut errors: Vec<StateError>) -> Result<(), StateError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(StateError::Multiple(errors)),
        }
    }
}

enum Operation {
    SetLatest {
        record: GeneratorState,
        generator: Arc<dyn Generator>,
        spec: serde_json::Value,
        state: serde_json::Value,
    },
    MoveStateToGc {
        owner_key: String,
        keep: String,
    },
    FlagLatest {
        owner_key: String,
    },
}

/// Queue of state record operations for one reconcile pass
pub struct Manager {
    namespace: String,
    store: Arc<dyn GeneratorStateStore>,
    gc_grace: chrono::Duration,
    now: DateTime<Utc>,
    queue: Vec<Operation>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("namespace", &self.namespace)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Manager {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        store: Arc<dyn GeneratorStateStore>,
        gc_grace: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            gc_grace,
            now,
            queue: Vec::new(),
        }
    }

    /// Number of queued operations
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queue a new latest state for `owner_key`
    ///
    /// Commit persists the record. Rollback asks the generator to clean up;
    /// only when that fails is the record persisted, already flagged for
    /// immediate collection, so the sweep retries the cleanup.
    ///
    /// Returns the name the record will be created with.
    pub fn enqueue_set_latest(
        &mut self,
        owner_key: &str,
        kind: &str,
        generator: Arc<dyn Generator>,
        spec: serde_json::Value,
        state: serde_json::Value,
    ) -> String {
        let name = record_name(owner_key, self.now);
        let mut record = GeneratorState::new(
            &name,
            GeneratorStateSpec {
                garbage_collection_deadline: None,
                resource: serde_json::json!({ "kind": kind, "spec": spec }),
                state: state.clone(),
            },
        );
        record.metadata.namespace = Some(self.namespace.clone());
        record.metadata.labels = Some(BTreeMap::from([(
            LABEL_GENERATOR_OWNER_KEY.to_string(),
            owner_key.to_string(),
        )]));
        self.queue.push(Operation::SetLatest {
            record,
            generator,
            spec,
            state,
        });
        name
    }

    /// Queue flagging every unflagged record of `owner_key` except `keep`
    pub fn enqueue_move_state_to_gc(&mut self, owner_key: &str, keep: &str) {
        self.queue.push(Operation::MoveStateToGc {
            owner_key: owner_key.to_string(),
            keep: keep.to_string(),
        });
    }

    /// Queue flagging the current latest record of `owner_key`
    pub fn enqueue_flag_latest_state_for_gc(&mut self, owner_key: &str) {
        self.queue.push(Operation::FlagLatest {
            owner_key: owner_key.to_string(),
        });
    }

    /// Run every queued commit operation
    ///
    /// Operations run in queue order. A failing operation does not stop the
    /// ones after it; all errors are joined.
    pub async fn commit(self) -> Result<(), StateError> {
        let mut errors = Vec::new();
        for operation in &self.queue {
            let result = match operation {
                Operation::SetLatest { record, .. } => self
                    .store
                    .create(record)
                    .await
                    .map(|_| ())
                    .map_err(StateError::from),
                Operation::MoveStateToGc { owner_key, keep } => {
                    self.flag_where(owner_key, |r| r.metadata.name.as_deref() != Some(keep.as_str()))
                        .await
                }
                Operation::FlagLatest { owner_key } => self.flag_latest(owner_key).await,
            };
            if let Err(e) = result {
                warn!(error = %e, "Generator state commit operation failed");
                errors.push(e);
            }
        }
        StateError::join(errors)
    }

    /// Run every queued rollback operation
    pub async fn rollback(self) -> Result<(), StateError> {
        let mut errors = Vec::new();
        for operation in &self.queue {
            let Operation::SetLatest {
                record,
                generator,
                spec,
                state,
            } = operation
            else {
                continue;
            };
            if let Err(cleanup_err) = generator.cleanup(spec, state).await {
                warn!(
                    error = %cleanup_err,
                    record = record.metadata.name.as_deref().unwrap_or_default(),
                    "Generator cleanup failed during rollback, persisting state for collection"
                );
                let mut flagged = record.clone();
                flagged.spec.garbage_collection_deadline = Some(self.now.to_rfc3339());
                if let Err(store_err) = self.store.create(&flagged).await {
                    errors.push(StateError::Generator(cleanup_err));
                    errors.push(StateError::Store(store_err));
                }
            }
        }
        StateError::join(errors)
    }

    async fn flag_latest(&self, owner_key: &str) -> Result<(), StateError> {
        let records = self.store.list(&self.namespace, owner_key).await?;
        let Some(name) = latest(&records).and_then(|r| r.metadata.name.clone()) else {
            return Ok(());
        };
        self.flag_where(owner_key, |r| r.metadata.name.as_deref() == Some(name.as_str()))
            .await
    }

    async fn flag_where(
        &self,
        owner_key: &str,
        select: impl Fn(&GeneratorState) -> bool,
    ) -> Result<(), StateError> {
        let deadline = self.now + self.gc_grace;
        let records = self.store.list(&self.namespace, owner_key).await?;
        let mut errors = Vec::new();
        for record in records.iter().filter(|r| !r.is_flagged() && select(r)) {
            let Some(name) = record.metadata.name.as_deref() else {
                continue;
            };
            debug!(record = name, deadline = %deadline, "Flagging generator state for GC");
            if let Err(e) = self
                .store
                .set_gc_deadline(&self.namespace, name, deadline)
                .await
            {
                errors.push(StateError::from(e));
            }
        }
        StateError::join(errors)
    }
}

/// The latest record: unflagged, newest creation timestamp, name breaks ties
#[must_use]
pub fn latest(records: &[GeneratorState]) -> Option<&GeneratorState> {
    records
        .iter()
        .filter(|r| !r.is_flagged())
        .max_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        })
}

/// `<owner key prefix>-<unix millis>-<random>`, sortable by creation time
fn record_name(owner_key: &str, now: DateTime<Utc>) -> String {
    let prefix: String = owner_key.chars().take(8).collect();
    let suffix: String = ::uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{prefix}-{:013}-{suffix}", now.timestamp_millis().max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::fake::FakeGenerator;
    use crate::store::memory::MemoryGeneratorStateStore;

    fn fake() -> Arc<dyn Generator> {
        Arc::new(FakeGenerator)
    }

    fn manager(store: &Arc<MemoryGeneratorStateStore>) -> Manager {
        Manager::new(
            "default",
            Arc::clone(store) as Arc<dyn GeneratorStateStore>,
            chrono::Duration::seconds(300),
            Utc::now(),
        )
    }

    async fn unflagged(store: &MemoryGeneratorStateStore, owner_key: &str) -> Vec<GeneratorState> {
        store
            .list("default", owner_key)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| !r.is_flagged())
            .collect()
    }

    #[test]
    fn test_record_name_shape() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = record_name("0123456789abcdef", now);
        assert!(name.starts_with("01234567-1767225600000-"));
        assert_eq!(name.len(), 8 + 1 + 13 + 1 + 8);
    }

    #[tokio::test]
    async fn test_nothing_runs_before_commit() {
        let store = Arc::new(MemoryGeneratorStateStore::default());
        let mut m = manager(&store);
        let spec = serde_json::json!({"data": {}});
        m.enqueue_set_latest("owner", "Fake", fake(), spec, serde_json::json!({"n": 1}));
        assert!(store.list_all().await.unwrap().is_empty());
        m.commit().await.unwrap();
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_sequence_keeps_one_latest() {
        let store = Arc::new(MemoryGeneratorStateStore::default());
        let mut names = Vec::new();
        for n in 0..4 {
            let mut m = manager(&store);
            let name = m.enqueue_set_latest(
                "owner",
                "Fake",
                fake(),
                serde_json::json!({"data": {}}),
                serde_json::json!({ "n": n }),
            );
            m.enqueue_move_state_to_gc("owner", &name);
            m.commit().await.unwrap();
            names.push(name);

            let active = unflagged(&store, "owner").await;
            assert_eq!(active.len(), 1);
            assert_eq!(active[0].metadata.name.as_deref(), Some(names[n].as_str()));
        }
        assert_eq!(store.list_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_rollback_with_successful_cleanup_persists_nothing() {
        let store = Arc::new(MemoryGeneratorStateStore::default());
        let mut m = manager(&store);
        m.enqueue_set_latest(
            "owner",
            "Fake",
            fake(),
            serde_json::json!({"data": {}}),
            serde_json::json!({}),
        );
        m.rollback().await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_with_failed_cleanup_flags_immediately() {
        let store = Arc::new(MemoryGeneratorStateStore::default());
        let now = Utc::now();
        let mut m = Manager::new(
            "default",
            Arc::clone(&store) as Arc<dyn GeneratorStateStore>,
            chrono::Duration::seconds(300),
            now,
        );
        m.enqueue_set_latest(
            "owner",
            "Fake",
            fake(),
            serde_json::json!({"data": {}, "failCleanup": true}),
            serde_json::json!({"lease": "x"}),
        );
        m.rollback().await.unwrap();

        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].gc_deadline().is_some_and(|d| d <= now));
        assert!(latest(&records).is_none());
    }

    #[tokio::test]
    async fn test_flag_latest_makes_previous_latest_again() {
        let store = Arc::new(MemoryGeneratorStateStore::default());
        let mut first = String::new();
        for n in 0..2 {
            let mut m = manager(&store);
            let name = m.enqueue_set_latest(
                "owner",
                "Fake",
                fake(),
                serde_json::json!({"data": {}}),
                serde_json::json!({ "n": n }),
            );
            m.commit().await.unwrap();
            if n == 0 {
                first = name;
            }
        }
        let mut m = manager(&store);
        m.enqueue_flag_latest_state_for_gc("owner");
        m.commit().await.unwrap();

        let records = store.list("default", "owner").await.unwrap();
        assert_eq!(
            latest(&records).and_then(|r| r.metadata.name.clone()),
            Some(first)
        );
    }
}
