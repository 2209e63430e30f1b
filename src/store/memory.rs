//! # In-Memory Stores
//!
//! Process-local implementations of the store traits. They back the test
//! suite and follow the same ownership rules as the Kubernetes API: a full
//! replace hands every field to the controller as an update, a field-owned
//! apply prunes only fields the controller applied before and no longer
//! sets. Fields held through an update survive an apply that omits them.

use super::{
    admit_store, ApplySecret, GeneratorStateStore, OwnedFields, ResolvedGenerator,
    ResourceReader, SourceError, SourceResolver, SourceResource, StoreError, TargetSecret,
    TargetStore,
};
use crate::crd::{
    ClusterStoreCondition, GeneratorRef, GeneratorState, SecretStoreRef, StoreKind,
    CLUSTER_GENERATOR_KIND,
};
use crate::generator::{for_kind, Generator};
use crate::provider::SecretsClient;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StoreEntry {
    client: Arc<dyn SecretsClient>,
    ready: bool,
    conditions: Vec<ClusterStoreCondition>,
}

struct GeneratorEntry {
    kind: String,
    spec: serde_json::Value,
    generator: Arc<dyn Generator>,
}

/// Stores and generators registered by hand
///
/// Namespaced entries are keyed by namespace and name, cluster entries use
/// an empty namespace.
#[derive(Default)]
pub struct MemorySourceResolver {
    stores: Mutex<BTreeMap<(StoreKind, String, String), StoreEntry>>,
    generators: Mutex<BTreeMap<(String, String, String), GeneratorEntry>>,
}

impl std::fmt::Debug for MemorySourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySourceResolver").finish_non_exhaustive()
    }
}

impl MemorySourceResolver {
    pub fn add_store(&self, namespace: &str, name: &str, client: Arc<dyn SecretsClient>) {
        lock(&self.stores).insert(
            (StoreKind::SecretStore, namespace.to_string(), name.to_string()),
            StoreEntry {
                client,
                ready: true,
                conditions: Vec::new(),
            },
        );
    }

    pub fn add_cluster_store(
        &self,
        name: &str,
        client: Arc<dyn SecretsClient>,
        conditions: Vec<ClusterStoreCondition>,
    ) {
        lock(&self.stores).insert(
            (StoreKind::ClusterSecretStore, String::new(), name.to_string()),
            StoreEntry {
                client,
                ready: true,
                conditions,
            },
        );
    }

    /// Mark a registered store ready or not ready
    pub fn set_store_ready(&self, kind: StoreKind, namespace: &str, name: &str, ready: bool) {
        let namespace = match kind {
            StoreKind::SecretStore => namespace.to_string(),
            StoreKind::ClusterSecretStore => String::new(),
        };
        if let Some(entry) = lock(&self.stores).get_mut(&(kind, namespace, name.to_string())) {
            entry.ready = ready;
        }
    }

    /// Register a built-in generator resource
    ///
    /// A `ClusterGenerator` takes its `{kind, generator}` wrapper as spec and
    /// ignores `namespace`.
    pub fn add_generator(&self, namespace: &str, kind: &str, name: &str, spec: serde_json::Value) {
        let (inner_kind, inner_spec, namespace) = if kind == CLUSTER_GENERATOR_KIND {
            (
                spec.get("kind")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                spec.get("generator").cloned().unwrap_or_default(),
                "",
            )
        } else {
            (kind.to_string(), spec, namespace)
        };
        if let Some(generator) = for_kind(&inner_kind) {
            self.add_generator_with(namespace, kind, name, &inner_kind, inner_spec, generator);
        }
    }

    /// Register an arbitrary generator implementation under `ref_kind`/`name`
    pub fn add_generator_with(
        &self,
        namespace: &str,
        ref_kind: &str,
        name: &str,
        kind: &str,
        spec: serde_json::Value,
        generator: Arc<dyn Generator>,
    ) {
        lock(&self.generators).insert(
            (ref_kind.to_string(), namespace.to_string(), name.to_string()),
            GeneratorEntry {
                kind: kind.to_string(),
                spec,
                generator,
            },
        );
    }
}

#[async_trait]
impl SourceResolver for MemorySourceResolver {
    async fn secrets_client(
        &self,
        namespace: &str,
        store: &SecretStoreRef,
    ) -> Result<Arc<dyn SecretsClient>, SourceError> {
        let store_namespace = match store.kind {
            StoreKind::SecretStore => namespace.to_string(),
            StoreKind::ClusterSecretStore => String::new(),
        };
        let stores = lock(&self.stores);
        let entry = stores
            .get(&(store.kind, store_namespace, store.name.clone()))
            .ok_or_else(|| SourceError::StoreNotFound {
                kind: store.kind,
                name: store.name.clone(),
            })?;
        admit_store(store, namespace, &entry.conditions, !entry.ready)?;
        Ok(Arc::clone(&entry.client))
    }

    async fn generator(
        &self,
        namespace: &str,
        generator: &GeneratorRef,
    ) -> Result<ResolvedGenerator, SourceError> {
        let lookup_namespace = if generator.kind == CLUSTER_GENERATOR_KIND {
            ""
        } else {
            namespace
        };
        let generators = lock(&self.generators);
        let entry = generators
            .get(&(
                generator.kind.clone(),
                lookup_namespace.to_string(),
                generator.name.clone(),
            ))
            .ok_or_else(|| SourceError::GeneratorNotFound {
                kind: generator.kind.clone(),
                name: generator.name.clone(),
            })?;
        Ok(ResolvedGenerator {
            kind: entry.kind.clone(),
            spec: entry.spec.clone(),
            generator: Arc::clone(&entry.generator),
        })
    }
}

/// Config maps and secrets readable by templates
#[derive(Debug, Default)]
pub struct MemoryResourceReader {
    config_maps: Mutex<BTreeMap<Key, SourceResource>>,
    secrets: Mutex<BTreeMap<Key, SourceResource>>,
}

impl MemoryResourceReader {
    pub fn put_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        resource_version: &str,
    ) {
        lock(&self.config_maps).insert(
            key(namespace, name),
            SourceResource {
                data,
                resource_version: resource_version.to_string(),
            },
        );
    }

    pub fn put_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        resource_version: &str,
    ) {
        lock(&self.secrets).insert(
            key(namespace, name),
            SourceResource {
                data,
                resource_version: resource_version.to_string(),
            },
        );
    }
}

#[async_trait]
impl ResourceReader for MemoryResourceReader {
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SourceResource>, StoreError> {
        Ok(lock(&self.config_maps).get(&key(namespace, name)).cloned())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SourceResource>, StoreError> {
        Ok(lock(&self.secrets).get(&key(namespace, name)).cloned())
    }
}

/// Target secrets, counting every mutation
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    secrets: Mutex<BTreeMap<Key, TargetSecret>>,
    mutations: AtomicUsize,
    versions: AtomicUsize,
}

impl MemoryTargetStore {
    /// Number of create, replace, apply and delete calls that changed something
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Snapshot of a stored secret
    #[must_use]
    pub fn secret(&self, namespace: &str, name: &str) -> Option<TargetSecret> {
        lock(&self.secrets).get(&key(namespace, name)).cloned()
    }

    /// Store a secret written by someone else, the controller owns none of it
    pub fn put_foreign(&self, secret: TargetSecret) {
        let mut secret = secret;
        secret.owned = OwnedFields::default();
        secret.applied = OwnedFields::default();
        secret.resource_version = Some(self.next_version());
        lock(&self.secrets).insert(key(&secret.namespace, &secret.name), secret);
    }

    /// Change data behind the controller's back, keeping field ownership
    pub fn tamper(&self, namespace: &str, name: &str, data_key: &str, value: &[u8]) {
        let version = self.next_version();
        if let Some(secret) = lock(&self.secrets).get_mut(&key(namespace, name)) {
            secret.data.insert(data_key.to_string(), value.to_vec());
            secret.resource_version = Some(version);
        }
    }

    fn next_version(&self) -> String {
        (self.versions.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn store(&self, mut secret: TargetSecret) -> TargetSecret {
        secret.resource_version = Some(self.next_version());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        lock(&self.secrets).insert(key(&secret.namespace, &secret.name), secret.clone());
        secret
    }
}

fn fully_owned(secret: &TargetSecret) -> OwnedFields {
    OwnedFields {
        data: secret.data.keys().cloned().collect(),
        labels: secret.labels.keys().cloned().collect(),
        annotations: secret.annotations.keys().cloned().collect(),
    }
}

/// Apply `desired` over `current`
///
/// Keys applied before and no longer set are pruned, the rest are set.
/// Returns the new applied set and the new full ownership: keys held
/// through an update stay owned unless they were pruned.
fn apply_map<V: Clone>(
    current: &mut BTreeMap<String, V>,
    owned: &BTreeSet<String>,
    applied: &BTreeSet<String>,
    desired: &BTreeMap<String, V>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let stale: BTreeSet<String> = applied
        .iter()
        .filter(|k| !desired.contains_key(*k))
        .cloned()
        .collect();
    for key in &stale {
        current.remove(key);
    }
    for (k, v) in desired {
        current.insert(k.clone(), v.clone());
    }
    let now_applied: BTreeSet<String> = desired.keys().cloned().collect();
    let now_owned = owned
        .iter()
        .filter(|k| !stale.contains(*k))
        .cloned()
        .chain(now_applied.iter().cloned())
        .collect();
    (now_applied, now_owned)
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<TargetSecret>, StoreError> {
        Ok(self.secret(namespace, name))
    }

    async fn create(&self, secret: &TargetSecret) -> Result<TargetSecret, StoreError> {
        if self.secret(&secret.namespace, &secret.name).is_some() {
            return Err(StoreError::Conflict {
                kind: "Secret",
                name: secret.name.clone(),
                message: "already exists".to_string(),
            });
        }
        let mut created = secret.clone();
        created.owned = fully_owned(&created);
        created.applied = OwnedFields::default();
        Ok(self.store(created))
    }

    async fn replace(&self, secret: &TargetSecret) -> Result<TargetSecret, StoreError> {
        let current = self
            .secret(&secret.namespace, &secret.name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "Secret",
                name: secret.name.clone(),
            })?;
        if secret.resource_version.is_some() && secret.resource_version != current.resource_version
        {
            return Err(StoreError::Conflict {
                kind: "Secret",
                name: secret.name.clone(),
                message: "resource version changed".to_string(),
            });
        }
        let mut replaced = secret.clone();
        replaced.owned = fully_owned(&replaced);
        replaced.applied = OwnedFields::default();
        Ok(self.store(replaced))
    }

    async fn apply(&self, secret: &ApplySecret) -> Result<TargetSecret, StoreError> {
        let mut current = self
            .secret(&secret.namespace, &secret.name)
            .unwrap_or_else(|| TargetSecret {
                name: secret.name.clone(),
                namespace: secret.namespace.clone(),
                type_: crate::constants::DEFAULT_SECRET_TYPE.to_string(),
                ..TargetSecret::default()
            });
        let (owned, applied) = (current.owned.clone(), current.applied.clone());
        let (applied_data, owned_data) =
            apply_map(&mut current.data, &owned.data, &applied.data, &secret.data);
        let (applied_labels, owned_labels) =
            apply_map(&mut current.labels, &owned.labels, &applied.labels, &secret.labels);
        let (applied_annotations, owned_annotations) = apply_map(
            &mut current.annotations,
            &owned.annotations,
            &applied.annotations,
            &secret.annotations,
        );
        current.owned = OwnedFields {
            data: owned_data,
            labels: owned_labels,
            annotations: owned_annotations,
        };
        current.applied = OwnedFields {
            data: applied_data,
            labels: applied_labels,
            annotations: applied_annotations,
        };
        if let Some(type_) = &secret.type_ {
            current.type_.clone_from(type_);
        }
        Ok(self.store(current))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        if lock(&self.secrets).remove(&key(namespace, name)).is_some() {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Generator state records with strictly increasing creation timestamps
#[derive(Debug, Default)]
pub struct MemoryGeneratorStateStore {
    records: Mutex<BTreeMap<Key, GeneratorState>>,
    clock: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryGeneratorStateStore {
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut clock = lock(&self.clock);
        let now = Utc::now().trunc_subsecs(0);
        let next = match *clock {
            Some(last) if last >= now => last + chrono::Duration::seconds(1),
            _ => now,
        };
        *clock = Some(next);
        next
    }
}

#[async_trait]
impl GeneratorStateStore for MemoryGeneratorStateStore {
    async fn list(
        &self,
        namespace: &str,
        owner_key: &str,
    ) -> Result<Vec<GeneratorState>, StoreError> {
        Ok(lock(&self.records)
            .iter()
            .filter(|((ns, _), record)| {
                ns == namespace
                    && record
                        .metadata
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(crate::constants::LABEL_GENERATOR_OWNER_KEY))
                        .is_some_and(|k| k == owner_key)
            })
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<GeneratorState>, StoreError> {
        Ok(lock(&self.records).values().cloned().collect())
    }

    async fn create(&self, state: &GeneratorState) -> Result<GeneratorState, StoreError> {
        let name = state.metadata.name.clone().unwrap_or_default();
        let namespace = state.metadata.namespace.clone().unwrap_or_default();
        if lock(&self.records).contains_key(&key(&namespace, &name)) {
            return Err(StoreError::Conflict {
                kind: "GeneratorState",
                name,
                message: "already exists".to_string(),
            });
        }
        let timestamp = self.next_timestamp();
        let mut created = state.clone();
        created.metadata.creation_timestamp = Some(
            serde_json::from_value(serde_json::Value::String(
                timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            ))
            .map_err(|e| StoreError::Invalid {
                kind: "GeneratorState",
                name: name.clone(),
                message: e.to_string(),
            })?,
        );
        lock(&self.records).insert(key(&namespace, &name), created.clone());
        Ok(created)
    }

    async fn set_gc_deadline(
        &self,
        namespace: &str,
        name: &str,
        deadline: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound {
                kind: "GeneratorState",
                name: name.to_string(),
            })?;
        record.spec.garbage_collection_deadline = Some(deadline.to_rfc3339());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        lock(&self.records).remove(&key(namespace, name));
        Ok(())
    }
}
