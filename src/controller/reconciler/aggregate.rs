//! # Reference Aggregation
//!
//! Collects the secret data of one `ExternalSecret` into a single map.
//!
//! `dataFrom` entries are processed first, in index order, so that explicit
//! `data` entries overwrite keys produced by bulk lookups. Each `dataFrom`
//! entry runs its own rewrite rules before its result is merged. Store
//! clients are resolved once per store and pass.
//!
//! Per-store readiness and key lookups are recorded in a [`SourceTracker`]
//! that the caller owns, so the report survives a failed pass.

use super::rewrite::{self, RewriteError};
use super::utils::{invalid_keys, is_valid_key, owner_key};
use crate::crd::{
    DecodingStrategy, DeletionPolicy, ExternalSecret, ExternalSecretData, ExternalSecretDataFrom,
    GeneratorRef, SecretStoreRef, SourceStatus,
};
use crate::generator::statemanager::Manager;
use crate::generator::GeneratorError;
use crate::observability::metrics;
use crate::provider::{ProviderError, SecretData, SecretsClient};
use crate::store::{SourceError, SourceResolver};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("error processing spec.data[{index}] (key: {key}), err: {source}")]
    Data {
        index: usize,
        key: String,
        #[source]
        source: EntryError,
    },
    #[error("error processing spec.dataFrom[{index}], err: {source}")]
    DataFrom {
        index: usize,
        #[source]
        source: EntryError,
    },
    #[error("invalid keys in secret data: {}", .0.join(", "))]
    InvalidKeys(Vec<String>),
}

/// Failure of a single `data` or `dataFrom` entry
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error("unable to decode value of {key} as {strategy:?}")]
    Decode {
        key: String,
        strategy: DecodingStrategy,
    },
    #[error("invalid secret key {0:?}, keys must match ^[A-Za-z0-9._-]+$")]
    InvalidKey(String),
    #[error("one of extract, find or sourceRef.generatorRef is required")]
    NoSource,
}

/// Per-source status collected during one pass
#[derive(Debug, Default)]
pub struct SourceTracker {
    sources: Vec<SourceStatus>,
}

impl SourceTracker {
    fn entry(&mut self, kind: &str, name: &str) -> &mut SourceStatus {
        let position = self
            .sources
            .iter()
            .position(|s| s.kind == kind && s.name == name);
        let index = position.unwrap_or_else(|| {
            self.sources.push(SourceStatus {
                kind: kind.to_string(),
                name: name.to_string(),
                ready: true,
                exists: true,
                ..SourceStatus::default()
            });
            self.sources.len() - 1
        });
        &mut self.sources[index]
    }

    pub fn ready(&mut self, kind: &str, name: &str) {
        self.entry(kind, name);
    }

    pub fn failed(&mut self, kind: &str, name: &str, message: impl Into<String>) {
        let entry = self.entry(kind, name);
        entry.ready = false;
        entry.message = Some(message.into());
    }

    pub fn found(&mut self, kind: &str, name: &str, key: &str) {
        let entry = self.entry(kind, name);
        if !entry.keys_found.iter().any(|k| k == key) {
            entry.keys_found.push(key.to_string());
        }
    }

    pub fn missing(&mut self, kind: &str, name: &str, key: &str) {
        let entry = self.entry(kind, name);
        entry.exists = false;
        if !entry.keys_missing.iter().any(|k| k == key) {
            entry.keys_missing.push(key.to_string());
        }
    }

    /// Finished report
    #[must_use]
    pub fn into_statuses(self) -> Vec<SourceStatus> {
        self.sources
    }
}

/// Decode a fetched value
pub fn decode(strategy: DecodingStrategy, key: &str, value: Vec<u8>) -> Result<Vec<u8>, EntryError> {
    let standard = |v: &[u8]| STANDARD.decode(v).or_else(|_| STANDARD_NO_PAD.decode(v));
    let url = |v: &[u8]| URL_SAFE.decode(v).or_else(|_| URL_SAFE_NO_PAD.decode(v));
    let decoded = match strategy {
        DecodingStrategy::None => return Ok(value),
        DecodingStrategy::Base64 => standard(&value),
        DecodingStrategy::Base64Url => url(&value),
        DecodingStrategy::Auto => {
            return Ok(standard(&value).or_else(|_| url(&value)).unwrap_or(value));
        }
    };
    decoded.map_err(|e| {
        debug!(key = key, error = %e, "Value decoding failed");
        EntryError::Decode {
            key: key.to_string(),
            strategy,
        }
    })
}

/// Store clients resolved during one pass
struct ClientCache<'a> {
    resolver: &'a dyn SourceResolver,
    namespace: &'a str,
    default_store: Option<&'a SecretStoreRef>,
    clients: HashMap<(crate::crd::StoreKind, String), Arc<dyn SecretsClient>>,
}

impl ClientCache<'_> {
    async fn get(
        &mut self,
        store: Option<&SecretStoreRef>,
        tracker: &mut SourceTracker,
    ) -> Result<(SecretStoreRef, Arc<dyn SecretsClient>), SourceError> {
        let store = store
            .or(self.default_store)
            .cloned()
            .ok_or(SourceError::NoStore)?;
        let cache_key = (store.kind, store.name.clone());
        if let Some(client) = self.clients.get(&cache_key) {
            return Ok((store, Arc::clone(client)));
        }
        match self.resolver.secrets_client(self.namespace, &store).await {
            Ok(client) => {
                tracker.ready(store.kind.as_str(), &store.name);
                self.clients.insert(cache_key, Arc::clone(&client));
                Ok((store, client))
            }
            Err(e) => {
                tracker.failed(store.kind.as_str(), &store.name, e.to_string());
                Err(e)
            }
        }
    }
}

/// Time a provider call and record it
async fn timed<T>(
    client: &dyn SecretsClient,
    call: impl std::future::Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    let start = Instant::now();
    let result = call.await;
    metrics::record_provider_operation(client.provider(), start.elapsed().as_secs_f64());
    if matches!(&result, Err(e) if !e.is_not_found()) {
        metrics::increment_provider_operation_errors(client.provider());
    }
    result
}

/// Merge `partial` into `data`, later writers win
fn merge_into(data: &mut SecretData, partial: SecretData, origin: &str) {
    for (key, value) in partial {
        if data.insert(key.clone(), value).is_some() {
            debug!(key = %key, origin = origin, "Key overwritten by a later entry");
        }
    }
}

/// Collect the secret data of `es`
///
/// Stateful generator output is queued on `states`; nothing is persisted
/// until the caller commits or rolls back.
pub async fn aggregate(
    es: &ExternalSecret,
    resolver: &dyn SourceResolver,
    states: &mut Manager,
    tracker: &mut SourceTracker,
) -> Result<SecretData, AggregateError> {
    let namespace = es.metadata.namespace.as_deref().unwrap_or("default");
    let name = es.metadata.name.as_deref().unwrap_or_default();
    let mut clients = ClientCache {
        resolver,
        namespace,
        default_store: es.spec.secret_store_ref.as_ref(),
        clients: HashMap::new(),
    };
    let mut data = SecretData::new();

    for (index, entry) in es.spec.data_from.iter().enumerate() {
        let partial = data_from_entry(index, entry, namespace, name, &mut clients, states, tracker)
            .await
            .map_err(|source| AggregateError::DataFrom { index, source })?;
        merge_into(&mut data, partial, &format!("spec.dataFrom[{index}]"));
    }

    let deletion_policy = es.spec.target.deletion_policy;
    for (index, entry) in es.spec.data.iter().enumerate() {
        let value = data_entry(entry, deletion_policy, &mut clients, tracker)
            .await
            .map_err(|source| AggregateError::Data {
                index,
                key: entry.remote_ref.key.clone(),
                source,
            })?;
        if let Some(value) = value {
            merge_into(
                &mut data,
                SecretData::from([(entry.secret_key.clone(), value)]),
                &format!("spec.data[{index}]"),
            );
        }
    }

    let invalid = invalid_keys(&data);
    if !invalid.is_empty() {
        return Err(AggregateError::InvalidKeys(invalid));
    }
    Ok(data)
}

async fn data_entry(
    entry: &ExternalSecretData,
    deletion_policy: DeletionPolicy,
    clients: &mut ClientCache<'_>,
    tracker: &mut SourceTracker,
) -> Result<Option<Vec<u8>>, EntryError> {
    if !is_valid_key(&entry.secret_key) {
        return Err(EntryError::InvalidKey(entry.secret_key.clone()));
    }
    let store_ref = entry.source_ref.as_ref().and_then(|s| s.store_ref.as_ref());
    let (store, client) = clients.get(store_ref, tracker).await?;
    let remote = &entry.remote_ref;

    match timed(client.as_ref(), client.get_secret(remote)).await {
        Ok(value) => {
            tracker.found(store.kind.as_str(), &store.name, &remote.key);
            Ok(Some(decode(remote.decoding_strategy, &entry.secret_key, value)?))
        }
        Err(e) if e.is_not_found() => {
            tracker.missing(store.kind.as_str(), &store.name, &remote.key);
            if deletion_policy == DeletionPolicy::Retain {
                return Err(e.into());
            }
            debug!(key = %remote.key, "Remote key not found, skipping");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn data_from_entry(
    index: usize,
    entry: &ExternalSecretDataFrom,
    namespace: &str,
    name: &str,
    clients: &mut ClientCache<'_>,
    states: &mut Manager,
    tracker: &mut SourceTracker,
) -> Result<SecretData, EntryError> {
    let source_ref = entry.source_ref.as_ref();
    let partial = if let Some(generator) = source_ref.and_then(|s| s.generator_ref.as_ref()) {
        let owner = owner_key(namespace, name, index);
        generate(generator, namespace, &owner, clients.resolver, states, tracker).await?
    } else if let Some(remote) = &entry.extract {
        let (store, client) = clients
            .get(source_ref.and_then(|s| s.store_ref.as_ref()), tracker)
            .await?;
        match timed(client.as_ref(), client.get_secret_map(remote)).await {
            Ok(map) => {
                tracker.found(store.kind.as_str(), &store.name, &remote.key);
                decode_all(remote.decoding_strategy, map)?
            }
            Err(e) if e.is_not_found() => {
                tracker.missing(store.kind.as_str(), &store.name, &remote.key);
                SecretData::new()
            }
            Err(e) => return Err(e.into()),
        }
    } else if let Some(find) = &entry.find {
        let (store, client) = clients
            .get(source_ref.and_then(|s| s.store_ref.as_ref()), tracker)
            .await?;
        match timed(client.as_ref(), client.get_all_secrets(find)).await {
            Ok(map) => {
                for key in map.keys() {
                    tracker.found(store.kind.as_str(), &store.name, key);
                }
                decode_all(find.decoding_strategy, map)?
            }
            Err(e) if e.is_not_found() => SecretData::new(),
            Err(e) => return Err(e.into()),
        }
    } else {
        return Err(EntryError::NoSource);
    };

    let rewritten = rewrite::apply(&entry.rewrite, partial)?;
    if let Some(key) = rewritten.keys().find(|k| !is_valid_key(k)) {
        return Err(EntryError::InvalidKey(key.clone()));
    }
    Ok(rewritten)
}

fn decode_all(strategy: DecodingStrategy, map: SecretData) -> Result<SecretData, EntryError> {
    map.into_iter()
        .map(|(key, value)| {
            let decoded = decode(strategy, &key, value)?;
            Ok((key, decoded))
        })
        .collect()
}

async fn generate(
    generator_ref: &GeneratorRef,
    namespace: &str,
    owner_key: &str,
    resolver: &dyn SourceResolver,
    states: &mut Manager,
    tracker: &mut SourceTracker,
) -> Result<SecretData, EntryError> {
    let resolved = match resolver.generator(namespace, generator_ref).await {
        Ok(resolved) => resolved,
        Err(e) => {
            tracker.failed(&generator_ref.kind, &generator_ref.name, e.to_string());
            return Err(e.into());
        }
    };
    tracker.ready(&generator_ref.kind, &generator_ref.name);

    let output = resolved.generator.generate(&resolved.spec).await.map_err(|e| {
        warn!(generator = %generator_ref.name, error = %e, "Generator failed");
        e
    })?;
    metrics::increment_generator_runs(&resolved.kind);

    if let Some(state) = output.state {
        let record = states.enqueue_set_latest(
            owner_key,
            &resolved.kind,
            Arc::clone(&resolved.generator),
            resolved.spec.clone(),
            state,
        );
        states.enqueue_move_state_to_gc(owner_key, &record);
    }
    Ok(output.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_strategies() {
        assert_eq!(
            decode(DecodingStrategy::Base64, "k", b"aGVsbG8=".to_vec()).unwrap(),
            b"hello"
        );
        assert_eq!(
            decode(DecodingStrategy::Base64, "k", b"aGVsbG8".to_vec()).unwrap(),
            b"hello"
        );
        assert_eq!(
            decode(DecodingStrategy::Base64Url, "k", b"_-8".to_vec()).unwrap(),
            vec![0xff, 0xef]
        );
        assert!(decode(DecodingStrategy::Base64, "k", b"not base64!".to_vec()).is_err());
        assert_eq!(
            decode(DecodingStrategy::Auto, "k", b"not base64!".to_vec()).unwrap(),
            b"not base64!"
        );
        assert_eq!(
            decode(DecodingStrategy::None, "k", b"aGVsbG8=".to_vec()).unwrap(),
            b"aGVsbG8="
        );
    }

    #[test]
    fn test_source_tracker_records_per_store() {
        let mut tracker = SourceTracker::default();
        tracker.found("SecretStore", "a", "k1");
        tracker.missing("SecretStore", "a", "k2");
        tracker.failed("ClusterSecretStore", "b", "not ready");
        let statuses = tracker.into_statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].ready);
        assert!(!statuses[0].exists);
        assert_eq!(statuses[0].keys_found, vec!["k1".to_string()]);
        assert_eq!(statuses[0].keys_missing, vec!["k2".to_string()]);
        assert!(!statuses[1].ready);
        assert_eq!(statuses[1].message.as_deref(), Some("not ready"));
    }
}
