//! # Resource Store
//!
//! Narrow views of the Kubernetes API used by the sync engine. The engine only
//! talks to these traits, so a pass can run against the cluster (`kube.rs`)
//! or entirely in memory (`memory.rs`, used by the tests).
//!
//! - [`SourceResolver`] - turns store and generator references into capability objects
//! - [`ResourceReader`] - config maps and secrets referenced by templates
//! - [`TargetStore`] - the target secret
//! - [`GeneratorStateStore`] - durable generator state records

use crate::crd::{ClusterStoreCondition, GeneratorRef, GeneratorState, SecretStoreRef, StoreKind};
use crate::generator::Generator;
use crate::provider::{ProviderError, SecretData, SecretsClient};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

pub mod kube;
pub mod memory;

/// Failure of a resource store call
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },
    #[error("kubernetes API error: {0}")]
    Api(#[from] ::kube::Error),
    #[error("invalid {kind} {name}: {message}")]
    Invalid {
        kind: &'static str,
        name: String,
        message: String,
    },
}

/// Failure to resolve a store or generator reference
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{kind} {name} not found")]
    StoreNotFound { kind: StoreKind, name: String },
    #[error("{kind} {name} is not ready")]
    StoreNotReady { kind: StoreKind, name: String },
    #[error("ClusterSecretStore {name} may not be used from namespace {namespace}")]
    NamespaceDenied { name: String, namespace: String },
    #[error("no store referenced and no default secretStoreRef set")]
    NoStore,
    #[error("generator {kind} {name} not found")]
    GeneratorNotFound { kind: String, name: String },
    #[error("unsupported generator kind {0}")]
    UnsupportedGenerator(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owner reference carried by a target secret
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
}

/// Fields of a secret written by this controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedFields {
    pub data: BTreeSet<String>,
    pub labels: BTreeSet<String>,
    pub annotations: BTreeSet<String>,
}

/// The target Kubernetes secret as seen by the sync engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSecret {
    pub name: String,
    pub namespace: String,
    pub type_: String,
    pub data: SecretData,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerRef>,
    /// Field ownership of [`crate::constants::FIELD_MANAGER`], read-only
    pub owned: OwnedFields,
    /// Part of `owned` held through server-side apply, the only fields a
    /// later [`TargetStore::apply`] can prune
    pub applied: OwnedFields,
    pub resource_version: Option<String>,
}

impl TargetSecret {
    /// The controlling owner reference, if any
    #[must_use]
    pub fn controller(&self) -> Option<&OwnerRef> {
        self.owner_references.iter().find(|o| o.controller)
    }

    /// Subset of `data` owned by this controller
    #[must_use]
    pub fn owned_data(&self) -> SecretData {
        self.data
            .iter()
            .filter(|(k, _)| self.owned.data.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether the secret carries the managed label
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.labels.get(crate::constants::LABEL_MANAGED).map(String::as_str)
            == Some(crate::constants::LABEL_MANAGED_VALUE)
    }
}

/// Field-owned write to a target secret
///
/// Every field listed becomes owned by this controller. Fields it applied
/// before and that are absent here are removed. Fields it wrote with a
/// full replace, and fields owned by other writers, are left alone.
/// Colliding fields are taken over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySecret {
    pub name: String,
    pub namespace: String,
    pub type_: Option<String>,
    pub data: SecretData,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// A config map or secret read by a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceResource {
    pub data: BTreeMap<String, String>,
    pub resource_version: String,
}

/// A generator resolved from a `generatorRef`
#[derive(Clone)]
pub struct ResolvedGenerator {
    /// Generator kind, e.g. `Password`
    pub kind: String,
    /// Generator spec as stored on the resource
    pub spec: serde_json::Value,
    pub generator: Arc<dyn Generator>,
}

impl std::fmt::Debug for ResolvedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedGenerator")
            .field("kind", &self.kind)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Check that `namespace` may use a resolved store
///
/// A store reporting `Ready=False` is rejected. A `ClusterSecretStore` with
/// conditions admits only namespaces matching one of them.
pub(crate) fn admit_store(
    store: &SecretStoreRef,
    namespace: &str,
    conditions: &[ClusterStoreCondition],
    not_ready: bool,
) -> Result<(), SourceError> {
    if not_ready {
        return Err(SourceError::StoreNotReady {
            kind: store.kind,
            name: store.name.clone(),
        });
    }
    if store.kind == StoreKind::ClusterSecretStore
        && !conditions.is_empty()
        && !conditions.iter().any(|c| c.matches(namespace))
    {
        return Err(SourceError::NamespaceDenied {
            name: store.name.clone(),
            namespace: namespace.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Client for the referenced store
    ///
    /// Fails when the store is missing, reports `Ready=False` or, for a
    /// `ClusterSecretStore`, does not admit `namespace`.
    async fn secrets_client(
        &self,
        namespace: &str,
        store: &SecretStoreRef,
    ) -> Result<Arc<dyn SecretsClient>, SourceError>;

    async fn generator(
        &self,
        namespace: &str,
        generator: &GeneratorRef,
    ) -> Result<ResolvedGenerator, SourceError>;
}

#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SourceResource>, StoreError>;

    /// Secret data is returned decoded as UTF-8 text
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SourceResource>, StoreError>;
}

#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<TargetSecret>, StoreError>;

    async fn create(&self, secret: &TargetSecret) -> Result<TargetSecret, StoreError>;

    /// Overwrite the whole secret, the controller owns every field afterwards
    async fn replace(&self, secret: &TargetSecret) -> Result<TargetSecret, StoreError>;

    /// Field-owned write, creates the secret when missing
    async fn apply(&self, secret: &ApplySecret) -> Result<TargetSecret, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait GeneratorStateStore: Send + Sync {
    /// Every record labelled with `owner_key`
    async fn list(
        &self,
        namespace: &str,
        owner_key: &str,
    ) -> Result<Vec<GeneratorState>, StoreError>;

    /// Every record in every namespace
    async fn list_all(&self) -> Result<Vec<GeneratorState>, StoreError>;

    /// Persist a record, the returned copy carries its creation timestamp
    async fn create(&self, state: &GeneratorState) -> Result<GeneratorState, StoreError>;

    async fn set_gc_deadline(
        &self,
        namespace: &str,
        name: &str,
        deadline: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_data_filters_foreign_keys() {
        let secret = TargetSecret {
            data: BTreeMap::from([
                ("mine".to_string(), b"1".to_vec()),
                ("theirs".to_string(), b"2".to_vec()),
            ]),
            owned: OwnedFields {
                data: BTreeSet::from(["mine".to_string()]),
                ..OwnedFields::default()
            },
            ..TargetSecret::default()
        };
        assert_eq!(secret.owned_data().keys().collect::<Vec<_>>(), vec!["mine"]);
    }

    #[test]
    fn test_controller_owner() {
        let secret = TargetSecret {
            owner_references: vec![
                OwnerRef {
                    name: "plain".to_string(),
                    ..OwnerRef::default()
                },
                OwnerRef {
                    name: "ctrl".to_string(),
                    controller: true,
                    ..OwnerRef::default()
                },
            ],
            ..TargetSecret::default()
        };
        assert_eq!(secret.controller().map(|o| o.name.as_str()), Some("ctrl"));
        assert!(!secret.is_managed());
    }
}
