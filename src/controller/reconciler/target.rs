//! # Target Reconciliation
//!
//! Commits rendered secret content to the target secret according to the
//! creation and deletion policies of the `ExternalSecret`.
//!
//! - `Owner` and `Orphan` write the whole secret. `Owner` also sets a
//!   controller owner reference, and neither touches a secret controlled by
//!   another resource.
//! - `Merge` applies only the fields this controller writes. Fields owned by
//!   other writers stay, fields it owned before and no longer sets are pruned.
//! - `None` never writes.
//!
//! With `deletionPolicy: Merge` and empty sources, owned data keys are
//! removed the same way they were written: an empty apply for `Merge`, a
//! replace without them for `Owner` and `Orphan`.
//!
//! Writes are skipped when the secret already holds the desired content, so
//! repeated passes over unchanged sources do not touch the API server.

use super::utils::data_hash;
use crate::constants::{ANNOTATION_DATA_HASH, API_GROUP, LABEL_MANAGED, LABEL_MANAGED_VALUE};
use crate::crd::{CreationPolicy, DeletionPolicy, ExternalSecret, ExternalSecretTarget};
use crate::provider::SecretData;
use crate::observability::metrics;
use crate::store::{ApplySecret, OwnedFields, OwnerRef, StoreError, TargetSecret, TargetStore};
use crate::template::RenderedSecret;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("target secret {name} is controlled by {kind} {owner}")]
    OwnedByOther {
        name: String,
        kind: String,
        owner: String,
    },
    #[error("target secret {0} does not exist and creationPolicy is None")]
    MissingWithNone(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a commit did to the target secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAction {
    /// Already in the desired state
    Unchanged,
    Created,
    Updated,
    /// Field-owned apply
    Applied,
    Deleted,
    /// Owned fields removed because the sources returned nothing
    Pruned,
    /// Sources returned nothing and the secret was kept as it is
    Missing,
}

impl TargetAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TargetAction::Unchanged => "skip",
            TargetAction::Created => "create",
            TargetAction::Updated => "update",
            TargetAction::Applied => "apply",
            TargetAction::Deleted => "delete",
            TargetAction::Pruned => "prune",
            TargetAction::Missing => "missing",
        }
    }
}

impl fmt::Display for TargetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller owner reference pointing at `es`
#[must_use]
pub fn owner_reference(es: &ExternalSecret) -> OwnerRef {
    OwnerRef {
        api_version: format!("{API_GROUP}/v1"),
        kind: "ExternalSecret".to_string(),
        name: es.metadata.name.clone().unwrap_or_default(),
        uid: es.metadata.uid.clone().unwrap_or_default(),
        controller: true,
    }
}

/// Commit `rendered` to the target secret of `es`
///
/// `sources_empty` is true when the aggregated source data was empty, which
/// hands control to the deletion policy.
pub async fn commit(
    store: &dyn TargetStore,
    es: &ExternalSecret,
    rendered: &RenderedSecret,
    existing: Option<TargetSecret>,
    sources_empty: bool,
) -> Result<TargetAction, TargetError> {
    let namespace = es.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let name = es.target_name();
    let target = &es.spec.target;
    let has_sources = !es.spec.data.is_empty() || !es.spec.data_from.is_empty();

    let action = if has_sources && sources_empty {
        on_empty_sources(store, target, &namespace, &name, existing).await?
    } else {
        match target.creation_policy {
            CreationPolicy::None => match existing {
                Some(_) => TargetAction::Unchanged,
                None if rendered.data.is_empty() => TargetAction::Unchanged,
                None => return Err(TargetError::MissingWithNone(name)),
            },
            CreationPolicy::Merge => {
                let type_ = target.template.as_ref().and_then(|t| t.r#type.clone());
                merge(store, &namespace, &name, rendered, type_, existing).await?
            }
            CreationPolicy::Owner | CreationPolicy::Orphan => {
                let owner = (target.creation_policy == CreationPolicy::Owner)
                    .then(|| owner_reference(es));
                let uid = es.metadata.uid.clone().unwrap_or_default();
                replace(store, &namespace, &name, rendered, owner, &uid, existing).await?
            }
        }
    };

    metrics::record_target_operation(action.as_str());
    if action == TargetAction::Unchanged {
        debug!(secret = %name, "Target secret unchanged");
    } else {
        info!(secret = %name, action = %action, "Target secret reconciled");
    }
    Ok(action)
}

async fn on_empty_sources(
    store: &dyn TargetStore,
    target: &ExternalSecretTarget,
    namespace: &str,
    name: &str,
    existing: Option<TargetSecret>,
) -> Result<TargetAction, TargetError> {
    match (target.deletion_policy, existing) {
        (DeletionPolicy::Retain, _) => Ok(TargetAction::Missing),
        (DeletionPolicy::Delete, None) => Ok(TargetAction::Deleted),
        (DeletionPolicy::Delete, Some(secret)) if secret.is_managed() => {
            store.delete(namespace, name).await?;
            Ok(TargetAction::Deleted)
        }
        (DeletionPolicy::Delete, Some(_)) => {
            warn!(secret = %name, "Sources are empty but the secret is not managed, leaving it");
            Ok(TargetAction::Missing)
        }
        (DeletionPolicy::Merge, None) => Ok(TargetAction::Pruned),
        (DeletionPolicy::Merge, Some(_)) if target.creation_policy == CreationPolicy::Merge => {
            store
                .apply(&ApplySecret {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    ..ApplySecret::default()
                })
                .await?;
            Ok(TargetAction::Pruned)
        }
        // Written with a full replace, so an empty apply would release nothing
        (DeletionPolicy::Merge, Some(secret)) => prune_replaced(store, secret).await,
    }
}

/// Rewrite `secret` without the data keys this controller owns
async fn prune_replaced(
    store: &dyn TargetStore,
    secret: TargetSecret,
) -> Result<TargetAction, TargetError> {
    if secret.owned_data().is_empty() {
        return Ok(TargetAction::Pruned);
    }
    let data: SecretData = secret
        .data
        .iter()
        .filter(|(k, _)| !secret.owned.data.contains(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let mut annotations = secret.annotations.clone();
    annotations.insert(ANNOTATION_DATA_HASH.to_string(), data_hash(&data));
    store
        .replace(&TargetSecret {
            data,
            annotations,
            owned: OwnedFields::default(),
            applied: OwnedFields::default(),
            ..secret
        })
        .await?;
    Ok(TargetAction::Pruned)
}

async fn replace(
    store: &dyn TargetStore,
    namespace: &str,
    name: &str,
    rendered: &RenderedSecret,
    owner: Option<OwnerRef>,
    uid: &str,
    existing: Option<TargetSecret>,
) -> Result<TargetAction, TargetError> {
    if let Some(controller) = existing.as_ref().and_then(TargetSecret::controller) {
        if controller.uid != uid {
            return Err(TargetError::OwnedByOther {
                name: name.to_string(),
                kind: controller.kind.clone(),
                owner: controller.name.clone(),
            });
        }
    }

    let hash = data_hash(&rendered.data);
    let mut labels = rendered.labels.clone();
    labels.insert(LABEL_MANAGED.to_string(), LABEL_MANAGED_VALUE.to_string());
    let mut annotations = rendered.annotations.clone();
    annotations.insert(ANNOTATION_DATA_HASH.to_string(), hash.clone());
    let mut owner_references: Vec<OwnerRef> = existing
        .iter()
        .flat_map(|s| s.owner_references.iter())
        .filter(|o| o.uid != uid)
        .cloned()
        .collect();
    owner_references.extend(owner);

    let desired = TargetSecret {
        name: name.to_string(),
        namespace: namespace.to_string(),
        type_: rendered.type_.clone(),
        data: rendered.data.clone(),
        labels,
        annotations,
        owner_references,
        owned: OwnedFields::default(),
        applied: OwnedFields::default(),
        resource_version: existing.as_ref().and_then(|s| s.resource_version.clone()),
    };

    match existing {
        None => {
            store.create(&desired).await?;
            Ok(TargetAction::Created)
        }
        Some(current) if is_current(&current, &desired, &hash) => Ok(TargetAction::Unchanged),
        Some(_) => {
            store.replace(&desired).await?;
            Ok(TargetAction::Updated)
        }
    }
}

fn is_current(current: &TargetSecret, desired: &TargetSecret, hash: &str) -> bool {
    current.annotations.get(ANNOTATION_DATA_HASH).map(String::as_str) == Some(hash)
        && data_hash(&current.data) == hash
        && current.type_ == desired.type_
        && current.labels == desired.labels
        && current.annotations == desired.annotations
        && current.owner_references == desired.owner_references
}

async fn merge(
    store: &dyn TargetStore,
    namespace: &str,
    name: &str,
    rendered: &RenderedSecret,
    type_: Option<String>,
    existing: Option<TargetSecret>,
) -> Result<TargetAction, TargetError> {
    let hash = data_hash(&rendered.data);
    let mut annotations = rendered.annotations.clone();
    annotations.insert(ANNOTATION_DATA_HASH.to_string(), hash.clone());
    let apply = ApplySecret {
        name: name.to_string(),
        namespace: namespace.to_string(),
        type_,
        data: rendered.data.clone(),
        labels: rendered.labels.clone(),
        annotations,
    };

    if let Some(current) = &existing {
        let desired_keys: BTreeSet<String> = apply.data.keys().cloned().collect();
        let in_place = current.annotations.get(ANNOTATION_DATA_HASH) == Some(&hash)
            && data_hash(&current.owned_data()) == hash
            && current.applied.data == desired_keys
            && apply.labels.iter().all(|(k, v)| current.labels.get(k) == Some(v))
            && apply.annotations.iter().all(|(k, v)| current.annotations.get(k) == Some(v))
            && apply.type_.as_ref().is_none_or(|t| *t == current.type_);
        if in_place {
            return Ok(TargetAction::Unchanged);
        }
    }
    store.apply(&apply).await?;
    Ok(TargetAction::Applied)
}
