//! # Kubernetes Stores
//!
//! Store traits backed by the Kubernetes API. Target secret writes use
//! [`FIELD_MANAGER`]: a full replace for owned secrets and server-side apply
//! for field-owned merges. Field ownership is read back from
//! `metadata.managedFields`.

use super::{
    admit_store, ApplySecret, GeneratorStateStore, OwnedFields, OwnerRef, ResolvedGenerator,
    ResourceReader, SourceError, SourceResolver, SourceResource, StoreError, TargetSecret,
    TargetStore,
};
use crate::config::ControllerConfig;
use crate::constants::{FIELD_MANAGER, LABEL_GENERATOR_OWNER_KEY};
use crate::crd::{
    ClusterGenerator, ClusterSecretStore, Fake, GeneratorRef, GeneratorState, Password,
    SecretStore, SecretStoreRef, StoreKind, Uuid, CLUSTER_GENERATOR_KIND,
};
use crate::generator::for_kind;
use crate::provider::{new_client, SecretsClient};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    ManagedFieldsEntry, ObjectMeta, OwnerReference,
};
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// `Ok(None)` on 404
async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, StoreError>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
        Err(e) => Err(StoreError::Api(e)),
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(api_err) if api_err.code == 404)
}

fn conflict_or_api(kind: &'static str, name: &str, e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
            kind,
            name: name.to_string(),
            message: api_err.message,
        },
        other => StoreError::Api(other),
    }
}

/// Resolves stores and generators from their custom resources
#[derive(Clone)]
pub struct KubeSourceResolver {
    client: Client,
    config: Arc<ControllerConfig>,
}

impl std::fmt::Debug for KubeSourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSourceResolver").finish_non_exhaustive()
    }
}

impl KubeSourceResolver {
    #[must_use]
    pub fn new(client: Client, config: Arc<ControllerConfig>) -> Self {
        Self { client, config }
    }

    async fn generator_spec(
        &self,
        namespace: &str,
        generator: &GeneratorRef,
    ) -> Result<(String, serde_json::Value), SourceError> {
        let not_found = || SourceError::GeneratorNotFound {
            kind: generator.kind.clone(),
            name: generator.name.clone(),
        };
        let to_json = |spec: serde_json::Result<serde_json::Value>| {
            spec.map_err(|e| StoreError::Invalid {
                kind: "generator",
                name: generator.name.clone(),
                message: e.to_string(),
            })
        };
        let name = generator.name.as_str();
        match generator.kind.as_str() {
            CLUSTER_GENERATOR_KIND => {
                let api: Api<ClusterGenerator> = Api::all(self.client.clone());
                let obj = get_opt(&api, name).await?.ok_or_else(not_found)?;
                Ok((obj.spec.kind, obj.spec.generator))
            }
            "Password" => {
                let api: Api<Password> = Api::namespaced(self.client.clone(), namespace);
                let obj = get_opt(&api, name).await?.ok_or_else(not_found)?;
                Ok(("Password".to_string(), to_json(serde_json::to_value(obj.spec))?))
            }
            "UUID" => {
                let api: Api<Uuid> = Api::namespaced(self.client.clone(), namespace);
                let obj = get_opt(&api, name).await?.ok_or_else(not_found)?;
                Ok(("UUID".to_string(), to_json(serde_json::to_value(obj.spec))?))
            }
            "Fake" => {
                let api: Api<Fake> = Api::namespaced(self.client.clone(), namespace);
                let obj = get_opt(&api, name).await?.ok_or_else(not_found)?;
                Ok(("Fake".to_string(), to_json(serde_json::to_value(obj.spec))?))
            }
            other => Err(SourceError::UnsupportedGenerator(other.to_string())),
        }
    }
}

#[async_trait]
impl SourceResolver for KubeSourceResolver {
    async fn secrets_client(
        &self,
        namespace: &str,
        store: &SecretStoreRef,
    ) -> Result<Arc<dyn SecretsClient>, SourceError> {
        let not_found = || SourceError::StoreNotFound {
            kind: store.kind,
            name: store.name.clone(),
        };
        let (spec, not_ready) = match store.kind {
            StoreKind::SecretStore => {
                let api: Api<SecretStore> = Api::namespaced(self.client.clone(), namespace);
                let obj = get_opt(&api, &store.name).await?.ok_or_else(not_found)?;
                let not_ready = obj.status.as_ref().is_some_and(|s| s.is_not_ready());
                (obj.spec, not_ready)
            }
            StoreKind::ClusterSecretStore => {
                let api: Api<ClusterSecretStore> = Api::all(self.client.clone());
                let obj = get_opt(&api, &store.name).await?.ok_or_else(not_found)?;
                let not_ready = obj.status.as_ref().is_some_and(|s| s.is_not_ready());
                (obj.spec.into(), not_ready)
            }
        };
        admit_store(store, namespace, &spec.conditions, not_ready)?;
        debug!(store = %store.name, provider = spec.provider.name(), "Resolved secret store");
        Ok(new_client(&spec.provider, &self.config)?)
    }

    async fn generator(
        &self,
        namespace: &str,
        generator: &GeneratorRef,
    ) -> Result<ResolvedGenerator, SourceError> {
        let (kind, spec) = self.generator_spec(namespace, generator).await?;
        let implementation =
            for_kind(&kind).ok_or_else(|| SourceError::UnsupportedGenerator(kind.clone()))?;
        Ok(ResolvedGenerator {
            kind,
            spec,
            generator: implementation,
        })
    }
}

/// Reads config maps and secrets referenced by templates
#[derive(Clone)]
pub struct KubeResourceReader {
    client: Client,
}

impl std::fmt::Debug for KubeResourceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceReader").finish_non_exhaustive()
    }
}

impl KubeResourceReader {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceReader for KubeResourceReader {
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SourceResource>, StoreError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(get_opt(&api, name).await?.map(|cm| SourceResource {
            data: cm.data.unwrap_or_default(),
            resource_version: cm.metadata.resource_version.unwrap_or_default(),
        }))
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SourceResource>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(get_opt(&api, name).await?.map(|secret| SourceResource {
            data: secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
                .collect(),
            resource_version: secret.metadata.resource_version.unwrap_or_default(),
        }))
    }
}

/// Reads and writes target secrets
#[derive(Clone)]
pub struct KubeTargetStore {
    client: Client,
}

impl std::fmt::Debug for KubeTargetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTargetStore").finish_non_exhaustive()
    }
}

impl KubeTargetStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Keys under `f:<field>` of a managedFields `fieldsV1` tree
fn field_keys(tree: &serde_json::Value, path: &[&str]) -> BTreeSet<String> {
    path.iter()
        .try_fold(tree, |node, segment| node.get(format!("f:{segment}")))
        .and_then(serde_json::Value::as_object)
        .map(|fields| {
            fields
                .keys()
                .filter_map(|k| k.strip_prefix("f:"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Fields attributed to [`FIELD_MANAGER`], optionally only its `Apply` entries
fn owned_fields(entries: &[ManagedFieldsEntry], apply_only: bool) -> OwnedFields {
    let mut owned = OwnedFields::default();
    for entry in entries.iter().filter(|e| {
        e.manager.as_deref() == Some(FIELD_MANAGER)
            && (!apply_only || e.operation.as_deref() == Some("Apply"))
    }) {
        let Some(fields) = entry.fields_v1.as_ref() else {
            continue;
        };
        owned.data.extend(field_keys(&fields.0, &["data"]));
        owned.labels.extend(field_keys(&fields.0, &["metadata", "labels"]));
        owned
            .annotations
            .extend(field_keys(&fields.0, &["metadata", "annotations"]));
    }
    owned
}

fn to_target(secret: Secret) -> TargetSecret {
    let metadata = secret.metadata;
    let managed_fields = metadata.managed_fields.as_deref().unwrap_or_default();
    TargetSecret {
        name: metadata.name.unwrap_or_default(),
        namespace: metadata.namespace.unwrap_or_default(),
        type_: secret
            .type_
            .unwrap_or_else(|| crate::constants::DEFAULT_SECRET_TYPE.to_string()),
        data: secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect(),
        labels: metadata.labels.unwrap_or_default(),
        annotations: metadata.annotations.unwrap_or_default(),
        owner_references: metadata
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .map(|o| OwnerRef {
                api_version: o.api_version,
                kind: o.kind,
                name: o.name,
                uid: o.uid,
                controller: o.controller.unwrap_or(false),
            })
            .collect(),
        owned: owned_fields(managed_fields, false),
        applied: owned_fields(managed_fields, true),
        resource_version: metadata.resource_version,
    }
}

fn non_empty<V>(map: BTreeMap<String, V>) -> Option<BTreeMap<String, V>> {
    (!map.is_empty()).then_some(map)
}

fn byte_data(data: &crate::provider::SecretData) -> BTreeMap<String, ByteString> {
    data.iter()
        .map(|(k, v)| (k.clone(), ByteString(v.clone())))
        .collect()
}

fn to_secret(target: &TargetSecret) -> Secret {
    let owner_references: Vec<OwnerReference> = target
        .owner_references
        .iter()
        .map(|o| OwnerReference {
            api_version: o.api_version.clone(),
            kind: o.kind.clone(),
            name: o.name.clone(),
            uid: o.uid.clone(),
            controller: Some(o.controller),
            block_owner_deletion: Some(o.controller),
        })
        .collect();
    Secret {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            labels: non_empty(target.labels.clone()),
            annotations: non_empty(target.annotations.clone()),
            owner_references: (!owner_references.is_empty()).then_some(owner_references),
            resource_version: target.resource_version.clone(),
            ..ObjectMeta::default()
        },
        type_: Some(target.type_.clone()),
        data: Some(byte_data(&target.data)),
        ..Secret::default()
    }
}

/// Parameters for merge patches written by this controller
///
/// `force` is only valid for server-side apply, so it is never set here.
#[must_use]
pub fn merge_patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PatchParams::default()
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PostParams::default()
    }
}

#[async_trait]
impl TargetStore for KubeTargetStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<TargetSecret>, StoreError> {
        Ok(get_opt(&self.api(namespace), name).await?.map(to_target))
    }

    async fn create(&self, secret: &TargetSecret) -> Result<TargetSecret, StoreError> {
        let mut body = to_secret(secret);
        body.metadata.resource_version = None;
        self.api(&secret.namespace)
            .create(&post_params(), &body)
            .await
            .map(to_target)
            .map_err(|e| conflict_or_api("Secret", &secret.name, e))
    }

    async fn replace(&self, secret: &TargetSecret) -> Result<TargetSecret, StoreError> {
        self.api(&secret.namespace)
            .replace(&secret.name, &post_params(), &to_secret(secret))
            .await
            .map(to_target)
            .map_err(|e| conflict_or_api("Secret", &secret.name, e))
    }

    async fn apply(&self, secret: &ApplySecret) -> Result<TargetSecret, StoreError> {
        let body = Secret {
            metadata: ObjectMeta {
                name: Some(secret.name.clone()),
                namespace: Some(secret.namespace.clone()),
                labels: non_empty(secret.labels.clone()),
                annotations: non_empty(secret.annotations.clone()),
                ..ObjectMeta::default()
            },
            type_: secret.type_.clone(),
            data: non_empty(byte_data(&secret.data)),
            ..Secret::default()
        };
        self.api(&secret.namespace)
            .patch(
                &secret.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&body),
            )
            .await
            .map(to_target)
            .map_err(|e| conflict_or_api("Secret", &secret.name, e))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(StoreError::Api(e)),
        }
    }
}

/// `GeneratorState` records
#[derive(Clone)]
pub struct KubeGeneratorStateStore {
    client: Client,
}

impl std::fmt::Debug for KubeGeneratorStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeGeneratorStateStore").finish_non_exhaustive()
    }
}

impl KubeGeneratorStateStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GeneratorStateStore for KubeGeneratorStateStore {
    async fn list(
        &self,
        namespace: &str,
        owner_key: &str,
    ) -> Result<Vec<GeneratorState>, StoreError> {
        let api: Api<GeneratorState> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{LABEL_GENERATOR_OWNER_KEY}={owner_key}"));
        Ok(api.list(&params).await?.items)
    }

    async fn list_all(&self) -> Result<Vec<GeneratorState>, StoreError> {
        let api: Api<GeneratorState> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create(&self, state: &GeneratorState) -> Result<GeneratorState, StoreError> {
        let namespace = state.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<GeneratorState> = Api::namespaced(self.client.clone(), namespace);
        let name = state.metadata.name.as_deref().unwrap_or_default();
        api.create(&post_params(), state)
            .await
            .map_err(|e| conflict_or_api("GeneratorState", name, e))
    }

    async fn set_gc_deadline(
        &self,
        namespace: &str,
        name: &str,
        deadline: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        let api: Api<GeneratorState> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "spec": {"garbageCollectionDeadline": deadline.to_rfc3339()}
        });
        api.patch(name, &merge_patch_params(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let api: Api<GeneratorState> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(StoreError::Api(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::FieldsV1;

    #[test]
    fn test_owned_fields_from_managed_fields() {
        let entries = vec![
            ManagedFieldsEntry {
                manager: Some(FIELD_MANAGER.to_string()),
                operation: Some("Apply".to_string()),
                fields_v1: Some(FieldsV1(serde_json::json!({
                    "f:data": {"f:password": {}, "f:user": {}},
                    "f:metadata": {"f:labels": {"f:app": {}}}
                }))),
                ..ManagedFieldsEntry::default()
            },
            ManagedFieldsEntry {
                manager: Some(FIELD_MANAGER.to_string()),
                operation: Some("Update".to_string()),
                fields_v1: Some(FieldsV1(serde_json::json!({"f:data": {"f:legacy": {}}}))),
                ..ManagedFieldsEntry::default()
            },
            ManagedFieldsEntry {
                manager: Some("kubectl".to_string()),
                fields_v1: Some(FieldsV1(serde_json::json!({"f:data": {"f:other": {}}}))),
                ..ManagedFieldsEntry::default()
            },
        ];
        let owned = owned_fields(&entries, false);
        assert_eq!(
            owned.data,
            BTreeSet::from([
                "legacy".to_string(),
                "password".to_string(),
                "user".to_string()
            ])
        );
        assert_eq!(owned.labels, BTreeSet::from(["app".to_string()]));
        assert!(owned.annotations.is_empty());

        let applied = owned_fields(&entries, true);
        assert_eq!(
            applied.data,
            BTreeSet::from(["password".to_string(), "user".to_string()])
        );
    }

    #[test]
    fn test_target_secret_conversion() {
        let target = TargetSecret {
            name: "db".to_string(),
            namespace: "default".to_string(),
            type_: "Opaque".to_string(),
            data: BTreeMap::from([("k".to_string(), b"v".to_vec())]),
            owner_references: vec![OwnerRef {
                api_version: "secret-sync.octopilot.io/v1".to_string(),
                kind: "ExternalSecret".to_string(),
                name: "db".to_string(),
                uid: "1234".to_string(),
                controller: true,
            }],
            ..TargetSecret::default()
        };
        let back = to_target(to_secret(&target));
        assert_eq!(back.data, target.data);
        assert_eq!(back.controller().map(|o| o.uid.as_str()), Some("1234"));
        assert!(back.labels.is_empty());
    }
}
