//! # ExternalSecret Spec
//!
//! Describes which remote secrets to fetch, how to rewrite and template them,
//! and which policies govern the target secret's lifecycle.

use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Kind used in a generator reference to select a cluster-scoped generator
pub const CLUSTER_GENERATOR_KIND: &str = "ClusterGenerator";

/// ExternalSecret Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: secret-sync.octopilot.io/v1
/// kind: ExternalSecret
/// metadata:
///   name: database-credentials
///   namespace: default
/// spec:
///   refreshInterval: 1h
///   secretStoreRef:
///     name: vault
///     kind: ClusterSecretStore
///   target:
///     creationPolicy: Owner
///     deletionPolicy: Retain
///   data:
///     - secretKey: password
///       remoteRef:
///         key: prod/db
///         property: password
///   dataFrom:
///     - extract:
///         key: prod/db-config
///       rewrite:
///         - regexp:
///             source: "-"
///             target: "_"
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ExternalSecret",
    group = "secret-sync.octopilot.io",
    version = "v1",
    namespaced,
    status = "crate::crd::ExternalSecretStatus",
    shortname = "es",
    printcolumn = r#"{"name":"Store", "type":"string", "jsonPath":".spec.secretStoreRef.name"}, {"name":"Refresh Interval", "type":"string", "jsonPath":".spec.refreshInterval"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretSpec {
    /// Default store for every entry without its own `sourceRef`
    #[serde(default)]
    pub secret_store_ref: Option<SecretStoreRef>,
    /// Target secret and its lifecycle policies
    #[serde(default)]
    pub target: ExternalSecretTarget,
    /// How often the secret is re-fetched from the backends
    /// Format: Kubernetes duration string (e.g., "30s", "1h", "1h30m")
    /// "0" disables periodic refresh; spec, source and drift triggers still apply
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,
    /// When a refresh may happen at all
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
    /// Single-key lookups
    #[serde(default)]
    pub data: Vec<ExternalSecretData>,
    /// Bulk lookups, searches and generators
    #[serde(default)]
    pub data_from: Vec<ExternalSecretDataFrom>,
}

/// Default value for the refresh interval
pub fn default_refresh_interval() -> String {
    crate::constants::DEFAULT_REFRESH_INTERVAL.to_string()
}

/// Reference to a `SecretStore` or `ClusterSecretStore`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreRef {
    pub name: String,
    #[serde(default)]
    pub kind: StoreKind,
}

#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema,
)]
pub enum StoreKind {
    #[default]
    SecretStore,
    ClusterSecretStore,
}

impl StoreKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::SecretStore => "SecretStore",
            StoreKind::ClusterSecretStore => "ClusterSecretStore",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum RefreshPolicy {
    /// Refresh on interval, spec change, source change and drift
    #[default]
    Periodic,
    /// Refresh only when the owning resource or a referenced source changes
    OnChange,
    /// Sync once after creation, never again
    CreatedOnce,
}

/// Target secret description
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretTarget {
    /// Name of the target secret, defaults to the `ExternalSecret` name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub creation_policy: CreationPolicy,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    #[serde(default)]
    pub template: Option<Template>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum CreationPolicy {
    /// Create the secret and own it through an owner reference
    #[default]
    Owner,
    /// Only manage the fields this controller writes, leave others alone
    Merge,
    /// Never create or write the secret
    None,
    /// Create the secret without an owner reference
    Orphan,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum DeletionPolicy {
    /// Keep the secret when the sources return nothing
    #[default]
    Retain,
    /// Delete the secret when the sources return nothing
    Delete,
    /// Remove only the fields this controller owns
    Merge,
}

/// Single key lookup
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretData {
    /// Key in the target secret
    pub secret_key: String,
    pub remote_ref: RemoteRef,
    /// Store override for this entry
    #[serde(default)]
    pub source_ref: Option<SourceRef>,
}

/// Remote secret coordinates
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRef {
    pub key: String,
    /// Dotted path into a JSON value
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub decoding_strategy: DecodingStrategy,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum DecodingStrategy {
    #[default]
    None,
    Base64,
    #[serde(rename = "Base64URL")]
    Base64Url,
    /// Decode as base64 when possible, keep the raw value otherwise
    Auto,
}

/// Bulk lookup, search or generator reference
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretDataFrom {
    /// Fetch one remote secret and expand its JSON fields into keys
    #[serde(default)]
    pub extract: Option<RemoteRef>,
    /// Search the backend by name pattern, path or tags
    #[serde(default)]
    pub find: Option<FindRef>,
    /// Store or generator override for this entry
    #[serde(default)]
    pub source_ref: Option<SourceRef>,
    /// Rewrites applied to this entry's result before it is merged
    #[serde(default)]
    pub rewrite: Vec<Rewrite>,
}

/// Store or generator override
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(default)]
    pub store_ref: Option<SecretStoreRef>,
    #[serde(default)]
    pub generator_ref: Option<GeneratorRef>,
}

/// Reference to a generator resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorRef {
    #[serde(default = "default_generator_api_version")]
    pub api_version: String,
    /// `Password`, `UUID`, `Fake` or `ClusterGenerator`
    pub kind: String,
    pub name: String,
}

fn default_generator_api_version() -> String {
    format!("generators.{}/v1", crate::constants::API_GROUP)
}

/// Backend search
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindRef {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub name: Option<FindName>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub decoding_strategy: DecodingStrategy,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FindName {
    pub regexp: String,
}

/// A single rewrite operation
///
/// Serialized externally tagged: `{"regexp": {...}}`, `{"merge": {...}}` or
/// `{"transform": {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Rewrite {
    Regexp(RewriteRegexp),
    Merge(RewriteMerge),
    Transform(RewriteTransform),
}

impl JsonSchema for Rewrite {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("Rewrite")
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        let regexp = serde_json::to_value(RewriteRegexp::json_schema(gen))
            .unwrap_or_else(|_| serde_json::json!({}));
        let merge = serde_json::to_value(RewriteMerge::json_schema(gen))
            .unwrap_or_else(|_| serde_json::json!({}));
        let transform = serde_json::to_value(RewriteTransform::json_schema(gen))
            .unwrap_or_else(|_| serde_json::json!({}));

        schemars::json_schema!({
            "type": "object",
            "description": "Rewrite operation - exactly one of regexp, merge or transform",
            "properties": {
                "regexp": regexp,
                "merge": merge,
                "transform": transform
            },
            "oneOf": [
                {"required": ["regexp"]},
                {"required": ["merge"]},
                {"required": ["transform"]}
            ]
        })
    }
}

/// Regular expression substitution on keys
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RewriteRegexp {
    pub source: String,
    /// Replacement, supports `$1` and `${name}` capture group references
    pub target: String,
}

/// JSON merge of values
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RewriteMerge {
    #[serde(default)]
    pub strategy: MergeStrategy,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Keys whose values win conflicts, front of the list first
    #[serde(default)]
    pub priority: Vec<String>,
    #[serde(default)]
    pub priority_policy: PriorityPolicy,
    /// Output key for the `JSON` strategy
    #[serde(default)]
    pub into: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum MergeStrategy {
    /// Promote the fields of every JSON value to top-level keys
    #[default]
    Extract,
    /// Merge all values into a single JSON object stored under `into`
    #[serde(rename = "JSON")]
    Json,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum ConflictPolicy {
    #[default]
    Error,
    Ignore,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum PriorityPolicy {
    #[default]
    Strict,
    IgnoreNotFound,
}

/// Per-value template
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RewriteTransform {
    /// Rendered with `value` bound to the current value
    pub template: String,
}

/// Target secret template
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub engine_version: EngineVersion,
    /// Secret type, defaults to `Opaque`
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub merge_policy: MergePolicy,
    #[serde(default)]
    pub metadata: Option<TemplateMetadata>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub template_from: Vec<TemplateFrom>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngineVersion {
    V1,
    #[default]
    V2,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum MergePolicy {
    #[default]
    Replace,
    Merge,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// External template source
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFrom {
    #[serde(default)]
    pub config_map: Option<TemplateRef>,
    #[serde(default)]
    pub secret: Option<TemplateRef>,
    #[serde(default)]
    pub literal: Option<String>,
    #[serde(default)]
    pub target: TemplateTarget,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRef {
    pub name: String,
    #[serde(default)]
    pub items: Vec<TemplateRefItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRefItem {
    pub key: String,
    #[serde(default)]
    pub template_as: TemplateScope,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum TemplateScope {
    /// The referenced value is the expression, the item key is the output key
    #[default]
    Values,
    /// Both the referenced key and value are expressions
    KeysAndValues,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum TemplateTarget {
    #[default]
    Data,
    Labels,
    Annotations,
}

impl ExternalSecret {
    /// Name of the target secret
    #[must_use]
    pub fn target_name(&self) -> String {
        self.spec
            .target
            .name
            .clone()
            .or_else(|| self.metadata.name.clone())
            .unwrap_or_default()
    }

    /// Whether any `dataFrom` entry references a generator
    #[must_use]
    pub fn uses_generators(&self) -> bool {
        self.spec.data_from.iter().any(|entry| {
            entry
                .source_ref
                .as_ref()
                .is_some_and(|s| s.generator_ref.is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec: ExternalSecretSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.refresh_interval, "1h");
        assert_eq!(spec.target.creation_policy, CreationPolicy::Owner);
        assert_eq!(spec.target.deletion_policy, DeletionPolicy::Retain);
        assert_eq!(spec.refresh_policy, RefreshPolicy::Periodic);
    }

    #[test]
    fn test_rewrite_deserializes_externally_tagged() {
        let rewrites: Vec<Rewrite> = serde_json::from_value(serde_json::json!([
            {"regexp": {"source": "-", "target": "_"}},
            {"merge": {"strategy": "JSON", "into": "all", "conflictPolicy": "Ignore"}},
            {"transform": {"template": "{{upper value}}"}}
        ]))
        .unwrap();

        assert!(matches!(&rewrites[0], Rewrite::Regexp(r) if r.source == "-"));
        match &rewrites[1] {
            Rewrite::Merge(m) => {
                assert_eq!(m.strategy, MergeStrategy::Json);
                assert_eq!(m.conflict_policy, ConflictPolicy::Ignore);
                assert_eq!(m.priority_policy, PriorityPolicy::Strict);
                assert_eq!(m.into.as_deref(), Some("all"));
            }
            other => panic!("expected merge, got {other:?}"),
        }
        assert!(matches!(&rewrites[2], Rewrite::Transform(_)));
    }

    #[test]
    fn test_decoding_strategy_names() {
        let strategy: DecodingStrategy = serde_json::from_value(serde_json::json!("Base64URL")).unwrap();
        assert_eq!(strategy, DecodingStrategy::Base64Url);
    }

    #[test]
    fn test_template_engine_version_lowercase() {
        let template: Template =
            serde_json::from_value(serde_json::json!({"engineVersion": "v1"})).unwrap();
        assert_eq!(template.engine_version, EngineVersion::V1);
        assert_eq!(template.merge_policy, MergePolicy::Replace);
    }
}
