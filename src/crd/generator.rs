//! # Generator Resources
//!
//! Generator configuration resources (`Password`, `UUID`, `Fake`,
//! `ClusterGenerator`) and the durable `GeneratorState` records kept for
//! stateful generators.

use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Random password generator
///
/// # Example
///
/// ```yaml
/// apiVersion: generators.secret-sync.octopilot.io/v1
/// kind: Password
/// metadata:
///   name: db-password
/// spec:
///   length: 32
///   digits: 6
///   symbols: 4
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Password",
    group = "generators.secret-sync.octopilot.io",
    version = "v1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PasswordSpec {
    #[serde(default = "default_password_length")]
    pub length: usize,
    /// Number of digits, defaults to a quarter of the length
    #[serde(default)]
    pub digits: Option<usize>,
    /// Number of symbols, defaults to a quarter of the length
    #[serde(default)]
    pub symbols: Option<usize>,
    /// Symbol alphabet
    #[serde(default)]
    pub symbol_characters: Option<String>,
    #[serde(default)]
    pub no_upper: bool,
    #[serde(default)]
    pub allow_repeat: bool,
    /// Key of the generated value in the output map
    #[serde(default)]
    pub secret_key: Option<String>,
}

fn default_password_length() -> usize {
    24
}

impl Default for PasswordSpec {
    fn default() -> Self {
        Self {
            length: default_password_length(),
            digits: None,
            symbols: None,
            symbol_characters: None,
            no_upper: false,
            allow_repeat: false,
            secret_key: None,
        }
    }
}

/// Random UUID v4 generator
#[derive(
    kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema,
)]
#[kube(
    kind = "UUID",
    root = "Uuid",
    plural = "uuids",
    group = "generators.secret-sync.octopilot.io",
    version = "v1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct UuidSpec {
    /// Key of the generated value in the output map, defaults to `uuid`
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Static generator
///
/// Returns `data` as-is. When `state` is set the generator is stateful: the
/// state blob is recorded in a `GeneratorState` and handed back on cleanup.
#[derive(
    kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema,
)]
#[kube(
    kind = "Fake",
    group = "generators.secret-sync.octopilot.io",
    version = "v1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct FakeSpec {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub state: Option<serde_json::Value>,
    /// Makes cleanup fail, used to exercise rollback paths
    #[serde(default)]
    pub fail_cleanup: bool,
}

/// Cluster-scoped wrapper around any generator spec
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ClusterGenerator",
    group = "generators.secret-sync.octopilot.io",
    version = "v1"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGeneratorSpec {
    /// `Password`, `UUID` or `Fake`
    pub kind: String,
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub generator: serde_json::Value,
}

/// Durable record of a stateful generator run
///
/// Labelled with the owner key so every record of one `dataFrom` entry can be
/// listed together. The record without a deadline and with the newest
/// creation timestamp is the latest state.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "GeneratorState",
    group = "generators.secret-sync.octopilot.io",
    version = "v1",
    namespaced,
    shortname = "gs",
    printcolumn = r#"{"name":"GC Deadline", "type":"string", "jsonPath":".spec.garbageCollectionDeadline"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorStateSpec {
    /// RFC3339 time after which the record may be collected, unset while active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub garbage_collection_deadline: Option<String>,
    /// Snapshot of the generator resource that produced the state
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub resource: serde_json::Value,
    /// Opaque generator state
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub state: serde_json::Value,
}

fn preserve_unknown_fields(_gen: &mut SchemaGenerator) -> Schema {
    let schema_value = serde_json::json!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    });
    Schema::try_from(schema_value).expect("Failed to create preserve-unknown-fields Schema")
}

impl GeneratorState {
    /// Parsed GC deadline; unparseable deadlines count as unset
    #[must_use]
    pub fn gc_deadline(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.spec
            .garbage_collection_deadline
            .as_deref()
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&chrono::Utc))
    }

    /// Creation timestamp, `None` for records not yet persisted
    #[must_use]
    pub fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let raw = serde_json::to_value(self.metadata.creation_timestamp.as_ref()?).ok()?;
        chrono::DateTime::parse_from_rfc3339(raw.as_str()?)
            .ok()
            .map(|d| d.with_timezone(&chrono::Utc))
    }

    /// Whether the record has been flagged for garbage collection
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.spec.garbage_collection_deadline.is_some()
    }
}
