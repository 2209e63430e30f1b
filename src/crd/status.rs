//! # Status Types
//!
//! Status types for tracking reconciliation state and conditions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of the `ExternalSecret` resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretStatus {
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Time of the last successful sync (RFC3339)
    #[serde(default)]
    pub refresh_time: Option<String>,
    /// Fingerprint of generation, spec, labels and annotations at the last successful sync
    #[serde(default)]
    pub synced_resource_version: Option<String>,
    /// Reference to the target secret
    #[serde(default)]
    pub binding: Option<SecretBinding>,
    /// Per-store readiness and key lookup results from the last pass
    #[serde(default)]
    pub sources: Vec<SourceStatus>,
    /// Resource versions of the config maps and secrets read by the template
    /// Keyed by `Kind/name`
    #[serde(default)]
    pub source_versions: BTreeMap<String, String>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl ExternalSecretStatus {
    /// The Ready condition, if any
    #[must_use]
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.r#type == crate::constants::CONDITION_READY)
    }
}

/// Target secret binding
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretBinding {
    pub name: String,
}

/// Readiness and key lookup results for one referenced store
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    /// `SecretStore`, `ClusterSecretStore` or a generator kind
    pub kind: String,
    pub name: String,
    /// The store resolved and reported ready
    pub ready: bool,
    /// Every explicitly named key was found
    pub exists: bool,
    #[serde(default)]
    pub keys_found: Vec<String>,
    #[serde(default)]
    pub keys_missing: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Status of a `SecretStore` or `ClusterSecretStore`
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl SecretStoreStatus {
    /// Whether the store reports `Ready=False`
    ///
    /// A store without a Ready condition has not been validated yet and is
    /// treated as usable.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.r#type == crate::constants::CONDITION_READY && c.status == "False")
    }
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}
