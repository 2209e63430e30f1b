//! # Store Configuration
//!
//! `SecretStore` and `ClusterSecretStore` resources and the backend provider
//! configuration they carry.

use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Namespaced secret store
///
/// # Example
///
/// ```yaml
/// apiVersion: secret-sync.octopilot.io/v1
/// kind: SecretStore
/// metadata:
///   name: backend
///   namespace: default
/// spec:
///   provider:
///     webhook:
///       url: "https://vault.internal/v1/{{ remoteRef.key }}"
///       result:
///         jsonPath: data
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "SecretStore",
    group = "secret-sync.octopilot.io",
    version = "v1",
    namespaced,
    status = "crate::crd::SecretStoreStatus",
    shortname = "ss",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreSpec {
    pub provider: StoreProvider,
    /// Namespace restrictions, only honoured on `ClusterSecretStore`
    #[serde(default)]
    pub conditions: Vec<ClusterStoreCondition>,
}

/// Cluster-scoped secret store
///
/// Shares its spec with [`SecretStore`]. `conditions` restrict which
/// namespaces may reference it.
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ClusterSecretStore",
    group = "secret-sync.octopilot.io",
    version = "v1",
    status = "crate::crd::SecretStoreStatus",
    shortname = "css"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSecretStoreSpec {
    pub provider: StoreProvider,
    #[serde(default)]
    pub conditions: Vec<ClusterStoreCondition>,
}

impl From<ClusterSecretStoreSpec> for SecretStoreSpec {
    fn from(spec: ClusterSecretStoreSpec) -> Self {
        Self {
            provider: spec.provider,
            conditions: spec.conditions,
        }
    }
}

/// Namespace selector for a `ClusterSecretStore`
///
/// A namespace is allowed when it is listed in `namespaces` or matches one of
/// `namespaceRegexes`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStoreCondition {
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub namespace_regexes: Vec<String>,
}

impl ClusterStoreCondition {
    /// Whether `namespace` satisfies this condition
    ///
    /// Invalid regexes never match.
    #[must_use]
    pub fn matches(&self, namespace: &str) -> bool {
        self.namespaces.iter().any(|n| n == namespace)
            || self.namespace_regexes.iter().any(|pattern| {
                regex::Regex::new(pattern).is_ok_and(|re| re.is_match(namespace))
            })
    }
}

/// Backend provider configuration
///
/// Kubernetes sends data in format: {"webhook": {...}}
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreProvider {
    /// Static in-resource data, used for testing and bootstrapping
    Fake(FakeProvider),
    /// HTTP endpoint returning JSON
    Webhook(WebhookProvider),
}

impl Default for StoreProvider {
    fn default() -> Self {
        StoreProvider::Fake(FakeProvider::default())
    }
}

impl StoreProvider {
    /// Provider name used in logs and metrics
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StoreProvider::Fake(_) => "fake",
            StoreProvider::Webhook(_) => "webhook",
        }
    }
}

impl JsonSchema for StoreProvider {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("StoreProvider")
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        let fake_json = serde_json::to_value(FakeProvider::json_schema(gen))
            .unwrap_or_else(|_| serde_json::json!({}));
        let webhook_json = serde_json::to_value(WebhookProvider::json_schema(gen))
            .unwrap_or_else(|_| serde_json::json!({}));

        let schema_value = serde_json::json!({
            "type": "object",
            "description": "Secret backend configuration - exactly one of fake or webhook",
            "properties": {
                "fake": fake_json,
                "webhook": webhook_json
            },
            "oneOf": [
                {"required": ["fake"]},
                {"required": ["webhook"]}
            ]
        });
        Schema::try_from(schema_value).expect("Failed to create Schema for StoreProvider")
    }
}

/// Static provider data
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FakeProvider {
    #[serde(default)]
    pub data: Vec<FakeProviderData>,
}

/// One static remote secret
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FakeProviderData {
    pub key: String,
    /// Raw value, usually a JSON document or plain string
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Structured value, serialized as a JSON object when set
    #[serde(default)]
    pub value_map: Option<BTreeMap<String, String>>,
}

/// HTTP provider
///
/// `url` and `body` are templates rendered with `remoteRef.key`,
/// `remoteRef.property` and `remoteRef.version` bound.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookProvider {
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub result: WebhookResult,
    /// Request timeout
    /// Format: Kubernetes duration string (e.g., "10s")
    #[serde(default)]
    pub timeout: Option<String>,
}

fn default_webhook_method() -> String {
    "GET".to_string()
}

/// Where to find the secret in the webhook response
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResult {
    /// Dotted path into the JSON response, the whole body when unset
    #[serde(default)]
    pub json_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_deserializes_webhook() {
        let spec: SecretStoreSpec = serde_json::from_value(serde_json::json!({
            "provider": {"webhook": {"url": "http://backend/{{ remoteRef.key }}"}}
        }))
        .unwrap();
        match spec.provider {
            StoreProvider::Webhook(w) => {
                assert_eq!(w.method, "GET");
                assert!(w.result.json_path.is_none());
            }
            StoreProvider::Fake(_) => panic!("expected webhook provider"),
        }
    }

    #[test]
    fn test_cluster_condition_matches() {
        let condition = ClusterStoreCondition {
            namespaces: vec!["team-a".to_string()],
            namespace_regexes: vec!["^prod-.*$".to_string(), "([".to_string()],
        };
        assert!(condition.matches("team-a"));
        assert!(condition.matches("prod-payments"));
        assert!(!condition.matches("staging"));
    }

    #[test]
    fn test_provider_schema_requires_one_variant() {
        let mut gen = SchemaGenerator::default();
        let schema = serde_json::to_value(StoreProvider::json_schema(&mut gen)).unwrap();
        assert_eq!(schema["oneOf"].as_array().map(Vec::len), Some(2));
    }
}
