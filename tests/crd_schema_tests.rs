//! # CRD Schema Tests
//!
//! The generated CustomResourceDefinitions are what gets installed in the
//! cluster; these checks catch schema regressions before they ship.

use kube::CustomResourceExt;
use secret_sync_controller::crd::{
    ClusterGenerator, ClusterSecretStore, ExternalSecret, GeneratorState, Password, SecretStore,
};

fn schema_of<K: CustomResourceExt>() -> serde_json::Value {
    let crd = serde_json::to_value(K::crd()).unwrap();
    crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"].clone()
}

#[test]
fn test_external_secret_crd_is_namespaced_with_status() {
    let crd = ExternalSecret::crd();
    assert_eq!(crd.spec.group, "secret-sync.octopilot.io");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.short_names, Some(vec!["es".to_string()]));
    let version = &crd.spec.versions[0];
    assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
}

#[test]
fn test_external_secret_schema_exposes_policies() {
    let schema = schema_of::<ExternalSecret>();
    let target = &schema["properties"]["spec"]["properties"]["target"]["properties"];
    assert!(target.get("creationPolicy").is_some());
    assert!(target.get("deletionPolicy").is_some());
    assert!(target.get("template").is_some());
}

#[test]
fn test_store_provider_lists_backends() {
    let schema = schema_of::<SecretStore>();
    let provider = &schema["properties"]["spec"]["properties"]["provider"];
    assert!(provider["properties"].get("fake").is_some());
    assert!(provider["properties"].get("webhook").is_some());
    assert_eq!(ClusterSecretStore::crd().spec.scope, "Cluster");
}

#[test]
fn test_generator_crds_use_generator_group() {
    for group in [
        Password::crd().spec.group,
        ClusterGenerator::crd().spec.group,
        GeneratorState::crd().spec.group,
    ] {
        assert_eq!(group, "generators.secret-sync.octopilot.io");
    }
    assert_eq!(ClusterGenerator::crd().spec.scope, "Cluster");
}
