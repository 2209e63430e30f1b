//! # Deletion Policy Tests
//!
//! What happens to the target secret when the backend stops returning data:
//! - `Delete` removes stale keys and the whole secret once nothing is left
//! - `Retain` never removes the secret
//! - `Merge` removes only the keys this controller wrote

mod common;

use common::{external_secret, later, pairs, t0, World, NAMESPACE};
use secret_sync_controller::controller::reconciler::{SyncPhase, TargetAction};
use secret_sync_controller::provider::SecretsClient;
use secret_sync_controller::store::TargetSecret;
use serde_json::json;

fn find_all(deletion_policy: &str) -> serde_json::Value {
    json!({
        "target": {"deletionPolicy": deletion_policy},
        "dataFrom": [{"find": {"name": {"regexp": ".*"}}}]
    })
}

#[tokio::test]
async fn test_removed_remote_key_is_removed_from_target() {
    let (world, client) = World::with_store(&[("foo", "1"), ("bar", "2")]);
    let mut es = external_secret("find", find_all("Delete"));
    assert!(world.pass(&mut es, t0()).await.is_success());
    assert_eq!(world.target_data(&es), pairs(&[("bar", "2"), ("foo", "1")]));

    client.delete_secret("bar").await.unwrap();
    let outcome = world.pass(&mut es, later(2)).await;

    assert_eq!(outcome.action, Some(TargetAction::Updated));
    assert!(world.target(&es).is_some());
    assert_eq!(world.target_data(&es), pairs(&[("foo", "1")]));
}

#[tokio::test]
async fn test_delete_policy_removes_secret_when_sources_are_empty() {
    let (world, client) = World::with_store(&[("foo", "1")]);
    let mut es = external_secret("gone", find_all("Delete"));
    assert!(world.pass(&mut es, t0()).await.is_success());

    client.delete_secret("foo").await.unwrap();
    let outcome = world.pass(&mut es, later(2)).await;

    assert_eq!(outcome.action, Some(TargetAction::Deleted));
    assert!(world.target(&es).is_none());
    let ready = outcome.status.ready_condition().unwrap();
    assert_eq!(ready.status, "True");
    assert_eq!(ready.reason.as_deref(), Some("SecretDeleted"));

    // A deleted target is expected to stay gone
    let next = world.pass(&mut es, later(4)).await;
    assert_eq!(next.action, Some(TargetAction::Deleted));
    assert!(world.target(&es).is_none());
}

#[tokio::test]
async fn test_retain_policy_keeps_secret_when_sources_are_empty() {
    let (world, client) = World::with_store(&[("foo", "1")]);
    let mut es = external_secret("kept", find_all("Retain"));
    assert!(world.pass(&mut es, t0()).await.is_success());
    let mutations = world.targets.mutations();

    client.delete_secret("foo").await.unwrap();
    let outcome = world.pass(&mut es, later(2)).await;

    assert_eq!(outcome.action, Some(TargetAction::Missing));
    assert_eq!(world.targets.mutations(), mutations);
    assert_eq!(world.target_data(&es), pairs(&[("foo", "1")]));
    let ready = outcome.status.ready_condition().unwrap();
    assert_eq!(ready.reason.as_deref(), Some("SecretMissing"));
}

#[tokio::test]
async fn test_merge_policy_only_removes_owned_keys() {
    let (world, client) = World::with_store(&[("foo", "1"), ("bar", "2")]);
    world.targets.put_foreign(TargetSecret {
        name: "shared".to_string(),
        namespace: NAMESPACE.to_string(),
        type_: "Opaque".to_string(),
        data: [("foreign".to_string(), b"keep".to_vec())].into(),
        ..TargetSecret::default()
    });
    let mut es = external_secret(
        "shared",
        json!({
            "target": {"creationPolicy": "Merge", "deletionPolicy": "Merge"},
            "dataFrom": [{"find": {"name": {"regexp": ".*"}}}]
        }),
    );

    let first = world.pass(&mut es, t0()).await;
    assert_eq!(first.action, Some(TargetAction::Applied));
    assert_eq!(
        world.target_data(&es),
        pairs(&[("bar", "2"), ("foo", "1"), ("foreign", "keep")])
    );

    client.delete_secret("bar").await.unwrap();
    assert!(world.pass(&mut es, later(2)).await.is_success());
    assert_eq!(world.target_data(&es), pairs(&[("foo", "1"), ("foreign", "keep")]));

    client.delete_secret("foo").await.unwrap();
    let emptied = world.pass(&mut es, later(4)).await;
    assert_eq!(emptied.action, Some(TargetAction::Pruned));
    assert_eq!(world.target_data(&es), pairs(&[("foreign", "keep")]));
}

#[tokio::test]
async fn test_merge_policy_prunes_secret_written_by_owner() {
    let (world, client) = World::with_store(&[("foo", "1"), ("bar", "2")]);
    let mut es = external_secret(
        "owned",
        json!({
            "target": {"creationPolicy": "Owner", "deletionPolicy": "Merge"},
            "dataFrom": [{"find": {"name": {"regexp": ".*"}}}]
        }),
    );
    let first = world.pass(&mut es, t0()).await;
    assert_eq!(first.action, Some(TargetAction::Created));

    client.delete_secret("foo").await.unwrap();
    client.delete_secret("bar").await.unwrap();
    let emptied = world.pass(&mut es, later(2)).await;

    assert!(emptied.is_success(), "{:?}", emptied.error);
    assert_eq!(emptied.action, Some(TargetAction::Pruned));
    let secret = world.target(&es).unwrap();
    assert!(secret.data.is_empty());
    assert!(secret.is_managed());
    assert!(secret.controller().is_some());
}

#[tokio::test]
async fn test_none_creation_policy_never_creates() {
    let (world, _) = World::with_store(&[("foo", "1")]);
    let mut es = external_secret(
        "none",
        json!({
            "target": {"creationPolicy": "None"},
            "data": [{"secretKey": "foo", "remoteRef": {"key": "foo"}}]
        }),
    );

    let outcome = world.pass(&mut es, t0()).await;

    assert_eq!(outcome.phase, SyncPhase::Failed);
    assert_eq!(outcome.failed_in, Some(SyncPhase::Committing));
    assert!(world.target(&es).is_none());
    assert_eq!(world.targets.mutations(), 0);
}

#[tokio::test]
async fn test_invalid_policy_combination_is_rejected() {
    let (world, _) = World::with_store(&[("foo", "1")]);
    let mut es = external_secret(
        "invalid",
        json!({
            "target": {"creationPolicy": "Merge", "deletionPolicy": "Delete"},
            "dataFrom": [{"find": {"name": {"regexp": ".*"}}}]
        }),
    );

    let outcome = world.pass(&mut es, t0()).await;

    assert_eq!(outcome.phase, SyncPhase::Failed);
    assert!(world.target(&es).is_none());
}
