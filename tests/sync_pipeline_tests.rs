//! # Sync Pipeline Tests
//!
//! Whole sync passes against in-memory stores:
//! - Aggregation, rewrite and template precedence
//! - Hash-based skip on repeated passes
//! - Drift repair and failure reporting

mod common;

use common::{external_secret, later, pairs, t0, World, NAMESPACE, STORE};
use secret_sync_controller::controller::reconciler::{SyncPhase, TargetAction, TriggerCause};
use secret_sync_controller::provider::SecretsClient;
use serde_json::json;

#[tokio::test]
async fn test_single_key_rendered_through_template() {
    let (world, _) = World::with_store(&[("foo", "bar")]);
    let mut es = external_secret(
        "tpl",
        json!({
            "data": [{"secretKey": "singlefoo", "remoteRef": {"key": "foo"}}],
            "target": {"template": {"data": {"tplv2": "executed: {{ .singlefoo }}"}}}
        }),
    );

    let outcome = world.pass(&mut es, t0()).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.phase, SyncPhase::Done);
    assert_eq!(outcome.action, Some(TargetAction::Created));
    assert_eq!(outcome.trigger, Some(TriggerCause::Initial));
    assert_eq!(world.target_data(&es), pairs(&[("tplv2", "executed: bar")]));

    let ready = outcome.status.ready_condition().unwrap();
    assert_eq!(ready.status, "True");
    assert_eq!(ready.reason.as_deref(), Some("SecretSynced"));
    assert_eq!(outcome.status.binding.as_ref().map(|b| b.name.as_str()), Some("tpl"));
}

#[tokio::test]
async fn test_template_merge_policy_precedence() {
    let spec = |merge_policy: &str| {
        json!({
            "dataFrom": [{"extract": {"key": "raw"}}],
            "target": {"template": {
                "mergePolicy": merge_policy,
                "data": {"k": "{{ .k }}-t"}
            }}
        })
    };
    let (world, _) = World::with_store(&[("raw", r#"{"k":"v","j":"w"}"#)]);

    let mut merged = external_secret("merged", spec("Merge"));
    let mut replaced = external_secret("replaced", spec("Replace"));
    assert!(world.pass(&mut merged, t0()).await.is_success());
    assert!(world.pass(&mut replaced, t0()).await.is_success());

    assert_eq!(world.target_data(&merged), pairs(&[("j", "w"), ("k", "v-t")]));
    assert_eq!(world.target_data(&replaced), pairs(&[("k", "v-t")]));
}

#[tokio::test]
async fn test_second_pass_without_changes_writes_nothing() {
    let (world, _) = World::with_store(&[("db", r#"{"user":"app","password":"s3cret"}"#)]);
    let mut es = external_secret(
        "db",
        json!({"refreshInterval": "1h", "dataFrom": [{"extract": {"key": "db"}}]}),
    );

    assert_eq!(world.pass(&mut es, t0()).await.action, Some(TargetAction::Created));
    assert_eq!(world.targets.mutations(), 1);

    // Inside the interval nothing triggers a pass at all
    let idle = world.pass(&mut es, t0() + chrono::Duration::minutes(10)).await;
    assert!(idle.trigger.is_none());
    assert!(idle.action.is_none());

    // Interval elapsed: the pass runs but the hash matches
    let refreshed = world.pass(&mut es, later(2)).await;
    assert!(matches!(refreshed.trigger, Some(TriggerCause::IntervalElapsed { .. })));
    assert_eq!(refreshed.action, Some(TargetAction::Unchanged));
    assert_eq!(world.targets.mutations(), 1);
}

#[tokio::test]
async fn test_out_of_band_change_is_repaired() {
    let (world, _) = World::with_store(&[("foo", "bar")]);
    let mut es = external_secret(
        "drift",
        json!({"data": [{"secretKey": "foo", "remoteRef": {"key": "foo"}}]}),
    );
    assert!(world.pass(&mut es, t0()).await.is_success());

    world.targets.tamper(NAMESPACE, "drift", "foo", b"tampered");
    let outcome = world.pass(&mut es, t0() + chrono::Duration::minutes(1)).await;

    assert_eq!(outcome.trigger, Some(TriggerCause::TargetDrifted));
    assert_eq!(outcome.action, Some(TargetAction::Updated));
    assert_eq!(world.target_data(&es), pairs(&[("foo", "bar")]));
}

#[tokio::test]
async fn test_deleted_target_is_recreated() {
    let (world, _) = World::with_store(&[("foo", "bar")]);
    let mut es = external_secret(
        "recreate",
        json!({"data": [{"secretKey": "foo", "remoteRef": {"key": "foo"}}]}),
    );
    assert!(world.pass(&mut es, t0()).await.is_success());

    secret_sync_controller::store::TargetStore::delete(&world.targets, NAMESPACE, "recreate")
        .await
        .unwrap();
    let outcome = world.pass(&mut es, t0() + chrono::Duration::minutes(1)).await;

    assert_eq!(outcome.trigger, Some(TriggerCause::TargetMissing));
    assert_eq!(outcome.action, Some(TargetAction::Created));
}

#[tokio::test]
async fn test_regexp_rewrite_on_find() {
    let (world, _) = World::with_store(&[("foo-bar", "v"), ("other", "x")]);
    let mut es = external_secret(
        "rewrite",
        json!({
            "dataFrom": [{
                "find": {"name": {"regexp": "^foo"}},
                "rewrite": [
                    {"regexp": {"source": "-", "target": "_"}},
                    {"regexp": {"source": "-", "target": "_"}}
                ]
            }]
        }),
    );

    assert!(world.pass(&mut es, t0()).await.is_success());
    assert_eq!(world.target_data(&es), pairs(&[("foo_bar", "v")]));
}

#[tokio::test]
async fn test_merge_rewrite_conflicts() {
    let store = [("a", r#"{"x":"1"}"#), ("b", r#"{"x":"2"}"#)];
    let (world, _) = World::with_store(&store);

    let mut strict = external_secret(
        "strict",
        json!({"dataFrom": [{
            "find": {"name": {"regexp": ".*"}},
            "rewrite": [{"merge": {"conflictPolicy": "Error"}}]
        }]}),
    );
    let failed = world.pass(&mut strict, t0()).await;
    assert_eq!(failed.phase, SyncPhase::Failed);
    assert_eq!(failed.failed_in, Some(SyncPhase::Aggregating));
    assert!(world.target(&strict).is_none());

    let mut prioritized = external_secret(
        "prioritized",
        json!({"dataFrom": [{
            "find": {"name": {"regexp": ".*"}},
            "rewrite": [{"merge": {"conflictPolicy": "Ignore", "priority": ["b"]}}]
        }]}),
    );
    assert!(world.pass(&mut prioritized, t0()).await.is_success());
    assert_eq!(world.target_data(&prioritized), pairs(&[("x", "2")]));
}

#[tokio::test]
async fn test_source_error_aborts_before_write() {
    let (world, _) = World::with_store(&[("present", "1")]);
    let mut es = external_secret(
        "broken",
        json!({"data": [
            {"secretKey": "present", "remoteRef": {"key": "present"}},
            {"secretKey": "absent", "remoteRef": {"key": "absent"}}
        ]}),
    );

    let outcome = world.pass(&mut es, t0()).await;

    assert_eq!(outcome.phase, SyncPhase::Failed);
    assert!(world.target(&es).is_none());
    assert_eq!(world.targets.mutations(), 0);
    let ready = outcome.status.ready_condition().unwrap();
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason.as_deref(), Some("SecretSyncedError"));
    let message = ready.message.as_deref().unwrap_or_default();
    assert!(message.contains("spec.data[1]"), "{message}");
    assert!(message.contains("absent"), "{message}");
}

#[tokio::test]
async fn test_failure_after_sync_keeps_target_and_retries() {
    let (world, client) = World::with_store(&[("foo", "bar")]);
    let mut es = external_secret(
        "retry",
        json!({"data": [{"secretKey": "foo", "remoteRef": {"key": "foo"}}]}),
    );
    assert!(world.pass(&mut es, t0()).await.is_success());

    client.delete_secret("foo").await.unwrap();
    let failed = world.pass(&mut es, later(2)).await;
    assert_eq!(failed.phase, SyncPhase::Failed);
    assert_eq!(world.target_data(&es), pairs(&[("foo", "bar")]));

    let retry = world.pass(&mut es, later(2) + chrono::Duration::seconds(30)).await;
    assert_eq!(retry.trigger, Some(TriggerCause::RetryAfterFailure));
    assert_eq!(retry.phase, SyncPhase::Failed);
}

#[tokio::test]
async fn test_template_error_fails_in_transforming() {
    let (world, _) = World::with_store(&[("foo", "bar")]);
    let mut es = external_secret(
        "bad-template",
        json!({
            "data": [{"secretKey": "foo", "remoteRef": {"key": "foo"}}],
            "target": {"template": {"data": {"out": "{{ .undefined }}"}}}
        }),
    );

    let outcome = world.pass(&mut es, t0()).await;

    assert_eq!(outcome.failed_in, Some(SyncPhase::Transforming));
    assert!(world.target(&es).is_none());
}

#[tokio::test]
async fn test_rendered_keys_are_validated() {
    let (world, _) = World::with_store(&[("foo", "bar")]);
    let literal = external_secret(
        "bad-literal",
        json!({
            "data": [{"secretKey": "foo", "remoteRef": {"key": "foo"}}],
            "target": {"template": {"templateFrom": [
                {"literal": "bad key/with slash: \"{{ .foo }}\""}
            ]}}
        }),
    );
    let data = external_secret(
        "bad-data",
        json!({
            "data": [{"secretKey": "foo", "remoteRef": {"key": "foo"}}],
            "target": {"template": {"data": {"no spaces": "{{ .foo }}"}}}
        }),
    );

    for mut es in [literal, data] {
        let outcome = world.pass(&mut es, t0()).await;

        assert_eq!(outcome.failed_in, Some(SyncPhase::Transforming));
        assert!(world.target(&es).is_none());
        let ready = outcome.status.ready_condition().unwrap();
        assert_eq!(ready.reason.as_deref(), Some("SecretSyncedError"));
        assert!(ready.message.as_deref().unwrap_or_default().contains("invalid keys"));
    }
    assert_eq!(world.targets.mutations(), 0);
}

#[tokio::test]
async fn test_per_source_status_reports_missing_keys() {
    let (world, _) = World::with_store(&[("present", "1")]);
    let mut es = external_secret(
        "partial",
        json!({
            "target": {"deletionPolicy": "Delete"},
            "data": [
                {"secretKey": "present", "remoteRef": {"key": "present"}},
                {"secretKey": "absent", "remoteRef": {"key": "absent"}}
            ]
        }),
    );

    let outcome = world.pass(&mut es, t0()).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(world.target_data(&es), pairs(&[("present", "1")]));
    let source = outcome
        .status
        .sources
        .iter()
        .find(|s| s.name == STORE)
        .unwrap();
    assert!(source.ready);
    assert!(!source.exists);
    assert_eq!(source.keys_found, vec!["present".to_string()]);
    assert_eq!(source.keys_missing, vec!["absent".to_string()]);
}

#[tokio::test]
async fn test_config_map_change_triggers_pass() {
    let (world, _) = World::with_store(&[("foo", "bar")]);
    world.reader.put_config_map(
        NAMESPACE,
        "tpl",
        [("greeting".to_string(), "hello {{ .foo }}".to_string())].into(),
        "1",
    );
    let mut es = external_secret(
        "from-cm",
        json!({
            "data": [{"secretKey": "foo", "remoteRef": {"key": "foo"}}],
            "target": {"template": {"templateFrom": [{"configMap": {"name": "tpl"}}]}}
        }),
    );
    assert!(world.pass(&mut es, t0()).await.is_success());
    assert_eq!(world.target_data(&es), pairs(&[("greeting", "hello bar")]));

    world.reader.put_config_map(
        NAMESPACE,
        "tpl",
        [("greeting".to_string(), "hi {{ .foo }}".to_string())].into(),
        "2",
    );
    let outcome = world.pass(&mut es, t0() + chrono::Duration::minutes(1)).await;

    assert!(matches!(outcome.trigger, Some(TriggerCause::SourceChanged { .. })));
    assert_eq!(world.target_data(&es), pairs(&[("greeting", "hi bar")]));
}
