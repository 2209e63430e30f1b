//! Common test fixtures
//!
//! Wires the sync pipeline to the in-memory stores so whole passes can run
//! without a cluster.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use chrono::{DateTime, Duration, TimeZone, Utc};
use secret_sync_controller::controller::reconciler::{sync, SyncContext, SyncOutcome};
use secret_sync_controller::crd::{
    ExternalSecret, ExternalSecretSpec, FakeProvider, FakeProviderData,
};
use secret_sync_controller::provider::fake::FakeClient;
use secret_sync_controller::provider::SecretsClient;
use secret_sync_controller::store::memory::{
    MemoryGeneratorStateStore, MemoryResourceReader, MemorySourceResolver, MemoryTargetStore,
};
use secret_sync_controller::store::{GeneratorStateStore, TargetSecret};
use std::sync::Arc;

pub const NAMESPACE: &str = "default";
pub const STORE: &str = "backend";

/// Fixed starting clock so interval triggers are deterministic
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// `t0` plus `hours`
pub fn later(hours: i64) -> DateTime<Utc> {
    t0() + Duration::hours(hours)
}

/// In-memory world one `ExternalSecret` is synced against
#[derive(Debug, Default)]
pub struct World {
    pub resolver: MemorySourceResolver,
    pub reader: MemoryResourceReader,
    pub targets: MemoryTargetStore,
    pub states: Arc<MemoryGeneratorStateStore>,
}

impl World {
    /// World with a `SecretStore` named [`STORE`] serving `pairs`
    pub fn with_store(pairs: &[(&str, &str)]) -> (Self, Arc<FakeClient>) {
        let world = Self::default();
        let client = fake_client(pairs);
        let shared: Arc<dyn SecretsClient> = Arc::<FakeClient>::clone(&client);
        world.resolver.add_store(NAMESPACE, STORE, shared);
        (world, client)
    }

    pub fn context(&self, now: DateTime<Utc>) -> SyncContext<'_> {
        SyncContext {
            resolver: &self.resolver,
            reader: &self.reader,
            targets: &self.targets,
            states: Arc::clone(&self.states) as Arc<dyn GeneratorStateStore>,
            gc_grace: Duration::minutes(5),
            deadline: None,
            now,
        }
    }

    /// Run one pass and keep the resulting status on `es`, as the
    /// reconciler does
    pub async fn pass(&self, es: &mut ExternalSecret, now: DateTime<Utc>) -> SyncOutcome {
        let outcome = sync(&self.context(now), es).await;
        es.status = Some(outcome.status.clone());
        outcome
    }

    /// The target secret of `es`
    pub fn target(&self, es: &ExternalSecret) -> Option<TargetSecret> {
        self.targets.secret(NAMESPACE, &es.target_name())
    }

    /// Target data as UTF-8 pairs, empty when the secret does not exist
    pub fn target_data(&self, es: &ExternalSecret) -> Vec<(String, String)> {
        self.target(es)
            .map(|s| {
                s.data
                    .into_iter()
                    .map(|(k, v)| (k, String::from_utf8(v).unwrap()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn fake_client(pairs: &[(&str, &str)]) -> Arc<FakeClient> {
    Arc::new(FakeClient::new(&FakeProvider {
        data: pairs
            .iter()
            .map(|(key, value)| FakeProviderData {
                key: (*key).to_string(),
                value: (*value).to_string(),
                ..FakeProviderData::default()
            })
            .collect(),
    }))
}

/// An `ExternalSecret` in [`NAMESPACE`] built from a JSON spec
///
/// `secretStoreRef` defaults to [`STORE`] when the spec leaves it out.
pub fn external_secret(name: &str, mut spec: serde_json::Value) -> ExternalSecret {
    if spec.get("secretStoreRef").is_none() {
        spec["secretStoreRef"] = serde_json::json!({"name": STORE});
    }
    let spec: ExternalSecretSpec = serde_json::from_value(spec).unwrap();
    let mut es = ExternalSecret::new(name, spec);
    es.metadata.namespace = Some(NAMESPACE.to_string());
    es.metadata.uid = Some(format!("uid-{name}"));
    es.metadata.generation = Some(1);
    es
}

pub fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
