//! # Generators
//!
//! Produce secret data algorithmically instead of reading it from a backend.
//!
//! Every generator implements [`Generator`]. [`for_kind`] maps a generator
//! resource kind to its implementation:
//!
//! - `Password` - random password
//! - `UUID` - random v4 UUID
//! - `Fake` - static data, optionally stateful
//!
//! Stateful generators return an opaque state blob. The
//! [`statemanager`] persists it as a `GeneratorState` record and [`gc`]
//! hands it back to [`Generator::cleanup`] once the record expires.

use crate::provider::SecretData;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub mod fake;
pub mod gc;
pub mod password;
pub mod statemanager;
pub mod uuid;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("invalid {kind} spec: {source}")]
    InvalidSpec {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("generation failed: {0}")]
    Generate(String),
    #[error("cleanup failed: {0}")]
    Cleanup(String),
}

/// Data returned by one generator run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratorOutput {
    pub data: SecretData,
    /// Opaque state, only set by stateful generators
    pub state: Option<serde_json::Value>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, spec: &serde_json::Value) -> Result<GeneratorOutput, GeneratorError>;

    /// Undo the side effects of a run that produced `state`
    async fn cleanup(
        &self,
        spec: &serde_json::Value,
        state: &serde_json::Value,
    ) -> Result<(), GeneratorError>;
}

/// Implementation for a generator resource kind
#[must_use]
pub fn for_kind(kind: &str) -> Option<Arc<dyn Generator>> {
    match kind {
        "Password" => Some(Arc::new(password::PasswordGenerator)),
        "UUID" => Some(Arc::new(uuid::UuidGenerator)),
        "Fake" => Some(Arc::new(fake::FakeGenerator)),
        _ => None,
    }
}

/// Deserialize a generator spec, mapping failures to [`GeneratorError::InvalidSpec`]
pub(crate) fn parse_spec<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    spec: &serde_json::Value,
) -> Result<T, GeneratorError> {
    serde_json::from_value(spec.clone()).map_err(|source| GeneratorError::InvalidSpec { kind, source })
}
