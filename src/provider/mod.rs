//! # Providers
//!
//! Backend capability used by the sync engine to read remote secrets.
//!
//! Every backend implements [`SecretsClient`]. [`new_client`] maps the
//! provider configured on a store to its implementation:
//!
//! - `fake` - static data from the store spec
//! - `webhook` - JSON over HTTP

use crate::config::ControllerConfig;
use crate::crd::{FindRef, RemoteRef, StoreProvider};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub mod fake;
pub mod property;
pub mod webhook;

/// Secret data as stored in a Kubernetes secret: key to raw bytes
pub type SecretData = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("secret does not exist")]
    NotFound,
    #[error("{provider} request failed: {message}")]
    Backend {
        provider: &'static str,
        message: String,
    },
    #[error("property {property} not found")]
    PropertyNotFound { property: String },
    #[error("value is not a JSON object: {0}")]
    NotAnObject(String),
    #[error("{operation} is not supported by the {provider} provider")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },
    #[error("invalid provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound)
    }
}

/// Result of validating a store's backend connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Ready,
    /// The backend cannot be checked without a concrete secret reference
    Unknown,
    Error(String),
}

/// Read and write-back capability of a secret backend
#[async_trait]
pub trait SecretsClient: Send + Sync {
    /// Provider name used in logs and metrics
    fn provider(&self) -> &'static str;

    /// Fetch one secret value, narrowed to `remote.property` when set
    async fn get_secret(&self, remote: &RemoteRef) -> Result<Vec<u8>, ProviderError>;

    /// Fetch one secret and expand its JSON object into keys
    ///
    /// String fields are returned raw, every other field as JSON text.
    async fn get_secret_map(&self, remote: &RemoteRef) -> Result<SecretData, ProviderError> {
        let raw = self.get_secret(remote).await?;
        property::expand_json_object(&raw)
    }

    /// Search the backend
    async fn get_all_secrets(&self, find: &FindRef) -> Result<SecretData, ProviderError>;

    async fn push_secret(&self, key: &str, value: &[u8]) -> Result<(), ProviderError>;

    async fn delete_secret(&self, key: &str) -> Result<(), ProviderError>;

    async fn secret_exists(&self, key: &str) -> Result<bool, ProviderError> {
        let remote = RemoteRef {
            key: key.to_string(),
            ..RemoteRef::default()
        };
        match self.get_secret(&remote).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn validate(&self) -> ValidationResult;
}

/// Build the client for a store's provider configuration
pub fn new_client(
    provider: &StoreProvider,
    config: &ControllerConfig,
) -> Result<Arc<dyn SecretsClient>, ProviderError> {
    match provider {
        StoreProvider::Fake(spec) => Ok(Arc::new(fake::FakeClient::new(spec))),
        StoreProvider::Webhook(spec) => Ok(Arc::new(webhook::WebhookClient::new(
            spec,
            config.webhook_timeout(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{FakeProvider, FakeProviderData, WebhookProvider};

    #[test]
    fn test_new_client_dispatches_on_provider() {
        let config = ControllerConfig::default();
        let fake = StoreProvider::Fake(FakeProvider {
            data: vec![FakeProviderData {
                key: "k".to_string(),
                value: "v".to_string(),
                ..FakeProviderData::default()
            }],
        });
        assert!(new_client(&fake, &config).is_ok());

        let webhook = StoreProvider::Webhook(WebhookProvider {
            url: "http://backend/{{ remoteRef.key }}".to_string(),
            method: "GET".to_string(),
            ..WebhookProvider::default()
        });
        assert!(new_client(&webhook, &config).is_ok());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ProviderError::NotFound.is_not_found());
        assert!(!ProviderError::Config("x".to_string()).is_not_found());
    }
}
