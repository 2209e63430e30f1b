//! # Webhook Provider
//!
//! Fetches secrets from an HTTP endpoint returning JSON. The request URL and
//! body are templates with `remoteRef.key`, `remoteRef.property` and
//! `remoteRef.version` bound.

use super::{property, ProviderError, SecretData, SecretsClient, ValidationResult};
use crate::crd::{EngineVersion, FindRef, RemoteRef, WebhookProvider};
use crate::template::{HandlebarsRenderer, Renderer};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "webhook";

/// Client for a `webhook` provider
#[derive(Debug)]
pub struct WebhookClient {
    spec: WebhookProvider,
    method: Method,
    http: reqwest::Client,
    renderer: HandlebarsRenderer,
}

impl WebhookClient {
    /// Build a client, `default_timeout` applies unless the store sets its own
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] for an unknown HTTP method, an
    /// invalid timeout or when the HTTP client cannot be built.
    pub fn new(spec: &WebhookProvider, default_timeout: Duration) -> Result<Self, ProviderError> {
        let method = Method::from_bytes(spec.method.to_uppercase().as_bytes())
            .map_err(|e| ProviderError::Config(format!("invalid method {}: {e}", spec.method)))?;

        let timeout = match spec.timeout.as_deref() {
            Some(raw) => crate::controller::reconciler::parse_kubernetes_duration(raw)
                .map_err(|e| ProviderError::Config(format!("invalid timeout: {e}")))?
                .unwrap_or(default_timeout),
            None => default_timeout,
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            spec: spec.clone(),
            method,
            http,
            renderer: HandlebarsRenderer::new(EngineVersion::V2),
        })
    }

    fn vars(remote: &RemoteRef) -> serde_json::Value {
        serde_json::json!({
            "remoteRef": {
                "key": remote.key,
                "property": remote.property.as_deref().unwrap_or_default(),
                "version": remote.version.as_deref().unwrap_or_default(),
            }
        })
    }

    fn render(&self, expr: &str, remote: &RemoteRef) -> Result<String, ProviderError> {
        self.renderer
            .render(expr, &Self::vars(remote))
            .map_err(|e| ProviderError::Config(format!("failed to render request: {e}")))
    }

    async fn fetch(&self, remote: &RemoteRef) -> Result<Vec<u8>, ProviderError> {
        let url = self.render(&self.spec.url, remote)?;
        debug!(url = %url, "Webhook request");

        let mut request = self.http.request(self.method.clone(), &url);
        for (name, value) in &self.spec.headers {
            request = request.header(name, self.render(value, remote)?);
        }
        if let Some(body) = &self.spec.body {
            request = request.body(self.render(body, remote)?);
        }

        let response = request.send().await.map_err(|e| ProviderError::Backend {
            provider: PROVIDER,
            message: e.to_string(),
        })?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound);
        }
        if !status.is_success() {
            return Err(ProviderError::Backend {
                provider: PROVIDER,
                message: format!("endpoint returned {status}"),
            });
        }
        let body = response.bytes().await.map_err(|e| ProviderError::Backend {
            provider: PROVIDER,
            message: e.to_string(),
        })?;
        select_result(&body, self.spec.result.json_path.as_deref())
    }
}

/// Narrow a response body to `json_path`
fn select_result(body: &[u8], json_path: Option<&str>) -> Result<Vec<u8>, ProviderError> {
    let Some(path) = json_path.filter(|p| !p.is_empty()) else {
        return Ok(body.to_vec());
    };
    let doc: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ProviderError::NotAnObject(e.to_string()))?;
    let path = path.trim_start_matches("$.");
    property::lookup_path(&doc, path)
        .map(property::value_bytes)
        .ok_or(ProviderError::NotFound)
}

#[async_trait]
impl SecretsClient for WebhookClient {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn get_secret(&self, remote: &RemoteRef) -> Result<Vec<u8>, ProviderError> {
        let raw = self.fetch(remote).await?;
        match remote.property.as_deref() {
            Some(property) if !property.is_empty() => property::extract_property(&raw, property),
            _ => Ok(raw),
        }
    }

    async fn get_all_secrets(&self, _find: &FindRef) -> Result<SecretData, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER,
            operation: "find",
        })
    }

    async fn push_secret(&self, _key: &str, _value: &[u8]) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER,
            operation: "push",
        })
    }

    async fn delete_secret(&self, _key: &str) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER,
            operation: "delete",
        })
    }

    async fn validate(&self) -> ValidationResult {
        ValidationResult::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(url: &str) -> WebhookProvider {
        WebhookProvider {
            url: url.to_string(),
            method: "GET".to_string(),
            ..WebhookProvider::default()
        }
    }

    #[test]
    fn test_url_is_rendered_from_remote_ref() {
        let client = WebhookClient::new(
            &spec("http://backend/v1/{{ remoteRef.key }}?v={{ .remoteRef.version }}"),
            Duration::from_secs(1),
        )
        .unwrap();
        let remote = RemoteRef {
            key: "db".to_string(),
            version: Some("3".to_string()),
            ..RemoteRef::default()
        };
        assert_eq!(
            client.render(&client.spec.url, &remote).unwrap(),
            "http://backend/v1/db?v=3"
        );
    }

    #[test]
    fn test_invalid_method_is_rejected() {
        let mut s = spec("http://backend");
        s.method = "NOT A METHOD".to_string();
        assert!(matches!(
            WebhookClient::new(&s, Duration::from_secs(1)),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn test_select_result_by_json_path() {
        let body = br#"{"data":{"password":"hunter2"}}"#;
        assert_eq!(
            select_result(body, Some("data.password")).unwrap(),
            b"hunter2"
        );
        assert_eq!(select_result(body, None).unwrap(), body.to_vec());
        assert!(select_result(body, Some("data.missing"))
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_find_is_unsupported() {
        let client = WebhookClient::new(&spec("http://backend"), Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.get_all_secrets(&FindRef::default()).await,
            Err(ProviderError::Unsupported { .. })
        ));
    }
}
