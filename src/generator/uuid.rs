//! UUID generator.

use super::{parse_spec, Generator, GeneratorError, GeneratorOutput};
use crate::crd::UuidSpec;
use async_trait::async_trait;

/// Stateless v4 UUID generator
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

#[async_trait]
impl Generator for UuidGenerator {
    async fn generate(&self, spec: &serde_json::Value) -> Result<GeneratorOutput, GeneratorError> {
        let spec: UuidSpec = parse_spec("UUID", spec)?;
        let key = spec.secret_key.unwrap_or_else(|| "uuid".to_string());
        let value = ::uuid::Uuid::new_v4().to_string();
        Ok(GeneratorOutput {
            data: [(key, value.into_bytes())].into_iter().collect(),
            state: None,
        })
    }

    async fn cleanup(
        &self,
        _spec: &serde_json::Value,
        _state: &serde_json::Value,
    ) -> Result<(), GeneratorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generates_distinct_v4_uuids() {
        let a = UuidGenerator.generate(&serde_json::json!({})).await.unwrap();
        let b = UuidGenerator.generate(&serde_json::json!({})).await.unwrap();
        let a = String::from_utf8(a.data["uuid"].clone()).unwrap();
        let b = String::from_utf8(b.data["uuid"].clone()).unwrap();
        assert_ne!(a, b);
        assert_eq!(::uuid::Uuid::parse_str(&a).unwrap().get_version_num(), 4);
    }

    #[tokio::test]
    async fn test_custom_secret_key() {
        let out = UuidGenerator
            .generate(&serde_json::json!({"secretKey": "id"}))
            .await
            .unwrap();
        assert!(out.data.contains_key("id"));
        assert!(out.state.is_none());
    }
}
