//! Static generator, used to exercise generator plumbing.

use super::{parse_spec, Generator, GeneratorError, GeneratorOutput};
use crate::crd::FakeSpec;
use async_trait::async_trait;

/// Returns `spec.data`; stateful when `spec.state` is set
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeGenerator;

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, spec: &serde_json::Value) -> Result<GeneratorOutput, GeneratorError> {
        let spec: FakeSpec = parse_spec("Fake", spec)?;
        Ok(GeneratorOutput {
            data: spec
                .data
                .into_iter()
                .map(|(k, v)| (k, v.into_bytes()))
                .collect(),
            state: spec.state,
        })
    }

    async fn cleanup(
        &self,
        spec: &serde_json::Value,
        _state: &serde_json::Value,
    ) -> Result<(), GeneratorError> {
        let spec: FakeSpec = parse_spec("Fake", spec)?;
        if spec.fail_cleanup {
            return Err(GeneratorError::Cleanup("fake cleanup failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stateful_when_state_is_set() {
        let spec = serde_json::json!({"data": {"foo": "bar"}, "state": {"lease": "abc"}});
        let out = FakeGenerator.generate(&spec).await.unwrap();
        assert_eq!(out.data["foo"], b"bar");
        assert_eq!(out.state, Some(serde_json::json!({"lease": "abc"})));
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_configurable() {
        let ok = serde_json::json!({"data": {}});
        let failing = serde_json::json!({"data": {}, "failCleanup": true});
        assert!(FakeGenerator.cleanup(&ok, &serde_json::Value::Null).await.is_ok());
        assert!(matches!(
            FakeGenerator.cleanup(&failing, &serde_json::Value::Null).await,
            Err(GeneratorError::Cleanup(_))
        ));
    }
}
