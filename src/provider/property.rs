//! # Property Extraction
//!
//! Helpers shared by providers that return JSON documents.

use super::{ProviderError, SecretData};
use serde_json::Value;

/// Narrow a raw secret value to a dotted `property` path
///
/// The raw value must be a JSON document. A top-level key that contains dots
/// is matched before the path is split. Strings are returned unquoted, every
/// other value as JSON text.
pub fn extract_property(raw: &[u8], property: &str) -> Result<Vec<u8>, ProviderError> {
    let doc: Value = serde_json::from_slice(raw).map_err(|_| ProviderError::PropertyNotFound {
        property: property.to_string(),
    })?;

    let found = doc
        .get(property)
        .or_else(|| lookup_path(&doc, property))
        .ok_or_else(|| ProviderError::PropertyNotFound {
            property: property.to_string(),
        })?;
    Ok(value_bytes(found))
}

/// Walk a dotted path into a JSON document
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(doc, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Expand a JSON object into secret keys
pub fn expand_json_object(raw: &[u8]) -> Result<SecretData, ProviderError> {
    let doc: Value = serde_json::from_slice(raw)
        .map_err(|e| ProviderError::NotAnObject(e.to_string()))?;
    match doc {
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), value_bytes(v)))
            .collect()),
        other => Err(ProviderError::NotAnObject(format!(
            "expected an object, got {}",
            json_kind(&other)
        ))),
    }
}

/// String values as-is, everything else as JSON text
#[must_use]
pub fn value_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_nested_property() {
        let raw = br#"{"db":{"user":"admin","port":5432}}"#;
        assert_eq!(extract_property(raw, "db.user").unwrap(), b"admin");
        assert_eq!(extract_property(raw, "db.port").unwrap(), b"5432");
        let nested: Value = serde_json::from_slice(&extract_property(raw, "db").unwrap()).unwrap();
        assert_eq!(nested, serde_json::json!({"user": "admin", "port": 5432}));
    }

    #[test]
    fn test_extract_dotted_top_level_key() {
        let raw = br#"{"tls.crt":"cert"}"#;
        assert_eq!(extract_property(raw, "tls.crt").unwrap(), b"cert");
    }

    #[test]
    fn test_extract_missing_property() {
        let err = extract_property(br#"{"a":1}"#, "b").unwrap_err();
        assert!(matches!(err, ProviderError::PropertyNotFound { .. }));
    }

    #[test]
    fn test_expand_rejects_non_objects() {
        assert!(expand_json_object(b"[1,2]").is_err());
        assert!(expand_json_object(b"plain").is_err());
        let map = expand_json_object(br#"{"a":"x","b":true}"#).unwrap();
        assert_eq!(map["a"], b"x");
        assert_eq!(map["b"], b"true");
    }
}
