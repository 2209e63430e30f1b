//! # Utilities
//!
//! Hashing and key helpers shared by the sync pipeline.

use crate::provider::SecretData;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static VALID_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+$").expect("Failed to compile secret key regex - this should never happen")
});

/// Whether `key` may be used as a Kubernetes secret data key
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    VALID_KEY.is_match(key)
}

/// Keys of `data` that are not valid secret data keys
#[must_use]
pub fn invalid_keys(data: &SecretData) -> Vec<String> {
    data.keys().filter(|k| !is_valid_key(k)).cloned().collect()
}

/// SHA-256 hex digest of secret data
///
/// Keys and values are length-prefixed so that moving bytes between a key
/// and its value changes the hash.
#[must_use]
pub fn data_hash(data: &SecretData) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value);
    }
    format!("{:x}", hasher.finalize())
}

/// Label-sized identity of one `dataFrom` entry of an `ExternalSecret`
///
/// MD5 hex of `ExternalSecret/<namespace>/<name>/spec.dataFrom[<index>]`.
#[must_use]
pub fn owner_key(namespace: &str, name: &str, index: usize) -> String {
    let identity = format!("ExternalSecret/{namespace}/{name}/spec.dataFrom[{index}]");
    format!("{:x}", md5::compute(identity.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> SecretData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_key_validity() {
        assert!(is_valid_key("DB_PASSWORD"));
        assert!(is_valid_key("tls.crt"));
        assert!(is_valid_key("a-b_c.d"));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("has space"));
        assert_eq!(invalid_keys(&data(&[("ok", "1"), ("not/ok", "2")])), vec!["not/ok"]);
    }

    #[test]
    fn test_data_hash_is_length_prefixed() {
        assert_ne!(
            data_hash(&data(&[("ab", "c")])),
            data_hash(&data(&[("a", "bc")]))
        );
        assert_eq!(data_hash(&data(&[("k", "v")])), data_hash(&data(&[("k", "v")])));
        assert_eq!(data_hash(&SecretData::new()).len(), 64);
    }

    #[test]
    fn test_owner_key_is_label_sized_and_stable() {
        let key = owner_key("default", "db", 0);
        assert_eq!(key.len(), 32);
        assert_eq!(key, owner_key("default", "db", 0));
        assert_ne!(key, owner_key("default", "db", 1));
    }
}
