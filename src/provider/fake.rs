//! # Fake Provider
//!
//! Serves static data declared on the store. Used for bootstrapping and
//! tests; write-back operations only affect the client instance.

use super::{property, ProviderError, SecretData, SecretsClient, ValidationResult};
use crate::crd::{FakeProvider, FindRef, RemoteRef};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::RwLock;

const PROVIDER: &str = "fake";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    version: Option<String>,
    value: Vec<u8>,
}

/// Client over the data of a `fake` provider
#[derive(Debug)]
pub struct FakeClient {
    entries: RwLock<BTreeMap<String, Vec<Entry>>>,
}

impl FakeClient {
    #[must_use]
    pub fn new(spec: &FakeProvider) -> Self {
        let mut entries: BTreeMap<String, Vec<Entry>> = BTreeMap::new();
        for data in &spec.data {
            let value = match &data.value_map {
                Some(map) => serde_json::to_vec(map).unwrap_or_default(),
                None => data.value.as_bytes().to_vec(),
            };
            entries.entry(data.key.clone()).or_default().push(Entry {
                version: data.version.clone(),
                value,
            });
        }
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn lookup(&self, key: &str, version: Option<&str>) -> Result<Vec<u8>, ProviderError> {
        let entries = self.entries.read().map_err(|e| ProviderError::Backend {
            provider: PROVIDER,
            message: format!("lock poisoned: {e}"),
        })?;
        let versions = entries.get(key).ok_or(ProviderError::NotFound)?;
        let entry = match version {
            Some(v) => versions.iter().find(|e| e.version.as_deref() == Some(v)),
            // Unversioned entries first, otherwise the last declared version
            None => versions
                .iter()
                .find(|e| e.version.is_none())
                .or_else(|| versions.last()),
        };
        entry.map(|e| e.value.clone()).ok_or(ProviderError::NotFound)
    }
}

#[async_trait]
impl SecretsClient for FakeClient {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn get_secret(&self, remote: &RemoteRef) -> Result<Vec<u8>, ProviderError> {
        let raw = self.lookup(&remote.key, remote.version.as_deref())?;
        match remote.property.as_deref() {
            Some(property) if !property.is_empty() => property::extract_property(&raw, property),
            _ => Ok(raw),
        }
    }

    async fn get_all_secrets(&self, find: &FindRef) -> Result<SecretData, ProviderError> {
        if !find.tags.is_empty() {
            return Err(ProviderError::Unsupported {
                provider: PROVIDER,
                operation: "find by tags",
            });
        }
        let pattern = find
            .name
            .as_ref()
            .map(|n| Regex::new(&n.regexp))
            .transpose()
            .map_err(|e| ProviderError::Config(format!("invalid find.name.regexp: {e}")))?;

        let keys: Vec<String> = {
            let entries = self.entries.read().map_err(|e| ProviderError::Backend {
                provider: PROVIDER,
                message: format!("lock poisoned: {e}"),
            })?;
            entries
                .keys()
                .filter(|k| find.path.as_deref().is_none_or(|p| k.starts_with(p)))
                .filter(|k| pattern.as_ref().is_none_or(|re| re.is_match(k)))
                .cloned()
                .collect()
        };

        keys.into_iter()
            .map(|key| {
                let value = self.lookup(&key, None)?;
                Ok((key, value))
            })
            .collect()
    }

    async fn push_secret(&self, key: &str, value: &[u8]) -> Result<(), ProviderError> {
        let mut entries = self.entries.write().map_err(|e| ProviderError::Backend {
            provider: PROVIDER,
            message: format!("lock poisoned: {e}"),
        })?;
        entries.insert(
            key.to_string(),
            vec![Entry {
                version: None,
                value: value.to_vec(),
            }],
        );
        Ok(())
    }

    async fn delete_secret(&self, key: &str) -> Result<(), ProviderError> {
        let mut entries = self.entries.write().map_err(|e| ProviderError::Backend {
            provider: PROVIDER,
            message: format!("lock poisoned: {e}"),
        })?;
        entries.remove(key);
        Ok(())
    }

    async fn validate(&self) -> ValidationResult {
        ValidationResult::Ready
    }
}
