//! # Rewrite Pipeline
//!
//! Applies the `rewrite` rules of a `dataFrom` entry to the keys and values
//! it produced. Rules run in declared order; the first failing rule aborts
//! the pipeline.
//!
//! - `regexp` substitutes in keys, capture groups are available as `$1` or `${name}`
//! - `merge` flattens JSON object values into one map, detecting key conflicts
//! - `transform` renders every value through a template with `value` bound

use crate::crd::{
    ConflictPolicy, EngineVersion, MergeStrategy, PriorityPolicy, Rewrite, RewriteMerge,
    RewriteRegexp,
};
use crate::provider::{property, SecretData};
use crate::template::{render_value, HandlebarsRenderer, TemplateError};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("rewrite[{index}]: invalid regexp {pattern:?}: {source}")]
    InvalidRegexp {
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("rewrite[{index}]: merge with strategy JSON requires into")]
    MissingInto { index: usize },
    #[error("rewrite[{index}]: priority key {key} not found")]
    PriorityKeyNotFound { index: usize, key: String },
    #[error("rewrite[{index}]: value of {key} is not a JSON object")]
    NotAnObject { index: usize, key: String },
    #[error("rewrite[{index}]: conflicting keys {}", .keys.join(", "))]
    Conflict { index: usize, keys: Vec<String> },
    #[error("rewrite[{index}]: transform of {key} failed: {source}")]
    Transform {
        index: usize,
        key: String,
        #[source]
        source: TemplateError,
    },
}

/// Run `rules` over `data`
pub fn apply(rules: &[Rewrite], data: SecretData) -> Result<SecretData, RewriteError> {
    rules
        .iter()
        .enumerate()
        .try_fold(data, |data, (index, rule)| match rule {
            Rewrite::Regexp(r) => regexp(index, r, data),
            Rewrite::Merge(m) => merge(index, m, data),
            Rewrite::Transform(t) => transform(index, &t.template, data),
        })
}

fn regexp(index: usize, rule: &RewriteRegexp, data: SecretData) -> Result<SecretData, RewriteError> {
    let re = Regex::new(&rule.source).map_err(|source| RewriteError::InvalidRegexp {
        index,
        pattern: rule.source.clone(),
        source,
    })?;
    Ok(data
        .into_iter()
        .map(|(key, value)| (re.replace_all(&key, rule.target.as_str()).into_owned(), value))
        .collect())
}

fn merge(index: usize, rule: &RewriteMerge, data: SecretData) -> Result<SecretData, RewriteError> {
    if rule.strategy == MergeStrategy::Json && rule.into.as_deref().is_none_or(str::is_empty) {
        return Err(RewriteError::MissingInto { index });
    }

    // Priority keys first, front of the list first, then the rest sorted.
    // A key listed twice keeps its first position.
    let mut order: Vec<&str> = Vec::with_capacity(data.len());
    for key in &rule.priority {
        if order.contains(&key.as_str()) {
            continue;
        }
        if data.contains_key(key) {
            order.push(key);
        } else if rule.priority_policy == PriorityPolicy::Strict {
            return Err(RewriteError::PriorityKeyNotFound {
                index,
                key: key.clone(),
            });
        }
    }
    order.extend(
        data.keys()
            .map(String::as_str)
            .filter(|k| !rule.priority.iter().any(|p| p == k)),
    );

    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
    let mut conflicts = BTreeSet::new();
    for key in order {
        let Some(Value::Object(fields)) = data.get(key).and_then(|v| serde_json::from_slice::<Value>(v).ok())
        else {
            return Err(RewriteError::NotAnObject {
                index,
                key: key.to_string(),
            });
        };
        for (field, value) in fields {
            if merged.contains_key(&field) {
                conflicts.insert(field);
            } else {
                merged.insert(field, value);
            }
        }
    }
    if rule.conflict_policy == ConflictPolicy::Error && !conflicts.is_empty() {
        return Err(RewriteError::Conflict {
            index,
            keys: conflicts.into_iter().collect(),
        });
    }

    match (rule.strategy, rule.into.as_deref()) {
        (MergeStrategy::Json, Some(into)) => {
            let mut out = data;
            let object: serde_json::Map<String, Value> = merged.into_iter().collect();
            out.insert(into.to_string(), Value::Object(object).to_string().into_bytes());
            Ok(out)
        }
        _ => Ok(merged
            .iter()
            .map(|(k, v)| (k.clone(), property::value_bytes(v)))
            .collect()),
    }
}

fn transform(index: usize, template: &str, data: SecretData) -> Result<SecretData, RewriteError> {
    let renderer = HandlebarsRenderer::new(EngineVersion::V2);
    data.into_iter()
        .map(|(key, value)| {
            match render_value(&renderer, template, &value) {
                Ok(rendered) => Ok((key, rendered.into_bytes())),
                Err(source) => Err(RewriteError::Transform { index, key, source }),
            }
        })
        .collect()
}
