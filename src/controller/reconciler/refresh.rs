//! # Refresh Triggers
//!
//! Decides whether an `ExternalSecret` needs a sync pass and records why.
//!
//! Triggers are checked in a fixed order and the first match wins:
//!
//! 1. never synced
//! 2. `CreatedOnce` resources that already synced never sync again
//! 3. the previous pass failed
//! 4. the resource fingerprint changed
//! 5. a config map or secret read by the template changed
//! 6. the target secret is missing
//! 7. the target secret drifted from what was written
//! 8. the refresh interval elapsed (`Periodic` only)

use super::utils::data_hash;
use super::validation::parse_kubernetes_duration;
use crate::constants::{ANNOTATION_DATA_HASH, REASON_SECRET_DELETED, REASON_SECRET_MISSING, RECONCILE_ANNOTATION_PREFIX};
use crate::crd::{CreationPolicy, ExternalSecret, RefreshPolicy};
use crate::store::TargetSecret;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Why a sync pass runs
///
/// Serialized into the trigger-cause annotation of the owning resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum TriggerCause {
    Initial,
    RetryAfterFailure,
    #[serde(rename_all = "camelCase")]
    SpecChanged { previous: String, current: String },
    #[serde(rename_all = "camelCase")]
    SourceChanged {
        source: String,
        previous: Option<String>,
        current: Option<String>,
    },
    TargetMissing,
    TargetDrifted,
    #[serde(rename_all = "camelCase")]
    IntervalElapsed { last_refresh: String },
}

/// Fingerprint of everything on the resource that affects the output
///
/// Combines the generation with a digest of the spec, labels and
/// annotations. Annotations written by this controller are excluded so that
/// recording a trigger does not itself cause one.
#[must_use]
pub fn fingerprint(es: &ExternalSecret) -> String {
    let annotations: BTreeMap<&String, &String> = es
        .metadata
        .annotations
        .iter()
        .flatten()
        .filter(|(k, _)| !k.starts_with(RECONCILE_ANNOTATION_PREFIX))
        .collect();
    let labels: BTreeMap<&String, &String> = es.metadata.labels.iter().flatten().collect();

    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&es.spec).unwrap_or_default());
    hasher.update(serde_json::to_vec(&labels).unwrap_or_default());
    hasher.update(serde_json::to_vec(&annotations).unwrap_or_default());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", es.metadata.generation.unwrap_or_default(), &digest[..16])
}

/// Time-based refresh interval, `None` when disabled or invalid
#[must_use]
pub fn refresh_interval(es: &ExternalSecret) -> Option<Duration> {
    parse_kubernetes_duration(&es.spec.refresh_interval)
        .ok()
        .flatten()
}

fn last_refresh(es: &ExternalSecret) -> Option<DateTime<Utc>> {
    es.status
        .as_ref()?
        .refresh_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Decide whether `es` needs a sync pass
///
/// `source_versions` are the current resource versions of the template
/// sources, keyed like `status.sourceVersions`.
#[must_use]
pub fn trigger(
    es: &ExternalSecret,
    target: Option<&TargetSecret>,
    source_versions: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> Option<TriggerCause> {
    let Some(status) = es.status.as_ref().filter(|s| s.synced_resource_version.is_some()) else {
        return Some(TriggerCause::Initial);
    };
    if es.spec.refresh_policy == RefreshPolicy::CreatedOnce {
        return None;
    }

    let ready = status.ready_condition();
    if ready.is_some_and(|c| c.status == "False") {
        return Some(TriggerCause::RetryAfterFailure);
    }

    let current = fingerprint(es);
    let previous = status.synced_resource_version.clone().unwrap_or_default();
    if previous != current {
        return Some(TriggerCause::SpecChanged { previous, current });
    }

    let changed_source = source_versions
        .keys()
        .chain(status.source_versions.keys())
        .find(|k| source_versions.get(*k) != status.source_versions.get(*k));
    if let Some(source) = changed_source {
        return Some(TriggerCause::SourceChanged {
            source: source.clone(),
            previous: status.source_versions.get(source).cloned(),
            current: source_versions.get(source).cloned(),
        });
    }

    let last_reason = ready.and_then(|c| c.reason.as_deref());
    let expects_target = es.spec.target.creation_policy != CreationPolicy::None
        && !matches!(last_reason, Some(REASON_SECRET_DELETED | REASON_SECRET_MISSING));
    match target {
        None if expects_target => return Some(TriggerCause::TargetMissing),
        Some(secret) if expects_target && has_drifted(es, secret) => {
            return Some(TriggerCause::TargetDrifted);
        }
        _ => {}
    }

    if es.spec.refresh_policy == RefreshPolicy::Periodic {
        if let (Some(interval), Some(last)) = (refresh_interval(es), last_refresh(es)) {
            if elapsed(last, now) >= interval {
                return Some(TriggerCause::IntervalElapsed {
                    last_refresh: last.to_rfc3339(),
                });
            }
        }
    }
    None
}

/// Whether the written data no longer matches the recorded hash
fn has_drifted(es: &ExternalSecret, secret: &TargetSecret) -> bool {
    let Some(recorded) = secret.annotations.get(ANNOTATION_DATA_HASH) else {
        return true;
    };
    let current = if es.spec.target.creation_policy == CreationPolicy::Merge {
        data_hash(&secret.owned_data())
    } else {
        data_hash(&secret.data)
    };
    *recorded != current
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// When the next pass should run without an external change
///
/// `None` means wait for a watch event.
#[must_use]
pub fn requeue_after(es: &ExternalSecret, now: DateTime<Utc>) -> Option<Duration> {
    if es.spec.refresh_policy != RefreshPolicy::Periodic {
        return None;
    }
    let interval = refresh_interval(es)?;
    let remaining = last_refresh(es)
        .map_or(interval, |last| interval.saturating_sub(elapsed(last, now)));
    Some(remaining.max(Duration::from_secs(1)))
}
