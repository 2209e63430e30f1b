//! # Status Management
//!
//! Builds the `Ready` condition and writes `ExternalSecret` status and
//! annotations back to the API server.

use crate::constants::{ANNOTATION_TRIGGER_CAUSE, CONDITION_READY};
use crate::crd::{Condition, ExternalSecret, ExternalSecretStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crate::store::kube::merge_patch_params;
use kube::api::Patch;
use kube::Api;
use tracing::debug;

/// Build a `Ready` condition
///
/// The transition time of `previous` is kept when the status value did not
/// change.
#[must_use]
pub fn ready_condition(
    previous: Option<&Condition>,
    ready: bool,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> Condition {
    let status = if ready { "True" } else { "False" };
    let last_transition_time = previous
        .filter(|c| c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .or_else(|| Some(now.to_rfc3339()));
    Condition {
        r#type: CONDITION_READY.to_string(),
        status: status.to_string(),
        last_transition_time,
        reason: Some(reason.to_string()),
        message: Some(message.into()),
    }
}

/// Replace the `Ready` condition in `conditions`, keeping every other type
pub fn set_ready_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    conditions.retain(|c| c.r#type != CONDITION_READY);
    conditions.push(condition);
}

/// Merge patch replacing the `status` subresource
#[must_use]
pub fn status_patch<S: serde::Serialize>(status: &S) -> Patch<serde_json::Value> {
    Patch::Merge(serde_json::json!({ "status": status }))
}

/// Merge patch setting the trigger-cause annotation to `value`
#[must_use]
pub fn trigger_cause_patch(value: &str) -> Patch<serde_json::Value> {
    Patch::Merge(serde_json::json!({
        "metadata": { "annotations": { (ANNOTATION_TRIGGER_CAUSE): value } }
    }))
}

/// Write `status` unless it equals the current one
///
/// Skipping identical writes avoids a watch event for every pass.
pub async fn update_status(
    api: &Api<ExternalSecret>,
    es: &ExternalSecret,
    status: &ExternalSecretStatus,
) -> Result<()> {
    if es.status.as_ref() == Some(status) {
        debug!("Skipping status update - status unchanged");
        return Ok(());
    }
    let name = es.metadata.name.as_deref().unwrap_or_default();
    api.patch_status(name, &merge_patch_params(), &status_patch(status))
        .await
    .with_context(|| format!("Failed to update status of ExternalSecret {name}"))?;
    Ok(())
}

/// Record why the last sync pass ran
pub async fn record_trigger_cause(
    api: &Api<ExternalSecret>,
    es: &ExternalSecret,
    cause: &super::refresh::TriggerCause,
) -> Result<()> {
    let value = serde_json::to_string(cause).context("Failed to serialize trigger cause")?;
    let current = es
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_TRIGGER_CAUSE));
    if current == Some(&value) {
        return Ok(());
    }
    let name = es.metadata.name.as_deref().unwrap_or_default();
    api.patch(name, &merge_patch_params(), &trigger_cause_patch(&value))
        .await
        .with_context(|| format!("Failed to record trigger cause on ExternalSecret {name}"))?;
    Ok(())
}
