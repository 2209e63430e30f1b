//! # Sync Pass
//!
//! Runs one pass for an `ExternalSecret` against the store traits and
//! reports the resulting status. The pass moves through
//! `Aggregating -> Transforming -> Diffing -> Committing -> Done`; any phase
//! can end in `Failed`, which leaves the target secret untouched unless the
//! failure happened while writing it.
//!
//! Generator state writes are queued during aggregation and committed only
//! after the target secret was written. Every failure before that rolls the
//! queue back, including running out of the pass deadline.

use super::aggregate::{aggregate, AggregateError, SourceTracker};
use super::refresh::{self, TriggerCause};
use super::status::{ready_condition, set_ready_condition};
use super::target::{self, TargetAction, TargetError};
use super::utils::{invalid_keys, owner_key};
use super::validation::{validate_external_secret, ValidationError};
use crate::constants::{
    RECONCILE_ANNOTATION_PREFIX, REASON_SECRET_DELETED, REASON_SECRET_MISSING,
    REASON_SECRET_SYNCED, REASON_SECRET_SYNCED_ERROR,
};
use crate::crd::{ExternalSecret, ExternalSecretStatus, SecretBinding};
use crate::generator::statemanager::{Manager, StateError};
use crate::store::{
    GeneratorStateStore, ResourceReader, SourceResolver, StoreError, TargetSecret, TargetStore,
};
use crate::template::{self, RenderedSecret, SourceKind, TemplateDefaults, TemplateError, TemplateSources};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Aggregating,
    Transforming,
    Diffing,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid ExternalSecret: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("rendered secret has invalid keys: {}", .0.join(", "))]
    InvalidKeys(Vec<String>),
    #[error("sync pass exceeded its deadline of {0:?}")]
    Timeout(Duration),
    #[error("generator state: {0}")]
    State(#[from] StateError),
    #[error("{source}; rollback failed: {rollback}")]
    RolledBack {
        source: Box<SyncError>,
        rollback: StateError,
    },
}

/// Everything a pass reads from and writes to
pub struct SyncContext<'a> {
    pub resolver: &'a dyn SourceResolver,
    pub reader: &'a dyn ResourceReader,
    pub targets: &'a dyn TargetStore,
    pub states: Arc<dyn GeneratorStateStore>,
    pub gc_grace: chrono::Duration,
    /// Upper bound for aggregating, rendering and writing the target
    pub deadline: Option<Duration>,
    pub now: DateTime<Utc>,
}

impl fmt::Debug for SyncContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("gc_grace", &self.gc_grace)
            .field("deadline", &self.deadline)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

/// Result of one pass
#[derive(Debug)]
pub struct SyncOutcome {
    /// `Done` or `Failed`, plus the phase the failure happened in
    pub phase: SyncPhase,
    pub failed_in: Option<SyncPhase>,
    /// Status to write back, equal to the current one when nothing ran
    pub status: ExternalSecretStatus,
    pub trigger: Option<TriggerCause>,
    pub requeue_after: Option<Duration>,
    pub action: Option<TargetAction>,
    pub error: Option<SyncError>,
}

impl SyncOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Labels and annotations the target secret inherits by default
fn template_defaults(es: &ExternalSecret) -> TemplateDefaults {
    TemplateDefaults {
        labels: es.metadata.labels.clone().unwrap_or_default(),
        annotations: es
            .metadata
            .annotations
            .iter()
            .flatten()
            .filter(|(k, _)| {
                !k.starts_with(RECONCILE_ANNOTATION_PREFIX) && k.as_str() != LAST_APPLIED_ANNOTATION
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

/// Read the config maps and secrets the template references
async fn read_template_sources(
    reader: &dyn ResourceReader,
    es: &ExternalSecret,
    namespace: &str,
) -> Result<(TemplateSources, BTreeMap<String, String>), StoreError> {
    let mut sources = TemplateSources::default();
    let mut versions = BTreeMap::new();
    let Some(template) = es.spec.target.template.as_ref() else {
        return Ok((sources, versions));
    };
    for source in TemplateSources::referenced(template) {
        let resource = match source.kind {
            SourceKind::ConfigMap => reader.get_config_map(namespace, &source.name).await?,
            SourceKind::Secret => reader.get_secret(namespace, &source.name).await?,
        };
        if let Some(resource) = resource {
            versions.insert(source.status_key(), resource.resource_version);
            sources.insert(source, resource.data);
        } else {
            debug!(source = %source.status_key(), "Template source not found");
        }
    }
    Ok((sources, versions))
}

/// Run `work` within `deadline`, turning an elapsed deadline into an error
///
/// `work` is dropped when the deadline passes, everything it borrowed is
/// usable again afterwards.
async fn within<F>(deadline: Option<Duration>, work: F) -> Result<TargetAction, SyncError>
where
    F: Future<Output = Result<TargetAction, SyncError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or_else(|_elapsed| Err(SyncError::Timeout(limit))),
        None => work.await,
    }
}

/// Aggregate, render and commit, advancing `phase` as the pass moves on
async fn stage(
    ctx: &SyncContext<'_>,
    es: &ExternalSecret,
    sources: &TemplateSources,
    existing: Option<TargetSecret>,
    states: &mut Manager,
    tracker: &mut SourceTracker,
    phase: &mut SyncPhase,
) -> Result<TargetAction, SyncError> {
    let data = aggregate(es, ctx.resolver, states, tracker).await?;

    *phase = SyncPhase::Transforming;
    let defaults = template_defaults(es);
    let rendered = match es.spec.target.template.as_ref() {
        Some(template) => template::render(template, &data, sources, &defaults)?,
        None => RenderedSecret::untemplated(data.clone(), &defaults),
    };
    let invalid = invalid_keys(&rendered.data);
    if !invalid.is_empty() {
        return Err(SyncError::InvalidKeys(invalid));
    }

    *phase = SyncPhase::Committing;
    Ok(target::commit(ctx.targets, es, &rendered, existing, data.is_empty()).await?)
}

/// Roll back `states` and attach any rollback failure to `error`
async fn abort(states: Manager, error: SyncError) -> SyncError {
    if states.is_empty() {
        return error;
    }
    match states.rollback().await {
        Ok(()) => error,
        Err(rollback) => SyncError::RolledBack {
            source: Box::new(error),
            rollback,
        },
    }
}

struct Pass<'a> {
    es: &'a ExternalSecret,
    status: ExternalSecretStatus,
    trigger: Option<TriggerCause>,
    now: DateTime<Utc>,
}

impl Pass<'_> {
    fn fail(mut self, phase: SyncPhase, error: SyncError) -> SyncOutcome {
        warn!(phase = %phase, error = %error, "Sync failed");
        let previous = self.status.ready_condition().cloned();
        set_ready_condition(
            &mut self.status.conditions,
            ready_condition(
                previous.as_ref(),
                false,
                REASON_SECRET_SYNCED_ERROR,
                error.to_string(),
                self.now,
            ),
        );
        SyncOutcome {
            phase: SyncPhase::Failed,
            failed_in: Some(phase),
            status: self.status,
            trigger: self.trigger,
            requeue_after: None,
            action: None,
            error: Some(error),
        }
    }

    fn done(mut self, action: TargetAction) -> SyncOutcome {
        let (reason, message) = match action {
            TargetAction::Deleted => (REASON_SECRET_DELETED, "secret was deleted"),
            TargetAction::Missing => (REASON_SECRET_MISSING, "sources returned no data, secret retained"),
            _ => (REASON_SECRET_SYNCED, "secret synced"),
        };
        let previous = self.status.ready_condition().cloned();
        set_ready_condition(
            &mut self.status.conditions,
            ready_condition(previous.as_ref(), true, reason, message, self.now),
        );
        self.status.refresh_time = Some(self.now.to_rfc3339());
        self.status.synced_resource_version = Some(refresh::fingerprint(self.es));
        SyncOutcome {
            phase: SyncPhase::Done,
            failed_in: None,
            status: self.status,
            trigger: self.trigger,
            requeue_after: refresh::requeue_after(self.es, self.now)
                .and(refresh::refresh_interval(self.es)),
            action: Some(action),
            error: None,
        }
    }
}

/// Run one sync pass for `es`
///
/// Never panics and never returns early with an error: failures are
/// reported through [`SyncOutcome::error`] and a `Ready=False` condition.
pub async fn sync(ctx: &SyncContext<'_>, es: &ExternalSecret) -> SyncOutcome {
    let namespace = es.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let mut status = es.status.clone().unwrap_or_default();
    status.observed_generation = es.metadata.generation;
    status.binding = Some(SecretBinding {
        name: es.target_name(),
    });
    let mut pass = Pass {
        es,
        status,
        trigger: None,
        now: ctx.now,
    };

    if let Err(e) = validate_external_secret(es) {
        return pass.fail(SyncPhase::Aggregating, e.into());
    }

    let (sources, versions) = match read_template_sources(ctx.reader, es, &namespace).await {
        Ok(read) => read,
        Err(e) => return pass.fail(SyncPhase::Aggregating, e.into()),
    };
    let existing = match ctx.targets.get(&namespace, &es.target_name()).await {
        Ok(existing) => existing,
        Err(e) => return pass.fail(SyncPhase::Diffing, e.into()),
    };

    let Some(trigger) = refresh::trigger(es, existing.as_ref(), &versions, ctx.now) else {
        debug!("No refresh trigger, skipping sync");
        return SyncOutcome {
            phase: SyncPhase::Done,
            failed_in: None,
            status: es.status.clone().unwrap_or_default(),
            trigger: None,
            requeue_after: refresh::requeue_after(es, ctx.now),
            action: None,
            error: None,
        };
    };
    info!(trigger = ?trigger, "Syncing ExternalSecret");
    pass.trigger = Some(trigger);
    pass.status.source_versions = versions;

    let mut states = Manager::new(&namespace, Arc::clone(&ctx.states), ctx.gc_grace, ctx.now);
    let mut tracker = SourceTracker::default();
    let mut phase = SyncPhase::Aggregating;
    let staged = within(
        ctx.deadline,
        stage(ctx, es, &sources, existing, &mut states, &mut tracker, &mut phase),
    )
    .await;
    pass.status.sources = tracker.into_statuses();
    let action = match staged {
        Ok(action) => action,
        Err(e) => {
            let error = abort(states, e).await;
            return pass.fail(phase, error);
        }
    };

    if let Err(e) = states.commit().await {
        return pass.fail(SyncPhase::Committing, e.into());
    }
    pass.done(action)
}

/// Flag the latest generator state of every generator entry for collection
///
/// Runs when the `ExternalSecret` is deleted.
pub async fn release_generator_states(
    ctx: &SyncContext<'_>,
    es: &ExternalSecret,
) -> Result<(), StateError> {
    let namespace = es.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let name = es.metadata.name.as_deref().unwrap_or_default();
    let mut states = Manager::new(&namespace, Arc::clone(&ctx.states), ctx.gc_grace, ctx.now);
    for (index, entry) in es.spec.data_from.iter().enumerate() {
        if entry.source_ref.as_ref().is_some_and(|s| s.generator_ref.is_some()) {
            states.enqueue_flag_latest_state_for_gc(&owner_key(&namespace, name, index));
        }
    }
    states.commit().await
}
