//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable. Annotation,
//! label and condition names are part of the observable contract and must
//! stay stable across releases.

/// API group of every resource served by this controller
pub const API_GROUP: &str = "secret-sync.octopilot.io";

/// Field manager used for every write to a target secret
pub const FIELD_MANAGER: &str = "secret-sync-controller";

/// Prefix shared by all annotations this controller writes
pub const RECONCILE_ANNOTATION_PREFIX: &str = "reconcile.secret-sync.octopilot.io/";

/// Hash of the rendered secret data, stored on the target secret
pub const ANNOTATION_DATA_HASH: &str = "reconcile.secret-sync.octopilot.io/data-hash";

/// Why the last out-of-schedule sync fired, stored on the owning resource
pub const ANNOTATION_TRIGGER_CAUSE: &str = "reconcile.secret-sync.octopilot.io/trigger-cause";

/// Marks target secrets written by this controller
pub const LABEL_MANAGED: &str = "reconcile.secret-sync.octopilot.io/managed";

/// Value of [`LABEL_MANAGED`]
pub const LABEL_MANAGED_VALUE: &str = "true";

/// Label carrying the owner key on generator state records
pub const LABEL_GENERATOR_OWNER_KEY: &str = "generators.secret-sync.octopilot.io/owner-key";

/// Finalizer keeping the owning resource until its generator state is released
pub const FINALIZER_GENERATOR_STATE: &str = "secret-sync.octopilot.io/generator-state";

/// Condition type reported on the owning resource
pub const CONDITION_READY: &str = "Ready";

/// Condition reason: target secret is in sync
pub const REASON_SECRET_SYNCED: &str = "SecretSynced";

/// Condition reason: the sync failed
pub const REASON_SECRET_SYNCED_ERROR: &str = "SecretSyncedError";

/// Condition reason: target secret was deleted per deletion policy
pub const REASON_SECRET_DELETED: &str = "SecretDeleted";

/// Condition reason: sources returned nothing and the secret was retained
pub const REASON_SECRET_MISSING: &str = "SecretMissing";

/// Default refresh interval for `ExternalSecret` resources
pub const DEFAULT_REFRESH_INTERVAL: &str = "1h";

/// Default Kubernetes secret type
pub const DEFAULT_SECRET_TYPE: &str = "Opaque";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Upper bound for one reconcile pass, including every backend call (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 120;

/// Grace period before a superseded generator state may be collected (seconds)
pub const DEFAULT_GENERATOR_STATE_GC_GRACE_SECS: u64 = 300;

/// Interval between generator state garbage collection sweeps (seconds)
pub const DEFAULT_GENERATOR_GC_INTERVAL_SECS: u64 = 60;

/// Default maximum number of concurrent reconciliations
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Default request timeout for webhook providers (seconds)
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Interval between backend validations of `SecretStore` resources (seconds)
pub const DEFAULT_STORE_VALIDATION_INTERVAL_SECS: u64 = 300;
