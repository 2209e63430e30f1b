//! # Reconciler
//!
//! Sync engine for `ExternalSecret` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Validate the resource
//! 2. Decide whether a refresh trigger fired (`refresh`)
//! 3. Aggregate source data from stores and generators (`aggregate`, `rewrite`)
//! 4. Render the target secret (`crate::template`)
//! 5. Commit it according to the creation and deletion policies (`target`)
//! 6. Commit or roll back generator state, then update status
//!
//! Steps 1 to 6 run against the store traits in `sync` so they can be
//! exercised without a cluster. `reconcile` wires them to the Kubernetes API.

pub mod aggregate;
pub mod reconcile;
pub mod refresh;
pub mod rewrite;
pub mod status;
pub mod sync;
pub mod target;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export public API
pub use reconcile::{reconcile, reconcile_cluster_store, reconcile_store};
pub use refresh::TriggerCause;
pub use sync::{release_generator_states, sync, SyncContext, SyncError, SyncOutcome, SyncPhase};
pub use target::TargetAction;
pub use types::{BackoffState, Reconciler, ReconcilerError};
pub use validation::{parse_kubernetes_duration, validate_external_secret};
