//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use secret_sync_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (`ExternalSecret`, `SecretStore`, generators, etc.)
//! - Backend, generator and storage traits
//! - Reconciler and sync pipeline types
//! - `ControllerConfig`

pub use crate::crd::*;

pub use crate::generator::Generator;
pub use crate::provider::SecretsClient;
pub use crate::store::{GeneratorStateStore, ResourceReader, SourceResolver, TargetStore};

pub use crate::controller::reconciler::{
    reconcile, sync, BackoffState, Reconciler, ReconcilerError, SyncContext, SyncOutcome,
    SyncPhase, TargetAction, TriggerCause,
};

pub use crate::config::ControllerConfig;
