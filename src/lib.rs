//! Secret Sync Controller Library
//!
//! Syncs secret material from external backends and generators into
//! Kubernetes `Secret` resources. Each `ExternalSecret` names where its data
//! comes from, how keys are rewritten, and how the target secret is shaped.
//!
//! ## Quick Start
//!
//! ```rust
//! use secret_sync_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod generator;
pub mod observability;
pub mod prelude;
pub mod provider;
pub mod runtime;
pub mod store;
pub mod template;
