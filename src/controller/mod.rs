//! # Controller
//!
//! Core controller modules for the Secret Sync Controller.
//!
//! - `backoff`: Fibonacci backoff for failed reconciliations
//! - `reconciler`: sync engine and Kubernetes reconcile glue
//! - `server`: HTTP server for metrics and health checks
//!
//! The `crdgen` binary lives next to these modules but is not part of the
//! library.

pub mod backoff;
pub mod reconciler;
pub mod server;
