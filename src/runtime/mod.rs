//! # Runtime
//!
//! Process-level wiring of the controller.
//!
//! - `initialization`: rustls, tracing, metrics, HTTP server and Kubernetes client setup
//! - `watch_loop`: controllers for `ExternalSecret` and store resources plus generator state GC
//! - `error_policy`: retry backoff for failed reconciliations and watch stream error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
