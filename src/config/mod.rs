//! # Configuration
//!
//! Controller-level configuration. Built once at startup and shared by
//! reference with the reconciler, the watch loop and the GC sweep.

mod controller;

pub use controller::ControllerConfig;
