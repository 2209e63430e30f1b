//! # Validation
//!
//! Validates `ExternalSecret` resources and duration strings.

mod duration;
mod policy;

pub use duration::parse_kubernetes_duration;
pub use policy::validate_external_secret;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid duration {value:?}: {message}")]
    InvalidDuration { value: String, message: String },
    #[error("deletionPolicy {deletion} is not allowed with creationPolicy {creation}")]
    PolicyCombination { deletion: String, creation: String },
    #[error("spec.data[{index}]: {message}")]
    DataEntry { index: usize, message: String },
    #[error("spec.dataFrom[{index}]: {message}")]
    DataFromEntry { index: usize, message: String },
}
