//! Error kinds raised by the tracking core.

use thiserror::Error;

/// Errors that can occur while building or tracking through a beamline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    /// The element or segment is configured in a way tracking cannot honor.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The requested tracking path cannot operate on the given beam.
    #[error("capability mismatch: {0}")]
    CapabilityMismatch(String),

    /// A named element does not exist where it was looked up.
    #[error("lookup failure: {0}")]
    LookupFailure(String),

    /// Two batch shapes cannot be broadcast against each other.
    #[error("shape mismatch: {left:?} is not compatible with {right:?}")]
    ShapeMismatch {
        /// Shape of the left operand.
        left: Vec<usize>,
        /// Shape of the right operand.
        right: Vec<usize>,
    },
}

impl TrackError {
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    #[must_use]
    pub fn capability_mismatch(reason: impl Into<String>) -> Self {
        Self::CapabilityMismatch(reason.into())
    }

    #[must_use]
    pub fn lookup_failure(name: impl Into<String>) -> Self {
        Self::LookupFailure(name.into())
    }

    #[must_use]
    pub fn shape_mismatch(left: &[usize], right: &[usize]) -> Self {
        Self::ShapeMismatch {
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}

/// Result type for tracking operations.
pub type Result<T> = std::result::Result<T, TrackError>;
