use thiserror::Error;

/// Errors produced while configuring or running a convolution.
///
/// Both kinds are caller defects: nothing here is transient, so there is no
/// retry path and nothing is ever silently corrected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvolutionError {
    /// Kernel, supersampling factor or crop size are inconsistent.
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// Human readable description of the violated constraint.
        reason: String,
    },

    /// An array does not have the shape the engine was configured for.
    #[error("{what} shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Which array was rejected.
        what: &'static str,
        /// Expected (rows, cols).
        expected: (usize, usize),
        /// Actual (rows, cols).
        actual: (usize, usize),
    },
}

impl ConvolutionError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn shape_mismatch(
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        Self::ShapeMismatch {
            what,
            expected,
            actual,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ConvolutionError>;
