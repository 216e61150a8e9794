//! Error types and result utilities for separation operations.

use thiserror::Error;

/// Convenience type alias for results that may contain SeparationError
pub type SeparationResult<T> = Result<T, SeparationError>;

/// Error types that can occur while separating a mixture.
///
/// Degenerate input (silent or empty signals) and near-zero denominators are
/// not errors: the transforms return all-zero arrays and the update rules
/// floor their denominators instead.
#[derive(Error, Debug)]
pub enum SeparationError {
    /// Error that occurs when invalid parameters are provided to an operation.
    ///
    /// This includes zero spectrogram heights, zero strides, an empty or
    /// inverted frequency range, or a frequency bound beyond Nyquist.
    /// Raised before any computation takes place.
    #[error("Invalid parameter error: {0}")]
    InvalidParameter(String),

    /// Error that occurs when array dimensions don't match expected values.
    ///
    /// This happens when the number of reference signals differs from the
    /// number of synthesized signals, or when a phase reference yields a
    /// spectrogram of a different shape.
    #[error("Dimension mismatch error: {0}")]
    DimensionMismatch(String),

    /// Error reported by a cache collaborator while storing an entry.
    #[error("Cache error: {0}")]
    CacheError(String),
}

impl SeparationError {
    /// Builds an [`SeparationError::InvalidParameter`] naming the offending parameter.
    pub fn invalid_parameter(name: &str, reason: impl AsRef<str>) -> Self {
        SeparationError::InvalidParameter(format!("{name}: {}", reason.as_ref()))
    }
}
