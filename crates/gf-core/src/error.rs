//! Error types for gammafit

use thiserror::Error;

/// gammafit error type
///
/// Structural violations (mismatched geometries, invalid parameter domains,
/// malformed geometry construction) are reported through this enum and
/// propagate to the caller. Numerical outcomes of a fit (non-convergence,
/// degenerate covariance) are data and live in [`crate::FitResult`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Operation between maps or geometries that are not aligned
    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    /// Model evaluated outside its valid parameter domain
    #[error("Parameter domain error: {0}")]
    ParameterDomain(String),

    /// Malformed geometry or axis construction
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Cooperative cancellation was requested
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_category() {
        let e = Error::GeometryMismatch("axis 'energy' differs".into());
        assert_eq!(e.to_string(), "Geometry mismatch: axis 'energy' differs");

        let e = Error::ParameterDomain("e_cutoff must be > 0".into());
        assert!(e.to_string().starts_with("Parameter domain error"));
    }

    #[test]
    fn test_json_error_converts() {
        let parsed: std::result::Result<f64, _> = serde_json::from_str("not json");
        let err: Error = parsed.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }
}
