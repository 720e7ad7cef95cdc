//! Error types for KnnBot
//!
//! Fatal conditions only. Insufficient data (undefined features, empty
//! neighbour queries, inconclusive simulations) is carried as `None`.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing candle data
    #[error("data integrity error at candle {index}: {reason}")]
    DataIntegrity { index: usize, reason: String },

    /// Out-of-range configuration parameter
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Feature vector arity does not match the index
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn data_integrity(index: usize, reason: impl Into<String>) -> Self {
        Error::DataIntegrity {
            index,
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_condition() {
        let err = Error::data_integrity(7, "high below low");
        assert_eq!(
            err.to_string(),
            "data integrity error at candle 7: high below low"
        );

        let err = Error::DimensionMismatch {
            expected: 2,
            found: 3,
        };
        assert!(err.to_string().contains("expected 2"));
    }
}
