//! Error types for the deeprec core library.

use thiserror::Error;

/// The main error type for deeprec-core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A column referenced a field that the record does not carry.
    #[error("Missing feature: {key}")]
    MissingFeature {
        /// The field name that was looked up.
        key: String,
    },

    /// A column descriptor is malformed (zero buckets, empty vocabulary, ...).
    #[error("Invalid column {column}: {message}")]
    InvalidColumn {
        /// Name of the offending column.
        column: String,
        /// Why the column is invalid.
        message: String,
    },

    /// A feature value had a type the column cannot consume.
    #[error("Unsupported value for {key}: {message}")]
    UnsupportedValue {
        /// The field name.
        key: String,
        /// Description of the mismatch.
        message: String,
    },
}

/// A specialized Result type for deeprec-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::MissingFeature {
            key: "user_id".to_string(),
        };
        assert_eq!(err.to_string(), "Missing feature: user_id");

        let err = CoreError::InvalidColumn {
            column: "user_age".to_string(),
            message: "empty vocabulary".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid column user_age: empty vocabulary");
    }
}
