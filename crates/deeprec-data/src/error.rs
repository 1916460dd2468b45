//! Error types for the data pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or batching data.
#[derive(Debug, Error)]
pub enum DataError {
    /// A file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The file being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A line did not match the expected layout.
    #[error("Parse error in {file}:{line}: {message}")]
    Parse {
        /// File name.
        file: String,
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// Invalid pipeline configuration (zero batch size, empty split, ...).
    #[error("Invalid input configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for data operations.
pub type DataResult<T> = Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = DataError::Parse {
            file: "ratings.dat".to_string(),
            line: 7,
            message: "expected 4 fields, got 3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Parse error in ratings.dat:7: expected 4 fields, got 3"
        );
    }
}
