//! Error types for the gridshard library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`GridShardError`] enum. The variants mirror the failure classes of the
//! index store: absent data, build-time conflicts, grid transport failures,
//! corrupted encodings and configuration problems.
//!
//! # Examples
//!
//! ```
//! use gridshard::error::{GridShardError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(GridShardError::invalid_argument("relation must be one of <, <=, >, >="))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for gridshard operations.
#[derive(Error, Debug)]
pub enum GridShardError {
    /// I/O errors on local files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A shard, term or file is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempt to create a shard or file that already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The grid could not be reached, even after reconnecting.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// A stored value or shard file failed to decode.
    #[error("Corrupt encoding: {0}")]
    CorruptEncoding(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Merge input was not sorted by term.
    #[error("Unsorted input: {0}")]
    UnsortedInput(String),

    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not valid in the current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with GridShardError.
pub type Result<T> = std::result::Result<T, GridShardError>;

impl GridShardError {
    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        GridShardError::NotFound(msg.into())
    }

    /// Create a new already exists error.
    pub fn already_exists<S: Into<String>>(msg: S) -> Self {
        GridShardError::AlreadyExists(msg.into())
    }

    /// Create a new transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        GridShardError::Transport(msg.into())
    }

    /// Create a new corrupt encoding error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        GridShardError::CorruptEncoding(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GridShardError::Configuration(msg.into())
    }

    /// Create a new unsorted input error.
    pub fn unsorted<S: Into<String>>(msg: S) -> Self {
        GridShardError::UnsortedInput(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        GridShardError::InvalidArgument(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        GridShardError::InvalidOperation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        GridShardError::Other(msg.into())
    }

    /// Whether this error means the requested data is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            GridShardError::NotFound(_) => true,
            GridShardError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether this error came from the grid transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, GridShardError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = GridShardError::not_found("shard a");
        assert_eq!(error.to_string(), "Not found: shard a");

        let error = GridShardError::already_exists("a.index");
        assert_eq!(error.to_string(), "Already exists: a.index");

        let error = GridShardError::config("No grid endpoint configured");
        assert_eq!(
            error.to_string(),
            "Configuration error: No grid endpoint configured"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = GridShardError::from(io_error);

        match error {
            GridShardError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
        assert!(error.is_not_found());
    }

    #[test]
    fn test_classification() {
        assert!(GridShardError::transport("connection reset").is_transport());
        assert!(!GridShardError::corrupt("bad magic").is_transport());
        assert!(!GridShardError::corrupt("bad magic").is_not_found());
    }
}
