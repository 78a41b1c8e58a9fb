//! Error types and result aliases for Smelt.
//!
//! This module defines the shared error types used across all Smelt
//! components. Errors are structured for programmatic handling and include
//! context for debugging.

/// The result type used throughout Smelt.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Smelt operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the id invalid.
        message: String,
    },

    /// A filesystem operation on a compilation artifact failed.
    #[error("artifact I/O error at {path}: {message}")]
    ArtifactIo {
        /// The path the operation targeted.
        path: String,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new artifact I/O error with the given path and message.
    #[must_use]
    pub fn artifact_io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArtifactIo {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new artifact I/O error with a source cause.
    #[must_use]
    pub fn artifact_io_with_source(
        path: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ArtifactIo {
            path: path.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn invalid_input_display() {
        let err = Error::InvalidInput("empty project name".into());
        assert!(err.to_string().contains("invalid input"));
    }

    #[test]
    fn artifact_io_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "missing dir");
        let err = Error::artifact_io_with_source("/tmp/classes", "failed to delete", source);
        assert!(err.to_string().contains("artifact I/O error"));
        assert!(StdError::source(&err).is_some());
    }
}
