use thiserror::Error;

use crate::StorageConfigId;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur at the provider and registry boundary.
///
/// Backend-specific failures (S3 SDK errors, HTTP status codes, OS errors)
/// are normalized into these variants before they leave a provider.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Not found: {id}")]
    NotFound { id: String },

    #[error("Storage provider {provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out")]
    Timeout,

    #[error("Invalid storage configuration: {message}")]
    Config { message: String },

    #[error("Provider {id} is the default and cannot be removed")]
    DefaultProviderRemoval { id: StorageConfigId },

    #[error("No storage provider could be admitted ({attempted} attempted)")]
    NoProvidersAdmitted { attempted: usize },
}

impl StorageError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create a backend error from a plain message
    pub fn backend_msg<S: Into<String>>(message: S) -> Self {
        let message: String = message.into();
        Self::Backend {
            source: message.into(),
        }
    }

    /// Create an invalid path error
    pub fn invalid_path<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an unavailable error for a named provider
    pub fn unavailable<P: Into<String>, R: Into<String>>(provider: P, reason: R) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Cancellation and deadline expiry are caller outcomes, not backend faults
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidPath { .. } | Self::Config { .. })
    }

    /// Map an I/O error, turning `ErrorKind::NotFound` into a typed miss
    pub(crate) fn from_io(err: std::io::Error, id: &str) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::not_found(id)
        } else {
            Self::Io { source: err }
        }
    }
}
