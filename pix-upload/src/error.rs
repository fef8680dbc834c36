use pix_storage::StorageError;
use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors from the metadata repository collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Unique constraint violation, e.g. a racing insert of the same content hash
    #[error("Conflict on {field}: {value}")]
    Conflict { field: String, value: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Repository error: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn conflict(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Conflict {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Upload pipeline errors
#[derive(Error, Debug)]
pub enum UploadError {
    /// Rejected before any storage I/O
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A live record whose blob is missing from storage
    #[error("Image {identifier} has no stored blob")]
    Orphan { identifier: String },

    /// Blob written, metadata failed, and the rollback delete failed too
    #[error("Upload of {identifier} failed and blob {key} could not be cleaned up: {reason}")]
    CompensationFailed {
        identifier: String,
        key: String,
        reason: String,
    },

    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Client disconnects and deadlines are not faults
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Storage(err) => err.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::Storage(err) => err.is_validation(),
            _ => false,
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled => Self::Cancelled,
            other => Self::Storage(other),
        }
    }
}
