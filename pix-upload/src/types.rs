use bytes::Bytes;
use pix_storage::{bytes_stream, BlobReader, ByteStream};
use serde::{Deserialize, Serialize};

use crate::{ImageRecord, UploadError};

/// One file to upload
pub struct UploadRequest {
    pub file_name: String,
    /// Provider name; empty selects the default provider
    pub storage: String,
    pub data: ByteStream,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, data: ByteStream) -> Self {
        Self {
            file_name: file_name.into(),
            storage: String::new(),
            data,
        }
    }

    /// Upload from an in-memory buffer
    pub fn from_bytes(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(file_name, bytes_stream(data))
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = storage.into();
        self
    }
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("file_name", &self.file_name)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// Result of a single successful upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub record: ImageRecord,
    /// Content was already known; nothing new was stored
    pub is_duplicate: bool,
    /// A soft-deleted record was brought back
    pub restored: bool,
}

/// An opened image: its record plus a reader over the blob
pub struct OpenedImage {
    pub record: ImageRecord,
    pub reader: BlobReader,
}

/// Per-file upload result handed to the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadReport {
    pub identifier: String,
    pub is_duplicate: bool,
    pub file_name: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileUploadReport {
    pub fn success(file_name: impl Into<String>, outcome: &UploadOutcome) -> Self {
        Self {
            identifier: outcome.record.identifier.clone(),
            is_duplicate: outcome.is_duplicate,
            file_name: file_name.into(),
            file_size: outcome.record.size,
            error: None,
        }
    }

    pub fn failure(file_name: impl Into<String>, error: &UploadError) -> Self {
        let message = if error.is_cancelled() {
            "cancelled".to_string()
        } else {
            error.to_string()
        };
        Self {
            identifier: String::new(),
            is_duplicate: false,
            file_name: file_name.into(),
            file_size: 0,
            error: Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Ordered per-file results of a batch plus aggregate counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub items: Vec<FileUploadReport>,
    pub succeeded: usize,
    pub failed: usize,
    pub duplicates: usize,
}

impl BatchReport {
    pub fn from_items(items: Vec<FileUploadReport>) -> Self {
        let succeeded = items.iter().filter(|i| i.is_success()).count();
        let duplicates = items.iter().filter(|i| i.is_success() && i.is_duplicate).count();
        Self {
            failed: items.len() - succeeded,
            succeeded,
            duplicates,
            items,
        }
    }
}
