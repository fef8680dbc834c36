use chrono::{DateTime, Utc};
use pix_storage::StorageConfigId;
use serde::{Deserialize, Serialize};

/// Metadata for one stored image; one record per distinct content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub identifier: String,
    /// Lowercase hex SHA-256 of the full content
    pub content_hash: String,
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
    pub storage_config_id: StorageConfigId,
    pub width: u32,
    pub height: u32,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ImageRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
