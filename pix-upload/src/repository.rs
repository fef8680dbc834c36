use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::{ImageRecord, RepositoryError};

/// Metadata store for image records.
///
/// Implementations must enforce uniqueness of `content_hash` (live and
/// soft-deleted records alike) and of `identifier`, reporting violations as
/// [`RepositoryError::Conflict`]. The pipeline relies on that constraint to
/// settle racing uploads of the same content.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn create(&self, record: &ImageRecord) -> Result<(), RepositoryError>;

    /// Live (not soft-deleted) record with this hash
    async fn get_by_hash(&self, content_hash: &str) -> Result<Option<ImageRecord>, RepositoryError>;

    /// Soft-deleted record with this hash
    async fn get_deleted_by_hash(&self, content_hash: &str) -> Result<Option<ImageRecord>, RepositoryError>;

    /// Record with this identifier, soft-deleted or not
    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<ImageRecord>, RepositoryError>;

    /// Replace an existing record, matched by identifier
    async fn update(&self, record: &ImageRecord) -> Result<(), RepositoryError>;
}

/// In-process repository with the same uniqueness rules as a real table
#[derive(Debug, Default)]
pub struct MemoryImageRepository {
    records: RwLock<HashMap<String, ImageRecord>>,
}

impl MemoryImageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// All records, ordered by identifier
    pub fn records(&self) -> Vec<ImageRecord> {
        let mut records: Vec<ImageRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        records
    }
}

#[async_trait]
impl ImageRepository for MemoryImageRepository {
    async fn create(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        if records.values().any(|r| r.content_hash == record.content_hash) {
            return Err(RepositoryError::conflict("content_hash", &record.content_hash));
        }
        if records.contains_key(&record.identifier) {
            return Err(RepositoryError::conflict("identifier", &record.identifier));
        }
        records.insert(record.identifier.clone(), record.clone());
        Ok(())
    }

    async fn get_by_hash(&self, content_hash: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        Ok(self
            .records
            .read()
            .values()
            .find(|r| r.content_hash == content_hash && !r.is_deleted())
            .cloned())
    }

    async fn get_deleted_by_hash(&self, content_hash: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        Ok(self
            .records
            .read()
            .values()
            .find(|r| r.content_hash == content_hash && r.is_deleted())
            .cloned())
    }

    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        Ok(self.records.read().get(identifier).cloned())
    }

    async fn update(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        match records.get_mut(&record.identifier) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(record.identifier.clone())),
        }
    }
}
