use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::{StorageConfig, StorageConfigId, StorageError, StorageResult};

/// Where the registry reads (already decrypted) storage configs from
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load_all(&self) -> StorageResult<Vec<StorageConfig>>;

    async fn load(&self, id: StorageConfigId) -> StorageResult<StorageConfig>;
}

/// In-process config source
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    configs: RwLock<BTreeMap<StorageConfigId, StorageConfig>>,
}

impl MemoryConfigSource {
    pub fn new(configs: Vec<StorageConfig>) -> Self {
        Self {
            configs: RwLock::new(configs.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    /// Insert or replace a config
    pub fn upsert(&self, config: StorageConfig) {
        self.configs.write().insert(config.id, config);
    }

    pub fn remove(&self, id: StorageConfigId) -> Option<StorageConfig> {
        self.configs.write().remove(&id)
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn load_all(&self) -> StorageResult<Vec<StorageConfig>> {
        Ok(self.configs.read().values().cloned().collect())
    }

    async fn load(&self, id: StorageConfigId) -> StorageResult<StorageConfig> {
        self.configs
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("storage config {id}")))
    }
}
