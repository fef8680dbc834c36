use async_trait::async_trait;

use crate::ImageRecord;

/// Error type for best-effort side effects
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Write-behind cache for image metadata
#[async_trait]
pub trait ImageCache: Send + Sync {
    async fn warm(&self, record: &ImageRecord) -> Result<(), HookError>;

    async fn invalidate(&self, identifier: &str) -> Result<(), HookError>;
}

/// Trigger for derived assets such as thumbnails
#[async_trait]
pub trait DerivedAssets: Send + Sync {
    async fn generate(&self, record: &ImageRecord) -> Result<(), HookError>;
}

/// Cache that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl ImageCache for NoopCache {
    async fn warm(&self, _record: &ImageRecord) -> Result<(), HookError> {
        Ok(())
    }

    async fn invalidate(&self, _identifier: &str) -> Result<(), HookError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDerivedAssets;

#[async_trait]
impl DerivedAssets for NoDerivedAssets {
    async fn generate(&self, _record: &ImageRecord) -> Result<(), HookError> {
        Ok(())
    }
}
