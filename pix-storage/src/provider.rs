use async_trait::async_trait;

use crate::{BlobReader, ByteStream, ProviderKind, StorageCtx, StorageResult};

/// Core blob storage operations - implemented once per backend kind.
///
/// Every method validates its identifier with [`crate::validate_identifier`]
/// before touching the backend, and normalizes backend failures into
/// [`crate::StorageError`]. Implementations must be safe for concurrent use by
/// many in-flight uploads.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Store a blob from a stream.
    ///
    /// Creates intermediate directories or collections as needed. A failed
    /// write never leaves a partial blob visible to `get` or `exists`.
    async fn save(&self, ctx: &StorageCtx, identifier: &str, data: ByteStream) -> StorageResult<()>;

    /// Open a blob for reading; `NotFound` if absent
    async fn get(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<BlobReader>;

    /// Delete a blob; `NotFound` if absent
    async fn delete(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<()>;

    async fn exists(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<bool>;

    /// Cheap, side-effect free reachability probe
    async fn health(&self, ctx: &StorageCtx) -> StorageResult<()>;

    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Release backend resources. Called by the registry once a replaced
    /// provider has been retired.
    async fn close(&self) {}
}
