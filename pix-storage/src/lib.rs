//! # pix-storage: pluggable blob storage for image uploads
//!
//! `pix-storage` stores opaque blobs under relative, `/`-separated
//! identifiers on one of several backends, and keeps a live registry of the
//! configured backends that can be reloaded without a restart.
//!
//! ## Key Features
//!
//! - **One contract, several backends**: local disk, S3-compatible object stores, WebDAV
//! - **Safe identifiers**: every path is normalized and validated before any I/O
//! - **No partial blobs**: a failed write is never visible to readers
//! - **Hot reload**: swap a backend's config while uploads against it are in flight
//! - **Cancellation**: every call takes a [`StorageCtx`] carrying a token and a deadline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pix_storage::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> StorageResult<()> {
//! let source = Arc::new(MemoryConfigSource::new(vec![
//!     StorageConfig::local(1, "disk", "/srv/images").as_default(),
//! ]));
//! let registry = StorageRegistry::new(
//!     Arc::new(DefaultProviderFactory),
//!     source,
//!     RegistryConfig::from_env(),
//! );
//! registry.load_from_source().await?;
//!
//! let ctx = StorageCtx::new().with_actor("user-123");
//! let provider = registry.get_by_name("")?;
//! provider.save(&ctx, "ab/cd/abcdef123456.png", bytes_stream(&b"..."[..])).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  StorageRegistry │  ← id/name → provider, default, hot reload
//! ├──────────────────┤
//! │ ProviderFactory  │  ← config → provider
//! ├──────────────────┤
//! │ StorageProvider  │  ← save / get / delete / exists / health
//! └──────────────────┘
//! ```

mod config;
mod context;
mod error;
mod factory;
mod local_store;
mod path;
pub mod provider;
mod registry;
mod s3_store;
mod source;
mod types;
mod webdav_store;

// Re-export main types for clean API
pub use config::{ProviderKind, RegistryConfig, StorageBackend, StorageConfig, StorageConfigId};
pub use context::StorageCtx;
pub use error::{StorageError, StorageResult};
pub use factory::{DefaultProviderFactory, ProviderFactory};
pub use local_store::LocalProvider;
pub use path::{parent_segments, validate_identifier, MAX_IDENTIFIER_LEN};
pub use provider::StorageProvider;
pub use registry::{ProviderHealth, ProviderInfo, ProviderRef, StorageRegistry};
pub use s3_store::{ObjectStoreProvider, S3Config};
pub use source::{ConfigSource, MemoryConfigSource};
pub use types::{bytes_stream, collect_stream, read_to_bytes, BlobReader, ByteStream, SeekableRead};
pub use webdav_store::{WebDavConfig, WebDavProvider};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        bytes_stream, read_to_bytes, ConfigSource, DefaultProviderFactory, MemoryConfigSource,
        ProviderRef, RegistryConfig, StorageConfig, StorageConfigId, StorageCtx, StorageError,
        StorageProvider, StorageRegistry, StorageResult,
    };
}
