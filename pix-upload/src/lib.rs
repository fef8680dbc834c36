//! # pix-upload: deduplicating image uploads
//!
//! Turns an uploaded byte stream into a content-addressed image: the stream
//! is read once into a scratch file while it is hashed, the hash decides
//! whether the content is new, and only new content is sniffed, stored on a
//! [`pix_storage`] provider and recorded in the [`ImageRepository`].
//!
//! ## Guarantees
//!
//! - Identical bytes are stored once; later uploads resolve to the same identifier
//! - Soft-deleted images are restored rather than re-created
//! - Blob first, metadata second; a failed metadata write deletes the blob again
//! - Cache warming and derived assets run on a [`pix_tasks::TaskPool`] and never fail an upload
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pix_storage::prelude::*;
//! use pix_tasks::{TaskPool, TaskPoolConfig};
//! use pix_upload::{MemoryImageRepository, UploadConfig, UploadPipeline, UploadRequest};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(StorageRegistry::new(
//!     Arc::new(DefaultProviderFactory),
//!     Arc::new(MemoryConfigSource::new(vec![
//!         StorageConfig::local(1, "disk", "/srv/images").as_default(),
//!     ])),
//!     RegistryConfig::default(),
//! ));
//! registry.load_from_source().await?;
//!
//! let pipeline = UploadPipeline::new(
//!     registry,
//!     Arc::new(MemoryImageRepository::new()),
//!     Arc::new(TaskPool::new(TaskPoolConfig::default())),
//!     UploadConfig::from_env(),
//! );
//!
//! let ctx = StorageCtx::new().with_actor("user-123");
//! let jpeg: Vec<u8> = std::fs::read("cat.jpg")?;
//! let outcome = pipeline.upload(&ctx, UploadRequest::from_bytes("cat.jpg", jpeg)).await?;
//! println!("{} duplicate={}", outcome.record.identifier, outcome.is_duplicate);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod hooks;
mod keys;
mod pipeline;
mod record;
mod repository;
pub mod scratch;
pub mod sniff;
mod types;

pub use config::{UploadConfig, DEFAULT_ALLOWED_MIME_TYPES, MAX_IDENTIFIER_LEN, MIN_IDENTIFIER_LEN};
pub use error::{RepositoryError, UploadError, UploadResult};
pub use hooks::{DerivedAssets, HookError, ImageCache, NoDerivedAssets, NoopCache};
pub use keys::{derive_identifier, BlobKeyStrategy, ContentKeyStrategy};
pub use pipeline::UploadPipeline;
pub use record::ImageRecord;
pub use repository::{ImageRepository, MemoryImageRepository};
pub use types::{BatchReport, FileUploadReport, OpenedImage, UploadOutcome, UploadRequest};
