#![allow(dead_code)]

use async_trait::async_trait;
use pix_storage::{
    BlobReader, ByteStream, DefaultProviderFactory, MemoryConfigSource, ProviderFactory,
    ProviderKind, RegistryConfig, StorageConfig, StorageCtx, StorageError, StorageProvider,
    StorageRegistry, StorageResult,
};
use pix_tasks::{TaskPool, TaskPoolConfig};
use pix_upload::{
    HookError, ImageCache, ImageRecord, ImageRepository, MemoryImageRepository, RepositoryError,
    UploadConfig, UploadPipeline,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Local provider with switches for the failure modes the pipeline must survive
pub struct TestProvider {
    inner: Arc<dyn StorageProvider>,
    gated: bool,
    switches: Arc<Switches>,
}

/// Shared by every provider the test factory builds
#[derive(Default)]
pub struct Switches {
    pub fail_deletes: AtomicBool,
    /// Notified once a gated save has written its blob
    pub saved: Notify,
    /// A gated save returns only after this is notified
    pub release: Notify,
}

#[async_trait]
impl StorageProvider for TestProvider {
    async fn save(&self, ctx: &StorageCtx, identifier: &str, data: ByteStream) -> StorageResult<()> {
        self.inner.save(ctx, identifier, data).await?;
        if self.gated {
            self.switches.saved.notify_one();
            self.switches.release.notified().await;
        }
        Ok(())
    }

    async fn get(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<BlobReader> {
        self.inner.get(ctx, identifier).await
    }

    async fn delete(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<()> {
        if self.switches.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(self.inner.name(), "disk went away"));
        }
        self.inner.delete(ctx, identifier).await
    }

    async fn exists(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<bool> {
        self.inner.exists(ctx, identifier).await
    }

    async fn health(&self, ctx: &StorageCtx) -> StorageResult<()> {
        self.inner.health(ctx).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }
}

/// Builds local providers; names starting with "gated" block after each save
pub struct TestFactory {
    pub switches: Arc<Switches>,
}

#[async_trait]
impl ProviderFactory for TestFactory {
    async fn build(&self, ctx: &StorageCtx, config: &StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> {
        let inner = DefaultProviderFactory.build(ctx, config).await?;
        Ok(Arc::new(TestProvider {
            inner,
            gated: config.name.starts_with("gated"),
            switches: self.switches.clone(),
        }))
    }
}

/// Memory repository with injectable failures
#[derive(Default)]
pub struct FlakyRepository {
    pub inner: MemoryImageRepository,
    pub fail_create: AtomicBool,
    pub fail_update: AtomicBool,
    /// Live lookups that pretend the record is not there yet
    pub blind_lookups: AtomicUsize,
}

impl FlakyRepository {
    fn blind(&self) -> bool {
        self.blind_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ImageRepository for FlakyRepository {
    async fn create(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RepositoryError::Backend("connection reset".to_string()));
        }
        self.inner.create(record).await
    }

    async fn get_by_hash(&self, content_hash: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        if self.blind() {
            return Ok(None);
        }
        self.inner.get_by_hash(content_hash).await
    }

    async fn get_deleted_by_hash(&self, content_hash: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        self.inner.get_deleted_by_hash(content_hash).await
    }

    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        if self.blind() {
            return Ok(None);
        }
        self.inner.get_by_identifier(identifier).await
    }

    async fn update(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(RepositoryError::Backend("connection reset".to_string()));
        }
        self.inner.update(record).await
    }
}

/// Counts hook calls
#[derive(Default)]
pub struct RecordingCache {
    pub warmed: AtomicUsize,
    pub invalidated: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl ImageCache for RecordingCache {
    async fn warm(&self, _record: &ImageRecord) -> Result<(), HookError> {
        self.warmed.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("cache unavailable".into());
        }
        Ok(())
    }

    async fn invalidate(&self, _identifier: &str) -> Result<(), HookError> {
        self.invalidated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub pipeline: UploadPipeline,
    pub registry: Arc<StorageRegistry>,
    pub source: Arc<MemoryConfigSource>,
    pub repo: Arc<FlakyRepository>,
    pub cache: Arc<RecordingCache>,
    pub tasks: Arc<TaskPool>,
    pub switches: Arc<Switches>,
    pub roots: TempDir,
    pub scratch: TempDir,
}

impl Harness {
    /// "disk" (id 1, default) and "archive" (id 2)
    pub async fn new() -> Self {
        Self::with(&["disk", "archive"], UploadConfig::new()).await
    }

    /// Local providers named `names`, ids from 1, the first being default
    pub async fn with(names: &[&str], config: UploadConfig) -> Self {
        let roots = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let configs: Vec<StorageConfig> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let config = StorageConfig::local(i as u64 + 1, *name, roots.path().join(name));
                if i == 0 {
                    config.as_default()
                } else {
                    config
                }
            })
            .collect();

        let switches = Arc::new(Switches::default());
        let source = Arc::new(MemoryConfigSource::new(configs));
        let registry = Arc::new(StorageRegistry::new(
            Arc::new(TestFactory {
                switches: switches.clone(),
            }),
            source.clone(),
            RegistryConfig::default().with_retire_grace(Duration::from_millis(200)),
        ));
        registry.load_from_source().await.unwrap();

        let repo = Arc::new(FlakyRepository::default());
        let cache = Arc::new(RecordingCache::default());
        let tasks = Arc::new(TaskPool::new(TaskPoolConfig::new().with_workers(2)));

        let pipeline = UploadPipeline::new(
            registry.clone(),
            repo.clone(),
            tasks.clone(),
            config.with_scratch_dir(scratch.path()),
        )
        .with_cache(cache.clone());

        Self {
            pipeline,
            registry,
            source,
            repo,
            cache,
            tasks,
            switches,
            roots,
            scratch,
        }
    }

    pub fn root(&self, provider: &str) -> PathBuf {
        self.roots.path().join(provider)
    }

    pub fn blob_path(&self, provider: &str, record: &ImageRecord) -> PathBuf {
        self.root(provider).join(self.pipeline.blob_key(record))
    }

    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch.path()).unwrap().count() == 0
    }
}

/// Regular files below `dir`
pub fn count_files(dir: &Path) -> usize {
    let mut count = 0;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                count += count_files(&path);
            } else {
                count += 1;
            }
        }
    }
    count
}

/// JPEG magic followed by filler; `seed` varies the content
pub fn jpeg_bytes(len: usize, seed: u8) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    let mut i: usize = 0;
    while data.len() < len {
        data.push((i as u8).wrapping_mul(31).wrapping_add(seed));
        i += 1;
    }
    data
}

/// A real PNG of the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn ctx() -> StorageCtx {
    StorageCtx::new().with_actor("user-1")
}

pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::Digest;
    hex::encode(sha2::Sha256::digest(data))
}
