use chrono::Utc;
use futures::StreamExt;
use pix_storage::{ProviderRef, StorageCtx, StorageRegistry};
use pix_tasks::TaskPool;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::sniff::{detect_mime, extension_for, read_dimensions};
use crate::{
    derive_identifier, scratch::tee_to_scratch, BatchReport, BlobKeyStrategy, ContentKeyStrategy,
    DerivedAssets, FileUploadReport, ImageCache, ImageRecord, ImageRepository, NoDerivedAssets,
    NoopCache, OpenedImage, RepositoryError, UploadConfig, UploadError, UploadOutcome,
    UploadRequest, UploadResult,
};

/// Turns uploaded byte streams into deduplicated, content-addressed images.
///
/// Per upload: spool and hash, look up the hash, then either return the
/// existing record, restore a soft-deleted one, or validate, store the blob
/// and create the record. The blob is always written before the record; if
/// the record cannot be written the blob is deleted again.
pub struct UploadPipeline {
    registry: Arc<StorageRegistry>,
    repository: Arc<dyn ImageRepository>,
    tasks: Arc<TaskPool>,
    cache: Arc<dyn ImageCache>,
    derived: Arc<dyn DerivedAssets>,
    keys: Arc<dyn BlobKeyStrategy>,
    config: UploadConfig,
}

impl UploadPipeline {
    pub fn new(
        registry: Arc<StorageRegistry>,
        repository: Arc<dyn ImageRepository>,
        tasks: Arc<TaskPool>,
        config: UploadConfig,
    ) -> Self {
        Self {
            registry,
            repository,
            tasks,
            cache: Arc::new(NoopCache),
            derived: Arc::new(NoDerivedAssets),
            keys: Arc::new(ContentKeyStrategy),
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_derived_assets(mut self, derived: Arc<dyn DerivedAssets>) -> Self {
        self.derived = derived;
        self
    }

    pub fn with_key_strategy(mut self, keys: Arc<dyn BlobKeyStrategy>) -> Self {
        self.keys = keys;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Provider key for a record
    pub fn blob_key(&self, record: &ImageRecord) -> String {
        self.keys
            .object_key(&record.identifier, extension_for(&record.mime_type))
    }

    /// Upload one file
    #[instrument(
        skip(self, ctx, request),
        fields(request_id = %ctx.request_id, file = %request.file_name, storage = %request.storage)
    )]
    pub async fn upload(&self, ctx: &StorageCtx, request: UploadRequest) -> UploadResult<UploadOutcome> {
        if ctx.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let UploadRequest {
            file_name,
            storage,
            data,
        } = request;

        let scratch = tee_to_scratch(ctx, data, &self.config).await?;
        let hash = scratch.content_hash.clone();
        debug!(hash = %hash, size = scratch.size, "Upload spooled");

        if let Some(existing) = self.repository.get_by_hash(&hash).await? {
            info!(identifier = %existing.identifier, "Duplicate content, reusing existing image");
            self.schedule_side_effects(&existing);
            return Ok(UploadOutcome {
                record: existing,
                is_duplicate: true,
                restored: false,
            });
        }

        let provider = self.registry.get_by_name(&storage)?;

        if let Some(deleted) = self.repository.get_deleted_by_hash(&hash).await? {
            return self
                .restore(ctx, deleted, &scratch, &provider, file_name)
                .await;
        }

        let mime_type = match detect_mime(&scratch.head) {
            Some(mime) if self.config.is_allowed(mime) => mime,
            Some(mime) => {
                return Err(UploadError::validation(format!(
                    "content type {mime} is not an accepted image type"
                )))
            }
            None => return Err(UploadError::validation("content is not a recognized image")),
        };

        let identifier = derive_identifier(&hash, self.config.identifier_len);
        if let Some(holder) = self.repository.get_by_identifier(&identifier).await? {
            if holder.content_hash == hash && !holder.is_deleted() {
                info!(identifier = %identifier, "Concurrent upload stored the same content first");
                self.schedule_side_effects(&holder);
                return Ok(UploadOutcome {
                    record: holder,
                    is_duplicate: true,
                    restored: false,
                });
            }
            // Different content behind the same truncated hash; never overwrite its blob
            warn!(
                identifier = %identifier,
                existing_hash = %holder.content_hash,
                hash = %hash,
                "Identifier collision between distinct contents"
            );
            return Err(RepositoryError::conflict("identifier", identifier).into());
        }

        let key = self.keys.object_key(&identifier, extension_for(mime_type));
        let (width, height) = read_dimensions(scratch.path().to_path_buf()).await;

        // Nothing to compensate if this fails
        provider.save(ctx, &key, scratch.stream().await?).await?;
        debug!(key = %key, provider = %provider.name, "Blob stored");

        if let Err(interrupted) = ctx.check() {
            info!(identifier = %identifier, reason = %interrupted, "Upload interrupted after blob write, rolling back");
            self.compensate(ctx, &provider, &identifier, &key, "cancelled before metadata write")
                .await?;
            return Err(interrupted.into());
        }

        let record = ImageRecord {
            identifier: identifier.clone(),
            content_hash: hash.clone(),
            original_name: file_name,
            size: scratch.size,
            mime_type: mime_type.to_string(),
            storage_config_id: provider.id,
            width,
            height,
            owner_id: ctx.actor_id.clone(),
            created_at: Utc::now(),
            deleted_at: None,
        };

        match self.repository.create(&record).await {
            Ok(()) => {
                info!(
                    identifier = %identifier,
                    provider = %provider.name,
                    size = record.size,
                    mime = %record.mime_type,
                    "Image stored"
                );
                self.schedule_side_effects(&record);
                Ok(UploadOutcome {
                    record,
                    is_duplicate: false,
                    restored: false,
                })
            }
            Err(err) if err.is_conflict() => {
                // A racing upload of the same bytes won; its blob sits at the same key
                match self.repository.get_by_hash(&hash).await? {
                    Some(winner) => {
                        info!(identifier = %winner.identifier, "Lost create race, returning existing image");
                        self.schedule_side_effects(&winner);
                        Ok(UploadOutcome {
                            record: winner,
                            is_duplicate: true,
                            restored: false,
                        })
                    }
                    None => {
                        self.compensate(ctx, &provider, &identifier, &key, "metadata conflict")
                            .await?;
                        Err(err.into())
                    }
                }
            }
            Err(err) => {
                // Same hash, same key: a concurrent upload that did get recorded owns this blob now
                if let Ok(Some(winner)) = self.repository.get_by_hash(&hash).await {
                    if winner.identifier == identifier {
                        warn!(
                            identifier = %identifier,
                            error = %err,
                            "Metadata write failed, blob kept for the concurrent upload that recorded it"
                        );
                        return Err(err.into());
                    }
                }
                warn!(identifier = %identifier, error = %err, "Metadata write failed, rolling back blob");
                self.compensate(ctx, &provider, &identifier, &key, "metadata write failed")
                    .await?;
                Err(err.into())
            }
        }
    }

    /// Bring a soft-deleted record back.
    ///
    /// A blob still present on the record's own provider stays where it is,
    /// whatever provider was requested. Only a missing blob is written again,
    /// to the requested provider, so one hash never has two blobs.
    async fn restore(
        &self,
        ctx: &StorageCtx,
        deleted: ImageRecord,
        scratch: &crate::scratch::Scratch,
        requested: &ProviderRef,
        file_name: String,
    ) -> UploadResult<UploadOutcome> {
        let key = self.blob_key(&deleted);

        let mut holder = None;
        match self.registry.get_by_id(deleted.storage_config_id) {
            Ok(original) => {
                if original.exists(ctx, &key).await? {
                    holder = Some(original);
                }
            }
            Err(err) => {
                debug!(
                    identifier = %deleted.identifier,
                    storage_config_id = %deleted.storage_config_id,
                    error = %err,
                    "Provider of the soft-deleted image is gone"
                );
            }
        }

        let (provider, wrote) = match holder {
            Some(original) => {
                if original.id != requested.id {
                    debug!(
                        identifier = %deleted.identifier,
                        kept = %original.name,
                        requested = %requested.name,
                        "Blob still present, restoring in place"
                    );
                }
                (original, false)
            }
            None => {
                if requested.exists(ctx, &key).await? {
                    (requested.clone(), false)
                } else {
                    requested.save(ctx, &key, scratch.stream().await?).await?;
                    (requested.clone(), true)
                }
            }
        };

        if wrote {
            if let Err(interrupted) = ctx.check() {
                self.compensate(ctx, &provider, &deleted.identifier, &key, "cancelled before restore")
                    .await?;
                return Err(interrupted.into());
            }
        }

        let mut restored = deleted;
        restored.deleted_at = None;
        restored.original_name = file_name;
        restored.owner_id = ctx.actor_id.clone();
        restored.storage_config_id = provider.id;

        if let Err(err) = self.repository.update(&restored).await {
            warn!(identifier = %restored.identifier, error = %err, "Restore failed");
            if wrote {
                self.compensate(ctx, &provider, &restored.identifier, &key, "restore update failed")
                    .await?;
            }
            return Err(err.into());
        }

        info!(
            identifier = %restored.identifier,
            provider = %provider.name,
            blob_rewritten = wrote,
            "Soft-deleted image restored"
        );
        self.schedule_side_effects(&restored);
        Ok(UploadOutcome {
            record: restored,
            is_duplicate: true,
            restored: true,
        })
    }

    /// Upload several files with bounded concurrency.
    ///
    /// Results keep the input order. One file failing does not affect the
    /// others; cancelling `ctx` stops every item that has not finished.
    #[instrument(skip(self, ctx, requests), fields(request_id = %ctx.request_id, files = requests.len()))]
    pub async fn upload_batch(
        &self,
        ctx: &StorageCtx,
        requests: Vec<UploadRequest>,
    ) -> UploadResult<BatchReport> {
        if requests.len() > self.config.max_batch_files {
            return Err(UploadError::validation(format!(
                "batch of {} files exceeds the limit of {}",
                requests.len(),
                self.config.max_batch_files
            )));
        }

        let batch_ctx = ctx.child();
        let items: Vec<FileUploadReport> = futures::stream::iter(requests)
            .map(|request| {
                let item_ctx = batch_ctx.child();
                async move {
                    let file_name = request.file_name.clone();
                    match self.upload(&item_ctx, request).await {
                        Ok(outcome) => FileUploadReport::success(file_name, &outcome),
                        Err(err) => {
                            if err.is_cancelled() {
                                debug!(file = %file_name, "Batch item cancelled");
                            } else {
                                warn!(file = %file_name, error = %err, "Batch item failed");
                            }
                            FileUploadReport::failure(file_name, &err)
                        }
                    }
                }
            })
            .buffered(self.config.batch_concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport::from_items(items);
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            duplicates = report.duplicates,
            "Batch upload finished"
        );
        Ok(report)
    }

    /// Open a live image for reading
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn open(&self, ctx: &StorageCtx, identifier: &str) -> UploadResult<OpenedImage> {
        let record = self
            .repository
            .get_by_identifier(identifier)
            .await?
            .filter(|record| !record.is_deleted())
            .ok_or_else(|| RepositoryError::NotFound(identifier.to_string()))?;

        let provider = self.registry.get_by_id(record.storage_config_id)?;
        let key = self.blob_key(&record);

        match provider.get(ctx, &key).await {
            Ok(reader) => Ok(OpenedImage { record, reader }),
            Err(err) if err.is_not_found() => {
                error!(
                    identifier = %identifier,
                    key = %key,
                    provider = %provider.name,
                    "Image record references a missing blob"
                );
                Err(UploadError::Orphan {
                    identifier: identifier.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Soft-delete a live image. The blob is kept so a re-upload can restore it.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn soft_delete(&self, ctx: &StorageCtx, identifier: &str) -> UploadResult<ImageRecord> {
        if ctx.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let mut record = self
            .repository
            .get_by_identifier(identifier)
            .await?
            .filter(|record| !record.is_deleted())
            .ok_or_else(|| RepositoryError::NotFound(identifier.to_string()))?;

        record.deleted_at = Some(Utc::now());
        self.repository.update(&record).await?;
        info!(identifier = %identifier, "Image soft-deleted");

        let cache = self.cache.clone();
        let id = record.identifier.clone();
        if let Err(err) = self
            .tasks
            .submit(format!("cache-invalidate:{id}"), async move { cache.invalidate(&id).await })
        {
            warn!(identifier = %identifier, error = %err, "Could not schedule cache invalidation");
        }
        Ok(record)
    }

    /// Delete a just-written blob on a context the caller cannot cancel
    async fn compensate(
        &self,
        ctx: &StorageCtx,
        provider: &ProviderRef,
        identifier: &str,
        key: &str,
        reason: &str,
    ) -> UploadResult<()> {
        let cleanup = ctx.detached(self.config.compensation_timeout);
        match provider.delete(&cleanup, key).await {
            Ok(()) => {
                info!(identifier = %identifier, key = %key, reason, "Blob write rolled back");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                debug!(identifier = %identifier, key = %key, "Blob already absent during rollback");
                Ok(())
            }
            Err(err) => {
                error!(
                    critical = true,
                    identifier = %identifier,
                    key = %key,
                    provider = %provider.name,
                    reason,
                    error = %err,
                    "Rollback delete failed, manual cleanup required"
                );
                Err(UploadError::CompensationFailed {
                    identifier: identifier.to_string(),
                    key: key.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Best effort: cache warm and derived assets never fail the upload
    fn schedule_side_effects(&self, record: &ImageRecord) {
        let cache = self.cache.clone();
        let warm_record = record.clone();
        if let Err(err) = self.tasks.submit(
            format!("cache-warm:{}", record.identifier),
            async move { cache.warm(&warm_record).await },
        ) {
            warn!(identifier = %record.identifier, error = %err, "Could not schedule cache warm");
        }

        let derived = self.derived.clone();
        let derive_record = record.clone();
        if let Err(err) = self.tasks.submit(
            format!("derived-assets:{}", record.identifier),
            async move { derived.generate(&derive_record).await },
        ) {
            warn!(identifier = %record.identifier, error = %err, "Could not schedule derived assets");
        }
    }
}
