use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    validate_identifier, BlobReader, ByteStream, ProviderKind, StorageCtx, StorageError,
    StorageProvider, StorageResult,
};

/// Local filesystem provider.
///
/// Blobs live at `<root>/<identifier>`. Writes go to a hidden temp file in the
/// target directory and are renamed into place only after the whole stream
/// has been written and synced, so readers never observe a partial blob.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    name: String,
    root: PathBuf,
}

impl LocalProvider {
    /// Create the provider, creating and canonicalizing the root directory
    pub async fn new<S: Into<String>, P: Into<PathBuf>>(name: S, root: P) -> StorageResult<Self> {
        let root = root.into();
        let name = name.into();

        if let Ok(meta) = fs::metadata(&root).await {
            if !meta.is_dir() {
                return Err(StorageError::config(format!(
                    "{} is not a directory",
                    root.display()
                )));
            }
        }

        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;
        debug!(provider = %name, root = %root.display(), "Local provider ready");

        Ok(Self { name, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a validated identifier to a path under the root
    fn resolve(&self, identifier: &str) -> StorageResult<(String, PathBuf)> {
        let id = validate_identifier(identifier)?;

        let mut path = self.root.clone();
        for segment in id.split('/') {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => path.push(segment),
                _ => {
                    return Err(StorageError::invalid_path(
                        identifier,
                        "segment does not resolve to a plain name",
                    ))
                }
            }
        }

        if !path.starts_with(&self.root) || path == self.root {
            return Err(StorageError::invalid_path(
                identifier,
                "resolves outside the storage root",
            ));
        }
        Ok((id, path))
    }

    /// Symlink check: the real location of `dir` must still be under the root
    async fn ensure_within_root(&self, id: &str, dir: &Path) -> StorageResult<()> {
        let resolved = fs::canonicalize(dir)
            .await
            .map_err(|e| StorageError::from_io(e, id))?;
        if resolved.starts_with(&self.root) {
            Ok(())
        } else {
            warn!(provider = %self.name, identifier = %id, "Path escapes storage root via symlink");
            Err(StorageError::invalid_path(id, "resolves outside the storage root"))
        }
    }

    fn parent_of<'a>(&self, id: &str, path: &'a Path) -> StorageResult<&'a Path> {
        path.parent()
            .ok_or_else(|| StorageError::invalid_path(id, "identifier has no parent directory"))
    }
}

/// Removes the temp file unless the write was committed.
///
/// Also runs when the save future is dropped on cancellation.
struct TempFileGuard {
    path: PathBuf,
    committed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    #[instrument(skip(self, ctx, data), fields(provider = %self.name, request_id = %ctx.request_id))]
    async fn save(&self, ctx: &StorageCtx, identifier: &str, mut data: ByteStream) -> StorageResult<()> {
        let (id, path) = self.resolve(identifier)?;

        ctx.run(async {
            let parent = self.parent_of(&id, &path)?;
            fs::create_dir_all(parent).await?;
            self.ensure_within_root(&id, parent).await?;

            if let Ok(meta) = fs::metadata(&path).await {
                if meta.is_dir() {
                    return Err(StorageError::invalid_path(&id, "a directory exists at this path"));
                }
            }

            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
            let guard = TempFileGuard::new(temp_path.clone());

            let mut file = fs::File::create(&temp_path).await?;
            let mut written: u64 = 0;
            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            drop(file);

            fs::rename(&temp_path, &path).await?;
            guard.commit();

            debug!(identifier = %id, bytes = written, "Blob written");
            Ok(())
        })
        .await
    }

    async fn get(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<BlobReader> {
        let (id, path) = self.resolve(identifier)?;

        ctx.run(async {
            let parent = self.parent_of(&id, &path)?;
            self.ensure_within_root(&id, parent).await?;

            let file = fs::File::open(&path)
                .await
                .map_err(|e| StorageError::from_io(e, &id))?;
            let meta = file.metadata().await?;
            if !meta.is_file() {
                return Err(StorageError::not_found(&id));
            }
            Ok(Box::new(file) as BlobReader)
        })
        .await
    }

    async fn delete(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<()> {
        let (id, path) = self.resolve(identifier)?;

        ctx.run(async {
            let parent = self.parent_of(&id, &path)?;
            self.ensure_within_root(&id, parent).await?;

            fs::remove_file(&path)
                .await
                .map_err(|e| StorageError::from_io(e, &id))
        })
        .await
    }

    async fn exists(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<bool> {
        let (id, path) = self.resolve(identifier)?;

        ctx.run(async {
            let parent = self.parent_of(&id, &path)?;
            match self.ensure_within_root(&id, parent).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            }

            match fs::metadata(&path).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn health(&self, ctx: &StorageCtx) -> StorageResult<()> {
        ctx.run(async {
            let meta = fs::metadata(&self.root)
                .await
                .map_err(|e| StorageError::unavailable(&self.name, e.to_string()))?;
            if !meta.is_dir() {
                return Err(StorageError::unavailable(&self.name, "root is not a directory"));
            }
            let mut entries = fs::read_dir(&self.root)
                .await
                .map_err(|e| StorageError::unavailable(&self.name, e.to_string()))?;
            entries
                .next_entry()
                .await
                .map_err(|e| StorageError::unavailable(&self.name, e.to_string()))?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }
}
