use futures::StreamExt;
use pix_storage::{ByteStream, StorageCtx, StorageError};
use sha2::{Digest, Sha256};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::{UploadConfig, UploadError, UploadResult};

/// Upload content spooled to a temp file, with its hash and leading bytes.
///
/// The temp file is removed when this value is dropped, whichever way the
/// upload ends.
pub struct Scratch {
    file: NamedTempFile,
    pub size: u64,
    /// Lowercase hex SHA-256
    pub content_hash: String,
    /// First `sniff_bytes` bytes, for content detection
    pub head: Vec<u8>,
}

impl Scratch {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Fresh stream over the spooled content
    pub async fn stream(&self) -> UploadResult<ByteStream> {
        let file = tokio::fs::File::open(self.path())
            .await
            .map_err(StorageError::from)?;
        Ok(Box::pin(ReaderStream::new(file)))
    }
}

/// Read `data` once, writing it to scratch while hashing it.
///
/// Enforces the size limit as bytes arrive and rejects empty uploads.
pub async fn tee_to_scratch(
    ctx: &StorageCtx,
    mut data: ByteStream,
    config: &UploadConfig,
) -> UploadResult<Scratch> {
    let temp = tempfile::Builder::new()
        .prefix(".pixrs-upload-")
        .suffix(".part")
        .tempfile_in(&config.scratch_dir)
        .map_err(StorageError::from)?;
    let mut out = tokio::fs::File::from_std(temp.reopen().map_err(StorageError::from)?);

    let mut hasher = Sha256::new();
    let mut size: u64 = 0;
    let mut head: Vec<u8> = Vec::with_capacity(config.sniff_bytes);

    ctx.run(async {
        while let Some(chunk) = data.next().await {
            let chunk = chunk.map_err(StorageError::from)?;
            size += chunk.len() as u64;
            if size > config.max_upload_bytes {
                return Err(UploadError::validation(format!(
                    "upload exceeds the {} byte limit",
                    config.max_upload_bytes
                )));
            }

            if head.len() < config.sniff_bytes {
                let take = (config.sniff_bytes - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            hasher.update(&chunk);
            out.write_all(&chunk).await.map_err(StorageError::from)?;
        }
        out.flush().await.map_err(StorageError::from)?;
        Ok::<(), UploadError>(())
    })
    .await?;

    if size == 0 {
        return Err(UploadError::validation("upload is empty"));
    }

    Ok(Scratch {
        file: temp,
        size,
        content_hash: hex::encode(hasher.finalize()),
        head,
    })
}
