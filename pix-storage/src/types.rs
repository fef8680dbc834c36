use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek};

use crate::{StorageError, StorageResult};

/// Stream of bytes for blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Readable, seekable blob content handed back by `StorageProvider::get`
pub trait SeekableRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableRead for T {}

/// Owned reader over a stored blob
pub type BlobReader = Box<dyn SeekableRead>;

/// Wrap an in-memory buffer as a single-chunk `ByteStream`
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures_util::stream::once(async move { Ok(data) }))
}

/// Buffer a whole stream in memory.
///
/// Used by the network providers, which issue a single request per write so a
/// failed transfer never leaves a partial object behind.
pub async fn collect_stream(stream: &mut ByteStream) -> StorageResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Read a blob reader to the end
pub async fn read_to_bytes(reader: &mut BlobReader) -> StorageResult<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .await
        .map_err(|source| StorageError::Io { source })?;
    Ok(out)
}
