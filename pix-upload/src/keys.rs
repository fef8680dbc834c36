/// Maps an identifier plus file extension to the provider key
pub trait BlobKeyStrategy: Send + Sync {
    fn object_key(&self, identifier: &str, extension: &str) -> String;
}

/// `ab/cd/abcdef123456.png`: two levels of two-character shards from the
/// identifier, so no directory grows past 65 536 entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentKeyStrategy;

impl BlobKeyStrategy for ContentKeyStrategy {
    fn object_key(&self, identifier: &str, extension: &str) -> String {
        match (identifier.get(0..2), identifier.get(2..4)) {
            (Some(first), Some(second)) => format!("{first}/{second}/{identifier}.{extension}"),
            _ => format!("{identifier}.{extension}"),
        }
    }
}

/// Leading `len` hex characters of the content hash
pub fn derive_identifier(content_hash: &str, len: usize) -> String {
    content_hash.chars().take(len).collect()
}
