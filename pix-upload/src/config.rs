use std::path::PathBuf;
use std::time::Duration;

pub const MIN_IDENTIFIER_LEN: usize = 8;
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Image types accepted by default
pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
    "image/avif",
    "image/heif",
    "image/heic",
    "image/vnd.microsoft.icon",
];

/// Upload pipeline limits and tuning
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Largest accepted single upload
    pub max_upload_bytes: u64,

    /// Largest accepted batch
    pub max_batch_files: usize,

    /// Items of one batch processed at the same time
    pub batch_concurrency: usize,

    /// Hex characters of the content hash used as identifier
    pub identifier_len: usize,

    pub allowed_mime_types: Vec<String>,

    /// Directory for scratch copies of in-progress uploads
    pub scratch_dir: PathBuf,

    /// Leading bytes kept for content sniffing
    pub sniff_bytes: usize,

    /// Time allowed for a rollback delete, independent of the caller's deadline
    pub compensation_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            max_batch_files: 50,
            batch_concurrency: 4,
            identifier_len: 12,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|m| m.to_string())
                .collect(),
            scratch_dir: std::env::temp_dir(),
            sniff_bytes: 8192,
            compensation_timeout: Duration::from_secs(30),
        }
    }
}

impl UploadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_max_batch_files(mut self, files: usize) -> Self {
        self.max_batch_files = files;
        self
    }

    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.max(1);
        self
    }

    /// Clamped to `8..=64`
    pub fn with_identifier_len(mut self, len: usize) -> Self {
        self.identifier_len = len.clamp(MIN_IDENTIFIER_LEN, MAX_IDENTIFIER_LEN);
        self
    }

    pub fn with_allowed_mime_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_mime_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_sniff_bytes(mut self, bytes: usize) -> Self {
        self.sniff_bytes = bytes.max(64);
        self
    }

    pub fn with_compensation_timeout(mut self, timeout: Duration) -> Self {
        self.compensation_timeout = timeout;
        self
    }

    pub fn is_allowed(&self, mime: &str) -> bool {
        self.allowed_mime_types.iter().any(|m| m == mime)
    }

    /// Defaults overridden by `PIXRS_MAX_UPLOAD_BYTES`, `PIXRS_MAX_BATCH_FILES`,
    /// `PIXRS_BATCH_CONCURRENCY`, `PIXRS_IDENTIFIER_LEN` and `PIXRS_SCRATCH_DIR`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(bytes) = env_parse::<u64>("PIXRS_MAX_UPLOAD_BYTES") {
            config = config.with_max_upload_bytes(bytes);
        }
        if let Some(files) = env_parse::<usize>("PIXRS_MAX_BATCH_FILES") {
            config = config.with_max_batch_files(files);
        }
        if let Some(concurrency) = env_parse::<usize>("PIXRS_BATCH_CONCURRENCY") {
            config = config.with_batch_concurrency(concurrency);
        }
        if let Some(len) = env_parse::<usize>("PIXRS_IDENTIFIER_LEN") {
            config = config.with_identifier_len(len);
        }
        if let Ok(dir) = std::env::var("PIXRS_SCRATCH_DIR") {
            if !dir.trim().is_empty() {
                config = config.with_scratch_dir(dir);
            }
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
