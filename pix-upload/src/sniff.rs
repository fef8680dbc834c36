use std::path::PathBuf;
use tracing::debug;

/// Canonical file extension for each supported image type
const EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/bmp", "bmp"),
    ("image/tiff", "tiff"),
    ("image/avif", "avif"),
    ("image/heif", "heif"),
    ("image/heic", "heic"),
    ("image/vnd.microsoft.icon", "ico"),
];

/// MIME type from magic bytes, if recognized
pub fn detect_mime(head: &[u8]) -> Option<&'static str> {
    infer::get(head).map(|kind| kind.mime_type())
}

/// Storage extension for a MIME type; `bin` when unknown
pub fn extension_for(mime: &str) -> &'static str {
    EXTENSIONS
        .iter()
        .find(|(m, _)| *m == mime)
        .map(|(_, ext)| *ext)
        .unwrap_or("bin")
}

/// Width and height from the image header; `(0, 0)` when unreadable
pub async fn read_dimensions(path: PathBuf) -> (u32, u32) {
    let result = tokio::task::spawn_blocking(move || {
        image::ImageReader::open(&path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(image::ImageError::IoError)
            .and_then(|reader| reader.into_dimensions())
    })
    .await;

    match result {
        Ok(Ok(dimensions)) => dimensions,
        Ok(Err(err)) => {
            debug!(error = %err, "Image dimensions unreadable, recording 0x0");
            (0, 0)
        }
        Err(err) => {
            debug!(error = %err, "Dimension probe did not complete");
            (0, 0)
        }
    }
}
