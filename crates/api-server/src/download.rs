//! Image download module for URL sources
//!
//! External image URLs are downloaded into the uploads directory so that
//! distributed analyzers can fetch the image back over HTTP via the public
//! `/uploads/<name>` route. The body is staged through a temporary file and
//! only persisted once fully written.

use emoji_vision_common::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A downloaded image persisted into the uploads directory
#[derive(Debug)]
pub struct StoredImage {
    /// Final path under the uploads directory
    pub path: PathBuf,
    /// File name component, used to build the public URL
    pub file_name: String,
}

/// Download an image from an HTTP/HTTPS URL into the uploads directory
///
/// # Errors
///
/// Returns an error if the URL scheme is unsupported, the request fails,
/// the body exceeds `max_size`, or the file cannot be persisted.
pub async fn download_to_uploads(
    url: &str,
    upload_dir: &Path,
    max_size: u64,
) -> Result<StoredImage> {
    info!("Downloading image from URL: {}", url);

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(PipelineError::InvalidInput(
            "Invalid URL scheme. Only http:// and https:// are supported".to_string(),
        ));
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| PipelineError::Download(format!("Failed to create HTTP client: {e}")))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PipelineError::Download(format!("Failed to send HTTP request: {e}")))?;

    if !response.status().is_success() {
        return Err(PipelineError::Download(format!(
            "HTTP request failed with status: {}",
            response.status()
        )));
    }

    if let Some(length) = response.content_length() {
        debug!("Download size: {} bytes", length);
        if length > max_size {
            return Err(PipelineError::FileTooLarge {
                size: length,
                max: max_size,
            });
        }
    }

    let extension = infer_extension_from_url(url)
        .or_else(|| {
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|ct| ct.to_str().ok())
                .and_then(extension_for_mime)
        })
        .unwrap_or("img");

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::Download(format!("Failed to read response body: {e}")))?;
    if bytes.len() as u64 > max_size {
        return Err(PipelineError::FileTooLarge {
            size: bytes.len() as u64,
            max: max_size,
        });
    }

    let stored = persist_bytes(&bytes, extension, upload_dir)?;
    info!(
        "Downloaded {} bytes to {}",
        bytes.len(),
        stored.path.display()
    );
    Ok(stored)
}

/// Persist image bytes into the uploads directory under a fresh name
///
/// Written through a temporary file in the same directory, then renamed,
/// so the uploads route never serves a half-written image.
///
/// # Errors
///
/// Returns an error when the uploads directory is not writable.
pub fn persist_bytes(bytes: &[u8], extension: &str, upload_dir: &Path) -> Result<StoredImage> {
    std::fs::create_dir_all(upload_dir)?;
    let file_name = format!("{}.{extension}", uuid::Uuid::new_v4());
    let path = upload_dir.join(&file_name);

    let temp = tempfile::NamedTempFile::new_in(upload_dir)?;
    std::fs::write(temp.path(), bytes)?;
    temp.persist(&path)
        .map_err(|e| PipelineError::IoError(e.error))?;

    Ok(StoredImage { path, file_name })
}

/// Infer file extension from a URL path
fn infer_extension_from_url(url: &str) -> Option<&str> {
    let path = url.split('?').next()?;
    let filename = path.split('/').next_back()?;
    if !filename.contains('.') {
        return None;
    }
    let extension = filename.split('.').next_back()?;
    if extension.len() <= 5 && extension.chars().all(char::is_alphanumeric) {
        Some(extension)
    } else {
        None
    }
}

/// Map an accepted image MIME type to a file extension
pub fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let mime_type = content_type.split(';').next()?.trim();
    match mime_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => {
            warn!("Unknown content-type: {}", mime_type);
            None
        }
    }
}

/// Whether a MIME type is on the upload allowlist
#[must_use]
pub fn is_allowed_mime(content_type: &str) -> bool {
    extension_for_mime(content_type).is_some()
}
