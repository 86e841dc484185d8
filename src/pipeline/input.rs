//! Input resolution: read a user-supplied path or URL into memory.
//!
//! The whole document is held as bytes: the rasteriser needs random access
//! to it, and the size cap is easiest to enforce before any decoding starts.
//! Local files are checked against the cap through their metadata before
//! they are read; downloads are checked against `Content-Length` and again
//! while the body streams in, so an oversized response is abandoned early.

use crate::error::Pdf2TableError;
use std::path::PathBuf;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load the document named by `input`.
///
/// `size_limit` of `None` disables the size check.
pub async fn load_document(
    input: &str,
    timeout_secs: u64,
    size_limit: Option<u64>,
) -> Result<Vec<u8>, Pdf2TableError> {
    let input = input.trim();
    if input.is_empty() || (input.contains("://") && !is_url(input)) {
        return Err(Pdf2TableError::InvalidInput {
            input: input.to_string(),
        });
    }

    if is_url(input) {
        download_url(input, timeout_secs, size_limit).await
    } else {
        read_local(input, size_limit).await
    }
}

/// Fail with `FILE_TOO_LARGE` when `size` exceeds `limit`.
pub fn check_size(size: u64, limit: Option<u64>) -> Result<(), Pdf2TableError> {
    match limit {
        Some(limit) if size > limit => Err(Pdf2TableError::FileTooLarge { size, limit }),
        _ => Ok(()),
    }
}

async fn read_local(path_str: &str, size_limit: Option<u64>) -> Result<Vec<u8>, Pdf2TableError> {
    let path = PathBuf::from(path_str);

    let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Pdf2TableError::PermissionDenied { path: path.clone() },
        _ => Pdf2TableError::FileNotFound { path: path.clone() },
    })?;
    if !meta.is_file() {
        return Err(Pdf2TableError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    check_size(meta.len(), size_limit)?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Pdf2TableError::PermissionDenied { path: path.clone() },
        _ => Pdf2TableError::FileNotFound { path: path.clone() },
    })?;

    debug!("Read local document: {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes)
}

async fn download_url(
    url: &str,
    timeout_secs: u64,
    size_limit: Option<u64>,
) -> Result<Vec<u8>, Pdf2TableError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| Pdf2TableError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            Pdf2TableError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let mut response = client.get(url).send().await.map_err(classify)?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    if let Some(len) = response.content_length() {
        check_size(len, size_limit)?;
    }

    let mut bytes = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    while let Some(chunk) = response.chunk().await.map_err(classify)? {
        bytes.extend_from_slice(&chunk);
        check_size(bytes.len() as u64, size_limit)?;
    }

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes)
}
