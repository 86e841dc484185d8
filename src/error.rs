//! Error types for the edgequake-pdf2table library.
//!
//! Three error types map to three scopes of failure:
//!
//! * [`Pdf2TableError`] — **Fatal**: the run cannot produce tables at all
//!   (unreadable document, provider not configured, nothing extracted).
//!   Returned as `Err(Pdf2TableError)` from the top-level entry points.
//!
//! * [`PageError`] — **Non-fatal**: one page's extraction failed or timed
//!   out. The orchestrator records it as a `partial_table` warning and moves
//!   on to the next page.
//!
//! * [`ServiceError`] — the classified outcome of a single call to the
//!   vision extraction service. Wrapped into a [`PageError`] by the
//!   orchestrator.
//!
//! Every type exposes [`ErrorCode`], the closed set of string codes a caller
//! maps to a human message. Codes, not `Display` strings, are the stable
//! contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Closed set of error codes surfaced in [`crate::output::ExtractionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PdfConversionFailed,
    ConfigError,
    AiApiError,
    InvalidImageFormat,
    AiNoResponse,
    AiParseError,
    NoTablesFound,
    FileTooLarge,
    InternalError,
}

impl ErrorCode {
    /// The wire string of this code, e.g. `"NO_TABLES_FOUND"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PdfConversionFailed => "PDF_CONVERSION_FAILED",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::AiApiError => "AI_API_ERROR",
            ErrorCode::InvalidImageFormat => "INVALID_IMAGE_FORMAT",
            ErrorCode::AiNoResponse => "AI_NO_RESPONSE",
            ErrorCode::AiParseError => "AI_PARSE_ERROR",
            ErrorCode::NoTablesFound => "NO_TABLES_FOUND",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All fatal errors returned by the edgequake-pdf2table library.
#[derive(Debug, Error)]
pub enum Pdf2TableError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// Document is larger than the configured limit.
    #[error("Document is {size} bytes, larger than the {limit}-byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    // ── Rasterisation errors ──────────────────────────────────────────────
    /// The document is unreadable, encrypted, or has no renderable pages.
    #[error("Document conversion failed: {detail}")]
    PdfConversionFailed { detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Service errors ────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every page was processed but no table survived.
    #[error("No tables found in {pages} page(s){}", first_error.as_deref().map(|e| format!("\nFirst error: {e}")).unwrap_or_default())]
    NoTablesFound {
        pages: usize,
        first_error: Option<String>,
    },

    // ── Run control ───────────────────────────────────────────────────────
    /// The run was cancelled before it completed.
    #[error("Extraction cancelled")]
    Cancelled,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2TableError {
    /// The error code reported to callers for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Pdf2TableError::FileTooLarge { .. } => ErrorCode::FileTooLarge,
            Pdf2TableError::FileNotFound { .. }
            | Pdf2TableError::PermissionDenied { .. }
            | Pdf2TableError::InvalidInput { .. }
            | Pdf2TableError::DownloadFailed { .. }
            | Pdf2TableError::DownloadTimeout { .. }
            | Pdf2TableError::PdfConversionFailed { .. }
            | Pdf2TableError::PdfiumBindingFailed(_) => ErrorCode::PdfConversionFailed,
            Pdf2TableError::ProviderNotConfigured { .. } | Pdf2TableError::InvalidConfig(_) => {
                ErrorCode::ConfigError
            }
            Pdf2TableError::NoTablesFound { .. } => ErrorCode::NoTablesFound,
            Pdf2TableError::Cancelled | Pdf2TableError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Classified failure of one call to the vision extraction service.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ServiceError {
    /// Transport or provider failure.
    #[error("extraction service error: {message}")]
    Api { message: String },

    /// The page image could not be sent as-is.
    #[error("invalid image format: {detail}")]
    InvalidImage { detail: String },

    /// The service answered with nothing usable.
    #[error("extraction service returned an empty response")]
    NoResponse,

    /// The response was not valid JSON after stripping code fences.
    #[error("could not parse extraction response: {detail}")]
    Parse { detail: String },
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Api { .. } => ErrorCode::AiApiError,
            ServiceError::InvalidImage { .. } => ErrorCode::InvalidImageFormat,
            ServiceError::NoResponse => ErrorCode::AiNoResponse,
            ServiceError::Parse { .. } => ErrorCode::AiParseError,
        }
    }

    /// Only transport failures are worth another attempt; a malformed or
    /// empty answer is never retried blindly.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Api { .. })
    }
}

/// A non-fatal error for a single page.
///
/// The run continues unless no page yields a table.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum PageError {
    /// The extraction call failed after any retries.
    #[error("Page {page}: extraction failed after {retries} retries: {source}")]
    ExtractionFailed {
        page: usize,
        retries: u32,
        #[source]
        source: ServiceError,
    },

    /// The extraction call did not return within the per-call timeout.
    #[error("Page {page}: extraction timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The page could not be rasterised, so it was never sent for extraction.
    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: usize, detail: String },
}

impl PageError {
    pub fn page(&self) -> usize {
        match self {
            PageError::ExtractionFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::RenderFailed { page, .. } => *page,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PageError::ExtractionFailed { source, .. } => source.code(),
            PageError::Timeout { .. } => ErrorCode::AiApiError,
            PageError::RenderFailed { .. } => ErrorCode::PdfConversionFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serialises_as_wire_string() {
        let json = serde_json::to_string(&ErrorCode::NoTablesFound).unwrap();
        assert_eq!(json, "\"NO_TABLES_FOUND\"");
        let back: ErrorCode = serde_json::from_str("\"AI_PARSE_ERROR\"").unwrap();
        assert_eq!(back, ErrorCode::AiParseError);
    }

    #[test]
    fn as_str_matches_serde() {
        for code in [
            ErrorCode::PdfConversionFailed,
            ErrorCode::ConfigError,
            ErrorCode::AiApiError,
            ErrorCode::InvalidImageFormat,
            ErrorCode::AiNoResponse,
            ErrorCode::AiParseError,
            ErrorCode::NoTablesFound,
            ErrorCode::FileTooLarge,
            ErrorCode::InternalError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn fatal_codes() {
        assert_eq!(
            Pdf2TableError::FileTooLarge { size: 10, limit: 5 }.code(),
            ErrorCode::FileTooLarge
        );
        assert_eq!(
            Pdf2TableError::PdfConversionFailed {
                detail: "encrypted".into()
            }
            .code(),
            ErrorCode::PdfConversionFailed
        );
        assert_eq!(Pdf2TableError::Cancelled.code(), ErrorCode::InternalError);
        assert_eq!(
            Pdf2TableError::NoTablesFound {
                pages: 3,
                first_error: None
            }
            .code(),
            ErrorCode::NoTablesFound
        );
    }

    #[test]
    fn no_tables_display_includes_first_error() {
        let e = Pdf2TableError::NoTablesFound {
            pages: 2,
            first_error: Some("Page 1: timed out".into()),
        };
        let msg = e.to_string();
        assert!(msg.contains("2 page(s)"), "got: {msg}");
        assert!(msg.contains("Page 1: timed out"), "got: {msg}");
    }

    #[test]
    fn only_api_errors_are_transient() {
        assert!(ServiceError::Api {
            message: "503".into()
        }
        .is_transient());
        assert!(!ServiceError::Parse {
            detail: "eof".into()
        }
        .is_transient());
        assert!(!ServiceError::NoResponse.is_transient());
    }

    #[test]
    fn page_error_carries_service_code() {
        let e = PageError::ExtractionFailed {
            page: 4,
            retries: 2,
            source: ServiceError::NoResponse,
        };
        assert_eq!(e.page(), 4);
        assert_eq!(e.code(), ErrorCode::AiNoResponse);
        assert!(e.to_string().contains("Page 4"));

        let t = PageError::Timeout { page: 2, secs: 90 };
        assert_eq!(t.code(), ErrorCode::AiApiError);
        assert!(t.to_string().contains("90s"));

        let r = PageError::RenderFailed {
            page: 7,
            detail: "render failed: corrupt stream".into(),
        };
        assert_eq!(r.page(), 7);
        assert_eq!(r.code(), ErrorCode::PdfConversionFailed);
        assert!(r.to_string().contains("Page 7: rendering failed"));
    }
}
