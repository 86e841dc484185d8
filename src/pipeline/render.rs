//! Rasterisation: turn a document buffer into ordered page images.
//!
//! PDFs are rendered with pdfium; single-image scans (PNG, JPEG, TIFF, WebP)
//! are decoded directly as a one-page document. Either way every page comes
//! out as a canonical RGB8 PNG capped at `max_rendered_pixels` on its longest
//! edge.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and CPU-heavy rendering.
//! `tokio::task::spawn_blocking` keeps that work off the async worker
//! threads.
//!
//! ## Why a temporary file?
//!
//! pdfium is given a file path rather than a borrowed buffer so the
//! document's lifetime is not tied to the caller's bytes across the blocking
//! boundary. The file is a [`tempfile::NamedTempFile`], removed when it is
//! dropped on success, error, or panic.

use crate::config::ExtractionConfig;
use crate::error::Pdf2TableError;
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Raster format of a [`PageImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMime {
    Png,
}

impl PageMime {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageMime::Png => "image/png",
        }
    }
}

/// One rasterised page. Immutable once produced.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number in the source document.
    pub page_number: usize,
    pub pixels: Vec<u8>,
    pub mime_type: PageMime,
}

impl PageImage {
    pub fn png(page_number: usize, pixels: Vec<u8>) -> Self {
        Self {
            page_number,
            pixels,
            mime_type: PageMime::Png,
        }
    }
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("page_number", &self.page_number)
            .field("bytes", &self.pixels.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// A requested page that could not be rasterised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPage {
    pub page_number: usize,
    pub reason: String,
}

/// Pages actually rasterised plus the document's true page count.
#[derive(Debug, Clone, Default)]
pub struct RasterOutput {
    pub pages: Vec<PageImage>,
    /// Page count of the source, independent of the `max_pages` cap.
    pub total_pages: usize,
    /// Requested pages that failed to render or encode, in page order.
    pub skipped: Vec<SkippedPage>,
}

/// Document → page images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Rasterise at most `max_pages` pages, in page order.
    ///
    /// # Errors
    /// [`Pdf2TableError::PdfConversionFailed`] when the document is
    /// unreadable, encrypted, or yields no renderable page.
    async fn rasterize(
        &self,
        document: &[u8],
        max_pages: usize,
    ) -> Result<RasterOutput, Pdf2TableError>;

    /// True page count of the document.
    async fn page_count(&self, document: &[u8]) -> Result<usize, Pdf2TableError> {
        Ok(self.rasterize(document, 1).await?.total_pages)
    }

    /// Rasterise only the listed 1-based pages, in ascending order.
    ///
    /// The default renders every page up to the highest one requested and
    /// keeps the selection.
    async fn rasterize_pages(
        &self,
        document: &[u8],
        pages: &[usize],
    ) -> Result<RasterOutput, Pdf2TableError> {
        let last = pages.iter().copied().max().unwrap_or(0);
        let mut output = self.rasterize(document, last).await?;
        output.pages.retain(|p| pages.contains(&p.page_number));
        output.skipped.retain(|p| pages.contains(&p.page_number));
        Ok(output)
    }
}

/// What kind of document a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image(ImageFormat),
}

/// Sniff the buffer. PDFs may carry a few junk bytes before `%PDF`; the
/// header only has to appear within the first kilobyte.
pub fn detect_kind(bytes: &[u8]) -> Option<DocumentKind> {
    let head = &bytes[..bytes.len().min(1024)];
    if head.windows(4).any(|w| w == b"%PDF") {
        return Some(DocumentKind::Pdf);
    }
    match image::guess_format(bytes) {
        Ok(fmt @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Tiff | ImageFormat::WebP)) => {
            Some(DocumentKind::Image(fmt))
        }
        _ => None,
    }
}

/// [`Rasterizer`] backed by pdfium (PDFs) and the `image` crate (scans).
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_rendered_pixels: u32,
    password: Option<String>,
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            library_path: config.pdfium_library_path.clone(),
        }
    }
}

/// Which pages a blocking render pass should produce.
#[derive(Debug, Clone)]
enum Selection {
    /// Page count only, nothing rendered.
    CountOnly,
    /// Pages `1..=n`.
    First(usize),
    /// Exactly these 1-based pages.
    Only(Vec<usize>),
}

impl Selection {
    fn page_numbers(&self, total_pages: usize) -> Vec<usize> {
        match self {
            Selection::CountOnly => Vec::new(),
            Selection::First(n) => (1..=total_pages.min(*n)).collect(),
            Selection::Only(pages) => {
                let mut v: Vec<usize> = pages
                    .iter()
                    .copied()
                    .filter(|&p| p >= 1 && p <= total_pages)
                    .collect();
                v.sort_unstable();
                v.dedup();
                v
            }
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        document: &[u8],
        max_pages: usize,
    ) -> Result<RasterOutput, Pdf2TableError> {
        let output = self.run(document, Selection::First(max_pages)).await?;
        info!(
            "Rasterised {}/{} pages",
            output.pages.len(),
            output.total_pages
        );
        Ok(output)
    }

    async fn page_count(&self, document: &[u8]) -> Result<usize, Pdf2TableError> {
        Ok(self.run(document, Selection::CountOnly).await?.total_pages)
    }

    async fn rasterize_pages(
        &self,
        document: &[u8],
        pages: &[usize],
    ) -> Result<RasterOutput, Pdf2TableError> {
        let output = self.run(document, Selection::Only(pages.to_vec())).await?;
        info!(
            "Rasterised pages {:?} of {}",
            output.pages.iter().map(|p| p.page_number).collect::<Vec<_>>(),
            output.total_pages
        );
        Ok(output)
    }
}

impl PdfiumRasterizer {
    async fn run(
        &self,
        document: &[u8],
        selection: Selection,
    ) -> Result<RasterOutput, Pdf2TableError> {
        if document.is_empty() {
            return Err(Pdf2TableError::PdfConversionFailed {
                detail: "document is empty".into(),
            });
        }

        let kind = detect_kind(document).ok_or_else(|| {
            let mut magic = [0u8; 4];
            let n = document.len().min(4);
            magic[..n].copy_from_slice(&document[..n]);
            Pdf2TableError::PdfConversionFailed {
                detail: format!("unsupported document format (first bytes: {magic:?})"),
            }
        })?;

        let bytes = document.to_vec();
        let this = self.clone();
        tokio::task::spawn_blocking(move || match kind {
            DocumentKind::Pdf => this.rasterize_pdf_blocking(&bytes, &selection),
            DocumentKind::Image(_) => this.rasterize_image_blocking(&bytes, &selection),
        })
        .await
        .map_err(|e| Pdf2TableError::Internal(format!("Render task panicked: {}", e)))?
    }

    fn rasterize_pdf_blocking(
        &self,
        bytes: &[u8],
        selection: &Selection,
    ) -> Result<RasterOutput, Pdf2TableError> {
        // Declared first so it is dropped after the document that reads it.
        let mut tmp = tempfile::NamedTempFile::new()
            .map_err(|e| Pdf2TableError::Internal(format!("tempfile: {e}")))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.flush())
            .map_err(|e| Pdf2TableError::Internal(format!("tempfile write: {e}")))?;

        let pdfium = bind_pdfium(self.library_path.as_deref())?;
        let password = self.password.as_deref();

        let document = pdfium
            .load_pdf_from_file(tmp.path(), password)
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                let detail = if err_str.contains("Password") || err_str.contains("password") {
                    if password.is_some() {
                        "wrong password for encrypted PDF".to_string()
                    } else {
                        "PDF is encrypted and requires a password".to_string()
                    }
                } else {
                    format!("PDF is unreadable: {err_str}")
                };
                Pdf2TableError::PdfConversionFailed { detail }
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        if total_pages == 0 {
            return Err(Pdf2TableError::PdfConversionFailed {
                detail: "PDF has no pages".into(),
            });
        }

        let wanted = selection.page_numbers(total_pages);
        if matches!(selection, Selection::CountOnly) {
            return Ok(RasterOutput {
                total_pages,
                ..Default::default()
            });
        }

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let mut images = Vec::with_capacity(wanted.len());
        let mut skipped = Vec::new();

        for &page_num in &wanted {
            // The bitmap borrows the page, so convert before the page drops.
            let png = pages
                .get((page_num - 1) as u16)
                .and_then(|page| {
                    page.render_with_config(&render_config)
                        .map(|bitmap| bitmap.as_image())
                })
                .map_err(|e| format!("render failed: {e:?}"))
                .and_then(|image| {
                    debug!(
                        "Rendered page {} → {}x{} px",
                        page_num,
                        image.width(),
                        image.height()
                    );
                    encode_png(&image).map_err(|e| format!("PNG encoding failed: {e}"))
                });
            match png {
                Ok(png) => images.push(PageImage::png(page_num, png)),
                Err(reason) => {
                    warn!("Skipping page {}: {}", page_num, reason);
                    skipped.push(SkippedPage {
                        page_number: page_num,
                        reason,
                    });
                }
            }
        }

        if images.is_empty() {
            return Err(Pdf2TableError::PdfConversionFailed {
                detail: format!("none of the {} requested pages could be rendered", wanted.len()),
            });
        }

        Ok(RasterOutput {
            pages: images,
            total_pages,
            skipped,
        })
    }

    fn rasterize_image_blocking(
        &self,
        bytes: &[u8],
        selection: &Selection,
    ) -> Result<RasterOutput, Pdf2TableError> {
        let wanted = selection.page_numbers(1);
        if matches!(selection, Selection::CountOnly) {
            return Ok(RasterOutput {
                total_pages: 1,
                ..Default::default()
            });
        }
        if wanted.is_empty() {
            return Err(Pdf2TableError::PdfConversionFailed {
                detail: "no requested page exists in a single-image document".into(),
            });
        }

        let img = image::load_from_memory(bytes).map_err(|e| Pdf2TableError::PdfConversionFailed {
            detail: format!("image is unreadable: {e}"),
        })?;
        let img = cap_dimensions(img, self.max_rendered_pixels);
        let png = encode_png(&img).map_err(|e| Pdf2TableError::PdfConversionFailed {
            detail: format!("PNG encoding failed: {e}"),
        })?;

        Ok(RasterOutput {
            pages: vec![PageImage::png(1, png)],
            total_pages: 1,
            skipped: Vec::new(),
        })
    }
}

/// Downscale so neither edge exceeds `max_px`, keeping the aspect ratio.
fn cap_dimensions(img: DynamicImage, max_px: u32) -> DynamicImage {
    if img.width() <= max_px && img.height() <= max_px {
        img
    } else {
        img.resize(max_px, max_px, FilterType::Lanczos3)
    }
}

/// Bind pdfium from, in order: the configured path, `PDFIUM_LIB_PATH`, the
/// working directory, the system library. A directory path is resolved to
/// the platform library name inside it.
fn bind_pdfium(configured: Option<&Path>) -> Result<Pdfium, Pdf2TableError> {
    let explicit = configured
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match explicit {
        Some(path) => {
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| Pdf2TableError::PdfiumBindingFailed(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}
