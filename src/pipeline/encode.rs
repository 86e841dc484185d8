//! Image encoding: `DynamicImage` → canonical PNG, and PNG → `ImageData`.
//!
//! Every page, whether rendered from a PDF or decoded from a scan, is stored
//! as an 8-bit RGB PNG. PNG is lossless, so table rules and small digits stay
//! crisp; dropping the alpha channel avoids transparent backgrounds that some
//! providers render as black.

use crate::error::ServiceError;
use crate::pipeline::render::{PageImage, PageMime};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

const PNG_MAGIC: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Encode a raster as canonical RGB8 PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap a page for a multimodal request body.
///
/// `detail: "high"` lets tiling providers look at the full-resolution page;
/// at low detail small table digits are lost.
pub fn to_image_data(page: &PageImage) -> Result<ImageData, ServiceError> {
    match page.mime_type {
        PageMime::Png if page.pixels.starts_with(PNG_MAGIC) => {}
        PageMime::Png => {
            return Err(ServiceError::InvalidImage {
                detail: format!("page {} is not a PNG stream", page.page_number),
            })
        }
    }

    let b64 = STANDARD.encode(&page.pixels);
    debug!(
        "Encoded page {} → {} bytes base64",
        page.page_number,
        b64.len()
    );
    Ok(ImageData::new(b64, page.mime_type.as_str()).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red_square() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_png_is_rgb() {
        let bytes = encode_png(&red_square()).expect("encode should succeed");
        assert!(bytes.starts_with(PNG_MAGIC));
        let back = image::load_from_memory(&bytes).unwrap();
        assert_eq!(back.color(), image::ColorType::Rgb8);
        assert_eq!((back.width(), back.height()), (10, 10));
    }

    #[test]
    fn image_data_is_base64_png() {
        let page = PageImage::png(1, encode_png(&red_square()).unwrap());
        let data = to_image_data(&page).expect("valid page");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(PNG_MAGIC));
    }

    #[test]
    fn non_png_bytes_rejected() {
        let page = PageImage::png(3, b"GIF89a....".to_vec());
        let err = to_image_data(&page).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidImage { .. }));
        assert!(err.to_string().contains("page 3"));
    }
}
