use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;

use crate::error::AppError;

pub const THUMBNAIL_MAX_WIDTH: u32 = 640;
const THUMBNAIL_JPEG_QUALITY: u8 = 85;

/// Decodes an uploaded image (jpeg, png or webp) and re-encodes it as a
/// JPEG no wider than `max_width`, keeping the aspect ratio. Smaller images
/// are not upscaled. CPU bound; call from `spawn_blocking`.
pub fn make_thumbnail(data: &[u8], max_width: u32) -> Result<Vec<u8>, AppError> {
    let img = image::load_from_memory(data)
        .map_err(|e| AppError::InvalidArgument(format!("Failed to load image: {}", e)))?;

    let img = if img.width() > max_width {
        img.resize(max_width, u32::MAX, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, THUMBNAIL_JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| AppError::Internal(format!("Failed to encode thumbnail: {}", e)))?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, image::Rgba([200, 10, 10, 128]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn wide_images_are_shrunk_to_jpeg() {
        let thumb = make_thumbnail(&png(1280, 720), THUMBNAIL_MAX_WIDTH).unwrap();
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 360));
    }

    #[test]
    fn small_images_keep_their_size() {
        let thumb = make_thumbnail(&png(100, 50), THUMBNAIL_MAX_WIDTH).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            make_thumbnail(b"not an image", THUMBNAIL_MAX_WIDTH),
            Err(AppError::InvalidArgument(_))
        ));
    }
}
