//! Photo previews and `data:` URL handling.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;

use crate::error::ThumbnailError;

/// Longest edge of a generated preview, in pixels.
pub const THUMBNAIL_MAX_EDGE: u32 = 320;

/// JPEG quality of generated previews.
pub const THUMBNAIL_QUALITY: u8 = 85;

/// Downscale an image so its longest edge is at most `max_edge` and encode
/// it as a JPEG `data:` URL. Smaller images are re-encoded at their size.
///
/// CPU-bound: call from a blocking context.
pub fn create_thumbnail_data_url(bytes: &[u8], max_edge: u32) -> Result<String, ThumbnailError> {
    if bytes.is_empty() {
        return Err(ThumbnailError::Empty);
    }
    let image = image::load_from_memory(bytes)?;

    let max_edge = max_edge.max(1);
    let resized = if image.width() > max_edge || image.height() > max_edge {
        image.thumbnail(max_edge, max_edge)
    } else {
        image
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut jpeg = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, THUMBNAIL_QUALITY))?;

    log::debug!(
        "[Media] Preview {}x{} ({} bytes) from {} byte original",
        rgb.width(),
        rgb.height(),
        jpeg.len(),
        bytes.len()
    );
    Ok(encode_data_url("image/jpeg", &jpeg))
}

pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Decode a self-contained base64 `data:` URL into its bytes.
///
/// Anything else (remote URLs, non-base64 payloads, bad padding) yields `None`.
pub fn decode_data_url(data_url: &str) -> Option<Vec<u8>> {
    let rest = data_url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if !header.ends_with(";base64") || payload.is_empty() {
        return None;
    }
    STANDARD.decode(payload.trim()).ok()
}
