use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::DynamicImage;

use crate::error::FrameDecodeError;

/// Decode uploaded image bytes into a color image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, FrameDecodeError> {
    if bytes.is_empty() {
        return Err(FrameDecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(FrameDecodeError::Degenerate);
    }
    Ok(image)
}

/// Decode one base64 text frame received over the streaming connection.
///
/// Browsers send frames as `data:image/<subtype>;base64,<payload>`; the prefix
/// is detected by the comma separator, not by exact prefix match, so a bare
/// base64 payload passes through unchanged.
pub fn decode_transport_frame(text: &str) -> Result<DynamicImage, FrameDecodeError> {
    let payload = match text.split_once(',') {
        Some((_prefix, rest)) => rest,
        None => text,
    };
    let bytes = BASE64.decode(payload.trim())?;
    decode_image(&bytes)
}

/// Shrink a frame to a quarter of its linear dimensions on each axis before
/// inference (1/16 the pixel area). Returns `None` when either resulting
/// dimension would be zero; such frames are skipped rather than inferred on.
pub fn quarter_downsample(image: &DynamicImage) -> Option<DynamicImage> {
    let width = image.width() / 4;
    let height = image.height() / 4;
    if width == 0 || height == 0 {
        return None;
    }
    Some(image.resize_exact(width, height, image::imageops::FilterType::Triangle))
}
