use image::RgbImage;

/// Height x width x 3 RGB samples, row-major.
pub type PixelBuffer = RgbImage;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DecodeError(String);

/// Decodes an uploaded image (JPEG, PNG, WebP, or any other format the codec
/// set recognises) into an RGB buffer. Alpha is dropped; palette and
/// grayscale inputs are expanded.
pub fn normalize(raw: &[u8]) -> Result<PixelBuffer, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError("empty input".to_string()));
    }

    let decoded = image::load_from_memory(raw).map_err(|e| DecodeError(e.to_string()))?;
    Ok(decoded.into_rgb8())
}
