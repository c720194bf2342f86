//! Image codec collaborator: raw bytes and data URLs in, JPEG out.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;
const JPEG_MIME: &str = "image/jpeg";

/// Decode encoded image bytes (JPEG, PNG) into an RGB buffer.
pub fn decode_image(bytes: &[u8]) -> PipelineResult<RgbImage> {
    if bytes.is_empty() {
        return Err(PipelineError::Decode("empty image payload".into()));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::Decode(e.to_string()))?
        .into_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::Decode("image has zero size".into()));
    }
    Ok(image)
}

/// Decode a `data:<mime>;base64,<payload>` URL. A bare base64 string without
/// the `data:` prefix is accepted as well.
pub fn decode_data_url(url: &str) -> PipelineResult<RgbImage> {
    let payload = match url.split_once(',') {
        Some((header, payload)) if header.starts_with("data:") => payload,
        Some(_) => return Err(PipelineError::Decode("malformed data url".into())),
        None => url,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| PipelineError::Decode(format!("invalid base64 payload: {e}")))?;
    decode_image(&bytes)
}

/// Encode as baseline JPEG at `quality` (1..=100).
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("jpeg encode")?;
    Ok(out)
}

/// Wrap JPEG bytes as a base64 data URL.
pub fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!("data:{};base64,{}", JPEG_MIME, STANDARD.encode(jpeg))
}
