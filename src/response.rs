//! Externally visible response shapes.

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::pipeline::DetectionRecord;
use crate::stats::RipenessStats;

/// Body of a successful `POST /detect`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub detections: Vec<DetectionRecord>,
    /// Annotated preview as a `data:image/jpeg;base64,...` URL.
    pub image: String,
    pub stats: RipenessStats,
    /// Retrieval URL from the upload service, when one is configured and succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Body of every error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Renders pipeline output into the response shape. No I/O.
#[derive(Clone, Copy, Debug)]
pub struct ResultEncoder {
    jpeg_quality: u8,
}

impl ResultEncoder {
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality }
    }

    /// Encodes the annotated image once; returns the payload and the JPEG
    /// bytes so callers can hand the same bytes to persistence.
    pub fn encode(
        &self,
        records: Vec<DetectionRecord>,
        annotated: &RgbImage,
        stats: RipenessStats,
    ) -> Result<(ResponsePayload, Vec<u8>)> {
        let jpeg = codec::encode_jpeg(annotated, self.jpeg_quality)?;
        let payload = ResponsePayload {
            detections: records,
            image: codec::jpeg_data_url(&jpeg),
            stats,
            image_url: None,
        };
        Ok((payload, jpeg))
    }
}

impl Default for ResultEncoder {
    fn default() -> Self {
        Self::new(codec::DEFAULT_JPEG_QUALITY)
    }
}
