use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Backend that replays a fixed detection list for every image.
///
/// Used for tests, demos and offline runs where detections were produced by
/// an external model. It can also be configured to fail every call.
pub struct ScriptedBackend {
    detections: Vec<RawDetection>,
    failure: Option<String>,
}

impl ScriptedBackend {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            failure: None,
        }
    }

    /// A backend whose every `infer` call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            detections: Vec::new(),
            failure: Some(message.to_string()),
        }
    }

    /// Load detections from a JSON array of `{class_id, confidence, box}`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detections from {}", path.display()))?;
        let detections: Vec<RawDetection> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detections file {}: {}", path.display(), e))?;
        Ok(Self::new(detections))
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>> {
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(self.detections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use std::io::Write;

    #[test]
    fn replays_detections_in_order() {
        let dets = vec![
            RawDetection {
                class_id: 49,
                confidence: 0.4,
                bbox: BoundingBox::new(0, 0, 2, 2),
            },
            RawDetection {
                class_id: 46,
                confidence: 0.9,
                bbox: BoundingBox::new(1, 1, 3, 3),
            },
        ];
        let mut backend = ScriptedBackend::new(dets.clone());
        let image = RgbImage::new(4, 4);
        assert_eq!(backend.infer(&image).unwrap(), dets);
        assert_eq!(backend.infer(&image).unwrap(), dets);
    }

    #[test]
    fn loads_detections_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[{"class_id": 47, "confidence": 0.8734, "box": [10, 10, 50, 50]}]"#)
            .unwrap();
        let mut backend = ScriptedBackend::from_json_file(file.path()).unwrap();
        let dets = backend.infer(&RgbImage::new(1, 1)).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 47);
        assert_eq!(dets[0].bbox, BoundingBox::new(10, 10, 50, 50));
    }

    #[test]
    fn failing_backend_errors_every_call() {
        let mut backend = ScriptedBackend::failing("runtime unavailable");
        assert!(backend.infer(&RgbImage::new(1, 1)).is_err());
        let err = backend.infer(&RgbImage::new(1, 1)).unwrap_err();
        assert_eq!(err.to_string(), "runtime unavailable");
    }
}
