#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;
use tract_onnx::prelude::tract_ndarray::{ArrayView3, Ix3};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, RawDetection};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// The model takes a square `1x3xSxS` RGB tensor in `[0, 1]` and produces a
/// `1x(4+C)xN` tensor of candidate boxes (`cx, cy, w, h`, then one score per
/// class). Boxes are rescaled to source pixels and filtered with per-class
/// non-maximum suppression. Output is ordered by descending confidence.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the default confidence and IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<Ix3>()
            .context("model output was not rank 3")?;
        let candidates = decode_predictions(
            view,
            self.input_size,
            (image.width(), image.height()),
            self.confidence_threshold,
        )?;
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

/// Decodes a YOLOv8 `[1, 4+C, N]` prediction tensor into source-pixel
/// detections.
///
/// Each column holds `cx, cy, w, h` in model input pixels followed by one
/// score per class. The best-scoring class is kept when it reaches
/// `confidence_threshold`. Boxes are scaled from the square model input back
/// to `source` (width, height).
pub fn decode_predictions(
    view: ArrayView3<f32>,
    input_size: u32,
    source: (u32, u32),
    confidence_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let (_, rows, candidates) = view.dim();
    if rows < 5 {
        return Err(anyhow!("model output has {} rows; expected 4 box rows plus classes", rows));
    }

    let scale_x = source.0 as f32 / input_size as f32;
    let scale_y = source.1 as f32 / input_size as f32;
    let mut found = Vec::new();
    for i in 0..candidates {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, view[[0, row, i]]))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
        if !score.is_finite() || score < confidence_threshold {
            continue;
        }
        let (cx, cy) = (view[[0, 0, i]], view[[0, 1, i]]);
        let (w, h) = (view[[0, 2, i]], view[[0, 3, i]]);
        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * scale_x).round() as i32,
            ((cy - h / 2.0) * scale_y).round() as i32,
            ((cx + w / 2.0) * scale_x).round() as i32,
            ((cy + h / 2.0) * scale_y).round() as i32,
        );
        found.push(RawDetection {
            class_id: u16::try_from(class_id).unwrap_or(u16::MAX),
            confidence: score.clamp(0.0, 1.0),
            bbox,
        });
    }
    Ok(found)
}

/// Greedy per-class suppression; survivors are ordered by descending confidence.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(detections.len());
    for det in detections {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, image)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.infer(&blank).map(|_| ())
    }
}
