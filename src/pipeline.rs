//! Detection-to-ripeness pipeline.
//!
//! Takes raw detector output for one image and turns it into ordered
//! detection records: clip, filter by class policy, classify the crop, round
//! the confidence, count, and optionally annotate a copy of the image.

use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::annotate::{self, Annotator};
use crate::classes::{ClassPolicy, FruitClassFilter};
use crate::detect::{BoundingBox, LabelSource, RawDetection};
use crate::error::PipelineError;
use crate::ripeness::{self, RipenessCategory};
use crate::stats::StatsAggregator;

/// One accepted detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub label: String,
    pub ripeness: RipenessCategory,
    /// Detector confidence rounded to two decimals, half away from zero.
    pub confidence: f32,
    /// Box clipped to the source image.
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// Rounds to two decimals, ties away from zero.
pub fn round_confidence(confidence: f32) -> f32 {
    ((confidence as f64 * 100.0).round() / 100.0) as f32
}

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub policy: ClassPolicy,
    pub annotate: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            policy: ClassPolicy::FruitOnly,
            annotate: true,
        }
    }
}

/// Records plus the preview image of one run.
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub records: Vec<DetectionRecord>,
    pub annotated: RgbImage,
}

pub struct DetectionPipeline {
    filter: FruitClassFilter,
    options: PipelineOptions,
    stats: Arc<StatsAggregator>,
    annotator: Annotator,
}

impl DetectionPipeline {
    pub fn new(filter: FruitClassFilter, options: PipelineOptions, stats: Arc<StatsAggregator>) -> Self {
        Self {
            filter,
            options,
            stats,
            annotator: Annotator::default(),
        }
    }

    /// Replaces the overlay renderer, e.g. with a configured caption font.
    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Runs on a borrowed image; annotations go onto a fresh copy.
    pub fn run(&self, image: &RgbImage, raw: &[RawDetection], labels: &dyn LabelSource) -> PipelineOutput {
        let mut annotated = image.clone();
        let records = self.process(image, raw, labels, Some(&mut annotated));
        PipelineOutput { records, annotated }
    }

    /// Runs and draws annotations directly onto `image`.
    ///
    /// Every crop is classified before anything is drawn, so overlays never
    /// feed back into ripeness.
    pub fn run_in_place(
        &self,
        image: &mut RgbImage,
        raw: &[RawDetection],
        labels: &dyn LabelSource,
    ) -> Vec<DetectionRecord> {
        let records = self.process(image, raw, labels, None);
        if self.options.annotate {
            for record in &records {
                self.draw(image, record);
            }
        }
        records
    }

    fn process(
        &self,
        image: &RgbImage,
        raw: &[RawDetection],
        labels: &dyn LabelSource,
        mut canvas: Option<&mut RgbImage>,
    ) -> Vec<DetectionRecord> {
        let mut records = Vec::with_capacity(raw.len());
        let mut skipped = 0usize;
        for det in raw {
            match self.accept(image, det, labels) {
                Ok(Some(record)) => {
                    self.stats.increment(record.ripeness);
                    if self.options.annotate {
                        if let Some(canvas) = canvas.as_deref_mut() {
                            self.draw(canvas, &record);
                        }
                    }
                    records.push(record);
                }
                Ok(None) => {}
                Err(PipelineError::EmptyCrop) => skipped += 1,
                Err(err) => log::warn!("detection dropped: {}", err),
            }
        }
        log::debug!(
            "pipeline: {} raw, {} records, {} empty boxes",
            raw.len(),
            records.len(),
            skipped
        );
        records
    }

    /// Turns one raw detection into a record, or `None` when the policy
    /// drops it.
    fn accept(
        &self,
        image: &RgbImage,
        det: &RawDetection,
        labels: &dyn LabelSource,
    ) -> Result<Option<DetectionRecord>, PipelineError> {
        let bbox = det.bbox.clip(image.width(), image.height())?;
        let ripeness = if self.filter.is_tracked(det.class_id) {
            let crop = image::imageops::crop_imm(
                image,
                bbox.x1 as u32,
                bbox.y1 as u32,
                bbox.width() as u32,
                bbox.height() as u32,
            );
            ripeness::classify(&crop.to_image())
        } else {
            match self.options.policy {
                ClassPolicy::FruitOnly => return Ok(None),
                ClassPolicy::AllWithSentinel => RipenessCategory::NotAFruit,
            }
        };
        Ok(Some(DetectionRecord {
            label: labels.label_of(det.class_id),
            ripeness,
            confidence: round_confidence(det.confidence),
            bbox,
        }))
    }

    fn draw(&self, canvas: &mut RgbImage, record: &DetectionRecord) {
        self.annotator.draw_detection(
            canvas,
            record.bbox,
            &annotate::caption(&record.label, record.ripeness),
            annotate::category_color(record.ripeness),
        );
    }
}
