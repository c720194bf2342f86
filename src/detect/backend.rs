use std::collections::BTreeMap;

use anyhow::Result;
use image::RgbImage;

use crate::classes::coco_label;
use crate::detect::result::RawDetection;

/// Object detector backend.
///
/// Backends are opaque blocking calls from the pipeline's point of view. A
/// backend instance is never shared between threads without its registry
/// mutex, so implementations do not need to be reentrant.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded RGB image.
    ///
    /// Boxes are in source pixel coordinates and may overhang the image.
    /// Emission order is significant: it becomes the response order.
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Human-readable name for a class id, tracked or not.
    fn label_of(&self, class_id: u16) -> String {
        coco_label(class_id)
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Class-id to label lookup consumed by the pipeline.
pub trait LabelSource {
    fn label_of(&self, class_id: u16) -> String;
}

/// Labels for the COCO-80 table, independent of any loaded backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct CocoLabels;

impl LabelSource for CocoLabels {
    fn label_of(&self, class_id: u16) -> String {
        coco_label(class_id)
    }
}

/// Labels captured from a backend for the ids of one inference call, so the
/// backend lock can be released before the pipeline runs.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    labels: BTreeMap<u16, String>,
}

impl LabelTable {
    pub fn capture(backend: &dyn DetectorBackend, detections: &[RawDetection]) -> Self {
        let mut labels = BTreeMap::new();
        for det in detections {
            labels
                .entry(det.class_id)
                .or_insert_with(|| backend.label_of(det.class_id));
        }
        Self { labels }
    }
}

impl LabelSource for LabelTable {
    fn label_of(&self, class_id: u16) -> String {
        self.labels
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| coco_label(class_id))
    }
}

/// Detections of one inference call plus their labels.
#[derive(Clone, Debug, Default)]
pub struct Inference {
    pub detections: Vec<RawDetection>,
    pub labels: LabelTable,
}
