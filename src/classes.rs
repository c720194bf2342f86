//! Tracked detector classes and the policy for untracked ones.

use serde::{Deserialize, Serialize};

/// Class ids reported as fruit in the reference deployment.
///
/// These are 0-based indices into the COCO-80 table emitted by YOLOv8 models.
pub const DEFAULT_TRACKED_CLASSES: [u16; 13] = [46, 47, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58];

/// COCO-80 class names, indexed by detector class id.
pub const COCO_CLASS_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Label lookup for an id in the COCO-80 table. Ids past the table get a
/// synthetic `class_<id>` label so every detection stays nameable.
pub fn coco_label(class_id: u16) -> String {
    COCO_CLASS_NAMES
        .get(class_id as usize)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("class_{class_id}"))
}

/// How untracked detections are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassPolicy {
    /// Drop every detection whose class is not tracked.
    #[default]
    FruitOnly,
    /// Keep every detection; untracked ones are reported as not-a-fruit.
    AllWithSentinel,
}

impl std::str::FromStr for ClassPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fruit_only" | "fruit-only" => Ok(ClassPolicy::FruitOnly),
            "all_with_sentinel" | "all-with-sentinel" | "all" => Ok(ClassPolicy::AllWithSentinel),
            other => Err(anyhow::anyhow!(
                "unknown class policy '{}'; expected fruit_only or all_with_sentinel",
                other
            )),
        }
    }
}

/// Immutable membership table for tracked class ids.
///
/// Backed by a fixed bitset over the `u16` id space so `is_tracked` is a
/// single word lookup.
#[derive(Clone, Debug)]
pub struct FruitClassFilter {
    bits: Box<[u64]>,
    len: usize,
}

const WORDS: usize = (u16::MAX as usize + 1) / 64;

impl FruitClassFilter {
    pub fn new(tracked: impl IntoIterator<Item = u16>) -> Self {
        let mut bits = vec![0u64; WORDS].into_boxed_slice();
        let mut len = 0;
        for id in tracked {
            let (word, bit) = (id as usize / 64, id as usize % 64);
            if bits[word] & (1u64 << bit) == 0 {
                bits[word] |= 1u64 << bit;
                len += 1;
            }
        }
        Self { bits, len }
    }

    pub fn is_tracked(&self, class_id: u16) -> bool {
        let (word, bit) = (class_id as usize / 64, class_id as usize % 64);
        self.bits[word] & (1u64 << bit) != 0
    }

    /// Number of tracked ids.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for FruitClassFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_CLASSES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_tracks_exactly_46_through_58() {
        let filter = FruitClassFilter::default();
        assert_eq!(filter.len(), 13);
        for id in 0..=u16::MAX {
            assert_eq!(filter.is_tracked(id), (46..=58).contains(&id), "id {id}");
        }
    }

    #[test]
    fn duplicate_ids_count_once() {
        let filter = FruitClassFilter::new([47, 47, 49]);
        assert_eq!(filter.len(), 2);
        assert!(filter.is_tracked(47));
        assert!(!filter.is_tracked(48));
    }

    #[test]
    fn labels_cover_tracked_and_unknown_ids() {
        assert_eq!(coco_label(46), "banana");
        assert_eq!(coco_label(47), "apple");
        assert_eq!(coco_label(49), "orange");
        assert_eq!(coco_label(0), "person");
        assert_eq!(coco_label(300), "class_300");
    }

    #[test]
    fn policy_parses_config_spellings() {
        assert_eq!("fruit_only".parse::<ClassPolicy>().unwrap(), ClassPolicy::FruitOnly);
        assert_eq!(
            "All-With-Sentinel".parse::<ClassPolicy>().unwrap(),
            ClassPolicy::AllWithSentinel
        );
        assert!("everything".parse::<ClassPolicy>().is_err());
    }
}
