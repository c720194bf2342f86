//! Color-statistics ripeness heuristic.
//!
//! A crop is converted to HSV (channels on the 0..=255 scale), the mean
//! saturation and mean value are taken over every pixel, and the pair is
//! mapped to a category by fixed thresholds. The heuristic is not calibrated
//! per species; it is the same rule for every tracked class.

use image::{GenericImageView, Rgb};
use palette::{FromColor, Hsv, Srgb};
use serde::{Deserialize, Serialize};

/// Mean saturation strictly below this, together with a bright crop, reads as unripe.
pub const UNRIPE_MAX_SATURATION: f64 = 50.0;
/// Mean value strictly above this, together with a pale crop, reads as unripe.
pub const UNRIPE_MIN_VALUE: f64 = 150.0;
/// Mean saturation strictly above this, together with a lit crop, reads as ripe.
pub const RIPE_MIN_SATURATION: f64 = 100.0;
/// Mean value strictly above this, together with a saturated crop, reads as ripe.
pub const RIPE_MIN_VALUE: f64 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RipenessCategory {
    Unripe,
    Ripe,
    Overripe,
    /// Sentinel for untracked detections when every class is reported.
    NotAFruit,
}

impl RipenessCategory {
    pub const ALL: [RipenessCategory; 4] = [
        RipenessCategory::Unripe,
        RipenessCategory::Ripe,
        RipenessCategory::Overripe,
        RipenessCategory::NotAFruit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RipenessCategory::Unripe => "unripe",
            RipenessCategory::Ripe => "ripe",
            RipenessCategory::Overripe => "overripe",
            RipenessCategory::NotAFruit => "not_a_fruit",
        }
    }

    /// Dense index used by the stats counters.
    pub(crate) fn index(&self) -> usize {
        match self {
            RipenessCategory::Unripe => 0,
            RipenessCategory::Ripe => 1,
            RipenessCategory::Overripe => 2,
            RipenessCategory::NotAFruit => 3,
        }
    }
}

impl std::fmt::Display for RipenessCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mean saturation and value of a crop, both on the 0..=255 scale.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HsvMeans {
    pub saturation: f64,
    pub value: f64,
}

/// Computes HSV channel means over every pixel of `crop`.
///
/// Per-pixel channels are quantised to whole 0..=255 steps before averaging,
/// matching an 8-bit HSV conversion. An empty view yields zero means.
pub fn hsv_means<I>(crop: &I) -> HsvMeans
where
    I: GenericImageView<Pixel = Rgb<u8>>,
{
    let mut sat_sum = 0u64;
    let mut val_sum = 0u64;
    let mut count = 0u64;
    for (_, _, Rgb([r, g, b])) in crop.pixels() {
        let rgb: Srgb<f32> = Srgb::new(r, g, b).into_format();
        let hsv: Hsv = Hsv::from_color(rgb);
        sat_sum += to_channel(hsv.saturation) as u64;
        val_sum += to_channel(hsv.value) as u64;
        count += 1;
    }
    if count == 0 {
        return HsvMeans::default();
    }
    HsvMeans {
        saturation: sat_sum as f64 / count as f64,
        value: val_sum as f64 / count as f64,
    }
}

fn to_channel(unit: f32) -> u8 {
    (unit.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Maps channel means to a category. First matching rule wins; the last
/// bucket catches everything else, so the mapping is total.
pub fn classify_means(means: HsvMeans) -> RipenessCategory {
    if means.saturation < UNRIPE_MAX_SATURATION && means.value > UNRIPE_MIN_VALUE {
        RipenessCategory::Unripe
    } else if means.saturation > RIPE_MIN_SATURATION && means.value > RIPE_MIN_VALUE {
        RipenessCategory::Ripe
    } else {
        RipenessCategory::Overripe
    }
}

/// Classifies a non-empty crop. Callers skip zero-area boxes before this point.
pub fn classify<I>(crop: &I) -> RipenessCategory
where
    I: GenericImageView<Pixel = Rgb<u8>>,
{
    classify_means(hsv_means(crop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn solid(r: u8, g: u8, b: u8) -> RgbImage {
        RgbImage::from_pixel(8, 8, Rgb([r, g, b]))
    }

    #[test]
    fn pale_bright_crop_is_unripe() {
        let crop = solid(200, 190, 180);
        let means = hsv_means(&crop);
        assert_eq!(means.value, 200.0);
        assert!(means.saturation < 50.0);
        assert_eq!(classify(&crop), RipenessCategory::Unripe);
    }

    #[test]
    fn saturated_lit_crop_is_ripe() {
        let crop = solid(220, 40, 30);
        assert_eq!(classify(&crop), RipenessCategory::Ripe);
    }

    #[test]
    fn dark_crop_falls_through_to_overripe() {
        let crop = solid(60, 40, 20);
        assert_eq!(classify(&crop), RipenessCategory::Overripe);
    }

    #[test]
    fn white_crop_is_unripe_black_crop_is_overripe() {
        assert_eq!(classify(&solid(255, 255, 255)), RipenessCategory::Unripe);
        assert_eq!(classify(&solid(0, 0, 0)), RipenessCategory::Overripe);
    }

    #[test]
    fn thresholds_are_strict() {
        let at = |saturation, value| classify_means(HsvMeans { saturation, value });
        assert_eq!(at(49.9, 150.1), RipenessCategory::Unripe);
        assert_eq!(at(50.0, 200.0), RipenessCategory::Overripe);
        assert_eq!(at(30.0, 150.0), RipenessCategory::Overripe);
        assert_eq!(at(100.1, 100.1), RipenessCategory::Ripe);
        assert_eq!(at(100.0, 200.0), RipenessCategory::Overripe);
        assert_eq!(at(150.0, 100.0), RipenessCategory::Overripe);
    }

    #[test]
    fn unripe_rule_is_checked_before_ripe_rule() {
        // Both rules cannot match at once, but the order still matters for
        // the documented precedence; a bright pale crop never becomes ripe.
        assert_eq!(
            classify_means(HsvMeans {
                saturation: 10.0,
                value: 250.0
            }),
            RipenessCategory::Unripe
        );
    }

    #[test]
    fn means_average_over_all_pixels() {
        let mut crop = RgbImage::from_pixel(2, 1, Rgb([255, 0, 0]));
        crop.put_pixel(1, 0, Rgb([255, 255, 255]));
        let means = hsv_means(&crop);
        assert_eq!(means.saturation, 127.5);
        assert_eq!(means.value, 255.0);
    }

    #[test]
    fn classification_is_deterministic() {
        let crop = solid(123, 201, 77);
        let first = classify(&crop);
        for _ in 0..5 {
            assert_eq!(classify(&crop), first);
        }
    }

    #[test]
    fn categories_serialize_snake_case() {
        let json = serde_json::to_string(&RipenessCategory::NotAFruit).unwrap();
        assert_eq!(json, r#""not_a_fruit""#);
        assert_eq!(RipenessCategory::Overripe.to_string(), "overripe");
    }
}
