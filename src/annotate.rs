//! Box and caption overlays for the preview image.
//!
//! Drawing goes through `imageproc`; captions are rendered with an
//! `ab_glyph` TrueType font. Without a font only the box outlines are drawn.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::BoundingBox;
use crate::ripeness::RipenessCategory;

const OUTLINE_PX: i32 = 2;
const CAPTION_PX: f32 = 16.0;
const CAPTION_PAD: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Fonts tried when no font file is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Fixed overlay color per category.
pub fn category_color(category: RipenessCategory) -> Rgb<u8> {
    match category {
        RipenessCategory::Unripe => Rgb([46, 160, 67]),
        RipenessCategory::Ripe => Rgb([214, 39, 40]),
        RipenessCategory::Overripe => Rgb([140, 86, 75]),
        RipenessCategory::NotAFruit => Rgb([127, 127, 127]),
    }
}

/// Caption text for a detection, e.g. `apple (ripe)`.
pub fn caption(label: &str, category: RipenessCategory) -> String {
    format!("{} ({})", label, category)
}

/// Draws detection overlays with an optional caption font.
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Annotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self {
            font,
            scale: PxScale::from(CAPTION_PX),
        }
    }

    /// Loads a TrueType/OpenType font file. A configured font that cannot be
    /// loaded is an error.
    pub fn from_font_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))?;
        Ok(Self::new(Some(font)))
    }

    /// First loadable well-known system font, or outlines only.
    pub fn system() -> Self {
        for candidate in SYSTEM_FONTS {
            if !Path::new(candidate).is_file() {
                continue;
            }
            match Self::from_font_file(candidate) {
                Ok(annotator) => return annotator,
                Err(err) => log::debug!("skipping font: {:#}", err),
            }
        }
        log::warn!("no caption font found; annotations will draw boxes without captions");
        Self::new(None)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draws an outlined box with a caption bar onto `canvas`.
    ///
    /// `bbox` must already be clipped to the canvas. The caption sits above the
    /// box when there is room, otherwise just inside its top edge.
    pub fn draw_detection(&self, canvas: &mut RgbImage, bbox: BoundingBox, text: &str, color: Rgb<u8>) {
        for inset in 0..OUTLINE_PX {
            if let Some(ring) = rect(bbox.x1 + inset, bbox.y1 + inset, bbox.x2 - inset, bbox.y2 - inset) {
                draw_hollow_rect_mut(canvas, ring, color);
            }
        }

        let Some(font) = &self.font else {
            return;
        };
        if text.is_empty() {
            return;
        }
        let (text_w, text_h) = text_size(self.scale, font, text);
        let bar_w = text_w as i32 + CAPTION_PAD * 2;
        let bar_h = text_h as i32 + CAPTION_PAD * 2;
        let bar_y = if bbox.y1 >= bar_h { bbox.y1 - bar_h } else { bbox.y1 };
        if let Some(bar) = rect(bbox.x1, bar_y, bbox.x1 + bar_w, bar_y + bar_h) {
            draw_filled_rect_mut(canvas, bar, color);
        }
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            bbox.x1 + CAPTION_PAD,
            bar_y + CAPTION_PAD,
            self.scale,
            font,
            text,
        );
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::system()
    }
}

fn rect(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Rect> {
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BG: Rgb<u8> = Rgb([0, 0, 0]);

    fn text_pixels(canvas: &RgbImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| *canvas.get_pixel(x, y) == TEXT_COLOR)
            .count()
    }

    #[test]
    fn outline_is_two_pixels_and_interior_untouched() {
        let mut canvas = RgbImage::from_pixel(100, 100, BG);
        let color = category_color(RipenessCategory::Ripe);
        Annotator::new(None).draw_detection(&mut canvas, BoundingBox::new(20, 40, 80, 90), "", color);
        assert_eq!(*canvas.get_pixel(20, 60), color);
        assert_eq!(*canvas.get_pixel(21, 60), color);
        assert_eq!(*canvas.get_pixel(22, 60), BG);
        assert_eq!(*canvas.get_pixel(79, 60), color);
        assert_eq!(*canvas.get_pixel(50, 89), color);
        assert_eq!(*canvas.get_pixel(50, 65), BG);
    }

    #[test]
    fn without_font_no_caption_bar_is_drawn() {
        let mut canvas = RgbImage::from_pixel(100, 100, BG);
        let color = category_color(RipenessCategory::Unripe);
        Annotator::new(None).draw_detection(&mut canvas, BoundingBox::new(10, 50, 90, 90), "apple (unripe)", color);
        assert_eq!(*canvas.get_pixel(12, 45), BG);
    }

    #[test]
    fn caption_renders_mixed_case_and_accented_labels() {
        let annotator = Annotator::system();
        if !annotator.has_font() {
            eprintln!("no system font available; caption rendering not exercised");
            return;
        }
        let color = category_color(RipenessCategory::Unripe);
        let mut upper = RgbImage::from_pixel(300, 100, BG);
        annotator.draw_detection(&mut upper, BoundingBox::new(10, 60, 290, 95), "CRÈME (UNRIPE)", color);
        let mut lower = RgbImage::from_pixel(300, 100, BG);
        annotator.draw_detection(&mut lower, BoundingBox::new(10, 60, 290, 95), "crème (unripe)", color);

        assert!(text_pixels(&lower, 10..290, 0..60) > 0);
        assert_eq!(*lower.get_pixel(10, 59), color);
        assert_ne!(upper, lower);
    }

    #[test]
    fn invalid_font_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"not a font").unwrap();
        assert!(Annotator::from_font_file(file.path()).is_err());
        assert!(Annotator::from_font_file("/nonexistent/font.ttf").is_err());
    }

    #[test]
    fn drawing_at_the_edges_does_not_panic() {
        let mut canvas = RgbImage::from_pixel(8, 8, BG);
        let color = category_color(RipenessCategory::NotAFruit);
        Annotator::system().draw_detection(&mut canvas, BoundingBox::new(0, 0, 8, 8), "a very long caption", color);
        assert_eq!(*canvas.get_pixel(0, 7), color);
        Annotator::new(None).draw_detection(&mut canvas, BoundingBox::new(3, 3, 4, 4), "", color);
    }

    #[test]
    fn categories_have_distinct_colors() {
        let colors: std::collections::HashSet<_> = RipenessCategory::ALL
            .iter()
            .map(|c| category_color(*c).0)
            .collect();
        assert_eq!(colors.len(), RipenessCategory::ALL.len());
    }

    #[test]
    fn caption_format() {
        assert_eq!(caption("banana", RipenessCategory::Overripe), "banana (overripe)");
    }
}
