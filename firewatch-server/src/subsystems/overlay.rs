//! Box and label drawing on annotated frames.

use ab_glyph::{FontArc, PxScale};
use firewatch_core::config::DetectorConfig;
use firewatch_core::{Detection, DetectionClass};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

const BOX_THICKNESS: u32 = 3;
const LABEL_PADDING: u32 = 2;
const LABEL_SCALE: f32 = 18.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Clone)]
pub struct Overlay {
    font: Option<FontArc>,
    scale: PxScale,
}

impl Default for Overlay {
    fn default() -> Self {
        Self {
            font: None,
            scale: PxScale::from(LABEL_SCALE),
        }
    }
}

impl Overlay {
    pub fn with_font(font: FontArc) -> Self {
        Self {
            font: Some(font),
            ..Self::default()
        }
    }

    /// Loads `detector.font_path` if set. A font that cannot be read only
    /// disables label text.
    pub fn from_config(config: &DetectorConfig) -> Self {
        let Some(path) = &config.font_path else {
            return Self::default();
        };
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => Self::with_font(font),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Label font unavailable, drawing boxes only");
                Self::default()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every detection: class-coloured outline plus a filled label
    /// `"<label> <confidence>"` above the box (inside it at the top edge).
    pub fn draw(&self, image: &mut RgbImage, detections: &[(DetectionClass, Detection)]) {
        for (class, detection) in detections {
            let color = Rgb(class.color());
            let Some(outline) = self.draw_box(image, detection, color) else {
                continue;
            };
            if let Some(font) = &self.font {
                let label = format!("{} {:.2}", class.label(), detection.confidence);
                self.draw_label(image, font, &label, outline, color);
            }
        }
    }

    fn draw_box(&self, image: &mut RgbImage, detection: &Detection, color: Rgb<u8>) -> Option<Rect> {
        let bbox = detection
            .bbox
            .clamp(image.width() as f32, image.height() as f32);
        let (w, h) = (bbox.width() as u32, bbox.height() as u32);
        if w == 0 || h == 0 {
            return None;
        }
        let outer = Rect::at(bbox.x1 as i32, bbox.y1 as i32).of_size(w, h);

        for inset in 0..BOX_THICKNESS {
            let (iw, ih) = (w.saturating_sub(2 * inset), h.saturating_sub(2 * inset));
            if iw == 0 || ih == 0 {
                break;
            }
            let rect = Rect::at(outer.left() + inset as i32, outer.top() + inset as i32)
                .of_size(iw, ih);
            draw_hollow_rect_mut(image, rect, color);
        }
        Some(outer)
    }

    fn draw_label(&self, image: &mut RgbImage, font: &FontArc, label: &str, outline: Rect, background: Rgb<u8>) {
        let (text_w, text_h) = text_size(self.scale, font, label);
        let bg = label_rect(outline, text_w, text_h);

        draw_filled_rect_mut(image, bg, background);
        draw_text_mut(
            image,
            TEXT_COLOR,
            bg.left() + LABEL_PADDING as i32,
            bg.top() + LABEL_PADDING as i32,
            self.scale,
            font,
            label,
        );
    }
}

/// Label background for a box: padded text size, sitting on top of the box,
/// or inside it at the top edge when there is no room above.
fn label_rect(outline: Rect, text_w: u32, text_h: u32) -> Rect {
    let bg_w = (text_w + 2 * LABEL_PADDING).max(1);
    let bg_h = (text_h + 2 * LABEL_PADDING).max(1);
    let top = if outline.top() >= bg_h as i32 {
        outline.top() - bg_h as i32
    } else {
        outline.top()
    };
    Rect::at(outline.left(), top).of_size(bg_w, bg_h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use firewatch_core::BoundingBox;

    fn detection(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            class_id: 0,
            confidence: 0.9,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        }
    }

    #[test]
    fn test_box_outline_is_three_pixels_wide() {
        let mut image = RgbImage::new(40, 40);
        let overlay = Overlay::default();
        overlay.draw(
            &mut image,
            &[(DetectionClass::Fire, detection(10.0, 10.0, 30.0, 30.0))],
        );

        let red = Rgb([255, 0, 0]);
        assert_eq!(*image.get_pixel(10, 20), red);
        assert_eq!(*image.get_pixel(12, 20), red);
        assert_eq!(*image.get_pixel(13, 20), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(20, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_smoke_uses_gray() {
        let mut image = RgbImage::new(20, 20);
        Overlay::default().draw(
            &mut image,
            &[(DetectionClass::Smoke, detection(0.0, 0.0, 10.0, 10.0))],
        );
        assert_eq!(*image.get_pixel(0, 5), Rgb([128, 128, 128]));
    }

    #[test]
    fn test_degenerate_and_out_of_frame_boxes_are_skipped() {
        let mut image = RgbImage::new(20, 20);
        let before = image.clone();
        Overlay::default().draw(
            &mut image,
            &[
                (DetectionClass::Fire, detection(5.0, 5.0, 5.0, 15.0)),
                (DetectionClass::Fire, detection(50.0, 50.0, 60.0, 60.0)),
            ],
        );
        assert_eq!(image, before);
    }

    #[test]
    fn test_thin_box_does_not_panic() {
        let mut image = RgbImage::new(20, 20);
        Overlay::default().draw(
            &mut image,
            &[(DetectionClass::Fire, detection(2.0, 2.0, 4.0, 18.0))],
        );
        assert_eq!(*image.get_pixel(2, 10), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_missing_font_falls_back_to_boxes_only() {
        let config = DetectorConfig {
            font_path: Some("/nonexistent/font.ttf".into()),
            ..DetectorConfig::default()
        };
        assert!(!Overlay::from_config(&config).has_font());
        assert!(!Overlay::from_config(&DetectorConfig::default()).has_font());
    }

    #[test]
    fn test_label_sits_above_box_when_there_is_room() {
        let outline = Rect::at(10, 40).of_size(30, 30);
        let bg = label_rect(outline, 20, 12);
        assert_eq!((bg.left(), bg.top()), (10, 24));
        assert_eq!((bg.width(), bg.height()), (24, 16));
        assert_eq!(bg.bottom() + 1, outline.top());
    }

    #[test]
    fn test_label_moves_inside_box_at_top_edge() {
        let outline = Rect::at(5, 3).of_size(30, 30);
        let bg = label_rect(outline, 20, 12);
        assert_eq!((bg.left(), bg.top()), (5, 3));
    }

    #[test]
    fn test_label_text_drawn_on_filled_background() {
        let candidates = [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
            "/System/Library/Fonts/Supplemental/Arial.ttf",
        ];
        let Some(font) = candidates
            .iter()
            .filter_map(|path| std::fs::read(path).ok())
            .find_map(|bytes| FontArc::try_from_vec(bytes).ok())
        else {
            eprintln!("no system font found, skipping label rendering check");
            return;
        };

        let overlay = Overlay::with_font(font);
        assert!(overlay.has_font());

        let mut image = RgbImage::new(120, 80);
        overlay.draw(
            &mut image,
            &[(DetectionClass::Fire, detection(10.0, 40.0, 100.0, 75.0))],
        );

        let label_area: Vec<Rgb<u8>> = (0..40)
            .flat_map(|y| (10..100).map(move |x| (x, y)))
            .map(|(x, y)| *image.get_pixel(x, y))
            .collect();
        let red = Rgb([255, 0, 0]);
        assert!(label_area.iter().any(|p| *p == red), "label background is filled");
        assert!(
            label_area.iter().any(|p| p.0.iter().all(|c| *c > 200) && *p != red),
            "label text is drawn in white"
        );
    }
}
