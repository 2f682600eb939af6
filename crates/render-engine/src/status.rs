//! Bottom-centred telemetry status bar.

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;

use crate::blend;
use crate::text::TextRenderer;

const PADDING: i64 = 6;
const BOTTOM_MARGIN: i64 = 10;
const CORNER_RADIUS: i32 = 4;

/// Status text size for a frame height.
pub fn status_font_size(frame_h: u32) -> f32 {
    (frame_h / 42).max(14) as f32
}

/// A pre-rendered bar and where it goes on the frame.
#[derive(Debug, Clone)]
pub struct StatusPatch {
    pub x: i64,
    pub y: i64,
    pub image: RgbaImage,
    pub alpha: Vec<f32>,
}

impl StatusPatch {
    pub fn draw_onto(&self, frame: &mut RgbaImage) {
        blend::blend_onto(frame, &self.image, Some(&self.alpha), self.x, self.y);
    }
}

/// Render `message` as a rounded black bar with white text, horizontally
/// centred, `BOTTOM_MARGIN` above the bottom edge.
pub fn render_status_patch(
    text: &TextRenderer,
    message: &str,
    frame_w: u32,
    frame_h: u32,
    opacity: f32,
) -> StatusPatch {
    let mask = text.render(message, status_font_size(frame_h));
    let (tw, th) = (i64::from(mask.width), i64::from(mask.height));

    let text_x = (i64::from(frame_w) - tw).div_euclid(2);
    let text_y = i64::from(frame_h) - th - BOTTOM_MARGIN;

    // Inclusive box around the text, as wide as the text plus padding.
    let bar_w = (tw + 2 * PADDING + 1) as u32;
    let bar_h = (th + 2 * PADDING + 1) as u32;
    let mut image = RgbaImage::new(bar_w, bar_h);

    let background = Rgba([0, 0, 0, (opacity.clamp(0.0, 1.0) * 255.0) as u8]);
    fill_rounded_rect(&mut image, background, CORNER_RADIUS);

    for y in 0..mask.height {
        for x in 0..mask.width {
            let coverage = mask.at(x, y);
            if coverage == 0 {
                continue;
            }
            let px = image.get_pixel_mut(x + PADDING as u32, y + PADDING as u32);
            blend::over(px, [255, 255, 255], f32::from(coverage) / 255.0);
        }
    }

    let alpha = blend::alpha_plane(&image);
    StatusPatch {
        x: text_x - PADDING,
        y: text_y - PADDING,
        image,
        alpha,
    }
}

fn fill_rounded_rect(image: &mut RgbaImage, color: Rgba<u8>, radius: i32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let r = radius.min(w / 2).min(h / 2).max(0);

    if w > 2 * r {
        draw_filled_rect_mut(image, Rect::at(r, 0).of_size((w - 2 * r) as u32, h as u32), color);
    }
    if h > 2 * r {
        draw_filled_rect_mut(image, Rect::at(0, r).of_size(w as u32, (h - 2 * r) as u32), color);
    }
    if r > 0 {
        for (cx, cy) in [(r, r), (w - 1 - r, r), (r, h - 1 - r), (w - 1 - r, h - 1 - r)] {
            draw_filled_circle_mut(image, (cx, cy), r, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_size_has_floor() {
        assert_eq!(status_font_size(480), 14.0);
        assert_eq!(status_font_size(1080), 25.0);
        assert_eq!(status_font_size(2160), 51.0);
    }

    #[test]
    fn test_patch_is_centred_above_bottom_margin() {
        let text = TextRenderer::builtin();
        let patch = render_status_patch(&text, "RSSI 87", 1920, 1080, 0.6);

        let mask = text.render("RSSI 87", status_font_size(1080));
        assert_eq!(patch.image.width(), mask.width + 13);
        assert_eq!(patch.image.height(), mask.height + 13);
        assert_eq!(patch.x, (1920 - i64::from(mask.width)) / 2 - 6);
        assert_eq!(patch.y + i64::from(patch.image.height()), 1080 - 10 + 6 + 1);
    }

    #[test]
    fn test_background_alpha_follows_opacity_and_corners_are_clear() {
        let text = TextRenderer::builtin();
        let patch = render_status_patch(&text, "X", 640, 480, 0.6);

        assert_eq!(patch.image.get_pixel(0, 0)[3], 0);
        let edge_mid = patch.image.get_pixel(0, patch.image.height() / 2);
        assert_eq!(*edge_mid, Rgba([0, 0, 0, 153]));
    }

    #[test]
    fn test_text_pixels_are_opaque_white() {
        let text = TextRenderer::builtin();
        let patch = render_status_patch(&text, "I", 640, 480, 0.0);
        let white = patch
            .image
            .pixels()
            .filter(|p| **p == Rgba([255, 255, 255, 255]))
            .count();
        assert!(white > 0);
        // Background at zero opacity stays fully transparent.
        assert_eq!(patch.image.get_pixel(1, 1)[3], 0);
    }
}
