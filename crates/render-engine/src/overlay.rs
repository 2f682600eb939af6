//! Export-path renderer with persistent caches and one reusable buffer.

use std::collections::HashMap;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use osdburn_osd_model::OsdFrame;

use crate::atlas::GlyphAtlas;
use crate::blend;
use crate::cache::BoundedCache;
use crate::compositor::{
    active_status, draw_fallback_cells, Compositor, OverlayGeometry, RenderSettings,
};
use crate::status::{render_status_patch, StatusPatch};
use crate::text::TextRenderer;

/// Status patches kept per renderer.
pub const STATUS_CACHE_CAPACITY: usize = 512;

/// A glyph resized to the output tile, with its coverage plane split out.
#[derive(Debug, Clone)]
struct ScaledGlyph {
    image: RgbaImage,
    alpha: Vec<f32>,
}

/// Renderer for long exports.
///
/// Geometry is fixed at construction. Glyphs are resized once per code and
/// status bars once per `(text, opacity)`; every call reuses one buffer.
#[derive(Debug)]
pub struct OverlayRenderer {
    width: u32,
    height: u32,
    atlas: Option<Arc<GlyphAtlas>>,
    text: Arc<TextRenderer>,
    settings: RenderSettings,
    geometry: OverlayGeometry,
    glyphs: HashMap<u16, Option<ScaledGlyph>>,
    status_cache: BoundedCache<(String, i32), StatusPatch>,
    buffer: RgbaImage,
}

impl OverlayRenderer {
    pub fn new(
        width: u32,
        height: u32,
        atlas: Option<Arc<GlyphAtlas>>,
        text: Arc<TextRenderer>,
        settings: RenderSettings,
    ) -> Self {
        let geometry =
            OverlayGeometry::for_frame(width, height, atlas.as_deref(), settings.placement);
        tracing::debug!(
            width,
            height,
            tile_w = geometry.tile_w,
            tile_h = geometry.tile_h,
            origin_x = geometry.origin_x,
            origin_y = geometry.origin_y,
            font = atlas.as_ref().map(|a| a.name()).unwrap_or("<fallback>"),
            "Overlay renderer ready"
        );

        Self {
            width,
            height,
            atlas,
            text,
            settings,
            geometry,
            glyphs: HashMap::new(),
            status_cache: BoundedCache::new(STATUS_CACHE_CAPACITY),
            buffer: RgbaImage::new(width, height),
        }
    }

    pub fn geometry(&self) -> OverlayGeometry {
        self.geometry
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of distinct glyph codes resized so far.
    pub fn cached_glyphs(&self) -> usize {
        self.glyphs.len()
    }

    pub fn cached_status_bars(&self) -> usize {
        self.status_cache.len()
    }

    /// Render OSD and status onto a fully transparent frame and return the
    /// raw RGBA bytes. This is what gets piped to the encoder.
    pub fn render_overlay(&mut self, osd: Option<&OsdFrame>, status: Option<&str>) -> &[u8] {
        self.buffer.fill(0);
        self.paint(osd, status);
        self.buffer.as_raw()
    }

    fn paint(&mut self, osd: Option<&OsdFrame>, status: Option<&str>) {
        if let Some(osd) = osd {
            match self.atlas.clone() {
                Some(atlas) => self.paint_glyphs(&atlas, osd),
                None => draw_fallback_cells(&mut self.buffer, osd, &self.geometry, &self.text),
            }
        }

        if let Some(message) = active_status(&self.settings, status) {
            let key = (message.to_string(), opacity_key(self.settings.status_opacity));
            let (w, h, opacity) = (self.width, self.height, self.settings.status_opacity);
            let text = &self.text;
            let patch = self
                .status_cache
                .get_or_insert_with(key, || render_status_patch(text, message, w, h, opacity));
            patch.draw_onto(&mut self.buffer);
        }
    }

    fn paint_glyphs(&mut self, atlas: &GlyphAtlas, osd: &OsdFrame) {
        let geometry = self.geometry;
        for (row, col, code) in osd.non_empty() {
            let (x, y) = geometry.cell_origin(row, col);
            if !geometry.tile_visible(x, y, self.width, self.height) {
                continue;
            }
            let glyph = self
                .glyphs
                .entry(code)
                .or_insert_with(|| scale_glyph(atlas, code, &geometry));
            if let Some(glyph) = glyph {
                blend::blend_onto(&mut self.buffer, &glyph.image, Some(&glyph.alpha), x, y);
            }
        }
    }
}

impl Compositor for OverlayRenderer {
    fn composite(
        &mut self,
        base: &RgbaImage,
        osd: Option<&OsdFrame>,
        status: Option<&str>,
    ) -> &RgbaImage {
        if base.dimensions() != (self.width, self.height) {
            *self = Self::new(
                base.width(),
                base.height(),
                self.atlas.take(),
                self.text.clone(),
                self.settings,
            );
        }
        self.buffer.copy_from_slice(base.as_raw());
        self.paint(osd, status);
        &self.buffer
    }
}

fn scale_glyph(atlas: &GlyphAtlas, code: u16, geometry: &OverlayGeometry) -> Option<ScaledGlyph> {
    let glyph = atlas.glyph(code)?;
    let image = imageops::resize(&glyph, geometry.tile_w, geometry.tile_h, FilterType::Lanczos3);
    let alpha = blend::alpha_plane(&image);
    Some(ScaledGlyph { image, alpha })
}

/// Opacity rounded to two decimals, as an integer key.
fn opacity_key(opacity: f32) -> i32 {
    (opacity * 100.0).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn atlas_with_solid(code: u16, color: Rgba<u8>) -> Arc<GlyphAtlas> {
        let mut sheet = RgbaImage::new(24, 36 * 256);
        let row = u32::from(code % 256);
        for y in row * 36..(row + 1) * 36 {
            for x in 0..24 {
                sheet.put_pixel(x, y, color);
            }
        }
        Arc::new(GlyphAtlas::from_image(sheet, "solid").unwrap())
    }

    fn renderer(atlas: Option<Arc<GlyphAtlas>>) -> OverlayRenderer {
        OverlayRenderer::new(
            1272,
            720,
            atlas,
            Arc::new(TextRenderer::builtin()),
            RenderSettings::default(),
        )
    }

    #[test]
    fn test_empty_overlay_is_transparent() {
        let mut r = renderer(None);
        assert!(r.render_overlay(None, None).iter().all(|&b| b == 0));
        assert_eq!(r.render_overlay(None, None).len(), 1272 * 720 * 4);
    }

    #[test]
    fn test_buffer_is_cleared_between_frames() {
        let mut r = renderer(Some(atlas_with_solid(0x41, Rgba([255, 0, 0, 255]))));
        let mut frame = OsdFrame::blank(0, 0);
        frame.set_char(0, 0, 0x41);

        assert!(r.render_overlay(Some(&frame), None).iter().any(|&b| b != 0));
        assert!(r.render_overlay(None, None).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_glyphs_and_status_bars_are_cached() {
        let mut r = renderer(Some(atlas_with_solid(0x41, Rgba([255, 0, 0, 255]))));
        let mut frame = OsdFrame::blank(0, 0);
        frame.put_text(1, 1, "AAB");

        for _ in 0..3 {
            r.render_overlay(Some(&frame), Some("12.4V"));
        }
        assert_eq!(r.cached_glyphs(), 2);
        assert_eq!(r.cached_status_bars(), 1);

        r.render_overlay(Some(&frame), Some("12.3V"));
        assert_eq!(r.cached_status_bars(), 2);
    }

    #[test]
    fn test_partially_offscreen_glyph_is_clipped() {
        let atlas = atlas_with_solid(0x41, Rgba([0, 255, 0, 255]));
        let settings = RenderSettings {
            placement: crate::compositor::Placement {
                offset_x: -12,
                offset_y: 0,
                scale: 1.0,
            },
            ..RenderSettings::default()
        };
        let text = Arc::new(TextRenderer::builtin());
        let mut r = OverlayRenderer::new(1272, 720, Some(atlas), text, settings);
        let mut frame = OsdFrame::blank(0, 0);
        frame.set_char(0, 0, 0x41);

        let raw = r.render_overlay(Some(&frame), None).to_vec();
        let image = RgbaImage::from_raw(1272, 720, raw).unwrap();
        assert_eq!(*image.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
        assert_eq!(*image.get_pixel(11, 35), Rgba([0, 255, 0, 255]));
        assert_eq!(image.get_pixel(12, 0)[3], 0);
    }

    #[test]
    fn test_composite_identity_and_resize() {
        let mut r = renderer(Some(atlas_with_solid(0x41, Rgba([255, 0, 0, 255]))));
        let base = RgbaImage::from_fn(320, 180, |x, y| Rgba([x as u8, y as u8, 3, 255]));
        assert_eq!(r.composite(&base, None, None), &base);
        assert_eq!(r.dimensions(), (320, 180));
    }

    #[test]
    fn test_opacity_key_rounds_to_hundredths() {
        assert_eq!(opacity_key(0.6), 60);
        assert_eq!(opacity_key(0.604), 60);
        assert_eq!(opacity_key(0.605_1), 61);
    }
}
