//! OSD compositing: grid geometry, the renderer contract, and the one-shot
//! renderer used for previews.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use osdburn_osd_model::{OsdFrame, GRID_COLS, GRID_ROWS};

use crate::atlas::GlyphAtlas;
use crate::blend;
use crate::status::render_status_patch;
use crate::text::TextRenderer;

/// User adjustments to where the grid lands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub offset_x: i32,
    pub offset_y: i32,
    /// Multiplier on top of the fit-to-height scale.
    pub scale: f32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            offset_x: 0,
            offset_y: 0,
            scale: 1.0,
        }
    }
}

/// Everything that affects the look of a composited frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub placement: Placement,
    pub show_status_bar: bool,
    /// Status bar background opacity in [0, 1].
    pub status_opacity: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            placement: Placement::default(),
            show_status_bar: true,
            status_opacity: 0.6,
        }
    }
}

/// Output-pixel layout of the 53×20 grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayGeometry {
    pub tile_w: u32,
    pub tile_h: u32,
    pub origin_x: i64,
    pub origin_y: i64,
}

impl OverlayGeometry {
    /// Fit the grid to the frame height, centre it, then apply the user's
    /// scale and offsets.
    pub fn for_atlas(
        frame_w: u32,
        frame_h: u32,
        tile_w: u32,
        tile_h: u32,
        placement: Placement,
    ) -> Self {
        let rows = GRID_ROWS as f64;
        let cols = GRID_COLS as f64;
        let fit = f64::from(frame_h) / (rows * f64::from(tile_h.max(1)));
        let eff = fit * f64::from(placement.scale);

        let grid_w = cols * f64::from(tile_w) * eff;
        let grid_h = rows * f64::from(tile_h) * eff;
        let centre_x = ((f64::from(frame_w) - grid_w) / 2.0).trunc() as i64;
        let centre_y = ((f64::from(frame_h) - grid_h) / 2.0).trunc() as i64;

        Self {
            tile_w: ((f64::from(tile_w) * eff).floor() as u32).max(1),
            tile_h: ((f64::from(tile_h) * eff).floor() as u32).max(1),
            origin_x: centre_x + i64::from(placement.offset_x),
            origin_y: centre_y + i64::from(placement.offset_y),
        }
    }

    /// Character cells for drawing without a font sheet.
    pub fn fallback(frame_w: u32, frame_h: u32, placement: Placement) -> Self {
        Self {
            tile_w: (frame_w / GRID_COLS as u32).max(8),
            tile_h: (frame_h / GRID_ROWS as u32).max(8),
            origin_x: i64::from(placement.offset_x),
            origin_y: i64::from(placement.offset_y),
        }
    }

    pub fn for_frame(
        frame_w: u32,
        frame_h: u32,
        atlas: Option<&GlyphAtlas>,
        placement: Placement,
    ) -> Self {
        match atlas {
            Some(atlas) => {
                Self::for_atlas(frame_w, frame_h, atlas.tile_w(), atlas.tile_h(), placement)
            }
            None => Self::fallback(frame_w, frame_h, placement),
        }
    }

    /// Top-left pixel of a grid cell.
    pub fn cell_origin(&self, row: usize, col: usize) -> (i64, i64) {
        (
            self.origin_x + col as i64 * i64::from(self.tile_w),
            self.origin_y + row as i64 * i64::from(self.tile_h),
        )
    }

    /// Whether a tile at `(x, y)` touches the frame at all.
    pub fn tile_visible(&self, x: i64, y: i64, frame_w: u32, frame_h: u32) -> bool {
        x < i64::from(frame_w)
            && y < i64::from(frame_h)
            && x + i64::from(self.tile_w) > 0
            && y + i64::from(self.tile_h) > 0
    }
}

/// Draws OSD and status text onto video frames.
///
/// With no OSD frame and no status text the result equals `base`.
pub trait Compositor {
    fn composite(
        &mut self,
        base: &RgbaImage,
        osd: Option<&OsdFrame>,
        status: Option<&str>,
    ) -> &RgbaImage;
}

/// Stateless renderer for single frames: nothing is cached between calls.
#[derive(Debug)]
pub struct SimpleRenderer {
    atlas: Option<Arc<GlyphAtlas>>,
    text: Arc<TextRenderer>,
    settings: RenderSettings,
    output: RgbaImage,
}

impl SimpleRenderer {
    pub fn new(
        atlas: Option<Arc<GlyphAtlas>>,
        text: Arc<TextRenderer>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            atlas,
            text,
            settings,
            output: RgbaImage::new(0, 0),
        }
    }
}

impl Compositor for SimpleRenderer {
    fn composite(
        &mut self,
        base: &RgbaImage,
        osd: Option<&OsdFrame>,
        status: Option<&str>,
    ) -> &RgbaImage {
        self.output.clone_from(base);
        let (w, h) = base.dimensions();
        let geometry =
            OverlayGeometry::for_frame(w, h, self.atlas.as_deref(), self.settings.placement);

        if let Some(osd) = osd {
            match self.atlas.as_deref() {
                Some(atlas) => {
                    for (row, col, code) in osd.non_empty() {
                        let (x, y) = geometry.cell_origin(row, col);
                        if !geometry.tile_visible(x, y, w, h) {
                            continue;
                        }
                        let Some(glyph) = atlas.glyph(code) else {
                            continue;
                        };
                        let glyph = imageops::resize(
                            &glyph,
                            geometry.tile_w,
                            geometry.tile_h,
                            FilterType::Lanczos3,
                        );
                        blend::blend_onto(&mut self.output, &glyph, None, x, y);
                    }
                }
                None => draw_fallback_cells(&mut self.output, osd, &geometry, &self.text),
            }
        }

        if let Some(message) = active_status(&self.settings, status) {
            render_status_patch(&self.text, message, w, h, self.settings.status_opacity)
                .draw_onto(&mut self.output);
        }

        &self.output
    }
}

/// Status text to draw, if the bar is on and the text is non-empty.
pub(crate) fn active_status<'a>(
    settings: &RenderSettings,
    status: Option<&'a str>,
) -> Option<&'a str> {
    status.filter(|s| settings.show_status_bar && !s.is_empty())
}

const FALLBACK_TEXT: [u8; 3] = [255, 255, 0];
const FALLBACK_TEXT_ALPHA: f32 = 220.0 / 255.0;
const FALLBACK_SHADOW: [u8; 3] = [0, 0, 0];
const FALLBACK_SHADOW_ALPHA: f32 = 200.0 / 255.0;

/// Draw each non-empty cell as its ASCII character, yellow over a 1 px
/// dark shadow. Codes outside printable ASCII show as a dot.
pub(crate) fn draw_fallback_cells(
    frame: &mut RgbaImage,
    osd: &OsdFrame,
    geometry: &OverlayGeometry,
    text: &TextRenderer,
) {
    let size = (geometry.tile_h as f32 * 0.8).max(8.0);
    let mut buf = [0u8; 4];

    for (row, col, code) in osd.non_empty() {
        let ch = match code {
            32..=126 => char::from(code as u8),
            _ => '\u{b7}',
        };
        let mask = text.render(ch.encode_utf8(&mut buf), size);
        let (x, y) = geometry.cell_origin(row, col);

        paint_mask(frame, &mask, x + 1, y + 1, FALLBACK_SHADOW, FALLBACK_SHADOW_ALPHA);
        paint_mask(frame, &mask, x, y, FALLBACK_TEXT, FALLBACK_TEXT_ALPHA);
    }
}

fn paint_mask(
    frame: &mut RgbaImage,
    mask: &crate::text::TextMask,
    x: i64,
    y: i64,
    rgb: [u8; 3],
    alpha: f32,
) {
    let (w, h) = (i64::from(frame.width()), i64::from(frame.height()));
    for my in 0..mask.height {
        let py = y + i64::from(my);
        if py < 0 || py >= h {
            continue;
        }
        for mx in 0..mask.width {
            let px = x + i64::from(mx);
            let coverage = mask.at(mx, my);
            if px < 0 || px >= w || coverage == 0 {
                continue;
            }
            let a_s = alpha * f32::from(coverage) / 255.0;
            blend::over(frame.get_pixel_mut(px as u32, py as u32), rgb, a_s);
        }
    }
}
