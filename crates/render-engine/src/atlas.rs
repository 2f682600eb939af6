//! OSD font sheets.
//!
//! A sheet is 256 glyphs tall. Wide sheets hold several 256-glyph pages side
//! by side, so code `c` lives at page `c / 256`, row `c % 256`.

use std::path::Path;

use image::RgbaImage;
use osdburn_common::error::{OsdburnError, OsdburnResult};

/// Glyph rows in every font sheet.
pub const GLYPHS_PER_PAGE: u32 = 256;

/// Pixel rectangle of one glyph inside the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Tile geometry inferred from a sheet's dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    pub tile_w: u32,
    pub tile_h: u32,
    pub n_cols: u32,
}

/// Infer tile size and page count from sheet dimensions.
///
/// Glyphs are 2:3, so the tile height picks the expected width. Sheets that
/// do not fit the table try the common widths, and as a last resort the
/// whole sheet is one column.
pub fn detect_layout(width: u32, height: u32) -> AtlasLayout {
    let tile_h = height / GLYPHS_PER_PAGE;

    let expected = match tile_h {
        36 => Some(24),
        54 => Some(36),
        72 => Some(48),
        108 => Some(72),
        _ => None,
    };

    let tile_w = expected
        .filter(|w| width % w == 0)
        .or_else(|| [24, 36, 48, 72].into_iter().find(|w| width % w == 0));

    match tile_w {
        Some(tile_w) => AtlasLayout {
            tile_w,
            tile_h,
            n_cols: width / tile_w,
        },
        None => AtlasLayout {
            tile_w: width,
            tile_h,
            n_cols: 1,
        },
    }
}

/// A loaded font sheet. Immutable once built.
#[derive(Debug, Clone)]
pub struct GlyphAtlas {
    image: RgbaImage,
    layout: AtlasLayout,
    name: String,
}

impl GlyphAtlas {
    pub fn from_image(image: RgbaImage, name: impl Into<String>) -> OsdburnResult<Self> {
        let (width, height) = image.dimensions();
        if height < GLYPHS_PER_PAGE || width == 0 {
            return Err(OsdburnError::font(format!(
                "font sheet is {width}x{height}, need at least {GLYPHS_PER_PAGE} px tall"
            )));
        }

        let layout = detect_layout(width, height);
        let name = name.into();
        tracing::debug!(
            font = %name,
            tile_w = layout.tile_w,
            tile_h = layout.tile_h,
            n_cols = layout.n_cols,
            "Loaded font sheet"
        );

        Ok(Self {
            image,
            layout,
            name,
        })
    }

    /// Load a sheet from a PNG. The atlas is named after the parent folder.
    pub fn open(path: impl AsRef<Path>) -> OsdburnResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(OsdburnError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let image = image::open(path)
            .map_err(|e| OsdburnError::font(format!("failed to read {}: {e}", path.display())))?
            .into_rgba8();
        let name = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_image(image, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> AtlasLayout {
        self.layout
    }

    pub fn tile_w(&self) -> u32 {
        self.layout.tile_w
    }

    pub fn tile_h(&self) -> u32 {
        self.layout.tile_h
    }

    pub fn n_cols(&self) -> u32 {
        self.layout.n_cols
    }

    /// Where `code` lives in the sheet. Pages past the last fall back to
    /// page 0; rectangles that leave the image are `None`.
    pub fn glyph_rect(&self, code: u16) -> Option<GlyphRect> {
        let AtlasLayout {
            tile_w,
            tile_h,
            n_cols,
        } = self.layout;

        let code = u32::from(code);
        let mut col = code / GLYPHS_PER_PAGE;
        let row = code % GLYPHS_PER_PAGE;
        if col >= n_cols {
            col = 0;
        }

        let x = col * tile_w;
        let y = row * tile_h;
        if x + tile_w > self.image.width() || y + tile_h > self.image.height() {
            return None;
        }
        Some(GlyphRect {
            x,
            y,
            width: tile_w,
            height: tile_h,
        })
    }

    /// Cropped copy of the glyph for `code`.
    pub fn glyph(&self, code: u16) -> Option<RgbaImage> {
        let rect = self.glyph_rect(code)?;
        Some(
            image::imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height)
                .to_image(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_detect_layout_standard_sheets() {
        // Betaflight HD, four pages of 24x36.
        assert_eq!(
            detect_layout(96, 36 * 256),
            AtlasLayout {
                tile_w: 24,
                tile_h: 36,
                n_cols: 4
            }
        );
        // INAV SD single page.
        assert_eq!(detect_layout(72, 54 * 256).n_cols, 2);
        assert_eq!(detect_layout(36, 54 * 256).tile_w, 36);
        // Tall INAV variant.
        assert_eq!(detect_layout(72, 108 * 256).n_cols, 1);
    }

    #[test]
    fn test_detect_layout_fallbacks() {
        // Unknown tile height, width divisible by 36 but not 24.
        let layout = detect_layout(180, 40 * 256);
        assert_eq!((layout.tile_w, layout.n_cols), (36, 5));

        // Nothing divides: whole width is one column.
        let layout = detect_layout(50, 36 * 256);
        assert_eq!((layout.tile_w, layout.tile_h, layout.n_cols), (50, 36, 1));
    }

    #[test]
    fn test_short_sheet_is_rejected() {
        let err = GlyphAtlas::from_image(RgbaImage::new(24, 100), "tiny").unwrap_err();
        assert!(matches!(err, OsdburnError::Font { .. }));
    }

    #[test]
    fn test_glyph_addressing_and_fallback() {
        let atlas = GlyphAtlas::from_image(RgbaImage::new(48, 36 * 256), "two_pages").unwrap();
        assert_eq!(atlas.n_cols(), 2);

        let rect = atlas.glyph_rect(0x141).unwrap();
        assert_eq!((rect.x, rect.y), (24, 0x41 * 36));

        // Page 3 does not exist; falls back to page 0.
        let rect = atlas.glyph_rect(3 * 256 + 7).unwrap();
        assert_eq!((rect.x, rect.y), (0, 7 * 36));
    }

    #[test]
    fn test_glyph_crops_the_right_pixels() {
        let mut sheet = RgbaImage::new(24, 36 * 256);
        for y in 36..72 {
            for x in 0..24 {
                sheet.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        let atlas = GlyphAtlas::from_image(sheet, "red").unwrap();

        let glyph = atlas.glyph(1).unwrap();
        assert_eq!(glyph.dimensions(), (24, 36));
        assert!(glyph.pixels().all(|p| *p == Rgba([255, 0, 0, 255])));
        assert!(atlas.glyph(0).unwrap().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_every_code_addresses_inside_sheet() {
        for (w, h) in [(30, 256), (50, 512), (96, 36 * 256)] {
            let atlas = GlyphAtlas::from_image(RgbaImage::new(w, h), "sheet").unwrap();
            for code in 0..=u16::MAX {
                let rect = atlas.glyph_rect(code).unwrap();
                assert!(rect.x + rect.width <= w);
                assert!(rect.y + rect.height <= h);
            }
        }
    }
}
