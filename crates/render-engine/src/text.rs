//! Status-bar text rasterization.

use std::path::{Path, PathBuf};

use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use osdburn_common::error::{OsdburnError, OsdburnResult};

use crate::builtin_font;

/// Fonts tried when no status font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// 8-bit coverage of a rendered line, tightly bounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextMask {
    pub width: u32,
    pub height: u32,
    pub coverage: Vec<u8>,
}

impl TextMask {
    fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            coverage: vec![0; (width * height) as usize],
        }
    }

    pub fn at(&self, x: u32, y: u32) -> u8 {
        self.coverage[(y * self.width + x) as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

enum Face {
    TrueType(Box<Font>),
    Bitmap,
}

/// Draws single lines of text. Never fails to render: without a TrueType
/// face the built-in bitmap face is scaled up.
pub struct TextRenderer {
    face: Face,
    source: Option<PathBuf>,
}

impl std::fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRenderer")
            .field("source", &self.source)
            .field("builtin", &self.is_builtin())
            .finish()
    }
}

impl TextRenderer {
    /// The embedded 5×7 face.
    pub fn builtin() -> Self {
        Self {
            face: Face::Bitmap,
            source: None,
        }
    }

    pub fn from_ttf_bytes(bytes: Vec<u8>) -> OsdburnResult<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| OsdburnError::font(format!("invalid TrueType font: {e}")))?;
        Ok(Self {
            face: Face::TrueType(Box::new(font)),
            source: None,
        })
    }

    pub fn from_ttf_file(path: &Path) -> OsdburnResult<Self> {
        let bytes = std::fs::read(path)?;
        let mut renderer = Self::from_ttf_bytes(bytes)?;
        renderer.source = Some(path.to_path_buf());
        Ok(renderer)
    }

    /// The configured font if it loads, else the first usable system font,
    /// else the built-in face.
    pub fn load(configured: Option<&Path>) -> Self {
        if let Some(path) = configured {
            match Self::from_ttf_file(path) {
                Ok(renderer) => return renderer,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to load status font")
                }
            }
        }

        for candidate in SYSTEM_FONTS.iter().map(Path::new) {
            if !candidate.is_file() {
                continue;
            }
            if let Ok(renderer) = Self::from_ttf_file(candidate) {
                tracing::debug!(path = %candidate.display(), "Using system font for status bar");
                return renderer;
            }
        }

        tracing::debug!("No TrueType font found, using built-in bitmap font");
        Self::builtin()
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.face, Face::Bitmap)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Rasterize `text` at pixel size `size`.
    pub fn render(&self, text: &str, size: f32) -> TextMask {
        match &self.face {
            Face::TrueType(font) => render_truetype(font, text, size),
            Face::Bitmap => render_bitmap(text, size),
        }
    }
}

fn render_truetype(font: &Font, text: &str, size: f32) -> TextMask {
    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings {
        x: 0.0,
        y: 0.0,
        ..LayoutSettings::default()
    });
    layout.append(&[font], &TextStyle::new(text, size, 0));

    let placed: Vec<_> = layout
        .glyphs()
        .iter()
        .filter(|g| g.width > 0 && g.height > 0)
        .map(|g| (g.x.round() as i32, g.y.round() as i32, g))
        .collect();

    let Some(min_x) = placed.iter().map(|(x, _, _)| *x).min() else {
        return TextMask::default();
    };
    let min_y = placed.iter().map(|(_, y, _)| *y).min().unwrap_or(0);
    let max_x = placed
        .iter()
        .map(|(x, _, g)| x + g.width as i32)
        .max()
        .unwrap_or(min_x);
    let max_y = placed
        .iter()
        .map(|(_, y, g)| y + g.height as i32)
        .max()
        .unwrap_or(min_y);

    let mut mask = TextMask::blank((max_x - min_x) as u32, (max_y - min_y) as u32);
    for (gx, gy, glyph) in placed {
        let (_, bitmap) = font.rasterize_config(glyph.key);
        for row in 0..glyph.height {
            for col in 0..glyph.width {
                let value = bitmap[row * glyph.width + col];
                if value == 0 {
                    continue;
                }
                let x = (gx - min_x) as u32 + col as u32;
                let y = (gy - min_y) as u32 + row as u32;
                let idx = (y * mask.width + x) as usize;
                mask.coverage[idx] = mask.coverage[idx].max(value);
            }
        }
    }
    mask
}

/// Integer-scaled bitmap text. The 7-row glyph is scaled so a line is
/// roughly `size` pixels tall including spacing.
fn render_bitmap(text: &str, size: f32) -> TextMask {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return TextMask::default();
    }

    let scale = ((size / (builtin_font::GLYPH_H + 1) as f32).round() as u32).max(1);
    let width = (chars.len() as u32 * builtin_font::ADVANCE - 1) * scale;
    let height = builtin_font::GLYPH_H * scale;

    let mut mask = TextMask::blank(width, height);
    for (i, &ch) in chars.iter().enumerate() {
        let origin = i as u32 * builtin_font::ADVANCE * scale;
        for fy in 0..builtin_font::GLYPH_H {
            for fx in 0..builtin_font::GLYPH_W {
                if !builtin_font::is_set(ch, fx, fy) {
                    continue;
                }
                for dy in 0..scale {
                    let row = (fy * scale + dy) * width;
                    let start = (row + origin + fx * scale) as usize;
                    mask.coverage[start..start + scale as usize].fill(255);
                }
            }
        }
    }
    mask
}
