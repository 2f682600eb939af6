//! Subcommands and the overlay/encode options they share.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use osdburn_common::config::AppConfig;
use osdburn_osd_model::{OsdLog, SrtTrack, TelemetryText};
use osdburn_render_engine::{
    load_font, Firmware, FontLibrary, GlyphAtlas, Placement, RenderSettings, TextRenderer,
};

pub mod check;
pub mod export;
pub mod fonts;
pub mod info;
pub mod preview;

/// What to draw over the video.
#[derive(Args, Debug, Clone)]
pub struct OverlayArgs {
    /// OSD log recorded with the video
    #[arg(long)]
    pub osd: Option<PathBuf>,

    /// SRT telemetry track for the status bar
    #[arg(long)]
    pub srt: Option<PathBuf>,

    /// Font folder path or library font name (default: first font for the log's firmware)
    #[arg(long)]
    pub font: Option<String>,

    /// Prefer SD font sheets over HD ones
    #[arg(long)]
    pub sd: bool,

    /// Horizontal grid offset in pixels
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub offset_x: i32,

    /// Vertical grid offset in pixels
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub offset_y: i32,

    /// Grid scale on top of the fit-to-height scale
    #[arg(long)]
    pub scale: Option<f32>,

    /// Hide the telemetry status bar
    #[arg(long)]
    pub no_status: bool,

    /// Status bar background opacity [0.0, 1.0]
    #[arg(long)]
    pub status_opacity: Option<f32>,
}

/// How to encode the output.
#[derive(Args, Debug, Clone)]
pub struct EncodeArgs {
    /// Codec: libx264 or libx265
    #[arg(long)]
    pub codec: Option<String>,

    /// Constant quality (x264 scale, lower is better)
    #[arg(long, conflicts_with = "bitrate")]
    pub crf: Option<u8>,

    /// Target bitrate in Mbps instead of constant quality
    #[arg(long)]
    pub bitrate: Option<f64>,

    /// Software encoder preset
    #[arg(long)]
    pub preset: Option<String>,

    /// Try hardware encoders first
    #[arg(long, conflicts_with = "no_hw")]
    pub hw: bool,

    /// Never use hardware encoders
    #[arg(long)]
    pub no_hw: bool,

    /// Trim start in seconds
    #[arg(long)]
    pub start: Option<f64>,

    /// Trim end in seconds
    #[arg(long)]
    pub end: Option<f64>,

    /// Upscale the output: 1440p, 2.7k or 4k
    #[arg(long)]
    pub upscale: Option<String>,
}

/// Loaded overlay inputs.
pub struct Overlay {
    pub osd: Option<Arc<OsdLog>>,
    pub atlas: Option<Arc<GlyphAtlas>>,
    pub text: Option<Arc<dyn TelemetryText>>,
    pub status_font: Arc<TextRenderer>,
    pub settings: RenderSettings,
    /// Non-fatal problems, already logged.
    pub warnings: Vec<String>,
}

impl OverlayArgs {
    /// Load everything the overlay needs. A bad OSD log is fatal; fonts and
    /// SRT tracks degrade with a warning.
    pub fn load(&self, config: &AppConfig) -> anyhow::Result<Overlay> {
        let mut warnings = Vec::new();

        let osd = match &self.osd {
            Some(path) => {
                let log = OsdLog::load(path)
                    .with_context(|| format!("Failed to load OSD log {}", path.display()))?;
                Some(Arc::new(log))
            }
            None => None,
        };

        let text: Option<Arc<dyn TelemetryText>> = match &self.srt {
            Some(path) => match SrtTrack::load(path) {
                Ok(track) => Some(Arc::new(track)),
                Err(e) => {
                    let warning = format!("Telemetry track {} not loaded: {e}", path.display());
                    tracing::warn!(path = %path.display(), error = %e, "Failed to load SRT track");
                    warnings.push(warning);
                    None
                }
            },
            None => None,
        };

        let atlas = match &osd {
            Some(log) => {
                let firmware =
                    Firmware::from_name(&log.firmware().display_name()).unwrap_or(Firmware::Other);
                self.resolve_font(config, firmware, &mut warnings)
            }
            None => None,
        };

        let settings = RenderSettings {
            placement: Placement {
                offset_x: self.offset_x,
                offset_y: self.offset_y,
                scale: self.scale.unwrap_or(config.render.scale),
            },
            show_status_bar: config.render.show_status_bar && !self.no_status,
            status_opacity: self
                .status_opacity
                .unwrap_or(config.render.status_opacity)
                .clamp(0.0, 1.0),
        };

        Ok(Overlay {
            osd,
            atlas,
            text,
            status_font: Arc::new(TextRenderer::load(config.status_font.as_deref())),
            settings,
            warnings,
        })
    }

    fn resolve_font(
        &self,
        config: &AppConfig,
        firmware: Firmware,
        warnings: &mut Vec<String>,
    ) -> Option<Arc<GlyphAtlas>> {
        let prefer_hd = config.render.prefer_hd && !self.sd;
        let library = match FontLibrary::scan(&config.fonts_dir) {
            Ok(library) => library,
            Err(e) => {
                tracing::warn!(
                    dir = %config.fonts_dir.display(),
                    error = %e,
                    "Failed to scan font library"
                );
                FontLibrary::default()
            }
        };

        let folder: Option<PathBuf> = match &self.font {
            Some(font) if Path::new(font).is_dir() => Some(PathBuf::from(font)),
            Some(font) => library.get(font).map(|entry| entry.path.clone()),
            None => library.default_for(firmware).map(|entry| entry.path.clone()),
        };

        let Some(folder) = folder else {
            let warning = match &self.font {
                Some(font) => format!("Font '{font}' not found, drawing OSD as plain text"),
                None => format!(
                    "No font installed in {}, drawing OSD as plain text",
                    config.fonts_dir.display()
                ),
            };
            tracing::warn!("{warning}");
            warnings.push(warning);
            return None;
        };

        match load_font(&folder, prefer_hd) {
            Ok(atlas) => {
                tracing::info!(
                    font = atlas.name(),
                    tile_w = atlas.tile_w(),
                    tile_h = atlas.tile_h(),
                    "Loaded OSD font"
                );
                Some(Arc::new(atlas))
            }
            Err(e) => {
                let warning = format!("Font {} not loaded: {e}", folder.display());
                tracing::warn!(folder = %folder.display(), error = %e, "Failed to load OSD font");
                warnings.push(warning);
                None
            }
        }
    }
}
