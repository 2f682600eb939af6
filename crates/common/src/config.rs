//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory containing one sub-folder per OSD font.
    pub fonts_dir: PathBuf,

    /// Explicit FFmpeg binary. `None` searches PATH.
    pub ffmpeg_path: Option<PathBuf>,

    /// TrueType font for the status bar. `None` tries a few system fonts
    /// and falls back to the built-in bitmap face.
    pub status_font: Option<PathBuf>,

    /// Default render settings.
    pub render: RenderDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default render parameters, overridable per job from the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// Software codec (`libx264` or `libx265`).
    pub codec: String,

    /// Constant-quality factor on the x264/x265 scale.
    pub crf: u8,

    /// Software encoder preset.
    pub preset: String,

    /// Prefer HD font sheets over SD ones.
    pub prefer_hd: bool,

    /// Try hardware encoders before falling back to software.
    pub use_hw: bool,

    /// Draw the telemetry status bar.
    pub show_status_bar: bool,

    /// Status bar background opacity [0.0, 1.0].
    pub status_opacity: f32,

    /// OSD grid scale on top of the auto-fit scale.
    pub scale: f32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "osdburn=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fonts_dir: default_fonts_dir(),
            ffmpeg_path: None,
            status_font: None,
            render: RenderDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            crf: 23,
            preset: "medium".to_string(),
            prefer_hd: true,
            use_hw: false,
            show_status_bar: true,
            status_opacity: 0.6,
            scale: 1.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("osdburn").join("config.json")
}

/// Default font library directory.
fn default_fonts_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("osdburn").join("fonts")
}
