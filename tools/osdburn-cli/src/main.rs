//! osdburn CLI — Burn FPV OSD recordings into video.
//!
//! Usage:
//!   osdburn info <OSD>          Show what an OSD log contains
//!   osdburn fonts               List installed OSD fonts
//!   osdburn check               Check FFmpeg, encoders and fonts
//!   osdburn preview <VIDEO>     Render one composited frame to PNG
//!   osdburn export <VIDEO>      Burn the OSD into a new video file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use osdburn_common::config::{AppConfig, LoggingConfig};
use osdburn_common::logging::{init_logging, level_for_verbosity};

mod commands;

#[derive(Parser)]
#[command(
    name = "osdburn",
    about = "Burn recorded FPV OSD overlays into flight video",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show firmware, timing and flight stats of an OSD log
    Info {
        /// Path to the .osd file
        osd: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List fonts in the font library
    Fonts {
        /// Only fonts for this firmware (betaflight, inav, ardupilot, quicksilver)
        #[arg(long)]
        firmware: Option<String>,

        /// Font library directory (defaults to the configured one)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Check FFmpeg, encoders and fonts
    Check,

    /// Composite a single frame and save it as PNG
    Preview {
        /// Source video
        video: PathBuf,

        /// Video time in seconds
        #[arg(long, default_value = "0")]
        at: f64,

        /// Output PNG path
        #[arg(short, long, default_value = "preview.png")]
        out: PathBuf,

        #[command(flatten)]
        overlay: commands::OverlayArgs,
    },

    /// Burn the OSD into a new video
    Export {
        /// Source video
        video: PathBuf,

        /// Output file path (defaults to <video>_osd.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        overlay: commands::OverlayArgs,

        #[command(flatten)]
        encode: commands::EncodeArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    // Initialize logging
    let level = if cli.verbose {
        level_for_verbosity(true).to_string()
    } else {
        config.logging.level.clone()
    };
    init_logging(&LoggingConfig {
        level,
        ..config.logging.clone()
    });

    match cli.command {
        Commands::Info { osd, json } => commands::info::run(osd, json),
        Commands::Fonts { firmware, dir } => commands::fonts::run(&config, firmware, dir),
        Commands::Check => commands::check::run(&config),
        Commands::Preview {
            video,
            at,
            out,
            overlay,
        } => commands::preview::run(&config, video, at, out, overlay),
        Commands::Export {
            video,
            output,
            overlay,
            encode,
        } => commands::export::run(&config, video, output, overlay, encode).await,
    }
}
