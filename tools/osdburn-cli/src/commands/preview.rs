//! Render one composited frame to PNG.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use osdburn_common::config::AppConfig;
use osdburn_render_engine::encoder::run_with_timeout;
use osdburn_render_engine::{find_ffmpeg, Compositor, SimpleRenderer};

use super::OverlayArgs;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

pub fn run(
    config: &AppConfig,
    video: PathBuf,
    at: f64,
    out: PathBuf,
    overlay_args: OverlayArgs,
) -> anyhow::Result<()> {
    let ffmpeg = find_ffmpeg(config.ffmpeg_path.as_deref())?;
    let overlay = overlay_args.load(config)?;

    let at = at.max(0.0);
    let still = std::env::temp_dir().join(format!("osdburn_preview_{}.png", std::process::id()));
    let args: Vec<String> = vec![
        "-hide_banner".into(),
        "-y".into(),
        "-ss".into(),
        format!("{at:.3}"),
        "-i".into(),
        video.display().to_string(),
        "-frames:v".into(),
        "1".into(),
        still.display().to_string(),
    ];
    let output = run_with_timeout(&ffmpeg, &args, EXTRACT_TIMEOUT)?;
    if !output.success() || !still.is_file() {
        anyhow::bail!(
            "Could not extract a frame at {at:.3}s from {}: {}",
            video.display(),
            osdburn_render_engine::tail_chars(output.stderr.trim_end(), 500)
        );
    }

    let base = image::open(&still)
        .with_context(|| format!("Failed to read extracted frame {}", still.display()))?
        .to_rgba8();
    if let Err(e) = std::fs::remove_file(&still) {
        tracing::debug!(path = %still.display(), error = %e, "Could not remove temporary frame");
    }

    let t_ms = (at * 1000.0).round() as i64;
    let osd_frame = overlay.osd.as_ref().map(|log| log.frame_at_time(t_ms));
    let status = overlay.text.as_ref().and_then(|text| text.status_at(t_ms));

    let mut renderer =
        SimpleRenderer::new(overlay.atlas.clone(), overlay.status_font.clone(), overlay.settings);
    let composed = renderer.composite(&base, osd_frame, status.as_deref());
    composed
        .save(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!("Preview written: {}", out.display());
    println!("  Frame: {}x{} at {at:.3}s", base.width(), base.height());
    match osd_frame {
        Some(frame) => println!("  OSD frame: #{} ({} ms)", frame.index, frame.time_ms),
        None => println!("  OSD frame: none"),
    }
    if let Some(status) = &status {
        println!("  Status: {status}");
    }
    for warning in &overlay.warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}
