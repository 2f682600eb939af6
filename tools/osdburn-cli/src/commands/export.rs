//! Burn the OSD into a video.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use osdburn_common::config::AppConfig;
use osdburn_render_engine::{
    export_video, find_ffmpeg, CancelToken, EncoderProbe, ExportError, ExportJob,
    ExportProgress, Quality, UpscaleTarget, VideoCodec,
};

use super::{EncodeArgs, OverlayArgs};

pub async fn run(
    config: &AppConfig,
    video: PathBuf,
    output: Option<PathBuf>,
    overlay_args: OverlayArgs,
    encode: EncodeArgs,
) -> anyhow::Result<()> {
    let ffmpeg = find_ffmpeg(config.ffmpeg_path.as_deref())?;
    let overlay = overlay_args.load(config)?;

    let codec: VideoCodec = encode
        .codec
        .as_deref()
        .unwrap_or(&config.render.codec)
        .parse()
        .map_err(anyhow::Error::msg)?;
    let quality = match encode.bitrate {
        Some(mbps) if mbps > 0.0 => Quality::BitrateMbps(mbps),
        Some(mbps) => anyhow::bail!("Bitrate must be positive, got {mbps}"),
        None => Quality::Crf(encode.crf.unwrap_or(config.render.crf)),
    };
    let upscale = encode
        .upscale
        .as_deref()
        .map(str::parse::<UpscaleTarget>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let output_path = output.unwrap_or_else(|| default_output(&video));

    println!("Exporting: {}", video.display());
    println!("  Output: {}", output_path.display());
    if let Some(log) = &overlay.osd {
        println!(
            "  OSD: {} frames ({})",
            log.frame_count(),
            log.firmware().display_name()
        );
    }
    match &overlay.atlas {
        Some(atlas) => println!("  Font: {}", atlas.name()),
        None if overlay.osd.is_some() => println!("  Font: none (plain text)"),
        None => {}
    }

    let mut job = ExportJob::new(&video, &output_path);
    job.osd = overlay.osd;
    job.atlas = overlay.atlas;
    job.text = overlay.text;
    job.status_font = overlay.status_font;
    job.settings = overlay.settings;
    job.codec = codec;
    job.quality = quality;
    job.preset = encode
        .preset
        .unwrap_or_else(|| config.render.preset.clone());
    job.use_hw = (config.render.use_hw || encode.hw) && !encode.no_hw;
    job.trim_start_s = encode.start;
    job.trim_end_s = encode.end;
    job.upscale = upscale;
    job.warnings = overlay.warnings;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling export...");
                cancel.cancel();
            }
        });
    }

    let progress_cb: Box<dyn Fn(ExportProgress) + Send> = Box::new(|p| {
        print!("\r  [{:>3}%] {:<64}", p.percent, p.message);
        let _ = std::io::stdout().flush();
    });

    let probe = Arc::new(EncoderProbe::new(ffmpeg));
    match export_video(job, probe, Some(progress_cb), cancel).await {
        Ok(outcome) => {
            println!("\nExport complete: {}", outcome.output.display());
            println!(
                "  {} frames via {} in {:.1}s",
                outcome.frames, outcome.encoder, outcome.elapsed_secs
            );
            for warning in &outcome.warnings {
                println!("  warning: {warning}");
            }
            Ok(())
        }
        Err(ExportError::Cancelled) => {
            println!(
                "\nExport cancelled; partial output left at {}",
                output_path.display()
            );
            Ok(())
        }
        Err(e) => {
            println!("\nExport failed.");
            Err(e.into())
        }
    }
}

/// `<dir>/<stem>_osd.mp4` next to the source.
fn default_output(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    video.with_file_name(format!("{stem}_osd.mp4"))
}
