//! Check system capabilities.

use osdburn_common::config::{config_file_path, AppConfig};
use osdburn_render_engine::{
    find_ffmpeg, find_ffprobe, EncoderProbe, Firmware, FontLibrary, TextRenderer, VideoCodec,
};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("osdburn System Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", config_file_path().display());
    println!();

    let ffmpeg = match find_ffmpeg(config.ffmpeg_path.as_deref()) {
        Ok(path) => {
            println!("[OK] FFmpeg: {}", path.display());
            Some(path)
        }
        Err(e) => {
            println!("[MISSING] {e}");
            None
        }
    };

    if let Some(ffmpeg) = &ffmpeg {
        let ffprobe = find_ffprobe(ffmpeg);
        if ffprobe.is_file() {
            println!("[OK] ffprobe: {}", ffprobe.display());
        } else {
            println!("[MISSING] ffprobe (looked next to FFmpeg and on PATH)");
        }

        let probe = EncoderProbe::new(ffmpeg);
        for codec in [VideoCodec::H264, VideoCodec::H265] {
            let name = codec.software_encoder();
            if probe.has_encoder(name) {
                println!("[OK] Software encoder: {name}");
            } else {
                println!("[WARN] Software encoder missing: {name}");
            }
        }

        println!("     Probing hardware encoders (may take a few seconds)...");
        match probe.detect() {
            Some(family) => println!(
                "[OK] Hardware encoder: {} ({})",
                family.label(),
                family.encoder_name(VideoCodec::H264)
            ),
            None => println!("[INFO] No hardware encoder; exports use the CPU"),
        }
    }
    println!();

    let library = FontLibrary::scan(&config.fonts_dir)?;
    if library.is_empty() {
        println!("[WARN] No fonts in {}", config.fonts_dir.display());
        println!("       OSD will be drawn as plain text.");
    } else {
        println!(
            "[OK] Fonts: {} in {}",
            library.entries().len(),
            config.fonts_dir.display()
        );
        for firmware in Firmware::ALL {
            let count = library.by_firmware(firmware).count();
            if count > 0 {
                println!("     {firmware}: {count}");
            }
        }
    }

    let text = TextRenderer::load(config.status_font.as_deref());
    match text.source() {
        Some(path) => println!("[OK] Status font: {}", path.display()),
        None => println!("[INFO] Status font: built-in bitmap"),
    }

    println!();
    if ffmpeg.is_some() {
        println!("osdburn is ready.");
    } else {
        println!("FFmpeg is required for preview and export. See above for fixes.");
    }

    Ok(())
}
