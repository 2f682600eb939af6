//! Show OSD log information.

use std::path::PathBuf;

use anyhow::Context;
use osdburn_osd_model::OsdLog;

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let log =
        OsdLog::load(&path).with_context(|| format!("Failed to load OSD log {}", path.display()))?;

    let firmware = log.firmware().display_name();
    let with_content = log.frames().iter().filter(|f| !f.is_blank()).count();

    if json {
        let report = serde_json::json!({
            "path": path,
            "firmware": firmware,
            "frames": log.frame_count(),
            "non_blank_frames": with_content,
            "duration_ms": log.duration_ms(),
            "monotonic": log.is_monotonic(),
            "stats": log.stats(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("OSD log: {}", path.display());
    println!("  Firmware: {firmware}");
    println!("  Frames: {} ({with_content} with content)", log.frame_count());
    println!("  Duration: {:.1}s", f64::from(log.duration_ms()) / 1000.0);
    if !log.is_monotonic() {
        println!("  [WARN] Timestamps go backwards; lookups may pick unexpected frames");
    }
    println!();

    let stats = log.stats();
    if stats.is_empty() {
        println!("Flight stats: none on the first frame");
        return Ok(());
    }

    println!("Flight stats:");
    if let Some(fc) = &stats.fc_type {
        println!("  FC: {fc}");
    }
    if let Some(arm) = &stats.total_arm_time {
        println!("  Arm time: {arm}");
    }
    if let Some(v) = stats.min_battery_v {
        println!("  Min battery: {v:.2} V");
    }
    if let Some(rssi) = stats.min_rssi_pct {
        println!("  Min RSSI: {rssi}%");
    }
    if let Some(a) = stats.max_current_a {
        println!("  Max current: {a:.1} A");
    }
    if let Some(mah) = stats.used_mah {
        println!("  Used: {mah} mAh");
    }
    if let Some(eff) = &stats.efficiency {
        println!("  Efficiency: {eff}");
    }
    if let Some(bb) = &stats.blackbox_pct {
        println!("  Blackbox: {bb}");
    }

    Ok(())
}
