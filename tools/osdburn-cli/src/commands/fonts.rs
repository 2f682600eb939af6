//! List the font library.

use std::path::PathBuf;

use osdburn_common::config::AppConfig;
use osdburn_render_engine::{Firmware, FontLibrary};

pub fn run(
    config: &AppConfig,
    firmware: Option<String>,
    dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let root = dir.unwrap_or_else(|| config.fonts_dir.clone());
    let filter = match firmware.as_deref() {
        Some(name) => Some(Firmware::from_name(name).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown firmware: {name}. Use: betaflight, inav, ardupilot, quicksilver"
            )
        })?),
        None => None,
    };

    let library = FontLibrary::scan(&root)?;
    println!("Fonts in {}", root.display());

    let mut shown = 0;
    for entry in library.entries() {
        if filter.is_some_and(|fw| fw != entry.firmware) {
            continue;
        }
        println!("  {:<32} {}", entry.name, entry.firmware);
        shown += 1;
    }

    if shown == 0 {
        println!("  (none)");
        println!();
        println!("Put one folder per font here, each holding font sheets such as font_btfl_hd.png.");
    }
    Ok(())
}
