//! Font library: one folder per OSD font, each holding SD and/or HD sheets.
//!
//! ```text
//! fonts/
//!   BTFL_Conthrax/   font_btfl.png  font_btfl_hd.png
//!   INAV_default/    font_inav_hd.png
//! ```

use std::path::{Path, PathBuf};

use osdburn_common::error::{OsdburnError, OsdburnResult};

use crate::atlas::GlyphAtlas;

const HD_SHEETS: [&str; 4] = [
    "font_btfl_hd.png",
    "font_inav_hd.png",
    "font_ardu_hd.png",
    "font_quic_hd.png",
];
const SD_SHEETS: [&str; 4] = [
    "font_btfl.png",
    "font_inav.png",
    "font_ardu.png",
    "font_quic.png",
];

/// Firmware family a font folder is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Firmware {
    Betaflight,
    Inav,
    ArduPilot,
    Quicksilver,
    Other,
}

impl Firmware {
    pub const ALL: [Firmware; 4] = [
        Firmware::Betaflight,
        Firmware::Inav,
        Firmware::ArduPilot,
        Firmware::Quicksilver,
    ];

    /// Folder name prefixes, upper-case.
    pub fn prefixes(self) -> &'static [&'static str] {
        match self {
            Firmware::Betaflight => &["BTFL_", "BFX4_"],
            Firmware::Inav => &["INAV"],
            Firmware::ArduPilot => &["ARDU_"],
            Firmware::Quicksilver => &["SNEAKY_FPV_QS_"],
            Firmware::Other => &[],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Firmware::Betaflight => "Betaflight",
            Firmware::Inav => "INAV",
            Firmware::ArduPilot => "ArduPilot",
            Firmware::Quicksilver => "Quicksilver",
            Firmware::Other => "Other",
        }
    }

    /// Match a firmware name case-insensitively (`betaflight`, `INAV`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|fw| fw.name().eq_ignore_ascii_case(name))
    }

    /// Classify a font folder by its name prefix.
    pub fn of_folder(folder_name: &str) -> Self {
        let upper = folder_name.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|fw| fw.prefixes().iter().any(|p| upper.starts_with(p)))
            .unwrap_or(Firmware::Other)
    }
}

impl std::fmt::Display for Firmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One font folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontEntry {
    pub name: String,
    pub path: PathBuf,
    pub firmware: Firmware,
}

/// All usable font folders under a root directory, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct FontLibrary {
    entries: Vec<FontEntry>,
}

impl FontLibrary {
    /// List sub-folders that contain at least one PNG. A missing root is an
    /// empty library.
    pub fn scan(root: impl AsRef<Path>) -> OsdburnResult<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            tracing::debug!(root = %root.display(), "Font directory does not exist");
            return Ok(Self::default());
        }

        let mut entries = Vec::new();
        for dir in std::fs::read_dir(root)? {
            let path = dir?.path();
            if !path.is_dir() || png_files(&path)?.is_empty() {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            entries.push(FontEntry {
                firmware: Firmware::of_folder(&name),
                name,
                path,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::debug!(root = %root.display(), fonts = entries.len(), "Scanned font library");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FontEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FontEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Folders whose name carries one of the firmware's prefixes.
    pub fn by_firmware(&self, firmware: Firmware) -> impl Iterator<Item = &FontEntry> {
        self.entries.iter().filter(move |e| e.firmware == firmware)
    }

    /// First font made for `firmware`, else the first font of any kind.
    pub fn default_for(&self, firmware: Firmware) -> Option<&FontEntry> {
        self.by_firmware(firmware)
            .next()
            .or_else(|| self.entries.first())
    }
}

/// Load the best sheet in a font folder.
///
/// Well-known sheet names of the preferred resolution win, then the other
/// resolution, then whichever PNG sorts first.
pub fn load_font(folder: impl AsRef<Path>, prefer_hd: bool) -> OsdburnResult<GlyphAtlas> {
    let folder = folder.as_ref();
    if !folder.is_dir() {
        return Err(OsdburnError::FileNotFound {
            path: folder.to_path_buf(),
        });
    }

    let pngs = png_files(folder)?;
    let (first, second) = if prefer_hd {
        (HD_SHEETS, SD_SHEETS)
    } else {
        (SD_SHEETS, HD_SHEETS)
    };

    let well_known = first.iter().chain(second.iter()).find_map(|wanted| {
        pngs.iter().find(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(wanted))
        })
    });

    let sheet = well_known
        .or_else(|| pngs.first())
        .ok_or_else(|| OsdburnError::font(format!("no PNG sheet in {}", folder.display())))?;

    tracing::debug!(sheet = %sheet.display(), prefer_hd, "Selected font sheet");
    GlyphAtlas::open(sheet)
}

fn png_files(dir: &Path) -> OsdburnResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_png = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if is_png && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
