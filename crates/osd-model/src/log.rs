//! Binary OSD frame log (`.osd`) decoding.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! header   40 bytes   bytes 0..4 firmware tag ("BTFL", "INAV", ...), rest zero
//! record   2124 bytes u32 timestamp_ms, then 53×20 u16 character codes (row-major)
//! record   ...
//! ```
//!
//! Records are appended by the recorder every time the flight controller
//! redraws its screen, so timestamps are expected to be non-decreasing.

use std::path::{Path, PathBuf};

use crate::stats::{extract_stats, FlightStats};

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 40;
/// Character grid width.
pub const GRID_COLS: usize = 53;
/// Character grid height.
pub const GRID_ROWS: usize = 20;
/// Character cells per frame.
pub const CELLS_PER_FRAME: usize = GRID_COLS * GRID_ROWS;
/// Size of one frame record: u32 timestamp + one u16 per cell.
pub const RECORD_SIZE: usize = 4 + CELLS_PER_FRAME * 2;

const KNOWN_FIRMWARE: [(&[u8; 4], &str); 4] = [
    (b"BTFL", "Betaflight"),
    (b"INAV", "INAV"),
    (b"PITL", "PitLab"),
    (b"ARDU", "ArduPilot"),
];

/// Errors raised while decoding an OSD log.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("OSD log is {len} bytes, smaller than the {HEADER_SIZE}-byte header")]
    TooShort { len: usize },

    #[error("OSD log contains no complete frame records")]
    Empty,

    #[error("I/O error reading OSD log {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The 4-byte flight-controller identifier from the log header.
///
/// Unknown tags are kept verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FirmwareTag([u8; 4]);

impl FirmwareTag {
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Raw header bytes.
    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }

    /// Firmware name for tags written by known flight controllers.
    pub fn known_name(&self) -> Option<&'static str> {
        KNOWN_FIRMWARE
            .iter()
            .find(|(tag, _)| **tag == self.0)
            .map(|(_, name)| *name)
    }

    /// Human-readable firmware name. Unknown tags display as their ASCII
    /// text with trailing NULs removed, or `Unknown` when nothing is left.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.known_name() {
            return name.to_string();
        }
        let text: String = String::from_utf8_lossy(&self.0)
            .trim_end_matches('\0')
            .to_string();
        if text.is_empty() {
            "Unknown".to_string()
        } else {
            text
        }
    }
}

/// One complete snapshot of the OSD character grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsdFrame {
    /// Position of this record in the log.
    pub index: u32,

    /// Milliseconds since the recorder started.
    pub time_ms: u32,

    /// Row-major character codes. `0` is a transparent cell.
    pub grid: Box<[u16; CELLS_PER_FRAME]>,
}

impl OsdFrame {
    /// A frame with every cell transparent.
    pub fn blank(index: u32, time_ms: u32) -> Self {
        Self {
            index,
            time_ms,
            grid: Box::new([0; CELLS_PER_FRAME]),
        }
    }

    /// Character code at `(row, col)`, or `None` outside the grid.
    pub fn char_at(&self, row: usize, col: usize) -> Option<u16> {
        if row >= GRID_ROWS || col >= GRID_COLS {
            return None;
        }
        Some(self.grid[row * GRID_COLS + col])
    }

    /// Set the code at `(row, col)`. Out-of-grid writes are ignored.
    pub fn set_char(&mut self, row: usize, col: usize, code: u16) {
        if row < GRID_ROWS && col < GRID_COLS {
            self.grid[row * GRID_COLS + col] = code;
        }
    }

    /// Write ASCII text starting at `(row, col)`, clipped at the grid edge.
    pub fn put_text(&mut self, row: usize, col: usize, text: &str) {
        for (offset, byte) in text.bytes().enumerate() {
            self.set_char(row, col + offset, u16::from(byte));
        }
    }

    /// All drawable cells as `(row, col, code)`.
    pub fn non_empty(&self) -> impl Iterator<Item = (usize, usize, u16)> + '_ {
        self.grid
            .iter()
            .enumerate()
            .filter(|(_, &code)| code != 0)
            .map(|(i, &code)| (i / GRID_COLS, i % GRID_COLS, code))
    }

    /// Whether every cell is transparent.
    pub fn is_blank(&self) -> bool {
        self.grid.iter().all(|&code| code == 0)
    }

    fn decode(index: u32, record: &[u8]) -> Self {
        let time_ms = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        let mut grid = Box::new([0u16; CELLS_PER_FRAME]);
        for (cell, bytes) in grid.iter_mut().zip(record[4..].chunks_exact(2)) {
            *cell = u16::from_le_bytes([bytes[0], bytes[1]]);
        }
        Self {
            index,
            time_ms,
            grid,
        }
    }
}

/// A decoded OSD log. Always holds at least one frame.
#[derive(Debug, Clone)]
pub struct OsdLog {
    tag: FirmwareTag,
    frames: Vec<OsdFrame>,
    timestamps: Vec<u32>,
    stats: FlightStats,
    monotonic: bool,
}

impl OsdLog {
    /// Decode a complete log from memory.
    ///
    /// Trailing bytes that do not form a whole record are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::TooShort { len: bytes.len() });
        }

        let tag = FirmwareTag([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let body = &bytes[HEADER_SIZE..];
        let record_count = body.len() / RECORD_SIZE;
        if record_count == 0 {
            return Err(FormatError::Empty);
        }

        let trailing = body.len() % RECORD_SIZE;
        if trailing > 0 {
            tracing::debug!(trailing, "Ignoring truncated trailing OSD record");
        }

        let frames = body
            .chunks_exact(RECORD_SIZE)
            .enumerate()
            .map(|(i, record)| OsdFrame::decode(i as u32, record))
            .collect();

        let log = Self::from_frames(tag, frames)?;
        tracing::debug!(
            firmware = %log.tag.display_name(),
            frames = log.frames.len(),
            duration_ms = log.duration_ms(),
            "Parsed OSD log"
        );
        Ok(log)
    }

    /// Read and decode a log file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| FormatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    /// Build a log from already-decoded frames, kept in the given order.
    pub fn from_frames(tag: FirmwareTag, frames: Vec<OsdFrame>) -> Result<Self, FormatError> {
        let Some(first) = frames.first() else {
            return Err(FormatError::Empty);
        };

        let timestamps: Vec<u32> = frames.iter().map(|f| f.time_ms).collect();
        let regressions = timestamps.windows(2).filter(|w| w[1] < w[0]).count();
        if regressions > 0 {
            tracing::warn!(
                regressions,
                "OSD log timestamps go backwards; time lookups may pick unexpected frames"
            );
        }

        let mut stats = extract_stats(first);
        stats.fc_type = Some(tag.display_name());

        Ok(Self {
            tag,
            frames,
            timestamps,
            stats,
            monotonic: regressions == 0,
        })
    }

    pub fn firmware(&self) -> FirmwareTag {
        self.tag
    }

    pub fn frames(&self) -> &[OsdFrame] {
        &self.frames
    }

    pub fn timestamps(&self) -> &[u32] {
        &self.timestamps
    }

    pub fn stats(&self) -> &FlightStats {
        &self.stats
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Timestamp of the last frame.
    pub fn duration_ms(&self) -> u32 {
        self.timestamps.last().copied().unwrap_or(0)
    }

    /// Whether timestamps never decrease in file order.
    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }

    pub fn frame_at_index(&self, index: usize) -> Option<&OsdFrame> {
        self.frames.get(index)
    }

    /// The most recent frame at or before `time_ms`.
    ///
    /// Queries before the first timestamp return the first frame.
    pub fn frame_at_time(&self, time_ms: i64) -> &OsdFrame {
        let after = self
            .timestamps
            .partition_point(|&ts| i64::from(ts) <= time_ms);
        &self.frames[after.saturating_sub(1)]
    }

    /// Whether any frame is stamped inside `[start_ms, end_ms]`.
    pub fn has_frame_between(&self, start_ms: i64, end_ms: i64) -> bool {
        self.timestamps
            .iter()
            .any(|&ts| (start_ms..=end_ms).contains(&i64::from(ts)))
    }
}
