//! Time-indexed telemetry text for the status bar.

use std::path::Path;

/// Supplies the status-bar string for a moment in the recording.
///
/// Implementations must be cheap to query; the exporter calls this once per
/// output frame.
pub trait TelemetryText: Send + Sync {
    /// Text active at `t_ms` (milliseconds from the start of the video).
    fn status_at(&self, t_ms: i64) -> Option<String>;
}

impl<F> TelemetryText for F
where
    F: Fn(i64) -> Option<String> + Send + Sync,
{
    fn status_at(&self, t_ms: i64) -> Option<String> {
        self(t_ms)
    }
}

/// One subtitle block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtEntry {
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

/// Subtitle track recorded by the video link alongside the DVR file.
#[derive(Debug, Clone, Default)]
pub struct SrtTrack {
    entries: Vec<SrtEntry>,
}

const SKIPPED_LINE: &str = "no mavlink telemetry";

impl SrtTrack {
    /// Parse SRT text. Blocks without a valid timing line are dropped.
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        let mut block: Vec<&str> = Vec::new();

        for line in content.lines().chain(std::iter::once("")) {
            let line = line.trim();
            if !line.is_empty() {
                block.push(line);
                continue;
            }
            if let Some(entry) = parse_block(&block) {
                entries.push(entry);
            }
            block.clear();
        }

        entries.sort_by_key(|e: &SrtEntry| e.start_ms);
        tracing::debug!(entries = entries.len(), "Parsed SRT track");
        Self { entries }
    }

    /// Read and parse an `.srt` file. Invalid UTF-8 is replaced.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    pub fn entries(&self) -> &[SrtEntry] {
        &self.entries
    }

    /// End of the last entry, or 0 for an empty track.
    pub fn duration_ms(&self) -> i64 {
        self.entries.last().map(|e| e.end_ms).unwrap_or(0)
    }

    /// Entry with `start_ms <= t_ms < end_ms`.
    pub fn entry_at(&self, t_ms: i64) -> Option<&SrtEntry> {
        let after = self.entries.partition_point(|e| e.start_ms <= t_ms);
        let entry = self.entries.get(after.checked_sub(1)?)?;
        (t_ms < entry.end_ms).then_some(entry)
    }
}

impl TelemetryText for SrtTrack {
    fn status_at(&self, t_ms: i64) -> Option<String> {
        self.entry_at(t_ms)
            .filter(|e| !e.text.is_empty())
            .map(|e| e.text.clone())
    }
}

fn parse_block(lines: &[&str]) -> Option<SrtEntry> {
    // The sequence number is optional in practice; find the timing line.
    let timing_pos = lines.iter().take(2).position(|l| l.contains("-->"))?;
    let (start, end) = lines[timing_pos].split_once("-->")?;
    let start_ms = parse_timestamp(start.trim())?;
    let end_ms = parse_timestamp(end.trim())?;

    let text = lines[timing_pos + 1..]
        .iter()
        .filter(|l| !l.to_ascii_lowercase().contains(SKIPPED_LINE))
        .copied()
        .collect::<Vec<_>>()
        .join("  ");

    Some(SrtEntry {
        start_ms,
        end_ms,
        text,
    })
}

/// `HH:MM:SS,mmm` (a `.` separator is accepted too).
fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.split_whitespace().next()?;
    let (hms, millis) = s.split_once([',', '.'])?;
    let mut parts = hms.split(':').map(|p| p.parse::<i64>().ok());
    let hours = parts.next()??;
    let minutes = parts.next()??;
    let seconds = parts.next()??;
    if parts.next().is_some() {
        return None;
    }
    let millis: i64 = millis.parse().ok()?;
    Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
}
