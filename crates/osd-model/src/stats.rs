//! Flight summary scraped from the post-flight stats screen.
//!
//! Flight controllers draw their stats screen as plain text before the
//! recorder's first redraw, so the first frame of a log usually reads like
//! `TOTAL ARM : 02:13` / `MIN BATTERY : 14.2V`.

use serde::{Deserialize, Serialize};

use crate::log::{OsdFrame, GRID_COLS, GRID_ROWS};

/// Summary values from the stats screen. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightStats {
    pub fc_type: Option<String>,
    pub total_arm_time: Option<String>,
    pub min_battery_v: Option<f32>,
    pub min_rssi_pct: Option<i32>,
    pub max_current_a: Option<f32>,
    pub used_mah: Option<i32>,
    /// Free-form, e.g. `45 mAh/km`.
    pub efficiency: Option<String>,
    pub blackbox_pct: Option<String>,
}

impl FlightStats {
    /// Whether the screen yielded nothing beyond the firmware name.
    pub fn is_empty(&self) -> bool {
        self.total_arm_time.is_none()
            && self.min_battery_v.is_none()
            && self.min_rssi_pct.is_none()
            && self.max_current_a.is_none()
            && self.used_mah.is_none()
            && self.efficiency.is_none()
            && self.blackbox_pct.is_none()
    }
}

/// Read labelled values off a frame's text rows. Never fails; unreadable
/// values are left as `None`. `fc_type` is not touched.
pub fn extract_stats(frame: &OsdFrame) -> FlightStats {
    let mut stats = FlightStats::default();

    for row in 0..GRID_ROWS {
        let line = row_text(frame, row);
        let has = |word: &str| line.contains(word);
        let value = clean(after_colon(&line));

        if (has("TOTAL") && has("ARM"))
            || (has("FLY") && has("TIME"))
            || (has("FLIGHT") && has("TIME"))
        {
            stats.total_arm_time = non_empty(value);
        } else if has("MIN") && has("BATTERY") {
            if let Some(v) = first_number(&value) {
                stats.min_battery_v = Some(v as f32);
            }
        } else if has("MIN") && has("RSSI") {
            if let Some(v) = first_number(&value.replace('%', "")) {
                stats.min_rssi_pct = Some(v as i32);
            }
        } else if has("CURRENT") && !has("MIN") {
            let token = value
                .split_whitespace()
                .next()
                .map(|t| t.trim_end_matches(['a', 'A']));
            if let Some(v) = token.and_then(|t| t.parse::<f64>().ok()) {
                stats.max_current_a = Some(((v * 100.0).round() / 100.0) as f32);
            }
        } else if has("USED") && (has("MAH") || has("CAPACITY")) {
            if let Some(v) = first_number(&value) {
                stats.used_mah = Some(v as i32);
            }
        } else if has("EFF") {
            stats.efficiency = non_empty(value);
        } else if has("BLACKBOX") {
            stats.blackbox_pct = non_empty(value);
        }
    }

    stats
}

/// Render one grid row as ASCII, non-printable codes as spaces.
fn row_text(frame: &OsdFrame, row: usize) -> String {
    (0..GRID_COLS)
        .map(|col| match frame.char_at(row, col) {
            Some(code @ 32..=126) => char::from(code as u8),
            _ => ' ',
        })
        .collect()
}

fn after_colon(line: &str) -> &str {
    line.split_once(':').map(|(_, rest)| rest.trim()).unwrap_or("")
}

fn clean(s: &str) -> String {
    s.chars()
        .filter(|c| (' '..='~').contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn first_number(s: &str) -> Option<f64> {
    s.split_whitespace().next()?.parse().ok()
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}
