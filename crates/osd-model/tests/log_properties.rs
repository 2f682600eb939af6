use osdburn_osd_model::{FirmwareTag, OsdFrame, OsdLog, CELLS_PER_FRAME, HEADER_SIZE, RECORD_SIZE};
use proptest::prelude::*;

fn encode(tag: &[u8; 4], timestamps: &[u32]) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_SIZE];
    bytes[..4].copy_from_slice(tag);
    for (i, ts) in timestamps.iter().enumerate() {
        bytes.extend_from_slice(&ts.to_le_bytes());
        for cell in 0..CELLS_PER_FRAME {
            let code = if cell == i % CELLS_PER_FRAME { 0x41 } else { 0 };
            bytes.extend_from_slice(&(code as u16).to_le_bytes());
        }
    }
    bytes
}

#[test]
fn test_single_blank_betaflight_frame() {
    let log = OsdLog::parse(&encode(b"BTFL", &[0])).unwrap();

    assert_eq!(log.firmware().display_name(), "Betaflight");
    assert_eq!(log.stats().fc_type.as_deref(), Some("Betaflight"));
    assert_eq!(log.frame_count(), 1);
    assert_eq!(log.duration_ms(), 0);
    assert!(log.is_monotonic());
}

#[test]
fn test_time_lookup_between_clamped_and_past_end() {
    let log = OsdLog::parse(&encode(b"INAV", &[0, 500, 1000])).unwrap();

    assert_eq!(log.frame_at_time(750).index, 1);
    assert_eq!(log.frame_at_time(-5).index, 0);
    assert_eq!(log.frame_at_time(5000).index, 2);
    assert_eq!(log.frame_at_time(500).index, 1);
    assert_eq!(log.frame_at_time(499).index, 0);
}

#[test]
fn test_load_reports_missing_path() {
    let path = std::env::temp_dir().join("osdburn_missing_log_for_test.osd");
    let err = OsdLog::load(&path).unwrap_err();
    assert!(err.to_string().contains("osdburn_missing_log_for_test.osd"));
}

#[test]
fn test_load_from_disk() {
    let path = std::env::temp_dir().join(format!("osdburn_log_{}.osd", std::process::id()));
    std::fs::write(&path, encode(b"ARDU", &[10, 20])).unwrap();

    let log = OsdLog::load(&path).unwrap();
    assert_eq!(log.firmware().display_name(), "ArduPilot");
    assert_eq!(log.timestamps(), &[10, 20]);

    std::fs::remove_file(&path).ok();
}

fn sorted_timestamps() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..100_000, 1..24).prop_map(|mut v| {
        v.sort_unstable();
        v
    })
}

proptest! {
    #[test]
    fn prop_whole_records_only(frames in 1usize..6, remainder in 0usize..RECORD_SIZE) {
        let timestamps: Vec<u32> = (0..frames as u32).map(|i| i * 40).collect();
        let mut bytes = encode(b"BTFL", &timestamps);
        bytes.extend(std::iter::repeat(0xAB).take(remainder));

        let log = OsdLog::parse(&bytes).unwrap();
        prop_assert_eq!(log.frame_count(), frames);
    }

    #[test]
    fn prop_lookup_is_greatest_at_or_before(timestamps in sorted_timestamps(), t in -1_000i64..120_000) {
        let log = OsdLog::parse(&encode(b"BTFL", &timestamps)).unwrap();
        let frame = log.frame_at_time(t);

        if t < i64::from(timestamps[0]) {
            prop_assert_eq!(frame.index, 0);
        } else {
            prop_assert!(i64::from(frame.time_ms) <= t);
            // Nothing later in the log is also at or before t.
            let idx = frame.index as usize;
            prop_assert!(timestamps[idx + 1..].iter().all(|&ts| i64::from(ts) > t));
        }
    }

    #[test]
    fn prop_exact_timestamp_hits_its_frame(timestamps in sorted_timestamps(), pick in any::<prop::sample::Index>()) {
        // Duplicate timestamps resolve to the last of the run.
        let mut unique = timestamps.clone();
        unique.dedup();
        let log = OsdLog::parse(&encode(b"BTFL", &unique)).unwrap();

        let i = pick.index(unique.len());
        prop_assert_eq!(log.frame_at_time(i64::from(unique[i])).index as usize, i);
    }

    #[test]
    fn prop_unknown_tags_survive(tag in any::<[u8; 4]>()) {
        let frames = vec![OsdFrame::blank(0, 0)];
        let log = OsdLog::from_frames(FirmwareTag::new(tag), frames).unwrap();
        prop_assert_eq!(log.firmware().bytes(), tag);
        prop_assert!(!log.firmware().display_name().is_empty());
    }
}
