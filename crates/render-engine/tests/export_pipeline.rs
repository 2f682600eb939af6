use std::io;
use std::sync::{Arc, Mutex};

use osdburn_osd_model::{FirmwareTag, OsdFrame, OsdLog, TelemetryText};
use osdburn_render_engine::{
    osd_missing_from_window, stream_frames, CancelToken, ExportError, ExportProgress, ExportStage,
    FramePlan, OverlayRenderer, ProgressCallback, RenderSettings, StreamInputs, TextRenderer,
    NO_OSD_IN_WINDOW_WARNING,
};

const W: u32 = 212;
const H: u32 = 120;
const FRAME_BYTES: usize = (W * H * 4) as usize;

fn log_with_times(times: &[u32]) -> OsdLog {
    let frames = times
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let mut frame = OsdFrame::blank(i as u32, t);
            frame.put_text(2, 2, &format!("{:02}", i % 100));
            frame
        })
        .collect();
    OsdLog::from_frames(FirmwareTag::new(*b"BTFL"), frames).unwrap()
}

fn renderer() -> OverlayRenderer {
    OverlayRenderer::new(
        W,
        H,
        None,
        Arc::new(TextRenderer::builtin()),
        RenderSettings::default(),
    )
}

#[test]
fn test_trimmed_window_streams_frames_from_trim_start() {
    // 2 s of OSD at 10 Hz, trimmed to [0.5, 1.5) at 10 fps.
    let times: Vec<u32> = (0..20).map(|i| i * 100).collect();
    let log = log_with_times(&times);

    let queried = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let queried = queried.clone();
        move |t: i64| -> Option<String> {
            queried.lock().unwrap().push(t);
            None
        }
    };
    let text: &dyn TelemetryText = &recorder;

    let plan = FramePlan {
        start_s: 0.5,
        duration_s: 1.0,
        fps: 10.0,
    };
    let mut sink = Vec::new();
    let report = stream_frames(
        &mut renderer(),
        &mut sink,
        &plan,
        StreamInputs {
            osd: Some(&log),
            text: Some(text),
        },
        None,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(report.frames_written, 10);
    assert!(report.warnings.is_empty());
    assert!(!report.pipe_broken);
    assert_eq!(sink.len(), 10 * FRAME_BYTES);

    let expected: Vec<i64> = (0..10).map(|i| 500 + i * 100).collect();
    assert_eq!(*queried.lock().unwrap(), expected);
}

#[test]
fn test_window_without_osd_writes_one_blank_frame_and_warns() {
    let log = log_with_times(&[0, 50, 100]);
    let plan = FramePlan {
        start_s: 5.0,
        duration_s: 1.0,
        fps: 30.0,
    };
    let mut sink = Vec::new();
    let report = stream_frames(
        &mut renderer(),
        &mut sink,
        &plan,
        StreamInputs {
            osd: Some(&log),
            text: None,
        },
        None,
        &CancelToken::new(),
    )
    .unwrap();

    assert!(osd_missing_from_window(Some(&log), &plan));
    assert_eq!(report.frames_written, 1);
    assert_eq!(report.warnings, vec![NO_OSD_IN_WINDOW_WARNING.to_string()]);
    assert_eq!(sink.len(), FRAME_BYTES);
    assert!(sink.iter().all(|&b| b == 0));
}

#[test]
fn test_osd_just_past_window_end_still_counts() {
    // Window [1.0, 2.0]; the only frame is 400 ms after its end.
    let log = log_with_times(&[2400]);
    let plan = FramePlan {
        start_s: 1.0,
        duration_s: 1.0,
        fps: 5.0,
    };
    let mut sink = Vec::new();
    let report = stream_frames(
        &mut renderer(),
        &mut sink,
        &plan,
        StreamInputs {
            osd: Some(&log),
            text: None,
        },
        None,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(report.frames_written, 5);
    assert!(report.warnings.is_empty());
    assert!(!osd_missing_from_window(Some(&log), &plan));
    assert!(!osd_missing_from_window(None, &plan));
}

#[test]
fn test_repeated_overlays_come_from_frame_cache() {
    let log = log_with_times(&[0]);
    let plan = FramePlan {
        start_s: 0.0,
        duration_s: 2.0,
        fps: 30.0,
    };
    let status = |t: i64| Some(if t < 1000 { "RSSI 90" } else { "RSSI 80" }.to_string());
    let mut sink = Vec::new();
    let report = stream_frames(
        &mut renderer(),
        &mut sink,
        &plan,
        StreamInputs {
            osd: Some(&log),
            text: Some(&status),
        },
        None,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(report.frames_written, 60);
    assert_eq!(report.frames_rendered, 2);
    assert_eq!(&sink[..FRAME_BYTES], &sink[FRAME_BYTES..2 * FRAME_BYTES]);
}

#[test]
fn test_progress_is_reported_sparsely_and_capped() {
    let seen = Arc::new(Mutex::new(Vec::<ExportProgress>::new()));
    let callback: ProgressCallback = {
        let seen = seen.clone();
        Box::new(move |p| seen.lock().unwrap().push(p))
    };
    let plan = FramePlan {
        start_s: 0.0,
        duration_s: 10.0,
        fps: 30.0,
    };
    let text = |_t: i64| Some("12.6V".to_string());
    stream_frames(
        &mut renderer(),
        &mut io::sink(),
        &plan,
        StreamInputs {
            osd: None,
            text: Some(&text),
        },
        Some(&callback),
        &CancelToken::new(),
    )
    .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 50);
    assert!(seen.iter().all(|p| p.stage == ExportStage::Streaming));
    assert!(seen.iter().all(|p| (5..=90).contains(&p.percent)));
    assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));
    let last = seen.last().unwrap();
    assert_eq!((last.frames_done, last.total_frames), (300, 300));
    assert_eq!(last.percent, 90);
}

#[test]
fn test_cancelled_token_stops_before_first_frame() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let plan = FramePlan {
        start_s: 0.0,
        duration_s: 1.0,
        fps: 30.0,
    };
    let mut sink = Vec::new();
    let err = stream_frames(
        &mut renderer(),
        &mut sink,
        &plan,
        StreamInputs::default(),
        None,
        &cancel,
    )
    .unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));
    assert!(sink.is_empty());
}

/// Accepts `limit` frames, then behaves like a closed pipe.
struct ClosingSink {
    limit: usize,
    written: usize,
}

impl io::Write for ClosingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written >= self.limit * FRAME_BYTES {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_broken_pipe_ends_stream_without_error() {
    let plan = FramePlan {
        start_s: 0.0,
        duration_s: 1.0,
        fps: 30.0,
    };
    let mut sink = ClosingSink {
        limit: 4,
        written: 0,
    };
    let report = stream_frames(
        &mut renderer(),
        &mut sink,
        &plan,
        StreamInputs::default(),
        None,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(report.pipe_broken);
    assert_eq!(report.frames_written, 4);
}
