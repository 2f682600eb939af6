//! Full exports against stand-in `ffmpeg`/`ffprobe` shell scripts.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use osdburn_osd_model::TelemetryText;
use osdburn_render_engine::{
    run_export, CancelToken, EncoderProbe, ExportError, ExportJob, ExportStage, ProgressCallback,
};

/// Scripts are written and executed here; one test at a time keeps a
/// freshly written script from being exec'd while another test holds it open.
static SERIAL: Mutex<()> = Mutex::new(());

const PROBE_JSON: &str = r#"{
  "streams": [{"codec_type": "video", "codec_name": "h264",
               "width": 64, "height": 36, "r_frame_rate": "10/1"}],
  "format": {"duration": "1.000000", "size": "1024"}
}"#;

/// `ffmpeg` answers `-encoders` with the software encoders and otherwise
/// runs `body` with the overlay frames on stdin.
struct FakeTools {
    dir: PathBuf,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FakeTools {
    fn new(name: &str, body: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("osdburn_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let ffmpeg = dir.join("ffmpeg");
        write_script(
            &ffmpeg,
            &format!(
                "case \"$*\" in\n\
                 *-encoders*) echo ' V....D libx264 H.264'; echo ' V....D libx265 HEVC'; exit 0;;\n\
                 esac\n{body}\n"
            ),
        );
        let ffprobe = dir.join("ffprobe");
        write_script(&ffprobe, &format!("cat <<'JSON'\n{PROBE_JSON}\nJSON\n"));
        std::fs::write(dir.join("in.mp4"), b"not really a video").unwrap();

        Self {
            dir,
            ffmpeg,
            ffprobe,
        }
    }

    fn probe(&self) -> EncoderProbe {
        EncoderProbe::new(&self.ffmpeg).with_ffprobe(&self.ffprobe)
    }

    fn job(&self) -> ExportJob {
        let mut job = ExportJob::new(self.dir.join("in.mp4"), self.dir.join("out.mp4"));
        let text: Arc<dyn TelemetryText> = Arc::new(|_t: i64| Some("12.6V".to_string()));
        job.text = Some(text);
        job
    }
}

impl Drop for FakeTools {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Progress callback recording each stage change.
fn stage_recorder(
    on_stage: impl Fn(ExportStage) + Send + 'static,
) -> (ProgressCallback, Arc<Mutex<Vec<ExportStage>>>) {
    let stages = Arc::new(Mutex::new(Vec::new()));
    let callback: ProgressCallback = {
        let stages = stages.clone();
        Box::new(move |p| {
            let mut stages = stages.lock().unwrap();
            if stages.last() != Some(&p.stage) {
                stages.push(p.stage);
                on_stage(p.stage);
            }
        })
    };
    (callback, stages)
}

#[test]
fn test_successful_export_walks_every_stage() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let tools = FakeTools::new("ok", "cat > /dev/null\nexit 0");
    let (callback, stages) = stage_recorder(|_| {});

    let outcome = run_export(&tools.job(), &tools.probe(), Some(callback), &CancelToken::new())
        .unwrap();

    assert_eq!(outcome.frames, 10);
    assert_eq!(outcome.encoder, "CPU (libx264)");
    assert!(outcome.warnings.is_empty());
    assert_eq!(
        *stages.lock().unwrap(),
        vec![
            ExportStage::ProbingEncoder,
            ExportStage::Streaming,
            ExportStage::Finalizing,
            ExportStage::Done
        ]
    );
}

#[test]
fn test_encoder_failure_carries_exit_code_and_stderr_tail() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let tools = FakeTools::new(
        "fail",
        "cat > /dev/null\necho 'Error while opening encoder for output stream' >&2\nexit 3",
    );
    let (callback, stages) = stage_recorder(|_| {});

    let err = run_export(&tools.job(), &tools.probe(), Some(callback), &CancelToken::new())
        .unwrap_err();

    match err {
        ExportError::EncodeFailed {
            exit_code,
            diagnostic_tail,
            hardware_hint,
        } => {
            assert_eq!(exit_code, Some(3));
            assert!(diagnostic_tail.contains("Error while opening encoder"));
            assert!(!hardware_hint);
        }
        other => panic!("expected EncodeFailed, got {other:?}"),
    }
    assert_eq!(stages.lock().unwrap().last(), Some(&ExportStage::Failed));
}

#[test]
fn test_cancel_while_finalizing_kills_encoder() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    // Reads every frame, then hangs instead of exiting.
    let tools = FakeTools::new("hang", "cat > /dev/null\nexec sleep 30");
    let cancel = CancelToken::new();
    let (callback, stages) = {
        let cancel = cancel.clone();
        stage_recorder(move |stage| {
            if stage == ExportStage::Finalizing {
                cancel.cancel();
            }
        })
    };

    let started = Instant::now();
    let err = run_export(&tools.job(), &tools.probe(), Some(callback), &cancel).unwrap_err();

    assert!(matches!(err, ExportError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        *stages.lock().unwrap(),
        vec![
            ExportStage::ProbingEncoder,
            ExportStage::Streaming,
            ExportStage::Finalizing,
            ExportStage::Cancelled
        ]
    );
}
