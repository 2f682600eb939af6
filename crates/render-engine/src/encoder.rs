//! Encoder selection: hardware probing and per-encoder FFmpeg arguments.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::ffmpeg::find_ffprobe;

/// Timeout for listing compiled encoders.
pub const LIST_ENCODERS_TIMEOUT: Duration = Duration::from_secs(8);
/// Timeout for one test encode. Cold NVENC/CUDA init can take >10 s.
pub const TEST_ENCODE_TIMEOUT: Duration = Duration::from_secs(20);
/// Render node used for VAAPI.
pub const VAAPI_DEVICE: &str = "/dev/dri/renderD128";

/// Lower-case stderr phrases meaning "this kind of device is not present".
pub const NO_DEVICE_PHRASES: [&str; 13] = [
    "no nvenc capable device",
    "no capable device",
    "no encode device",
    "nvenc_err_no_encode_device",
    "nvenc_err_unsupported_device",
    "mfx_err",
    "mfx session",
    "no opencl",
    "no vaapi",
    "device type cuda not found",
    "cannot load nvcuda.dll",
    "cannot load libnvcuvid",
    "cuda_error_no_device",
];

/// Stderr terms that point at the hardware encoder when an encode fails.
pub const HARDWARE_FAILURE_TERMS: [&str; 9] = [
    "nvenc",
    "amf",
    "vaapi",
    "qsv",
    "cuda",
    "no capable",
    "no device",
    "hwaccel",
    "d3d11",
];

/// Output video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// Software encoder for this codec.
    pub fn software_encoder(self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
        }
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "libx264" | "x264" | "h264" | "avc" => Ok(VideoCodec::H264),
            "libx265" | "x265" | "h265" | "hevc" => Ok(VideoCodec::H265),
            other => Err(format!("unknown codec '{other}' (expected libx264 or libx265)")),
        }
    }
}

/// Hardware encoder families, in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwFamily {
    Nvenc,
    Amf,
    Qsv,
    Vaapi,
    VideoToolbox,
    V4l2m2m,
}

impl HwFamily {
    pub const PROBE_ORDER: [HwFamily; 6] = [
        HwFamily::Nvenc,
        HwFamily::Amf,
        HwFamily::Qsv,
        HwFamily::Vaapi,
        HwFamily::VideoToolbox,
        HwFamily::V4l2m2m,
    ];

    pub fn label(self) -> &'static str {
        match self {
            HwFamily::Nvenc => "NVIDIA NVENC",
            HwFamily::Amf => "AMD AMF",
            HwFamily::Qsv => "Intel QSV",
            HwFamily::Vaapi => "VAAPI",
            HwFamily::VideoToolbox => "Apple VideoToolbox",
            HwFamily::V4l2m2m => "V4L2 M2M",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            HwFamily::Nvenc => "nvenc",
            HwFamily::Amf => "amf",
            HwFamily::Qsv => "qsv",
            HwFamily::Vaapi => "vaapi",
            HwFamily::VideoToolbox => "videotoolbox",
            HwFamily::V4l2m2m => "v4l2m2m",
        }
    }

    /// FFmpeg encoder name, e.g. `hevc_nvenc`.
    pub fn encoder_name(self, codec: VideoCodec) -> String {
        let prefix = match codec {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "hevc",
        };
        format!("{prefix}_{}", self.suffix())
    }
}

/// The encoder an export will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    Software(VideoCodec),
    Hardware(HwFamily, VideoCodec),
}

impl Encoder {
    pub fn name(self) -> String {
        match self {
            Encoder::Software(codec) => codec.software_encoder().to_string(),
            Encoder::Hardware(family, codec) => family.encoder_name(codec),
        }
    }

    /// Human-readable label for progress messages.
    pub fn label(self) -> String {
        match self {
            Encoder::Software(_) => format!("CPU ({})", self.name()),
            Encoder::Hardware(family, _) => format!("{} ({})", family.label(), self.name()),
        }
    }

    pub fn is_hardware(self) -> bool {
        matches!(self, Encoder::Hardware(..))
    }

    pub fn family(self) -> Option<HwFamily> {
        match self {
            Encoder::Software(_) => None,
            Encoder::Hardware(family, _) => Some(family),
        }
    }

    pub fn is_vaapi(self) -> bool {
        self.family() == Some(HwFamily::Vaapi)
    }
}

/// Rate control requested by the user. CRF values use the x264 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Quality {
    Crf(u8),
    BitrateMbps(f64),
}

/// Rate-control arguments for `encoder`.
pub fn quality_args(encoder: Encoder, quality: Quality) -> Vec<String> {
    match (encoder.family(), quality) {
        (_, Quality::BitrateMbps(mbps)) => vec![
            "-b:v".into(),
            format!("{mbps}M"),
            "-maxrate".into(),
            format!("{:.1}M", mbps * 1.5),
            "-bufsize".into(),
            format!("{:.1}M", mbps * 2.0),
        ],
        (None, Quality::Crf(crf)) => vec!["-crf".into(), crf.to_string()],
        // NVENC's CQ runs hotter than x264 CRF; +9 gives similar file sizes.
        (Some(HwFamily::Nvenc), Quality::Crf(crf)) => vec![
            "-rc:v".into(),
            "vbr".into(),
            "-cq".into(),
            (u32::from(crf) + 9).min(51).to_string(),
            "-maxrate".into(),
            "50M".into(),
            "-bufsize".into(),
            "100M".into(),
        ],
        (Some(HwFamily::Vaapi), Quality::Crf(crf)) => {
            vec!["-rc_mode".into(), "VBR".into(), "-qp".into(), crf.to_string()]
        }
        (Some(HwFamily::Amf), Quality::Crf(crf)) => vec![
            "-rc".into(),
            "cqp".into(),
            "-qp_i".into(),
            crf.to_string(),
            "-qp_p".into(),
            crf.to_string(),
        ],
        (Some(HwFamily::Qsv), Quality::Crf(crf)) => {
            vec!["-global_quality".into(), crf.to_string()]
        }
        (Some(_), Quality::Crf(crf)) => vec!["-cq".into(), crf.to_string()],
    }
}

/// Preset arguments. Hardware encoders use fixed presets.
pub fn preset_args(encoder: Encoder, preset: &str) -> Vec<String> {
    match encoder.family() {
        None => vec!["-preset".into(), preset.to_string()],
        Some(HwFamily::Nvenc) => vec!["-preset".into(), "p6".into()],
        Some(HwFamily::Qsv) => vec!["-preset".into(), "medium".into()],
        Some(_) => Vec::new(),
    }
}

/// Pixel format produced by the filter graph, `None` for the VAAPI
/// `hwupload` path.
pub fn filter_pix_fmt(encoder: Encoder) -> Option<&'static str> {
    match encoder.family() {
        Some(HwFamily::Vaapi) => None,
        Some(HwFamily::Nvenc) | Some(HwFamily::Amf) => Some("nv12"),
        _ => Some("yuv420p"),
    }
}

/// Output `-pix_fmt`. NVENC and AMF reject it after `-c:v`; their format
/// comes from the filter graph.
pub fn output_pix_fmt_args(encoder: Encoder) -> Vec<String> {
    match encoder.family() {
        Some(HwFamily::Vaapi) => vec!["-pix_fmt".into(), "nv12".into()],
        Some(HwFamily::Nvenc) | Some(HwFamily::Amf) => Vec::new(),
        _ => vec!["-pix_fmt".into(), "yuv420p".into()],
    }
}

/// Result of running a short-lived subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

/// Runs helper commands. Swapped out in tests.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[String], timeout: Duration)
        -> Result<CommandOutput, RunError>;
}

/// Runs real processes with [`run_with_timeout`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        run_with_timeout(program, args, timeout)
    }
}

/// Run a command, killing it if it outlives `timeout`. Both output pipes
/// are drained on background threads so the child never blocks on them.
pub fn run_with_timeout(
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, RunError> {
    let program_name = program.display().to_string();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RunError::Spawn {
            program: program_name.clone(),
            source,
        })?;

    let stdout = child.stdout.take().map(drain_to_string);
    let stderr = child.stderr.take().map(drain_to_string);

    let deadline = Instant::now() + timeout;
    let code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(program = %program_name, ?timeout, "Killed command after timeout");
                return Err(RunError::TimedOut {
                    program: program_name,
                    timeout,
                });
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                let _ = child.kill();
                return Err(RunError::Spawn {
                    program: program_name,
                    source: e,
                });
            }
        }
    };

    let join = |handle: Option<std::thread::JoinHandle<String>>| {
        handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    };
    Ok(CommandOutput {
        code,
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

fn drain_to_string<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = pipe.read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

/// Arguments for the 1-frame capability test of `family`.
pub fn test_encode_args(family: HwFamily) -> Vec<String> {
    let encoder = family.encoder_name(VideoCodec::H264);
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];
    if family == HwFamily::Vaapi {
        args.extend(["-vaapi_device", VAAPI_DEVICE].map(String::from));
    }
    args.extend(
        [
            "-f",
            "lavfi",
            "-i",
            "color=black:size=256x256:rate=30",
            "-frames:v",
            "1",
        ]
        .map(String::from),
    );
    match family {
        HwFamily::Vaapi => {
            args.extend(["-vf", "format=nv12,hwupload", "-c:v"].map(String::from));
            args.push(encoder);
        }
        HwFamily::Amf => {
            args.push("-c:v".into());
            args.push(encoder);
            args.extend(["-pix_fmt", "nv12"].map(String::from));
        }
        _ => {
            args.push("-c:v".into());
            args.push(encoder);
            args.extend(["-pix_fmt", "yuv420p"].map(String::from));
        }
    }
    args.extend(["-f", "null", "-"].map(String::from));
    args
}

/// Outcome of one test encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Usable,
    NoDevice,
}

/// Exit 0 is usable. Failures are only trusted as "no device" when stderr
/// says so; anything else is assumed to be a recoverable driver quirk.
pub fn classify_test_encode(output: &CommandOutput) -> ProbeVerdict {
    if output.success() {
        return ProbeVerdict::Usable;
    }
    let stderr = output.stderr.to_lowercase();
    if NO_DEVICE_PHRASES.iter().any(|p| stderr.contains(p)) {
        ProbeVerdict::NoDevice
    } else {
        ProbeVerdict::Usable
    }
}

/// Whether a failed hardware encode's stderr blames the hardware.
pub fn mentions_hardware_failure(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    HARDWARE_FAILURE_TERMS.iter().any(|t| stderr.contains(t))
}

/// Finds a working hardware encoder once and remembers the answer.
pub struct EncoderProbe {
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
    runner: Box<dyn CommandRunner>,
    compiled: OnceLock<HashSet<String>>,
    detected: OnceLock<Option<HwFamily>>,
}

impl std::fmt::Debug for EncoderProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderProbe")
            .field("ffmpeg", &self.ffmpeg)
            .field("detected", &self.detected.get())
            .finish()
    }
}

impl EncoderProbe {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self::with_runner(ffmpeg, Box::new(SystemRunner))
    }

    pub fn with_runner(ffmpeg: impl Into<PathBuf>, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: None,
            runner,
            compiled: OnceLock::new(),
            detected: OnceLock::new(),
        }
    }

    /// Use this ffprobe instead of searching for one.
    pub fn with_ffprobe(mut self, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffprobe = Some(ffprobe.into());
        self
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> PathBuf {
        self.ffprobe
            .clone()
            .unwrap_or_else(|| find_ffprobe(&self.ffmpeg))
    }

    /// Encoder names compiled into this FFmpeg build. Empty when the list
    /// could not be read.
    pub fn compiled_encoders(&self) -> &HashSet<String> {
        self.compiled.get_or_init(|| {
            let args = vec!["-hide_banner".to_string(), "-encoders".to_string()];
            match self.runner.run(&self.ffmpeg, &args, LIST_ENCODERS_TIMEOUT) {
                Ok(output) => output
                    .stdout
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not list FFmpeg encoders");
                    HashSet::new()
                }
            }
        })
    }

    /// Whether the build has `name`. An unreadable list is assumed to have
    /// everything, so a flaky listing never blocks an export.
    pub fn has_encoder(&self, name: &str) -> bool {
        let compiled = self.compiled_encoders();
        compiled.is_empty() || compiled.contains(name)
    }

    /// First hardware family that passes a test encode, if any.
    pub fn detect(&self) -> Option<HwFamily> {
        *self.detected.get_or_init(|| self.probe())
    }

    fn probe(&self) -> Option<HwFamily> {
        let compiled = self.compiled_encoders();

        for family in HwFamily::PROBE_ORDER {
            let name = family.encoder_name(VideoCodec::H264);
            if !compiled.contains(&name) {
                continue;
            }

            let started = Instant::now();
            let output =
                match self
                    .runner
                    .run(&self.ffmpeg, &test_encode_args(family), TEST_ENCODE_TIMEOUT)
                {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::info!(encoder = %name, error = %e, "Hardware test encode did not finish");
                        continue;
                    }
                };

            let verdict = classify_test_encode(&output);
            tracing::info!(
                encoder = %name,
                exit_code = ?output.code,
                ?verdict,
                elapsed_ms = started.elapsed().as_millis(),
                "Hardware test encode"
            );
            if verdict == ProbeVerdict::Usable {
                return Some(family);
            }
        }

        tracing::info!("No usable hardware encoder");
        None
    }

    /// Encoder for an export: hardware when requested and available,
    /// otherwise the software encoder for `codec`.
    pub fn resolve(&self, codec: VideoCodec, use_hw: bool) -> Encoder {
        if use_hw {
            if let Some(family) = self.detect() {
                let name = family.encoder_name(codec);
                if self.has_encoder(&name) {
                    return Encoder::Hardware(family, codec);
                }
                tracing::info!(
                    encoder = %name,
                    "Hardware family detected but codec not compiled in, using software"
                );
            }
        }
        Encoder::Software(codec)
    }
}
