//! Locating FFmpeg, probing sources and building encoder command lines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoder::{
    filter_pix_fmt, output_pix_fmt_args, preset_args, quality_args, run_with_timeout, Encoder,
    Quality, VAAPI_DEVICE,
};
use crate::export::ExportError;

/// Resampling flags for every scale FFmpeg does on our behalf.
pub const SWS_FLAGS: &str = "lanczos+accurate_rnd+full_chroma_int";

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Trim edges at or below this many seconds are treated as "not set".
const TRIM_EPSILON: f64 = 0.01;

fn exe_name(stem: &str) -> String {
    if cfg!(windows) {
        format!("{stem}.exe")
    } else {
        stem.to_string()
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// The FFmpeg binary: `configured` if it exists, then PATH, then next to
/// the running executable.
pub fn find_ffmpeg(configured: Option<&Path>) -> Result<PathBuf, ExportError> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured FFmpeg not found, searching PATH");
    }

    let name = exe_name("ffmpeg");
    if let Some(found) = find_in_path(&name) {
        return Ok(found);
    }

    let bundled = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .filter(|candidate| candidate.is_file());
    bundled.ok_or(ExportError::EncoderNotFound)
}

/// ffprobe on PATH, else the sibling of `ffmpeg`.
pub fn find_ffprobe(ffmpeg: &Path) -> PathBuf {
    let name = exe_name("ffprobe");
    if let Some(found) = find_in_path(&name) {
        return found;
    }
    ffmpeg.with_file_name(name)
}

/// What we need to know about a source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub codec: String,
    /// Frames per second, rounded to 3 decimals.
    pub fps: f64,
    pub duration_s: f64,
    pub size_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
}

/// Parse `num/den` into frames per second.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some((num / den * 1000.0).round() / 1000.0)
}

fn parse_duration(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Decode `ffprobe -print_format json` output. The container duration is
/// preferred, then the video stream's.
pub fn parse_probe_json(json: &str) -> Result<VideoInfo, String> {
    let probe: ProbeOutput =
        serde_json::from_str(json).map_err(|e| format!("unreadable ffprobe output: {e}"))?;

    let stream = probe
        .streams
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| "no video stream".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };
    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| "video stream has no usable frame rate".to_string())?;
    let duration_s = parse_duration(probe.format.duration.as_deref())
        .or_else(|| parse_duration(stream.duration.as_deref()))
        .ok_or_else(|| "could not determine video duration".to_string())?;

    Ok(VideoInfo {
        width,
        height,
        codec: stream.codec_name.unwrap_or_default(),
        fps,
        duration_s,
        size_bytes: probe
            .format
            .size
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    })
}

/// Run ffprobe on `input`.
pub fn probe_video(ffprobe: &Path, input: &Path) -> Result<VideoInfo, ExportError> {
    let unreadable = |reason: String| ExportError::SourceUnreadable {
        path: input.to_path_buf(),
        reason,
    };

    let args: Vec<String> = ["-v", "quiet", "-print_format", "json", "-show_streams", "-show_format"]
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(input.display().to_string()))
        .collect();

    let output =
        run_with_timeout(ffprobe, &args, PROBE_TIMEOUT).map_err(|e| unreadable(e.to_string()))?;
    if !output.success() {
        return Err(unreadable(format!(
            "ffprobe exited with {:?}",
            output.code
        )));
    }

    let info = parse_probe_json(&output.stdout).map_err(unreadable)?;
    tracing::debug!(
        path = %input.display(),
        width = info.width,
        height = info.height,
        fps = info.fps,
        duration_s = info.duration_s,
        codec = %info.codec,
        "Probed source video"
    );
    Ok(info)
}

/// Output heights for the optional upscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpscaleTarget {
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2.7k")]
    K2_7,
    #[serde(rename = "4k")]
    K4,
}

impl UpscaleTarget {
    pub fn height(self) -> u32 {
        match self {
            UpscaleTarget::P1440 => 1440,
            UpscaleTarget::K2_7 => 1512,
            UpscaleTarget::K4 => 2160,
        }
    }
}

impl std::str::FromStr for UpscaleTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1440p" => Ok(UpscaleTarget::P1440),
            "2.7k" => Ok(UpscaleTarget::K2_7),
            "4k" => Ok(UpscaleTarget::K4),
            other => Err(format!("unknown upscale target '{other}' (1440p, 2.7k, 4k)")),
        }
    }
}

/// The part of the source being exported, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimWindow {
    pub start_s: f64,
    pub end_s: f64,
    /// Length of the whole source.
    pub source_s: f64,
}

impl TrimWindow {
    /// Unset or near-zero edges fall back to the start and end of the file.
    pub fn resolve(trim_start: Option<f64>, trim_end: Option<f64>, source_s: f64) -> Self {
        let start_s = trim_start.filter(|s| *s > TRIM_EPSILON).unwrap_or(0.0);
        let end_s = trim_end.filter(|e| *e > TRIM_EPSILON).unwrap_or(source_s);
        Self {
            start_s,
            end_s,
            source_s,
        }
    }

    pub fn duration_s(&self) -> f64 {
        (self.end_s - self.start_s).max(0.001)
    }

    pub fn seeks(&self) -> bool {
        self.start_s > TRIM_EPSILON
    }

    pub fn cuts_end(&self) -> bool {
        self.duration_s() < self.source_s - TRIM_EPSILON
    }

    fn seek_args(&self) -> Vec<String> {
        if self.seeks() {
            vec!["-ss".into(), format!("{:.3}", self.start_s)]
        } else {
            Vec::new()
        }
    }

    fn length_args(&self) -> Vec<String> {
        if self.cuts_end() {
            vec!["-t".into(), format!("{:.3}", self.duration_s())]
        } else {
            Vec::new()
        }
    }
}

/// `[0:v][1:v]overlay` graph. Output lands on `[v]`.
pub fn overlay_filter(
    encoder: Encoder,
    upscale: Option<UpscaleTarget>,
    overlay_end: OverlayEnd,
) -> String {
    let mut graph = String::from(match overlay_end {
        OverlayEnd::Shortest => "[0:v][1:v]overlay=shortest=1",
        OverlayEnd::HoldLast => "[0:v][1:v]overlay=eof_action=repeat",
    });
    if let Some(target) = upscale {
        graph.push_str(&format!(",scale=-2:{}:flags=lanczos", target.height()));
    }
    match filter_pix_fmt(encoder) {
        Some(fmt) => graph.push_str(&format!(",format={fmt}[v]")),
        None => graph.push_str(",hwupload[v]"),
    }
    graph
}

/// When the overlay stream stops relative to the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverlayEnd {
    /// Output ends with the shorter of the two inputs.
    #[default]
    Shortest,
    /// The last overlay frame is held until the source ends. Used when only
    /// a single frame is piped.
    HoldLast,
}

/// Everything needed to overlay piped RGBA frames onto a source video.
#[derive(Debug, Clone)]
pub struct OverlayCommand<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub encoder: Encoder,
    pub quality: Quality,
    pub preset: &'a str,
    /// Size of the piped overlay frames.
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub trim: TrimWindow,
    pub upscale: Option<UpscaleTarget>,
    pub overlay_end: OverlayEnd,
}

impl OverlayCommand<'_> {
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into()];
        if self.encoder.is_vaapi() {
            args.extend(["-vaapi_device", VAAPI_DEVICE].map(String::from));
        }
        args.extend(self.trim.seek_args());
        args.extend(["-i".into(), self.input.display().to_string()]);
        args.extend(self.trim.length_args());
        args.extend([
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "-s".into(),
            format!("{}x{}", self.width, self.height),
            "-r".into(),
            self.fps.to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-sws_flags".into(),
            SWS_FLAGS.into(),
            "-filter_complex".into(),
            overlay_filter(self.encoder, self.upscale, self.overlay_end),
            "-map".into(),
            "[v]".into(),
            "-map".into(),
            "0:a:0?".into(),
            "-c:v".into(),
            self.encoder.name(),
        ]);
        args.extend(quality_args(self.encoder, self.quality));
        args.extend(preset_args(self.encoder, self.preset));
        args.extend(output_pix_fmt_args(self.encoder));
        if !self.encoder.is_vaapi() {
            args.extend(["-movflags", "+faststart"].map(String::from));
        }
        args.extend([
            "-c:a".into(),
            "copy".into(),
            self.output.display().to_string(),
        ]);
        args
    }
}

/// Plain trim + re-encode, no overlay input.
pub fn reencode_args(
    input: &Path,
    output: &Path,
    encoder: Encoder,
    quality: Quality,
    preset: &str,
    trim: TrimWindow,
    upscale: Option<UpscaleTarget>,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into()];
    args.extend(trim.seek_args());
    args.extend(["-i".into(), input.display().to_string()]);
    args.extend(trim.length_args());
    args.extend(["-sws_flags", SWS_FLAGS].map(String::from));
    if let Some(target) = upscale {
        args.extend([
            "-vf".into(),
            format!("scale=-2:{}:flags=lanczos", target.height()),
        ]);
    }
    args.extend(["-c:v".into(), encoder.name()]);
    args.extend(quality_args(encoder, quality));
    args.extend(preset_args(encoder, preset));
    args.extend(output_pix_fmt_args(encoder));
    args.extend([
        "-movflags".into(),
        "+faststart".into(),
        "-c:a".into(),
        "copy".into(),
        output.display().to_string(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{HwFamily, VideoCodec};

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "audio", "codec_name": "aac"},
            {"index": 1, "codec_type": "video", "codec_name": "h264",
             "width": 1920, "height": 1080, "r_frame_rate": "60000/1001"}
        ],
        "format": {"duration": "12.500000", "size": "48123456"}
    }"#;

    #[test]
    fn test_parse_probe_json_picks_video_stream() {
        let info = parse_probe_json(PROBE_JSON).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.codec, "h264");
        assert_eq!(info.fps, 59.94);
        assert_eq!(info.duration_s, 12.5);
        assert_eq!(info.size_bytes, 48_123_456);
    }

    #[test]
    fn test_parse_probe_json_rejects_audio_only() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(parse_probe_json(json).unwrap_err().contains("no video stream"));
        assert!(parse_probe_json("not json").is_err());
    }

    #[test]
    fn test_parse_probe_json_duration_fallbacks() {
        let stream_only = r#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 480,
                         "r_frame_rate": "30/1", "duration": "4.250000"}],
            "format": {"duration": "N/A"}
        }"#;
        assert_eq!(parse_probe_json(stream_only).unwrap().duration_s, 4.25);

        let missing = r#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 480,
                         "r_frame_rate": "60/1"}],
            "format": {}
        }"#;
        assert!(parse_probe_json(missing).unwrap_err().contains("duration"));

        let zero = r#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 480,
                         "r_frame_rate": "60/1", "duration": "0.0"}],
            "format": {"duration": "0.000000"}
        }"#;
        assert!(parse_probe_json(zero).is_err());
    }

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("30000/1001"), Some(29.97));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
    }

    #[test]
    fn test_trim_window_defaults_and_flags() {
        let whole = TrimWindow::resolve(None, Some(0.0), 20.0);
        assert_eq!((whole.start_s, whole.end_s), (0.0, 20.0));
        assert!(!whole.seeks());
        assert!(!whole.cuts_end());

        let cut = TrimWindow::resolve(Some(2.5), Some(10.0), 20.0);
        assert_eq!(cut.duration_s(), 7.5);
        assert_eq!(cut.seek_args(), vec!["-ss", "2.500"]);
        assert_eq!(cut.length_args(), vec!["-t", "7.500"]);

        let inverted = TrimWindow::resolve(Some(5.0), Some(4.0), 20.0);
        assert_eq!(inverted.duration_s(), 0.001);
    }

    #[test]
    fn test_overlay_filter_variants() {
        let sw = Encoder::Software(VideoCodec::H264);
        assert_eq!(
            overlay_filter(sw, None, OverlayEnd::Shortest),
            "[0:v][1:v]overlay=shortest=1,format=yuv420p[v]"
        );

        let nvenc = Encoder::Hardware(HwFamily::Nvenc, VideoCodec::H265);
        assert_eq!(
            overlay_filter(nvenc, Some(UpscaleTarget::K4), OverlayEnd::Shortest),
            "[0:v][1:v]overlay=shortest=1,scale=-2:2160:flags=lanczos,format=nv12[v]"
        );

        let vaapi = Encoder::Hardware(HwFamily::Vaapi, VideoCodec::H264);
        assert_eq!(
            overlay_filter(vaapi, None, OverlayEnd::Shortest),
            "[0:v][1:v]overlay=shortest=1,hwupload[v]"
        );
    }

    #[test]
    fn test_held_overlay_runs_for_whole_source() {
        let sw = Encoder::Software(VideoCodec::H264);
        let graph = overlay_filter(sw, None, OverlayEnd::HoldLast);
        assert_eq!(graph, "[0:v][1:v]overlay=eof_action=repeat,format=yuv420p[v]");
        assert!(!graph.contains("shortest"));

        let cmd = OverlayCommand {
            input: Path::new("in.mp4"),
            output: Path::new("out.mp4"),
            encoder: sw,
            quality: Quality::Crf(23),
            preset: "medium",
            width: 640,
            height: 360,
            fps: 30.0,
            trim: TrimWindow::resolve(Some(2.0), Some(8.0), 10.0),
            upscale: None,
            overlay_end: OverlayEnd::HoldLast,
        };
        let line = cmd.args().join(" ");
        assert!(line.contains("-t 6.000"));
        assert!(line.contains("-filter_complex [0:v][1:v]overlay=eof_action=repeat,format=yuv420p[v]"));
    }

    #[test]
    fn test_overlay_command_software() {
        let cmd = OverlayCommand {
            input: Path::new("in.mp4"),
            output: Path::new("out.mp4"),
            encoder: Encoder::Software(VideoCodec::H264),
            quality: Quality::Crf(20),
            preset: "fast",
            width: 1280,
            height: 720,
            fps: 60.0,
            trim: TrimWindow::resolve(Some(1.0), Some(5.0), 10.0),
            upscale: None,
            overlay_end: OverlayEnd::Shortest,
        };
        let line = cmd.args().join(" ");
        assert!(line.starts_with("-y -ss 1.000 -i in.mp4 -t 4.000 -f rawvideo -pix_fmt rgba"));
        assert!(line.contains("-s 1280x720 -r 60 -i pipe:0"));
        assert!(line.contains("-sws_flags lanczos+accurate_rnd+full_chroma_int"));
        assert!(line.contains("-map [v] -map 0:a:0? -c:v libx264 -crf 20 -preset fast"));
        assert!(line.ends_with("-pix_fmt yuv420p -movflags +faststart -c:a copy out.mp4"));
    }

    #[test]
    fn test_overlay_command_vaapi() {
        let cmd = OverlayCommand {
            input: Path::new("in.mp4"),
            output: Path::new("out.mp4"),
            encoder: Encoder::Hardware(HwFamily::Vaapi, VideoCodec::H264),
            quality: Quality::Crf(23),
            preset: "medium",
            width: 1920,
            height: 1080,
            fps: 29.97,
            trim: TrimWindow::resolve(None, None, 10.0),
            upscale: None,
            overlay_end: OverlayEnd::Shortest,
        };
        let args = cmd.args();
        assert_eq!(&args[..3], ["-y", "-vaapi_device", "/dev/dri/renderD128"]);
        let line = args.join(" ");
        assert!(!line.contains("-ss"));
        assert!(!line.contains("-movflags"));
        assert!(line.contains("-c:v h264_vaapi -rc_mode VBR -qp 23 -pix_fmt nv12 -c:a copy"));
    }

    #[test]
    fn test_reencode_args() {
        let args = reencode_args(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Encoder::Software(VideoCodec::H265),
            Quality::BitrateMbps(10.0),
            "slow",
            TrimWindow::resolve(Some(3.0), None, 10.0),
            Some(UpscaleTarget::P1440),
        )
        .join(" ");
        assert!(args.starts_with("-y -ss 3.000 -i in.mp4 -sws_flags"));
        assert!(args.contains("-vf scale=-2:1440:flags=lanczos -c:v libx265"));
        assert!(args.contains("-b:v 10M -maxrate 15.0M -bufsize 20.0M -preset slow"));
        assert!(args.ends_with("-c:a copy out.mp4"));
    }

    #[test]
    fn test_upscale_targets_parse() {
        assert_eq!("2.7K".parse::<UpscaleTarget>(), Ok(UpscaleTarget::K2_7));
        assert_eq!(UpscaleTarget::K2_7.height(), 1512);
        assert!("8k".parse::<UpscaleTarget>().is_err());
    }

    #[test]
    fn test_configured_ffmpeg_that_does_not_exist_is_skipped() {
        let missing = std::env::temp_dir().join("osdburn_no_ffmpeg_here");
        // Whatever PATH holds, the missing file itself is never returned.
        if let Ok(found) = find_ffmpeg(Some(&missing)) {
            assert_ne!(found, missing);
        }
    }

    #[test]
    fn test_ffprobe_sibling_of_ffmpeg() {
        let ffmpeg = Path::new("/opt/tools/ffmpeg");
        let probe = find_ffprobe(ffmpeg);
        assert!(probe.ends_with(exe_name("ffprobe")));
    }
}
