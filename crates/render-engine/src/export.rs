//! Export pipeline: stream rendered overlays into an FFmpeg encoder.
//!
//! The producer renders one transparent RGBA frame per output frame and
//! writes it to the encoder's stdin; FFmpeg overlays the pipe onto the
//! source video. A background thread keeps the tail of the encoder's
//! stderr for diagnostics.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use osdburn_common::error::OsdburnError;
use osdburn_osd_model::{FormatError, OsdLog, TelemetryText};

use crate::atlas::GlyphAtlas;
use crate::cache::BoundedCache;
use crate::compositor::RenderSettings;
use crate::encoder::{mentions_hardware_failure, Encoder, EncoderProbe, Quality, VideoCodec};
use crate::ffmpeg::{
    probe_video, reencode_args, OverlayCommand, OverlayEnd, TrimWindow, UpscaleTarget,
};
use crate::overlay::OverlayRenderer;
use crate::text::TextRenderer;

/// Rendered overlay frames kept per export, keyed by OSD frame and status.
pub const FRAME_CACHE_CAPACITY: usize = 32;

/// Upper bound on frame-cache memory. Large outputs keep fewer frames.
pub const FRAME_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// Frame-cache entries for frames of `frame_bytes` each, at least one.
pub fn frame_cache_capacity(frame_bytes: usize) -> usize {
    (FRAME_CACHE_BYTES / frame_bytes.max(1)).clamp(1, FRAME_CACHE_CAPACITY)
}

/// Bytes of encoder stderr kept for error reports.
pub const STDERR_TAIL_BYTES: usize = 32 * 1024;

/// Characters of stderr attached to an encode failure.
pub const DIAGNOSTIC_TAIL_CHARS: usize = 2000;

/// OSD frames this far past the trim end still count as "in the window".
pub const OSD_WINDOW_GRACE_MS: i64 = 500;

pub const NO_OSD_IN_WINDOW_WARNING: &str =
    "No OSD elements in trim window — rendered without OSD overlay";

/// Progress reports per streaming job, at most.
const PROGRESS_REPORTS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("FFmpeg not found: set ffmpeg_path in the config or add it to PATH")]
    EncoderNotFound,

    #[error("FFmpeg build has no usable encoder ({encoder})")]
    NoUsableEncoder { encoder: String },

    #[error("Cannot read source {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Encoder closed its input early: {diagnostic_tail}")]
    PipeBroken { diagnostic_tail: String },

    #[error(
        "Encoder failed (exit code {exit_code:?}){}: {diagnostic_tail}",
        hint_suffix(.hardware_hint)
    )]
    EncodeFailed {
        exit_code: Option<i32>,
        diagnostic_tail: String,
        hardware_hint: bool,
    },

    #[error("Export cancelled")]
    Cancelled,

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] OsdburnError),
}

fn hint_suffix(hardware_hint: &bool) -> &'static str {
    if *hardware_hint {
        " (hardware encoder problem, try again without hardware encoding)"
    } else {
        ""
    }
}

/// Stages of an export, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportStage {
    /// Not started yet.
    #[default]
    Idle,
    ProbingEncoder,
    Streaming,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

/// Export progress report.
#[derive(Debug, Clone)]
pub struct ExportProgress {
    /// Overall progress [0, 100].
    pub percent: u8,

    /// Human-readable status line.
    pub message: String,

    /// Frames written so far.
    pub frames_done: u64,

    /// Frames this export will write.
    pub total_frames: u64,

    pub stage: ExportStage,
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

/// Shared cancellation flag. Checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An export job ready to be rendered.
#[derive(Clone)]
pub struct ExportJob {
    pub input: PathBuf,
    pub output: PathBuf,

    /// OSD log to burn in. Frames are aligned to video time.
    pub osd: Option<Arc<OsdLog>>,

    /// Glyph sheet. Without one, OSD cells are drawn as plain text.
    pub atlas: Option<Arc<GlyphAtlas>>,

    /// Status-bar text supplier.
    pub text: Option<Arc<dyn TelemetryText>>,

    pub status_font: Arc<TextRenderer>,
    pub settings: RenderSettings,

    pub codec: VideoCodec,
    pub quality: Quality,
    pub preset: String,
    pub use_hw: bool,

    pub trim_start_s: Option<f64>,
    pub trim_end_s: Option<f64>,
    pub upscale: Option<UpscaleTarget>,

    /// Problems found while preparing the job, passed through to the outcome.
    pub warnings: Vec<String>,
}

impl ExportJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            osd: None,
            atlas: None,
            text: None,
            status_font: Arc::new(TextRenderer::builtin()),
            settings: RenderSettings::default(),
            codec: VideoCodec::H264,
            quality: Quality::Crf(23),
            preset: "medium".to_string(),
            use_hw: false,
            trim_start_s: None,
            trim_end_s: None,
            upscale: None,
            warnings: Vec::new(),
        }
    }

    /// Nothing to draw: the export is a plain trim + re-encode.
    pub fn is_reencode_only(&self) -> bool {
        self.osd.is_none() && self.text.is_none()
    }
}

impl std::fmt::Debug for ExportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportJob")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("osd_frames", &self.osd.as_ref().map(|log| log.frame_count()))
            .field("font", &self.atlas.as_ref().map(|a| a.name().to_string()))
            .field("has_text", &self.text.is_some())
            .field("codec", &self.codec)
            .field("quality", &self.quality)
            .field("use_hw", &self.use_hw)
            .field("trim", &(self.trim_start_s, self.trim_end_s))
            .field("upscale", &self.upscale)
            .finish()
    }
}

/// What a finished export produced.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub output: PathBuf,
    pub encoder: String,
    pub frames: u64,
    pub warnings: Vec<String>,
    pub elapsed_secs: f64,
}

/// Output frame schedule for a trim window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    pub start_s: f64,
    pub duration_s: f64,
    pub fps: f64,
}

impl FramePlan {
    pub fn new(trim: &TrimWindow, fps: f64) -> Self {
        Self {
            start_s: trim.start_s,
            duration_s: trim.duration_s(),
            fps,
        }
    }

    pub fn frame_count(&self) -> u64 {
        ((self.duration_s * self.fps + 1e-6).floor() as u64).max(1)
    }

    /// Absolute video time of output frame `i`.
    pub fn frame_time_ms(&self, i: u64) -> i64 {
        // Rounded: a trim start of 1.005 s is 1004.999.. ms in f64.
        (self.start_s * 1000.0 + i as f64 * 1000.0 / self.fps).round() as i64
    }

    pub fn start_ms(&self) -> i64 {
        (self.start_s * 1000.0).round() as i64
    }

    pub fn end_ms(&self) -> i64 {
        ((self.start_s + self.duration_s) * 1000.0).round() as i64
    }
}

/// Destination for raw RGBA frames.
pub trait FrameSink {
    fn write_frame(&mut self, rgba: &[u8]) -> std::io::Result<()>;
}

impl<W: Write> FrameSink for W {
    fn write_frame(&mut self, rgba: &[u8]) -> std::io::Result<()> {
        self.write_all(rgba)
    }
}

/// What to draw while streaming.
#[derive(Clone, Copy, Default)]
pub struct StreamInputs<'a> {
    pub osd: Option<&'a OsdLog>,
    pub text: Option<&'a dyn TelemetryText>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub frames_written: u64,
    /// Frames actually rendered, the rest came from the frame cache.
    pub frames_rendered: u64,
    pub warnings: Vec<String>,
    /// The sink stopped accepting data before the last frame.
    pub pipe_broken: bool,
}

/// True when `osd` is set but has no frame inside the plan's window (plus
/// the grace period). Such exports pipe a single empty overlay frame.
pub fn osd_missing_from_window(osd: Option<&OsdLog>, plan: &FramePlan) -> bool {
    osd.is_some_and(|log| {
        !log.has_frame_between(plan.start_ms(), plan.end_ms() + OSD_WINDOW_GRACE_MS)
    })
}

/// Render and write every frame of `plan`.
///
/// A broken pipe ends the loop without an error; the caller decides from
/// the encoder's exit status whether that was fatal.
pub fn stream_frames<S: FrameSink + ?Sized>(
    renderer: &mut OverlayRenderer,
    sink: &mut S,
    plan: &FramePlan,
    inputs: StreamInputs<'_>,
    progress: Option<&ProgressCallback>,
    cancel: &CancelToken,
) -> Result<StreamReport, ExportError> {
    let total = plan.frame_count();
    let mut report = StreamReport::default();

    if osd_missing_from_window(inputs.osd, plan) {
        tracing::warn!(
            start_ms = plan.start_ms(),
            end_ms = plan.end_ms(),
            "No OSD frames inside trim window"
        );
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        report.frames_rendered = 1;
        report.warnings.push(NO_OSD_IN_WINDOW_WARNING.to_string());
        match write_checked(sink, renderer.render_overlay(None, None))? {
            true => report.frames_written = 1,
            false => report.pipe_broken = true,
        }
        return Ok(report);
    }

    let every = (total / PROGRESS_REPORTS).max(1);
    let (width, height) = renderer.dimensions();
    let frame_bytes = width as usize * height as usize * 4;
    let mut cache: BoundedCache<(Option<u32>, String), Vec<u8>> =
        BoundedCache::new(frame_cache_capacity(frame_bytes));
    let started = Instant::now();

    for i in 0..total {
        if cancel.is_cancelled() {
            tracing::info!(frame = i, total, "Export cancelled while streaming");
            return Err(ExportError::Cancelled);
        }

        let t_ms = plan.frame_time_ms(i);
        let frame = inputs.osd.map(|log| log.frame_at_time(t_ms));
        let status = inputs
            .text
            .and_then(|text| text.status_at(t_ms))
            .unwrap_or_default();
        let overlay_status = (!status.is_empty()).then(|| status.clone());

        let rendered = &mut report.frames_rendered;
        let bytes = cache.get_or_insert_with((frame.map(|f| f.index), status), || {
            *rendered += 1;
            renderer
                .render_overlay(frame, overlay_status.as_deref())
                .to_vec()
        });

        if !write_checked(sink, bytes)? {
            tracing::warn!(frame = i, total, "Encoder stopped reading frames");
            report.pipe_broken = true;
            break;
        }
        report.frames_written += 1;

        let done = i + 1;
        if done % every == 0 || done == total {
            let percent = (5 + 85 * done / total).min(90) as u8;
            if let Some(cb) = progress {
                cb(ExportProgress {
                    percent,
                    message: format!("Rendering frame {done}/{total}"),
                    frames_done: done,
                    total_frames: total,
                    stage: ExportStage::Streaming,
                });
            }
        }
    }

    tracing::info!(
        frames = report.frames_written,
        rendered = report.frames_rendered,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Streaming finished"
    );
    Ok(report)
}

/// `Ok(false)` when the reader has gone away.
fn write_checked<S: FrameSink + ?Sized>(sink: &mut S, bytes: &[u8]) -> Result<bool, ExportError> {
    match sink.write_frame(bytes) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Last `cap` bytes of a stream, held as the chunks they arrived in.
#[derive(Debug, Clone)]
pub struct StderrTail {
    cap: usize,
    chunks: VecDeque<Vec<u8>>,
    len: usize,
}

impl StderrTail {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            chunks: VecDeque::new(),
            len: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let chunk = &chunk[chunk.len().saturating_sub(self.cap)..];
        self.len += chunk.len();
        self.chunks.push_back(chunk.to_vec());
        while self.len > self.cap {
            match self.chunks.pop_front() {
                Some(old) => self.len -= old.len(),
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn text(&self) -> String {
        let bytes: Vec<u8> = self.chunks.iter().flatten().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn drain<R: Read>(mut reader: R, cap: usize) -> Self {
        let mut tail = Self::new(cap);
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => tail.push(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tail.push(format!("\n<failed to read encoder stderr: {e}>").as_bytes());
                    break;
                }
            }
        }
        tail
    }
}

/// Last `n` characters of `text`.
pub fn tail_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(n)).collect()
}

/// How the encoder process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderExit {
    pub code: Option<i32>,
    pub stderr: String,
}

/// Map an encoder exit onto success or an [`ExportError`].
pub fn classify_exit(
    exit: &EncoderExit,
    pipe_broken: bool,
    encoder: Encoder,
) -> Result<(), ExportError> {
    let diagnostic_tail = tail_chars(exit.stderr.trim_end(), DIAGNOSTIC_TAIL_CHARS);
    match exit.code {
        Some(0) if !pipe_broken => Ok(()),
        Some(0) => Err(ExportError::PipeBroken { diagnostic_tail }),
        code => Err(ExportError::EncodeFailed {
            exit_code: code,
            hardware_hint: encoder.is_hardware() && mentions_hardware_failure(&diagnostic_tail),
            diagnostic_tail,
        }),
    }
}

/// A running FFmpeg with frames going into stdin.
pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<StderrTail>>,
}

impl EncoderProcess {
    pub fn spawn(ffmpeg: &Path, args: &[String]) -> Result<Self, ExportError> {
        tracing::debug!(args = ?args, "Running ffmpeg");
        let mut child = Command::new(ffmpeg)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExportError::EncoderNotFound,
                _ => ExportError::Io(e),
            })?;

        tracing::info!(pid = child.id(), args_len = args.len(), "ffmpeg process started");

        let stdin = child.stdin.take();
        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr = child
            .stderr
            .take()
            .map(|pipe| std::thread::spawn(move || StderrTail::drain(pipe, STDERR_TAIL_BYTES)));

        Ok(Self {
            child,
            stdin,
            stderr,
        })
    }

    /// Kill the encoder. Partial output is left on disk.
    pub fn kill(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// Close stdin and wait for the encoder, killing it if `cancel` fires.
    pub fn finish(mut self, cancel: &CancelToken) -> Result<EncoderExit, ExportError> {
        drop(self.stdin.take());
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() {
                self.kill();
                return Err(ExportError::Cancelled);
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|tail| tail.text())
            .unwrap_or_else(|| "<failed to join stderr reader>".to_string());

        Ok(EncoderExit {
            code: status.code(),
            stderr,
        })
    }
}

impl Write for EncoderProcess {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(std::io::ErrorKind::BrokenPipe.into()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

fn report(
    progress: Option<&ProgressCallback>,
    stage: ExportStage,
    percent: u8,
    message: impl Into<String>,
    frames: (u64, u64),
) {
    let message = message.into();
    tracing::info!(?stage, percent, "{message}");
    if let Some(cb) = progress {
        cb(ExportProgress {
            percent,
            message,
            frames_done: frames.0,
            total_frames: frames.1,
            stage,
        });
    }
}

/// Run an export on the current thread.
pub fn run_export(
    job: &ExportJob,
    probe: &EncoderProbe,
    progress: Option<ProgressCallback>,
    cancel: &CancelToken,
) -> Result<ExportOutcome, ExportError> {
    let started = Instant::now();
    tracing::info!(
        input = %job.input.display(),
        output = %job.output.display(),
        osd = job.osd.is_some(),
        text = job.text.is_some(),
        "Starting export"
    );

    let result = run_stages(job, probe, progress.as_ref(), cancel);
    match result {
        Ok((encoder, frames, mut warnings)) => {
            let mut all = job.warnings.clone();
            all.append(&mut warnings);
            report(progress.as_ref(), ExportStage::Done, 100, "Export complete", (frames, frames));
            tracing::info!(
                elapsed_secs = started.elapsed().as_secs_f64(),
                frames,
                encoder = %encoder,
                "Export finished"
            );
            Ok(ExportOutcome {
                output: job.output.clone(),
                encoder,
                frames,
                warnings: all,
                elapsed_secs: started.elapsed().as_secs_f64(),
            })
        }
        Err(ExportError::Cancelled) => {
            report(progress.as_ref(), ExportStage::Cancelled, 0, "Export cancelled", (0, 0));
            Err(ExportError::Cancelled)
        }
        Err(e) => {
            tracing::error!(error = %e, "Export failed");
            report(progress.as_ref(), ExportStage::Failed, 0, e.to_string(), (0, 0));
            Err(e)
        }
    }
}

fn run_stages(
    job: &ExportJob,
    probe: &EncoderProbe,
    progress: Option<&ProgressCallback>,
    cancel: &CancelToken,
) -> Result<(String, u64, Vec<String>), ExportError> {
    report(progress, ExportStage::ProbingEncoder, 0, "Detecting encoder", (0, 0));

    if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let info = probe_video(&probe.ffprobe(), &job.input)?;
    let encoder = probe.resolve(job.codec, job.use_hw && !job.is_reencode_only());
    if !probe.has_encoder(&encoder.name()) {
        return Err(ExportError::NoUsableEncoder {
            encoder: encoder.name(),
        });
    }
    let trim = TrimWindow::resolve(job.trim_start_s, job.trim_end_s, info.duration_s);
    if cancel.is_cancelled() {
        return Err(ExportError::Cancelled);
    }

    if job.is_reencode_only() {
        let args = reencode_args(
            &job.input,
            &job.output,
            encoder,
            job.quality,
            &job.preset,
            trim,
            job.upscale,
        );
        report(
            progress,
            ExportStage::Streaming,
            5,
            format!("Re-encoding with {}", encoder.label()),
            (0, 0),
        );
        let process = EncoderProcess::spawn(probe.ffmpeg(), &args)?;
        report(progress, ExportStage::Finalizing, 92, "Finalizing", (0, 0));
        let exit = process.finish(cancel)?;
        classify_exit(&exit, false, encoder)?;
        return Ok((encoder.label(), 0, Vec::new()));
    }

    let plan = FramePlan::new(&trim, info.fps);
    let total = plan.frame_count();
    let overlay_end = if osd_missing_from_window(job.osd.as_deref(), &plan) {
        OverlayEnd::HoldLast
    } else {
        OverlayEnd::Shortest
    };
    let args = OverlayCommand {
        input: &job.input,
        output: &job.output,
        encoder,
        quality: job.quality,
        preset: &job.preset,
        width: info.width,
        height: info.height,
        fps: info.fps,
        trim,
        upscale: job.upscale,
        overlay_end,
    }
    .args();

    let mut renderer = OverlayRenderer::new(
        info.width,
        info.height,
        job.atlas.clone(),
        job.status_font.clone(),
        job.settings,
    );
    let mut process = EncoderProcess::spawn(probe.ffmpeg(), &args)?;

    report(
        progress,
        ExportStage::Streaming,
        5,
        format!(
            "{}x{} @ {}fps · {} frames · {}",
            info.width,
            info.height,
            info.fps,
            total,
            encoder.label()
        ),
        (0, total),
    );

    let inputs = StreamInputs {
        osd: job.osd.as_deref(),
        text: job.text.as_deref().filter(|_| job.settings.show_status_bar),
    };
    let streamed =
        match stream_frames(&mut renderer, &mut process, &plan, inputs, progress, cancel) {
            Ok(streamed) => streamed,
            Err(e) => {
                process.kill();
                return Err(e);
            }
        };

    report(
        progress,
        ExportStage::Finalizing,
        92,
        "Finalizing",
        (streamed.frames_written, total),
    );
    let exit = process.finish(cancel)?;
    classify_exit(&exit, streamed.pipe_broken, encoder)?;

    Ok((encoder.label(), streamed.frames_written, streamed.warnings))
}

/// Export a video, running the blocking pipeline off the async runtime.
pub async fn export_video(
    job: ExportJob,
    probe: Arc<EncoderProbe>,
    progress: Option<ProgressCallback>,
    cancel: CancelToken,
) -> Result<ExportOutcome, ExportError> {
    tokio::task::spawn_blocking(move || run_export(&job, &probe, progress, &cancel))
        .await
        .map_err(|e| OsdburnError::render(format!("export task failed: {e}")))?
}
