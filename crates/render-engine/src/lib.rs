//! osdburn Render Engine
//!
//! Burns a recorded OSD into FPV video: glyph sheets are cut into tiles,
//! composited over frames, and streamed into FFmpeg.
//!
//! # Pipeline Architecture
//!
//! ```text
//! flight.osd ──┐
//!              ├── frame_at_time(t)
//! font sheet ──┘         │
//!                        ├── OverlayRenderer (RGBA, transparent)
//! telemetry.srt ─────────┘         │
//!                                  ▼ stdin pipe
//! source.mp4 ──────────────► ffmpeg overlay ──► Encode (CPU / HW)
//!                                                      │
//!                                                      ▼
//!                                                  output.mp4
//! ```

pub mod atlas;
pub mod blend;
pub mod builtin_font;
pub mod cache;
pub mod compositor;
pub mod encoder;
pub mod export;
pub mod ffmpeg;
pub mod fonts;
pub mod overlay;
pub mod status;
pub mod text;

pub use atlas::GlyphAtlas;
pub use compositor::{Compositor, OverlayGeometry, Placement, RenderSettings, SimpleRenderer};
pub use encoder::{Encoder, EncoderProbe, HwFamily, Quality, VideoCodec};
pub use export::*;
pub use ffmpeg::{
    find_ffmpeg, find_ffprobe, probe_video, OverlayEnd, TrimWindow, UpscaleTarget, VideoInfo,
};
pub use fonts::{load_font, FontLibrary, Firmware};
pub use overlay::OverlayRenderer;
pub use text::TextRenderer;
