//! Framewright Render Engine
//!
//! Real-time preview pipeline that composites timeline elements into
//! frames and keeps a display surface in sync with playback.
//!
//! # Pipeline Architecture
//!
//! ```text
//! PlaybackClock ──► RenderLoop (one tick per display refresh)
//!                        │  frame index unchanged? skip
//!                        │  render in flight?      coalesce
//!                        ▼
//!                  PreviewRenderer
//!                        │
//!          ┌─── FrameCache hit ──► pre-render neighbours
//!          │
//!          └─── miss ──► FrameCompositor
//!                           │ background (color | blur)
//!                           │ media layers ◄── MediaSourceManager
//!                           │ text layers
//!                           ▼
//!                       Composite ──► cache (if complete) ──► DisplaySurface
//! ```

pub mod audio;
pub mod compositor;
pub mod frame_cache;
pub mod preview;
pub mod raster;
pub mod render_loop;
pub mod snapshot;
pub mod text;

pub use audio::{audible_voices, AudioScheduler, AudioSink, AudioVoice, TracingAudioSink};
pub use compositor::{Composite, FrameCompositor};
pub use frame_cache::{fingerprint, FrameCache, FrameCacheKey, FrameCacheStats};
pub use framewright_common::clock::{PlaybackClock, PlaybackStatus};
pub use preview::{PreviewRenderer, RenderOutcome};
pub use raster::{Rect, Surface};
pub use render_loop::{
    DisplaySurface, PlaybackSource, PresentedFrame, RenderLoop, RenderScheduler, RenderState,
    TickAction,
};
pub use snapshot::RenderSnapshot;
pub use text::{
    default_rasterizer, layout_text, BlockGlyphRasterizer, FontdueRasterizer, TextMask,
    TextRasterizer, TextStyle,
};
