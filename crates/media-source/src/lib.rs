//! Framewright Media Source
//!
//! Owns one decoder per distinct media source and hands out single frames:
//! - **Backends:** ffmpeg CLI for video, the `image` crate for stills,
//!   and a synthetic generator for tests and headless runs
//! - **Manager:** per-source seek serialization, bounded seek waits,
//!   decoded-frame caching and predictive decoding along the scrub direction
//! - **Cache:** byte-budgeted LRU shared with the render engine

pub mod backend;
pub mod bitmap;
pub mod cache;
pub mod manager;

pub use backend::{
    DecodeBackend, DecoderHandle, FfmpegCliBackend, ImageBackend, LocalFileBackend,
    SourceDescriptor, SourceInfo, SyntheticBackend, SyntheticCounters,
};
pub use bitmap::Bitmap;
pub use cache::{BitmapCache, CacheStats};
pub use manager::{FrameStatus, ManagerConfig, ManagerStats, MediaSourceManager, SourceState};
