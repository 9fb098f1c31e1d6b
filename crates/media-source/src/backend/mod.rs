use std::path::{Path, PathBuf};

use framewright_common::error::FramewrightResult;
use framewright_project_model::media::{MediaItem, MediaKind};

use crate::bitmap::Bitmap;

pub mod ffmpeg;
pub mod local;
pub mod still;
pub mod synthetic;

pub use ffmpeg::FfmpegCliBackend;
pub use local::LocalFileBackend;
pub use still::ImageBackend;
pub use synthetic::{SyntheticBackend, SyntheticCounters};

/// What a backend needs to open one media source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceDescriptor {
    /// Identity of the source. Media items sharing a locator share a decoder.
    pub source_id: String,

    pub kind: MediaKind,

    /// The raw locator as stored on the media item.
    pub locator: String,

    /// Resolved local file, when the locator points at one.
    pub path: Option<PathBuf>,
}

impl SourceDescriptor {
    /// Describe `item`, resolving relative paths against `base_dir`.
    pub fn from_media(item: &MediaItem, base_dir: &Path) -> Self {
        let path = item.local_path(base_dir);
        let source_id = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| item.source.clone());
        Self {
            source_id,
            kind: item.kind,
            locator: item.source.clone(),
            path,
        }
    }
}

/// Metadata known once a source is open.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: Option<f64>,
    pub fps: Option<f64>,
    /// A single frame regardless of time (still images).
    pub still: bool,
}

/// Abstract interface for decoding backends.
#[async_trait::async_trait]
pub trait DecodeBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Whether the backend can decode anything on this system.
    fn is_available(&self) -> bool;

    /// Open a decoder for one source and load its metadata.
    async fn open(&self, source: &SourceDescriptor) -> FramewrightResult<Box<dyn DecoderHandle>>;
}

/// One open decoder. Callers serialize access.
#[async_trait::async_trait]
pub trait DecoderHandle: Send {
    fn info(&self) -> &SourceInfo;

    /// Position the decoder at `time_secs` and resolve once the frame there
    /// is ready to extract.
    async fn seek(&mut self, time_secs: f64) -> FramewrightResult<()>;

    /// The frame the decoder currently holds.
    fn current_frame(&self) -> FramewrightResult<Bitmap>;

    /// Release decoder resources.
    async fn close(&mut self);
}

/// Pick the backend for real files on this system.
pub fn default_backend(config: &framewright_common::config::DecodeConfig) -> LocalFileBackend {
    LocalFileBackend::new(FfmpegCliBackend::from_config(config), ImageBackend::new())
}
