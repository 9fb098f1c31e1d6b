//! Routes local files to the backend for their media kind.

use framewright_common::error::{FramewrightError, FramewrightResult};
use framewright_project_model::media::MediaKind;

use super::{DecodeBackend, DecoderHandle, FfmpegCliBackend, ImageBackend, SourceDescriptor};

/// Video through ffmpeg, stills through `image`. Audio is not decoded here.
#[derive(Debug)]
pub struct LocalFileBackend {
    video: FfmpegCliBackend,
    image: ImageBackend,
}

impl LocalFileBackend {
    pub fn new(video: FfmpegCliBackend, image: ImageBackend) -> Self {
        Self { video, image }
    }

    pub fn video(&self) -> &FfmpegCliBackend {
        &self.video
    }
}

#[async_trait::async_trait]
impl DecodeBackend for LocalFileBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn is_available(&self) -> bool {
        self.image.is_available() || self.video.is_available()
    }

    async fn open(&self, source: &SourceDescriptor) -> FramewrightResult<Box<dyn DecoderHandle>> {
        match source.kind {
            MediaKind::Video => self.video.open(source).await,
            MediaKind::Image => self.image.open(source).await,
            MediaKind::Audio => Err(FramewrightError::unsupported(
                "audio sources have no frames",
            )),
        }
    }
}
