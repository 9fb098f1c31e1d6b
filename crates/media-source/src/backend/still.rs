//! Still images decoded once with the `image` crate.

use std::path::Path;

use tracing::debug;

use framewright_common::error::{FramewrightError, FramewrightResult};
use framewright_project_model::media::MediaKind;

use super::{DecodeBackend, DecoderHandle, SourceDescriptor, SourceInfo};
use crate::bitmap::Bitmap;

/// Decodes PNG / JPEG / WebP / GIF / BMP files on a blocking thread.
#[derive(Debug, Default)]
pub struct ImageBackend;

impl ImageBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Decode `path` into an RGBA bitmap. Blocking.
pub fn decode_image_file(path: &Path) -> FramewrightResult<Bitmap> {
    let image = image::open(path).map_err(|e| {
        FramewrightError::decode(format!("failed to decode {}: {e}", path.display()))
    })?;
    Ok(Bitmap::from(image.to_rgba8()))
}

#[async_trait::async_trait]
impl DecodeBackend for ImageBackend {
    fn name(&self) -> &str {
        "image"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn open(&self, source: &SourceDescriptor) -> FramewrightResult<Box<dyn DecoderHandle>> {
        if source.kind != MediaKind::Image {
            return Err(FramewrightError::unsupported(format!(
                "image backend only decodes stills, got {:?}",
                source.kind
            )));
        }
        let path = source.path.clone().ok_or_else(|| {
            FramewrightError::unsupported(format!("not a local file: {}", source.locator))
        })?;
        if !path.exists() {
            return Err(FramewrightError::FileNotFound { path });
        }

        let decode_path = path.clone();
        let bitmap = tokio::task::spawn_blocking(move || decode_image_file(&decode_path))
            .await
            .map_err(|e| FramewrightError::decode(format!("image decode task failed: {e}")))??;

        debug!(
            path = %path.display(),
            width = bitmap.width(),
            height = bitmap.height(),
            "Decoded still image"
        );
        Ok(Box::new(StillImage::new(bitmap)))
    }
}

/// A decoder holding one frame for all times.
pub struct StillImage {
    info: SourceInfo,
    frame: Bitmap,
}

impl StillImage {
    pub fn new(frame: Bitmap) -> Self {
        Self {
            info: SourceInfo {
                width: frame.width(),
                height: frame.height(),
                duration_secs: None,
                fps: None,
                still: true,
            },
            frame,
        }
    }
}

#[async_trait::async_trait]
impl DecoderHandle for StillImage {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn seek(&mut self, _time_secs: f64) -> FramewrightResult<()> {
        Ok(())
    }

    fn current_frame(&self) -> FramewrightResult<Bitmap> {
        Ok(self.frame.clone())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_decodes_png_from_disk() {
        let dir = std::env::temp_dir().join("framewright_test_still");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("red.png");
        image::RgbaImage::from_pixel(4, 3, image::Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let source = SourceDescriptor {
            source_id: path.display().to_string(),
            kind: MediaKind::Image,
            locator: path.display().to_string(),
            path: Some(path.clone()),
        };
        let mut handle = ImageBackend::new().open(&source).await.ok().unwrap();
        assert!(handle.info().still);
        handle.seek(12.0).await.unwrap();
        let frame = handle.current_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(frame.pixel(0, 0), Some([255, 0, 0, 255]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let source = SourceDescriptor {
            source_id: "missing".into(),
            kind: MediaKind::Image,
            locator: "missing.png".into(),
            path: Some(PathBuf::from("/nonexistent-framewright/missing.png")),
        };
        let err = ImageBackend::new().open(&source).await.err().unwrap();
        assert!(matches!(err, FramewrightError::FileNotFound { .. }));
    }
}
