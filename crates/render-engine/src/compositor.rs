//! Frame compositor: background, media layers, then text layers.
//!
//! Every composite is drawn off-screen and returned as one immutable
//! bitmap. Layers whose frame is not decoded yet are drawn as a
//! deterministic placeholder and mark the composite incomplete, so callers
//! never cache a frame that is still waiting on a decoder.

use std::sync::Arc;

use tracing::{debug, warn};

use framewright_common::clock::{frame_index_round, frame_to_time};
use framewright_common::config::TextConfig;
use framewright_common::error::FramewrightResult;
use framewright_media_source::{Bitmap, FrameStatus, MediaSourceManager};
use framewright_project_model::media::{MediaItem, MediaKind};
use framewright_project_model::project::{BackgroundKind, CanvasSize};
use framewright_project_model::timeline::{
    first_blur_source, ActiveElement, FontStyle, FontWeight, TextAlign, TextDecoration,
    TextElement, TimelineElement,
};

use crate::raster::{Rect, Surface};
use crate::snapshot::RenderSnapshot;
use crate::text::{layout_text, TextRasterizer, TextStyle};

/// Fill of a media layer whose frame is unavailable.
pub const PLACEHOLDER_FILL: [u8; 4] = [38, 38, 42, 255];

/// Label color drawn on placeholders.
pub const PLACEHOLDER_LABEL: [u8; 4] = [150, 150, 156, 255];

/// Largest text size as a multiple of the output height.
const MAX_TEXT_HEIGHT_RATIO: f32 = 2.0;

/// Scale applied to the blur background before blurring.
const BLUR_BACKGROUND_SCALE: f32 = 1.1;

/// Output of one composite.
#[derive(Debug, Clone)]
pub struct Composite {
    pub frame: Bitmap,

    /// Every layer drew its exact frame. Only complete composites are cached.
    pub complete: bool,

    /// Blur background requested but no video or image element is active.
    pub blur_source_missing: bool,
}

/// Canvas-to-output ratio.
#[derive(Debug, Clone, Copy)]
struct Scale {
    x: f32,
    y: f32,
    max_text_px: f32,
}

impl Scale {
    fn new(canvas: CanvasSize, output: CanvasSize) -> Self {
        Self {
            x: output.width as f32 / canvas.width.max(1) as f32,
            y: output.height as f32 / canvas.height.max(1) as f32,
            max_text_px: (output.height as f32 * MAX_TEXT_HEIGHT_RATIO).max(1.0),
        }
    }

    fn min(&self) -> f32 {
        self.x.min(self.y)
    }
}

enum LayerFrame {
    Ready(Bitmap),
    Stale(Bitmap),
    Missing,
}

/// Draws composites from render snapshots.
pub struct FrameCompositor {
    media: MediaSourceManager,
    text: Arc<dyn TextRasterizer>,
    config: TextConfig,
}

impl FrameCompositor {
    pub fn new(media: MediaSourceManager, text: Arc<dyn TextRasterizer>, config: TextConfig) -> Self {
        Self {
            media,
            text,
            config,
        }
    }

    pub fn media(&self) -> &MediaSourceManager {
        &self.media
    }

    /// Composite `snapshot` at `time_secs` into an `output`-sized frame.
    ///
    /// Time is quantized to the project frame, so all times inside one
    /// frame produce the same pixels. Errors are returned only when the
    /// decode backend cannot work at all.
    pub async fn compose(
        &self,
        snapshot: &RenderSnapshot,
        time_secs: f64,
        output: CanvasSize,
    ) -> FramewrightResult<Composite> {
        let fps = snapshot.fps();
        let frame = frame_index_round(time_secs, fps);
        let time = frame_to_time(frame, fps);
        let scale = Scale::new(snapshot.settings.canvas, output);
        let active = snapshot.timeline.active_elements_at_frame(frame, fps);

        let mut surface = Surface::new(output.width, output.height);
        let mut complete = true;
        let mut blur_source_missing = false;

        let background = &snapshot.settings.background;
        match background.kind {
            BackgroundKind::Color => surface.fill(background.color.to_array()),
            BackgroundKind::Blur => {
                surface.fill([0, 0, 0, 255]);
                match first_blur_source(&active, &snapshot.media) {
                    Some(source) => {
                        let sigma = background.blur_intensity * scale.min();
                        complete &= self
                            .draw_blur_background(&mut surface, snapshot, source, time, sigma)
                            .await?;
                    }
                    None => blur_source_missing = true,
                }
            }
        }

        for entry in active.iter().filter(|e| !e.element.is_text()) {
            complete &= self
                .draw_media_layer(&mut surface, snapshot, entry, time)
                .await?;
        }

        for entry in &active {
            if let Some(text) = entry.element.as_text() {
                self.draw_text_layer(&mut surface, entry.element, text, scale);
            }
        }

        debug!(
            frame,
            layers = active.len(),
            complete,
            blur_source_missing,
            "Composited frame"
        );
        Ok(Composite {
            frame: surface.into_bitmap(),
            complete,
            blur_source_missing,
        })
    }

    async fn fetch_layer_frame(
        &self,
        snapshot: &RenderSnapshot,
        element: &TimelineElement,
        item: &MediaItem,
        time: f64,
    ) -> FramewrightResult<LayerFrame> {
        let source = snapshot.source_for(item);
        let local_time = match item.kind {
            MediaKind::Video => element.local_time(time),
            MediaKind::Image | MediaKind::Audio => 0.0,
        };
        match self
            .media
            .get_frame_at(&source, local_time, snapshot.fps())
            .await
        {
            Ok(FrameStatus::Ready(bitmap)) => Ok(LayerFrame::Ready(bitmap)),
            Ok(FrameStatus::Stale(bitmap)) => Ok(LayerFrame::Stale(bitmap)),
            Ok(FrameStatus::Pending) | Ok(FrameStatus::Failed) => Ok(LayerFrame::Missing),
            Err(e) if !e.is_transient() => Err(e),
            Err(e) => {
                warn!(
                    element = %element.id,
                    media = %item.id,
                    error = %e,
                    "Frame unavailable; drawing placeholder"
                );
                Ok(LayerFrame::Missing)
            }
        }
    }

    /// Returns whether the exact frame was drawn.
    async fn draw_blur_background(
        &self,
        surface: &mut Surface,
        snapshot: &RenderSnapshot,
        source: ActiveElement<'_>,
        time: f64,
        sigma: f32,
    ) -> FramewrightResult<bool> {
        let Some(item) = source.element.media_id().and_then(|id| snapshot.media.get(id)) else {
            return Ok(true);
        };
        let (bitmap, exact) = match self
            .fetch_layer_frame(snapshot, source.element, item, time)
            .await?
        {
            LayerFrame::Ready(bitmap) => (bitmap, true),
            LayerFrame::Stale(bitmap) => (bitmap, false),
            LayerFrame::Missing => return Ok(false),
        };

        let (width, height) = (surface.width(), surface.height());
        let mut layer = Surface::new(width, height);
        let dest = Rect::cover(
            bitmap.width(),
            bitmap.height(),
            width,
            height,
            BLUR_BACKGROUND_SCALE,
        );
        layer.draw_bitmap(&bitmap, dest, 0.0, 1.0);
        layer.blur(sigma);
        surface.draw_surface(
            &layer,
            Rect::new(0.0, 0.0, width as f32, height as f32),
            0.0,
            1.0,
        );
        Ok(exact)
    }

    /// Returns whether the exact frame was drawn.
    async fn draw_media_layer(
        &self,
        surface: &mut Surface,
        snapshot: &RenderSnapshot,
        entry: &ActiveElement<'_>,
        time: f64,
    ) -> FramewrightResult<bool> {
        let element = entry.element;
        let Some(media_id) = element.media_id() else {
            return Ok(true);
        };
        let Some(item) = snapshot.media.get(media_id) else {
            debug!(element = %element.id, media = media_id, "Missing media reference; skipping layer");
            return Ok(true);
        };
        if !item.kind.is_visual() {
            return Ok(true);
        }

        let rotation = element.rotation as f32;
        let opacity = element.opacity as f32;
        match self.fetch_layer_frame(snapshot, element, item, time).await? {
            LayerFrame::Ready(bitmap) => {
                let dest = Rect::fit(bitmap.width(), bitmap.height(), surface.width(), surface.height());
                surface.draw_bitmap(&bitmap, dest, rotation, opacity);
                Ok(true)
            }
            LayerFrame::Stale(bitmap) => {
                let dest = Rect::fit(bitmap.width(), bitmap.height(), surface.width(), surface.height());
                surface.draw_bitmap(&bitmap, dest, rotation, opacity);
                Ok(false)
            }
            LayerFrame::Missing => {
                self.draw_placeholder(surface, element, item, rotation, opacity);
                Ok(false)
            }
        }
    }

    /// Solid fill with the element name, sized like the media would be.
    fn draw_placeholder(
        &self,
        surface: &mut Surface,
        element: &TimelineElement,
        item: &MediaItem,
        rotation: f32,
        opacity: f32,
    ) {
        let (src_w, src_h) = match (item.width, item.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => (surface.width(), surface.height()),
        };
        let dest = Rect::fit(src_w, src_h, surface.width(), surface.height());
        let block_w = dest.width.round().max(1.0) as u32;
        let block_h = dest.height.round().max(1.0) as u32;
        let mut block = Surface::new(block_w, block_h);
        block.fill(PLACEHOLDER_FILL);

        let label = if element.name.is_empty() {
            item.name.as_str()
        } else {
            element.name.as_str()
        };
        let style = TextStyle {
            family: "sans".to_string(),
            px: self.config.min_font_px,
            weight: FontWeight::Normal,
            style: FontStyle::Normal,
        };
        let mask = layout_text(
            self.text.as_ref(),
            label,
            &style,
            TextAlign::Center,
            TextDecoration::None,
        );
        if !mask.is_empty() {
            let x = (block_w as i64 - mask.width as i64) / 2;
            let y = (block_h as i64 - mask.height as i64) / 2;
            block.draw_coverage(mask.width, mask.height, &mask.coverage, x, y, PLACEHOLDER_LABEL);
        }
        surface.draw_surface(&block, dest, rotation, opacity);
    }

    fn draw_text_layer(
        &self,
        surface: &mut Surface,
        element: &TimelineElement,
        text: &TextElement,
        scale: Scale,
    ) {
        let px = (text.font_size as f32 * scale.min())
            .max(self.config.min_font_px)
            .min(scale.max_text_px);
        let style = TextStyle {
            family: text.font_family.clone(),
            px,
            weight: text.font_weight,
            style: text.font_style,
        };
        let mask = layout_text(
            self.text.as_ref(),
            &text.content,
            &style,
            text.text_align,
            text.text_decoration,
        );
        if mask.is_empty() {
            return;
        }

        let pad_x = self.config.box_padding_x.max(0.0).round() as u32;
        let pad_y = self.config.box_padding_y.max(0.0).round() as u32;
        let mut block = Surface::new(mask.width + 2 * pad_x, mask.height + 2 * pad_y);
        if !text.background_color.is_transparent() {
            block.fill(text.background_color.to_array());
        }
        block.draw_coverage(
            mask.width,
            mask.height,
            &mask.coverage,
            pad_x as i64,
            pad_y as i64,
            text.color.to_array(),
        );

        let cx = surface.width() as f32 / 2.0 + text.x as f32 * scale.x;
        let cy = surface.height() as f32 / 2.0 + text.y as f32 * scale.y;
        let dest = Rect::centered_at(cx, cy, block.width() as f32, block.height() as f32);
        surface.draw_surface(&block, dest, element.rotation as f32, element.opacity as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use framewright_common::error::FramewrightError;
    use framewright_media_source::backend::synthetic::synthetic_frame;
    use framewright_media_source::{ManagerConfig, SourceState, SyntheticBackend};
    use framewright_project_model::color::Color;
    use framewright_project_model::media::MediaLibrary;
    use framewright_project_model::project::{BackgroundSettings, ProjectSettings};
    use framewright_project_model::timeline::{Timeline, TrackKind, Track};

    use crate::text::BlockGlyphRasterizer;

    const OUTPUT: CanvasSize = CanvasSize::new(64, 36);

    fn manager(backend: SyntheticBackend) -> MediaSourceManager {
        MediaSourceManager::new(
            Arc::new(backend),
            ManagerConfig {
                seek_timeout: Duration::from_secs(1),
                predictive_frames: 0,
                predictive_spacing: Duration::ZERO,
                cache_budget_bytes: 16 * 1024 * 1024,
            },
        )
    }

    fn compositor(backend: SyntheticBackend) -> FrameCompositor {
        FrameCompositor::new(manager(backend), Arc::new(BlockGlyphRasterizer), TextConfig::default())
    }

    fn video_item(id: &str) -> MediaItem {
        MediaItem {
            id: id.into(),
            name: format!("{id}.mp4"),
            kind: MediaKind::Video,
            source: format!("{id}.mp4"),
            duration: Some(10.0),
            width: None,
            height: None,
            fps: Some(30.0),
            thumbnail: None,
        }
    }

    fn snapshot(elements: Vec<TimelineElement>, background: BackgroundSettings) -> RenderSnapshot {
        let mut track = Track::new("t1", TrackKind::Media);
        track.elements = elements;
        let mut settings = ProjectSettings::default();
        settings.background = background;
        RenderSnapshot::new(
            Timeline::new().with_track(track),
            MediaLibrary::from(vec![video_item("clip")]),
            settings,
            "/media",
        )
    }

    fn color_background(color: Color) -> BackgroundSettings {
        BackgroundSettings {
            color,
            ..BackgroundSettings::default()
        }
    }

    #[tokio::test]
    async fn test_empty_timeline_fills_background_color() {
        let compositor = compositor(SyntheticBackend::new(64, 36));
        let snap = snapshot(Vec::new(), color_background(Color::rgb(10, 20, 30)));
        let composite = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(composite.complete);
        assert!(!composite.blur_source_missing);
        assert_eq!(composite.frame.pixel(0, 0), Some([10, 20, 30, 255]));
        assert_eq!(composite.frame.pixel(63, 35), Some([10, 20, 30, 255]));
    }

    #[tokio::test]
    async fn test_video_layer_draws_decoded_frame() {
        let compositor = compositor(SyntheticBackend::new(64, 36));
        let snap = snapshot(
            vec![TimelineElement::media("e1", "clip", 0.0, 10.0)],
            BackgroundSettings::default(),
        );
        let source = snap.source_for(snap.media.get("clip").unwrap());
        compositor.media().ensure_loaded(&source).await.unwrap();

        let composite = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(composite.complete);
        let expected = synthetic_frame(&source.source_id, 64, 36, 1.0);
        for (x, y) in [(0, 0), (10, 10), (40, 20), (63, 35)] {
            assert_eq!(composite.frame.pixel(x, y), expected.pixel(x, y));
        }
    }

    #[tokio::test]
    async fn test_trim_start_offsets_video_time() {
        let compositor = compositor(SyntheticBackend::new(64, 36));
        let snap = snapshot(
            vec![TimelineElement::media("e1", "clip", 2.0, 10.0).with_trim(3.0, 0.0)],
            BackgroundSettings::default(),
        );
        let source = snap.source_for(snap.media.get("clip").unwrap());
        compositor.media().ensure_loaded(&source).await.unwrap();

        // Timeline 4.0 is 2s into the element, 5s into the source.
        let composite = compositor.compose(&snap, 4.0, OUTPUT).await.unwrap();
        let expected = synthetic_frame(&source.source_id, 64, 36, 5.0);
        assert_eq!(composite.frame.pixel(10, 10), expected.pixel(10, 10));
        assert_eq!(composite.frame.pixel(50, 30), expected.pixel(50, 30));
    }

    #[tokio::test]
    async fn test_unloaded_source_draws_incomplete_placeholder() {
        let compositor = compositor(SyntheticBackend::new(64, 36));
        let snap = snapshot(
            vec![TimelineElement::media("e1", "clip", 0.0, 10.0)],
            BackgroundSettings::default(),
        );
        let composite = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(!composite.complete);
        assert_eq!(composite.frame.pixel(1, 1), Some(PLACEHOLDER_FILL));
    }

    #[tokio::test]
    async fn test_decode_failure_placeholder_is_deterministic() {
        let snap = snapshot(
            vec![TimelineElement::media("e1", "clip", 0.0, 10.0)],
            BackgroundSettings::default(),
        );
        let source = snap.source_for(snap.media.get("clip").unwrap());
        let compositor =
            compositor(SyntheticBackend::new(64, 36).with_failing_source(source.source_id.clone()));
        compositor.media().ensure_loaded(&source).await.unwrap();

        let first = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        let second = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(!first.complete);
        assert!(!second.complete);
        assert_eq!(first.frame, second.frame);
        assert_eq!(first.frame.pixel(1, 1), Some(PLACEHOLDER_FILL));
    }

    #[tokio::test]
    async fn test_missing_media_reference_is_skipped() {
        let compositor = compositor(SyntheticBackend::new(64, 36));
        let snap = snapshot(
            vec![TimelineElement::media("e1", "ghost", 0.0, 10.0)],
            color_background(Color::rgb(1, 2, 3)),
        );
        let composite = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(composite.complete);
        assert_eq!(composite.frame.pixel(32, 18), Some([1, 2, 3, 255]));
    }

    #[tokio::test]
    async fn test_blur_without_visual_source_is_flagged() {
        let compositor = compositor(SyntheticBackend::new(64, 36));
        let snap = snapshot(Vec::new(), BackgroundSettings::blur(8.0));
        let composite = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(composite.blur_source_missing);
        assert!(composite.complete);
        assert_eq!(composite.frame.pixel(32, 18), Some([0, 0, 0, 255]));
    }

    #[tokio::test]
    async fn test_blur_background_draws_first_visual_element() {
        let compositor = compositor(SyntheticBackend::new(64, 36));
        let mut element = TimelineElement::media("e1", "clip", 0.0, 10.0);
        // Hide the foreground layer so only the background shows.
        element.opacity = 0.0;
        let snap = snapshot(vec![element], BackgroundSettings::blur(4.0));
        let source = snap.source_for(snap.media.get("clip").unwrap());
        compositor.media().ensure_loaded(&source).await.unwrap();

        let composite = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(composite.complete);
        assert!(!composite.blur_source_missing);
        assert_ne!(composite.frame.pixel(5, 30), Some([0, 0, 0, 255]));
    }

    #[tokio::test]
    async fn test_text_background_box_is_centered_with_offset() {
        let compositor = compositor(SyntheticBackend::new(64, 36));
        let mut text = TextElement::new("A");
        text.background_color = Color::rgb(200, 0, 0);
        text.x = 480.0; // a quarter canvas to the right
        let snap = snapshot(
            vec![TimelineElement::text("t", text, 0.0, 10.0)],
            color_background(Color::BLACK),
        );
        let composite = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(composite.complete);
        // Top padding of the box, which is centered at x = 32 + 16.
        assert_eq!(composite.frame.pixel(48, 10), Some([200, 0, 0, 255]));
        assert_eq!(composite.frame.pixel(16, 18), Some([0, 0, 0, 255]));
    }

    #[tokio::test]
    async fn test_unavailable_backend_is_an_error() {
        let compositor = compositor(SyntheticBackend::new(64, 36).unavailable());
        let snap = snapshot(
            vec![TimelineElement::media("e1", "clip", 0.0, 10.0)],
            BackgroundSettings::default(),
        );
        let source_id = snap.source_for(snap.media.get("clip").unwrap()).source_id;

        let first = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(!first.complete);
        for _ in 0..50 {
            if matches!(compositor.media().source_state(&source_id), Some(SourceState::Failed(_))) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap_err();
        assert!(matches!(err, FramewrightError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_oversized_font_is_capped_to_output() {
        let compositor = compositor(SyntheticBackend::new(64, 36));
        let mut text = TextElement::new("Big\nTitle");
        text.font_size = 1.0e9;
        text.background_color = Color::rgb(0, 0, 200);
        let snap = snapshot(
            vec![TimelineElement::text("t", text, 0.0, 10.0)],
            color_background(Color::BLACK),
        );
        let composite = compositor.compose(&snap, 1.0, OUTPUT).await.unwrap();
        assert!(composite.complete);
        assert_eq!((composite.frame.width(), composite.frame.height()), (64, 36));
        // The capped block still covers the canvas center.
        assert_ne!(composite.frame.pixel(32, 18), Some([0, 0, 0, 255]));
    }
}
