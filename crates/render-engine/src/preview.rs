//! One render cycle: cache lookup, compose on miss, cache if complete.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use framewright_common::error::FramewrightResult;
use framewright_media_source::Bitmap;
use framewright_project_model::project::CanvasSize;

use crate::compositor::FrameCompositor;
use crate::frame_cache::FrameCache;
use crate::snapshot::RenderSnapshot;

/// A frame ready for display.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub frame: Bitmap,
    pub cache_hit: bool,
    /// False when a layer was a placeholder or a stale frame.
    pub complete: bool,
    pub blur_source_missing: bool,
}

/// Renders preview frames of a fixed output size.
pub struct PreviewRenderer {
    compositor: Arc<FrameCompositor>,
    cache: Arc<FrameCache>,
    output: CanvasSize,
}

impl PreviewRenderer {
    pub fn new(compositor: Arc<FrameCompositor>, cache: Arc<FrameCache>, output: CanvasSize) -> Self {
        Self {
            compositor,
            cache,
            output,
        }
    }

    pub fn compositor(&self) -> &Arc<FrameCompositor> {
        &self.compositor
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    /// Frame for `snapshot` at `time_secs`.
    ///
    /// A hit returns immediately and queues neighbouring frames in the
    /// background. A miss composites; only complete composites are cached.
    pub async fn render(
        &self,
        snapshot: &Arc<RenderSnapshot>,
        time_secs: f64,
    ) -> FramewrightResult<RenderOutcome> {
        if let Some(frame) = self.cache.get_cached_frame(snapshot, time_secs, self.output) {
            let compositor = Arc::clone(&self.compositor);
            let output = self.output;
            self.cache.pre_render_nearby_frames(
                Arc::clone(snapshot),
                time_secs,
                output,
                move |snapshot: Arc<RenderSnapshot>, time: f64| {
                    let compositor = Arc::clone(&compositor);
                    async move { compositor.compose(&snapshot, time, output).await }
                },
            );
            return Ok(RenderOutcome {
                frame,
                cache_hit: true,
                complete: true,
                blur_source_missing: snapshot.blur_source_missing(time_secs),
            });
        }

        let composite = self
            .compositor
            .compose(snapshot, time_secs, self.output)
            .await?;
        if composite.complete {
            self.cache
                .cache_frame(snapshot, time_secs, self.output, composite.frame.clone());
        }
        Ok(RenderOutcome {
            frame: composite.frame,
            cache_hit: false,
            complete: composite.complete,
            blur_source_missing: composite.blur_source_missing,
        })
    }

    /// Render until the frame is complete or `attempts` run out, waiting
    /// `delay` between attempts. For headless single-frame output.
    pub async fn render_settled(
        &self,
        snapshot: &Arc<RenderSnapshot>,
        time_secs: f64,
        attempts: u32,
        delay: Duration,
    ) -> FramewrightResult<RenderOutcome> {
        let mut outcome = self.render(snapshot, time_secs).await?;
        for attempt in 1..attempts.max(1) {
            if outcome.complete {
                break;
            }
            debug!(attempt, time_secs, "Frame incomplete; retrying");
            tokio::time::sleep(delay).await;
            outcome = self.render(snapshot, time_secs).await?;
        }
        Ok(outcome)
    }
}
