//! Display-rate render loop.
//!
//! Ticks once per display refresh, samples the playback position, and
//! renders at most one frame at a time. Frames requested while a render is
//! running collapse into a single pending frame: only the newest survives.
//!
//! ```text
//! Idle ──tick(f)──► Rendering(f) ──done──► Idle
//!                      │    ▲
//!                tick(g)    │ done: start g
//!                      ▼    │
//!             RenderingWithPending(f, g) ──tick(h)──► RenderingWithPending(f, h)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use framewright_common::clock::{frame_index_floor, frame_to_time, PlaybackClock, RateController};
use framewright_media_source::Bitmap;

use crate::preview::PreviewRenderer;
use crate::snapshot::RenderSnapshot;

/// Re-renders of one frame that came back incomplete before giving up until
/// another frame is shown or the snapshot changes.
const MAX_INCOMPLETE_RETRIES: u32 = 120;

/// Render state of one canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Rendering { frame: u64 },
    RenderingWithPending { frame: u64, pending: u64 },
}

/// What a tick asks the caller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Same frame as last tick.
    Skip,
    /// Start rendering this frame now.
    Start(u64),
    /// A render is running; this frame replaces any earlier pending one.
    Queued(u64),
}

/// Coalescing scheduler, independent of any runtime.
#[derive(Debug, Clone)]
pub struct RenderScheduler {
    state: RenderState,
    last_requested: Option<u64>,
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderScheduler {
    pub fn new() -> Self {
        Self {
            state: RenderState::Idle,
            last_requested: None,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn on_tick(&mut self, frame: u64) -> TickAction {
        if self.last_requested == Some(frame) {
            return TickAction::Skip;
        }
        self.last_requested = Some(frame);
        match self.state {
            RenderState::Idle => {
                self.state = RenderState::Rendering { frame };
                TickAction::Start(frame)
            }
            RenderState::Rendering { frame: current }
            | RenderState::RenderingWithPending { frame: current, .. } => {
                self.state = RenderState::RenderingWithPending {
                    frame: current,
                    pending: frame,
                };
                TickAction::Queued(frame)
            }
        }
    }

    /// The running render finished. Returns the pending frame to start next.
    pub fn on_render_complete(&mut self) -> Option<u64> {
        match self.state {
            RenderState::Idle | RenderState::Rendering { .. } => {
                self.state = RenderState::Idle;
                None
            }
            RenderState::RenderingWithPending { pending, .. } => {
                self.state = RenderState::Rendering { frame: pending };
                Some(pending)
            }
        }
    }

    /// Forget the last requested frame so the next tick renders even if
    /// the frame index is unchanged.
    pub fn invalidate(&mut self) {
        self.last_requested = None;
    }
}

/// Source of the playback position sampled every tick.
pub trait PlaybackSource: Send + Sync {
    fn current_time(&self) -> f64;
    fn is_playing(&self) -> bool;
}

impl PlaybackSource for PlaybackClock {
    fn current_time(&self) -> f64 {
        PlaybackClock::current_time(self)
    }

    fn is_playing(&self) -> bool {
        PlaybackClock::is_playing(self)
    }
}

/// A frame shown on the display surface.
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub frame_index: u64,
    pub time_secs: f64,
    pub bitmap: Bitmap,
    pub cache_hit: bool,
    pub complete: bool,
}

/// The visible surface. Replaced atomically, one whole frame at a time.
#[derive(Debug)]
pub struct DisplaySurface {
    sender: watch::Sender<Option<PresentedFrame>>,
}

impl Default for DisplaySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySurface {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    pub fn present(&self, frame: PresentedFrame) {
        self.sender.send_replace(Some(frame));
    }

    pub fn latest(&self) -> Option<PresentedFrame> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PresentedFrame>> {
        self.sender.subscribe()
    }
}

/// Retry budget for incomplete renders, counted per frame.
#[derive(Debug, Default)]
struct IncompleteRetries {
    frame: Option<u64>,
    count: u32,
}

impl IncompleteRetries {
    fn reset(&mut self) {
        self.frame = None;
        self.count = 0;
    }

    /// Record an incomplete render of `frame`; true while it may be retried.
    fn allow(&mut self, frame: u64) -> bool {
        if self.frame != Some(frame) {
            self.frame = Some(frame);
            self.count = 0;
        }
        if self.count < MAX_INCOMPLETE_RETRIES {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

struct RenderDone {
    frame: u64,
    presented: Option<PresentedFrame>,
}

/// Background task driving a [`PreviewRenderer`] from a [`PlaybackSource`].
///
/// Stopped by [`RenderLoop::stop`], [`RenderLoop::shutdown`], or drop.
pub struct RenderLoop {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    display: Arc<DisplaySurface>,
}

impl RenderLoop {
    pub fn spawn(
        renderer: Arc<PreviewRenderer>,
        snapshots: watch::Receiver<Arc<RenderSnapshot>>,
        playback: Arc<dyn PlaybackSource>,
        refresh_hz: u32,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let display = Arc::new(DisplaySurface::new());
        let handle = tokio::spawn(run_loop(
            renderer,
            snapshots,
            playback,
            RateController::new(refresh_hz),
            Arc::clone(&stop),
            Arc::clone(&display),
        ));
        info!(refresh_hz, "Render loop started");
        Self {
            handle: Some(handle),
            stop,
            display,
        }
    }

    pub fn display(&self) -> &Arc<DisplaySurface> {
        &self.display
    }

    /// Ask the loop to exit at its next tick.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop and wait for the loop task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Render loop task failed");
                }
            }
        }
        info!("Render loop stopped");
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_loop(
    renderer: Arc<PreviewRenderer>,
    mut snapshots: watch::Receiver<Arc<RenderSnapshot>>,
    playback: Arc<dyn PlaybackSource>,
    rate: RateController,
    stop: Arc<AtomicBool>,
    display: Arc<DisplaySurface>,
) {
    let mut ticker = tokio::time::interval(rate.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<RenderDone>();
    let mut scheduler = RenderScheduler::new();
    let mut snapshot = Arc::clone(&snapshots.borrow_and_update());
    let mut retry = IncompleteRetries::default();

    let start_render = |frame: u64, snapshot: &Arc<RenderSnapshot>| {
        let renderer = Arc::clone(&renderer);
        let snapshot = Arc::clone(snapshot);
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let time_secs = frame_to_time(frame, snapshot.fps());
            let presented = match renderer.render(&snapshot, time_secs).await {
                Ok(outcome) => Some(PresentedFrame {
                    frame_index: frame,
                    time_secs,
                    bitmap: outcome.frame,
                    cache_hit: outcome.cache_hit,
                    complete: outcome.complete,
                }),
                Err(e) => {
                    warn!(frame, error = %e, "Render failed");
                    None
                }
            };
            // The loop may be gone; the result is simply dropped then.
            let _ = done_tx.send(RenderDone { frame, presented });
        });
    };

    while !stop.load(Ordering::SeqCst) {
        tokio::select! {
            _ = ticker.tick() => {
                if snapshots.has_changed().unwrap_or(false) {
                    snapshot = Arc::clone(&snapshots.borrow_and_update());
                    scheduler.invalidate();
                    retry.reset();
                    debug!("Snapshot changed; re-rendering");
                }
                let frame = frame_index_floor(playback.current_time(), snapshot.fps());
                match scheduler.on_tick(frame) {
                    TickAction::Start(frame) => start_render(frame, &snapshot),
                    TickAction::Queued(frame) => debug!(frame, "Render busy; frame queued"),
                    TickAction::Skip => {}
                }
            }
            Some(done) = done_rx.recv() => {
                if let Some(presented) = done.presented {
                    if presented.complete {
                        retry.reset();
                    } else if retry.allow(done.frame) {
                        // Placeholder on screen: render this frame again next tick.
                        scheduler.invalidate();
                    }
                    display.present(presented);
                }
                debug!(frame = done.frame, "Render complete");
                if let Some(next) = scheduler.on_render_complete() {
                    start_render(next, &snapshot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_skips_unchanged_frame() {
        let mut scheduler = RenderScheduler::new();
        assert_eq!(scheduler.on_tick(5), TickAction::Start(5));
        assert_eq!(scheduler.on_render_complete(), None);
        assert_eq!(scheduler.on_tick(5), TickAction::Skip);
        assert_eq!(scheduler.state(), RenderState::Idle);
    }

    #[test]
    fn test_requests_while_busy_coalesce_to_latest() {
        let mut scheduler = RenderScheduler::new();
        assert_eq!(scheduler.on_tick(9), TickAction::Start(9));
        assert_eq!(scheduler.on_tick(10), TickAction::Queued(10));
        assert_eq!(scheduler.on_tick(11), TickAction::Queued(11));
        assert_eq!(scheduler.on_tick(12), TickAction::Queued(12));
        assert_eq!(
            scheduler.state(),
            RenderState::RenderingWithPending {
                frame: 9,
                pending: 12
            }
        );

        assert_eq!(scheduler.on_render_complete(), Some(12));
        assert_eq!(scheduler.state(), RenderState::Rendering { frame: 12 });
        assert_eq!(scheduler.on_render_complete(), None);
        assert_eq!(scheduler.state(), RenderState::Idle);
    }

    #[test]
    fn test_invalidate_rerenders_same_frame() {
        let mut scheduler = RenderScheduler::new();
        scheduler.on_tick(3);
        scheduler.on_render_complete();
        scheduler.invalidate();
        assert_eq!(scheduler.on_tick(3), TickAction::Start(3));
    }

    #[test]
    fn test_going_back_to_rendering_frame_still_queues() {
        let mut scheduler = RenderScheduler::new();
        scheduler.on_tick(1);
        assert_eq!(scheduler.on_tick(2), TickAction::Queued(2));
        // Back to the frame being rendered: still queued, since the render
        // may predate a snapshot change.
        assert_eq!(scheduler.on_tick(1), TickAction::Queued(1));
        assert_eq!(scheduler.on_render_complete(), Some(1));
    }

    #[test]
    fn test_incomplete_retry_budget_is_per_frame() {
        let mut retry = IncompleteRetries::default();
        for frame in 0..(u64::from(MAX_INCOMPLETE_RETRIES) * 2) {
            assert!(retry.allow(frame));
        }
        for _ in 0..MAX_INCOMPLETE_RETRIES {
            assert!(retry.allow(500));
        }
        assert!(!retry.allow(500));
        assert!(retry.allow(501));
        retry.allow(500);
        retry.reset();
        assert!(retry.allow(500));
    }

    #[test]
    fn test_display_surface_replaces_whole_frames() {
        let display = DisplaySurface::new();
        let mut rx = display.subscribe();
        assert!(display.latest().is_none());

        display.present(PresentedFrame {
            frame_index: 7,
            time_secs: 7.0 / 30.0,
            bitmap: Bitmap::solid(2, 2, [9, 9, 9, 255]),
            cache_hit: false,
            complete: true,
        });
        assert!(rx.has_changed().unwrap());
        let latest = rx.borrow_and_update().clone().unwrap();
        assert_eq!(latest.frame_index, 7);
        assert_eq!(latest.bitmap.pixel(1, 1), Some([9, 9, 9, 255]));
    }
}
