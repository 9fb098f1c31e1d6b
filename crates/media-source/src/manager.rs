//! The media source manager.
//!
//! One decoder per distinct source, opened lazily on first reference.
//! Frame requests go through a shared decoded-frame cache keyed by
//! `(source id, frame index)`. Misses run a seek task that holds the
//! source's decoder lock, so at most one seek per source is in flight and
//! queued requests re-check the cache before seeking again. Callers wait a
//! bounded time for that task; on timeout they get the last frame the
//! source produced while the seek finishes in the background. A queued
//! seek whose caller gave up is dropped once a newer frame is wanted, so
//! the backlog per source never outgrows one obsolete seek.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use framewright_common::clock::{frame_index_round, frame_to_time};
use framewright_common::config::AppConfig;
use framewright_common::error::{FramewrightError, FramewrightResult};

use crate::backend::{DecodeBackend, DecoderHandle, SourceDescriptor, SourceInfo};
use crate::bitmap::Bitmap;
use crate::cache::BitmapCache;

type FrameKey = (String, u64);

/// Tuning for [`MediaSourceManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Upper bound on waiting for a seek before falling back.
    pub seek_timeout: Duration,
    /// Frames decoded ahead along the scrub direction after each request.
    pub predictive_frames: u32,
    /// Pause before each predictive decode.
    pub predictive_spacing: Duration,
    /// Byte budget of the decoded-frame cache.
    pub cache_budget_bytes: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl ManagerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            seek_timeout: Duration::from_millis(config.decode.seek_timeout_ms),
            predictive_frames: config.decode.predictive_frames,
            predictive_spacing: Duration::from_millis(config.decode.predictive_spacing_ms),
            cache_budget_bytes: config.cache.decoded_frame_budget_bytes(),
        }
    }
}

/// Result of a frame request.
#[derive(Debug, Clone)]
pub enum FrameStatus {
    /// The frame at the requested time.
    Ready(Bitmap),
    /// The seek did not finish in time; this is the source's previous frame.
    Stale(Bitmap),
    /// The source is still opening, or no frame exists yet. Retry later.
    Pending,
    /// The source failed to open. The error was returned once already.
    Failed,
}

impl FrameStatus {
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match self {
            FrameStatus::Ready(b) | FrameStatus::Stale(b) => Some(b),
            FrameStatus::Pending | FrameStatus::Failed => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, FrameStatus::Ready(_))
    }
}

/// Public view of a source's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceState {
    Loading,
    Ready(SourceInfo),
    Failed(String),
}

/// Counters reported by [`MediaSourceManager::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub sources: usize,
    pub raw_seeks: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub predictive_decodes: u64,
    pub seek_timeouts: u64,
    /// Queued seeks dropped because a newer frame was wanted.
    pub superseded_seeks: u64,
    pub cached_frames: usize,
    pub resident_bytes: usize,
    pub budget_bytes: usize,
}

#[derive(Clone)]
enum SlotState {
    Loading,
    Ready(Arc<LoadedSource>),
    Failed(Arc<SourceFailure>),
}

struct SourceFailure {
    message: String,
    unavailable: bool,
    reported: AtomicBool,
}

impl SourceFailure {
    fn to_error(&self) -> FramewrightError {
        if self.unavailable {
            FramewrightError::backend_unavailable(self.message.clone())
        } else {
            FramewrightError::decode(self.message.clone())
        }
    }
}

struct Slot {
    generation: u64,
    state: watch::Sender<SlotState>,
}

struct LoadedSource {
    source_id: String,
    info: SourceInfo,
    handle: tokio::sync::Mutex<Box<dyn DecoderHandle>>,
    last_frame: parking_lot::Mutex<Option<Bitmap>>,
    last_requested: parking_lot::Mutex<Option<f64>>,
    /// Frame of the most recent request.
    wanted: parking_lot::Mutex<Option<u64>>,
    predictive_pending: parking_lot::Mutex<HashSet<u64>>,
    released: AtomicBool,
}

impl LoadedSource {
    fn new(source_id: String, handle: Box<dyn DecoderHandle>) -> Self {
        Self {
            source_id,
            info: handle.info().clone(),
            handle: tokio::sync::Mutex::new(handle),
            last_frame: parking_lot::Mutex::new(None),
            last_requested: parking_lot::Mutex::new(None),
            wanted: parking_lot::Mutex::new(None),
            predictive_pending: parking_lot::Mutex::new(HashSet::new()),
            released: AtomicBool::new(false),
        }
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn wanted(&self) -> Option<u64> {
        *self.wanted.lock()
    }

    fn frame_index(&self, time_secs: f64, fps: f64) -> u64 {
        if self.info.still {
            0
        } else {
            frame_index_round(time_secs, fps)
        }
    }

    fn key(&self, frame: u64) -> FrameKey {
        (self.source_id.clone(), frame)
    }
}

#[derive(Default)]
struct Counters {
    raw_seeks: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    predictive_decodes: AtomicU64,
    seek_timeouts: AtomicU64,
    superseded_seeks: AtomicU64,
}

/// Who asked for a decode.
enum DecodeOrigin {
    /// A caller of `get_frame_at`; the flag is set once it stops waiting.
    Request(Arc<AtomicBool>),
    /// A predictive run started from this frame.
    Predictive(u64),
}

struct ManagerInner {
    backend: Arc<dyn DecodeBackend>,
    config: ManagerConfig,
    slots: parking_lot::Mutex<HashMap<String, Slot>>,
    next_generation: AtomicU64,
    frames: parking_lot::Mutex<BitmapCache<FrameKey>>,
    counters: Counters,
}

/// Owns every decoder and the decoded-frame cache.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct MediaSourceManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for MediaSourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSourceManager")
            .field("backend", &self.inner.backend.name())
            .field("sources", &self.inner.slots.lock().len())
            .finish()
    }
}

impl MediaSourceManager {
    pub fn new(backend: Arc<dyn DecodeBackend>, config: ManagerConfig) -> Self {
        info!(
            backend = backend.name(),
            budget_mb = config.cache_budget_bytes / (1024 * 1024),
            "Media source manager created"
        );
        Self {
            inner: Arc::new(ManagerInner {
                frames: parking_lot::Mutex::new(BitmapCache::new(config.cache_budget_bytes)),
                backend,
                config,
                slots: parking_lot::Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Frame of `source` at `time_secs`, quantized at `fps`.
    ///
    /// Opening and not-yet-decoded states come back as
    /// [`FrameStatus::Pending`]. An open failure is returned as an error the
    /// first time and as [`FrameStatus::Failed`] afterwards.
    pub async fn get_frame_at(
        &self,
        source: &SourceDescriptor,
        time_secs: f64,
        fps: f64,
    ) -> FramewrightResult<FrameStatus> {
        let loaded = match self.slot_state(source) {
            SlotState::Loading => return Ok(FrameStatus::Pending),
            SlotState::Failed(failure) => {
                return if failure.reported.swap(true, Ordering::SeqCst) {
                    Ok(FrameStatus::Failed)
                } else {
                    Err(failure.to_error())
                };
            }
            SlotState::Ready(loaded) => loaded,
        };

        let frame = loaded.frame_index(time_secs, fps);
        *loaded.wanted.lock() = Some(frame);
        let key = loaded.key(frame);
        let cached = self.inner.frames.lock().get(&key);
        if let Some(bitmap) = cached {
            self.inner.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(source = %loaded.source_id, frame, "Decoded frame cache hit");
            self.schedule_predictive(&loaded, time_secs, frame, fps);
            return Ok(FrameStatus::Ready(bitmap));
        }
        self.inner.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let seek_time = if loaded.info.still {
            0.0
        } else {
            frame_to_time(frame, fps)
        };
        let abandoned = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(decode_into_cache(
            Arc::clone(&self.inner),
            Arc::clone(&loaded),
            frame,
            seek_time,
            DecodeOrigin::Request(Arc::clone(&abandoned)),
        ));

        match tokio::time::timeout(self.inner.config.seek_timeout, task).await {
            Ok(Ok(Ok(Some(bitmap)))) => {
                self.schedule_predictive(&loaded, time_secs, frame, fps);
                Ok(FrameStatus::Ready(bitmap))
            }
            Ok(Ok(Ok(None))) => {
                let previous = loaded.last_frame.lock().clone();
                Ok(previous.map_or(FrameStatus::Pending, FrameStatus::Stale))
            }
            Ok(Ok(Err(e))) => {
                warn!(source = %loaded.source_id, frame, error = %e, "Frame decode failed");
                Err(e)
            }
            Ok(Err(join_error)) => Err(FramewrightError::decode(format!(
                "decode task for {} failed: {join_error}",
                loaded.source_id
            ))),
            Err(_) => {
                abandoned.store(true, Ordering::SeqCst);
                self.inner
                    .counters
                    .seek_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                let timeout_ms = self.inner.config.seek_timeout.as_millis() as u64;
                warn!(
                    source = %loaded.source_id,
                    frame,
                    timeout_ms,
                    "Seek timed out; using last decoded frame"
                );
                let previous = loaded.last_frame.lock().clone();
                Ok(previous.map_or(FrameStatus::Pending, FrameStatus::Stale))
            }
        }
    }

    /// Open `source` if needed and wait until it is ready or has failed.
    pub async fn ensure_loaded(&self, source: &SourceDescriptor) -> FramewrightResult<SourceInfo> {
        let state = self.slot_state(source);
        let state = match state {
            SlotState::Loading => {
                let receiver = self
                    .inner
                    .slots
                    .lock()
                    .get(&source.source_id)
                    .map(|slot| slot.state.subscribe());
                let Some(mut receiver) = receiver else {
                    return Err(FramewrightError::decode(format!(
                        "{} was released while opening",
                        source.source_id
                    )));
                };
                let settled = receiver
                    .wait_for(|s| !matches!(s, SlotState::Loading))
                    .await
                    .map(|s| s.clone());
                settled.map_err(|_| {
                    FramewrightError::decode(format!(
                        "{} was released while opening",
                        source.source_id
                    ))
                })?
            }
            other => other,
        };

        match state {
            SlotState::Ready(loaded) => Ok(loaded.info.clone()),
            SlotState::Failed(failure) => {
                failure.reported.store(true, Ordering::SeqCst);
                Err(failure.to_error())
            }
            SlotState::Loading => Err(FramewrightError::decode("source still loading")),
        }
    }

    pub fn source_state(&self, source_id: &str) -> Option<SourceState> {
        let slots = self.inner.slots.lock();
        let slot = slots.get(source_id)?;
        let state = slot.state.borrow().clone();
        Some(match state {
            SlotState::Loading => SourceState::Loading,
            SlotState::Ready(loaded) => SourceState::Ready(loaded.info.clone()),
            SlotState::Failed(failure) => SourceState::Failed(failure.message.clone()),
        })
    }

    /// Close the decoder of `source_id` and drop its cached frames.
    pub async fn release(&self, source_id: &str) {
        let removed = self.inner.slots.lock().remove(source_id);
        let Some(slot) = removed else {
            return;
        };
        let state = slot.state.borrow().clone();
        let loaded = match state {
            SlotState::Ready(loaded) => {
                loaded.released.store(true, Ordering::SeqCst);
                Some(loaded)
            }
            _ => None,
        };
        self.inner.frames.lock().retain(|(id, _)| id != source_id);

        if let Some(loaded) = loaded {
            loaded.handle.lock().await.close().await;
            *loaded.last_frame.lock() = None;
        }
        info!(source = source_id, "Released media source");
    }

    /// Release every source.
    pub async fn release_all(&self) {
        let ids: Vec<String> = self.inner.slots.lock().keys().cloned().collect();
        for id in ids {
            self.release(&id).await;
        }
        self.inner.frames.lock().clear();
    }

    pub fn stats(&self) -> ManagerStats {
        let cache = self.inner.frames.lock().stats();
        let counters = &self.inner.counters;
        ManagerStats {
            sources: self.inner.slots.lock().len(),
            raw_seeks: counters.raw_seeks.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: counters.cache_misses.load(Ordering::Relaxed),
            predictive_decodes: counters.predictive_decodes.load(Ordering::Relaxed),
            seek_timeouts: counters.seek_timeouts.load(Ordering::Relaxed),
            superseded_seeks: counters.superseded_seeks.load(Ordering::Relaxed),
            cached_frames: cache.entries,
            resident_bytes: cache.resident_bytes,
            budget_bytes: cache.budget_bytes,
        }
    }

    /// Whether the frame of `source_id` at `frame` is in the decoded cache.
    pub fn is_cached(&self, source_id: &str, frame: u64) -> bool {
        self.inner
            .frames
            .lock()
            .contains(&(source_id.to_string(), frame))
    }

    /// Current state of the slot, creating it and starting the open on
    /// first reference.
    fn slot_state(&self, source: &SourceDescriptor) -> SlotState {
        let generation = {
            let mut slots = self.inner.slots.lock();
            if let Some(slot) = slots.get(&source.source_id) {
                return slot.state.borrow().clone();
            }
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            let (state, _) = watch::channel(SlotState::Loading);
            slots.insert(source.source_id.clone(), Slot { generation, state });
            generation
        };

        debug!(source = %source.source_id, kind = ?source.kind, "Opening media source");
        tokio::spawn(open_source(
            Arc::clone(&self.inner),
            source.clone(),
            generation,
        ));
        SlotState::Loading
    }

    /// Decode frames after (or before) `frame` in the scrub direction.
    ///
    /// Fire-and-forget; failures are logged at debug level and dropped.
    fn schedule_predictive(&self, loaded: &Arc<LoadedSource>, time_secs: f64, frame: u64, fps: f64) {
        let forward = {
            let mut last = loaded.last_requested.lock();
            let forward = !matches!(*last, Some(previous) if time_secs < previous);
            *last = Some(time_secs);
            forward
        };

        let count = self.inner.config.predictive_frames;
        if count == 0 || loaded.info.still {
            return;
        }
        if !loaded.predictive_pending.lock().insert(frame) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let loaded = Arc::clone(loaded);
        tokio::spawn(async move {
            for step in 1..=u64::from(count) {
                if loaded.is_released() || loaded.wanted() != Some(frame) {
                    break;
                }
                let target = if forward {
                    frame.saturating_add(step)
                } else if let Some(target) = frame.checked_sub(step) {
                    target
                } else {
                    break;
                };
                let target_time = frame_to_time(target, fps);
                if loaded.info.duration_secs.is_some_and(|end| target_time > end) {
                    break;
                }
                if inner.frames.lock().contains(&loaded.key(target)) {
                    continue;
                }

                if inner.config.predictive_spacing.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(inner.config.predictive_spacing).await;
                }

                match decode_into_cache(
                    Arc::clone(&inner),
                    Arc::clone(&loaded),
                    target,
                    target_time,
                    DecodeOrigin::Predictive(frame),
                )
                .await
                {
                    Ok(_) => {}
                    Err(e) => {
                        debug!(source = %loaded.source_id, frame = target, error = %e, "Predictive decode failed");
                    }
                }
            }
            loaded.predictive_pending.lock().remove(&frame);
        });
    }
}

async fn open_source(inner: Arc<ManagerInner>, source: SourceDescriptor, generation: u64) {
    let state = match inner.backend.open(&source).await {
        Ok(handle) => {
            let loaded = LoadedSource::new(source.source_id.clone(), handle);
            info!(
                source = %source.source_id,
                width = loaded.info.width,
                height = loaded.info.height,
                still = loaded.info.still,
                "Media source ready"
            );
            SlotState::Ready(Arc::new(loaded))
        }
        Err(e) => {
            warn!(source = %source.source_id, error = %e, "Failed to open media source");
            SlotState::Failed(Arc::new(SourceFailure {
                message: e.to_string(),
                unavailable: !e.is_transient(),
                reported: AtomicBool::new(false),
            }))
        }
    };

    let orphaned = {
        let slots = inner.slots.lock();
        match slots.get(&source.source_id) {
            Some(slot) if slot.generation == generation => {
                slot.state.send_replace(state);
                None
            }
            _ => Some(state),
        }
    };

    // Released while opening: nothing will ever use this decoder.
    if let Some(SlotState::Ready(loaded)) = orphaned {
        loaded.handle.lock().await.close().await;
    }
}

/// Seek under the source lock and store the result.
///
/// Re-checks the cache after acquiring the lock, since the seek that held
/// it may have produced this exact frame. Returns `None` without seeking
/// when the source was released or the request was superseded.
async fn decode_into_cache(
    inner: Arc<ManagerInner>,
    loaded: Arc<LoadedSource>,
    frame: u64,
    seek_time: f64,
    origin: DecodeOrigin,
) -> FramewrightResult<Option<Bitmap>> {
    let key = loaded.key(frame);
    let mut handle = loaded.handle.lock().await;
    if loaded.is_released() {
        return Ok(None);
    }

    let cached = inner.frames.lock().get(&key);
    if let Some(bitmap) = cached {
        return Ok(Some(bitmap));
    }

    let superseded = match &origin {
        DecodeOrigin::Request(abandoned) => {
            abandoned.load(Ordering::SeqCst) && loaded.wanted() != Some(frame)
        }
        DecodeOrigin::Predictive(start) => loaded.wanted() != Some(*start),
    };
    if superseded {
        inner
            .counters
            .superseded_seeks
            .fetch_add(1, Ordering::Relaxed);
        debug!(source = %loaded.source_id, frame, "Dropping superseded seek");
        return Ok(None);
    }

    let predictive = matches!(origin, DecodeOrigin::Predictive(_));

    inner.counters.raw_seeks.fetch_add(1, Ordering::Relaxed);
    debug!(source = %loaded.source_id, frame, seek_time, predictive, "Seeking");
    handle.seek(seek_time).await?;
    let bitmap = handle.current_frame()?;
    drop(handle);

    // Released mid-seek: the frame belongs to a closed decoder.
    if loaded.is_released() {
        return Ok(None);
    }
    inner.frames.lock().insert(key, bitmap.clone());
    *loaded.last_frame.lock() = Some(bitmap.clone());
    if predictive {
        inner
            .counters
            .predictive_decodes
            .fetch_add(1, Ordering::Relaxed);
    }
    Ok(Some(bitmap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::synthetic::synthetic_frame;
    use crate::backend::SyntheticBackend;
    use framewright_project_model::media::MediaKind;

    fn video(id: &str) -> SourceDescriptor {
        SourceDescriptor {
            source_id: id.into(),
            kind: MediaKind::Video,
            locator: id.into(),
            path: None,
        }
    }

    fn config(seek_timeout_ms: u64, predictive_frames: u32) -> ManagerConfig {
        ManagerConfig {
            seek_timeout: Duration::from_millis(seek_timeout_ms),
            predictive_frames,
            predictive_spacing: Duration::ZERO,
            cache_budget_bytes: 64 * 1024 * 1024,
        }
    }

    fn manager(backend: SyntheticBackend, config: ManagerConfig) -> MediaSourceManager {
        MediaSourceManager::new(Arc::new(backend), config)
    }

    #[tokio::test]
    async fn test_first_reference_is_pending() {
        let manager = manager(SyntheticBackend::new(16, 9), config(1000, 0));
        let source = video("clip");

        let status = manager.get_frame_at(&source, 1.0, 30.0).await.unwrap();
        assert!(matches!(status, FrameStatus::Pending));

        let info = manager.ensure_loaded(&source).await.unwrap();
        assert_eq!((info.width, info.height), (16, 9));
        assert!(matches!(
            manager.source_state("clip"),
            Some(SourceState::Ready(_))
        ));

        let status = manager.get_frame_at(&source, 1.0, 30.0).await.unwrap();
        assert_eq!(
            status.bitmap().cloned(),
            Some(synthetic_frame("clip", 16, 9, 1.0))
        );
    }

    #[tokio::test]
    async fn test_cache_hit_skips_seek() {
        let backend = SyntheticBackend::new(16, 9);
        let counters = backend.counters();
        let manager = manager(backend, config(1000, 0));
        let source = video("clip");
        manager.ensure_loaded(&source).await.unwrap();

        let first = manager.get_frame_at(&source, 2.0, 30.0).await.unwrap();
        // 2.01s rounds to the same frame at 30 fps.
        let second = manager.get_frame_at(&source, 2.01, 30.0).await.unwrap();
        assert!(first.is_ready() && second.is_ready());
        assert_eq!(counters.raw_seeks(), 1);
        let stats = manager.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert!(manager.is_cached("clip", 60));
    }

    #[tokio::test]
    async fn test_quantizes_with_caller_fps() {
        let manager = manager(SyntheticBackend::new(16, 9), config(1000, 0));
        let source = video("clip");
        manager.ensure_loaded(&source).await.unwrap();

        manager.get_frame_at(&source, 1.0, 60.0).await.unwrap();
        assert!(manager.is_cached("clip", 60));
        assert!(!manager.is_cached("clip", 30));
    }

    #[tokio::test]
    async fn test_concurrent_requests_serialize_seeks() {
        let backend = SyntheticBackend::new(16, 9).with_seek_delay(Duration::from_millis(30));
        let counters = backend.counters();
        let manager = manager(backend, config(1000, 0));
        let source = video("clip");
        manager.ensure_loaded(&source).await.unwrap();

        let (a, b) = tokio::join!(
            manager.get_frame_at(&source, 1.0, 30.0),
            manager.get_frame_at(&source, 3.0, 30.0)
        );
        assert!(a.unwrap().is_ready());
        assert!(b.unwrap().is_ready());
        assert_eq!(counters.raw_seeks(), 2);
        assert_eq!(counters.max_concurrent_seeks(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_for_same_frame_seek_once() {
        let backend = SyntheticBackend::new(16, 9).with_seek_delay(Duration::from_millis(30));
        let counters = backend.counters();
        let manager = manager(backend, config(1000, 0));
        let source = video("clip");
        manager.ensure_loaded(&source).await.unwrap();

        let (a, b) = tokio::join!(
            manager.get_frame_at(&source, 1.0, 30.0),
            manager.get_frame_at(&source, 1.0, 30.0)
        );
        assert!(a.unwrap().is_ready());
        assert!(b.unwrap().is_ready());
        assert_eq!(counters.raw_seeks(), 1);
    }

    #[tokio::test]
    async fn test_seek_timeout_falls_back_and_completes_in_background() {
        let backend = SyntheticBackend::new(16, 9).with_seek_delay(Duration::from_millis(150));
        let counters = backend.counters();
        let manager = manager(backend, config(10, 0));
        let source = video("clip");
        manager.ensure_loaded(&source).await.unwrap();

        let status = manager.get_frame_at(&source, 1.0, 30.0).await.unwrap();
        assert!(matches!(status, FrameStatus::Pending));
        assert_eq!(manager.stats().seek_timeouts, 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(manager.is_cached("clip", 30));

        // A later timeout falls back to the last frame the source produced.
        let status = manager.get_frame_at(&source, 4.0, 30.0).await.unwrap();
        match status {
            FrameStatus::Stale(bitmap) => assert_eq!(bitmap, synthetic_frame("clip", 16, 9, 1.0)),
            other => panic!("expected stale frame, got {other:?}"),
        }

        let status = manager.get_frame_at(&source, 1.0, 30.0).await.unwrap();
        assert!(status.is_ready());
        assert!(counters.raw_seeks() >= 2);
    }

    #[tokio::test]
    async fn test_predictive_loading_follows_scrub_direction() {
        let manager = manager(SyntheticBackend::new(16, 9), config(1000, 3));
        let source = video("clip");
        manager.ensure_loaded(&source).await.unwrap();

        manager.get_frame_at(&source, 1.0, 30.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        for frame in 31..=33 {
            assert!(manager.is_cached("clip", frame), "frame {frame} not predicted");
        }
        assert!(!manager.is_cached("clip", 34));

        // Moving backwards predicts earlier frames.
        manager.get_frame_at(&source, 0.5, 30.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        for frame in 12..=14 {
            assert!(manager.is_cached("clip", frame), "frame {frame} not predicted");
        }
        assert!(!manager.is_cached("clip", 16));
        assert_eq!(manager.stats().predictive_decodes, 6);
    }

    #[tokio::test]
    async fn test_decode_failures_are_transient_errors() {
        let backend = SyntheticBackend::new(16, 9).with_failing_source("bad");
        let manager = manager(backend, config(1000, 0));
        let source = video("bad");
        manager.ensure_loaded(&source).await.unwrap();

        let err = manager.get_frame_at(&source, 1.0, 30.0).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unavailable_backend_reports_once() {
        let manager = manager(SyntheticBackend::new(16, 9).unavailable(), config(1000, 0));
        let source = video("clip");

        assert!(matches!(
            manager.get_frame_at(&source, 0.0, 30.0).await.unwrap(),
            FrameStatus::Pending
        ));
        // Wait for the open to settle without consuming the report.
        for _ in 0..50 {
            if matches!(manager.source_state("clip"), Some(SourceState::Failed(_))) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = manager.get_frame_at(&source, 0.0, 30.0).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(
            manager.get_frame_at(&source, 0.0, 30.0).await.unwrap(),
            FrameStatus::Failed
        ));
    }

    #[tokio::test]
    async fn test_still_images_decode_once() {
        let backend = SyntheticBackend::new(8, 8);
        let counters = backend.counters();
        let manager = manager(backend, config(1000, 5));
        let source = SourceDescriptor {
            kind: MediaKind::Image,
            ..video("logo")
        };
        manager.ensure_loaded(&source).await.unwrap();

        for t in [0.0, 1.0, 7.5] {
            assert!(manager.get_frame_at(&source, t, 30.0).await.unwrap().is_ready());
        }
        assert_eq!(counters.raw_seeks(), 1);
        assert_eq!(manager.stats().cached_frames, 1);
    }

    #[tokio::test]
    async fn test_release_closes_decoder_and_purges_frames() {
        let backend = SyntheticBackend::new(16, 9);
        let counters = backend.counters();
        let manager = manager(backend, config(1000, 0));
        let a = video("a");
        let b = video("b");
        manager.ensure_loaded(&a).await.unwrap();
        manager.ensure_loaded(&b).await.unwrap();
        manager.get_frame_at(&a, 1.0, 30.0).await.unwrap();
        manager.get_frame_at(&b, 1.0, 30.0).await.unwrap();

        manager.release("a").await;
        assert!(manager.source_state("a").is_none());
        assert!(!manager.is_cached("a", 30));
        assert!(manager.is_cached("b", 30));
        assert_eq!(counters.closes(), 1);

        manager.release_all().await;
        let stats = manager.stats();
        assert_eq!(stats.sources, 0);
        assert_eq!(stats.cached_frames, 0);
        assert_eq!(stats.resident_bytes, 0);
        assert_eq!(counters.closes(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_seeks_coalesce_to_latest_frame() {
        let backend = SyntheticBackend::new(16, 9).with_seek_delay(Duration::from_millis(100));
        let counters = backend.counters();
        let manager = manager(backend, config(1, 0));
        let source = video("clip");
        manager.ensure_loaded(&source).await.unwrap();

        // Playback outruns the decoder: every request times out.
        for frame in 0..16u64 {
            let status = manager
                .get_frame_at(&source, frame_to_time(frame, 30.0), 30.0)
                .await
                .unwrap();
            assert!(!status.is_ready());
        }

        let last = frame_to_time(15, 30.0);
        let mut ready = false;
        for _ in 0..100 {
            if manager.get_frame_at(&source, last, 30.0).await.unwrap().is_ready() {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(ready, "latest frame never decoded");
        // The seek already running, the latest frame, and at most one more.
        assert!(counters.raw_seeks() <= 3, "seeks: {}", counters.raw_seeks());
        assert!(manager.stats().superseded_seeks >= 13);
        assert!(manager.is_cached("clip", 15));
    }

    #[tokio::test]
    async fn test_release_stops_in_flight_decodes() {
        let backend = SyntheticBackend::new(16, 9).with_seek_delay(Duration::from_millis(20));
        let counters = backend.counters();
        let manager = manager(backend, config(1000, 5));
        let source = video("a");
        manager.ensure_loaded(&source).await.unwrap();

        assert!(manager.get_frame_at(&source, 1.0, 30.0).await.unwrap().is_ready());
        // Predictive decoding is now running in the background.
        manager.release("a").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = manager.stats();
        assert_eq!(stats.sources, 0);
        assert_eq!(stats.cached_frames, 0);
        assert_eq!(stats.resident_bytes, 0);
        assert_eq!(counters.closes(), 1);
        // The first frame plus the predictive seek interrupted by release.
        assert!(counters.raw_seeks() <= 2, "seeks: {}", counters.raw_seeks());
    }
}
