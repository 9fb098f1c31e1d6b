//! Cache of fully composited frames.
//!
//! Keys fold every input that changes the composite into a fingerprint, so
//! edits never need explicit invalidation: a changed timeline simply misses.
//! [`fingerprint`] is the single source of truth for that; anything the
//! compositor reads must be hashed there.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::mem::discriminant;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use framewright_common::clock::{frame_index_round, frame_to_time};
use framewright_common::config::CacheConfig;
use framewright_common::error::FramewrightResult;
use framewright_media_source::{Bitmap, BitmapCache};
use framewright_project_model::color::Color;
use framewright_project_model::media::MediaItem;
use framewright_project_model::project::CanvasSize;
use framewright_project_model::timeline::{ElementKind, TextElement};

use crate::compositor::Composite;
use crate::snapshot::RenderSnapshot;

/// Cache key: frame index plus the fingerprint of everything drawn in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameCacheKey {
    pub frame: u64,
    pub state: u64,
}

impl FrameCacheKey {
    pub fn new(snapshot: &RenderSnapshot, time_secs: f64, output: CanvasSize) -> Self {
        let frame = frame_index_round(time_secs, snapshot.fps());
        Self {
            frame,
            state: fingerprint(snapshot, frame, output),
        }
    }
}

/// Hash of every input that affects the composite of `frame`.
///
/// Covers output and canvas size, fps, background settings, and for each
/// element active at `frame` its track position, timing, trims, transform,
/// content, and the media item it references (or its absence).
pub fn fingerprint(snapshot: &RenderSnapshot, frame: u64, output: CanvasSize) -> u64 {
    let mut hasher = DefaultHasher::new();
    let settings = &snapshot.settings;
    frame.hash(&mut hasher);
    output.hash(&mut hasher);
    settings.canvas.hash(&mut hasher);
    settings.fps.to_bits().hash(&mut hasher);
    settings.background.kind.hash(&mut hasher);
    hash_color(&settings.background.color, &mut hasher);
    settings.background.blur_intensity.to_bits().hash(&mut hasher);
    snapshot.base_dir.hash(&mut hasher);

    let active = snapshot.timeline.active_elements_at_frame(frame, settings.fps);
    active.len().hash(&mut hasher);
    for entry in active {
        let element = entry.element;
        entry.track_index.hash(&mut hasher);
        entry.track.id.hash(&mut hasher);
        element.id.hash(&mut hasher);
        element.name.hash(&mut hasher);
        for value in [
            element.start_time,
            element.duration,
            element.trim_start,
            element.trim_end,
            element.opacity,
            element.rotation,
        ] {
            value.to_bits().hash(&mut hasher);
        }
        match &element.kind {
            ElementKind::Media(media) => {
                0u8.hash(&mut hasher);
                media.media_id.hash(&mut hasher);
                match snapshot.media.get(&media.media_id) {
                    Some(item) => {
                        true.hash(&mut hasher);
                        hash_media_item(item, &mut hasher);
                    }
                    None => false.hash(&mut hasher),
                }
            }
            ElementKind::Text(text) => {
                1u8.hash(&mut hasher);
                hash_text(text, &mut hasher);
            }
        }
    }
    hasher.finish()
}

fn hash_color(color: &Color, hasher: &mut DefaultHasher) {
    color.to_array().hash(hasher);
}

fn hash_media_item(item: &MediaItem, hasher: &mut DefaultHasher) {
    item.id.hash(hasher);
    item.kind.hash(hasher);
    item.source.hash(hasher);
    item.name.hash(hasher);
    item.duration.map(f64::to_bits).hash(hasher);
    item.width.hash(hasher);
    item.height.hash(hasher);
}

fn hash_text(text: &TextElement, hasher: &mut DefaultHasher) {
    text.content.hash(hasher);
    text.font_family.hash(hasher);
    text.font_size.to_bits().hash(hasher);
    discriminant(&text.font_weight).hash(hasher);
    discriminant(&text.font_style).hash(hasher);
    discriminant(&text.text_decoration).hash(hasher);
    discriminant(&text.text_align).hash(hasher);
    hash_color(&text.color, hasher);
    hash_color(&text.background_color, hasher);
    text.x.to_bits().hash(hasher);
    text.y.to_bits().hash(hasher);
}

/// Counters reported by [`FrameCache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameCacheStats {
    pub entries: usize,
    pub resident_bytes: usize,
    pub budget_bytes: usize,
    pub evictions: u64,
    pub hits: u64,
    pub misses: u64,
    pub prerendered: u64,
    pub pending: usize,
}

/// Byte-budgeted LRU of composited frames with background pre-rendering.
pub struct FrameCache {
    frames: Mutex<BitmapCache<FrameCacheKey>>,
    pending: Mutex<HashSet<FrameCacheKey>>,
    ahead: u32,
    behind: u32,
    hits: AtomicU64,
    misses: AtomicU64,
    prerendered: AtomicU64,
}

impl FrameCache {
    pub fn new(budget_bytes: usize, ahead: u32, behind: u32) -> Self {
        Self {
            frames: Mutex::new(BitmapCache::new(budget_bytes)),
            pending: Mutex::new(HashSet::new()),
            ahead,
            behind,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            prerendered: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.frame_cache_budget_bytes(),
            config.prerender_ahead,
            config.prerender_behind,
        )
    }

    /// Cached composite for `snapshot` at `time_secs`, if any.
    pub fn get_cached_frame(
        &self,
        snapshot: &RenderSnapshot,
        time_secs: f64,
        output: CanvasSize,
    ) -> Option<Bitmap> {
        let key = FrameCacheKey::new(snapshot, time_secs, output);
        let cached = self.frames.lock().get(&key);
        match cached {
            Some(frame) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(frame = key.frame, "Frame cache hit");
                Some(frame)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(frame = key.frame, "Frame cache miss");
                None
            }
        }
    }

    /// Store `frame` under the key of `snapshot` at `time_secs`.
    pub fn cache_frame(
        &self,
        snapshot: &RenderSnapshot,
        time_secs: f64,
        output: CanvasSize,
        frame: Bitmap,
    ) -> bool {
        let key = FrameCacheKey::new(snapshot, time_secs, output);
        self.frames.lock().insert(key, frame)
    }

    /// Render uncached neighbours of `time_secs` on a background task.
    ///
    /// Covers `ahead` frames after and `behind` frames before the current
    /// one, skipping frames past the end of the timeline, frames already
    /// cached, and frames another pre-render is working on. Only complete
    /// composites are stored; failures are logged and dropped. Returns
    /// `None` when there is nothing to do.
    pub fn pre_render_nearby_frames<F, Fut>(
        self: &Arc<Self>,
        snapshot: Arc<RenderSnapshot>,
        time_secs: f64,
        output: CanvasSize,
        render: F,
    ) -> Option<JoinHandle<()>>
    where
        F: Fn(Arc<RenderSnapshot>, f64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FramewrightResult<Composite>> + Send + 'static,
    {
        let fps = snapshot.fps();
        let current = frame_index_round(time_secs, fps);
        let last = frame_index_round(snapshot.timeline.total_duration(), fps);

        let after = (1..=self.ahead as u64).map(|d| current.saturating_add(d));
        let before = (1..=self.behind as u64).filter_map(|d| current.checked_sub(d));
        let candidates: Vec<u64> = after.filter(|&f| f < last).chain(before).collect();

        let keys: Vec<FrameCacheKey> = {
            let frames = self.frames.lock();
            let mut pending = self.pending.lock();
            candidates
                .into_iter()
                .map(|frame| FrameCacheKey {
                    frame,
                    state: fingerprint(&snapshot, frame, output),
                })
                .filter(|key| !frames.contains(key) && pending.insert(*key))
                .collect()
        };
        if keys.is_empty() {
            return None;
        }

        debug!(from = current, count = keys.len(), "Pre-rendering nearby frames");
        let cache = Arc::clone(self);
        Some(tokio::spawn(async move {
            for key in keys {
                let time = frame_to_time(key.frame, fps);
                match render(Arc::clone(&snapshot), time).await {
                    Ok(composite) if composite.complete => {
                        cache.frames.lock().insert(key, composite.frame);
                        cache.prerendered.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(_) => debug!(frame = key.frame, "Pre-render incomplete; not cached"),
                    Err(e) => debug!(frame = key.frame, error = %e, "Pre-render failed"),
                }
                cache.pending.lock().remove(&key);
            }
        }))
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn stats(&self) -> FrameCacheStats {
        let cache = self.frames.lock().stats();
        FrameCacheStats {
            entries: cache.entries,
            resident_bytes: cache.resident_bytes,
            budget_bytes: cache.budget_bytes,
            evictions: cache.evictions,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            prerendered: self.prerendered.load(Ordering::Relaxed),
            pending: self.pending.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use framewright_common::error::FramewrightError;

    use framewright_project_model::media::{MediaKind, MediaLibrary};
    use framewright_project_model::project::{BackgroundSettings, ProjectSettings};
    use framewright_project_model::timeline::{Timeline, TimelineElement, Track, TrackKind};

    const OUTPUT: CanvasSize = CanvasSize::new(32, 18);

    fn item(id: &str) -> MediaItem {
        MediaItem {
            id: id.into(),
            name: id.into(),
            kind: MediaKind::Video,
            source: format!("{id}.mp4"),
            duration: Some(10.0),
            width: Some(1920),
            height: Some(1080),
            fps: Some(30.0),
            thumbnail: None,
        }
    }

    fn snapshot_with(element: TimelineElement) -> RenderSnapshot {
        RenderSnapshot::new(
            Timeline::new().with_track(Track::new("t1", TrackKind::Media).with_element(element)),
            MediaLibrary::from(vec![item("m1")]),
            ProjectSettings::default(),
            "/media",
        )
    }

    fn clip() -> TimelineElement {
        TimelineElement::media("e1", "m1", 0.0, 10.0)
    }

    fn composite(complete: bool) -> Composite {
        Composite {
            frame: Bitmap::solid(OUTPUT.width, OUTPUT.height, [1, 2, 3, 255]),
            complete,
            blur_source_missing: false,
        }
    }

    #[test]
    fn test_fingerprint_is_pure() {
        let snap = snapshot_with(clip());
        assert_eq!(fingerprint(&snap, 75, OUTPUT), fingerprint(&snap.clone(), 75, OUTPUT));
    }

    #[test]
    fn test_fingerprint_tracks_render_inputs() {
        let base = snapshot_with(clip());
        let key = fingerprint(&base, 75, OUTPUT);

        let trimmed = snapshot_with(clip().with_trim(0.5, 0.0));
        assert_ne!(fingerprint(&trimmed, 75, OUTPUT), key);

        let mut rotated = clip();
        rotated.rotation = 15.0;
        assert_ne!(fingerprint(&snapshot_with(rotated), 75, OUTPUT), key);

        let mut blurred = base.clone();
        blurred.settings.background = BackgroundSettings::blur(8.0);
        assert_ne!(fingerprint(&blurred, 75, OUTPUT), key);

        let mut replaced = base.clone();
        replaced.media = MediaLibrary::from(vec![MediaItem {
            source: "other.mp4".into(),
            ..item("m1")
        }]);
        assert_ne!(fingerprint(&replaced, 75, OUTPUT), key);

        let mut dangling = base.clone();
        dangling.media = MediaLibrary::new();
        assert_ne!(fingerprint(&dangling, 75, OUTPUT), key);

        assert_ne!(fingerprint(&base, 75, CanvasSize::new(64, 36)), key);
    }

    #[test]
    fn test_inactive_element_edits_do_not_change_fingerprint() {
        let base = snapshot_with(clip());
        let mut edited = base.clone();
        edited.timeline.tracks[0]
            .elements
            .push(TimelineElement::media("later", "m1", 20.0, 5.0));
        assert_eq!(fingerprint(&base, 75, OUTPUT), fingerprint(&edited, 75, OUTPUT));
    }

    #[test]
    fn test_trim_change_misses_cache() {
        let cache = FrameCache::new(16 * 1024 * 1024, 3, 1);
        let snap = snapshot_with(clip());
        cache.cache_frame(&snap, 2.5, OUTPUT, composite(true).frame);
        assert!(cache.get_cached_frame(&snap, 2.5, OUTPUT).is_some());
        // Any time inside the same frame hits.
        assert!(cache.get_cached_frame(&snap, 2.51, OUTPUT).is_some());

        let trimmed = snapshot_with(clip().with_trim(1.0, 0.0));
        assert!(cache.get_cached_frame(&trimmed, 2.5, OUTPUT).is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (2, 1, 1));
    }

    #[test]
    fn test_budget_bounds_resident_frames() {
        let frame_bytes = OUTPUT.rgba_bytes();
        let cache = FrameCache::new(frame_bytes * 2, 0, 0);
        let snap = snapshot_with(clip());
        for frame in 0..5 {
            cache.cache_frame(&snap, frame_to_time(frame, 30.0), OUTPUT, composite(true).frame);
        }
        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert!(stats.resident_bytes <= stats.budget_bytes);
        assert!(cache.get_cached_frame(&snap, frame_to_time(4, 30.0), OUTPUT).is_some());
        assert!(cache.get_cached_frame(&snap, 0.0, OUTPUT).is_none());
    }

    #[tokio::test]
    async fn test_prerender_fills_neighbours_once() {
        let cache = Arc::new(FrameCache::new(16 * 1024 * 1024, 3, 1));
        let snap = Arc::new(snapshot_with(clip()));
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&calls);
        let render = move |_snap: Arc<RenderSnapshot>, _time: f64| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FramewrightError>(composite(true))
            }
        };

        let handle = cache
            .pre_render_nearby_frames(Arc::clone(&snap), 2.5, OUTPUT, render.clone())
            .unwrap();
        // Same neighbourhood while pending: nothing new is queued.
        assert!(cache
            .pre_render_nearby_frames(Arc::clone(&snap), 2.5, OUTPUT, render.clone())
            .is_none());
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        for frame in [74, 76, 77, 78] {
            assert!(cache.get_cached_frame(&snap, frame_to_time(frame, 30.0), OUTPUT).is_some());
        }
        assert_eq!(cache.stats().prerendered, 4);
        assert_eq!(cache.stats().pending, 0);

        // Everything around is cached now.
        assert!(cache
            .pre_render_nearby_frames(Arc::clone(&snap), 2.5, OUTPUT, render)
            .is_none());
    }

    #[tokio::test]
    async fn test_prerender_skips_incomplete_and_failed_frames() {
        let cache = Arc::new(FrameCache::new(16 * 1024 * 1024, 2, 0));
        let snap = Arc::new(snapshot_with(clip()));
        let render = |_snap: Arc<RenderSnapshot>, time: f64| async move {
            if time < 0.05 {
                Ok(composite(false))
            } else {
                Err(FramewrightError::render("boom"))
            }
        };
        cache
            .pre_render_nearby_frames(Arc::clone(&snap), 0.0, OUTPUT, render)
            .unwrap()
            .await
            .unwrap();
        let stats = cache.stats();
        assert_eq!((stats.entries, stats.prerendered, stats.pending), (0, 0, 0));
    }

    #[test]
    fn test_prerender_stops_at_timeline_end() {
        let cache = Arc::new(FrameCache::new(16 * 1024 * 1024, 3, 0));
        let snap = Arc::new(snapshot_with(clip()));
        // Last frame of a 10s clip at 30fps is 299; nothing after it.
        let handle = cache.pre_render_nearby_frames(
            snap,
            frame_to_time(299, 30.0),
            OUTPUT,
            |_snap: Arc<RenderSnapshot>, _time: f64| async { Ok::<_, FramewrightError>(composite(true)) },
        );
        assert!(handle.is_none());
    }
}
