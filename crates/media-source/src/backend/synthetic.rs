//! Deterministic generated sources for tests and headless runs.
//!
//! Every source decodes to a test pattern whose colors depend only on the
//! source id and the seek time, so composites are reproducible without
//! media files or external tools.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framewright_common::error::{FramewrightError, FramewrightResult};
use framewright_project_model::media::MediaKind;

use super::{DecodeBackend, DecoderHandle, SourceDescriptor, SourceInfo};
use crate::bitmap::Bitmap;

/// Observable activity of a [`SyntheticBackend`].
#[derive(Debug, Default)]
pub struct SyntheticCounters {
    opens: AtomicU64,
    raw_seeks: AtomicU64,
    closes: AtomicU64,
    active_seeks: AtomicUsize,
    max_concurrent_seeks: AtomicUsize,
}

impl SyntheticCounters {
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn raw_seeks(&self) -> u64 {
        self.raw_seeks.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Highest number of seeks observed running at the same time.
    pub fn max_concurrent_seeks(&self) -> usize {
        self.max_concurrent_seeks.load(Ordering::SeqCst)
    }
}

/// Generates frames instead of decoding files.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    width: u32,
    height: u32,
    duration_secs: f64,
    seek_delay: Duration,
    available: bool,
    failing: HashSet<String>,
    counters: Arc<SyntheticCounters>,
}

impl SyntheticBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            duration_secs: 60.0,
            seek_delay: Duration::ZERO,
            available: true,
            failing: HashSet::new(),
            counters: Arc::new(SyntheticCounters::default()),
        }
    }

    /// Simulated decode latency per seek.
    pub fn with_seek_delay(mut self, delay: Duration) -> Self {
        self.seek_delay = delay;
        self
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    /// Every seek on `source_id` fails.
    pub fn with_failing_source(mut self, source_id: impl Into<String>) -> Self {
        self.failing.insert(source_id.into());
        self
    }

    /// Behave as if no decoder exists on the system.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn counters(&self) -> Arc<SyntheticCounters> {
        Arc::clone(&self.counters)
    }
}

/// The frame a synthetic source shows at `time_secs`.
///
/// A solid field tinted by the source id with a light bar whose horizontal
/// position tracks time.
pub fn synthetic_frame(source_id: &str, width: u32, height: u32, time_secs: f64) -> Bitmap {
    let mut hasher = DefaultHasher::new();
    source_id.hash(&mut hasher);
    let seed = hasher.finish();
    let base = [
        (seed & 0x7f) as u8 + 32,
        ((seed >> 8) & 0x7f) as u8 + 32,
        ((seed >> 16) & 0x7f) as u8 + 32,
    ];

    let millis = (time_secs.max(0.0) * 1000.0).round() as u64;
    let shade = (millis / 10 % 128) as u8;
    let bar_width = (width / 16).max(1);
    let bar_x = if width > bar_width {
        (millis % 2000) as u32 * (width - bar_width) / 2000
    } else {
        0
    };

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for _y in 0..height {
        for x in 0..width {
            if x >= bar_x && x < bar_x + bar_width {
                pixels.extend_from_slice(&[240, 240, 240, 255]);
            } else {
                pixels.extend_from_slice(&[base[0], base[1], base[2].saturating_add(shade), 255]);
            }
        }
    }
    Bitmap::from_rgba(width, height, pixels)
        .unwrap_or_else(|_| Bitmap::solid(width, height, [base[0], base[1], base[2], 255]))
}

#[async_trait::async_trait]
impl DecodeBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn open(&self, source: &SourceDescriptor) -> FramewrightResult<Box<dyn DecoderHandle>> {
        if !self.available {
            return Err(FramewrightError::backend_unavailable(
                "synthetic backend disabled",
            ));
        }
        let still = match source.kind {
            MediaKind::Video => false,
            MediaKind::Image => true,
            MediaKind::Audio => {
                return Err(FramewrightError::unsupported("audio sources have no frames"))
            }
        };
        self.counters.opens.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SyntheticDecoder {
            source_id: source.source_id.clone(),
            info: SourceInfo {
                width: self.width,
                height: self.height,
                duration_secs: (!still).then_some(self.duration_secs),
                fps: (!still).then_some(30.0),
                still,
            },
            seek_delay: self.seek_delay,
            failing: self.failing.contains(&source.source_id),
            position: None,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct SyntheticDecoder {
    source_id: String,
    info: SourceInfo,
    seek_delay: Duration,
    failing: bool,
    position: Option<f64>,
    counters: Arc<SyntheticCounters>,
}

/// Decrements the active-seek gauge even if the seek future is dropped.
struct ActiveSeek<'a>(&'a SyntheticCounters);

impl<'a> ActiveSeek<'a> {
    fn enter(counters: &'a SyntheticCounters) -> Self {
        let active = counters.active_seeks.fetch_add(1, Ordering::SeqCst) + 1;
        counters
            .max_concurrent_seeks
            .fetch_max(active, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ActiveSeek<'_> {
    fn drop(&mut self) {
        self.0.active_seeks.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl DecoderHandle for SyntheticDecoder {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn seek(&mut self, time_secs: f64) -> FramewrightResult<()> {
        self.counters.raw_seeks.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveSeek::enter(&self.counters);
        if !self.seek_delay.is_zero() {
            tokio::time::sleep(self.seek_delay).await;
        }
        if self.failing {
            return Err(FramewrightError::decode(format!(
                "synthetic decode failure for {}",
                self.source_id
            )));
        }
        self.position = Some(if self.info.still { 0.0 } else { time_secs });
        Ok(())
    }

    fn current_frame(&self) -> FramewrightResult<Bitmap> {
        let time = self
            .position
            .ok_or_else(|| FramewrightError::decode("no frame decoded yet"))?;
        Ok(synthetic_frame(
            &self.source_id,
            self.info.width,
            self.info.height,
            time,
        ))
    }

    async fn close(&mut self) {
        self.position = None;
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}
