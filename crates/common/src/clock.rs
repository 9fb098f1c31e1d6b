//! Frame quantization and the shared playback clock.
//!
//! All frame math takes the project frame rate explicitly. Two quantizers
//! exist: `round` for cache keys and active-element queries, `floor` for
//! the render loop's per-tick sampling.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Nearest frame index for `time_secs` at `fps`.
///
/// Non-finite input, negative time, or a non-positive frame rate yield 0.
pub fn frame_index_round(time_secs: f64, fps: f64) -> u64 {
    quantize(time_secs, fps, f64::round)
}

/// Frame index containing `time_secs` at `fps`.
pub fn frame_index_floor(time_secs: f64, fps: f64) -> u64 {
    quantize(time_secs, fps, f64::floor)
}

fn quantize(time_secs: f64, fps: f64, op: fn(f64) -> f64) -> u64 {
    if !time_secs.is_finite() || !fps.is_finite() || fps <= 0.0 || time_secs <= 0.0 {
        return 0;
    }
    let frame = op(time_secs * fps);
    if frame >= u64::MAX as f64 {
        u64::MAX
    } else {
        frame as u64
    }
}

/// Start time of `frame` at `fps`.
pub fn frame_to_time(frame: u64, fps: f64) -> f64 {
    if !fps.is_finite() || fps <= 0.0 {
        return 0.0;
    }
    frame as f64 / fps
}

/// Snap `time_secs` to the nearest frame boundary.
pub fn quantize_time(time_secs: f64, fps: f64) -> f64 {
    frame_to_time(frame_index_round(time_secs, fps), fps)
}

/// Point-in-time view of the playback state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackStatus {
    pub time_secs: f64,
    pub playing: bool,
    pub volume: f32,
    pub muted: bool,
    /// Incremented on every explicit seek.
    pub seek_generation: u64,
}

#[derive(Debug)]
struct ClockState {
    base_secs: f64,
    anchor: Option<Instant>,
    duration_secs: Option<f64>,
    volume: f32,
    muted: bool,
    seek_generation: u64,
}

/// Shared playback state: playhead, play/pause, volume and mute.
///
/// Time advances against a monotonic clock while playing and stops at the
/// configured duration.
#[derive(Debug)]
pub struct PlaybackClock {
    state: RwLock<ClockState>,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ClockState {
                base_secs: 0.0,
                anchor: None,
                duration_secs: None,
                volume: 1.0,
                muted: false,
                seek_generation: 0,
            }),
        }
    }

    /// Set the end of the timeline. `None` removes the bound.
    pub fn set_duration(&self, duration_secs: Option<f64>) {
        self.state.write().duration_secs = duration_secs.filter(|d| d.is_finite() && *d >= 0.0);
    }

    pub fn play(&self) {
        let mut state = self.state.write();
        if state.anchor.is_some() {
            return;
        }
        if let Some(end) = state.duration_secs {
            if state.base_secs >= end {
                state.base_secs = 0.0;
                state.seek_generation += 1;
            }
        }
        state.anchor = Some(Instant::now());
    }

    pub fn pause(&self) {
        let mut state = self.state.write();
        state.base_secs = Self::position(&state);
        state.anchor = None;
    }

    pub fn toggle(&self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Move the playhead. Play state is preserved.
    pub fn seek(&self, time_secs: f64) {
        let mut state = self.state.write();
        let mut target = if time_secs.is_finite() {
            time_secs.max(0.0)
        } else {
            0.0
        };
        if let Some(end) = state.duration_secs {
            target = target.min(end);
        }
        state.base_secs = target;
        if state.anchor.is_some() {
            state.anchor = Some(Instant::now());
        }
        state.seek_generation += 1;
    }

    /// Current playhead position in seconds.
    pub fn current_time(&self) -> f64 {
        {
            let state = self.state.read();
            let now = Self::position(&state);
            let at_end =
                state.anchor.is_some() && state.duration_secs.is_some_and(|end| now >= end);
            if !at_end {
                return now;
            }
        }
        // Auto-pause once the end is reached.
        let mut state = self.state.write();
        let end = Self::position(&state);
        state.base_secs = end;
        state.anchor = None;
        end
    }

    pub fn is_playing(&self) -> bool {
        self.state.read().anchor.is_some()
    }

    pub fn set_volume(&self, volume: f32) {
        self.state.write().volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn set_muted(&self, muted: bool) {
        self.state.write().muted = muted;
    }

    pub fn status(&self) -> PlaybackStatus {
        let time_secs = self.current_time();
        let state = self.state.read();
        PlaybackStatus {
            time_secs,
            playing: state.anchor.is_some(),
            volume: state.volume,
            muted: state.muted,
            seek_generation: state.seek_generation,
        }
    }

    fn position(state: &ClockState) -> f64 {
        let elapsed = state
            .anchor
            .map(|a| a.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let pos = state.base_secs + elapsed;
        match state.duration_secs {
            Some(end) => pos.min(end),
            None => pos,
        }
    }
}

/// Fixed-rate tick gate measured against a monotonic clock.
#[derive(Debug)]
pub struct RateController {
    interval_ns: u64,
    last_tick: Option<Instant>,
}

impl RateController {
    /// Create a controller ticking `hz` times per second (at least once).
    pub fn new(hz: u32) -> Self {
        Self {
            interval_ns: 1_000_000_000 / u64::from(hz.max(1)),
            last_tick: None,
        }
    }

    /// Whether a full interval has elapsed since the last accepted tick.
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        match self.last_tick {
            Some(last) if now.duration_since(last).as_nanos() < u128::from(self.interval_ns) => {
                false
            }
            _ => {
                self.last_tick = Some(now);
                true
            }
        }
    }

    pub fn interval_ns(&self) -> u64 {
        self.interval_ns
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_and_floor_differ_mid_frame() {
        assert_eq!(frame_index_round(2.5, 30.0), 75);
        assert_eq!(frame_index_floor(2.5, 30.0), 75);
        assert_eq!(frame_index_round(0.05, 30.0), 2);
        assert_eq!(frame_index_floor(0.05, 30.0), 1);
    }

    #[test]
    fn test_degenerate_inputs_quantize_to_zero() {
        assert_eq!(frame_index_round(f64::NAN, 30.0), 0);
        assert_eq!(frame_index_round(-1.0, 30.0), 0);
        assert_eq!(frame_index_floor(1.0, 0.0), 0);
        assert_eq!(frame_to_time(10, -5.0), 0.0);
    }

    #[test]
    fn test_seek_clamps_and_bumps_generation() {
        let clock = PlaybackClock::new();
        clock.set_duration(Some(10.0));
        clock.seek(20.0);
        assert_eq!(clock.current_time(), 10.0);
        clock.seek(-3.0);
        assert_eq!(clock.current_time(), 0.0);
        assert_eq!(clock.status().seek_generation, 2);
    }

    #[test]
    fn test_play_pause_advances_time() {
        let clock = PlaybackClock::new();
        clock.play();
        std::thread::sleep(Duration::from_millis(20));
        clock.pause();
        let t = clock.current_time();
        assert!(t >= 0.015, "time did not advance: {t}");
        assert!(!clock.is_playing());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(clock.current_time(), t);
    }

    #[test]
    fn test_auto_pause_at_end() {
        let clock = PlaybackClock::new();
        clock.set_duration(Some(0.01));
        clock.play();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(clock.current_time(), 0.01);
        assert!(!clock.is_playing());
    }

    #[test]
    fn test_volume_is_clamped() {
        let clock = PlaybackClock::new();
        clock.set_volume(3.0);
        assert_eq!(clock.status().volume, 1.0);
        clock.set_volume(f32::NAN);
        assert_eq!(clock.status().volume, 0.0);
    }

    #[test]
    fn test_rate_controller_interval() {
        let mut rate = RateController::new(60);
        assert_eq!(rate.interval_ns(), 16_666_666);
        assert!(rate.should_tick());
        assert!(!rate.should_tick());
    }

    proptest! {
        #[test]
        fn prop_quantized_time_is_within_half_frame(t in 0.0f64..10_000.0, fps in 1.0f64..240.0) {
            let q = quantize_time(t, fps);
            prop_assert!((q - t).abs() <= 0.5 / fps + 1e-9);
        }

        #[test]
        fn prop_floor_never_exceeds_round(t in 0.0f64..10_000.0, fps in 1.0f64..240.0) {
            prop_assert!(frame_index_floor(t, fps) <= frame_index_round(t, fps));
        }
    }
}
