//! Gain-scheduled audio playback.
//!
//! Decides which audio clips should sound at the playback position and
//! tells an [`AudioSink`] when to start and stop them. Every play or seek
//! stops all voices before scheduling anew, so clips never overlap.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use framewright_common::clock::PlaybackStatus;
use framewright_project_model::media::MediaKind;

use crate::snapshot::RenderSnapshot;

/// One clip to play from the sink's clock.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioVoice {
    pub element_id: String,
    pub media_id: String,
    pub locator: String,
    /// Position inside the audio file to start from.
    pub offset_secs: f64,
    /// How long to play before the clip ends on the timeline.
    pub duration_secs: f64,
    /// Delay before the voice starts, relative to now.
    pub start_delay_secs: f64,
}

/// Output device. Decoding and mixing are the sink's business.
pub trait AudioSink: Send + Sync {
    fn set_gain(&self, gain: f32);
    fn start(&self, voice: &AudioVoice);
    fn stop_all(&self);
}

/// Logs scheduling decisions and keeps the active voices. Used by the CLI
/// and tests.
#[derive(Debug, Default)]
pub struct TracingAudioSink {
    voices: Mutex<Vec<AudioVoice>>,
    gain: Mutex<f32>,
}

impl TracingAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_voices(&self) -> Vec<AudioVoice> {
        self.voices.lock().clone()
    }

    pub fn gain(&self) -> f32 {
        *self.gain.lock()
    }
}

impl AudioSink for TracingAudioSink {
    fn set_gain(&self, gain: f32) {
        debug!(gain, "Audio gain");
        *self.gain.lock() = gain;
    }

    fn start(&self, voice: &AudioVoice) {
        info!(
            element = %voice.element_id,
            media = %voice.media_id,
            offset_secs = voice.offset_secs,
            duration_secs = voice.duration_secs,
            "Audio voice started"
        );
        self.voices.lock().push(voice.clone());
    }

    fn stop_all(&self) {
        let stopped = std::mem::take(&mut *self.voices.lock());
        if !stopped.is_empty() {
            debug!(count = stopped.len(), "Audio voices stopped");
        }
    }
}

/// Gain for the playback status: silent when muted, else volume in `[0, 1]`.
pub fn output_gain(status: &PlaybackStatus) -> f32 {
    if status.muted || !status.volume.is_finite() {
        0.0
    } else {
        status.volume.clamp(0.0, 1.0)
    }
}

/// Audio clips audible at `time_secs`, starting `lead_secs` from now.
///
/// Audible means: a media element on an unmuted track, itself unmuted,
/// referencing an audio item, with a visible span containing `time_secs`.
pub fn audible_voices(snapshot: &RenderSnapshot, time_secs: f64, lead_secs: f64) -> Vec<AudioVoice> {
    let mut voices = Vec::new();
    for track in &snapshot.timeline.tracks {
        if track.muted {
            continue;
        }
        for element in &track.elements {
            if element.muted || !element.is_active_at(time_secs) {
                continue;
            }
            let Some(item) = element.media_id().and_then(|id| snapshot.media.get(id)) else {
                continue;
            };
            if item.kind != MediaKind::Audio {
                continue;
            }
            let remaining = element.end_time() - time_secs;
            if remaining <= 0.0 {
                continue;
            }
            voices.push(AudioVoice {
                element_id: element.id.clone(),
                media_id: item.id.clone(),
                locator: item.source.clone(),
                offset_secs: element.trim_start + (time_secs - element.start_time),
                duration_secs: remaining,
                start_delay_secs: lead_secs,
            });
        }
    }
    voices
}

/// Reacts to playback changes by restarting the sink's voices.
pub struct AudioScheduler {
    sink: Arc<dyn AudioSink>,
    lead_secs: f64,
    playing: bool,
    seek_generation: Option<u64>,
    gain: Option<f32>,
    stale: bool,
}

impl AudioScheduler {
    pub fn new(sink: Arc<dyn AudioSink>, lead_secs: f64) -> Self {
        Self {
            sink,
            lead_secs: lead_secs.max(0.0),
            playing: false,
            seek_generation: None,
            gain: None,
            stale: false,
        }
    }

    /// Reschedule on the next update even without a play or seek, e.g.
    /// after the timeline changed.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Apply `status`. Returns the voices started, if any were scheduled.
    pub fn update(&mut self, status: &PlaybackStatus, snapshot: &RenderSnapshot) -> Vec<AudioVoice> {
        let gain = output_gain(status);
        if self.gain != Some(gain) {
            self.sink.set_gain(gain);
            self.gain = Some(gain);
        }

        let started = status.playing && !self.playing;
        let sought = self.seek_generation != Some(status.seek_generation);
        let mut scheduled = Vec::new();

        if status.playing && (started || sought || self.stale) {
            self.sink.stop_all();
            scheduled = audible_voices(snapshot, status.time_secs, self.lead_secs);
            for voice in &scheduled {
                self.sink.start(voice);
            }
            debug!(
                time_secs = status.time_secs,
                voices = scheduled.len(),
                "Audio scheduled"
            );
        } else if !status.playing && self.playing {
            self.sink.stop_all();
        }

        self.playing = status.playing;
        self.seek_generation = Some(status.seek_generation);
        self.stale = false;
        scheduled
    }
}
