//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Frame and decoded-bitmap cache bounds.
    pub cache: CacheConfig,

    /// Decoder behaviour.
    pub decode: DecodeConfig,

    /// Render loop and audio scheduling.
    pub playback: PlaybackConfig,

    /// Text rendering.
    pub text: TextConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound for composited frames held by the frame cache (MiB).
    pub frame_cache_budget_mb: usize,

    /// Upper bound for decoded source bitmaps held by the media manager (MiB).
    pub decoded_frame_budget_mb: usize,

    /// Frames after the current one to pre-render on a cache hit.
    pub prerender_ahead: u32,

    /// Frames before the current one to pre-render on a cache hit.
    pub prerender_behind: u32,
}

/// Decoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Upper bound on waiting for a seek to signal frame readiness.
    pub seek_timeout_ms: u64,

    /// Number of frames decoded ahead along the scrub direction.
    pub predictive_frames: u32,

    /// Pause between predictive decodes so primary requests can interleave.
    pub predictive_spacing_ms: u64,

    /// ffmpeg executable.
    pub ffmpeg_bin: String,

    /// ffprobe executable.
    pub ffprobe_bin: String,
}

/// Playback loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Display refresh rate driving the render loop (Hz).
    pub refresh_hz: u32,

    /// How far ahead of the audio clock newly scheduled sources start.
    pub audio_schedule_lead_secs: f64,
}

/// Text rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Directories searched for `.ttf` / `.otf` files.
    pub font_dirs: Vec<PathBuf>,

    /// Smallest pixel size text is rasterized at.
    pub min_font_px: f32,

    /// Horizontal padding of the text background box (canvas pixels).
    pub box_padding_x: f32,

    /// Vertical padding of the text background box (canvas pixels).
    pub box_padding_y: f32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "framewright=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            frame_cache_budget_mb: 512,
            decoded_frame_budget_mb: 256,
            prerender_ahead: 3,
            prerender_behind: 1,
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            seek_timeout_ms: 100,
            predictive_frames: 5,
            predictive_spacing_ms: 4,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60,
            audio_schedule_lead_secs: 0.02,
        }
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            font_dirs: default_font_dirs(),
            min_font_px: 12.0,
            box_padding_x: 8.0,
            box_padding_y: 4.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl CacheConfig {
    /// Frame cache budget in bytes.
    pub fn frame_cache_budget_bytes(&self) -> usize {
        self.frame_cache_budget_mb.saturating_mul(1024 * 1024)
    }

    /// Decoded bitmap budget in bytes.
    pub fn decoded_frame_budget_bytes(&self) -> usize {
        self.decoded_frame_budget_mb.saturating_mul(1024 * 1024)
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    base.join("framewright").join("config.json")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// Font directories searched when the config does not name any.
fn default_font_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/share/fonts"),
        PathBuf::from("/usr/local/share/fonts"),
        PathBuf::from("/System/Library/Fonts"),
        PathBuf::from("/Library/Fonts"),
        PathBuf::from("C:\\Windows\\Fonts"),
    ];
    dirs.push(home_dir().join(".local").join("share").join("fonts"));
    dirs
}
