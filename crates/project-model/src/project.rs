//! Project settings and snapshot files.
//!
//! A snapshot bundles everything a render reads: settings, the media
//! library and the timeline. The engine treats it as immutable; snapshot
//! files exist so the CLI can load and write sample projects.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::media::MediaLibrary;
use crate::timeline::Timeline;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Output canvas size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }

    /// Bytes of an RGBA8 raster of this size.
    pub fn rgba_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

/// How the area behind media is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundKind {
    #[default]
    Color,
    Blur,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundSettings {
    #[serde(rename = "type", default)]
    pub kind: BackgroundKind,

    #[serde(default)]
    pub color: Color,

    /// Blur radius in canvas pixels.
    #[serde(default = "default_blur_intensity")]
    pub blur_intensity: f32,
}

fn default_blur_intensity() -> f32 {
    8.0
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            kind: BackgroundKind::Color,
            color: Color::BLACK,
            blur_intensity: default_blur_intensity(),
        }
    }
}

impl BackgroundSettings {
    pub fn blur(intensity: f32) -> Self {
        Self {
            kind: BackgroundKind::Blur,
            blur_intensity: intensity,
            ..Self::default()
        }
    }
}

/// Project-level render settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub name: String,

    #[serde(default)]
    pub canvas: CanvasSize,

    /// Project frame rate. The single source of truth for quantization.
    #[serde(default = "default_fps")]
    pub fps: f64,

    #[serde(default)]
    pub background: BackgroundSettings,
}

fn default_fps() -> f64 {
    30.0
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            name: "Untitled Project".to_string(),
            canvas: CanvasSize::default(),
            fps: default_fps(),
            background: BackgroundSettings::default(),
        }
    }
}

/// Serialized project state (`*.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub version: String,

    pub created_at: chrono::DateTime<chrono::Utc>,

    pub modified_at: chrono::DateTime<chrono::Utc>,

    pub settings: ProjectSettings,

    #[serde(default)]
    pub media: MediaLibrary,

    #[serde(default)]
    pub timeline: Timeline,
}

impl ProjectSnapshot {
    /// Empty project with the given name and canvas.
    pub fn new(name: impl Into<String>, width: u32, height: u32, fps: f64) -> Self {
        let now = chrono::Utc::now();
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            created_at: now,
            modified_at: now,
            settings: ProjectSettings {
                name: name.into(),
                canvas: CanvasSize::new(width, height),
                fps,
                background: BackgroundSettings::default(),
            },
            media: MediaLibrary::new(),
            timeline: Timeline::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| ProjectError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Write the snapshot as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProjectError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ProjectError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Human-readable problems. Empty when the snapshot is renderable as-is.
    ///
    /// Elements that fail the trim check are still loadable; they are just
    /// never drawn.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !(self.settings.fps.is_finite() && self.settings.fps > 0.0) {
            errors.push(format!("Invalid frame rate: {}", self.settings.fps));
        }
        if self.settings.canvas.width == 0 || self.settings.canvas.height == 0 {
            errors.push(format!(
                "Invalid canvas size: {}x{}",
                self.settings.canvas.width, self.settings.canvas.height
            ));
        }

        for track in &self.timeline.tracks {
            for element in &track.elements {
                if !element.has_visible_span() {
                    errors.push(format!(
                        "Element '{}' on track '{}' has no visible span (duration {}, trims {} + {})",
                        element.id, track.id, element.duration, element.trim_start, element.trim_end
                    ));
                }
                if let Some(media_id) = element.media_id() {
                    if self.media.get(media_id).is_none() {
                        errors.push(format!(
                            "Element '{}' references missing media '{}'",
                            element.id, media_id
                        ));
                    }
                }
            }
        }

        errors
    }

    /// Local media files that do not exist, resolved against `base_dir`.
    pub fn missing_media_files(&self, base_dir: &Path) -> Vec<PathBuf> {
        self.media
            .iter()
            .filter_map(|item| item.local_path(base_dir))
            .filter(|path| !path.exists())
            .collect()
    }

    pub fn touch(&mut self) {
        self.modified_at = chrono::Utc::now();
    }
}

/// Errors that can occur when working with project snapshots.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid project: {message}")]
    ValidationError { message: String },
}

impl From<ProjectError> for framewright_common::FramewrightError {
    fn from(value: ProjectError) -> Self {
        match value {
            ProjectError::IoError { source, .. } => Self::Io(source),
            other => Self::project(other.to_string()),
        }
    }
}
