//! Immutable render inputs.

use std::path::{Path, PathBuf};

use framewright_common::clock::frame_index_round;
use framewright_media_source::SourceDescriptor;
use framewright_project_model::media::{MediaItem, MediaLibrary};
use framewright_project_model::project::{BackgroundKind, ProjectSettings, ProjectSnapshot};
use framewright_project_model::timeline::{first_blur_source, Timeline};

/// Everything one render reads, shared behind an `Arc` so background
/// pre-renders own their inputs. Edits produce a new snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub timeline: Timeline,
    pub media: MediaLibrary,
    pub settings: ProjectSettings,
    /// Directory relative media paths resolve against.
    pub base_dir: PathBuf,
}

impl RenderSnapshot {
    pub fn new(
        timeline: Timeline,
        media: MediaLibrary,
        settings: ProjectSettings,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            timeline,
            media,
            settings,
            base_dir: base_dir.into(),
        }
    }

    pub fn from_project(project: ProjectSnapshot, base_dir: &Path) -> Self {
        Self::new(project.timeline, project.media, project.settings, base_dir)
    }

    pub fn fps(&self) -> f64 {
        self.settings.fps
    }

    pub fn source_for(&self, item: &MediaItem) -> SourceDescriptor {
        SourceDescriptor::from_media(item, &self.base_dir)
    }

    /// Whether there is anything to render at all. Used to gate controls.
    pub fn has_anything_to_render(&self) -> bool {
        self.timeline.has_any_elements()
    }

    /// Blur background requested at `time_secs` with no video or image
    /// element to draw it from. The UI surfaces this to the user.
    pub fn blur_source_missing(&self, time_secs: f64) -> bool {
        if self.settings.background.kind != BackgroundKind::Blur {
            return false;
        }
        let frame = frame_index_round(time_secs, self.fps());
        let active = self.timeline.active_elements_at_frame(frame, self.fps());
        first_blur_source(&active, &self.media).is_none()
    }
}
