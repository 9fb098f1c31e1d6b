//! Tracks, elements, and the active-element queries the compositor runs
//! every frame.
//!
//! An element occupies `[start_time, start_time + effective_duration)` on
//! the timeline. Elements whose trims leave no visible span never appear
//! in query results.

use serde::{Deserialize, Serialize};

use framewright_common::frame_index_round;

use crate::color::Color;
use crate::media::{MediaId, MediaKind, MediaLibrary};

/// Visual category of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[default]
    Media,
    Audio,
    Text,
}

/// One lane of elements. Later tracks draw on top of earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: TrackKind,

    #[serde(default)]
    pub muted: bool,

    #[serde(default)]
    pub elements: Vec<TimelineElement>,
}

impl Track {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            muted: false,
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: TimelineElement) -> Self {
        self.elements.push(element);
        self
    }
}

/// A timed item on a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineElement {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Timeline position in seconds.
    pub start_time: f64,

    /// Intrinsic length in seconds, before trims.
    pub duration: f64,

    #[serde(default)]
    pub trim_start: f64,

    #[serde(default)]
    pub trim_end: f64,

    #[serde(default)]
    pub hidden: bool,

    #[serde(default)]
    pub muted: bool,

    /// 0.0 (invisible) to 1.0 (opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f64,

    /// Clockwise rotation in degrees.
    #[serde(default)]
    pub rotation: f64,

    #[serde(flatten)]
    pub kind: ElementKind,
}

fn default_opacity() -> f64 {
    1.0
}

/// Element payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementKind {
    Media(MediaElement),
    Text(TextElement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaElement {
    pub media_id: MediaId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextDecoration {
    #[default]
    None,
    Underline,
    LineThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

/// Styled text drawn over media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    pub content: String,

    #[serde(default = "default_font_family")]
    pub font_family: String,

    /// Size in canvas pixels.
    #[serde(default = "default_font_size")]
    pub font_size: f64,

    #[serde(default)]
    pub font_weight: FontWeight,

    #[serde(default)]
    pub font_style: FontStyle,

    #[serde(default)]
    pub text_decoration: TextDecoration,

    #[serde(default = "default_text_color")]
    pub color: Color,

    #[serde(default = "default_text_background")]
    pub background_color: Color,

    #[serde(default)]
    pub text_align: TextAlign,

    /// Offset from the canvas center, in canvas pixels.
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

fn default_font_family() -> String {
    "Arial".to_string()
}

fn default_font_size() -> f64 {
    48.0
}

fn default_text_color() -> Color {
    Color::WHITE
}

fn default_text_background() -> Color {
    Color::TRANSPARENT
}

impl TextElement {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            font_family: default_font_family(),
            font_size: default_font_size(),
            font_weight: FontWeight::default(),
            font_style: FontStyle::default(),
            text_decoration: TextDecoration::default(),
            color: default_text_color(),
            background_color: default_text_background(),
            text_align: TextAlign::default(),
            x: 0.0,
            y: 0.0,
        }
    }
}

impl TimelineElement {
    /// Media element with no trims.
    pub fn media(
        id: impl Into<String>,
        media_id: impl Into<String>,
        start_time: f64,
        duration: f64,
    ) -> Self {
        Self::with_kind(
            id.into(),
            start_time,
            duration,
            ElementKind::Media(MediaElement {
                media_id: media_id.into(),
            }),
        )
    }

    /// Text element with no trims.
    pub fn text(id: impl Into<String>, text: TextElement, start_time: f64, duration: f64) -> Self {
        Self::with_kind(id.into(), start_time, duration, ElementKind::Text(text))
    }

    fn with_kind(id: String, start_time: f64, duration: f64, kind: ElementKind) -> Self {
        Self {
            name: id.clone(),
            id,
            start_time,
            duration,
            trim_start: 0.0,
            trim_end: 0.0,
            hidden: false,
            muted: false,
            opacity: 1.0,
            rotation: 0.0,
            kind,
        }
    }

    pub fn with_trim(mut self, trim_start: f64, trim_end: f64) -> Self {
        self.trim_start = trim_start;
        self.trim_end = trim_end;
        self
    }

    /// Visible span in seconds, never negative.
    pub fn effective_duration(&self) -> f64 {
        (self.duration - self.trim_start - self.trim_end).max(0.0)
    }

    /// Whether `trim_start + trim_end < duration` holds with sane values.
    pub fn has_visible_span(&self) -> bool {
        let values = [self.start_time, self.duration, self.trim_start, self.trim_end];
        values.iter().all(|v| v.is_finite())
            && self.trim_start >= 0.0
            && self.trim_end >= 0.0
            && self.trim_start + self.trim_end < self.duration
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.effective_duration()
    }

    /// Continuous-time membership: `start <= t < end`.
    pub fn is_active_at(&self, time: f64) -> bool {
        self.has_visible_span() && time >= self.start_time && time < self.end_time()
    }

    /// Frame-quantized membership, comparing integer frame ranges.
    pub fn is_active_at_frame(&self, frame: u64, fps: f64) -> bool {
        if !self.has_visible_span() {
            return false;
        }
        let (start, end) = self.frame_range(fps);
        frame >= start && frame < end
    }

    /// `[start, end)` frame range at `fps`.
    pub fn frame_range(&self, fps: f64) -> (u64, u64) {
        (
            frame_index_round(self.start_time, fps),
            frame_index_round(self.end_time(), fps),
        )
    }

    /// Position inside the source for timeline time `time`, clamped to
    /// `[0, duration]`.
    pub fn local_time(&self, time: f64) -> f64 {
        let local = self.trim_start + (time - self.start_time);
        if local.is_finite() {
            local.clamp(0.0, self.duration.max(0.0))
        } else {
            self.trim_start.max(0.0)
        }
    }

    pub fn media_id(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Media(m) => Some(&m.media_id),
            ElementKind::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextElement> {
        match &self.kind {
            ElementKind::Text(t) => Some(t),
            ElementKind::Media(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, ElementKind::Text(_))
    }
}

/// An element selected by an active-set query, with its track context.
#[derive(Debug, Clone, Copy)]
pub struct ActiveElement<'a> {
    pub track_index: usize,
    pub track: &'a Track,
    pub element: &'a TimelineElement,
}

/// Ordered list of tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }

    /// Elements visible at continuous time `time`, in draw order.
    pub fn active_elements_at(&self, time: f64) -> Vec<ActiveElement<'_>> {
        self.collect_active(|e| e.is_active_at(time))
    }

    /// Elements visible at `frame`, in draw order. Used by the compositor.
    pub fn active_elements_at_frame(&self, frame: u64, fps: f64) -> Vec<ActiveElement<'_>> {
        self.collect_active(|e| e.is_active_at_frame(frame, fps))
    }

    /// Track order, then every text element after every media element.
    fn collect_active<F>(&self, mut active: F) -> Vec<ActiveElement<'_>>
    where
        F: FnMut(&TimelineElement) -> bool,
    {
        let mut media = Vec::new();
        let mut text = Vec::new();
        for (track_index, track) in self.tracks.iter().enumerate() {
            for element in &track.elements {
                if element.hidden || !active(element) {
                    continue;
                }
                let entry = ActiveElement {
                    track_index,
                    track,
                    element,
                };
                if element.is_text() {
                    text.push(entry);
                } else {
                    media.push(entry);
                }
            }
        }
        media.extend(text);
        media
    }

    /// End of the last visible element, or 0 for an empty timeline.
    pub fn total_duration(&self) -> f64 {
        self.elements()
            .filter(|e| e.has_visible_span())
            .map(TimelineElement::end_time)
            .fold(0.0, f64::max)
    }

    /// Whether anything at all could be rendered.
    pub fn has_any_elements(&self) -> bool {
        self.tracks.iter().any(|t| !t.elements.is_empty())
    }

    pub fn find_element(&self, id: &str) -> Option<(&Track, &TimelineElement)> {
        self.tracks
            .iter()
            .find_map(|t| t.elements.iter().find(|e| e.id == id).map(|e| (t, e)))
    }

    pub fn elements(&self) -> impl Iterator<Item = &TimelineElement> {
        self.tracks.iter().flat_map(|t| t.elements.iter())
    }
}

/// First active element backed by a video or image, used as the blur
/// background source.
pub fn first_blur_source<'a>(
    active: &[ActiveElement<'a>],
    media: &MediaLibrary,
) -> Option<ActiveElement<'a>> {
    active.iter().copied().find(|entry| {
        entry
            .element
            .media_id()
            .and_then(|id| media.get(id))
            .is_some_and(|item| matches!(item.kind, MediaKind::Video | MediaKind::Image))
    })
}
