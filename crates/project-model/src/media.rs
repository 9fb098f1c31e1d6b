//! Imported media items.
//!
//! The media store belongs to the surrounding application. The engine only
//! looks items up by id and must cope with ids that no longer resolve.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Opaque identifier for media items.
pub type MediaId = String;

/// Kind of imported media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

impl MediaKind {
    /// Whether the media contributes pixels to the composite.
    pub fn is_visual(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Image)
    }
}

/// One imported media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Unique identifier referenced by timeline elements.
    pub id: MediaId,

    /// Display name (usually the file name).
    #[serde(default)]
    pub name: String,

    /// Media kind.
    #[serde(rename = "type")]
    pub kind: MediaKind,

    /// Where the bytes live: a filesystem path, `file://` URL, or other URL.
    pub source: String,

    /// Intrinsic duration in seconds (video and audio).
    #[serde(default)]
    pub duration: Option<f64>,

    /// Intrinsic pixel size, when known at import.
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,

    /// Native frame rate (video).
    #[serde(default)]
    pub fps: Option<f64>,

    /// Precomputed thumbnail locator.
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl MediaItem {
    /// Local filesystem path for the source, resolved against `base_dir`
    /// when relative. Returns `None` for non-file URLs.
    pub fn local_path(&self, base_dir: &Path) -> Option<PathBuf> {
        let raw = if let Some(stripped) = self.source.strip_prefix("file://") {
            stripped
        } else if self.source.contains("://") {
            return None;
        } else {
            self.source.as_str()
        };

        let path = PathBuf::from(raw);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(base_dir.join(path))
        }
    }
}

/// Media items indexed by id.
///
/// Serialized as a plain array; the index is rebuilt on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<MediaItem>", into = "Vec<MediaItem>")]
pub struct MediaLibrary {
    items: Vec<MediaItem>,
    index: HashMap<MediaId, usize>,
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look an item up by id. Missing ids are not an error.
    pub fn get(&self, id: &str) -> Option<&MediaItem> {
        self.index.get(id).and_then(|&i| self.items.get(i))
    }

    /// Insert an item, replacing any existing item with the same id.
    pub fn insert(&mut self, item: MediaItem) {
        match self.index.get(&item.id) {
            Some(&i) => self.items[i] = item,
            None => {
                self.index.insert(item.id.clone(), self.items.len());
                self.items.push(item);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Vec<MediaItem>> for MediaLibrary {
    fn from(items: Vec<MediaItem>) -> Self {
        let mut library = Self::new();
        for item in items {
            library.insert(item);
        }
        library
    }
}

impl From<MediaLibrary> for Vec<MediaItem> {
    fn from(value: MediaLibrary) -> Self {
        value.items
    }
}

impl FromIterator<MediaItem> for MediaLibrary {
    fn from_iter<T: IntoIterator<Item = MediaItem>>(iter: T) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, source: &str) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            name: id.to_string(),
            kind: MediaKind::Video,
            source: source.to_string(),
            duration: Some(10.0),
            width: Some(1920),
            height: Some(1080),
            fps: Some(30.0),
            thumbnail: None,
        }
    }

    #[test]
    fn test_lookup_tolerates_missing_ids() {
        let library: MediaLibrary = vec![item("a", "a.mp4")].into();
        assert!(library.get("a").is_some());
        assert!(library.get("gone").is_none());
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let mut library = MediaLibrary::new();
        library.insert(item("a", "a.mp4"));
        library.insert(item("a", "b.mp4"));
        assert_eq!(library.len(), 1);
        assert_eq!(library.get("a").unwrap().source, "b.mp4");
    }

    #[test]
    fn test_index_survives_serde_roundtrip() {
        let library: MediaLibrary = vec![item("a", "a.mp4"), item("b", "b.mp4")].into();
        let json = serde_json::to_string(&library).unwrap();
        assert!(json.starts_with('['));
        let parsed: MediaLibrary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get("b").unwrap().source, "b.mp4");
    }

    #[test]
    fn test_local_path_resolution() {
        let base = Path::new("/projects/demo");
        assert_eq!(
            item("a", "clips/a.mp4").local_path(base),
            Some(PathBuf::from("/projects/demo/clips/a.mp4"))
        );
        assert_eq!(
            item("a", "file:///media/a.mp4").local_path(base),
            Some(PathBuf::from("/media/a.mp4"))
        );
        assert_eq!(item("a", "blob:https://x/1").local_path(base), None);
    }
}
