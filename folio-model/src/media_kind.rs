use std::fmt::{self, Display, Formatter};
use std::path::Path;

/// Extensions recognised as still images.
///
/// Keeping the extension lists in one place means the watcher, the
/// reconciliation walk and the tree builder all agree on what counts as a
/// media file.
pub const IMAGE_FILE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "bmp", "tif", "tiff",
];

/// Extensions recognised as video clips.
pub const VIDEO_FILE_EXTENSIONS: &[&str] =
    &["mp4", "mov", "webm", "mkv", "m4v", "avi"];

/// Image extensions the thumbnail pipeline can decode.
const DECODABLE_IMAGE_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

/// Coarse classification of a media file, derived from its extension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a file name or path. Returns `None` for anything that is not
    /// a media file (including extension-less names).
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_FILE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_FILE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn is_media(path: impl AsRef<Path>) -> bool {
        Self::from_path(path).is_some()
    }
}

/// Whether the thumbnail pipeline should derive variants for this file.
pub fn is_thumbnail_source(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| DECODABLE_IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension_case_insensitively() {
        assert_eq!(MediaKind::from_path("a/B.JPG"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path("clip.Mov"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path("notes.txt"), None);
        assert_eq!(MediaKind::from_path("README"), None);
    }

    #[test]
    fn avif_is_media_but_not_a_thumbnail_source() {
        assert!(MediaKind::is_media("cover.avif"));
        assert!(!is_thumbnail_source("cover.avif"));
        assert!(is_thumbnail_source("cover.jpeg"));
        assert!(!is_thumbnail_source("clip.mp4"));
    }
}
