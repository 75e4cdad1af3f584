use serde::{Deserialize, Serialize};

use crate::media_kind::MediaKind;
use crate::metadata::{FolderMetadata, MediaMetadata, Visibility};

/// A folder in the composed library tree: the filesystem listing decorated
/// with whatever metadata exists for each path key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderNode {
    /// Path key; empty for the library root.
    pub path: String,
    /// File name of the folder (empty for the root).
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FolderMetadata>,
    pub folders: Vec<FolderNode>,
    pub medias: Vec<MediaNode>,
}

impl FolderNode {
    /// Title if one was authored, file name otherwise.
    pub fn display_name(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.title.as_deref())
            .unwrap_or(&self.name)
    }

    pub fn visibility(&self) -> Visibility {
        self.metadata
            .as_ref()
            .map(|meta| meta.visibility)
            .unwrap_or_default()
    }

    /// Depth-first search for a descendant folder by path key.
    pub fn find_folder(&self, path: &str) -> Option<&FolderNode> {
        if self.path == path {
            return Some(self);
        }
        self.folders
            .iter()
            .find_map(|folder| folder.find_folder(path))
    }

    pub fn media_count(&self) -> usize {
        self.medias.len()
            + self
                .folders
                .iter()
                .map(FolderNode::media_count)
                .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaNode {
    pub path: String,
    pub name: String,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MediaMetadata>,
}

impl MediaNode {
    pub fn display_name(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.title.as_deref())
            .unwrap_or(&self.name)
    }

    pub fn visibility(&self) -> Visibility {
        self.metadata
            .as_ref()
            .map(|meta| meta.visibility)
            .unwrap_or_default()
    }
}
