use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeValue, validate_media_ref};
use crate::error::{ModelError, Result};
use crate::thumbnails::EncodedFormat;

/// Width/height difference (in pixels) under which an image counts as square.
pub const SQUARE_TOLERANCE_PX: u32 = 10;

/// The two entity kinds the metadata store keeps, one JSON document each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    Folder,
    Media,
}

impl Display for MetadataKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MetadataKind::Folder => write!(f, "folder"),
            MetadataKind::Media => write!(f, "media"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Derived from pixel dimensions, never authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
    Square,
}

impl Orientation {
    pub fn classify(width: u32, height: u32) -> Self {
        if width.abs_diff(height) < SQUARE_TOLERANCE_PX {
            Orientation::Square
        } else if width > height {
            Orientation::Horizontal
        } else {
            Orientation::Vertical
        }
    }
}

/// One encoded output of a thumbnail preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailSource {
    pub format: EncodedFormat,
    /// Path relative to the thumbnails root, forward-slash separated.
    pub path: String,
    /// Encoded size in bytes.
    pub size: u64,
}

/// Derived variants for one preset of one media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailEntry {
    /// Path of the preferred variant (first configured format).
    pub default: String,
    pub sources: Vec<ThumbnailSource>,
    pub width: u32,
    pub height: u32,
}

/// Metadata attached to a folder path key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Path key of the media used as the folder's cover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_media: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_order: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_positions: Option<BTreeMap<String, usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_order: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_positions: Option<BTreeMap<String, usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FolderMetadata {
    /// Explicit order of child folders (`MetadataKind::Folder`) or child
    /// medias (`MetadataKind::Media`).
    pub fn order(&self, kind: MetadataKind) -> Option<&[String]> {
        match kind {
            MetadataKind::Folder => self.folder_order.as_deref(),
            MetadataKind::Media => self.media_order.as_deref(),
        }
    }

    /// Replace an order list. Duplicates are dropped (first occurrence
    /// wins) and an empty list removes the field entirely. The matching
    /// positions map is rebuilt.
    pub fn set_order(&mut self, kind: MetadataKind, entries: Vec<String>) {
        let mut seen = HashSet::with_capacity(entries.len());
        let deduped: Vec<String> = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.clone()))
            .collect();
        let (order, positions) = if deduped.is_empty() {
            (None, None)
        } else {
            let positions = positions_for(&deduped);
            (Some(deduped), Some(positions))
        };
        match kind {
            MetadataKind::Folder => {
                self.folder_order = order;
                self.folder_positions = positions;
            }
            MetadataKind::Media => {
                self.media_order = order;
                self.media_positions = positions;
            }
        }
    }

    /// Append `key` to an existing order list. No-op (returns `false`) when
    /// the folder has no explicit order or already lists the key.
    pub fn append_to_order(&mut self, kind: MetadataKind, key: &str) -> bool {
        let Some(current) = self.order(kind) else {
            return false;
        };
        if current.iter().any(|entry| entry == key) {
            return false;
        }
        let mut next = current.to_vec();
        next.push(key.to_string());
        self.set_order(kind, next);
        true
    }

    pub fn remove_from_order(&mut self, kind: MetadataKind, key: &str) -> bool {
        self.retain_in_order(kind, |entry| entry != key)
    }

    /// Keep only the entries for which `keep` returns true. Returns whether
    /// anything was removed.
    pub fn retain_in_order(
        &mut self,
        kind: MetadataKind,
        mut keep: impl FnMut(&str) -> bool,
    ) -> bool {
        let Some(current) = self.order(kind) else {
            return false;
        };
        let next: Vec<String> = current
            .iter()
            .filter(|entry| keep(entry))
            .cloned()
            .collect();
        if next.len() == current.len() {
            return false;
        }
        self.set_order(kind, next);
        true
    }

    /// Rebuild both positions maps from the order lists.
    pub fn sync_positions(&mut self) {
        if let Some(order) = self.folder_order.take() {
            self.set_order(MetadataKind::Folder, order);
        } else {
            self.folder_positions = None;
        }
        if let Some(order) = self.media_order.take() {
            self.set_order(MetadataKind::Media, order);
        } else {
            self.media_positions = None;
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_tags(&self.tags)?;
        validate_attributes(&self.attributes)?;
        if let Some(cover) = &self.cover_media {
            validate_media_ref(cover).map_err(|err| err.within("coverMedia"))?;
        }
        validate_order(
            "folderOrder",
            self.folder_order.as_deref(),
            self.folder_positions.as_ref(),
        )?;
        validate_order(
            "mediaOrder",
            self.media_order.as_deref(),
            self.media_positions.as_ref(),
        )?;
        validate_timestamps(self.created_at, self.updated_at)
    }
}

/// Metadata attached to a media file path key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    /// Keyed by preset name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thumbnails: BTreeMap<String, ThumbnailEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MediaMetadata {
    pub fn validate(&self) -> Result<()> {
        validate_tags(&self.tags)?;
        validate_attributes(&self.attributes)?;
        if self.width == Some(0) || self.height == Some(0) {
            return Err(ModelError::invalid(
                "width",
                "dimensions must be non-zero",
            ));
        }
        for (name, entry) in &self.thumbnails {
            if name.trim().is_empty() {
                return Err(ModelError::invalid(
                    "thumbnails",
                    "preset name cannot be empty",
                ));
            }
            if entry.default.is_empty() || entry.sources.is_empty() {
                return Err(ModelError::invalid(
                    format!("thumbnails.{name}"),
                    "entry needs a default path and at least one source",
                ));
            }
            if entry.width == 0 || entry.height == 0 {
                return Err(ModelError::invalid(
                    format!("thumbnails.{name}"),
                    "output dimensions must be non-zero",
                ));
            }
            if entry.sources.iter().any(|source| source.path.is_empty()) {
                return Err(ModelError::invalid(
                    format!("thumbnails.{name}.sources"),
                    "source path cannot be empty",
                ));
            }
        }
        validate_timestamps(self.created_at, self.updated_at)
    }

    /// Drop everything the thumbnail pipeline derived for this media.
    pub fn clear_derived(&mut self) {
        self.thumbnails.clear();
        self.width = None;
        self.height = None;
        self.orientation = None;
    }
}

/// Both metadata documents, as read or written in one go.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataBundle {
    #[serde(default)]
    pub folders: BTreeMap<String, FolderMetadata>,
    #[serde(default)]
    pub medias: BTreeMap<String, MediaMetadata>,
}

impl MetadataBundle {
    pub fn validate(&self) -> Result<()> {
        for (key, folder) in &self.folders {
            folder
                .validate()
                .map_err(|err| err.within(&format!("folders[{key}]")))?;
        }
        for (key, media) in &self.medias {
            media
                .validate()
                .map_err(|err| err.within(&format!("medias[{key}]")))?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.medias.is_empty()
    }
}

fn positions_for(order: &[String]) -> BTreeMap<String, usize> {
    order
        .iter()
        .enumerate()
        .map(|(index, key)| (key.clone(), index))
        .collect()
}

fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.iter().any(|tag| tag.trim().is_empty()) {
        return Err(ModelError::invalid("tags", "tags cannot be blank"));
    }
    Ok(())
}

fn validate_attributes(
    attributes: &BTreeMap<String, AttributeValue>,
) -> Result<()> {
    for (name, value) in attributes {
        if name.trim().is_empty() {
            return Err(ModelError::invalid(
                "attributes",
                "attribute name cannot be blank",
            ));
        }
        value
            .validate()
            .map_err(|err| err.within(&format!("attributes.{name}")))?;
    }
    Ok(())
}

fn validate_order(
    field: &str,
    order: Option<&[String]>,
    positions: Option<&BTreeMap<String, usize>>,
) -> Result<()> {
    let Some(order) = order else {
        if positions.is_some_and(|p| !p.is_empty()) {
            return Err(ModelError::invalid(
                field,
                "positions present without an order list",
            ));
        }
        return Ok(());
    };
    if order.is_empty() {
        return Err(ModelError::invalid(
            field,
            "an empty order must be omitted",
        ));
    }
    let mut seen = HashSet::with_capacity(order.len());
    for entry in order {
        if entry.is_empty() {
            return Err(ModelError::invalid(field, "entries cannot be empty"));
        }
        if !seen.insert(entry.as_str()) {
            return Err(ModelError::invalid(
                field,
                format!("duplicate entry '{entry}'"),
            ));
        }
    }
    if let Some(positions) = positions
        && *positions != positions_for(order)
    {
        return Err(ModelError::invalid(
            field,
            "positions do not match the order list",
        ));
    }
    Ok(())
}

fn validate_timestamps(
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
) -> Result<()> {
    if let (Some(created), Some(updated)) = (created_at, updated_at)
        && updated < created
    {
        return Err(ModelError::invalid(
            "updatedAt",
            "updatedAt precedes createdAt",
        ));
    }
    Ok(())
}
