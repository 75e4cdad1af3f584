//! Core data model definitions shared across Folio crates.
//!
//! Everything in here is plain data: path-keyed metadata records, the
//! thumbnail configuration document, and the read-side shapes (tree nodes,
//! orphan reports) handed to collaborators. No type in this crate performs
//! I/O.
#![allow(missing_docs)]

pub use ::chrono;

pub mod attributes;
pub mod error;
pub mod media_kind;
pub mod metadata;
pub mod orphans;
pub mod settings;
pub mod thumbnails;
pub mod tree;

// Intentionally curated re-exports for downstream consumers.
pub use attributes::AttributeValue;
pub use error::{ModelError, Result as ModelResult};
pub use media_kind::MediaKind;
pub use metadata::{
    FolderMetadata, MediaMetadata, MetadataBundle, MetadataKind, Orientation,
    ThumbnailEntry, ThumbnailSource, Visibility,
};
pub use orphans::{OrphanReport, OrphanSets};
pub use settings::LibrarySettings;
pub use thumbnails::{
    BaseDimension, EncodedFormat, OutputFormat, SourceRemovalPolicy,
    ThumbnailConfig, ThumbnailPreset,
};
pub use tree::{FolderNode, MediaNode};
