//! # Folio Core
//!
//! Consistency engine for a filesystem-backed media library.
//!
//! Folders and media files live on disk; titles, tags, visibility, custom
//! attributes, explicit ordering and derived thumbnails live in a separate,
//! path-keyed metadata store. This crate keeps the two in step:
//!
//! - [`store`]: the two JSON metadata documents with atomic writes
//! - [`reconcile`]: orphan detection and healing, on demand and from watcher
//!   events
//! - [`mutation`]: folder and media operations that update metadata and
//!   ordering alongside the filesystem
//! - [`thumbnails`]: per-preset, per-format derived images
//! - [`tree`]: the read-side `FolderNode` composition behind a short TTL
//!   cache
//!
//! [`MediaLibrary`] wires them together around a single store, cache and
//! watcher.
//!
//! ```no_run
//! use folio_core::{LibraryOptions, MediaLibrary, TreeView};
//!
//! # async fn demo() -> folio_core::Result<()> {
//! let library =
//!     MediaLibrary::open(LibraryOptions::new("media", "data")).await?;
//! let report = library.ensure_ready().await?;
//! println!("healed {} medias", report.created_medias);
//!
//! library.mutations().rename_folder("gallery", "galerie").await?;
//! let tree = library.tree(TreeView::Public).await?;
//! println!("{} medias visible", tree.media_count());
//! library.close();
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod cache;
pub mod error;
pub mod library;
pub mod mutation;
pub mod paths;
pub mod recent;
pub mod reconcile;
mod scan;
pub mod store;
pub mod tasks;
pub mod thumbnails;
pub mod tree;
pub mod watch;

pub use folio_model as model;

pub use cache::ReadCache;
pub use error::{LibraryError, Result};
pub use library::{LibraryOptions, MediaLibrary};
pub use mutation::MutationService;
pub use recent::RecentMutations;
pub use reconcile::{ReconcileReport, Reconciler};
pub use store::MetadataStore;
pub use tasks::TaskCoalescer;
pub use thumbnails::{RebuildReport, ThumbnailPipeline, ThumbnailStats};
pub use tree::{LibraryTreeBuilder, TreeCache, TreeView};
pub use watch::{LibraryWatcher, WatchConfig, WatchEvent, WatchEventKind};
