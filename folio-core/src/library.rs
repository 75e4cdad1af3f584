//! The library facade: one store, one cache, one watcher, shared by every
//! component, with an explicit open/close lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use folio_model::{FolderNode, OrphanReport};
use tracing::info;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::error::{LibraryError, Result};
use crate::mutation::MutationService;
use crate::recent::{DEFAULT_SELF_EVENT_WINDOW, RecentMutations};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::MetadataStore;
use crate::thumbnails::{THUMBNAIL_CONFIG_DOCUMENT, ThumbnailPipeline};
use crate::tree::{LibraryTreeBuilder, TreeCache, TreeView};
use crate::watch::{LibraryWatcher, WatchConfig};

pub const DEFAULT_THUMBNAIL_WORKERS: usize = 2;

/// Everything needed to open a library.
#[derive(Debug, Clone)]
pub struct LibraryOptions {
    pub media_root: PathBuf,
    /// Holds the metadata, settings and thumbnail configuration documents.
    pub data_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
    pub watch: WatchConfig,
    pub cache_ttl: Duration,
    pub self_event_window: Duration,
    pub thumbnail_workers: usize,
}

impl LibraryOptions {
    /// Defaults for everything but the two required directories; derived
    /// images go to `<data_dir>/thumbnails`.
    pub fn new(media_root: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            media_root: media_root.into(),
            thumbnails_dir: data_dir.join("thumbnails"),
            data_dir,
            watch: WatchConfig::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            self_event_window: DEFAULT_SELF_EVENT_WINDOW,
            thumbnail_workers: DEFAULT_THUMBNAIL_WORKERS,
        }
    }
}

#[derive(Debug)]
pub struct MediaLibrary {
    media_root: PathBuf,
    store: Arc<MetadataStore>,
    cache: Arc<TreeCache>,
    watcher: Arc<LibraryWatcher>,
    reconciler: Reconciler,
    mutations: MutationService,
    thumbnails: ThumbnailPipeline,
    tree: LibraryTreeBuilder,
}

impl MediaLibrary {
    /// Open the library. Nothing is watched or reconciled until
    /// [`MediaLibrary::ensure_ready`].
    pub async fn open(options: LibraryOptions) -> Result<Self> {
        let media_root = canonical_dir(&options.media_root, false).await?;
        let data_dir = canonical_dir(&options.data_dir, true).await?;
        let thumbnails_dir = canonical_dir(&options.thumbnails_dir, true).await?;
        // Either directory may live inside the media root; neither is
        // library content.
        let excluded = vec![data_dir.clone(), thumbnails_dir.clone()];

        let store = Arc::new(MetadataStore::open(&data_dir).await?);
        let cache = Arc::new(TreeCache::new(options.cache_ttl));
        let recent = Arc::new(RecentMutations::new(options.self_event_window));
        let watcher = Arc::new(LibraryWatcher::new(
            media_root.clone(),
            excluded.clone(),
            options.watch.clone(),
        ));

        let reconciler = Reconciler::new(
            media_root.clone(),
            excluded.clone(),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&recent),
            Arc::clone(&watcher),
        );
        let mutations = MutationService::new(
            media_root.clone(),
            excluded.clone(),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&recent),
        );
        let thumbnails = ThumbnailPipeline::open(
            media_root.clone(),
            thumbnails_dir,
            data_dir.join(THUMBNAIL_CONFIG_DOCUMENT),
            Arc::clone(&store),
            Arc::clone(&cache),
            recent,
            options.thumbnail_workers,
        )
        .await?;
        let tree = LibraryTreeBuilder::new(
            media_root.clone(),
            excluded,
            Arc::clone(&store),
            Arc::clone(&cache),
        );

        info!(media_root = %media_root.display(), "media library opened");
        Ok(Self {
            media_root,
            store,
            cache,
            watcher,
            reconciler,
            mutations,
            thumbnails,
            tree,
        })
    }

    /// Start the watcher and both subscriptions, then reconcile once.
    pub async fn ensure_ready(&self) -> Result<Arc<ReconcileReport>> {
        self.thumbnails.start(&self.watcher);
        self.reconciler.ensure_ready().await
    }

    /// Stop background work and drop in-memory state. The documents on
    /// disk are complete at every point, so nothing needs flushing.
    pub fn close(&self) {
        self.reconciler.stop();
        self.thumbnails.stop();
        self.watcher.stop();
        self.cache.invalidate();
        self.store.close();
        info!(media_root = %self.media_root.display(), "media library closed");
    }

    pub async fn tree(&self, view: TreeView) -> Result<Arc<FolderNode>> {
        self.tree.build(view).await
    }

    pub async fn orphans(&self) -> Result<OrphanReport> {
        self.reconciler.scan_orphans().await
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn mutations(&self) -> &MutationService {
        &self.mutations
    }

    pub fn thumbnails(&self) -> &ThumbnailPipeline {
        &self.thumbnails
    }

    pub fn tree_builder(&self) -> &LibraryTreeBuilder {
        &self.tree
    }

    pub fn watcher(&self) -> &Arc<LibraryWatcher> {
        &self.watcher
    }
}

async fn canonical_dir(path: &Path, create: bool) -> Result<PathBuf> {
    if create {
        tokio::fs::create_dir_all(path).await?;
    }
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(tokio::fs::canonicalize(path).await?),
        Ok(_) => Err(LibraryError::Validation(format!(
            "{} is not a directory",
            path.display()
        ))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(LibraryError::NotFound(format!(
                "directory {} does not exist",
                path.display()
            )))
        }
        Err(err) => Err(err.into()),
    }
}
