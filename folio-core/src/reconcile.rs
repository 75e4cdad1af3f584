//! Reconciliation engine: converges the metadata store back to what is on
//! disk, both on demand and in reaction to watcher events.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use folio_model::{
    FolderMetadata, MediaKind, MediaMetadata, MetadataBundle, MetadataKind,
    OrphanReport, Visibility,
};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{debug, info, warn};

use crate::error::{LibraryError, Result};
use crate::paths;
use crate::recent::RecentMutations;
use crate::scan::{DiskTree, walk_library};
use crate::store::{
    MetadataStore, Record, append_to_parent, prune_parent, remove_subtree,
};
use crate::tasks::TaskCoalescer;
use crate::tree::TreeCache;
use crate::watch::{LibraryWatcher, WatchEvent, WatchEventKind};

/// Outcome of one reconcile pass: the drift that was found and what was
/// done about it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    #[serde(flatten)]
    pub orphans: OrphanReport,
    pub removed_folders: usize,
    pub removed_medias: usize,
    pub created_folders: usize,
    pub created_medias: usize,
    /// Order entries dropped because the child no longer exists.
    pub order_entries_pruned: usize,
    /// Healed medias appended to an existing parent order.
    pub order_entries_appended: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.removed_folders
            + self.removed_medias
            + self.created_folders
            + self.created_medias
            + self.order_entries_pruned
            + self.order_entries_appended
            > 0
    }
}

type SharedReconcile = Shared<
    BoxFuture<
        'static,
        std::result::Result<Arc<ReconcileReport>, Arc<LibraryError>>,
    >,
>;

#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

struct Inner {
    media_root: PathBuf,
    excluded: Vec<PathBuf>,
    store: Arc<MetadataStore>,
    cache: Arc<TreeCache>,
    recent: Arc<RecentMutations>,
    watcher: Arc<LibraryWatcher>,
    tasks: TaskCoalescer,
    walks: AtomicU64,
    next_pass: AtomicU64,
    in_flight: Mutex<Option<(u64, SharedReconcile)>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = match self.inner.in_flight.try_lock() {
            Some(slot) => format!("{}", slot.is_some()),
            None => "<locked>".to_string(),
        };
        f.debug_struct("Reconciler")
            .field("media_root", &self.inner.media_root)
            .field("walks", &self.walk_count())
            .field("reconcile_in_flight", &pending)
            .field("event_tasks", &self.inner.tasks.in_flight())
            .finish()
    }
}

impl Reconciler {
    pub fn new(
        media_root: PathBuf,
        excluded: Vec<PathBuf>,
        store: Arc<MetadataStore>,
        cache: Arc<TreeCache>,
        recent: Arc<RecentMutations>,
        watcher: Arc<LibraryWatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                media_root,
                excluded,
                store,
                cache,
                recent,
                watcher,
                // Same-key events coalesce; different keys may run together.
                tasks: TaskCoalescer::new("reconcile", 4),
                walks: AtomicU64::new(0),
                next_pass: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Number of full filesystem walks performed so far.
    pub fn walk_count(&self) -> u64 {
        self.inner.walks.load(Ordering::Relaxed)
    }

    /// Start listening to the watcher, start the watcher, then reconcile
    /// once. Safe to call repeatedly.
    pub async fn ensure_ready(&self) -> Result<Arc<ReconcileReport>> {
        // Subscribe before the watcher starts so no early event is missed.
        self.start();
        self.inner.watcher.start().await?;
        self.reconcile().await
    }

    /// Run a full reconcile pass. While a pass is running, further callers
    /// join it and receive the very same report.
    pub async fn reconcile(&self) -> Result<Arc<ReconcileReport>> {
        let pass = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some((_, pass)) => {
                    debug!("reconcile already in flight, joining it");
                    pass.clone()
                }
                None => {
                    let id =
                        self.inner.next_pass.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let task = tokio::spawn(async move {
                        let result = inner
                            .run_reconcile()
                            .await
                            .map(Arc::new)
                            .map_err(Arc::new);
                        inner.finish_pass(id);
                        result
                    });
                    let pass = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(err) => Err(Arc::new(LibraryError::from(err))),
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, pass.clone()));
                    pass
                }
            }
        };
        pass.await.map_err(LibraryError::Shared)
    }

    /// Compute the orphan sets without changing anything.
    pub async fn scan_orphans(&self) -> Result<OrphanReport> {
        let disk = self.inner.walk().await?;
        let bundle = self.inner.store.read_all().await?;
        Ok(find_orphans(&bundle, &disk))
    }

    /// Subscribe to the watcher. Idempotent.
    pub fn start(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            return;
        }
        let mut events = self.inner.watcher.subscribe();
        let reconciler = self.clone();
        *listener = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        reconciler.handle_event(event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "reconciler fell behind the watcher");
                        let rescan = WatchEvent::new(WatchEventKind::Rescan, "");
                        reconciler.handle_event(rescan);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
    }

    /// Queue the handler for one watcher event. Returns `None` when the
    /// event is ignored or coalesced into a task already in flight.
    pub fn handle_event(&self, event: WatchEvent) -> Option<JoinHandle<()>> {
        if paths::is_hidden(&event.path) {
            debug!(path = %event.path, "ignoring hidden path");
            return None;
        }
        if event.kind != WatchEventKind::Rescan {
            if event.path.is_empty() {
                return None;
            }
            let caused_by_us = match event.kind {
                // A folder we created may still receive external files.
                WatchEventKind::Add
                | WatchEventKind::Change
                | WatchEventKind::AddDir => {
                    self.inner.recent.contains(&event.path)
                }
                _ => self.inner.recent.covers(&event.path),
            };
            if caused_by_us {
                debug!(
                    event = %event.kind,
                    path = %event.path,
                    "ignoring event caused by a library mutation"
                );
                return None;
            }
        }

        let reconciler = self.clone();
        self.inner.tasks.spawn(event.task_key(), async move {
            if let Err(err) = reconciler.apply_event(&event).await {
                warn!(
                    event = %event.kind,
                    path = %event.path,
                    "failed to reconcile watcher event: {err}"
                );
            }
        })
    }

    async fn apply_event(&self, event: &WatchEvent) -> Result<()> {
        let inner = &self.inner;
        let key = event.path.as_str();
        match event.kind {
            WatchEventKind::Add => inner.media_added(key).await,
            // Content changes only matter to the thumbnail pipeline.
            WatchEventKind::Change => Ok(()),
            WatchEventKind::Unlink => inner.media_removed(key).await,
            WatchEventKind::AddDir => {
                inner.folder_added(key).await?;
                self.reconcile().await.map(drop)
            }
            WatchEventKind::UnlinkDir => {
                inner.folder_removed(key).await?;
                self.reconcile().await.map(drop)
            }
            WatchEventKind::Rescan => self.reconcile().await.map(drop),
        }
    }
}

impl Inner {
    fn finish_pass(&self, id: u64) {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            slot.take();
        }
    }

    async fn walk(&self) -> Result<DiskTree> {
        let root = self.media_root.clone();
        let excluded = self.excluded.clone();
        self.walks.fetch_add(1, Ordering::Relaxed);
        spawn_blocking(move || walk_library(&root, &root, &excluded)).await?
    }

    async fn run_reconcile(&self) -> Result<ReconcileReport> {
        let disk = self.walk().await?;
        let visibility = self.default_visibility().await;
        let report = self
            .store
            .update(|bundle| Ok(heal(bundle, &disk, visibility)))
            .await?;
        if report.changed() {
            self.cache.invalidate();
        }
        info!(
            removed_folders = report.removed_folders,
            removed_medias = report.removed_medias,
            created_folders = report.created_folders,
            created_medias = report.created_medias,
            order_entries_pruned = report.order_entries_pruned,
            order_entries_appended = report.order_entries_appended,
            "reconcile finished"
        );
        Ok(report)
    }

    async fn default_visibility(&self) -> Visibility {
        match self.store.read_settings().await {
            Ok(settings) => settings.default_visibility,
            Err(err) => {
                warn!("failed to read library settings: {err}");
                Visibility::default()
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = paths::resolve(&self.media_root, key)?;
        Ok(tokio::fs::try_exists(path).await.unwrap_or(false))
    }

    async fn media_added(&self, key: &str) -> Result<()> {
        if !MediaKind::is_media(key) || !self.exists(key).await? {
            return Ok(());
        }
        let visibility = self.default_visibility().await;
        let created = self
            .store
            .update(|bundle| {
                if bundle.medias.contains_key(key) {
                    return Ok(false);
                }
                let mut media = MediaMetadata {
                    visibility,
                    ..MediaMetadata::default()
                };
                media.touch();
                bundle.medias.insert(key.to_string(), media);
                append_to_parent(bundle, key, MetadataKind::Media);
                Ok(true)
            })
            .await?;
        if created {
            self.cache.invalidate();
            debug!(path = %key, "created metadata for new media");
        }
        Ok(())
    }

    async fn media_removed(&self, key: &str) -> Result<()> {
        if self.exists(key).await? {
            return Ok(());
        }
        let removed = self
            .store
            .update(|bundle| {
                let removed = bundle.medias.remove(key).is_some();
                let pruned = prune_parent(bundle, key, MetadataKind::Media);
                Ok(removed || pruned)
            })
            .await?;
        if removed {
            self.cache.invalidate();
            debug!(path = %key, "removed metadata for deleted media");
        }
        Ok(())
    }

    async fn folder_added(&self, key: &str) -> Result<()> {
        if !self.exists(key).await? {
            return Ok(());
        }
        let visibility = self.default_visibility().await;
        let created = self
            .store
            .update(|bundle| {
                if bundle.folders.contains_key(key) {
                    return Ok(false);
                }
                let mut folder = FolderMetadata {
                    visibility,
                    ..FolderMetadata::default()
                };
                folder.touch();
                bundle.folders.insert(key.to_string(), folder);
                Ok(true)
            })
            .await?;
        if created {
            self.cache.invalidate();
        }
        Ok(())
    }

    async fn folder_removed(&self, key: &str) -> Result<()> {
        if self.exists(key).await? {
            return Ok(());
        }
        let removed = self
            .store
            .update(|bundle| {
                let removed = remove_subtree(bundle, key);
                let pruned = prune_parent(bundle, key, MetadataKind::Folder);
                Ok(removed > 0 || pruned)
            })
            .await?;
        if removed {
            self.cache.invalidate();
            debug!(path = %key, "removed metadata for deleted folder");
        }
        Ok(())
    }
}

/// The four disjoint drift sets. The root record (`""`) always has a
/// directory and is never an orphan.
pub(crate) fn find_orphans(
    bundle: &MetadataBundle,
    disk: &DiskTree,
) -> OrphanReport {
    let mut report = OrphanReport::default();
    report.metadata_without_files.folders = bundle
        .folders
        .keys()
        .filter(|key| !key.is_empty() && !disk.folders.contains(*key))
        .cloned()
        .collect();
    report.metadata_without_files.medias = bundle
        .medias
        .keys()
        .filter(|key| !disk.medias.contains(*key))
        .cloned()
        .collect();
    report.files_without_metadata.folders = disk
        .folders
        .iter()
        .filter(|key| !bundle.folders.contains_key(*key))
        .cloned()
        .collect();
    report.files_without_metadata.medias = disk
        .medias
        .iter()
        .filter(|key| !bundle.medias.contains_key(*key))
        .cloned()
        .collect();
    report
}

/// Bring `bundle` in line with `disk` and describe what changed.
fn heal(
    bundle: &mut MetadataBundle,
    disk: &DiskTree,
    visibility: Visibility,
) -> ReconcileReport {
    let orphans = find_orphans(bundle, disk);
    let mut report = ReconcileReport::default();

    for key in &orphans.metadata_without_files.folders {
        if bundle.folders.remove(key).is_some() {
            report.removed_folders += 1;
        }
    }
    for key in &orphans.metadata_without_files.medias {
        if bundle.medias.remove(key).is_some() {
            report.removed_medias += 1;
        }
    }

    for (key, folder) in bundle.folders.iter_mut() {
        let before = order_len(folder);
        folder.retain_in_order(MetadataKind::Folder, |entry| {
            disk.folders.contains(entry) && paths::parent_of(entry) == key.as_str()
        });
        folder.retain_in_order(MetadataKind::Media, |entry| {
            disk.medias.contains(entry) && paths::parent_of(entry) == key.as_str()
        });
        let pruned = before - order_len(folder);
        if pruned > 0 {
            report.order_entries_pruned += pruned;
            folder.touch();
        }
    }

    for key in &orphans.files_without_metadata.folders {
        let mut folder = FolderMetadata {
            visibility,
            ..FolderMetadata::default()
        };
        folder.touch();
        bundle.folders.insert(key.clone(), folder);
        report.created_folders += 1;
    }
    for key in &orphans.files_without_metadata.medias {
        let mut media = MediaMetadata {
            visibility,
            ..MediaMetadata::default()
        };
        media.touch();
        bundle.medias.insert(key.clone(), media);
        report.created_medias += 1;

        if append_to_parent(bundle, key, MetadataKind::Media) {
            report.order_entries_appended += 1;
        }
    }

    report.orphans = orphans;
    report
}

fn order_len(folder: &FolderMetadata) -> usize {
    folder.order(MetadataKind::Folder).map_or(0, <[String]>::len)
        + folder.order(MetadataKind::Media).map_or(0, <[String]>::len)
}
