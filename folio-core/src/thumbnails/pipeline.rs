use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use folio_model::media_kind::is_thumbnail_source;
use folio_model::{
    EncodedFormat, MediaMetadata, Orientation, SourceRemovalPolicy,
    ThumbnailConfig, ThumbnailEntry, ThumbnailPreset, ThumbnailSource,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{debug, info, warn};

use super::encode::render_source;
use super::{load_config, save_config};
use crate::error::Result;
use crate::paths;
use crate::recent::RecentMutations;
use crate::scan::walk_library;
use crate::store::{MetadataStore, write_bytes_atomic};
use crate::tasks::TaskCoalescer;
use crate::tree::TreeCache;
use crate::watch::{LibraryWatcher, WatchEvent, WatchEventKind};

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThumbnailStats {
    /// Tasks that claimed their key and ran (or are running).
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    /// Triggers dropped because the same key was already in flight.
    pub coalesced: u64,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub sources: usize,
    pub generated: usize,
    pub failed: usize,
    /// Sources skipped because a generation for them was already running.
    pub skipped: usize,
}

#[derive(Debug)]
enum Outcome {
    Generated(Box<MediaMetadata>),
    Skipped,
}

/// Derives per-preset, per-format variants for image files and keeps them
/// in step with source changes.
#[derive(Clone)]
pub struct ThumbnailPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    media_root: PathBuf,
    thumbnails_root: PathBuf,
    config_path: PathBuf,
    store: Arc<MetadataStore>,
    cache: Arc<TreeCache>,
    recent: Arc<RecentMutations>,
    config: RwLock<Arc<ThumbnailConfig>>,
    tasks: TaskCoalescer,
    completed: AtomicU64,
    failed: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
    rebuild: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ThumbnailPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailPipeline")
            .field("media_root", &self.inner.media_root)
            .field("thumbnails_root", &self.inner.thumbnails_root)
            .field("config_path", &self.inner.config_path)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ThumbnailPipeline {
    pub async fn open(
        media_root: PathBuf,
        thumbnails_root: PathBuf,
        config_path: PathBuf,
        store: Arc<MetadataStore>,
        cache: Arc<TreeCache>,
        recent: Arc<RecentMutations>,
        workers: usize,
    ) -> Result<Self> {
        let config = load_config(&config_path).await?;
        tokio::fs::create_dir_all(&thumbnails_root).await?;
        Ok(Self {
            inner: Arc::new(Inner {
                media_root,
                thumbnails_root,
                config_path,
                store,
                cache,
                recent,
                config: RwLock::new(Arc::new(config)),
                tasks: TaskCoalescer::new("thumbnails", workers),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                listener: Mutex::new(None),
                rebuild: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> Arc<ThumbnailConfig> {
        self.inner.config()
    }

    pub fn thumbnails_root(&self) -> &Path {
        &self.inner.thumbnails_root
    }

    pub fn stats(&self) -> ThumbnailStats {
        ThumbnailStats {
            started: self.inner.tasks.started(),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            coalesced: self.inner.tasks.coalesced(),
            in_flight: self.inner.tasks.in_flight(),
        }
    }

    /// Subscribe to `watcher` and react to its events until [`stop`].
    ///
    /// [`stop`]: ThumbnailPipeline::stop
    pub fn start(&self, watcher: &LibraryWatcher) {
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            return;
        }
        let mut events = watcher.subscribe();
        let pipeline = self.clone();
        *listener = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        pipeline.handle_event(event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(
                            missed,
                            "thumbnail pipeline fell behind the watcher; \
                             run a rebuild to resynchronise"
                        );
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

    /// React to one watcher event. Returns the spawned task, or `None` when
    /// the event is irrelevant or a task for the same key is in flight.
    pub fn handle_event(&self, event: WatchEvent) -> Option<JoinHandle<()>> {
        match event.kind {
            WatchEventKind::Add | WatchEventKind::Change => {
                self.queue_generate(&event.path)
            }
            WatchEventKind::Unlink => {
                let inner = Arc::clone(&self.inner);
                let path = event.path.clone();
                // A rename or move by the mutation service relocates the
                // record itself; only the derived files go here.
                let metadata = if self.inner.recent.covers(&path) {
                    MetadataCleanup::Keep
                } else {
                    MetadataCleanup::ApplyPolicy
                };
                self.inner.tasks.spawn(event.task_key(), async move {
                    if let Err(err) = inner.remove_source(&path, metadata).await
                    {
                        warn!(path = %path, "thumbnail cleanup failed: {err}");
                    }
                })
            }
            WatchEventKind::UnlinkDir => {
                let inner = Arc::clone(&self.inner);
                let path = event.path.clone();
                self.inner.tasks.spawn(event.task_key(), async move {
                    if let Err(err) = inner.remove_folder(&path).await {
                        warn!(path = %path, "thumbnail cleanup failed: {err}");
                    }
                })
            }
            WatchEventKind::AddDir => {
                // Claims the key without a worker permit; the per-file
                // generations it queues take their own.
                let guard = self.inner.tasks.try_begin(event.task_key())?;
                let pipeline = self.clone();
                Some(tokio::spawn(async move {
                    let _guard = guard;
                    match pipeline.generate_folder(&event.path).await {
                        Ok(report) => debug!(
                            path = %event.path,
                            generated = report.generated,
                            "generated thumbnails for new folder"
                        ),
                        Err(err) => warn!(
                            path = %event.path,
                            "thumbnail generation for folder failed: {err}"
                        ),
                    }
                }))
            }
            WatchEventKind::Rescan => None,
        }
    }

    /// Queue generation for one media path, coalesced per path.
    pub fn queue_generate(&self, path: &str) -> Option<JoinHandle<()>> {
        if !is_thumbnail_source(path) || paths::is_hidden(path) {
            return None;
        }
        let inner = Arc::clone(&self.inner);
        let key = path.to_string();
        self.inner.tasks.spawn(generate_key(path), async move {
            let _ = inner.generate_counted(&key).await;
        })
    }

    /// Generate variants for `path` now and return the updated record.
    /// `Ok(None)` when the path is not a thumbnail source, vanished, or is
    /// already being processed.
    pub async fn generate(&self, path: &str) -> Result<Option<MediaMetadata>> {
        let key = paths::validate_key(path)?;
        if !is_thumbnail_source(&key) || paths::is_hidden(&key) {
            return Ok(None);
        }
        let inner = Arc::clone(&self.inner);
        let task_key = generate_key(&key);
        let run = self
            .inner
            .tasks
            .run(task_key, async move { inner.generate_counted(&key).await })
            .await;
        match run {
            Some(Ok(Outcome::Generated(record))) => Ok(Some(*record)),
            Some(Ok(Outcome::Skipped)) | None => Ok(None),
            Some(Err(err)) => Err(err),
        }
    }

    /// Remove the derived files of `path` and apply the configured
    /// source-removal policy to its metadata.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let key = paths::validate_key(path)?;
        self.inner
            .remove_source(&key, MetadataCleanup::ApplyPolicy)
            .await
    }

    /// Delete the whole thumbnails tree and regenerate from every image
    /// under the media root. Individual failures are counted, not fatal.
    pub async fn rebuild_all(&self) -> Result<RebuildReport> {
        let _rebuild = self.inner.rebuild.lock().await;
        let root = &self.inner.thumbnails_root;
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        tokio::fs::create_dir_all(root).await?;

        let report = self.generate_folder("").await?;
        self.inner.cache.invalidate();
        info!(
            sources = report.sources,
            generated = report.generated,
            failed = report.failed,
            skipped = report.skipped,
            "thumbnail rebuild finished"
        );
        Ok(report)
    }

    /// Validate and persist `next`, then rebuild everything with it.
    pub async fn update_config(
        &self,
        next: ThumbnailConfig,
    ) -> Result<RebuildReport> {
        save_config(&self.inner.config_path, &next).await?;
        *self.inner.config.write() = Arc::new(next);
        info!("thumbnail configuration updated");
        self.rebuild_all().await
    }

    async fn generate_folder(&self, folder: &str) -> Result<RebuildReport> {
        let start = paths::resolve(&self.inner.media_root, folder)?;
        let root = self.inner.media_root.clone();
        let excluded = vec![self.inner.thumbnails_root.clone()];
        let disk =
            spawn_blocking(move || walk_library(&root, &start, &excluded))
                .await??;

        let sources: Vec<String> = disk
            .medias
            .into_iter()
            .filter(|key| is_thumbnail_source(key))
            .collect();
        let mut report = RebuildReport {
            sources: sources.len(),
            ..RebuildReport::default()
        };

        let mut handles = Vec::with_capacity(sources.len());
        for key in sources {
            let inner = Arc::clone(&self.inner);
            let task_key = generate_key(&key);
            match self.inner.tasks.spawn(task_key, async move {
                inner.generate_counted(&key).await
            }) {
                Some(handle) => handles.push(handle),
                None => report.skipped += 1,
            }
        }
        for handle in handles {
            match handle.await {
                Ok(Ok(Outcome::Generated(_))) => report.generated += 1,
                Ok(Ok(Outcome::Skipped)) => report.skipped += 1,
                Ok(Err(_)) => report.failed += 1,
                Err(err) => {
                    warn!("thumbnail task panicked: {err}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetadataCleanup {
    ApplyPolicy,
    Keep,
}

fn generate_key(path: &str) -> String {
    format!("generate:{path}")
}

/// `{parent}/{stem}_{preset}.{ext}` relative to the thumbnails root.
pub(crate) fn derived_key(
    key: &str,
    preset: &str,
    format: EncodedFormat,
) -> String {
    let name = paths::file_name(key);
    let stem = Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name);
    paths::join(
        paths::parent_of(key),
        &format!("{stem}_{preset}.{}", format.extension()),
    )
}

impl Inner {
    fn config(&self) -> Arc<ThumbnailConfig> {
        Arc::clone(&self.config.read())
    }

    async fn generate_counted(&self, key: &str) -> Result<Outcome> {
        let result = self.generate_source(key).await;
        match &result {
            Ok(Outcome::Generated(_)) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Outcome::Skipped) => {}
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(path = %key, "thumbnail generation failed: {err}");
                self.forget_thumbnails(key).await;
            }
        }
        result
    }

    async fn generate_source(&self, key: &str) -> Result<Outcome> {
        let source = paths::resolve(&self.media_root, key)?;
        let config = self.config();
        let existing = self.store.get_media(key).await?;
        self.remove_outputs(key, &config, existing.as_ref()).await;

        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            debug!(path = %key, "source vanished before generation");
            return Ok(Outcome::Skipped);
        }

        let presets: Vec<(String, ThumbnailPreset)> = config
            .presets
            .iter()
            .map(|(name, preset)| (name.clone(), *preset))
            .collect();
        let formats = config.format.formats().to_vec();
        let (base, quality) = (config.base, config.quality);
        let render_path = source.clone();
        let rendered = spawn_blocking(move || {
            render_source(&render_path, &presets, base, &formats, quality)
        })
        .await??;

        let mut entries: BTreeMap<String, ThumbnailEntry> = BTreeMap::new();
        let mut written = Vec::with_capacity(rendered.variants.len());
        for variant in rendered.variants {
            let rel = derived_key(key, &variant.preset, variant.format);
            let target = paths::resolve(&self.thumbnails_root, &rel)?;
            write_bytes_atomic(&target, &variant.bytes).await?;
            written.push(target);

            let entry = entries
                .entry(variant.preset)
                .or_insert_with(|| ThumbnailEntry {
                    default: rel.clone(),
                    sources: Vec::new(),
                    width: variant.width,
                    height: variant.height,
                });
            entry.sources.push(ThumbnailSource {
                format: variant.format,
                path: rel,
                size: variant.bytes.len() as u64,
            });
        }

        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            // Deleted mid-encode; the unlink handler owns the metadata.
            for path in written {
                let _ = tokio::fs::remove_file(path).await;
            }
            return Ok(Outcome::Skipped);
        }

        let (width, height) = (rendered.width, rendered.height);
        let default_visibility = self
            .store
            .read_settings()
            .await
            .map(|settings| settings.default_visibility)
            .unwrap_or_default();
        let record = self
            .store
            .modify::<MediaMetadata>(key, |media| {
                if media.created_at.is_none() {
                    media.visibility = default_visibility;
                }
                media.thumbnails = entries;
                media.width = Some(width);
                media.height = Some(height);
                media.orientation = Some(Orientation::classify(width, height));
            })
            .await?;
        self.cache.invalidate();
        debug!(
            path = %key,
            presets = record.thumbnails.len(),
            "thumbnails generated"
        );
        Ok(Outcome::Generated(Box::new(record)))
    }

    /// After a failed generation the old outputs are already gone; drop the
    /// now dangling map so readers do not chase missing files.
    async fn forget_thumbnails(&self, key: &str) {
        let has_thumbnails = matches!(
            self.store.get_media(key).await,
            Ok(Some(media)) if !media.thumbnails.is_empty()
        );
        if !has_thumbnails {
            return;
        }
        let cleared = self
            .store
            .modify::<MediaMetadata>(key, |media| media.thumbnails.clear())
            .await;
        if let Err(err) = cleared {
            warn!(path = %key, "failed to clear stale thumbnails: {err}");
        }
    }

    async fn remove_source(
        &self,
        key: &str,
        metadata: MetadataCleanup,
    ) -> Result<()> {
        let source = paths::resolve(&self.media_root, key)?;
        if tokio::fs::try_exists(&source).await.unwrap_or(false) {
            debug!(path = %key, "source exists again, keeping thumbnails");
            return Ok(());
        }

        let config = self.config();
        let existing = self.store.get_media(key).await?;
        self.remove_outputs(key, &config, existing.as_ref()).await;
        self.prune_empty_dirs(paths::parent_of(key)).await;

        if existing.is_some() && metadata == MetadataCleanup::ApplyPolicy {
            match config.on_source_removed {
                SourceRemovalPolicy::DropMetadata => {
                    self.store.delete_media(key).await?;
                }
                SourceRemovalPolicy::ClearThumbnails => {
                    self.store
                        .modify::<MediaMetadata>(key, MediaMetadata::clear_derived)
                        .await?;
                }
            }
        }
        self.cache.invalidate();
        debug!(
            path = %key,
            policy = ?config.on_source_removed,
            ?metadata,
            "thumbnails removed"
        );
        Ok(())
    }

    async fn remove_folder(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }
        let source = paths::resolve(&self.media_root, key)?;
        if tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Ok(());
        }
        let mirrored = paths::resolve(&self.thumbnails_root, key)?;
        match tokio::fs::remove_dir_all(&mirrored).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.prune_empty_dirs(paths::parent_of(key)).await;
        self.cache.invalidate();
        Ok(())
    }

    /// Delete every file that could belong to `key`: the outputs named by
    /// the current presets in every format, plus whatever the existing
    /// record points at (presets may have been renamed since).
    async fn remove_outputs(
        &self,
        key: &str,
        config: &ThumbnailConfig,
        existing: Option<&MediaMetadata>,
    ) {
        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for preset in config.presets.keys() {
            for format in [EncodedFormat::Webp, EncodedFormat::Avif] {
                candidates.insert(derived_key(key, preset, format));
            }
        }
        if let Some(media) = existing {
            for entry in media.thumbnails.values() {
                candidates
                    .extend(entry.sources.iter().map(|s| s.path.clone()));
            }
        }

        for rel in candidates {
            let Ok(path) = paths::resolve(&self.thumbnails_root, &rel) else {
                continue;
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        "failed to remove thumbnail: {err}"
                    );
                }
            }
        }
    }

    /// Remove empty mirrored folders from `folder` upwards, stopping at
    /// the thumbnails root.
    async fn prune_empty_dirs(&self, folder: &str) {
        let mut current = folder;
        while !current.is_empty() {
            let Ok(dir) = paths::resolve(&self.thumbnails_root, current) else {
                return;
            };
            // Fails (and stops the walk) when the directory is not empty.
            if tokio::fs::remove_dir(&dir).await.is_err() {
                return;
            }
            current = paths::parent_of(current);
        }
    }
}
