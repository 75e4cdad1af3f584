//! Filesystem watcher for the media root.
//!
//! Wraps `notify` and turns raw notifications into library-level events
//! (`add`, `change`, `unlink`, `addDir`, `unlinkDir`) keyed by path key.
//! File additions and changes are held back until the file has stopped
//! changing for the stability window, so subscribers never see a file that
//! is still being written. Events fan out over a broadcast channel; the
//! reconciliation engine and the thumbnail pipeline each hold their own
//! subscription.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use folio_model::MediaKind;
use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{LibraryError, Result};
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
    /// The watcher lost events (queue overflow or backend error); state
    /// must be rebuilt from a full scan.
    Rescan,
}

impl WatchEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchEventKind::Add => "add",
            WatchEventKind::Change => "change",
            WatchEventKind::Unlink => "unlink",
            WatchEventKind::AddDir => "addDir",
            WatchEventKind::UnlinkDir => "unlinkDir",
            WatchEventKind::Rescan => "rescan",
        }
    }
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Path key relative to the media root.
    pub path: String,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Coalescing key: one in-flight task per (event type, path).
    pub fn task_key(&self) -> String {
        format!("{}:{}", self.kind, self.path)
    }
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// How long a file must stay unchanged before `add`/`change` fires.
    pub stability_window: Duration,
    /// How often pending files are re-examined.
    pub poll_interval: Duration,
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            stability_window: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            channel_capacity: 1024,
        }
    }
}

pub struct LibraryWatcher {
    root: PathBuf,
    excluded: Vec<PathBuf>,
    config: WatchConfig,
    events: broadcast::Sender<WatchEvent>,
    running: Mutex<Option<RunningWatch>>,
}

struct RunningWatch {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl fmt::Debug for LibraryWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryWatcher")
            .field("root", &self.root)
            .field("excluded", &self.excluded)
            .field("config", &self.config)
            .field("subscribers", &self.events.receiver_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl LibraryWatcher {
    /// `excluded` lists directories under the root that are never reported
    /// (the thumbnails tree when it lives inside the media root).
    pub fn new(root: PathBuf, excluded: Vec<PathBuf>, config: WatchConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(16));
        Self {
            root,
            excluded,
            config,
            events,
            running: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Deliver an event to every subscriber as if the watcher had seen it.
    pub fn publish(&self, event: WatchEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start watching. Calling this on a running watcher is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel::<WatchMessage>(self.config.channel_capacity.max(64));
        let root = self.root.clone();
        let watcher = spawn_blocking(move || init_watcher(&root, tx)).await??;

        let task = tokio::spawn(run_watch_loop(
            self.root.clone(),
            self.excluded.clone(),
            self.config.clone(),
            rx,
            self.events.clone(),
        ));

        let mut running = self.running.lock();
        if running.is_some() {
            task.abort();
            return Ok(());
        }
        *running = Some(RunningWatch {
            _watcher: watcher,
            task,
        });
        info!(root = %self.root.display(), "filesystem watcher started");
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.task.abort();
            // Dropping the notify watcher ends its event stream.
            info!(root = %self.root.display(), "filesystem watcher stopped");
        }
    }
}

impl Drop for LibraryWatcher {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.task.abort();
        }
    }
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error(message) => f
                .debug_struct("WatchMessage::Error")
                .field("message", message)
                .finish(),
        }
    }
}

fn init_watcher(
    root: &Path,
    tx: mpsc::Sender<WatchMessage>,
) -> Result<RecommendedWatcher> {
    let root_display = root.display().to_string();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if let Err(err) = tx.blocking_send(WatchMessage::Event(event)) {
                    warn!("watch channel send failed for {root_display}: {err}");
                }
            }
            Err(err) => {
                let _ = tx.blocking_send(WatchMessage::Error(err.to_string()));
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|err| {
        LibraryError::Internal(format!(
            "failed to create watcher for {}: {err}",
            root.display()
        ))
    })?;

    watcher.watch(root, RecursiveMode::Recursive).map_err(|err| {
        LibraryError::Internal(format!("failed to watch {}: {err}", root.display()))
    })?;
    Ok(watcher)
}

/// Intermediate classification of one notify path.
#[derive(Debug, PartialEq, Eq)]
enum RawChange {
    Touched { key: String, path: PathBuf, created: bool },
    DirAdded { key: String },
    Removed { key: String, is_dir: Option<bool> },
    Rescan,
}

#[derive(Debug)]
struct PendingFile {
    kind: WatchEventKind,
    path: PathBuf,
    last_event: Instant,
    stamp: Option<FileStamp>,
}

type FileStamp = (u64, Option<SystemTime>);

async fn run_watch_loop(
    root: PathBuf,
    excluded: Vec<PathBuf>,
    config: WatchConfig,
    mut rx: mpsc::Receiver<WatchMessage>,
    events: broadcast::Sender<WatchEvent>,
) {
    let mut pending: HashMap<String, PendingFile> = HashMap::new();
    let mut ticker = tokio::time::interval(config.poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                match message {
                    WatchMessage::Event(event) => {
                        for change in classify_event(&root, &excluded, event).await {
                            apply_change(change, &mut pending, &events).await;
                        }
                    }
                    WatchMessage::Error(error) => {
                        warn!(root = %root.display(), "watcher error: {error}");
                        emit(&events, WatchEvent::new(WatchEventKind::Rescan, ""));
                    }
                }
            }
            _ = ticker.tick(), if !pending.is_empty() => {
                settle_pending(&mut pending, config.stability_window, &events).await;
            }
        }
    }
    debug!(root = %root.display(), "watch loop finished");
}

async fn classify_event(
    root: &Path,
    excluded: &[PathBuf],
    event: Event,
) -> Vec<RawChange> {
    if event.need_rescan() || matches!(event.kind, EventKind::Other) {
        return vec![RawChange::Rescan];
    }

    let keyed: Vec<(String, PathBuf)> = event
        .paths
        .iter()
        .filter_map(|path| library_key(root, excluded, path).map(|key| (key, path.clone())))
        .collect();

    let mut changes = Vec::with_capacity(keyed.len());
    match event.kind {
        EventKind::Create(CreateKind::Folder) => {
            changes.extend(keyed.into_iter().map(|(key, _)| RawChange::DirAdded { key }));
        }
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for (key, path) in keyed {
                changes.extend(appeared(key, path).await);
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            changes.extend(
                keyed
                    .into_iter()
                    .map(|(key, _)| RawChange::Removed { key, is_dir: None }),
            );
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // notify reports [from, to]; either side may lie outside the root.
            let from = event.paths.first().and_then(|p| library_key(root, excluded, p));
            let to = event.paths.get(1).and_then(|p| {
                library_key(root, excluded, p).map(|key| (key, p.clone()))
            });
            if let Some(key) = from {
                changes.push(RawChange::Removed { key, is_dir: None });
            }
            if let Some((key, path)) = to {
                changes.extend(appeared(key, path).await);
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            for (key, path) in keyed {
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    changes.extend(appeared(key, path).await);
                } else {
                    changes.push(RawChange::Removed { key, is_dir: None });
                }
            }
        }
        EventKind::Modify(_) => {
            for (key, path) in keyed {
                let is_file = tokio::fs::metadata(&path)
                    .await
                    .map(|meta| meta.is_file())
                    .unwrap_or(false);
                if is_file {
                    changes.push(RawChange::Touched {
                        key,
                        path,
                        created: false,
                    });
                }
            }
        }
        EventKind::Remove(kind) => {
            let is_dir = match kind {
                RemoveKind::Folder => Some(true),
                RemoveKind::File => Some(false),
                _ => None,
            };
            changes.extend(
                keyed
                    .into_iter()
                    .map(|(key, _)| RawChange::Removed { key, is_dir }),
            );
        }
        _ => {}
    }
    changes
}

/// Key for a notify path, or `None` if the path must not be reported.
fn library_key(root: &Path, excluded: &[PathBuf], path: &Path) -> Option<String> {
    if excluded.iter().any(|dir| path.starts_with(dir)) {
        return None;
    }
    let key = paths::relative_key(root, path)?;
    if key.is_empty() {
        return None;
    }
    if paths::is_hidden(&key) {
        debug!(path = %key, "ignoring hidden path");
        return None;
    }
    Some(key)
}

async fn appeared(key: String, path: PathBuf) -> Option<RawChange> {
    let meta = tokio::fs::metadata(&path).await.ok()?;
    if meta.is_dir() {
        Some(RawChange::DirAdded { key })
    } else if meta.is_file() {
        Some(RawChange::Touched {
            key,
            path,
            created: true,
        })
    } else {
        None
    }
}

/// `unlink` for media files, `unlinkDir` for folders; removals of other
/// files are not library events.
fn removal_kind(key: &str, is_dir: Option<bool>) -> Option<WatchEventKind> {
    let is_media = MediaKind::is_media(key);
    match is_dir {
        Some(true) => Some(WatchEventKind::UnlinkDir),
        Some(false) if is_media => Some(WatchEventKind::Unlink),
        Some(false) => None,
        None if is_media => Some(WatchEventKind::Unlink),
        None => Some(WatchEventKind::UnlinkDir),
    }
}

async fn apply_change(
    change: RawChange,
    pending: &mut HashMap<String, PendingFile>,
    events: &broadcast::Sender<WatchEvent>,
) {
    match change {
        RawChange::Rescan => {
            pending.clear();
            emit(events, WatchEvent::new(WatchEventKind::Rescan, ""));
        }
        RawChange::DirAdded { key } => {
            emit(events, WatchEvent::new(WatchEventKind::AddDir, key));
        }
        RawChange::Removed { key, is_dir } => {
            pending.retain(|candidate, _| !paths::is_within(candidate, &key));
            if let Some(kind) = removal_kind(&key, is_dir) {
                emit(events, WatchEvent::new(kind, key));
            }
        }
        RawChange::Touched { key, path, created } => {
            if !MediaKind::is_media(&key) {
                return;
            }
            let stamp = file_stamp(&path).await;
            let kind = if created {
                WatchEventKind::Add
            } else {
                WatchEventKind::Change
            };
            let entry = pending.entry(key).or_insert_with(|| PendingFile {
                kind,
                path,
                last_event: Instant::now(),
                stamp: None,
            });
            if kind == WatchEventKind::Add {
                entry.kind = WatchEventKind::Add;
            }
            entry.last_event = Instant::now();
            entry.stamp = stamp;
        }
    }
}

async fn settle_pending(
    pending: &mut HashMap<String, PendingFile>,
    window: Duration,
    events: &broadcast::Sender<WatchEvent>,
) {
    let quiet: Vec<String> = pending
        .iter()
        .filter(|(_, file)| file.last_event.elapsed() >= window)
        .map(|(key, _)| key.clone())
        .collect();

    for key in quiet {
        let Some(file) = pending.get_mut(&key) else {
            continue;
        };
        match file_stamp(&file.path).await {
            None => {
                // Gone before it settled; the removal event covers it.
                pending.remove(&key);
            }
            Some(stamp) if Some(stamp) == file.stamp => {
                let kind = file.kind;
                pending.remove(&key);
                emit(events, WatchEvent::new(kind, key));
            }
            Some(stamp) => {
                file.stamp = Some(stamp);
                file.last_event = Instant::now();
            }
        }
    }
}

async fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    meta.is_file().then(|| (meta.len(), meta.modified().ok()))
}

fn emit(events: &broadcast::Sender<WatchEvent>, event: WatchEvent) {
    debug!(kind = %event.kind, path = %event.path, "watch event");
    // No subscribers is not an error.
    let _ = events.send(event);
}
