//! Durable, path-keyed metadata persistence.
//!
//! Folder and media records live in two JSON documents inside the data
//! directory. The parsed bundle is cached in memory and reused for as long
//! as neither document changes on disk; an external edit (or an explicit
//! [`MetadataStore::invalidate`]) forces a reload on the next read. Every
//! write goes through a temp-file-then-rename so readers never observe a
//! partially written document.

mod atomic;
mod record;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use folio_model::{
    FolderMetadata, LibrarySettings, MediaMetadata, MetadataBundle,
    MetadataKind,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{LibraryError, Result};
use crate::paths;

pub(crate) use atomic::write_bytes_atomic;
pub(crate) use atomic::write_json_atomic;
pub use record::{Record, next_timestamp};

pub const FOLDERS_DOCUMENT: &str = "folders.json";
pub const MEDIAS_DOCUMENT: &str = "medias.json";
pub const SETTINGS_DOCUMENT: &str = "settings.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DocumentStamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Debug)]
struct Loaded {
    bundle: Arc<MetadataBundle>,
    stamps: [Option<DocumentStamp>; 2],
}

/// The single metadata store instance of a library.
pub struct MetadataStore {
    data_dir: PathBuf,
    folders_path: PathBuf,
    medias_path: PathBuf,
    settings_path: PathBuf,
    cached: RwLock<Option<Loaded>>,
    // Serializes read-modify-write cycles issued through this instance.
    write_lock: Mutex<()>,
}

impl fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.cached.try_read().map(|guard| {
            guard.as_ref().map(|loaded| {
                (loaded.bundle.folders.len(), loaded.bundle.medias.len())
            })
        });
        let mut debug = f.debug_struct("MetadataStore");
        debug.field("data_dir", &self.data_dir);
        match cached {
            Some(Some((folders, medias))) => {
                debug.field("cached_folders", &folders);
                debug.field("cached_medias", &medias);
            }
            Some(None) => {
                debug.field("cached", &false);
            }
            None => {
                debug.field("cached", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl MetadataStore {
    /// Open the store rooted at `data_dir`, creating the directory and
    /// loading both documents once so a corrupt document fails early.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        let store = Self {
            folders_path: data_dir.join(FOLDERS_DOCUMENT),
            medias_path: data_dir.join(MEDIAS_DOCUMENT),
            settings_path: data_dir.join(SETTINGS_DOCUMENT),
            data_dir,
            cached: RwLock::new(None),
            write_lock: Mutex::new(()),
        };
        let bundle = store.read_all().await?;
        info!(
            data_dir = %store.data_dir.display(),
            folders = bundle.folders.len(),
            medias = bundle.medias.len(),
            "metadata store opened"
        );
        Ok(store)
    }

    /// Drop the in-memory copy. The store stays usable; the next read
    /// reloads from disk.
    pub fn close(&self) {
        self.cached.write().take();
    }

    pub fn invalidate(&self) {
        if self.cached.write().take().is_some() {
            debug!("metadata cache invalidated");
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Both documents as of now.
    pub async fn read_all(&self) -> Result<Arc<MetadataBundle>> {
        let stamps = self.current_stamps().await?;
        if let Some(loaded) = self.cached.read().as_ref()
            && loaded.stamps == stamps
        {
            return Ok(Arc::clone(&loaded.bundle));
        }

        let folders = read_document(&self.folders_path).await?;
        let medias = read_document(&self.medias_path).await?;
        let bundle = Arc::new(MetadataBundle { folders, medias });
        debug!(
            folders = bundle.folders.len(),
            medias = bundle.medias.len(),
            "metadata documents loaded"
        );
        *self.cached.write() = Some(Loaded {
            bundle: Arc::clone(&bundle),
            stamps,
        });
        Ok(bundle)
    }

    /// Replace both documents with `bundle`. Nothing is written unless the
    /// whole bundle validates.
    pub async fn write_bundle(&self, bundle: MetadataBundle) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        bundle.validate()?;
        let current = self.read_all().await?;
        self.persist(&current, bundle).await
    }

    /// Read-modify-write over the whole bundle. `apply` works on a copy;
    /// the copy is validated and persisted only if it changed, and an error
    /// from `apply` leaves the store untouched.
    pub async fn update<T>(
        &self,
        apply: impl FnOnce(&mut MetadataBundle) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let current = self.read_all().await?;
        let mut next = (*current).clone();
        let output = apply(&mut next)?;
        if next != *current {
            next.validate()?;
            self.persist(&current, next).await?;
        }
        Ok(output)
    }

    pub async fn get<R: Record>(&self, path: &str) -> Result<Option<R>> {
        let key = paths::validate_key(path)?;
        let bundle = self.read_all().await?;
        Ok(R::entries(&bundle).get(&key).cloned())
    }

    pub async fn get_folder(&self, path: &str) -> Result<Option<FolderMetadata>> {
        self.get(path).await
    }

    pub async fn get_media(&self, path: &str) -> Result<Option<MediaMetadata>> {
        self.get(path).await
    }

    /// Create or patch the record at `path`. See [`Record`] for timestamp
    /// handling; `null` patch values delete fields.
    pub async fn upsert<R: Record>(
        &self,
        path: &str,
        patch: &Value,
        merge: bool,
    ) -> Result<R> {
        let key = record_key::<R>(path)?;
        self.update(|bundle| {
            let existing = R::entries(bundle).get(&key);
            let record = record::apply_patch(existing, patch, merge)?;
            R::entries_mut(bundle).insert(key, record.clone());
            Ok(record)
        })
        .await
    }

    pub async fn upsert_folder(
        &self,
        path: &str,
        patch: &Value,
        merge: bool,
    ) -> Result<FolderMetadata> {
        self.upsert(path, patch, merge).await
    }

    pub async fn upsert_media(
        &self,
        path: &str,
        patch: &Value,
        merge: bool,
    ) -> Result<MediaMetadata> {
        self.upsert(path, patch, merge).await
    }

    /// Edit the record at `path` in place, starting from a default record
    /// when none exists.
    pub async fn modify<R: Record>(
        &self,
        path: &str,
        edit: impl FnOnce(&mut R),
    ) -> Result<R> {
        let key = record_key::<R>(path)?;
        self.update(|bundle| {
            let entries = R::entries_mut(bundle);
            let mut record = entries.get(&key).cloned().unwrap_or_default();
            edit(&mut record);
            record.normalize();
            record.touch();
            record.check()?;
            entries.insert(key, record.clone());
            Ok(record)
        })
        .await
    }

    /// Delete the folder record at `path` and every folder or media record
    /// nested under it. Returns the number of records removed.
    pub async fn delete_folder(&self, path: &str) -> Result<usize> {
        let key = paths::validate_key(path)?;
        if key.is_empty() {
            return Err(LibraryError::Validation(
                "the library root cannot be deleted".into(),
            ));
        }
        self.update(|bundle| Ok(remove_subtree(bundle, &key))).await
    }

    pub async fn delete_media(&self, path: &str) -> Result<bool> {
        let key = paths::validate_key(path)?;
        self.update(|bundle| Ok(bundle.medias.remove(&key).is_some()))
            .await
    }

    pub async fn read_settings(&self) -> Result<LibrarySettings> {
        match tokio::fs::read(&self.settings_path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => {
                Ok(LibrarySettings::default())
            }
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(LibrarySettings::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Merge `patch` into the settings document (`null` deletes a key).
    pub async fn update_settings(
        &self,
        patch: &Value,
    ) -> Result<LibrarySettings> {
        let Value::Object(patch) = patch else {
            return Err(LibraryError::Validation(
                "settings patch must be a JSON object".into(),
            ));
        };
        let _guard = self.write_lock.lock().await;
        let current = self.read_settings().await?;
        let mut fields = match serde_json::to_value(&current)? {
            Value::Object(fields) => fields,
            _ => serde_json::Map::new(),
        };
        record::merge_fields(&mut fields, patch);
        let next: LibrarySettings = serde_json::from_value(Value::Object(fields))
            .map_err(|err| {
                LibraryError::Validation(format!("invalid settings: {err}"))
            })?;
        write_json_atomic(&self.settings_path, &next).await?;
        Ok(next)
    }

    async fn persist(
        &self,
        current: &MetadataBundle,
        next: MetadataBundle,
    ) -> Result<()> {
        if next.folders != current.folders {
            write_json_atomic(&self.folders_path, &next.folders).await?;
        }
        if next.medias != current.medias {
            write_json_atomic(&self.medias_path, &next.medias).await?;
        }
        let stamps = self.current_stamps().await?;
        *self.cached.write() = Some(Loaded {
            bundle: Arc::new(next),
            stamps,
        });
        Ok(())
    }

    async fn current_stamps(&self) -> Result<[Option<DocumentStamp>; 2]> {
        Ok([
            stamp(&self.folders_path).await?,
            stamp(&self.medias_path).await?,
        ])
    }
}

/// Remove `key` and everything nested under it from both maps.
pub(crate) fn remove_subtree(bundle: &mut MetadataBundle, key: &str) -> usize {
    let before = bundle.folders.len() + bundle.medias.len();
    bundle
        .folders
        .retain(|candidate, _| !paths::is_within(candidate, key));
    bundle
        .medias
        .retain(|candidate, _| !paths::is_within(candidate, key));
    before - bundle.folders.len() - bundle.medias.len()
}

/// Append `key` to its parent's order list of `kind`, when the parent
/// keeps one. Returns whether the list changed.
pub(crate) fn append_to_parent(
    bundle: &mut MetadataBundle,
    key: &str,
    kind: MetadataKind,
) -> bool {
    if let Some(parent) = bundle.folders.get_mut(paths::parent_of(key))
        && parent.append_to_order(kind, key)
    {
        parent.touch();
        return true;
    }
    false
}

/// Drop `key` from its parent's order list of `kind`.
pub(crate) fn prune_parent(
    bundle: &mut MetadataBundle,
    key: &str,
    kind: MetadataKind,
) -> bool {
    if let Some(parent) = bundle.folders.get_mut(paths::parent_of(key))
        && parent.remove_from_order(kind, key)
    {
        parent.touch();
        return true;
    }
    false
}

fn record_key<R: Record>(path: &str) -> Result<String> {
    let key = paths::validate_key(path)?;
    if key.is_empty() && R::KIND == MetadataKind::Media {
        return Err(LibraryError::Validation(
            "media metadata needs a file path".into(),
        ));
    }
    if paths::is_hidden(&key) {
        return Err(LibraryError::Validation(format!(
            "'{key}' is a hidden entry and cannot carry metadata"
        )));
    }
    Ok(key)
}

async fn stamp(path: &Path) -> Result<Option<DocumentStamp>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(DocumentStamp {
            modified: meta.modified().ok(),
            len: meta.len(),
        })),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn read_document<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => {
            Ok(T::default())
        }
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(Into::into),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Ok(T::default())
        }
        Err(err) => Err(err.into()),
    }
}
