//! Filesystem mutations paired with their metadata and ordering updates.
//!
//! Each operation performs the disk step first and the metadata step
//! second. The pair is not transactional: when the disk step succeeds and
//! the metadata step fails, the failure is logged and the next reconcile
//! pass repairs the store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use folio_model::{
    AttributeValue, FolderMetadata, MediaKind, MediaMetadata, MetadataBundle,
    MetadataKind, Visibility,
};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{LibraryError, Result};
use crate::paths;
use crate::recent::RecentMutations;
use crate::store::{
    MetadataStore, Record, append_to_parent, prune_parent, remove_subtree,
};
use crate::tree::TreeCache;

/// Upper bound on `-N` suffixes tried when a saved file name is taken.
const MAX_NAME_ATTEMPTS: usize = 10_000;

#[derive(Debug)]
pub struct MutationService {
    media_root: PathBuf,
    excluded: Vec<PathBuf>,
    store: Arc<MetadataStore>,
    cache: Arc<TreeCache>,
    recent: Arc<RecentMutations>,
}

impl MutationService {
    pub fn new(
        media_root: PathBuf,
        excluded: Vec<PathBuf>,
        store: Arc<MetadataStore>,
        cache: Arc<TreeCache>,
        recent: Arc<RecentMutations>,
    ) -> Self {
        Self {
            media_root,
            excluded,
            store,
            cache,
            recent,
        }
    }

    /// Create the directory at `path` (its parent must exist). Returns the
    /// new folder's key.
    pub async fn create_folder(&self, path: &str) -> Result<String> {
        let key = self.entry_key(path)?;
        let dir = paths::resolve(&self.media_root, &key)?;

        self.recent.record(&key);
        tokio::fs::create_dir(&dir).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                LibraryError::Conflict(format!("'{key}' already exists"))
            } else {
                err.into()
            }
        })?;

        let visibility = self.default_visibility().await;
        self.apply_metadata("create_folder", &key, |bundle| {
            bundle.folders.entry(key.clone()).or_insert_with(|| {
                let mut folder = FolderMetadata {
                    visibility,
                    ..FolderMetadata::default()
                };
                folder.touch();
                folder
            });
            append_to_parent(bundle, &key, MetadataKind::Folder);
            Ok(())
        })
        .await;
        info!(path = %key, "folder created");
        Ok(key)
    }

    /// Remove the directory recursively together with all metadata nested
    /// under it.
    pub async fn delete_folder(&self, path: &str) -> Result<()> {
        let key = self.entry_key(path)?;
        let dir = paths::resolve(&self.media_root, &key)?;
        self.require_dir(&dir, &key).await?;

        self.recent.record(&key);
        tokio::fs::remove_dir_all(&dir).await?;

        self.apply_metadata("delete_folder", &key, |bundle| {
            let removed = remove_subtree(bundle, &key);
            prune_parent(bundle, &key, MetadataKind::Folder);
            debug!(path = %key, removed, "folder metadata removed");
            Ok(())
        })
        .await;
        info!(path = %key, "folder deleted");
        Ok(())
    }

    /// Rename a folder in place. Every key under the old path moves to the
    /// new one, and so does every stored reference to those keys.
    pub async fn rename_folder(
        &self,
        path: &str,
        new_name: &str,
    ) -> Result<String> {
        let key = self.entry_key(path)?;
        let new_name = paths::validate_name(new_name)?;
        let new_key = paths::join(paths::parent_of(&key), new_name);
        let from = paths::resolve(&self.media_root, &key)?;
        let to = paths::resolve(&self.media_root, &new_key)?;
        self.require_dir(&from, &key).await?;
        if new_key == key {
            return Ok(new_key);
        }
        self.require_free(&to, &new_key).await?;

        self.recent.record(&key);
        self.recent.record(&new_key);
        tokio::fs::rename(&from, &to).await?;

        self.apply_metadata("rename_folder", &key, |bundle| {
            relocate_keys(bundle, &key, &new_key, MetadataKind::Folder);
            Ok(())
        })
        .await;
        info!(from = %key, to = %new_key, "folder renamed");
        Ok(new_key)
    }

    /// Move a media file into `dest_folder`, keeping its file name.
    pub async fn move_media(
        &self,
        path: &str,
        dest_folder: &str,
    ) -> Result<String> {
        let key = self.media_key(path)?;
        let dest = self.folder_key(dest_folder)?;
        let dest_dir = paths::resolve(&self.media_root, &dest)?;
        self.require_dir(&dest_dir, &dest).await?;
        let new_key = paths::join(&dest, paths::file_name(&key));
        self.relocate_media(key, new_key).await
    }

    /// Rename a media file within its folder.
    pub async fn rename_media(
        &self,
        path: &str,
        new_name: &str,
    ) -> Result<String> {
        let key = self.media_key(path)?;
        let new_name = paths::validate_name(new_name)?;
        if !MediaKind::is_media(new_name) {
            return Err(LibraryError::Validation(format!(
                "'{new_name}' does not have a media file extension"
            )));
        }
        let new_key = paths::join(paths::parent_of(&key), new_name);
        self.relocate_media(key, new_key).await
    }

    pub async fn delete_media(&self, path: &str) -> Result<()> {
        let key = self.media_key(path)?;
        let file = paths::resolve(&self.media_root, &key)?;
        self.require_file(&file, &key).await?;

        self.recent.record(&key);
        tokio::fs::remove_file(&file).await?;

        self.apply_metadata("delete_media", &key, |bundle| {
            bundle.medias.remove(&key);
            prune_parent(bundle, &key, MetadataKind::Media);
            Ok(())
        })
        .await;
        info!(path = %key, "media deleted");
        Ok(())
    }

    /// Store an uploaded file in `folder` under a sanitised, collision-free
    /// name. Returns the assigned key.
    pub async fn save_media(
        &self,
        folder: &str,
        bytes: &[u8],
        original_name: &str,
    ) -> Result<String> {
        let folder = self.folder_key(folder)?;
        let name = sanitize_file_name(original_name)?;
        let dir = paths::resolve(&self.media_root, &folder)?;
        self.require_dir(&dir, &folder).await?;

        let (key, mut file) = self.create_unique(&folder, &name).await?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let path = paths::resolve(&self.media_root, &key)?;
            let _ = tokio::fs::remove_file(path).await;
            return Err(err.into());
        }

        let visibility = self.default_visibility().await;
        self.apply_metadata("save_media", &key, |bundle| {
            bundle.medias.entry(key.clone()).or_insert_with(|| {
                let mut media = MediaMetadata {
                    visibility,
                    ..MediaMetadata::default()
                };
                media.touch();
                media
            });
            append_to_parent(bundle, &key, MetadataKind::Media);
            Ok(())
        })
        .await;
        info!(path = %key, size = bytes.len(), "media saved");
        Ok(key)
    }

    /// Replace the explicit order of child folders under `parent`. Entries
    /// that are not current child folders are dropped, as are duplicates.
    pub async fn order_folders(
        &self,
        parent: &str,
        order: &[String],
    ) -> Result<FolderMetadata> {
        self.set_order(parent, order, MetadataKind::Folder).await
    }

    /// Media counterpart of [`MutationService::order_folders`].
    pub async fn order_medias(
        &self,
        parent: &str,
        order: &[String],
    ) -> Result<FolderMetadata> {
        self.set_order(parent, order, MetadataKind::Media).await
    }

    /// Merge `patch` into the metadata of an existing folder.
    pub async fn update_folder_metadata(
        &self,
        path: &str,
        patch: &Value,
    ) -> Result<FolderMetadata> {
        let key = paths::validate_key(path)?;
        let dir = paths::resolve(&self.media_root, &key)?;
        self.require_dir(&dir, &key).await?;
        let folder = self.store.upsert_folder(&key, patch, true).await?;
        self.cache.invalidate();
        Ok(folder)
    }

    /// Merge `patch` into the metadata of an existing media file.
    pub async fn update_media_metadata(
        &self,
        path: &str,
        patch: &Value,
    ) -> Result<MediaMetadata> {
        let key = self.media_key(path)?;
        let file = paths::resolve(&self.media_root, &key)?;
        self.require_file(&file, &key).await?;
        let media = self.store.upsert_media(&key, patch, true).await?;
        self.cache.invalidate();
        Ok(media)
    }

    async fn relocate_media(
        &self,
        key: String,
        new_key: String,
    ) -> Result<String> {
        let from = paths::resolve(&self.media_root, &key)?;
        let to = paths::resolve(&self.media_root, &new_key)?;
        self.require_file(&from, &key).await?;
        if new_key == key {
            return Ok(new_key);
        }
        self.require_free(&to, &new_key).await?;

        self.recent.record(&key);
        self.recent.record(&new_key);
        tokio::fs::rename(&from, &to).await?;

        self.apply_metadata("relocate_media", &key, |bundle| {
            relocate_keys(bundle, &key, &new_key, MetadataKind::Media);
            Ok(())
        })
        .await;
        info!(from = %key, to = %new_key, "media relocated");
        Ok(new_key)
    }

    async fn set_order(
        &self,
        parent: &str,
        order: &[String],
        kind: MetadataKind,
    ) -> Result<FolderMetadata> {
        let parent = self.folder_key(parent)?;
        let dir = paths::resolve(&self.media_root, &parent)?;
        self.require_dir(&dir, &parent).await?;

        let children = self.list_children(&dir, &parent, kind).await?;
        let filtered: Vec<String> = order
            .iter()
            .map(|entry| paths::normalize(entry))
            .filter(|entry| children.contains(entry))
            .collect();
        if filtered.len() < order.len() {
            debug!(
                parent = %parent,
                dropped = order.len() - filtered.len(),
                "dropped order entries that are not children"
            );
        }

        let folder = self
            .store
            .modify::<FolderMetadata>(&parent, |folder| {
                folder.set_order(kind, filtered);
            })
            .await?;
        self.cache.invalidate();
        Ok(folder)
    }

    /// Current child keys of `kind` under the directory `dir`.
    async fn list_children(
        &self,
        dir: &Path,
        parent: &str,
        kind: MetadataKind,
    ) -> Result<BTreeSet<String>> {
        let mut children = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || self.excluded.contains(&entry.path()) {
                continue;
            }
            let file_type = entry.file_type().await?;
            let wanted = match kind {
                MetadataKind::Folder => file_type.is_dir(),
                MetadataKind::Media => {
                    file_type.is_file() && MediaKind::is_media(&name)
                }
            };
            if wanted {
                children.insert(paths::join(parent, &name));
            }
        }
        Ok(children)
    }

    /// Claim a free name in `folder`, starting from `name` and appending
    /// `-1`, `-2`, ... before the extension.
    async fn create_unique(
        &self,
        folder: &str,
        name: &str,
    ) -> Result<(String, tokio::fs::File)> {
        let stem = Path::new(name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(name);
        let extension = Path::new(name).extension().and_then(|ext| ext.to_str());

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = match (attempt, extension) {
                (0, _) => name.to_string(),
                (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (n, None) => format!("{stem}-{n}"),
            };
            let key = paths::join(folder, &candidate);
            let path = paths::resolve(&self.media_root, &key)?;
            self.recent.record(&key);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((key, file)),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(LibraryError::Conflict(format!(
            "no free name for '{name}' in '{folder}'"
        )))
    }

    /// Run the metadata half of an operation whose disk half already
    /// happened. Failures are logged, not returned.
    async fn apply_metadata(
        &self,
        operation: &'static str,
        key: &str,
        apply: impl FnOnce(&mut MetadataBundle) -> Result<()>,
    ) {
        if let Err(err) = self.store.update(apply).await {
            warn!(
                operation,
                path = %key,
                "metadata update failed after the filesystem change: {err}"
            );
        }
        self.cache.invalidate();
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

    /// Validated, non-root key for a folder or media entry.
    fn entry_key(&self, path: &str) -> Result<String> {
        let key = paths::validate_key(path)?;
        if key.is_empty() {
            return Err(LibraryError::Validation(
                "the library root cannot be changed".into(),
            ));
        }
        paths::validate_name(paths::file_name(&key))?;
        reject_hidden(&key)?;
        Ok(key)
    }

    /// A destination folder; the root is allowed, hidden folders are not.
    fn folder_key(&self, path: &str) -> Result<String> {
        let key = paths::validate_key(path)?;
        reject_hidden(&key)?;
        Ok(key)
    }

    fn media_key(&self, path: &str) -> Result<String> {
        let key = self.entry_key(path)?;
        if !MediaKind::is_media(&key) {
            return Err(LibraryError::Validation(format!(
                "'{key}' is not a media file"
            )));
        }
        Ok(key)
    }

    async fn require_dir(&self, dir: &Path, key: &str) -> Result<()> {
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(LibraryError::NotFound(format!(
                "'{key}' is not a folder"
            ))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                LibraryError::NotFound(format!("folder '{key}' does not exist")),
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn require_file(&self, file: &Path, key: &str) -> Result<()> {
        match tokio::fs::metadata(file).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(LibraryError::NotFound(format!(
                "'{key}' is not a file"
            ))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                LibraryError::NotFound(format!("media '{key}' does not exist")),
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn require_free(&self, path: &Path, key: &str) -> Result<()> {
        if tokio::fs::try_exists(path).await? {
            return Err(LibraryError::Conflict(format!(
                "'{key}' already exists"
            )));
        }
        Ok(())
    }
}

/// Final path component of an uploaded file name, trimmed, with every
/// whitespace run collapsed into `_`.
pub fn sanitize_file_name(original: &str) -> Result<String> {
    let last = original.rsplit(['/', '\\']).next().unwrap_or(original);
    let name = last.split_whitespace().collect::<Vec<_>>().join("_");
    if name.is_empty() || name == "." || name == ".." {
        return Err(LibraryError::Validation(format!(
            "'{original}' is not a usable file name"
        )));
    }
    if name.starts_with('.') {
        return Err(LibraryError::Validation(format!(
            "'{name}' would be a hidden file"
        )));
    }
    if !MediaKind::is_media(&name) {
        return Err(LibraryError::Validation(format!(
            "'{name}' does not have a media file extension"
        )));
    }
    Ok(name)
}

/// Move every record at or under `old` to the same place under `new`, and
/// rewrite every stored reference to those keys: order lists, cover media
/// and `image` attributes. Records keep their timestamps.
pub(crate) fn relocate_keys(
    bundle: &mut MetadataBundle,
    old: &str,
    new: &str,
    moved_kind: MetadataKind,
) {
    let same_parent = paths::parent_of(old) == paths::parent_of(new);

    // A watcher event may have created a record at the destination before
    // this runs. The moved record wins; fresh derivatives are kept.
    let (moved, mut folders) =
        split_moved(std::mem::take(&mut bundle.folders), old, new);
    folders.extend(moved);
    bundle.folders = folders;

    let (moved, mut medias) =
        split_moved(std::mem::take(&mut bundle.medias), old, new);
    for (key, mut media) in moved {
        if let Some(existing) = medias.remove(&key)
            && !existing.thumbnails.is_empty()
        {
            media.thumbnails = existing.thumbnails;
            media.width = existing.width;
            media.height = existing.height;
            media.orientation = existing.orientation;
        }
        medias.insert(key, media);
    }
    bundle.medias = medias;

    for folder in bundle.folders.values_mut() {
        for kind in [MetadataKind::Folder, MetadataKind::Media] {
            // Within one folder the entry keeps its slot; across folders it
            // leaves the source order here and joins the destination below.
            if !same_parent && kind == moved_kind {
                folder.remove_from_order(kind, old);
            }
            if let Some(order) = folder.order(kind) {
                let rebased: Vec<String> = order
                    .iter()
                    .map(|entry| {
                        paths::rebase(entry, old, new)
                            .unwrap_or_else(|| entry.clone())
                    })
                    .collect();
                if rebased != order {
                    folder.set_order(kind, rebased);
                }
            }
        }
        if let Some(cover) = &folder.cover_media
            && let Some(rebased) = rebase_ref(cover, old, new)
        {
            folder.cover_media = Some(rebased);
        }
        rebase_attributes(folder.attributes.values_mut(), old, new);
    }
    for media in bundle.medias.values_mut() {
        rebase_attributes(media.attributes.values_mut(), old, new);
    }

    if !same_parent {
        append_to_parent(bundle, new, moved_kind);
    }
}

/// Hidden entries never carry metadata, so they cannot be mutation targets.
fn reject_hidden(key: &str) -> Result<()> {
    if paths::is_hidden(key) {
        return Err(LibraryError::Validation(format!(
            "'{key}' is a hidden entry"
        )));
    }
    Ok(())
}

/// Separate the records at or under `old` (rekeyed under `new`) from the
/// rest.
fn split_moved<T>(
    records: BTreeMap<String, T>,
    old: &str,
    new: &str,
) -> (Vec<(String, T)>, BTreeMap<String, T>) {
    let mut moved = Vec::new();
    let mut rest = BTreeMap::new();
    for (key, record) in records {
        match paths::rebase(&key, old, new) {
            Some(rebased) => moved.push((rebased, record)),
            None => {
                rest.insert(key, record);
            }
        }
    }
    (moved, rest)
}

fn rebase_attributes<'a>(
    attributes: impl Iterator<Item = &'a mut AttributeValue>,
    old: &str,
    new: &str,
) {
    for attribute in attributes {
        if let AttributeValue::Image { value } = attribute
            && let Some(rebased) = rebase_ref(value, old, new)
        {
            *value = rebased;
        }
    }
}

/// Rebase a stored media reference, keeping a leading `/` if it had one.
fn rebase_ref(value: &str, old: &str, new: &str) -> Option<String> {
    let (prefix, key) = match value.strip_prefix('/') {
        Some(rest) => ("/", rest),
        None => ("", value),
    };
    paths::rebase(key, old, new).map(|rebased| format!("{prefix}{rebased}"))
}
