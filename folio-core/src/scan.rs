use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use folio_model::MediaKind;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{LibraryError, Result};
use crate::paths;

/// Folder and media keys found on disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DiskTree {
    pub folders: BTreeSet<String>,
    pub medias: BTreeSet<String>,
}

/// Walk `start` (a directory under `root`) recursively. Hidden entries and
/// `excluded` directories are skipped along with everything below them;
/// only media files are collected. Blocking: call from the blocking pool.
pub(crate) fn walk_library(
    root: &Path,
    start: &Path,
    excluded: &[PathBuf],
) -> Result<DiskTree> {
    if !std::fs::metadata(start)?.is_dir() {
        return Err(LibraryError::NotFound(format!(
            "{} is not a directory",
            start.display()
        )));
    }
    let mut tree = DiskTree::default();
    let walker = WalkDir::new(start)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let skipped = excluded.iter().any(|dir| entry.path() == dir);
            !hidden && !skipped
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                let message = err.to_string();
                return Err(err
                    .into_io_error()
                    .map(LibraryError::Io)
                    .unwrap_or(LibraryError::Internal(message)));
            }
            Err(err) => {
                warn!(root = %root.display(), "skipping unreadable entry: {err}");
                continue;
            }
        };
        let Some(key) = paths::relative_key(root, entry.path()) else {
            continue;
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            tree.folders.insert(key);
        } else if file_type.is_file() && MediaKind::is_media(&key) {
            tree.medias.insert(key);
        }
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_visible_folders_and_media_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("trips/2024")).unwrap();
        std::fs::create_dir_all(root.join(".trash")).unwrap();
        std::fs::create_dir_all(root.join("_thumbs/trips")).unwrap();
        std::fs::write(root.join("trips/2024/a.JPG"), b"x").unwrap();
        std::fs::write(root.join("trips/notes.txt"), b"x").unwrap();
        std::fs::write(root.join(".trash/b.jpg"), b"x").unwrap();
        std::fs::write(root.join("_thumbs/trips/a_thumb.webp"), b"x").unwrap();

        let tree =
            walk_library(root, root, &[root.join("_thumbs")]).unwrap();
        assert_eq!(
            tree.folders.into_iter().collect::<Vec<_>>(),
            vec!["trips", "trips/2024"]
        );
        assert_eq!(
            tree.medias.into_iter().collect::<Vec<_>>(),
            vec!["trips/2024/a.JPG"]
        );
    }

    #[test]
    fn missing_start_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(walk_library(dir.path(), &missing, &[]).is_err());
    }
}
