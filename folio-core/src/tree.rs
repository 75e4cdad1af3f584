//! Read-side composition of the library tree.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use folio_model::{
    FolderMetadata, FolderNode, MediaKind, MediaNode, MetadataBundle,
    MetadataKind, Visibility,
};
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::cache::ReadCache;
use crate::error::Result;
use crate::paths;
use crate::scan::{DiskTree, walk_library};
use crate::store::MetadataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeView {
    /// Everything on disk.
    Admin,
    /// Private folders (with their subtrees) and private medias omitted.
    Public,
}

pub type TreeCache = ReadCache<TreeView, FolderNode>;

/// Composes the filesystem listing with metadata into a [`FolderNode`]
/// tree, served from the shared read cache while it is fresh.
pub struct LibraryTreeBuilder {
    media_root: PathBuf,
    excluded: Vec<PathBuf>,
    store: Arc<MetadataStore>,
    cache: Arc<TreeCache>,
}

impl fmt::Debug for LibraryTreeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryTreeBuilder")
            .field("media_root", &self.media_root)
            .field("excluded", &self.excluded)
            .field("cache", &self.cache)
            .finish()
    }
}

impl LibraryTreeBuilder {
    pub fn new(
        media_root: PathBuf,
        excluded: Vec<PathBuf>,
        store: Arc<MetadataStore>,
        cache: Arc<TreeCache>,
    ) -> Self {
        Self {
            media_root,
            excluded,
            store,
            cache,
        }
    }

    pub async fn build(&self, view: TreeView) -> Result<Arc<FolderNode>> {
        if let Some(tree) = self.cache.get(&view) {
            return Ok(tree);
        }

        let generation = self.cache.generation();
        let root = self.media_root.clone();
        let excluded = self.excluded.clone();
        let disk =
            spawn_blocking(move || walk_library(&root, &root, &excluded))
                .await??;
        let bundle = self.store.read_all().await?;

        let tree = Arc::new(compose_tree(&disk, &bundle, view));
        if !self.cache.insert(generation, view, Arc::clone(&tree)) {
            debug!(?view, "tree changed while building, not cached");
        }
        Ok(tree)
    }
}

/// Pure composition step, separated from I/O for testing.
pub(crate) fn compose_tree(
    disk: &DiskTree,
    bundle: &MetadataBundle,
    view: TreeView,
) -> FolderNode {
    let mut folder_children: HashMap<&str, Vec<&str>> = HashMap::new();
    for key in &disk.folders {
        folder_children
            .entry(paths::parent_of(key))
            .or_default()
            .push(key);
    }
    let mut media_children: HashMap<&str, Vec<&str>> = HashMap::new();
    for key in &disk.medias {
        media_children
            .entry(paths::parent_of(key))
            .or_default()
            .push(key);
    }

    let composer = Composer {
        bundle,
        view,
        folder_children,
        media_children,
    };
    composer.folder("")
}

struct Composer<'a> {
    bundle: &'a MetadataBundle,
    view: TreeView,
    folder_children: HashMap<&'a str, Vec<&'a str>>,
    media_children: HashMap<&'a str, Vec<&'a str>>,
}

impl Composer<'_> {
    fn folder(&self, key: &str) -> FolderNode {
        let metadata = self.bundle.folders.get(key);

        let mut folders: Vec<FolderNode> = self
            .folder_children
            .get(key)
            .into_iter()
            .flatten()
            .filter(|child| {
                let meta = self.bundle.folders.get(**child);
                self.visible(meta.map(|m| m.visibility))
            })
            .map(|child| self.folder(child))
            .collect();
        sort_nodes(
            &mut folders,
            metadata,
            MetadataKind::Folder,
            |node| (&node.path, node.display_name()),
        );

        let mut medias: Vec<MediaNode> = self
            .media_children
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|child| self.media(child))
            .collect();
        sort_nodes(&mut medias, metadata, MetadataKind::Media, |node| {
            (&node.path, node.display_name())
        });

        FolderNode {
            path: key.to_string(),
            name: paths::file_name(key).to_string(),
            metadata: metadata.cloned(),
            folders,
            medias,
        }
    }

    fn media(&self, key: &str) -> Option<MediaNode> {
        let metadata = self.bundle.medias.get(key);
        if !self.visible(metadata.map(|m| m.visibility)) {
            return None;
        }
        let kind = MediaKind::from_path(key)?;
        Some(MediaNode {
            path: key.to_string(),
            name: paths::file_name(key).to_string(),
            kind,
            metadata: metadata.cloned(),
        })
    }

    fn visible(&self, visibility: Option<Visibility>) -> bool {
        match self.view {
            TreeView::Admin => true,
            TreeView::Public => {
                visibility.unwrap_or_default() == Visibility::Public
            }
        }
    }
}

/// Explicitly ordered entries first (in list order), then the rest by
/// case-insensitive display name.
fn sort_nodes<T>(
    nodes: &mut [T],
    parent: Option<&FolderMetadata>,
    kind: MetadataKind,
    describe: impl Fn(&T) -> (&String, &str),
) {
    let positions: BTreeMap<&str, usize> = parent
        .and_then(|meta| meta.order(kind))
        .map(|order| {
            order
                .iter()
                .enumerate()
                .map(|(index, key)| (key.as_str(), index))
                .collect()
        })
        .unwrap_or_default();

    nodes.sort_by_cached_key(|node| {
        let (path, name) = describe(node);
        let position = positions.get(path.as_str()).copied();
        (
            position.is_none(),
            position.unwrap_or(usize::MAX),
            name.to_lowercase(),
            path.clone(),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_model::MediaMetadata;

    fn disk(folders: &[&str], medias: &[&str]) -> DiskTree {
        DiskTree {
            folders: folders.iter().map(|s| s.to_string()).collect(),
            medias: medias.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn titled(title: &str) -> MediaMetadata {
        MediaMetadata {
            title: Some(title.into()),
            ..MediaMetadata::default()
        }
    }

    #[test]
    fn medias_sort_by_order_then_display_name() {
        let disk = disk(&["g"], &["g/a.jpg", "g/b.jpg", "g/c.jpg", "g/d.jpg"]);
        let mut bundle = MetadataBundle::default();
        let mut folder = FolderMetadata::default();
        folder.set_order(MetadataKind::Media, vec!["g/c.jpg".into()]);
        bundle.folders.insert("g".into(), folder);
        // "zebra" sorts after "b.jpg"/"d.jpg"; "Apple" before them.
        bundle.medias.insert("g/a.jpg".into(), titled("zebra"));
        bundle.medias.insert("g/d.jpg".into(), titled("Apple"));

        let tree = compose_tree(&disk, &bundle, TreeView::Admin);
        let gallery = tree.find_folder("g").unwrap();
        let order: Vec<_> =
            gallery.medias.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(order, vec!["g/c.jpg", "g/d.jpg", "g/b.jpg", "g/a.jpg"]);
    }

    #[test]
    fn folders_use_titles_case_insensitively() {
        let disk = disk(&["b", "a", "c"], &[]);
        let mut bundle = MetadataBundle::default();
        bundle.folders.insert(
            "c".into(),
            FolderMetadata {
                title: Some("aardvark".into()),
                ..FolderMetadata::default()
            },
        );
        let tree = compose_tree(&disk, &bundle, TreeView::Admin);
        let names: Vec<_> = tree.folders.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }

    #[test]
    fn public_view_hides_private_subtrees() {
        let disk = disk(&["open", "secret", "secret/inner"], &[
            "open/a.jpg",
            "open/b.jpg",
            "secret/inner/c.jpg",
        ]);
        let mut bundle = MetadataBundle::default();
        bundle.folders.insert(
            "secret".into(),
            FolderMetadata {
                visibility: Visibility::Private,
                ..FolderMetadata::default()
            },
        );
        bundle.medias.insert(
            "open/b.jpg".into(),
            MediaMetadata {
                visibility: Visibility::Private,
                ..MediaMetadata::default()
            },
        );

        let public = compose_tree(&disk, &bundle, TreeView::Public);
        assert_eq!(public.folders.len(), 1);
        assert_eq!(public.media_count(), 1);

        let admin = compose_tree(&disk, &bundle, TreeView::Admin);
        assert_eq!(admin.media_count(), 3);
        assert!(admin.find_folder("secret/inner").is_some());
    }
}
