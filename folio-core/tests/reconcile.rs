mod common;

use std::sync::Arc;

use common::{Fixture, keys};
use folio_core::{TreeView, WatchEvent, WatchEventKind};
use folio_model::{MetadataKind, Visibility};
use serde_json::json;

#[tokio::test]
async fn concurrent_reconciles_share_one_walk_and_one_report() {
    let fx = Fixture::new();
    fx.touch("a/one.jpg");
    fx.touch("b/two.png");
    let library = fx.open().await;
    let reconciler = library.reconciler();

    let (first, second) =
        tokio::join!(reconciler.reconcile(), reconciler.reconcile());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(reconciler.walk_count(), 1);
    assert_eq!(first.created_folders, 2);
    assert_eq!(first.created_medias, 2);

    // Once settled, the next call is a fresh pass with nothing to do.
    let third = reconciler.reconcile().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(reconciler.walk_count(), 2);
    assert!(!third.changed());
}

#[tokio::test]
async fn reconcile_heals_both_directions() {
    let fx = Fixture::new();
    fx.touch("keep/a.jpg");
    fx.touch("keep/new.jpg");
    fx.touch("keep/readme.txt");
    fx.touch(".hidden/secret.jpg");
    let library = fx.open().await;
    let store = library.store();

    store
        .upsert_folder("gone", &json!({"title": "Gone"}), true)
        .await
        .unwrap();
    store
        .upsert_media("gone/x.jpg", &json!({}), true)
        .await
        .unwrap();
    store
        .upsert_media("keep/a.jpg", &json!({"title": "A"}), true)
        .await
        .unwrap();
    store
        .upsert_folder(
            "keep",
            &json!({"mediaOrder": ["keep/a.jpg", "keep/deleted.jpg"]}),
            true,
        )
        .await
        .unwrap();

    let orphans = library.orphans().await.unwrap();
    assert_eq!(
        orphans.metadata_without_files.folders.iter().collect::<Vec<_>>(),
        vec!["gone"]
    );
    assert_eq!(
        orphans.files_without_metadata.medias.iter().collect::<Vec<_>>(),
        vec!["keep/new.jpg"]
    );

    let report = library.reconciler().reconcile().await.unwrap();
    assert_eq!(report.orphans, orphans);
    assert_eq!(report.removed_folders, 1);
    assert_eq!(report.removed_medias, 1);
    assert_eq!(report.created_medias, 1);
    assert_eq!(report.order_entries_pruned, 1);
    assert_eq!(report.order_entries_appended, 1);

    let bundle = store.read_all().await.unwrap();
    assert!(!bundle.folders.contains_key("gone"));
    assert!(!bundle.medias.contains_key("gone/x.jpg"));
    assert_eq!(bundle.medias["keep/a.jpg"].title.as_deref(), Some("A"));
    assert!(!bundle.medias.keys().any(|key| key.contains(".hidden")));
    assert!(!bundle.medias.contains_key("keep/readme.txt"));
    assert_eq!(
        bundle.folders["keep"].order(MetadataKind::Media),
        Some(&keys(&["keep/a.jpg", "keep/new.jpg"])[..])
    );

    let again = library.reconciler().reconcile().await.unwrap();
    assert!(again.orphans.is_clean());
    assert!(!again.changed());
}

#[tokio::test]
async fn new_records_follow_the_default_visibility_setting() {
    let fx = Fixture::new();
    fx.touch("drafts/a.jpg");
    let library = fx.open().await;
    library
        .store()
        .update_settings(&json!({"defaultVisibility": "private"}))
        .await
        .unwrap();

    library.reconciler().reconcile().await.unwrap();

    let folder = library.store().get_folder("drafts").await.unwrap().unwrap();
    assert_eq!(folder.visibility, Visibility::Private);
    let public = library.tree(TreeView::Public).await.unwrap();
    assert!(public.folders.is_empty());
    let admin = library.tree(TreeView::Admin).await.unwrap();
    assert_eq!(admin.media_count(), 1);
}

#[tokio::test]
async fn watcher_events_update_single_records() {
    let fx = Fixture::new();
    fx.mkdir("album");
    let library = fx.open().await;
    let reconciler = library.reconciler();
    reconciler.reconcile().await.unwrap();

    fx.touch("album/a.jpg");
    fx.touch("album/b.jpg");
    library
        .mutations()
        .order_medias("album", &keys(&["album/b.jpg"]))
        .await
        .unwrap();

    let handle = reconciler
        .handle_event(WatchEvent::new(WatchEventKind::Add, "album/a.jpg"))
        .expect("add is handled");
    handle.await.unwrap();
    let album = library.store().get_folder("album").await.unwrap().unwrap();
    assert_eq!(
        album.order(MetadataKind::Media),
        Some(&keys(&["album/b.jpg", "album/a.jpg"])[..])
    );
    assert!(library.store().get_media("album/a.jpg").await.unwrap().is_some());

    std::fs::remove_file(fx.path("album/b.jpg")).unwrap();
    reconciler
        .handle_event(WatchEvent::new(WatchEventKind::Unlink, "album/b.jpg"))
        .expect("unlink is handled")
        .await
        .unwrap();
    let album = library.store().get_folder("album").await.unwrap().unwrap();
    assert_eq!(
        album.order(MetadataKind::Media),
        Some(&keys(&["album/a.jpg"])[..])
    );
    assert!(library.store().get_media("album/b.jpg").await.unwrap().is_none());
}

#[tokio::test]
async fn directory_events_heal_their_subtrees() {
    let fx = Fixture::new();
    let library = fx.open().await;
    let reconciler = library.reconciler();
    reconciler.reconcile().await.unwrap();

    fx.touch("dropped/in/photo.jpg");
    reconciler
        .handle_event(WatchEvent::new(WatchEventKind::AddDir, "dropped"))
        .expect("addDir is handled")
        .await
        .unwrap();
    let bundle = library.store().read_all().await.unwrap();
    assert!(bundle.folders.contains_key("dropped"));
    assert!(bundle.folders.contains_key("dropped/in"));
    assert!(bundle.medias.contains_key("dropped/in/photo.jpg"));

    std::fs::remove_dir_all(fx.path("dropped")).unwrap();
    reconciler
        .handle_event(WatchEvent::new(WatchEventKind::UnlinkDir, "dropped"))
        .expect("unlinkDir is handled")
        .await
        .unwrap();
    let bundle = library.store().read_all().await.unwrap();
    assert!(bundle.folders.keys().all(|key| !key.starts_with("dropped")));
    assert!(bundle.medias.is_empty());
}

#[tokio::test]
async fn hidden_and_duplicate_events_are_dropped() {
    let fx = Fixture::new();
    fx.touch("a.jpg");
    let library = fx.open().await;
    let reconciler = library.reconciler();

    assert!(
        reconciler
            .handle_event(WatchEvent::new(WatchEventKind::Add, ".cache/a.jpg"))
            .is_none()
    );

    let first =
        reconciler.handle_event(WatchEvent::new(WatchEventKind::Add, "a.jpg"));
    let second =
        reconciler.handle_event(WatchEvent::new(WatchEventKind::Add, "a.jpg"));
    assert!(first.is_some());
    assert!(second.is_none());
    first.unwrap().await.unwrap();

    // A different event type for the same path is its own key.
    let unlink = reconciler
        .handle_event(WatchEvent::new(WatchEventKind::Unlink, "a.jpg"));
    assert!(unlink.is_some());
    unlink.unwrap().await.unwrap();
    // The file still exists, so the unlink changed nothing.
    assert!(library.store().get_media("a.jpg").await.unwrap().is_some());
}

#[tokio::test]
async fn files_dropped_into_a_folder_we_created_are_picked_up() {
    let fx = Fixture::new();
    let library = fx.open().await;
    let reconciler = library.reconciler();
    reconciler.reconcile().await.unwrap();

    library.mutations().create_folder("fresh").await.unwrap();
    assert!(
        reconciler
            .handle_event(WatchEvent::new(WatchEventKind::AddDir, "fresh"))
            .is_none()
    );

    fx.touch("fresh/a.jpg");
    reconciler
        .handle_event(WatchEvent::new(WatchEventKind::Add, "fresh/a.jpg"))
        .expect("an external add under a new folder is handled")
        .await
        .unwrap();
    assert!(library.store().get_media("fresh/a.jpg").await.unwrap().is_some());

    fx.touch("fresh/sub/b.jpg");
    reconciler
        .handle_event(WatchEvent::new(WatchEventKind::AddDir, "fresh/sub"))
        .expect("an external directory under a new folder is handled")
        .await
        .unwrap();
    let bundle = library.store().read_all().await.unwrap();
    assert!(bundle.folders.contains_key("fresh/sub"));
    assert!(bundle.medias.contains_key("fresh/sub/b.jpg"));
}
