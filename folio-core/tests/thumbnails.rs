mod common;

use common::Fixture;
use folio_core::{LibraryError, WatchEvent, WatchEventKind};
use folio_model::{
    EncodedFormat, Orientation, OutputFormat, SourceRemovalPolicy,
    ThumbnailPreset,
};
use serde_json::json;

#[tokio::test]
async fn generation_writes_variants_and_records_them() {
    let fx = Fixture::new();
    fx.write_thumbnail_config(&Fixture::small_presets());
    fx.image("trips/wide.png", 64, 32);
    let library = fx.open().await;

    let media = library
        .thumbnails()
        .generate("trips/wide.png")
        .await
        .unwrap()
        .expect("generated");

    assert_eq!((media.width, media.height), (Some(64), Some(32)));
    assert_eq!(media.orientation, Some(Orientation::Horizontal));

    let thumb = &media.thumbnails["thumb"];
    assert_eq!((thumb.width, thumb.height), (16, 8));
    assert_eq!(thumb.default, "trips/wide_thumb.webp");
    assert_eq!(thumb.sources.len(), 1);
    assert_eq!(thumb.sources[0].format, EncodedFormat::Webp);
    assert!(thumb.sources[0].size > 0);

    let card = &media.thumbnails["card"];
    assert_eq!((card.width, card.height), (12, 8));

    let root = fx.thumbnails_dir();
    let decoded = image::open(root.join("trips/wide_thumb.webp")).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (16, 8));
    assert!(root.join("trips/wide_card.webp").is_file());

    let stored = library
        .store()
        .get_media("trips/wide.png")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, media);
}

#[tokio::test]
async fn generation_preserves_user_fields() {
    let fx = Fixture::new();
    fx.write_thumbnail_config(&Fixture::small_presets());
    fx.image("tall.png", 20, 40);
    let library = fx.open().await;
    library
        .store()
        .upsert_media(
            "tall.png",
            &json!({"title": "Tall", "tags": ["x"]}),
            true,
        )
        .await
        .unwrap();

    let media = library
        .thumbnails()
        .generate("tall.png")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(media.title.as_deref(), Some("Tall"));
    assert_eq!(media.tags, vec!["x".to_string()]);
    assert_eq!(media.orientation, Some(Orientation::Vertical));
    // Width-only preset on a vertical source: square crop.
    let thumb = &media.thumbnails["thumb"];
    assert_eq!((thumb.width, thumb.height), (16, 16));
}

#[tokio::test]
async fn duplicate_add_events_run_one_generation() {
    let fx = Fixture::new();
    fx.write_thumbnail_config(&Fixture::small_presets());
    fx.image("burst.png", 32, 32);
    let library = fx.open().await;
    let pipeline = library.thumbnails();

    let add = WatchEvent::new(WatchEventKind::Add, "burst.png");
    let first = pipeline.handle_event(add.clone());
    let second = pipeline.handle_event(add);
    assert!(first.is_some());
    assert!(second.is_none());
    first.unwrap().await.unwrap();

    let stats = pipeline.stats();
    assert_eq!(stats.started, 1);
    assert_eq!(stats.coalesced, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.in_flight, 0);

    // Settled: a later trigger runs again.
    let change = WatchEvent::new(WatchEventKind::Change, "burst.png");
    let again = pipeline.handle_event(change);
    again.expect("not coalesced").await.unwrap();
    assert_eq!(pipeline.stats().started, 2);
}

#[tokio::test]
async fn non_sources_are_ignored() {
    let fx = Fixture::new();
    fx.touch("clip.mp4");
    fx.touch("cover.avif");
    let library = fx.open().await;
    let pipeline = library.thumbnails();

    assert!(
        pipeline
            .handle_event(WatchEvent::new(WatchEventKind::Add, "clip.mp4"))
            .is_none()
    );
    assert_eq!(pipeline.generate("cover.avif").await.unwrap(), None);
    assert_eq!(pipeline.stats().started, 0);
}

#[tokio::test]
async fn removing_a_source_drops_outputs_and_metadata() {
    let fx = Fixture::new();
    fx.write_thumbnail_config(&Fixture::small_presets());
    fx.image("album/a.png", 32, 24);
    let library = fx.open().await;
    let pipeline = library.thumbnails();
    pipeline.generate("album/a.png").await.unwrap().unwrap();
    assert!(fx.thumbnails_dir().join("album/a_thumb.webp").is_file());

    // Still on disk: nothing happens.
    pipeline.remove("album/a.png").await.unwrap();
    assert!(fx.thumbnails_dir().join("album/a_thumb.webp").is_file());

    std::fs::remove_file(fx.path("album/a.png")).unwrap();
    pipeline.remove("album/a.png").await.unwrap();

    assert!(!fx.thumbnails_dir().join("album/a_thumb.webp").exists());
    assert!(!fx.thumbnails_dir().join("album").exists());
    assert!(
        library
            .store()
            .get_media("album/a.png")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn clear_policy_keeps_the_record() {
    let fx = Fixture::new();
    let mut config = Fixture::small_presets();
    config.on_source_removed = SourceRemovalPolicy::ClearThumbnails;
    fx.write_thumbnail_config(&config);
    fx.image("a.png", 32, 24);
    let library = fx.open().await;
    let pipeline = library.thumbnails();
    library
        .store()
        .upsert_media("a.png", &json!({"title": "Keep me"}), true)
        .await
        .unwrap();
    pipeline.generate("a.png").await.unwrap().unwrap();

    std::fs::remove_file(fx.path("a.png")).unwrap();
    pipeline
        .handle_event(WatchEvent::new(WatchEventKind::Unlink, "a.png"))
        .expect("unlink handled")
        .await
        .unwrap();

    let media = library.store().get_media("a.png").await.unwrap().unwrap();
    assert_eq!(media.title.as_deref(), Some("Keep me"));
    assert!(media.thumbnails.is_empty());
    assert_eq!(media.width, None);
    assert_eq!(media.orientation, None);
}

#[tokio::test]
async fn decode_failures_are_counted_not_fatal() {
    let fx = Fixture::new();
    fx.write_thumbnail_config(&Fixture::small_presets());
    fx.touch("broken.jpg");
    fx.image("fine.png", 24, 24);
    let library = fx.open().await;
    let pipeline = library.thumbnails();

    let err = pipeline.generate("broken.jpg").await.unwrap_err();
    assert!(matches!(err, LibraryError::Encode(_)));
    assert!(!err.is_client_error());
    assert_eq!(pipeline.stats().failed, 1);

    let report = pipeline.rebuild_all().await.unwrap();
    assert_eq!(report.sources, 2);
    assert_eq!(report.generated, 1);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn rebuild_replaces_the_whole_derived_tree() {
    let fx = Fixture::new();
    fx.write_thumbnail_config(&Fixture::small_presets());
    fx.image("a.png", 30, 20);
    fx.image("nested/deeper/b.png", 20, 30);
    let library = fx.open().await;
    let stray = fx.thumbnails_dir().join("stale/old_thumb.webp");
    std::fs::create_dir_all(stray.parent().unwrap()).unwrap();
    std::fs::write(&stray, b"stale").unwrap();

    let report = library.thumbnails().rebuild_all().await.unwrap();
    assert_eq!(report.sources, 2);
    assert_eq!(report.generated, 2);
    assert!(!stray.exists());
    assert!(
        fx.thumbnails_dir()
            .join("nested/deeper/b_card.webp")
            .is_file()
    );
}

#[tokio::test]
async fn config_update_persists_and_regenerates() {
    let fx = Fixture::new();
    fx.write_thumbnail_config(&Fixture::small_presets());
    fx.image("a.png", 40, 20);
    let library = fx.open().await;
    let pipeline = library.thumbnails();
    pipeline.generate("a.png").await.unwrap().unwrap();

    let mut next = Fixture::small_presets();
    next.presets.clear();
    next.presets.insert("tiny".into(), ThumbnailPreset::height(5));
    next.format = OutputFormat::Webp;
    pipeline.update_config(next.clone()).await.unwrap();

    assert_eq!(*pipeline.config(), next);
    let saved: folio_model::ThumbnailConfig = serde_json::from_slice(
        &std::fs::read(fx.data.join("thumbnails.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved, next);

    assert!(!fx.thumbnails_dir().join("a_thumb.webp").exists());
    assert!(fx.thumbnails_dir().join("a_tiny.webp").is_file());
    let media = library.store().get_media("a.png").await.unwrap().unwrap();
    assert_eq!(media.thumbnails.keys().collect::<Vec<_>>(), vec!["tiny"]);
    assert_eq!(media.thumbnails["tiny"].height, 5);

    let mut invalid = next.clone();
    invalid.quality = 0;
    let err = pipeline.update_config(invalid).await.unwrap_err();
    assert!(matches!(err, LibraryError::Validation(_)));
    assert_eq!(*pipeline.config(), next);
}
