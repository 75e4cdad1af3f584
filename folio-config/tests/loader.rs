use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use folio_config::{ConfigLoadError, ConfigLoader};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn no_vars() -> Vec<(String, String)> {
    Vec::new()
}

/// Loader isolated from the process environment and any `.env` in the
/// working directory.
fn isolated(dir: &Path) -> ConfigLoader {
    ConfigLoader::new()
        .with_env_file(dir.join("missing.env"))
        .with_vars(no_vars())
}

#[test]
fn file_values_are_used_and_env_overrides_them() {
    let tmp = TempDir::new().unwrap();
    let media = tmp.path().join("media");
    let data = tmp.path().join("data");
    let path = write(
        tmp.path(),
        "folio.toml",
        &format!(
            "[library]\nmedia_root = {media:?}\ndata_dir = {data:?}\n\n\
             [watch]\nstability_window_ms = 40\npoll_interval_ms = 10\n\
             self_event_window_ms = 900\n\n\
             [cache]\nttl_ms = 100\n\n[thumbnails]\nworkers = 3\n"
        ),
    );

    let loaded = ConfigLoader::new()
        .with_env_file(tmp.path().join("missing.env"))
        .with_vars([("FOLIO_CACHE_TTL_MS", "250")])
        .with_config_path(&path)
        .load()
        .unwrap();
    let config = loaded.config;

    assert_eq!(config.library.media_root, media);
    assert_eq!(config.library.data_dir, data);
    assert_eq!(config.library.thumbnails_dir, data.join("thumbnails"));
    assert_eq!(config.cache_ttl, Duration::from_millis(250));
    assert_eq!(config.thumbnail_workers, 3);
    assert_eq!(config.watch.stability_window, Duration::from_millis(40));
    assert_eq!(config.watch.poll_interval, Duration::from_millis(10));
    assert_eq!(config.watch.self_event_window, Duration::from_millis(900));
    assert_eq!(config.metadata.config_path, Some(path));
    assert!(!config.metadata.env_file_loaded);
    assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);

    let options = config.library_options();
    assert_eq!(options.media_root, media);
    assert_eq!(options.thumbnails_dir, data.join("thumbnails"));
    assert_eq!(options.watch.poll_interval, Duration::from_millis(10));
    assert_eq!(options.self_event_window, Duration::from_millis(900));
    assert_eq!(options.thumbnail_workers, 3);
}

#[test]
fn explicit_config_path_must_exist() {
    let tmp = TempDir::new().unwrap();
    let err = isolated(tmp.path())
        .with_config_path(tmp.path().join("absent.toml"))
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn config_path_from_env_must_exist() {
    let tmp = TempDir::new().unwrap();
    let absent = tmp.path().join("absent.toml");
    let err = ConfigLoader::new()
        .with_env_file(tmp.path().join("missing.env"))
        .with_vars([("FOLIO_CONFIG", absent.to_string_lossy().into_owned())])
        .load()
        .unwrap_err();
    match err {
        ConfigLoadError::MissingConfig { path } => assert_eq!(path, absent),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn media_root_is_required() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "folio.toml", "[cache]\nttl_ms = 10\n");
    let err = isolated(tmp.path())
        .with_config_path(path)
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingMediaRoot));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let tmp = TempDir::new().unwrap();
    let path = write(tmp.path(), "folio.toml", "[library\nmedia_root = 1");
    let err = isolated(tmp.path())
        .with_config_path(&path)
        .load()
        .unwrap_err();
    match err {
        ConfigLoadError::Parse { path: reported, .. } => {
            assert_eq!(reported, path)
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn env_file_supplies_values_that_vars_do_not() {
    let tmp = TempDir::new().unwrap();
    let media = tmp.path().join("media");
    let env_file = write(
        tmp.path(),
        "folio.env",
        &format!(
            "FOLIO_MEDIA_ROOT={}\nFOLIO_THUMBNAIL_WORKERS=5\n",
            media.display()
        ),
    );

    let loaded = ConfigLoader::new()
        .with_env_file(&env_file)
        .with_vars([("FOLIO_THUMBNAIL_WORKERS", "1")])
        .load()
        .unwrap();

    assert!(loaded.config.metadata.env_file_loaded);
    assert_eq!(loaded.config.library.media_root, media);
    assert_eq!(loaded.config.thumbnail_workers, 1);
    assert!(
        loaded
            .warnings
            .iter()
            .any(|warning| warning.message.contains("No folio.toml")),
        "missing-file warning expected"
    );
}

#[test]
fn nested_thumbnails_dir_is_a_warning() {
    let tmp = TempDir::new().unwrap();
    let media = tmp.path().join("media");
    let loaded = isolated(tmp.path())
        .with_vars([
            ("FOLIO_MEDIA_ROOT", media.to_string_lossy().into_owned()),
            (
                "FOLIO_DATA_DIR",
                tmp.path().join("data").to_string_lossy().into_owned(),
            ),
            (
                "FOLIO_THUMBNAILS_DIR",
                media.join(".thumbs").to_string_lossy().into_owned(),
            ),
        ])
        .load()
        .unwrap();

    assert!(
        loaded
            .warnings
            .iter()
            .any(|warning| warning.message.contains("thumbnails directory")),
        "{:?}",
        loaded.warnings
    );
}

#[test]
fn zero_workers_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let err = isolated(tmp.path())
        .with_vars([
            (
                "FOLIO_MEDIA_ROOT",
                tmp.path().join("media").to_string_lossy().into_owned(),
            ),
            ("FOLIO_THUMBNAIL_WORKERS", "0".to_string()),
        ])
        .load()
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::Invalid {
            field: "thumbnails.workers",
            ..
        }
    ));
}

#[test]
fn invalid_env_number_is_reported() {
    let tmp = TempDir::new().unwrap();
    let err = isolated(tmp.path())
        .with_vars([("FOLIO_CACHE_TTL_MS", "five")])
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::InvalidEnv { .. }));
}

#[test]
fn relative_paths_resolve_against_the_working_directory() {
    let tmp = TempDir::new().unwrap();
    let loaded = isolated(tmp.path())
        .with_vars([("FOLIO_MEDIA_ROOT", "library/media")])
        .load()
        .unwrap();
    let cwd = std::env::current_dir().unwrap();
    assert_eq!(loaded.config.library.media_root, cwd.join("library/media"));
    assert_eq!(loaded.config.library.data_dir, cwd.join("data"));
}

#[test]
fn command_line_overrides_beat_env_and_file() {
    let tmp = TempDir::new().unwrap();
    let path = write(
        tmp.path(),
        "folio.toml",
        "[library]\nmedia_root = \"/from/file\"\ndata_dir = \"/from/file-data\"\n",
    );
    let cli_media = tmp.path().join("cli-media");
    let loaded = isolated(tmp.path())
        .with_vars([("FOLIO_MEDIA_ROOT", "/from/env")])
        .with_config_path(path)
        .with_media_root(&cli_media)
        .load()
        .unwrap();

    assert_eq!(loaded.config.library.media_root, cli_media);
    assert_eq!(loaded.config.library.data_dir, PathBuf::from("/from/file-data"));
}
