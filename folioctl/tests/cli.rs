use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A command isolated from the caller's environment, config files and
/// `.env`, pointed at `<tmp>/media` and `<tmp>/data`.
fn folioctl(tmp: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("folioctl");
    cmd.current_dir(tmp)
        .env_remove("FOLIO_CONFIG")
        .env_remove("FOLIO_MEDIA_ROOT")
        .env_remove("FOLIO_DATA_DIR")
        .env_remove("FOLIO_THUMBNAILS_DIR")
        .env("RUST_LOG", "warn")
        .arg("--media-root")
        .arg(tmp.join("media"))
        .arg("--data-dir")
        .arg(tmp.join("data"));
    cmd
}

fn library_with_one_photo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let gallery = tmp.path().join("media").join("gallery");
    fs::create_dir_all(&gallery).unwrap();
    fs::write(gallery.join("photo.jpg"), b"not decoded here").unwrap();
    fs::write(gallery.join("notes.txt"), b"ignored").unwrap();
    tmp
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout is JSON")
}

#[test]
fn help_lists_commands() {
    cargo_bin_cmd!("folioctl")
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("reconcile")
                .and(predicate::str::contains("orphans"))
                .and(predicate::str::contains("tree"))
                .and(predicate::str::contains("thumbnails"))
                .and(predicate::str::contains("watch")),
        );
}

#[test]
fn thumbnails_help_lists_subcommands() {
    cargo_bin_cmd!("folioctl")
        .args(["thumbnails", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("rebuild")
                .and(predicate::str::contains("set-config"))
                .and(predicate::str::contains("generate")),
        );
}

#[test]
fn reconcile_heals_and_is_then_clean() {
    let tmp = library_with_one_photo();

    let first = stdout_json(folioctl(tmp.path()).arg("reconcile"));
    assert_eq!(first["createdFolders"], 1);
    assert_eq!(first["createdMedias"], 1);
    assert!(tmp.path().join("data").join("medias.json").exists());

    let second = stdout_json(folioctl(tmp.path()).arg("reconcile"));
    assert_eq!(second["createdFolders"], 0);
    assert_eq!(second["createdMedias"], 0);
}

#[test]
fn orphans_reports_without_writing() {
    let tmp = library_with_one_photo();

    let report = stdout_json(folioctl(tmp.path()).arg("orphans"));
    assert_eq!(
        report["filesConfigured"]["medias"],
        serde_json::json!(["gallery/photo.jpg"])
    );
    assert!(!tmp.path().join("data").join("medias.json").exists());
}

#[test]
fn tree_lists_media_files_only() {
    let tmp = library_with_one_photo();

    folioctl(tmp.path())
        .arg("tree")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("photo.jpg")
                .and(predicate::str::contains("notes.txt").not()),
        );
}

#[test]
fn missing_media_root_fails() {
    let tmp = TempDir::new().unwrap();

    folioctl(tmp.path())
        .arg("orphans")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open media library"));
}

#[test]
fn unconfigured_media_root_fails() {
    let tmp = TempDir::new().unwrap();

    cargo_bin_cmd!("folioctl")
        .current_dir(tmp.path())
        .env_remove("FOLIO_CONFIG")
        .env_remove("FOLIO_MEDIA_ROOT")
        .arg("reconcile")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}
