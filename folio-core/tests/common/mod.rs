#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use folio_core::{LibraryOptions, MediaLibrary};
use folio_model::{ThumbnailConfig, ThumbnailPreset};
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

/// A media root and a data directory under one temp dir.
pub struct Fixture {
    _dir: TempDir,
    pub media: PathBuf,
    pub data: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let media = dir.path().join("media");
        let data = dir.path().join("data");
        std::fs::create_dir_all(&media).expect("media dir");
        std::fs::create_dir_all(&data).expect("data dir");
        Self {
            media: media.canonicalize().expect("canonical media"),
            data: data.canonicalize().expect("canonical data"),
            _dir: dir,
        }
    }

    pub fn options(&self) -> LibraryOptions {
        let mut options = LibraryOptions::new(&self.media, &self.data);
        options.self_event_window = Duration::from_secs(30);
        options
    }

    pub async fn open(&self) -> MediaLibrary {
        MediaLibrary::open(self.options())
            .await
            .expect("open library")
    }

    /// Small presets keep encoding fast.
    pub fn write_thumbnail_config(&self, config: &ThumbnailConfig) {
        let json = serde_json::to_vec_pretty(config).expect("serialize");
        std::fs::write(self.data.join("thumbnails.json"), json)
            .expect("write config");
    }

    pub fn small_presets() -> ThumbnailConfig {
        let mut config = ThumbnailConfig::default();
        config.presets.clear();
        config
            .presets
            .insert("thumb".into(), ThumbnailPreset::width(16));
        config
            .presets
            .insert("card".into(), ThumbnailPreset::exact(12, 8));
        config
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.media.join(key)
    }

    pub fn mkdir(&self, key: &str) {
        std::fs::create_dir_all(self.path(key)).expect("mkdir");
    }

    pub fn touch(&self, key: &str) {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent dir");
        }
        std::fs::write(path, b"not really an image").expect("write file");
    }

    pub fn image(&self, key: &str, width: u32, height: u32) {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent dir");
        }
        gradient(width, height).save(path).expect("save image");
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path(key).exists()
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data.join("thumbnails")
    }
}

pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 90])
    }))
}

/// Every file and directory under `root`, relative, sorted.
pub fn listing(root: &Path) -> Vec<String> {
    let mut entries: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .expect("under root")
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    entries.sort();
    entries
}

pub fn keys(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}
