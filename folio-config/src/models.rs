use std::path::PathBuf;
use std::time::Duration;

use folio_core::{LibraryOptions, WatchConfig};

/// Fully resolved configuration. Every path is absolute.
#[derive(Debug, Clone)]
pub struct Config {
    pub library: LibraryPaths,
    pub watch: WatchSettings,
    pub cache_ttl: Duration,
    pub thumbnail_workers: usize,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryPaths {
    pub media_root: PathBuf,
    pub data_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub stability_window: Duration,
    pub poll_interval: Duration,
    pub self_event_window: Duration,
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Config {
    pub fn library_options(&self) -> LibraryOptions {
        let mut options = LibraryOptions::new(
            self.library.media_root.clone(),
            self.library.data_dir.clone(),
        );
        options.thumbnails_dir = self.library.thumbnails_dir.clone();
        options.watch = WatchConfig {
            stability_window: self.watch.stability_window,
            poll_interval: self.watch.poll_interval,
            ..WatchConfig::default()
        };
        options.cache_ttl = self.cache_ttl;
        options.self_event_window = self.watch.self_event_window;
        options.thumbnail_workers = self.thumbnail_workers;
        options
    }
}

impl From<&Config> for LibraryOptions {
    fn from(config: &Config) -> Self {
        config.library_options()
    }
}
