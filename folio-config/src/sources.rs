use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::loader::ConfigLoadError;

pub const ENV_CONFIG_PATH: &str = "FOLIO_CONFIG";
pub const ENV_MEDIA_ROOT: &str = "FOLIO_MEDIA_ROOT";
pub const ENV_DATA_DIR: &str = "FOLIO_DATA_DIR";
pub const ENV_THUMBNAILS_DIR: &str = "FOLIO_THUMBNAILS_DIR";
pub const ENV_CACHE_TTL_MS: &str = "FOLIO_CACHE_TTL_MS";
pub const ENV_STABILITY_WINDOW_MS: &str = "FOLIO_STABILITY_WINDOW_MS";
pub const ENV_THUMBNAIL_WORKERS: &str = "FOLIO_THUMBNAIL_WORKERS";

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub library: FileLibraryConfig,
    #[serde(default)]
    pub watch: FileWatchConfig,
    #[serde(default)]
    pub cache: FileCacheConfig,
    #[serde(default)]
    pub thumbnails: FileThumbnailsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLibraryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnails_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWatchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability_window_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_event_window_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCacheConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileThumbnailsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

/// Values read from the process environment (and `.env`).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub thumbnails_dir: Option<PathBuf>,
    pub cache_ttl_ms: Option<u64>,
    pub stability_window_ms: Option<u64>,
    pub thumbnail_workers: Option<usize>,
}

impl EnvConfig {
    pub fn gather() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as
    /// unset; values that do not parse are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let path = |name: &str| read(name).map(PathBuf::from);

        Ok(Self {
            config_path: path(ENV_CONFIG_PATH),
            media_root: path(ENV_MEDIA_ROOT),
            data_dir: path(ENV_DATA_DIR),
            thumbnails_dir: path(ENV_THUMBNAILS_DIR),
            cache_ttl_ms: parse_number(ENV_CACHE_TTL_MS, read(ENV_CACHE_TTL_MS))?,
            stability_window_ms: parse_number(
                ENV_STABILITY_WINDOW_MS,
                read(ENV_STABILITY_WINDOW_MS),
            )?,
            thumbnail_workers: parse_number(
                ENV_THUMBNAIL_WORKERS,
                read(ENV_THUMBNAIL_WORKERS),
            )?,
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigLoadError> {
    match raw {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| {
            ConfigLoadError::InvalidEnv {
                name: name.to_string(),
                value,
            }
        }),
    }
}
