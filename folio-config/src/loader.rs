use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use folio_core::cache::DEFAULT_CACHE_TTL;
use folio_core::library::DEFAULT_THUMBNAIL_WORKERS;
use folio_core::recent::DEFAULT_SELF_EVENT_WINDOW;
use folio_core::WatchConfig;
use thiserror::Error;
use tracing::debug;

use crate::models::{Config, ConfigMetadata, LibraryPaths, WatchSettings};
use crate::sources::{EnvConfig, FileConfig};
use crate::validation::{self, ConfigWarnings};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["folio.toml", "config/folio.toml"];
const DEFAULT_ENV_FILE: &str = ".env";
const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Replaces the process environment as the variable source.
    pub vars: Option<HashMap<String, String>>,
    /// Command-line overrides; these beat both the environment and the file.
    pub media_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_media_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.media_root = Some(path.into());
        self
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.data_dir = Some(path.into());
        self
    }

    pub fn with_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.options.vars = Some(
            vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        );
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (dotenv, env_file_loaded) = self.read_env_file()?;

        // Variables already set win over the `.env` file.
        let env_config = EnvConfig::from_lookup(|name| {
            let primary = match &self.options.vars {
                Some(vars) => vars.get(name).cloned(),
                None => std::env::var(name).ok(),
            };
            primary.or_else(|| dotenv.get(name).cloned())
        })?;

        let (file_config, config_path) = self.load_file_config(&env_config)?;
        let (config, warnings) = self.compose_config(
            file_config,
            env_config,
            config_path,
            env_file_loaded,
        )?;

        debug!(
            media_root = %config.library.media_root.display(),
            config_path = ?config.metadata.config_path,
            "configuration loaded"
        );
        Ok(ConfigLoad { config, warnings })
    }

    fn read_env_file(
        &self,
    ) -> Result<(HashMap<String, String>, bool), ConfigLoadError> {
        let path = self
            .options
            .env_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE));

        let iter = match dotenvy::from_path_iter(&path) {
            Ok(iter) => iter,
            Err(dotenvy::Error::Io(_)) => return Ok((HashMap::new(), false)),
            Err(err) => return Err(err.into()),
        };
        let mut vars = HashMap::new();
        for item in iter {
            let (key, value) = item?;
            vars.insert(key, value);
        }
        Ok((vars, true))
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        } else {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists());
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| {
                ConfigLoadError::Parse {
                    path: path.clone(),
                    source: err,
                }
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
        env_file_loaded: bool,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No folio.toml detected; falling back to environment variables",
                "Create folio.toml or point FOLIO_CONFIG at one",
            );
        }

        let FileConfig {
            library: file_library,
            watch: file_watch,
            cache: file_cache,
            thumbnails: file_thumbnails,
        } = file_config.unwrap_or_default();

        let cwd = std::env::current_dir().map_err(|source| {
            ConfigLoadError::Io {
                path: PathBuf::from("."),
                source,
            }
        })?;

        let media_root = self
            .options
            .media_root
            .clone()
            .or(env.media_root)
            .or(file_library.media_root)
            .ok_or(ConfigLoadError::MissingMediaRoot)?;
        let data_dir = self
            .options
            .data_dir
            .clone()
            .or(env.data_dir)
            .or(file_library.data_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let media_root = absolutize(&cwd, media_root);
        let data_dir = absolutize(&cwd, data_dir);
        let thumbnails_dir = env
            .thumbnails_dir
            .or(file_library.thumbnails_dir)
            .map(|dir| absolutize(&cwd, dir))
            .unwrap_or_else(|| data_dir.join("thumbnails"));

        let defaults = WatchConfig::default();
        let watch = WatchSettings {
            stability_window: env
                .stability_window_ms
                .or(file_watch.stability_window_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.stability_window),
            poll_interval: file_watch
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            self_event_window: file_watch
                .self_event_window_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SELF_EVENT_WINDOW),
        };

        let cache_ttl = env
            .cache_ttl_ms
            .or(file_cache.ttl_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CACHE_TTL);
        let thumbnail_workers = env
            .thumbnail_workers
            .or(file_thumbnails.workers)
            .unwrap_or(DEFAULT_THUMBNAIL_WORKERS);

        let config = Config {
            library: LibraryPaths {
                media_root,
                data_dir,
                thumbnails_dir,
            },
            watch,
            cache_ttl,
            thumbnail_workers,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok((config, warnings))
    }
}

fn absolutize(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error(
        "no media root configured; set [library].media_root or FOLIO_MEDIA_ROOT"
    )]
    MissingMediaRoot,
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("environment variable {name} has an invalid value '{value}'")]
    InvalidEnv { name: String, value: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
