use std::path::Path;

use crate::loader::ConfigLoadError;
use crate::models::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

/// Reject settings the library cannot run with and warn about ones it can
/// run with but probably should not.
pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if config.thumbnail_workers == 0 {
        return Err(ConfigLoadError::Invalid {
            field: "thumbnails.workers",
            reason: "at least one worker is required".into(),
        });
    }
    if config.watch.poll_interval.is_zero() {
        return Err(ConfigLoadError::Invalid {
            field: "watch.poll_interval_ms",
            reason: "must be greater than zero".into(),
        });
    }

    let media_root = &config.library.media_root;
    if config.library.data_dir == *media_root
        || config.library.thumbnails_dir == *media_root
    {
        return Err(ConfigLoadError::Invalid {
            field: "library",
            reason: "data and thumbnail directories must differ from the \
                     media root"
                .into(),
        });
    }
    if nested_in(&config.library.data_dir, media_root) {
        warnings.push_with_hint(
            format!(
                "data directory {} is inside the media root",
                config.library.data_dir.display()
            ),
            "It is excluded from scanning; move it outside to keep the \
             library tree clean",
        );
    }
    if nested_in(&config.library.thumbnails_dir, media_root) {
        warnings.push_with_hint(
            format!(
                "thumbnails directory {} is inside the media root",
                config.library.thumbnails_dir.display()
            ),
            "It is excluded from scanning; move it outside to keep the \
             library tree clean",
        );
    }
    if config.watch.stability_window.is_zero() {
        warnings.push(
            "watch.stability_window_ms is 0; partially written files may \
             be processed",
        );
    }

    Ok(warnings)
}

fn nested_in(path: &Path, root: &Path) -> bool {
    path != root && path.starts_with(root)
}
