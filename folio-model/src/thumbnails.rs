use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// A concrete encoded output format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EncodedFormat {
    Webp,
    Avif,
}

impl EncodedFormat {
    pub fn extension(self) -> &'static str {
        match self {
            EncodedFormat::Webp => "webp",
            EncodedFormat::Avif => "avif",
        }
    }
}

impl Display for EncodedFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Global output-format selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Webp,
    Avif,
    Both,
}

impl OutputFormat {
    /// Formats to encode, preferred (default) first.
    pub fn formats(self) -> &'static [EncodedFormat] {
        match self {
            OutputFormat::Webp => &[EncodedFormat::Webp],
            OutputFormat::Avif => &[EncodedFormat::Avif],
            OutputFormat::Both => &[EncodedFormat::Webp, EncodedFormat::Avif],
        }
    }
}

/// Which source dimension a single-sided preset constrains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseDimension {
    /// Decide per image from its orientation.
    #[default]
    Auto,
    Width,
    Height,
}

/// What happens to a media record when its source file disappears.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRemovalPolicy {
    /// Delete the whole media record together with the derived files.
    #[default]
    DropMetadata,
    /// Only clear thumbnails, dimensions and orientation; the record itself
    /// is left for the reconciliation engine to remove.
    ClearThumbnails,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailPreset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ThumbnailPreset {
    pub const fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            height: None,
        }
    }

    pub const fn height(height: u32) -> Self {
        Self {
            width: None,
            height: Some(height),
        }
    }

    pub const fn exact(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }
}

/// Contents of the thumbnail configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailConfig {
    pub presets: BTreeMap<String, ThumbnailPreset>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub base: BaseDimension,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub on_source_removed: SourceRemovalPolicy,
}

fn default_quality() -> u8 {
    80
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        let presets = BTreeMap::from([
            ("thumb".to_string(), ThumbnailPreset::width(320)),
            ("medium".to_string(), ThumbnailPreset::width(1024)),
            ("full".to_string(), ThumbnailPreset::width(2048)),
        ]);
        Self {
            presets,
            format: OutputFormat::default(),
            base: BaseDimension::default(),
            quality: default_quality(),
            on_source_removed: SourceRemovalPolicy::default(),
        }
    }
}

impl ThumbnailConfig {
    pub fn validate(&self) -> Result<()> {
        if self.presets.is_empty() {
            return Err(ModelError::invalid(
                "presets",
                "at least one preset is required",
            ));
        }
        for (name, preset) in &self.presets {
            let valid_name = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid_name {
                return Err(ModelError::invalid(
                    "presets",
                    format!("preset name '{name}' must match [A-Za-z0-9_-]+"),
                ));
            }
            let width = preset.width.unwrap_or(0);
            let height = preset.height.unwrap_or(0);
            if width == 0 && height == 0 {
                return Err(ModelError::invalid(
                    format!("presets.{name}"),
                    "a preset needs a width or a height",
                ));
            }
            if preset.width == Some(0) || preset.height == Some(0) {
                return Err(ModelError::invalid(
                    format!("presets.{name}"),
                    "dimensions must be greater than zero",
                ));
            }
        }
        if !(1..=100).contains(&self.quality) {
            return Err(ModelError::invalid("quality", "must be within 1..=100"));
        }
        Ok(())
    }
}
