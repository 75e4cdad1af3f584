//! Derived-image generation.
//!
//! For every decodable image under the media root the pipeline renders one
//! variant per configured preset and output format into a thumbnails tree
//! that mirrors the media tree, then records the results on the media's
//! metadata record.

mod encode;
mod pipeline;
mod plan;

use std::path::Path;

use folio_model::ThumbnailConfig;
use tracing::info;

use crate::error::Result;
use crate::store::write_json_atomic;

pub use pipeline::{RebuildReport, ThumbnailPipeline, ThumbnailStats};
pub use plan::{CropRect, ResizePlan, plan_resize};

pub const THUMBNAIL_CONFIG_DOCUMENT: &str = "thumbnails.json";

/// Load the thumbnail configuration document, falling back to defaults when
/// it does not exist yet.
pub async fn load_config(path: &Path) -> Result<ThumbnailConfig> {
    let config = match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice::<ThumbnailConfig>(&bytes)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no thumbnail config, using defaults");
            ThumbnailConfig::default()
        }
        Err(err) => return Err(err.into()),
    };
    config.validate()?;
    Ok(config)
}

pub async fn save_config(path: &Path, config: &ThumbnailConfig) -> Result<()> {
    config.validate()?;
    write_json_atomic(path, config).await
}
