use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{LibraryError, Result};

/// Serialize `value` as pretty JSON and replace `path` atomically.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes).await
}

/// Write to a uniquely named sibling temp file, then rename over `path`.
///
/// Readers observe either the previous complete file or the new one. The
/// temp name starts with a dot so directory walkers and watchers skip it.
pub(crate) async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        LibraryError::Internal(format!("{} has no parent directory", path.display()))
    })?;
    tokio::fs::create_dir_all(parent).await?;

    let tmp = temp_sibling(path);
    if let Err(err) = write_and_sync(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }

    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => {}
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::AlreadyExists | ErrorKind::PermissionDenied
            ) =>
        {
            // Some platforms refuse to rename over an existing file.
            debug!(path = %path.display(), "rename collided, replacing target");
            let _ = tokio::fs::remove_file(path).await;
            if let Err(err) = tokio::fs::rename(&tmp, path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(err.into());
            }
        }
        Err(err) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
    }

    if let Ok(dir) = tokio::fs::File::open(parent).await {
        let _ = dir.sync_all().await;
    }
    Ok(())
}

async fn write_and_sync(tmp: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp-{}", Uuid::new_v4().simple()))
}
