//! On-disk persistence: the JSON metadata file and the audio blob directory.

pub mod files;
pub mod metadata;

pub use files::{sanitize_filename, FileStore};
pub use metadata::MetadataStore;

use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Replace `target` with `bytes` without ever exposing a half-written file.
///
/// Writes to a hidden temp file in the same directory, flushes it, then
/// renames it over the target. The temp name starts with `.` so it can never
/// collide with a sanitized blob name.
pub(crate) async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target.parent().filter(|p| !p.as_os_str().is_empty());
    let temp_name = format!(".tmp.{}", Uuid::new_v4());
    let temp_path = match dir {
        Some(dir) => dir.join(&temp_name),
        None => Path::new(&temp_name).to_path_buf(),
    };

    let write = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, target).await
    };

    if let Err(e) = write.await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e).with_context(|| format!("failed to write {}", target.display()));
    }
    Ok(())
}
