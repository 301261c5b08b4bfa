//! # Metadata Store
//!
//! All level records live in a single JSON array on disk. Every read loads
//! the whole file; every write rewrites it.
//!
//! ## Concurrency:
//! Actix runs handlers on several worker threads, so two uploads (or an upload
//! and a delete) can arrive at the same time. A naive load-modify-save cycle
//! would let one of them overwrite the other's change. Mutations therefore go
//! through `append` and `remove_first`, which hold `write_lock` for the whole
//! cycle. Reads skip the lock: saves replace the file by rename, so a reader
//! always sees either the old array or the new one.

use super::write_atomic;
use crate::level::Level;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

pub struct MetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record in stored order. A missing file is an empty store.
    pub async fn load(&self) -> Result<Vec<Level>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };

        serde_json::from_slice(&bytes)
            .with_context(|| format!("{} is not a valid level list", self.path.display()))
    }

    /// Overwrite the backing file with `levels`.
    ///
    /// Callers that derive `levels` from a previous `load` must hold the write
    /// lock; use `append` / `remove_first` instead of calling this directly.
    pub async fn save(&self, levels: &[Level]) -> Result<()> {
        let bytes = serde_json::to_vec(levels).context("failed to serialize levels")?;
        write_atomic(&self.path, &bytes).await?;
        debug!(path = %self.path.display(), count = levels.len(), "Saved level metadata");
        Ok(())
    }

    /// Add a record to the end of the list.
    pub async fn append(&self, level: Level) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut levels = self.load().await?;
        levels.push(level);
        self.save(&levels).await
    }

    /// Remove the first record whose `level_name` matches exactly.
    ///
    /// Returns the removed record, or `None` (with the file untouched) when
    /// nothing matched.
    pub async fn remove_first(&self, level_name: &str) -> Result<Option<Level>> {
        let _guard = self.write_lock.lock().await;
        let mut levels = self.load().await?;

        let Some(index) = levels.iter().position(|l| l.level_name == level_name) else {
            return Ok(None);
        };

        let removed = levels.remove(index);
        self.save(&levels).await?;
        Ok(Some(removed))
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }
}
