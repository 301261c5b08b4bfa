//! # Audio File Store
//!
//! A flat directory of uploaded audio blobs. Names come from the client, so
//! every name passes through [`sanitize_filename`] before it touches the
//! filesystem, on upload and on lookup alike.

use super::write_atomic;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Reduce a client-supplied filename to a safe base name.
///
/// ## What this does:
/// 1. Drops non-ASCII characters
/// 2. Turns `/` and `\` into spaces, so directory parts cannot survive
/// 3. Joins whitespace-separated words with `_`
/// 4. Keeps only ASCII letters, digits, `_`, `.` and `-`
/// 5. Strips leading and trailing `.` and `_`
///
/// Returns `None` when nothing usable is left (e.g. `"../.."`).
///
/// ## Examples:
/// - `"My Song.mp3"` becomes `"My_Song.mp3"`
/// - `"../../etc/passwd"` becomes `"etc_passwd"`
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let flattened: String = raw
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");

    let safe: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let trimmed = safe.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the store, creating the directory if it does not exist yet.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create upload directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob a client-supplied name refers to, after sanitizing.
    pub fn path_for(&self, raw_name: &str) -> Option<PathBuf> {
        sanitize_filename(raw_name).map(|name| self.root.join(name))
    }

    /// Create or overwrite a blob. `name` must already be sanitized.
    pub async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.root.join(name), bytes).await
    }

    /// Remove a blob. Returns `Ok(false)` if it was already gone.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let Some(path) = self.path_for(name) else {
            return Ok(false);
        };

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_names() {
        assert_eq!(sanitize_filename("song.mp3").as_deref(), Some("song.mp3"));
        assert_eq!(sanitize_filename("My Song.mp3").as_deref(), Some("My_Song.mp3"));
        assert_eq!(
            sanitize_filename("  lots   of\tspace.ogg ").as_deref(),
            Some("lots_of_space.ogg")
        );
    }

    #[test]
    fn test_sanitize_strips_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("etc_passwd"));
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\track.wav").as_deref(),
            Some("C_Users_me_track.wav")
        );
        assert_eq!(sanitize_filename(".hidden").as_deref(), Some("hidden"));
    }

    #[test]
    fn test_sanitize_drops_unsafe_characters() {
        assert_eq!(sanitize_filename("beat$<>|*?.mp3").as_deref(), Some("beat.mp3"));
        assert_eq!(sanitize_filename("caf\u{e9}.mp3").as_deref(), Some("caf.mp3"));
    }

    #[test]
    fn test_sanitize_rejects_empty_results() {
        assert!(sanitize_filename("").is_none());
        assert!(sanitize_filename("..").is_none());
        assert!(sanitize_filename("../..").is_none());
        assert!(sanitize_filename("\u{266a}\u{266b}").is_none());
    }

    #[tokio::test]
    async fn test_new_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("uploads");
        let store = FileStore::new(&root).await.unwrap();
        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn test_put_overwrites_and_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        store.put("song.mp3", b"first").await.unwrap();
        store.put("song.mp3", b"second").await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("song.mp3")).unwrap(), b"second");

        assert!(store.delete("song.mp3").await.unwrap());
        assert!(!store.delete("song.mp3").await.unwrap());
        assert!(!store.delete("../..").await.unwrap());
    }

    #[tokio::test]
    async fn test_path_for_stays_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let path = store.path_for("../secret.txt").unwrap();
        assert_eq!(path, dir.path().join("secret.txt"));
        assert!(store.path_for("..").is_none());
    }
}
