//! Upload storage: one directory per uploaded file name
//!
//! Uploads are streamed to a temporary `.part` file next to their final
//! location and renamed into place once complete, so the media tool never
//! sees a half-written input.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{RelayError, Result};

static PART_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Writes uploads to `<static_root>/<uploads_dir>/<name>/<name>`
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

/// An upload fully written to disk
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl StoredUpload {
    /// Delete the stored file; failures are only logged
    pub async fn remove(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!("Could not remove upload {}: {}", self.path.display(), e);
        }
    }
}

impl UploadStore {
    pub fn new(static_root: impl AsRef<Path>, uploads_dir: &str) -> Self {
        Self {
            root: static_root.as_ref().join(uploads_dir),
        }
    }

    /// Start writing an upload.
    ///
    /// A completed upload replaces any earlier one with the same name.
    /// Concurrent uploads with the same name are not serialized; the last
    /// one to finish wins.
    pub async fn begin(&self, original_name: &str) -> Result<UploadWriter> {
        let file_name = sanitize_file_name(original_name)?;
        let dir = self.root.join(&file_name);
        tokio::fs::create_dir_all(&dir).await?;

        let sequence = PART_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let part_path = dir.join(format!(".{}.{}.{}.part", file_name, std::process::id(), sequence));
        let file = File::create(&part_path).await?;

        Ok(UploadWriter {
            file_name,
            dir,
            part_path,
            file,
            size: 0,
        })
    }
}

/// An upload being streamed to disk
#[derive(Debug)]
pub struct UploadWriter {
    file_name: String,
    dir: PathBuf,
    part_path: PathBuf,
    file: File,
    size: u64,
}

impl UploadWriter {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Move the upload into place; an empty upload is removed and yields `None`
    pub async fn finish(self) -> Result<Option<StoredUpload>> {
        let UploadWriter {
            file_name,
            dir,
            part_path,
            mut file,
            size,
        } = self;
        file.flush().await?;
        drop(file);

        if size == 0 {
            tokio::fs::remove_file(&part_path).await?;
            // Only succeeds when no other upload shares the directory
            let _ = tokio::fs::remove_dir(&dir).await;
            return Ok(None);
        }

        let path = dir.join(&file_name);
        tokio::fs::rename(&part_path, &path).await?;

        info!("📥 Stored upload {} ({} bytes)", path.display(), size);
        Ok(Some(StoredUpload { file_name, path, size }))
    }

    /// Abandon a partial upload
    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.part_path).await {
            warn!("Could not remove partial upload {}: {}", self.part_path.display(), e);
        }
    }
}

/// Reduce a client-supplied file name to its final path component
pub fn sanitize_file_name(original_name: &str) -> Result<String> {
    let normalized = original_name.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or("").trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(RelayError::InvalidUpload(format!(
            "unusable file name {:?}",
            original_name
        )));
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_bytes(store: &UploadStore, name: &str, chunks: &[&[u8]]) -> Option<StoredUpload> {
        let mut writer = store.begin(name).await.unwrap();
        for chunk in chunks {
            writer.write(chunk).await.unwrap();
        }
        writer.finish().await.unwrap()
    }

    async fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("talk.mp4").unwrap(), "talk.mp4");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\videos\\talk.mp4").unwrap(), "talk.mp4");
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("dir/").is_err());
    }

    #[tokio::test]
    async fn test_chunks_are_written_to_directory_per_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = UploadStore::new(temp_dir.path(), "uploads");

        let stored = store_bytes(&store, "clip.mp4", &[b"fir".as_slice(), b"st".as_slice()]).await.unwrap();
        assert_eq!(stored.path, temp_dir.path().join("uploads/clip.mp4/clip.mp4"));
        assert_eq!(stored.size, 5);
        assert_eq!(tokio::fs::read(&stored.path).await.unwrap(), b"first");

        // Same name overwrites
        let again = store_bytes(&store, "clip.mp4", &[b"second".as_slice()]).await.unwrap();
        assert_eq!(again.path, stored.path);
        assert_eq!(tokio::fs::read(&stored.path).await.unwrap(), b"second");

        // No partial files are left behind
        let dir = temp_dir.path().join("uploads/clip.mp4");
        assert_eq!(dir_entries(&dir).await, vec!["clip.mp4"]);
    }

    #[tokio::test]
    async fn test_empty_upload_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = UploadStore::new(temp_dir.path(), "uploads");

        assert_eq!(store_bytes(&store, "empty.mp4", &[]).await, None);
        assert!(!temp_dir.path().join("uploads/empty.mp4").exists());
    }

    #[tokio::test]
    async fn test_discard_removes_partial_upload() {
        let temp_dir = TempDir::new().unwrap();
        let store = UploadStore::new(temp_dir.path(), "uploads");

        let mut writer = store.begin("clip.mp4").await.unwrap();
        writer.write(b"partial").await.unwrap();
        writer.discard().await;

        let dir = temp_dir.path().join("uploads/clip.mp4");
        assert!(dir_entries(&dir).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_uploads_use_separate_part_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = UploadStore::new(temp_dir.path(), "uploads");

        let mut first = store.begin("clip.mp4").await.unwrap();
        let mut second = store.begin("clip.mp4").await.unwrap();
        first.write(b"aaaa").await.unwrap();
        second.write(b"bb").await.unwrap();

        let first = first.finish().await.unwrap().unwrap();
        let second = second.finish().await.unwrap().unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(tokio::fs::read(&second.path).await.unwrap(), b"bb");
    }

    #[tokio::test]
    async fn test_remove_stored_upload() {
        let temp_dir = TempDir::new().unwrap();
        let store = UploadStore::new(temp_dir.path(), "uploads");

        let stored = store_bytes(&store, "clip.mp4", &[b"x".as_slice()]).await.unwrap();
        stored.remove().await;
        assert!(!stored.path.exists());
    }
}
