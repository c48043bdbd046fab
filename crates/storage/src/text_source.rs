//! Text source implementations and JSON helpers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{Result, StorageError, TextSource};

/// Reads blobs from the local file system.
///
/// The file handle is scoped to a single `read_all` call and closed before
/// the text is handed back, on success and on error alike. If the calling
/// future is dropped mid-read the handle is dropped with it. Clones share
/// one open-handle count.
#[derive(Debug, Clone, Default)]
pub struct FileTextSource {
    root: Option<PathBuf>,
    open: Arc<AtomicUsize>,
}

impl FileTextSource {
    /// Resolve paths as given.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Handles currently held open by reads in progress.
    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl TextSource for FileTextSource {
    async fn read_all(&self, path: &Path) -> Result<String> {
        let path = self.resolve(path);

        let text = {
            let mut file = match ScopedFile::open(&path, &self.open).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound(path.display().to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            let mut text = String::new();
            file.inner.read_to_string(&mut text).await?;
            text
        };

        debug!("Read {} bytes from {}", text.len(), path.display());
        Ok(text)
    }
}

/// An open file, counted against its source until dropped.
struct ScopedFile {
    inner: fs::File,
    open: Arc<AtomicUsize>,
}

impl ScopedFile {
    async fn open(path: &Path, open: &Arc<AtomicUsize>) -> std::io::Result<Self> {
        let inner = fs::File::open(path).await?;
        open.fetch_add(1, Ordering::AcqRel);
        Ok(Self {
            inner,
            open: open.clone(),
        })
    }
}

impl Drop for ScopedFile {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Text source backed by a map, for tests and built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct MemoryTextSource {
    blobs: HashMap<PathBuf, String>,
}

impl MemoryTextSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blob under `path`.
    pub fn with_blob(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.blobs.insert(path.as_ref().to_path_buf(), text.into());
        self
    }
}

#[async_trait]
impl TextSource for MemoryTextSource {
    async fn read_all(&self, path: &Path) -> Result<String> {
        self.blobs
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.display().to_string()))
    }
}

/// Read and parse a JSON blob. A missing blob yields `None`.
pub async fn read_json<T: serde::de::DeserializeOwned>(
    source: &dyn TextSource,
    path: &Path,
) -> Result<Option<T>> {
    match source.read_all(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
