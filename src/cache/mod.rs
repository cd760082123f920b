//! On-disk artifact storage.
//!
//! One flat directory, one file per request target. Entries are write-once
//! in practice and never expire or get evicted. Writes go through a temp
//! file and a rename, so a reader sees either nothing or the whole artifact.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

mod key;

pub use key::CacheKey;

/// Errors produced by [`CacheStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create storage root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read cache entry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write cache entry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Flat directory of cached artifacts keyed by [`CacheKey`].
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Opens the store, creating the root directory if it does not exist yet.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|source| StoreError::CreateRoot {
                path: root.clone(),
                source,
            })?;
        debug!(root = %root.display(), "storage root ready");
        Ok(Self { root })
    }

    /// Returns the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file an artifact for `key` lives at.
    pub fn location(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Reads the artifact stored under `key`, or `None` on a miss.
    pub async fn read(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let path = self.location(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    /// Stores `bytes` under `key`, replacing any previous artifact atomically.
    pub async fn write(&self, key: &CacheKey, bytes: Bytes) -> Result<(), StoreError> {
        let root = self.root.clone();
        let path = self.location(key);
        let target = path.clone();

        let result = tokio::task::spawn_blocking(move || write_atomic(&root, &target, &bytes))
            .await
            .unwrap_or_else(|join| Err(io::Error::other(join)));

        result.map_err(|source| StoreError::Write { path, source })
    }

    /// Lists the keys currently stored, skipping foreign and temporary files.
    pub async fn keys(&self) -> Result<Vec<CacheKey>, StoreError> {
        let read_err = |source| StoreError::Read {
            path: self.root.clone(),
            source,
        };
        let mut entries = fs::read_dir(&self.root).await.map_err(read_err)?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            if let Some(key) = entry.file_name().to_str().and_then(CacheKey::from_file_name) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

// The temp file sits in the same directory as its destination so the final
// rename never crosses a filesystem boundary.
fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
