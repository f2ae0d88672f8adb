use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::feed::ArticleRecord;
use crate::storage::bookmarks::BookmarkSet;
use crate::storage::cache::{CacheConfig, CacheStore};
use crate::storage::traits::{BlobStore, MemoryBlobStore};

pub const REGION_CACHE_BLOB: &str = "region_cache";
pub const BOOKMARKS_BLOB: &str = "bookmarks";

/// Persisted form of a [`CacheStore`]. Unknown fields are ignored on load so
/// older binaries can read documents written by newer ones within a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub articles: BTreeMap<String, Vec<ArticleRecord>>,
    #[serde(default)]
    pub last_updated: BTreeMap<String, DateTime<Utc>>,
}

impl CacheSnapshot {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn empty() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            saved_at: Utc::now(),
            articles: BTreeMap::new(),
            last_updated: BTreeMap::new(),
        }
    }

    pub fn article_count(&self) -> usize {
        self.articles.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BookmarkDocument {
    version: u32,
    #[serde(default)]
    ids: Vec<String>,
}

impl BookmarkDocument {
    const CURRENT_VERSION: u32 = 1;
}

/// Configuration for persistent cache
#[derive(Debug, Clone)]
pub struct PersistentCacheConfig {
    pub cache_dir: PathBuf,
}

impl Default for PersistentCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("regional-news"),
        }
    }
}

/// Stores each blob as `<name>.json` in one directory.
///
/// Writes go to a temp file in the same directory and are renamed into
/// place, so a crash mid-save leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::Persistence(format!(
                "Failed to create cache directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let store = Self { dir };
        let removed = store.cleanup_temp_files();
        if removed > 0 {
            debug!("Removed {} leftover temp files from {}", removed, store.dir.display());
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Temp files are only left behind by a save that died before its rename.
    pub fn cleanup_temp_files(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };

        entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| name.ends_with(".tmp"))
            })
            .filter(|entry| fs::remove_file(entry.path()).is_ok())
            .count()
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Persistence(format!(
                "Failed to read '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(name);

        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| Error::Persistence(format!("Failed to create temp file in '{}': {}", self.dir.display(), e)))?;

        temp.write_all(bytes)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| Error::Persistence(format!("Failed to write '{}': {}", temp.path().display(), e)))?;

        temp.persist(&path).map_err(|e| {
            Error::Persistence(format!("Failed to move cache into '{}': {}", path.display(), e.error))
        })?;

        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!(
                "Failed to remove '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Saves and restores the region cache and the bookmark set.
pub struct PersistentCache {
    backend: Arc<dyn BlobStore>,
}

impl PersistentCache {
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self { backend }
    }

    pub fn open(config: PersistentCacheConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(FileBlobStore::new(config.cache_dir)?)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    pub fn save(&self, store: &CacheStore) -> Result<()> {
        self.save_snapshot(&store.snapshot())
    }

    pub fn save_snapshot(&self, snapshot: &CacheSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        self.backend.write(REGION_CACHE_BLOB, &bytes)?;

        debug!(
            "Saved cache: {} regions, {} articles to {}",
            snapshot.articles.len(),
            snapshot.article_count(),
            self.backend.location()
        );
        Ok(())
    }

    /// `Ok(None)` when nothing was ever saved. Documents from a newer format
    /// version are rejected rather than partially read.
    pub fn try_load_snapshot(&self) -> Result<Option<CacheSnapshot>> {
        let Some(bytes) = self.backend.read(REGION_CACHE_BLOB)? else {
            return Ok(None);
        };

        let snapshot: CacheSnapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version > CacheSnapshot::CURRENT_VERSION {
            return Err(Error::Persistence(format!(
                "Cache format version {} is newer than supported version {}",
                snapshot.version,
                CacheSnapshot::CURRENT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }

    /// Never fails: missing, unreadable or corrupt state yields an empty
    /// snapshot and the cache refills on the next fetch.
    pub fn load_snapshot(&self) -> CacheSnapshot {
        match self.try_load_snapshot() {
            Ok(Some(snapshot)) => {
                info!(
                    "Loaded cache: {} regions, {} articles",
                    snapshot.articles.len(),
                    snapshot.article_count()
                );
                snapshot
            }
            Ok(None) => {
                debug!("No saved cache at {}", self.backend.location());
                CacheSnapshot::empty()
            }
            Err(e) => {
                warn!("Ignoring unreadable cache at {}: {}", self.backend.location(), e);
                CacheSnapshot::empty()
            }
        }
    }

    pub fn load(&self, config: CacheConfig) -> CacheStore {
        CacheStore::from_snapshot(config, self.load_snapshot())
    }

    pub fn save_bookmarks(&self, bookmarks: &BookmarkSet) -> Result<()> {
        if bookmarks.is_empty() {
            return self.backend.remove(BOOKMARKS_BLOB);
        }

        let document = BookmarkDocument {
            version: BookmarkDocument::CURRENT_VERSION,
            ids: bookmarks.iter().map(str::to_string).collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        self.backend.write(BOOKMARKS_BLOB, &bytes)
    }

    /// `Ok(None)` when no bookmarks were saved. Newer format versions are
    /// rejected the same way as cache snapshots.
    pub fn try_load_bookmarks(&self) -> Result<Option<BookmarkSet>> {
        let Some(bytes) = self.backend.read(BOOKMARKS_BLOB)? else {
            return Ok(None);
        };

        let document: BookmarkDocument = serde_json::from_slice(&bytes)?;
        if document.version > BookmarkDocument::CURRENT_VERSION {
            return Err(Error::Persistence(format!(
                "Bookmarks format version {} is newer than supported version {}",
                document.version,
                BookmarkDocument::CURRENT_VERSION
            )));
        }
        Ok(Some(document.ids.into_iter().collect()))
    }

    /// Fails open like [`load_snapshot`](Self::load_snapshot).
    pub fn load_bookmarks(&self) -> BookmarkSet {
        match self.try_load_bookmarks() {
            Ok(Some(bookmarks)) => bookmarks,
            Ok(None) => BookmarkSet::new(),
            Err(e) => {
                warn!("Ignoring unreadable bookmarks at {}: {}", self.backend.location(), e);
                BookmarkSet::new()
            }
        }
    }
}
