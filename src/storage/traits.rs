use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

/// Key/value storage for the cache's persisted documents.
///
/// Implementations must make `write` atomic: a reader sees either the
/// previous blob or the new one, never a torn write.
pub trait BlobStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored under `name` yet.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Removing a missing blob is not an error.
    fn remove(&self, name: &str) -> Result<()>;

    /// Human-readable location for logs and `stats` output.
    fn location(&self) -> String;
}

/// In-memory blob store for tests and ephemeral runs
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().get(name).cloned())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.write().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.blobs.write().remove(name);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
