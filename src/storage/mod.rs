pub mod bookmarks;
pub mod cache;
pub mod persistent_cache;
pub mod region;
pub mod traits;

pub use bookmarks::BookmarkSet;
pub use cache::{CacheConfig, CacheEvent, CacheStats, CacheStore, Freshness};
pub use persistent_cache::{CacheSnapshot, FileBlobStore, PersistentCache, PersistentCacheConfig};
pub use region::{MergeKind, MergeMode, MergeOutcome, MergePolicy, RegionCache};
pub use traits::{BlobStore, MemoryBlobStore};
