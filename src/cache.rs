//! Time-boxed cache of fetched message ciphertext.
//!
//! Entries are keyed by a hash of the retrieval URL, never the URL text.
//! Lifetime counts from the write: reads do not refresh an entry, and a stale
//! entry is simply refetched and overwritten.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::hash::url_cache_key;
use crate::types::{ChainMailError, Result};

/// Default lifetime of a cache entry (one hour).
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Entry count above which [`MemoryCache::put`] drops expired entries first.
pub const MEMORY_CACHE_PRUNE_THRESHOLD: usize = 1024;

/// Trait for caching raw ciphertext by retrieval URL.
#[async_trait::async_trait]
pub trait ContentCache: Send + Sync {
    /// Retrieve fresh content for a URL.
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>>;

    /// Store content for a URL, replacing any previous entry.
    async fn put(&self, url: &str, contents: &[u8]) -> Result<()>;
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds.
    pub timeout_secs: u64,
    /// Directory for a file-backed cache; in memory when unset.
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_CACHE_TIMEOUT.as_secs(),
            dir: None,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the configured cache.
    pub fn build(&self) -> Arc<dyn ContentCache> {
        match &self.dir {
            Some(dir) => Arc::new(FileCache::new(dir.clone(), self.timeout())),
            None => Arc::new(MemoryCache::new(self.timeout())),
        }
    }
}

// ============================================================================
// Memory Cache
// ============================================================================

/// Entry in the memory cache with expiration.
struct CacheEntry {
    contents: Vec<u8>,
    /// `None` when the lifetime runs past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory content cache with TTL expiration.
///
/// Expired entries are dropped on `put` once the map grows past
/// [`MEMORY_CACHE_PRUNE_THRESHOLD`], or on demand with
/// [`MemoryCache::prune_expired`].
pub struct MemoryCache {
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl MemoryCache {
    /// Creates a new cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Number of entries, fresh or stale.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Remove all expired entries.
    pub async fn prune_expired(&self) {
        let mut cache = self.cache.write().await;
        let now = Instant::now();
        cache.retain(|_, entry| entry.is_fresh(now));
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl ContentCache for MemoryCache {
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let cache = self.cache.read().await;
        Ok(cache.get(&url_cache_key(url)).and_then(|entry| {
            if entry.is_fresh(Instant::now()) {
                Some(entry.contents.clone())
            } else {
                None
            }
        }))
    }

    async fn put(&self, url: &str, contents: &[u8]) -> Result<()> {
        let now = Instant::now();
        let mut cache = self.cache.write().await;
        if cache.len() >= MEMORY_CACHE_PRUNE_THRESHOLD {
            cache.retain(|_, entry| entry.is_fresh(now));
        }
        cache.insert(
            url_cache_key(url),
            CacheEntry {
                contents: contents.to_vec(),
                expires_at: now.checked_add(self.ttl),
            },
        );
        Ok(())
    }
}

// ============================================================================
// File Cache
// ============================================================================

/// Filesystem content cache: one file per entry, freshness by modification time.
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
}

impl FileCache {
    /// Creates a cache rooted at `dir` with the given TTL.
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    /// The directory entries are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(url_cache_key(url))
    }

    fn is_fresh(&self, modified: SystemTime) -> bool {
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age < self.ttl,
            // Modified in the future: clock skew, treat as fresh.
            Err(_) => true,
        }
    }

    /// Remove all expired entries.
    pub async fn prune_expired(&self) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(storage_error(&self.dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error(&self.dir, e))?
        {
            let metadata = entry.metadata().await.map_err(|e| storage_error(&entry.path(), e))?;
            let modified = metadata.modified().map_err(|e| storage_error(&entry.path(), e))?;
            if !self.is_fresh(modified) {
                tokio::fs::remove_file(entry.path())
                    .await
                    .map_err(|e| storage_error(&entry.path(), e))?;
            }
        }
        Ok(())
    }
}

fn storage_error(path: &Path, e: std::io::Error) -> ChainMailError {
    ChainMailError::Storage(format!("{}: {}", path.display(), e))
}

#[async_trait::async_trait]
impl ContentCache for FileCache {
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(url);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(&path, e)),
        };
        let modified = metadata.modified().map_err(|e| storage_error(&path, e))?;
        if !self.is_fresh(modified) {
            return Ok(None);
        }

        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    async fn put(&self, url: &str, contents: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error(&self.dir, e))?;
        let path = self.entry_path(url);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| storage_error(&path, e))
    }
}
