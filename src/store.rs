//! Content stores holding message ciphertext off-chain.
//!
//! A [`MessageStore`] persists ciphertext and returns where it went. Reads go
//! through a [`ContentRetriever`], which picks a [`ContentFetcher`] by URL
//! scheme, fronts it with a [`ContentCache`] and verifies every byte it hands
//! back against the hash carried in the envelope.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::ContentCache;
use crate::envelope::LocationCode;
use crate::hash::{content_hash, verify_hash};
use crate::types::{ChainMailError, Result};

/// Where a stored message can be retrieved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLocation {
    /// Full retrieval URL.
    pub url: String,
    /// Opaque handle of the object within the store.
    pub resource: String,
    /// Raw location code naming the URL convention.
    pub location_code: u8,
}

/// Trait for persisting message ciphertext.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Store ciphertext for a message. Not idempotent: call once per send.
    async fn put_message(
        &self,
        message_id: &str,
        plaintext_hash: &[u8],
        ciphertext: &[u8],
    ) -> Result<StoredLocation>;
}

/// Trait for fetching stored ciphertext by URL.
#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    /// URL schemes this fetcher handles.
    fn schemes(&self) -> Vec<&'static str>;

    /// Fetch the raw bytes at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

fn resource_name(plaintext_hash: &[u8], ciphertext: &[u8]) -> String {
    let mut data = Vec::with_capacity(plaintext_hash.len() + ciphertext.len());
    data.extend_from_slice(plaintext_hash);
    data.extend_from_slice(ciphertext);
    hex::encode(content_hash(&data))
}

fn url_scheme(url: &str) -> Result<&str> {
    url.split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
        .ok_or_else(|| ChainMailError::Configuration(format!("url has no scheme: {}", url)))
}

// ============================================================================
// Content Retriever
// ============================================================================

/// Cache-first, hash-verified retrieval across fetch backends.
#[derive(Default, Clone)]
pub struct ContentRetriever {
    fetchers: HashMap<String, Arc<dyn ContentFetcher>>,
}

impl ContentRetriever {
    /// Creates a retriever with no backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fetcher for every scheme it handles.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        for scheme in fetcher.schemes() {
            self.fetchers.insert(scheme.to_string(), fetcher.clone());
        }
        self
    }

    /// Retrieve ciphertext at `url` whose SHA-256 must equal `expected_hash`.
    ///
    /// Cached bytes are used without touching the backend as long as they
    /// still verify. Fetched bytes are verified before they are cached or
    /// returned.
    pub async fn get_message(
        &self,
        url: &str,
        expected_hash: &[u8],
        cache: &dyn ContentCache,
    ) -> Result<Vec<u8>> {
        match cache.get(url).await {
            Ok(Some(cached)) => match verify_hash(&cached, expected_hash) {
                Ok(()) => {
                    debug!("content cache hit");
                    return Ok(cached);
                }
                Err(e) => warn!(error = %e, "cached content failed verification, refetching"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "content cache read failed"),
        }

        let scheme = url_scheme(url)?;
        let fetcher = self.fetchers.get(scheme).ok_or_else(|| {
            ChainMailError::Configuration(format!("no content fetcher for scheme {}", scheme))
        })?;

        let contents = fetcher.fetch(url).await?;
        verify_hash(&contents, expected_hash)?;

        if let Err(e) = cache.put(url, &contents).await {
            warn!(error = %e, "content cache write failed");
        }
        Ok(contents)
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-memory store under the `mem` scheme.
///
/// Returns [`LocationCode::UrlWithResource`] locations.
pub struct MemoryStore {
    name: String,
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    fetches: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store whose URLs start with `mem://{name}`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Number of fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Replace the object at `url`, returning the previous bytes.
    pub async fn replace(&self, url: &str, contents: Vec<u8>) -> Option<Vec<u8>> {
        self.objects.write().await.insert(url.to_string(), contents)
    }
}

#[async_trait::async_trait]
impl MessageStore for MemoryStore {
    async fn put_message(
        &self,
        _message_id: &str,
        plaintext_hash: &[u8],
        ciphertext: &[u8],
    ) -> Result<StoredLocation> {
        let resource = resource_name(plaintext_hash, ciphertext);
        let url = format!("mem://{}/{}", self.name, resource);
        self.objects
            .write()
            .await
            .insert(url.clone(), ciphertext.to_vec());
        Ok(StoredLocation {
            url,
            resource,
            location_code: LocationCode::UrlWithResource.code(),
        })
    }
}

#[async_trait::async_trait]
impl ContentFetcher for MemoryStore {
    fn schemes(&self) -> Vec<&'static str> {
        vec!["mem"]
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| ChainMailError::Storage(format!("no object at {}", url)))
    }
}

// ============================================================================
// File Store
// ============================================================================

/// Filesystem store under the `file` scheme.
///
/// Writes `<root>/<resource>` and returns [`LocationCode::Url`] locations.
/// Fetches outside the root are refused.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory objects are written to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, url: &str) -> Result<PathBuf> {
        let path = url
            .strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| ChainMailError::Storage(format!("not a file url: {}", url)))?;

        let escapes = path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(ChainMailError::Storage(format!(
                "{} is outside the store root",
                url
            )));
        }
        Ok(path)
    }
}

#[async_trait::async_trait]
impl MessageStore for FileStore {
    async fn put_message(
        &self,
        _message_id: &str,
        plaintext_hash: &[u8],
        ciphertext: &[u8],
    ) -> Result<StoredLocation> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ChainMailError::Storage(format!("{}: {}", self.root.display(), e)))?;

        let resource = resource_name(plaintext_hash, ciphertext);
        let path = self.root.join(&resource);
        tokio::fs::write(&path, ciphertext)
            .await
            .map_err(|e| ChainMailError::Storage(format!("{}: {}", path.display(), e)))?;

        Ok(StoredLocation {
            url: format!("file://{}", path.display()),
            resource,
            location_code: LocationCode::Url.code(),
        })
    }
}

#[async_trait::async_trait]
impl ContentFetcher for FileStore {
    fn schemes(&self) -> Vec<&'static str> {
        vec!["file"]
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.object_path(url)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ChainMailError::Storage(format!("{}: {}", path.display(), e)))
    }
}

// ============================================================================
// HTTP Fetcher
// ============================================================================

/// Read-only fetcher for `http` and `https` URLs.
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a default HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fetcher using the given client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ContentFetcher for HttpFetcher {
    fn schemes(&self) -> Vec<&'static str> {
        vec!["http", "https"]
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChainMailError::Storage(format!("GET {} failed: {}", url, e)))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ChainMailError::Storage(format!("reading {} failed: {}", url, e)))?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn test_memory_store_read_through_cache() {
        let store = Arc::new(MemoryStore::new("test"));
        let retriever = ContentRetriever::new().with_fetcher(store.clone());
        let cache = MemoryCache::default();

        let hash = content_hash(b"ciphertext");
        let location = store
            .put_message("id", &content_hash(b"plain"), b"ciphertext")
            .await
            .unwrap();
        assert_eq!(location.location_code, LocationCode::UrlWithResource.code());
        assert!(location.url.ends_with(&location.resource));

        let first = retriever.get_message(&location.url, &hash, &cache).await.unwrap();
        let second = retriever.get_message(&location.url, &hash, &cache).await.unwrap();
        assert_eq!(first, b"ciphertext");
        assert_eq!(first, second);
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_tampered_fetch_is_not_cached() {
        let store = Arc::new(MemoryStore::new("test"));
        let retriever = ContentRetriever::new().with_fetcher(store.clone());
        let cache = MemoryCache::default();

        let location = store.put_message("id", &[0u8; 32], b"good").await.unwrap();
        store.replace(&location.url, b"evil".to_vec()).await;

        let result = retriever
            .get_message(&location.url, &content_hash(b"good"), &cache)
            .await;
        assert!(matches!(result, Err(ChainMailError::Integrity(_))));
        assert_eq!(cache.get(&location.url).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bad_cache_entry_is_refetched() {
        let store = Arc::new(MemoryStore::new("test"));
        let retriever = ContentRetriever::new().with_fetcher(store.clone());
        let cache = MemoryCache::default();

        let location = store.put_message("id", &[0u8; 32], b"good").await.unwrap();
        cache.put(&location.url, b"stale").await.unwrap();

        let contents = retriever
            .get_message(&location.url, &content_hash(b"good"), &cache)
            .await
            .unwrap();
        assert_eq!(contents, b"good");
        assert_eq!(store.fetch_count(), 1);
        assert_eq!(cache.get(&location.url).await.unwrap(), Some(b"good".to_vec()));
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        let retriever = ContentRetriever::new();
        let result = retriever
            .get_message("ipfs://abc", &[0u8; 32], &MemoryCache::default())
            .await;
        assert!(matches!(result, Err(ChainMailError::Configuration(_))));

        let result = retriever
            .get_message("no-scheme", &[0u8; 32], &MemoryCache::default())
            .await;
        assert!(matches!(result, Err(ChainMailError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        let retriever = ContentRetriever::new().with_fetcher(store.clone());

        let location = store.put_message("id", &[1u8; 32], b"on disk").await.unwrap();
        assert_eq!(location.location_code, LocationCode::Url.code());
        assert!(location.url.starts_with("file://"));

        let contents = retriever
            .get_message(&location.url, &content_hash(b"on disk"), &MemoryCache::default())
            .await
            .unwrap();
        assert_eq!(contents, b"on disk");
    }

    #[tokio::test]
    async fn test_file_store_refuses_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("objects"));

        let outside = format!("file://{}/secret", dir.path().display());
        assert!(matches!(
            store.fetch(&outside).await,
            Err(ChainMailError::Storage(_))
        ));

        let escape = format!("file://{}/objects/../secret", dir.path().display());
        assert!(matches!(
            store.fetch(&escape).await,
            Err(ChainMailError::Storage(_))
        ));
    }
}
