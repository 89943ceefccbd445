//! Directory-caching CAS: a bounded LRU holding decoded Directory records,
//! keyed by digest. Entries are immutable under their digest, so there is
//! no invalidation path — only eviction by capacity.

use lru::LruCache;
use parking_lot::Mutex;
use prost::Message;
use std::num::NonZeroUsize;
use std::sync::Arc;
use strata_core::{BlobAccess, Digest, Result, StorageError};

/// Wraps a `BlobAccess` CAS, decoding and caching any `prost::Message` type
/// `D` keyed by digest. Cache-miss fetches raw bytes from the underlying
/// CAS, decodes, inserts with LRU accounting, and returns the decoded
/// record; cache-hit returns the already-decoded record directly.
pub struct DirectoryCachingCas<T, D> {
    inner: Arc<T>,
    cache: Mutex<LruCache<String, Arc<D>>>,
}

impl<T: BlobAccess, D: Message + Default + 'static> DirectoryCachingCas<T, D> {
    #[must_use]
    pub fn new(inner: Arc<T>, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch and decode the directory record named by `digest`, serving
    /// from cache when possible.
    pub async fn get_directory(&self, digest: &Digest) -> Result<Arc<D>> {
        let key = digest.key_with_instance();

        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(cached));
        }

        let bytes = self.inner.get(digest).await?.collect().await.map_err(|e| {
            StorageError::io(format!("reading directory bytes for {key}"), e)
        })?;

        let decoded = D::decode(bytes.as_ref()).map_err(|source| StorageError::Decode {
            key: key.clone(),
            source,
        })?;
        let decoded = Arc::new(decoded);

        self.cache.lock().put(key, Arc::clone(&decoded));
        Ok(decoded)
    }

    /// Number of decoded records currently resident.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
