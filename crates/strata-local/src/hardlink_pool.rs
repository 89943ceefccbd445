//! Hardlinking CAS: materializes CAS files as hardlinks in a local pool
//! directory so concurrent actions on the same worker reuse one copy of
//! each input.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::{BlobAccess, Digest, Result, StorageError};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

struct Entry {
    path: PathBuf,
    size_bytes: u64,
    last_link_time: std::time::Instant,
}

enum IndexState {
    Populated(Entry),
    InProgress(Arc<Notify>),
}

struct Index {
    entries: HashMap<String, IndexState>,
    total_bytes: u64,
}

/// Materializes blobs as hardlinks under `pool_dir`, bounded by a maximum
/// file count and byte budget, evicted LRU by last-link-time. Concurrent
/// requests for the same digest single-flight: the first caller fetches and
/// populates, later callers wait on its completion.
pub struct HardlinkPool<T> {
    inner: Arc<T>,
    pool_dir: PathBuf,
    max_files: usize,
    max_bytes: u64,
    index: Mutex<Index>,
}

impl<T: BlobAccess> HardlinkPool<T> {
    /// Create a pool rooted at `pool_dir`. The directory is emptied here —
    /// callers invoke this once at worker startup, per the persisted-state
    /// contract that the pool never survives a restart with stale entries.
    pub async fn new(inner: Arc<T>, pool_dir: PathBuf, max_files: usize, max_bytes: u64) -> Result<Self> {
        Self::purge_dir(&pool_dir).await?;
        tokio::fs::create_dir_all(&pool_dir)
            .await
            .map_err(|e| StorageError::io("creating hardlink pool dir", e))?;

        Ok(Self {
            inner,
            pool_dir,
            max_files,
            max_bytes,
            index: Mutex::new(Index {
                entries: HashMap::new(),
                total_bytes: 0,
            }),
        })
    }

    async fn purge_dir(dir: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io("purging hardlink pool dir on startup", e)),
        }
    }

    fn pool_path(&self, key: &str) -> PathBuf {
        // Digest keys contain ':' from the canonical key form; replace it so
        // the pool directory stays flat across filesystems that reject it.
        self.pool_dir.join(key.replace(':', "_"))
    }

    /// Materialize `digest` at `target_path`, fetching and populating the
    /// pool on first access, hardlinking directly on subsequent ones.
    pub async fn materialize(&self, digest: &Digest, target_path: &Path) -> Result<()> {
        let key = digest.key_with_instance();

        loop {
            let waiter = {
                let mut index = self.index.lock();
                match index.entries.get(&key) {
                    Some(IndexState::Populated(entry)) => {
                        let path = entry.path.clone();
                        drop(index);
                        self.link_and_touch(&key, &path, target_path).await?;
                        return Ok(());
                    }
                    Some(IndexState::InProgress(notify)) => Some(Arc::clone(notify)),
                    None => {
                        index
                            .entries
                            .insert(key.clone(), IndexState::InProgress(Arc::new(Notify::new())));
                        None
                    }
                }
            };

            if let Some(notify) = waiter {
                notify.notified().await;
                continue;
            }

            // We own population for this key.
            match self.populate(digest, &key).await {
                Ok(entry) => {
                    let path = entry.path.clone();
                    let size = entry.size_bytes;
                    {
                        let mut index = self.index.lock();
                        if let Some(IndexState::InProgress(notify)) =
                            index.entries.insert(key.clone(), IndexState::Populated(entry))
                        {
                            notify.notify_waiters();
                        }
                        index.total_bytes += size;
                    }
                    self.evict_if_needed();
                    self.link_and_touch(&key, &path, target_path).await?;
                    return Ok(());
                }
                Err(e) => {
                    let mut index = self.index.lock();
                    if let Some(IndexState::InProgress(notify)) = index.entries.remove(&key) {
                        notify.notify_waiters();
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn populate(&self, digest: &Digest, key: &str) -> Result<Entry> {
        let pool_path = self.pool_path(key);
        let tmp_path = pool_path.with_extension("tmp");

        let bytes = self
            .inner
            .get(digest)
            .await?
            .collect()
            .await
            .map_err(|e| StorageError::io(format!("fetching blob to populate pool for {key}"), e))?;

        let result: Result<()> = async {
            let mut file = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(|e| StorageError::io("creating pool tempfile", e))?;
            file.write_all(&bytes)
                .await
                .map_err(|e| StorageError::io("writing pool tempfile", e))?;
            file.flush().await.map_err(|e| StorageError::io("flushing pool tempfile", e))?;
            tokio::fs::rename(&tmp_path, &pool_path)
                .await
                .map_err(|e| StorageError::io("renaming pool tempfile into place", e))
        }
        .await;

        if let Err(e) = result {
            // Cancellation/failure MUST NOT leave a partial file in the pool.
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        Ok(Entry {
            path: pool_path,
            size_bytes: bytes.len() as u64,
            last_link_time: std::time::Instant::now(),
        })
    }

    async fn link_and_touch(&self, key: &str, pool_path: &Path, target_path: &Path) -> Result<()> {
        if let Some(parent) = target_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io("creating target parent dir", e))?;
        }
        // The kernel keeps the inode alive via the pool's own link even if
        // the pool copy is later evicted, so this hardlink never dangles.
        match tokio::fs::hard_link(pool_path, target_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(StorageError::io("hardlinking pool file into target", e)),
        }

        let mut index = self.index.lock();
        if let Some(IndexState::Populated(entry)) = index.entries.get_mut(key) {
            entry.last_link_time = std::time::Instant::now();
        }
        Ok(())
    }

    fn evict_if_needed(&self) {
        let mut index = self.index.lock();
        while index.entries.len() > self.max_files || index.total_bytes > self.max_bytes {
            let victim = index
                .entries
                .iter()
                .filter_map(|(k, state)| match state {
                    IndexState::Populated(entry) => Some((k.clone(), entry.last_link_time)),
                    IndexState::InProgress(_) => None,
                })
                .min_by_key(|(_, last_link_time)| *last_link_time)
                .map(|(k, _)| k);

            let Some(victim_key) = victim else {
                break;
            };

            if let Some(IndexState::Populated(entry)) = index.entries.remove(&victim_key) {
                index.total_bytes = index.total_bytes.saturating_sub(entry.size_bytes);
                // Unlinking the pool's copy never blocks: the kernel keeps
                // the inode alive for any target that already hardlinked it.
                let path = entry.path;
                tokio::spawn(async move {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        tracing::warn!(path = %path.display(), error = %e, "evicting pool file failed");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::collections::{HashMap as StdHashMap, HashSet};
    use strata_core::{BlobStream, HashFunction};
    use tokio::io::AsyncRead;

    struct MemoryStore {
        data: StdHashMap<String, Bytes>,
    }

    impl MemoryStore {
        fn seeded(entries: &[(&Digest, &[u8])]) -> Self {
            let data = entries
                .iter()
                .map(|(d, bytes)| (d.key_without_instance(), Bytes::copy_from_slice(bytes)))
                .collect();
            Self { data }
        }
    }

    #[async_trait]
    impl BlobAccess for MemoryStore {
        async fn get(&self, digest: &Digest) -> Result<BlobStream> {
            let bytes = self
                .data
                .get(&digest.key_without_instance())
                .cloned()
                .ok_or_else(|| StorageError::not_found(digest.key_with_instance()))?;
            Ok(BlobStream::new(Box::pin(stream::once(async move { Ok(bytes) }))))
        }

        async fn put(&self, _digest: &Digest, _reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
            Ok(())
        }

        async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
            Ok(digests
                .iter()
                .filter(|d| !self.data.contains_key(&d.key_without_instance()))
                .cloned()
                .collect())
        }

        async fn delete(&self, _digest: &Digest) -> Result<()> {
            Ok(())
        }
    }

    fn digest(content: &[u8]) -> Digest {
        Digest::from_bytes("", HashFunction::Sha256, content)
    }

    #[tokio::test]
    async fn materialize_hardlinks_the_same_inode_twice() {
        let d = digest(b"payload");
        let store = Arc::new(MemoryStore::seeded(&[(&d, b"payload")]));
        let tmp = tempfile::tempdir().unwrap();
        let pool = HardlinkPool::new(Arc::clone(&store), tmp.path().join("pool"), 100, 1024 * 1024)
            .await
            .unwrap();

        let target_a = tmp.path().join("a/input");
        let target_b = tmp.path().join("b/input");
        pool.materialize(&d, &target_a).await.unwrap();
        pool.materialize(&d, &target_b).await.unwrap();

        let meta_a = tokio::fs::metadata(&target_a).await.unwrap();
        let meta_b = tokio::fs::metadata(&target_b).await.unwrap();
        assert_eq!(
            std::os::unix::fs::MetadataExt::ino(&meta_a),
            std::os::unix::fs::MetadataExt::ino(&meta_b)
        );
        assert_eq!(tokio::fs::read(&target_a).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn materialize_propagates_missing_blob_error() {
        let d = digest(b"absent");
        let store = Arc::new(MemoryStore::seeded(&[]));
        let tmp = tempfile::tempdir().unwrap();
        let pool = HardlinkPool::new(store, tmp.path().join("pool"), 100, 1024 * 1024)
            .await
            .unwrap();

        let result = pool.materialize(&d, &tmp.path().join("out")).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn eviction_keeps_pool_within_max_files() {
        let entries: Vec<Digest> = (0..5u8).map(|i| digest(&[i])).collect();
        let seeded: Vec<(&Digest, &[u8])> = entries.iter().map(|d| (d, b"x".as_slice())).collect();
        let store = Arc::new(MemoryStore::seeded(&seeded));
        let tmp = tempfile::tempdir().unwrap();
        let pool = HardlinkPool::new(store, tmp.path().join("pool"), 2, 1024 * 1024)
            .await
            .unwrap();

        for (i, d) in entries.iter().enumerate() {
            pool.materialize(d, &tmp.path().join(format!("out-{i}"))).await.unwrap();
        }

        // Give the spawned eviction removals a chance to run.
        tokio::task::yield_now().await;
        assert!(pool.index.lock().entries.len() <= 2);
    }
}
