//! Batched-store adapter: a per-worker write-side decorator that absorbs
//! many small `Put`s and publishes them as a bounded pipeline, flushed
//! explicitly at action boundaries.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use strata_core::{BlobAccess, BlobStream, Digest, Result, StorageError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex};

struct PendingWrite {
    digest: Digest,
    bytes: Bytes,
}

/// Decorates a `BlobAccess` write sink with a bounded MPSC queue. `Put`
/// buffers the reader into memory and enqueues it, blocking the caller when
/// the queue is full (the natural back-pressure point in the resource
/// model). `Flush` drains the queue, coalescing duplicate digests so a
/// digest written twice in one batch only reaches the sink once.
pub struct BatchedBlobAccess<T: ?Sized> {
    inner: Arc<T>,
    sender: mpsc::Sender<PendingWrite>,
    receiver: Mutex<mpsc::Receiver<PendingWrite>>,
}

impl<T: BlobAccess + ?Sized + 'static> BatchedBlobAccess<T> {
    #[must_use]
    pub fn new(inner: Arc<T>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            inner,
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Drains every pending write, deduplicating by digest key (last write
    /// for a key wins) and attempting every distinct write even after the
    /// first terminal error, so side effects are maximized. Returns the
    /// first terminal error encountered, if any.
    pub async fn flush(&self) -> Result<()> {
        let mut receiver = self.receiver.lock().await;
        let mut pending: Vec<PendingWrite> = Vec::new();
        while let Ok(item) = receiver.try_recv() {
            pending.push(item);
        }

        let mut coalesced: std::collections::HashMap<String, PendingWrite> =
            std::collections::HashMap::new();
        for item in pending {
            coalesced.insert(item.digest.key_with_instance(), item);
        }

        let mut first_error = None;
        for (_, item) in coalesced {
            let reader: Box<dyn AsyncRead + Send + Unpin> =
                Box::new(std::io::Cursor::new(item.bytes.to_vec()));
            if let Err(e) = self.inner.put(&item.digest, reader).await {
                tracing::warn!(digest = %item.digest, error = %e, "batched flush write failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<T: BlobAccess + ?Sized + 'static> BlobAccess for BatchedBlobAccess<T> {
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        self.inner.get(digest).await
    }

    /// Buffers the reader and enqueues it; returns once accepted onto the
    /// queue, not once durably written. Callers MUST call `flush` before
    /// publishing a result or uploads may be lost.
    async fn put(&self, digest: &Digest, mut reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::io(format!("buffering batched put for {digest}"), e))?;

        self.sender
            .send(PendingWrite {
                digest: digest.clone(),
                bytes: Bytes::from(buf),
            })
            .await
            .map_err(|_| StorageError::Config("batched store queue closed".to_string()))
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        self.inner.find_missing(digests).await
    }

    async fn delete(&self, digest: &Digest) -> Result<()> {
        self.inner.delete(digest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::collections::HashMap;
    use tokio::sync::Mutex as TokioMutex;

    struct MemoryStore {
        data: TokioMutex<HashMap<String, Bytes>>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                data: TokioMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl BlobAccess for MemoryStore {
        async fn get(&self, digest: &Digest) -> Result<BlobStream> {
            let data = self.data.lock().await;
            let bytes = data
                .get(&digest.key_without_instance())
                .cloned()
                .ok_or_else(|| StorageError::not_found(digest.key_with_instance()))?;
            Ok(BlobStream::new(Box::pin(stream::once(async move { Ok(bytes) }))))
        }

        async fn put(&self, digest: &Digest, mut reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.map_err(|e| StorageError::io("put", e))?;
            self.data.lock().await.insert(digest.key_without_instance(), Bytes::from(buf));
            Ok(())
        }

        async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
            let data = self.data.lock().await;
            Ok(digests
                .iter()
                .filter(|d| !data.contains_key(&d.key_without_instance()))
                .cloned()
                .collect())
        }

        async fn delete(&self, digest: &Digest) -> Result<()> {
            self.data.lock().await.remove(&digest.key_without_instance());
            Ok(())
        }
    }

    fn digest(content: &[u8]) -> Digest {
        Digest::from_bytes("", strata_core::HashFunction::Sha256, content)
    }

    #[tokio::test]
    async fn flush_writes_every_enqueued_blob_and_dedups() {
        let store = Arc::new(MemoryStore::new());
        let batched = BatchedBlobAccess::new(Arc::clone(&store), 200);

        for i in 0..150u32 {
            // Every third write reuses the same digest to exercise coalescing.
            let content = format!("item-{}", i % 50).into_bytes();
            let d = digest(&content);
            batched
                .put(&d, Box::new(std::io::Cursor::new(content)))
                .await
                .unwrap();
        }

        batched.flush().await.unwrap();

        // 50 distinct digests should have reached the sink.
        assert_eq!(store.data.lock().await.len(), 50);
    }

    #[tokio::test]
    async fn capacity_100_queue_blocks_101st_put_until_drained() {
        let store = Arc::new(MemoryStore::new());
        let batched = Arc::new(BatchedBlobAccess::new(Arc::clone(&store), 100));

        for i in 0..100u32 {
            let content = format!("fill-{i}").into_bytes();
            let d = digest(&content);
            batched.put(&d, Box::new(std::io::Cursor::new(content))).await.unwrap();
        }

        let producer = {
            let batched = Arc::clone(&batched);
            tokio::spawn(async move {
                for i in 100..150u32 {
                    let content = format!("fill-{i}").into_bytes();
                    let d = digest(&content);
                    batched.put(&d, Box::new(std::io::Cursor::new(content))).await.unwrap();
                }
            })
        };

        // Give the producer a moment to fill the queue and block on the 101st.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!producer.is_finished(), "101st put should block while the queue is full");

        batched.flush().await.unwrap();
        producer.await.unwrap();
        batched.flush().await.unwrap();

        assert_eq!(store.data.lock().await.len(), 150);
    }

    #[tokio::test]
    async fn flush_surfaces_first_error_but_attempts_all() {
        struct FlakyOnOne {
            inner: Arc<MemoryStore>,
            poison: Digest,
        }

        #[async_trait]
        impl BlobAccess for FlakyOnOne {
            async fn get(&self, digest: &Digest) -> Result<BlobStream> {
                self.inner.get(digest).await
            }
            async fn put(&self, digest: &Digest, reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
                if digest == &self.poison {
                    return Err(StorageError::io("simulated", std::io::Error::other("boom")));
                }
                self.inner.put(digest, reader).await
            }
            async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
                self.inner.find_missing(digests).await
            }
            async fn delete(&self, digest: &Digest) -> Result<()> {
                self.inner.delete(digest).await
            }
        }

        let inner = Arc::new(MemoryStore::new());
        let poison = digest(b"poison");
        let flaky = Arc::new(FlakyOnOne {
            inner: Arc::clone(&inner),
            poison: poison.clone(),
        });
        let batched = BatchedBlobAccess::new(flaky, 10);

        batched.put(&poison, Box::new(std::io::Cursor::new(b"poison".to_vec()))).await.unwrap();
        let ok = digest(b"fine");
        batched.put(&ok, Box::new(std::io::Cursor::new(b"fine".to_vec()))).await.unwrap();

        let result = batched.flush().await;
        assert!(result.is_err());
        assert!(inner.data.lock().await.contains_key(&ok.key_without_instance()));
    }
}
