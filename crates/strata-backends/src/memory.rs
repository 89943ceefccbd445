//! Process-local, ephemeral in-memory back end. Permitted to lose data
//! across restarts per the storage core's durability non-goal.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream;
use std::collections::HashSet;
use strata_core::{BlobAccess, BlobStream, Digest, Result, StorageError};
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Bytes>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobAccess for MemoryBlobStore {
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        let bytes = self
            .blobs
            .get(&digest.key_without_instance())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::not_found(digest.key_with_instance()))?;
        Ok(BlobStream::new(Box::pin(stream::once(async move { Ok(bytes) }))))
    }

    async fn put(&self, digest: &Digest, mut reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::io("buffering memory store put", e))?;
        self.blobs.insert(digest.key_without_instance(), Bytes::from(buf));
        Ok(())
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        Ok(digests
            .iter()
            .filter(|d| !self.blobs.contains_key(&d.key_without_instance()))
            .cloned()
            .collect())
    }

    async fn delete(&self, digest: &Digest) -> Result<()> {
        self.blobs.remove(&digest.key_without_instance());
        Ok(())
    }
}
