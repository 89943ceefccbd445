//! The `BlobAccess` contract every store and decorator in this workspace
//! implements, and the types it reads and writes.

use crate::digest::Digest;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashSet;
use tokio::io::AsyncRead;

/// A stream of blob bytes returned from `BlobAccess::get`.
///
/// Wrapped in a newtype (rather than exposing the raw boxed stream) so
/// callers are forced to go through `BlobStream` and can't accidentally
/// treat a partially-consumed stream as a complete read.
pub struct BlobStream(pub BoxStream<'static, std::io::Result<Bytes>>);

impl BlobStream {
    #[must_use]
    pub fn new(stream: BoxStream<'static, std::io::Result<Bytes>>) -> Self {
        Self(stream)
    }

    /// Consume the stream, collecting every chunk into one buffer.
    ///
    /// Intended for small blobs (directory protos, action results) where
    /// buffering the whole thing is cheaper than threading a stream through
    /// caller code; large blobs should consume `self.0` directly.
    pub async fn collect(mut self) -> std::io::Result<Bytes> {
        use futures::StreamExt;
        let mut buf = Vec::new();
        while let Some(chunk) = self.0.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }
}

/// The uniform contract every store, decorator, and worker-local adapter in
/// this workspace implements. Every method is keyed by `Digest`; callers are
/// expected to have already resolved an instance name onto the digest
/// before calling in.
#[async_trait]
pub trait BlobAccess: Send + Sync {
    /// Stream the blob named by `digest`. Returns `StorageError::NotFound`
    /// if the store does not have it.
    async fn get(&self, digest: &Digest) -> Result<BlobStream>;

    /// Stream-write a blob named by `digest` from `reader`.
    ///
    /// Implementations must not trust `digest.size_bytes` as an upper bound
    /// on how much they read from `reader` without verifying it; that
    /// verification is the integrity adapter's job, not every leaf's.
    async fn put(&self, digest: &Digest, reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()>;

    /// Partition `digests` into the subset this store does not have.
    ///
    /// The returned set is a subset of `digests`; an empty result means
    /// every digest is already present.
    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>>;

    /// Remove a blob. Best-effort: most call sites (integrity invalidation
    /// on read-side corruption) do not propagate this error as primary.
    async fn delete(&self, digest: &Digest) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn collect_concatenates_chunks_in_order() {
        let chunks: Vec<std::io::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd")), Ok(Bytes::from_static(b"ef"))];
        let blob = BlobStream::new(Box::pin(stream::iter(chunks)));
        let collected = blob.collect().await.unwrap();
        assert_eq!(collected.as_ref(), b"abcdef");
    }

    #[tokio::test]
    async fn collect_propagates_a_mid_stream_error() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ok")),
            Err(std::io::Error::other("boom")),
        ];
        let blob = BlobStream::new(Box::pin(stream::iter(chunks)));
        assert!(blob.collect().await.is_err());
    }

    #[tokio::test]
    async fn collect_on_empty_stream_yields_empty_bytes() {
        let blob = BlobStream::new(Box::pin(stream::iter(Vec::<std::io::Result<Bytes>>::new())));
        let collected = blob.collect().await.unwrap();
        assert!(collected.is_empty());
    }
}
