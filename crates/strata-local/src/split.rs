//! Read/write-decoupling CAS: binds a process-wide shared reader (with
//! hardlinking and directory caching) to a per-worker writer (the batched
//! store), since workers each need an independent write-side batch but
//! benefit from sharing the read-side cache.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use strata_core::{BlobAccess, BlobStream, Digest, Result};
use tokio::io::AsyncRead;

/// Dispatches `Get`-family calls to a shared reader and `Put` to a
/// per-worker writer.
pub struct SplitCas<R: ?Sized, W: ?Sized> {
    reader: Arc<R>,
    writer: Arc<W>,
}

impl<R: ?Sized, W: ?Sized> SplitCas<R, W> {
    #[must_use]
    pub fn new(reader: Arc<R>, writer: Arc<W>) -> Self {
        Self { reader, writer }
    }
}

#[async_trait]
impl<R: BlobAccess + ?Sized + 'static, W: BlobAccess + ?Sized + 'static> BlobAccess for SplitCas<R, W> {
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        self.reader.get(digest).await
    }

    async fn put(&self, digest: &Digest, reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        self.writer.put(digest, reader).await
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        // FindMissing is a read-path query about existence; ask the reader
        // so it benefits from the same cache the Get path does.
        self.reader.find_missing(digests).await
    }

    async fn delete(&self, digest: &Digest) -> Result<()> {
        self.writer.delete(digest).await
    }
}
