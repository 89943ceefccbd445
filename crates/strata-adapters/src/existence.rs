//! Existence-precondition adapter: remaps `NotFound` to `FailedPrecondition`
//! on the streaming `Get` path, so a client walking a directory tree can
//! stop without mistaking absence for a to-be-retried transient failure.

use async_trait::async_trait;
use futures::stream::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use strata_core::{BlobAccess, BlobStream, Digest, Result, StorageError};
use tokio::io::AsyncRead;

pub struct ExistencePreconditionBlobAccess<T: ?Sized> {
    inner: Arc<T>,
}

impl<T: ?Sized> ExistencePreconditionBlobAccess<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: BlobAccess + ?Sized + 'static> BlobAccess for ExistencePreconditionBlobAccess<T> {
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        match self.inner.get(digest).await {
            Ok(stream) => Ok(stream),
            Err(StorageError::NotFound { key }) => Err(StorageError::FailedPrecondition { key }),
            Err(other) => Err(other),
        }
        .map(|stream| remap_stream_errors(stream, digest.key_with_instance()))
    }

    async fn put(&self, digest: &Digest, reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        self.inner.put(digest, reader).await
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        self.inner.find_missing(digests).await
    }

    async fn delete(&self, digest: &Digest) -> Result<()> {
        self.inner.delete(digest).await
    }
}

/// Streaming `Get` errors surfacing after the first chunk (e.g. a backend
/// that fails mid-stream) get the same NotFound-to-FailedPrecondition
/// remap applied, not just the initial call error.
fn remap_stream_errors(stream: BlobStream, key: String) -> BlobStream {
    let remapped = stream.0.map(move |item| {
        item.map_err(|io_err| {
            if let Some(storage_err) = io_err.get_ref().and_then(|e| e.downcast_ref::<StorageError>()) {
                if let StorageError::NotFound { key: inner_key } = storage_err {
                    return std::io::Error::other(StorageError::FailedPrecondition {
                        key: inner_key.clone(),
                    });
                }
            }
            let _ = &key;
            io_err
        })
    });
    BlobStream::new(Box::pin(remapped))
}
