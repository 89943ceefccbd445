//! Bazel HTTP cache protocol back end: `GET`/`PUT`/`HEAD` against
//! `{base_url}/{prefix}/{hash}`. `DELETE` is unimplemented (the protocol
//! has no such verb); any non-200/404 response maps to `Unknown`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::HashSet;
use strata_core::{BlobAccess, BlobStream, Digest, Result, StorageError};
use tokio::io::{AsyncRead, AsyncReadExt};

pub struct HttpCacheBlobStore {
    client: reqwest::Client,
    base_url: String,
    prefix: String,
}

impl HttpCacheBlobStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            prefix: prefix.into(),
        }
    }

    fn url_for(&self, digest: &Digest) -> String {
        format!("{}/{}/{}", self.base_url, self.prefix, digest.hash)
    }
}

fn unknown(operation: &str, status: reqwest::StatusCode) -> StorageError {
    StorageError::Http {
        operation: operation.to_string(),
        status: status.as_u16(),
    }
}

fn transport(operation: &str, source: reqwest::Error) -> StorageError {
    StorageError::io(operation, std::io::Error::other(source))
}

#[async_trait]
impl BlobAccess for HttpCacheBlobStore {
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        let resp = self
            .client
            .get(self.url_for(digest))
            .send()
            .await
            .map_err(|e| transport("GET", e))?;

        match resp.status() {
            reqwest::StatusCode::OK => {
                let bytes = resp.bytes().await.map_err(|e| transport("GET body", e))?;
                Ok(BlobStream::new(Box::pin(stream::once(async move { Ok(bytes) }))))
            }
            reqwest::StatusCode::NOT_FOUND => Err(StorageError::not_found(digest.key_with_instance())),
            status => Err(unknown("GET", status)),
        }
    }

    async fn put(&self, digest: &Digest, mut reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::io("buffering http cache put", e))?;

        let resp = self
            .client
            .put(self.url_for(digest))
            .body(buf)
            .send()
            .await
            .map_err(|e| transport("PUT", e))?;

        match resp.status() {
            reqwest::StatusCode::OK | reqwest::StatusCode::CREATED | reqwest::StatusCode::NO_CONTENT => Ok(()),
            status => Err(unknown("PUT", status)),
        }
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        let mut missing = HashSet::new();
        for digest in digests {
            let resp = self
                .client
                .head(self.url_for(digest))
                .send()
                .await
                .map_err(|e| transport("HEAD", e))?;
            match resp.status() {
                reqwest::StatusCode::OK => {}
                reqwest::StatusCode::NOT_FOUND => {
                    missing.insert(digest.clone());
                }
                status => return Err(unknown("HEAD", status)),
            }
        }
        Ok(missing)
    }

    async fn delete(&self, _digest: &Digest) -> Result<()> {
        Err(StorageError::Unimplemented(
            "DELETE is not part of the Bazel HTTP cache protocol".to_string(),
        ))
    }
}
