//! Metrics adapter: counters and latency histograms per logical store,
//! labeled by store name and operation. Pure pass-through otherwise.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use strata_core::{BlobAccess, BlobStream, Digest, Result};
use tokio::io::AsyncRead;

pub struct MetricsBlobAccess<T> {
    inner: Arc<T>,
    store_name: &'static str,
}

impl<T> MetricsBlobAccess<T> {
    #[must_use]
    pub fn new(inner: Arc<T>, store_name: &'static str) -> Self {
        Self { inner, store_name }
    }

    fn record(&self, operation: &'static str, started: Instant, failed: bool) {
        let labels = [("store", self.store_name), ("operation", operation)];
        metrics::counter!("blob_access_calls_total", &labels).increment(1);
        if failed {
            metrics::counter!("blob_access_errors_total", &labels).increment(1);
        }
        metrics::histogram!("blob_access_latency_seconds", &labels)
            .record(started.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl<T: BlobAccess + 'static> BlobAccess for MetricsBlobAccess<T> {
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        let started = Instant::now();
        let result = self.inner.get(digest).await;
        self.record("get", started, result.is_err());
        result
    }

    async fn put(&self, digest: &Digest, reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.put(digest, reader).await;
        self.record("put", started, result.is_err());
        result
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        let started = Instant::now();
        let result = self.inner.find_missing(digests).await;
        self.record("find_missing", started, result.is_err());
        result
    }

    async fn delete(&self, digest: &Digest) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.delete(digest).await;
        self.record("delete", started, result.is_err());
        result
    }
}
