//! Builds the composed `BlobAccess` stack from a `StorageConfig`: on the
//! read path integrity wraps sharding wraps the leaves, on the write path
//! integrity wraps the existence-precondition adapter wraps the *same*
//! sharded set the read path serves from, so everything a client puts is
//! immediately visible to a subsequent get. The two paths are stitched
//! together with `strata_local::SplitCas`.
//!
//! The per-worker batching adapter (`strata_adapters::BatchedBlobAccess`)
//! deliberately does not appear here: it belongs on a worker's local
//! materialization path, flushed at action boundaries, not on the RPC
//! front door — a `Put` that reached only a bounded MPSC queue with nothing
//! ever calling `flush` would never reach a leaf at all.

use crate::config::{BackendConfig, StorageConfig};
use std::sync::Arc;
use strata_adapters::{ExistencePreconditionBlobAccess, IntegrityBlobAccess, ShardSet, Slot};
use strata_backends::{DiskBlobStore, GrpcCasBlobStore, HttpCacheBlobStore, MemoryBlobStore, RedisBlobStore};
use strata_core::{BlobAccess, StorageError};
use strata_local::SplitCas;
use tonic::transport::Channel;
use tracing::info;

/// Build a leaf `BlobAccess` from a single shard's backend configuration.
async fn build_leaf(config: &BackendConfig) -> Result<Arc<dyn BlobAccess>, StorageError> {
    let leaf: Arc<dyn BlobAccess> = match config {
        BackendConfig::Memory => Arc::new(MemoryBlobStore::new()),
        BackendConfig::Disk { root } => Arc::new(DiskBlobStore::new(root.clone()).await?),
        BackendConfig::Redis { url } => Arc::new(RedisBlobStore::connect(url).await?),
        BackendConfig::Http { base_url, prefix } => {
            Arc::new(HttpCacheBlobStore::new(base_url.clone(), prefix.clone()))
        }
        BackendConfig::GrpcCas {
            endpoint,
            instance_name,
        } => {
            let channel = Channel::from_shared(endpoint.clone())
                .map_err(|e| StorageError::Config(format!("invalid endpoint {endpoint}: {e}")))?
                .connect_lazy();
            Arc::new(GrpcCasBlobStore::new(channel, instance_name.clone()))
        }
    };
    Ok(leaf)
}

/// The fully-assembled stack: a single `BlobAccess` whose `Get`/`FindMissing`
/// route through the read path and whose `Put`/`Delete` route through the
/// write path, per the control-flow spec.
pub async fn build_stack(config: &StorageConfig) -> Result<Arc<dyn BlobAccess>, StorageError> {
    if config.shards.is_empty() {
        return Err(StorageError::Config(
            "at least one shard backend is required".to_string(),
        ));
    }

    let mut slots = Vec::with_capacity(config.shards.len());
    for backend in &config.shards {
        slots.push(Slot::Live(build_leaf(backend).await?));
    }
    let shard_set: Arc<dyn BlobAccess> =
        Arc::new(ShardSet::new(slots, config.shard_seed, config.strict_find_missing));

    // Write path: existence-precondition wraps the *same* sharded set the
    // read path serves from. Sharing one `Arc` here (rather than building a
    // second, disjoint leaf) is what makes a `Put` visible to a subsequent
    // `Get` on the same digest.
    let existence_guarded: Arc<dyn BlobAccess> =
        Arc::new(ExistencePreconditionBlobAccess::new(Arc::clone(&shard_set)));

    let split: Arc<dyn BlobAccess> = Arc::new(SplitCas::new(shard_set, existence_guarded));

    let stack: Arc<dyn BlobAccess> = if config.integrity_enabled {
        Arc::new(IntegrityBlobAccess::new(split))
    } else {
        split
    };

    info!(
        shard_count = config.shards.len(),
        integrity_enabled = config.integrity_enabled,
        "assembled BlobAccess stack"
    );

    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Digest, HashFunction};

    #[tokio::test]
    async fn memory_only_stack_round_trips_a_blob() {
        let config = StorageConfig {
            shards: vec![BackendConfig::Memory],
            ..StorageConfig::default()
        };
        let stack = build_stack(&config).await.unwrap();

        let digest = Digest::from_bytes("", HashFunction::Sha256, b"hello assembly");
        stack
            .put(&digest, Box::new(std::io::Cursor::new(b"hello assembly".to_vec())))
            .await
            .unwrap();

        let collected = stack.get(&digest).await.unwrap().collect().await.unwrap();
        assert_eq!(collected.as_ref(), b"hello assembly");
    }

    #[tokio::test]
    async fn empty_shard_list_is_rejected() {
        let config = StorageConfig {
            shards: vec![],
            ..StorageConfig::default()
        };
        let result = build_stack(&config).await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[tokio::test]
    async fn put_is_immediately_visible_to_find_missing_without_a_flush() {
        // Regression: the write path used to enqueue onto a batched adapter
        // that only a never-called `flush()` would drain, and built a second,
        // disjoint leaf from the one the read path served. Neither a missing
        // flush nor a reader/writer split should be able to hide a put.
        let config = StorageConfig {
            shards: vec![BackendConfig::Memory],
            ..StorageConfig::default()
        };
        let stack = build_stack(&config).await.unwrap();
        let digest = Digest::from_bytes("", HashFunction::Sha256, b"visible immediately");
        stack
            .put(&digest, Box::new(std::io::Cursor::new(b"visible immediately".to_vec())))
            .await
            .unwrap();

        let missing = stack.find_missing(&[digest.clone()]).await.unwrap();
        assert!(missing.is_empty());
        let collected = stack.get(&digest).await.unwrap().collect().await.unwrap();
        assert_eq!(collected.as_ref(), b"visible immediately");
    }

    #[tokio::test]
    async fn disabling_integrity_still_serves_reads() {
        let config = StorageConfig {
            shards: vec![BackendConfig::Memory],
            integrity_enabled: false,
            ..StorageConfig::default()
        };
        let stack = build_stack(&config).await.unwrap();
        let digest = Digest::from_bytes("", HashFunction::Sha256, b"no integrity layer");
        stack
            .put(&digest, Box::new(std::io::Cursor::new(b"no integrity layer".to_vec())))
            .await
            .unwrap();
        let missing = stack.find_missing(&[digest]).await.unwrap();
        assert!(missing.is_empty());
    }
}
