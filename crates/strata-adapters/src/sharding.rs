//! Sharding adapter: partitions traffic across N back ends by FNV-1a over
//! the digest key, skipping drained slots without reshuffling the whole set.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use strata_core::{fnv1a_hash, BlobAccess, BlobStream, Digest, Result, StorageError};
use tokio::io::AsyncRead;

/// One slot in a `ShardSet`: either bound to a live back end, or drained.
pub enum Slot {
    Live(Arc<dyn BlobAccess>),
    Drained,
}

/// Ordered, immutable-after-construction list of back-end slots. Shape
/// changes (draining a shard) require constructing a new `ShardSet`;
/// rebalancing across shape changes is not guaranteed.
pub struct ShardSet {
    slots: Vec<Slot>,
    seed: u64,
    strict_find_missing: bool,
}

impl ShardSet {
    #[must_use]
    pub fn new(slots: Vec<Slot>, seed: u64, strict_find_missing: bool) -> Self {
        Self {
            slots,
            seed,
            strict_find_missing,
        }
    }

    fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Live(_))).count()
    }

    /// Picks a live slot index for `key`: a primary hash selects the home
    /// slot, and if that slot is drained, probing walks forward through the
    /// remaining slots in a fixed order until a live one is found. Every key
    /// still lands on the same home slot when it's live, so draining one
    /// shard only redirects the traffic that actually hashed there, rather
    /// than reshuffling everything (the §4.3(c) requirement) — and because
    /// the probe visits every slot exactly once before giving up, a live
    /// slot is always found if one exists.
    fn select(&self, key: &str) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let len = self.slots.len();
        let home = (fnv1a_hash(key.as_bytes(), self.seed) % len as u64) as usize;
        (0..len)
            .map(|attempt| (home + attempt) % len)
            .find(|idx| matches!(self.slots[*idx], Slot::Live(_)))
    }

    fn backend_for(&self, key: &str) -> Result<&Arc<dyn BlobAccess>> {
        let idx = self
            .select(key)
            .ok_or_else(|| StorageError::Config("no live shards available".to_string()))?;
        match &self.slots[idx] {
            Slot::Live(backend) => Ok(backend),
            Slot::Drained => unreachable!("select() only returns live indices"),
        }
    }

    fn group_by_backend(&self, digests: &[Digest]) -> Vec<(usize, Vec<Digest>)> {
        let mut groups: Vec<(usize, Vec<Digest>)> = Vec::new();
        for digest in digests {
            let key = digest.key_with_instance();
            let Some(idx) = self.select(&key) else {
                continue;
            };
            if let Some(entry) = groups.iter_mut().find(|(i, _)| *i == idx) {
                entry.1.push(digest.clone());
            } else {
                groups.push((idx, vec![digest.clone()]));
            }
        }
        groups
    }
}

#[async_trait]
impl BlobAccess for ShardSet {
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        self.backend_for(&digest.key_with_instance())?.get(digest).await
    }

    async fn put(&self, digest: &Digest, reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        self.backend_for(&digest.key_with_instance())?.put(digest, reader).await
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        let groups = self.group_by_backend(digests);
        let attempted = groups.len().max(self.live_count());

        let results = join_all(groups.into_iter().map(|(idx, group)| {
            let backend = match &self.slots[idx] {
                Slot::Live(backend) => Arc::clone(backend),
                Slot::Drained => unreachable!(),
            };
            async move { backend.find_missing(&group).await }
        }))
        .await;

        let mut missing = HashSet::new();
        let mut last_error = None;
        for result in results {
            match result {
                Ok(subset) => missing.extend(subset),
                Err(e) if self.strict_find_missing => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        // Partial-failure acceptance is the default policy: the union of
        // successful responses is returned even if a shard failed. When
        // `strict_find_missing` is set, the first shard error above already
        // returned instead of falling through to this union.
        if let Some(err) = last_error {
            tracing::warn!(
                error = %err,
                attempted,
                "shard reported a find_missing error; returning partial results"
            );
        }
        Ok(missing)
    }

    async fn delete(&self, digest: &Digest) -> Result<()> {
        self.backend_for(&digest.key_with_instance())?.delete(digest).await
    }
}
