//! Redis back end: digest keys map to raw blob bytes; existence checks use
//! pipelined `EXISTS`; a `Nil` reply on `GET` maps to `NotFound`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use strata_core::{BlobAccess, BlobStream, Digest, Result, StorageError};
use tokio::io::{AsyncRead, AsyncReadExt};

pub struct RedisBlobStore {
    conn: ConnectionManager,
}

impl RedisBlobStore {
    /// Connect to `url`, keeping a multiplexed connection manager so
    /// concurrent callers share one underlying connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StorageError::Config(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| redis_err("connecting", e))?;
        Ok(Self { conn })
    }
}

fn redis_err(operation: &str, source: redis::RedisError) -> StorageError {
    StorageError::Redis {
        operation: operation.to_string(),
        source: Box::new(source),
    }
}

#[async_trait]
impl BlobAccess for RedisBlobStore {
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(digest.key_without_instance())
            .await
            .map_err(|e| redis_err("GET", e))?;
        let bytes = value.ok_or_else(|| StorageError::not_found(digest.key_with_instance()))?;
        Ok(BlobStream::new(Box::pin(stream::once(async move {
            Ok(Bytes::from(bytes))
        }))))
    }

    async fn put(&self, digest: &Digest, mut reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::io("buffering redis put", e))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(digest.key_without_instance(), buf)
            .await
            .map_err(|e| redis_err("SET", e))?;
        Ok(())
    }

    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        if digests.is_empty() {
            return Ok(HashSet::new());
        }
        let mut pipe = redis::pipe();
        for digest in digests {
            pipe.exists(digest.key_without_instance());
        }
        let mut conn = self.conn.clone();
        let exists: Vec<bool> = pipe.query_async(&mut conn).await.map_err(|e| redis_err("EXISTS", e))?;

        Ok(digests
            .iter()
            .zip(exists)
            .filter_map(|(digest, present)| (!present).then(|| digest.clone()))
            .collect())
    }

    async fn delete(&self, digest: &Digest) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(digest.key_without_instance()).await.map_err(|e| redis_err("DEL", e))?;
        Ok(())
    }
}
