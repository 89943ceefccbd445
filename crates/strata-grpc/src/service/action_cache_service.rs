//! Implements `ActionCache`. Action results are opaque blobs keyed by the
//! action digest; this service only handles the encode/decode boundary, the
//! underlying `BlobAccess` stack does the storing.

use crate::reapi::action_cache_server::ActionCache;
use crate::reapi::{ActionResult, FailedActionResult, GetActionResultRequest, UpdateActionResultRequest};
use crate::service::convert::domain_digest;
use crate::format_bytestream_url;
use prost::Message as _;
use std::sync::Arc;
use strata_core::{BlobAccess, Digest, HashFunction, StorageError};
use tonic::{Request, Response, Status};

pub struct ActionCacheService {
    blobs: Arc<dyn BlobAccess>,
    /// Advertised in the `bytestream://` URL logged for failed actions; has
    /// no effect on storage, only on the address handed back to operators.
    advertised_host: String,
}

impl ActionCacheService {
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobAccess>) -> Self {
        Self {
            blobs,
            advertised_host: "localhost:8980".to_string(),
        }
    }

    #[must_use]
    pub fn with_advertised_host(mut self, host: impl Into<String>) -> Self {
        self.advertised_host = host.into();
        self
    }

    /// A failed action's `ActionResult` (non-zero exit code) gets framed
    /// into its own `FailedActionResult` envelope alongside the action
    /// digest that produced it, stored under its own content digest so a
    /// client or operator can retrieve it later via the logged
    /// `bytestream://` URL, matching the REAPI convention of addressing
    /// everything by its digest.
    async fn record_failure(&self, action_digest: &Digest, action_result: &ActionResult) {
        let recorded_at_unix_seconds = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let envelope = FailedActionResult {
            action_digest: Some(crate::service::convert::wire_digest(action_digest)),
            result: Some(action_result.clone()),
            recorded_at_unix_seconds,
        };
        let encoded = envelope.encode_to_vec();
        let envelope_digest = Digest::from_bytes(&action_digest.instance_name, HashFunction::Sha256, &encoded);

        if let Err(e) = self
            .blobs
            .put(&envelope_digest, Box::new(std::io::Cursor::new(encoded)))
            .await
        {
            tracing::warn!(action = %action_digest, error = %e, "failed to store failed-action envelope");
            return;
        }

        let url = format_bytestream_url(&self.advertised_host, &action_digest.instance_name, &envelope_digest);
        tracing::info!(
            action = %action_digest,
            exit_code = action_result.exit_code,
            url,
            "recorded failed action result"
        );
    }
}

#[tonic::async_trait]
impl ActionCache for ActionCacheService {
    async fn get_action_result(
        &self,
        request: Request<GetActionResultRequest>,
    ) -> Result<Response<ActionResult>, Status> {
        let req = request.into_inner();
        let wire = req
            .action_digest
            .ok_or_else(|| Status::invalid_argument("action_digest is required"))?;
        let digest = domain_digest(&req.instance_name, &wire)?;

        let bytes = self.blobs.get(&digest).await?.collect().await.map_err(|e| {
            Status::internal(format!("failed to read action result blob: {e}"))
        })?;

        let result = ActionResult::decode(bytes).map_err(|source| StorageError::Decode {
            key: digest.key_with_instance(),
            source,
        })?;

        Ok(Response::new(result))
    }

    async fn update_action_result(
        &self,
        request: Request<UpdateActionResultRequest>,
    ) -> Result<Response<ActionResult>, Status> {
        let req = request.into_inner();
        let wire = req
            .action_digest
            .ok_or_else(|| Status::invalid_argument("action_digest is required"))?;
        let digest = domain_digest(&req.instance_name, &wire)?;
        let action_result = req
            .action_result
            .ok_or_else(|| Status::invalid_argument("action_result is required"))?;

        if action_result.exit_code != 0 {
            self.record_failure(&digest, &action_result).await;
        }

        let encoded = action_result.encode_to_vec();
        self.blobs
            .put(&digest, Box::new(std::io::Cursor::new(encoded)))
            .await?;

        Ok(Response::new(action_result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::convert::wire_digest;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::collections::{HashMap, HashSet};
    use strata_core::{BlobStream, Result};
    use tokio::io::{AsyncRead, AsyncReadExt};
    use tokio::sync::Mutex;

    struct MemoryStore {
        data: Mutex<HashMap<String, Bytes>>,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                data: Mutex::new(HashMap::new()),
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

    fn action_digest() -> Digest {
        Digest::from_bytes("", HashFunction::Sha256, b"an-action")
    }

    #[tokio::test]
    async fn update_then_get_action_result_round_trips() {
        let store = Arc::new(MemoryStore::new());
        let service = ActionCacheService::new(store);
        let digest = action_digest();

        let update = Request::new(UpdateActionResultRequest {
            instance_name: String::new(),
            action_digest: Some(wire_digest(&digest)),
            action_result: Some(ActionResult {
                exit_code: 0,
                ..Default::default()
            }),
        });
        service.update_action_result(update).await.unwrap();

        let get = Request::new(GetActionResultRequest {
            instance_name: String::new(),
            action_digest: Some(wire_digest(&digest)),
        });
        let result = service.get_action_result(get).await.unwrap().into_inner();
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn get_action_result_missing_digest_is_invalid_argument() {
        let store = Arc::new(MemoryStore::new());
        let service = ActionCacheService::new(store);
        let request = Request::new(GetActionResultRequest {
            instance_name: String::new(),
            action_digest: None,
        });
        let err = service.get_action_result(request).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn failed_action_result_is_framed_and_stored_separately() {
        let store = Arc::new(MemoryStore::new());
        let service = ActionCacheService::new(Arc::clone(&store) as Arc<dyn BlobAccess>);
        let digest = action_digest();

        let update = Request::new(UpdateActionResultRequest {
            instance_name: String::new(),
            action_digest: Some(wire_digest(&digest)),
            action_result: Some(ActionResult {
                exit_code: 1,
                ..Default::default()
            }),
        });
        service.update_action_result(update).await.unwrap();

        // The action result itself, plus one extra envelope keyed by its own
        // digest, should now be present in the underlying store.
        assert_eq!(store.data.lock().await.len(), 2);
    }
}
