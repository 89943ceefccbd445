//! Implements `google.bytestream.ByteStream` over a composed `BlobAccess`
//! stack: `Read` streams chunks of a configured size, `Write` accepts a
//! client-streamed upload, `QueryWriteStatus` is unimplemented.

use crate::bytestream::byte_stream_server::ByteStream;
use crate::bytestream::{
    QueryWriteStatusRequest, QueryWriteStatusResponse, ReadRequest, ReadResponse, WriteRequest,
    WriteResponse,
};
use crate::resource_name::{self, ResourceName};
use bytes::Bytes;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use strata_core::BlobAccess;
use tonic::{Request, Response, Status, Streaming};

pub struct ByteStreamService {
    blobs: Arc<dyn BlobAccess>,
    chunk_size: usize,
}

impl ByteStreamService {
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobAccess>, chunk_size: usize) -> Self {
        Self { blobs, chunk_size }
    }
}

type ReadStream = Pin<Box<dyn futures::Stream<Item = Result<ReadResponse, Status>> + Send>>;

#[tonic::async_trait]
impl ByteStream for ByteStreamService {
    type ReadStream = ReadStream;

    async fn read(&self, request: Request<ReadRequest>) -> Result<Response<Self::ReadStream>, Status> {
        let req = request.into_inner();
        if req.read_offset != 0 || req.read_limit != 0 {
            return Err(Status::unimplemented("partial-range reads are not supported"));
        }

        let parsed = resource_name::parse_read(&req.resource_name)?;
        let ResourceName::Read { digest, .. } = parsed else {
            return Err(Status::invalid_argument("not a read-form resource name"));
        };

        let body = self.blobs.get(&digest).await?;
        let chunk_size = self.chunk_size;

        let chunked = body.0.flat_map(move |item| {
            futures::stream::iter(match item {
                Ok(bytes) => chunk_bytes(bytes, chunk_size)
                    .into_iter()
                    .map(|data| Ok(ReadResponse { data: data.to_vec() }))
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(Status::internal(e.to_string()))],
            })
        });

        Ok(Response::new(Box::pin(chunked)))
    }

    async fn write(&self, request: Request<Streaming<WriteRequest>>) -> Result<Response<WriteResponse>, Status> {
        let mut stream = request.into_inner();

        let first = stream
            .next()
            .await
            .ok_or_else(|| Status::invalid_argument("empty write stream"))??;

        let parsed = resource_name::parse_write(&first.resource_name)?;
        let ResourceName::Write { digest, .. } = parsed else {
            return Err(Status::invalid_argument("not a write-form resource name"));
        };

        let mut buf = Vec::with_capacity(digest.size_bytes.max(0) as usize);
        buf.extend_from_slice(&first.data);
        let mut expected_offset = first.data.len() as i64;
        let mut finished = first.finish_write;

        while !finished {
            let next = stream
                .next()
                .await
                .ok_or_else(|| Status::invalid_argument("write stream ended before finish_write"))??;
            if !next.resource_name.is_empty() {
                return Err(Status::invalid_argument(
                    "subsequent WriteRequests must carry an empty resource_name",
                ));
            }
            if next.write_offset != expected_offset {
                return Err(Status::invalid_argument(format!(
                    "write_offset mismatch: expected {expected_offset}, got {}",
                    next.write_offset
                )));
            }
            buf.extend_from_slice(&next.data);
            expected_offset += next.data.len() as i64;
            finished = next.finish_write;
        }

        let committed_size = buf.len() as i64;
        self.blobs
            .put(&digest, Box::new(std::io::Cursor::new(buf)))
            .await?;

        Ok(Response::new(WriteResponse { committed_size }))
    }

    async fn query_write_status(
        &self,
        _request: Request<QueryWriteStatusRequest>,
    ) -> Result<Response<QueryWriteStatusResponse>, Status> {
        Err(Status::unimplemented("QueryWriteStatus is not implemented"))
    }
}

fn chunk_bytes(bytes: Bytes, chunk_size: usize) -> Vec<Bytes> {
    if bytes.is_empty() {
        return vec![bytes];
    }
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + chunk_size).min(bytes.len());
        chunks.push(bytes.slice(offset..end));
        offset = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use strata_core::{BlobStream, Digest, HashFunction, Result, StorageError};
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
            Ok(BlobStream::new(Box::pin(futures::stream::once(async move {
                Ok(bytes)
            }))))
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

    #[test]
    fn chunk_bytes_splits_on_boundaries() {
        let data = Bytes::from_static(b"0123456789");
        let chunks = chunk_bytes(data, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_ref(), b"0123");
        assert_eq!(chunks[2].as_ref(), b"89");
    }

    #[test]
    fn chunk_bytes_preserves_single_empty_chunk() {
        let chunks = chunk_bytes(Bytes::new(), 4);
        assert_eq!(chunks, vec![Bytes::new()]);
    }

    #[tokio::test]
    async fn read_rejects_nonzero_offset() {
        let store = Arc::new(MemoryStore::new());
        let service = ByteStreamService::new(store, 64 * 1024);
        let request = Request::new(ReadRequest {
            resource_name: "blobs/a/0".to_string(),
            read_offset: 10,
            read_limit: 0,
        });
        let err = service.read(request).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn read_streams_chunks_of_the_configured_size() {
        let store = Arc::new(MemoryStore::new());
        let payload = b"abcdefghij".to_vec();
        let digest = Digest::from_bytes("", HashFunction::Sha256, &payload);
        store
            .data
            .lock()
            .await
            .insert(digest.key_without_instance(), Bytes::from(payload.clone()));

        let service = ByteStreamService::new(store, 4);
        let request = Request::new(ReadRequest {
            resource_name: format!("blobs/{}/{}", digest.hash, digest.size_bytes),
            read_offset: 0,
            read_limit: 0,
        });

        let stream = service.read(request).await.unwrap().into_inner();
        let chunks: Vec<_> = stream.collect::<Vec<_>>().await;
        let total: Vec<u8> = chunks
            .into_iter()
            .map(|c| c.unwrap().data)
            .fold(Vec::new(), |mut acc, chunk| {
                acc.extend(chunk);
                acc
            });
        assert_eq!(total, payload);
    }

    #[tokio::test]
    async fn query_write_status_is_unimplemented() {
        let store = Arc::new(MemoryStore::new());
        let service = ByteStreamService::new(store, 64 * 1024);
        let err = service
            .query_write_status(Request::new(QueryWriteStatusRequest {
                resource_name: String::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
    }
}
