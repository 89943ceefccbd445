//! A `BlobAccess` leaf that is itself a REAPI client: proxies `get`/`put`/
//! `find_missing`/`delete` onto an upstream `ByteStream` + CAS server.
//!
//! `delete` has no REAPI equivalent (the protocol has no eviction RPC for a
//! client to call); it returns `StorageError::Unimplemented`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use strata_core::{BlobAccess, BlobStream, Digest, Result, StorageError};
use strata_grpc::reapi::content_addressable_storage_client::ContentAddressableStorageClient;
use strata_grpc::reapi::FindMissingBlobsRequest;
use strata_grpc::bytestream::byte_stream_client::ByteStreamClient;
use strata_grpc::bytestream::{ReadRequest, WriteRequest};
use strata_grpc::{format_read, format_write};
use tokio::io::AsyncRead;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// A `BlobAccess` implementation backed by an upstream REAPI server, reached
/// over a shared `tonic::transport::Channel`.
pub struct GrpcCasBlobStore {
    bytestream: ByteStreamClient<Channel>,
    cas: ContentAddressableStorageClient<Channel>,
    instance_name: String,
    chunk_size: usize,
}

impl GrpcCasBlobStore {
    #[must_use]
    pub fn new(channel: Channel, instance_name: impl Into<String>) -> Self {
        Self {
            bytestream: ByteStreamClient::new(channel.clone()),
            cas: ContentAddressableStorageClient::new(channel),
            instance_name: instance_name.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

fn grpc_err(operation: &str, status: tonic::Status) -> StorageError {
    StorageError::grpc(operation, status)
}

#[async_trait]
impl BlobAccess for GrpcCasBlobStore {
    #[instrument(skip(self), fields(digest = %digest))]
    async fn get(&self, digest: &Digest) -> Result<BlobStream> {
        let resource_name = format_read(&self.instance_name, digest);
        let mut client = self.bytestream.clone();

        let response = client
            .read(ReadRequest {
                resource_name,
                read_offset: 0,
                read_limit: 0,
            })
            .await
            .map_err(|e| grpc_err("ByteStream.Read", e))?;

        let upstream = response.into_inner();
        let mapped = upstream
            .map(|item| {
                item.map(|chunk| Bytes::from(chunk.data))
                    .map_err(std::io::Error::other)
            })
            .boxed();

        Ok(BlobStream::new(mapped))
    }

    #[instrument(skip(self, reader), fields(digest = %digest))]
    async fn put(&self, digest: &Digest, mut reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<()> {
        use tokio::io::AsyncReadExt;

        let mut buf = Vec::with_capacity(digest.size_bytes.max(0) as usize);
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::io("read upload body", e))?;

        let resource_name = format_write(&self.instance_name, &Uuid::new_v4().to_string(), digest);
        let total_size = buf.len();
        let chunk_size = self.chunk_size;

        let (tx, rx) = tokio::sync::mpsc::channel::<WriteRequest>(16);
        let stream = ReceiverStream::new(rx);

        tokio::spawn(async move {
            let mut offset = 0usize;
            loop {
                let end = (offset + chunk_size).min(total_size);
                let finish_write = end == total_size;
                let request = WriteRequest {
                    resource_name: if offset == 0 {
                        resource_name.clone()
                    } else {
                        String::new()
                    },
                    write_offset: offset as i64,
                    finish_write,
                    data: buf[offset..end].to_vec(),
                };
                if tx.send(request).await.is_err() {
                    break;
                }
                offset = end;
                if finish_write {
                    break;
                }
            }
        });

        let mut client = self.bytestream.clone();
        let response = client
            .write(stream)
            .await
            .map_err(|e| grpc_err("ByteStream.Write", e))?;

        let committed_size = response.into_inner().committed_size;
        if committed_size != digest.size_bytes {
            return Err(StorageError::SizeMismatch {
                key: digest.key_with_instance(),
                declared: digest.size_bytes,
                observed: committed_size,
            });
        }

        debug!(committed_size, "uploaded blob to upstream CAS");
        Ok(())
    }

    #[instrument(skip(self, digests), fields(count = digests.len()))]
    async fn find_missing(&self, digests: &[Digest]) -> Result<HashSet<Digest>> {
        if digests.is_empty() {
            return Ok(HashSet::new());
        }

        let wire_digests = digests
            .iter()
            .map(|d| strata_grpc::reapi::Digest {
                hash: d.hash.clone(),
                size_bytes: d.size_bytes,
            })
            .collect();

        let mut client = self.cas.clone();
        let response = client
            .find_missing_blobs(FindMissingBlobsRequest {
                instance_name: self.instance_name.clone(),
                blob_digests: wire_digests,
            })
            .await
            .map_err(|e| grpc_err("FindMissingBlobs", e))?;

        response
            .into_inner()
            .missing_blob_digests
            .into_iter()
            .map(|wire| Digest::new(self.instance_name.clone(), wire.hash, wire.size_bytes))
            .collect()
    }

    async fn delete(&self, digest: &Digest) -> Result<()> {
        warn!(digest = %digest, "delete is unimplemented for the upstream REAPI client leaf");
        Err(StorageError::Unimplemented(
            "REAPI defines no client-facing blob deletion RPC".to_string(),
        ))
    }
}
