//! Implements `ContentAddressableStorage`: `FindMissingBlobs`,
//! `BatchUpdateBlobs`, `BatchReadBlobs`, and `GetTree`.

use crate::reapi::content_addressable_storage_server::ContentAddressableStorage;
use crate::reapi::{
    batch_read_blobs_response, batch_update_blobs_response, BatchReadBlobsRequest,
    BatchReadBlobsResponse, BatchUpdateBlobsRequest, BatchUpdateBlobsResponse, Compressor, Directory,
    FindMissingBlobsRequest, FindMissingBlobsResponse, GetTreeRequest, GetTreeResponse,
};
use crate::rpc::Status as RpcStatus;
use crate::service::convert::{domain_digest, wire_digest};
use prost::Message as _;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use strata_core::{BlobAccess, Digest, StorageError};
use tonic::{Request, Response, Status};

pub struct CasService {
    blobs: Arc<dyn BlobAccess>,
}

impl CasService {
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobAccess>) -> Self {
        Self { blobs }
    }
}

/// Corruption detected while writing is the caller's fault: remap to
/// `InvalidArgument` instead of the default `Internal` a read-side corruption
/// would map to.
fn put_status(err: StorageError) -> Status {
    match &err {
        StorageError::SizeMismatch { .. } | StorageError::HashMismatch { .. } => {
            Status::invalid_argument(err.to_string())
        }
        _ => err.into(),
    }
}

#[tonic::async_trait]
impl ContentAddressableStorage for CasService {
    async fn find_missing_blobs(
        &self,
        request: Request<FindMissingBlobsRequest>,
    ) -> Result<Response<FindMissingBlobsResponse>, Status> {
        let req = request.into_inner();
        let digests: Vec<Digest> = req
            .blob_digests
            .iter()
            .map(|d| domain_digest(&req.instance_name, d))
            .collect::<Result<_, _>>()?;

        let missing = self.blobs.find_missing(&digests).await?;
        let missing_blob_digests = missing.iter().map(wire_digest).collect();

        Ok(Response::new(FindMissingBlobsResponse {
            missing_blob_digests,
        }))
    }

    async fn batch_update_blobs(
        &self,
        request: Request<BatchUpdateBlobsRequest>,
    ) -> Result<Response<BatchUpdateBlobsResponse>, Status> {
        let req = request.into_inner();
        let mut responses = Vec::with_capacity(req.requests.len());

        for item in req.requests {
            if let Err(status) = reject_non_identity_compressor(item.compressor) {
                responses.push(batch_update_blobs_response::Response {
                    digest: item.digest,
                    status: Some(to_rpc_status(status)),
                });
                continue;
            }

            let wire_digest_in = item.digest.clone().unwrap_or_default();
            let digest = match domain_digest(&req.instance_name, &wire_digest_in) {
                Ok(d) => d,
                Err(e) => {
                    responses.push(batch_update_blobs_response::Response {
                        digest: item.digest,
                        status: Some(to_rpc_status(e.into())),
                    });
                    continue;
                }
            };

            let result = self
                .blobs
                .put(&digest, Box::new(std::io::Cursor::new(item.data)))
                .await;

            let status = match result {
                Ok(()) => RpcStatus {
                    code: 0,
                    message: String::new(),
                    details: vec![],
                },
                Err(e) => to_rpc_status(put_status(e)),
            };

            responses.push(batch_update_blobs_response::Response {
                digest: item.digest,
                status: Some(status),
            });
        }

        Ok(Response::new(BatchUpdateBlobsResponse { responses }))
    }

    async fn batch_read_blobs(
        &self,
        request: Request<BatchReadBlobsRequest>,
    ) -> Result<Response<BatchReadBlobsResponse>, Status> {
        let req = request.into_inner();
        let identity = Compressor::Identity as i32;
        if !req.acceptable_compressors.is_empty() && !req.acceptable_compressors.contains(&identity) {
            return Err(Status::unimplemented(
                "only IDENTITY compression is supported",
            ));
        }

        let mut responses = Vec::with_capacity(req.digests.len());

        for wire in req.digests {
            let digest = match domain_digest(&req.instance_name, &wire) {
                Ok(d) => d,
                Err(e) => {
                    responses.push(batch_read_blobs_response::Response {
                        digest: Some(wire),
                        data: Vec::new(),
                        status: Some(to_rpc_status(e.into())),
                        compressor: 0,
                    });
                    continue;
                }
            };

            match collect_blob(&*self.blobs, &digest).await {
                Ok(data) => responses.push(batch_read_blobs_response::Response {
                    digest: Some(wire),
                    data: data.to_vec(),
                    status: Some(RpcStatus {
                        code: 0,
                        message: String::new(),
                        details: vec![],
                    }),
                    compressor: 0,
                }),
                Err(e) => responses.push(batch_read_blobs_response::Response {
                    digest: Some(wire),
                    data: Vec::new(),
                    status: Some(to_rpc_status(e.into())),
                    compressor: 0,
                }),
            }
        }

        Ok(Response::new(BatchReadBlobsResponse { responses }))
    }

    type GetTreeStream = Pin<Box<dyn futures::Stream<Item = Result<GetTreeResponse, Status>> + Send>>;

    async fn get_tree(
        &self,
        request: Request<GetTreeRequest>,
    ) -> Result<Response<Self::GetTreeStream>, Status> {
        let req = request.into_inner();
        let root_wire = req
            .root_digest
            .ok_or_else(|| Status::invalid_argument("root_digest is required"))?;
        let root_digest = domain_digest(&req.instance_name, &root_wire)?;

        let mut directories = Vec::new();
        let mut queue = VecDeque::from([root_digest]);

        while let Some(digest) = queue.pop_front() {
            let bytes = self.blobs.get(&digest).await?.collect().await.map_err(|e| {
                Status::internal(format!("failed to read directory blob: {e}"))
            })?;
            let directory = Directory::decode(bytes).map_err(|source| StorageError::Decode {
                key: digest.key_with_instance(),
                source,
            })?;

            for child in &directory.directories {
                if let Some(child_digest) = &child.digest {
                    queue.push_back(domain_digest(&req.instance_name, child_digest)?);
                }
            }
            directories.push(directory);
        }

        let page_size = if req.page_size > 0 {
            req.page_size as usize
        } else {
            directories.len().max(1)
        };

        let pages: Vec<GetTreeResponse> = directories
            .chunks(page_size)
            .map(|chunk| GetTreeResponse {
                directories: chunk.to_vec(),
                next_page_token: String::new(),
            })
            .collect();

        Ok(Response::new(Box::pin(futures::stream::iter(
            pages.into_iter().map(Ok),
        ))))
    }
}

/// This store only speaks uncompressed blobs; any other `Compressor` value
/// is rejected rather than silently stored/served uninterpreted.
fn reject_non_identity_compressor(compressor: i32) -> Result<(), Status> {
    if compressor == Compressor::Identity as i32 {
        Ok(())
    } else {
        Err(Status::unimplemented(format!(
            "compressor {compressor} is not supported, only IDENTITY"
        )))
    }
}

fn to_rpc_status(status: Status) -> RpcStatus {
    RpcStatus {
        code: status.code() as i32,
        message: status.message().to_string(),
        details: vec![],
    }
}

async fn collect_blob(blobs: &dyn BlobAccess, digest: &Digest) -> Result<bytes::Bytes, StorageError> {
    let stream = blobs.get(digest).await?;
    stream
        .collect()
        .await
        .map_err(|e| StorageError::io("collect blob stream", e))
}
