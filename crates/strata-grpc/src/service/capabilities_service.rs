//! Implements `Capabilities`. Advertises the hash functions, max batch size,
//! and compressors this server actually supports; execution is always
//! reported disabled since this is a storage-only edge.

use crate::reapi::capabilities_server::Capabilities;
use crate::reapi::semver::SemVer;
use crate::reapi::{
    CacheCapabilities, Compressor, DigestFunctionValue, ExecutionCapabilities,
    GetCapabilitiesRequest, ServerCapabilities,
};
use tonic::{Request, Response, Status};

pub struct CapabilitiesService {
    max_batch_total_size_bytes: i64,
}

impl CapabilitiesService {
    #[must_use]
    pub fn new(max_batch_total_size_bytes: i64) -> Self {
        Self {
            max_batch_total_size_bytes,
        }
    }
}

#[tonic::async_trait]
impl Capabilities for CapabilitiesService {
    async fn get_capabilities(
        &self,
        _request: Request<GetCapabilitiesRequest>,
    ) -> Result<Response<ServerCapabilities>, Status> {
        Ok(Response::new(ServerCapabilities {
            cache_capabilities: Some(CacheCapabilities {
                digest_functions: vec![
                    DigestFunctionValue::Sha1 as i32,
                    DigestFunctionValue::Sha256 as i32,
                    DigestFunctionValue::Sha512 as i32,
                ],
                max_batch_total_size_bytes: self.max_batch_total_size_bytes,
                supported_compressors: vec![Compressor::Identity as i32],
            }),
            execution_capabilities: Some(ExecutionCapabilities {
                digest_function: DigestFunctionValue::Sha256 as i32,
                exec_enabled: false,
            }),
            low_api_version: Some(SemVer {
                major: 2,
                minor: 0,
                patch: 0,
                prerelease: String::new(),
            }),
            high_api_version: Some(SemVer {
                major: 2,
                minor: 3,
                patch: 0,
                prerelease: String::new(),
            }),
        }))
    }
}
