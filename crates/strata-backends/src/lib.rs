//! Terminal `BlobAccess` leaves: in-memory, on-disk, Redis, the Bazel HTTP
//! cache protocol, and a relay onto an upstream REAPI server.

pub mod disk;
pub mod grpc_cas;
pub mod http;
pub mod memory;
pub mod redis;

pub use disk::DiskBlobStore;
pub use grpc_cas::GrpcCasBlobStore;
pub use http::HttpCacheBlobStore;
pub use memory::MemoryBlobStore;
pub use redis::RedisBlobStore;
