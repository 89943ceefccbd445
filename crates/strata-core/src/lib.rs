//! Data model and contract shared by every crate in the blob store
//! workspace: digests and canonical keys, the `BlobAccess` trait every
//! store and decorator implements, and the error taxonomy that maps onto
//! gRPC status codes at the service edge.

pub mod blob_access;
pub mod digest;
pub mod error;

pub use blob_access::{BlobAccess, BlobStream};
pub use digest::{fnv1a_hash, Digest, HashFunction};
pub use error::{Result, StorageError};
