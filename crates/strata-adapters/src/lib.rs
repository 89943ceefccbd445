//! Decorator adapters that compose over `strata_core::BlobAccess` in any
//! order: integrity verification, existence-precondition remapping,
//! sharding, write batching, and metrics.

pub mod batch;
pub mod existence;
pub mod integrity;
pub mod metrics;
pub mod sharding;

pub use batch::BatchedBlobAccess;
pub use existence::ExistencePreconditionBlobAccess;
pub use integrity::IntegrityBlobAccess;
pub use metrics::MetricsBlobAccess;
pub use sharding::{ShardSet, Slot};
