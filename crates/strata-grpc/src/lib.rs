//! Resource-name codec plus the tonic-generated REAPI types and the
//! ByteStream/CAS/AC/Capabilities service edge that terminates client RPCs
//! and calls into the composed `strata_core::BlobAccess` stack.

pub mod resource_name;
pub mod service;

/// Generated REAPI, ByteStream, and `google.rpc.Status` types.
pub mod reapi {
    tonic::include_proto!("build.bazel.remote.execution.v2");

    pub mod semver {
        tonic::include_proto!("build.bazel.semver");
    }
}

pub mod bytestream {
    tonic::include_proto!("google.bytestream");
}

pub mod rpc {
    tonic::include_proto!("google.rpc");
}

pub use resource_name::{format_bytestream_url, format_read, format_write, parse_read, parse_write, ResourceName};
