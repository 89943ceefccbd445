//! Tonic service implementations terminating client RPCs over a composed
//! `strata_core::BlobAccess` stack.

pub mod action_cache_service;
pub mod bytestream_service;
pub mod capabilities_service;
pub mod cas_service;
mod convert;

pub use action_cache_service::ActionCacheService;
pub use bytestream_service::ByteStreamService;
pub use capabilities_service::CapabilitiesService;
pub use cas_service::CasService;
