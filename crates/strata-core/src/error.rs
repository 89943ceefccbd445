//! Shared error taxonomy for the blob store stack.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias used throughout the storage stack.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur anywhere in the layered blob store.
///
/// Variants map onto canonical gRPC status codes at the `strata-grpc` edge;
/// see `StorageError::grpc_code` for the mapping.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    /// The requested blob does not exist in the queried store.
    #[error("blob not found: {key}")]
    #[diagnostic(code(storage::not_found))]
    NotFound { key: String },

    /// A `Get` failed an existence precondition check (remapped from `NotFound`
    /// by the existence-precondition adapter).
    #[error("precondition failed for {key}: blob must exist before this call")]
    #[diagnostic(code(storage::failed_precondition))]
    FailedPrecondition { key: String },

    /// Digest hash was malformed: wrong length, non-hex, or uppercase.
    #[error("invalid digest: {0}")]
    #[diagnostic(code(storage::invalid_digest))]
    InvalidDigest(String),

    /// A resource name did not parse as a valid read or write form.
    #[error("invalid resource name: {0}")]
    #[diagnostic(code(storage::invalid_resource_name))]
    InvalidResourceName(String),

    /// Streamed content length did not match the digest's declared size.
    #[error("size mismatch for {key}: declared {declared} bytes, observed {observed} bytes")]
    #[diagnostic(code(storage::size_mismatch))]
    SizeMismatch {
        key: String,
        declared: i64,
        observed: i64,
    },

    /// Streamed content hashed to something other than the declared digest.
    #[error("hash mismatch for {key}: expected {expected}, computed {computed}")]
    #[diagnostic(
        code(storage::hash_mismatch),
        help("the underlying store may be corrupted; the blob was invalidated")
    )]
    HashMismatch {
        key: String,
        expected: String,
        computed: String,
    },

    /// A compressor was requested that this server does not implement.
    #[error("unsupported compressor: {0}")]
    #[diagnostic(code(storage::unimplemented))]
    Unimplemented(String),

    /// Underlying I/O failure (disk, socket).
    #[error("I/O error during {operation}")]
    #[diagnostic(code(storage::io_error))]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// A backing gRPC call (e.g. the `grpc_cas` leaf) failed.
    #[error("gRPC call failed: {operation}")]
    #[diagnostic(code(storage::grpc_error))]
    Grpc {
        operation: String,
        #[source]
        source: tonic::Status,
    },

    /// A backing HTTP call (the `http` leaf) returned something unexpected.
    #[error("HTTP cache request failed: {operation} ({status})")]
    #[diagnostic(code(storage::http_error))]
    Http { operation: String, status: u16 },

    /// A Redis command failed.
    #[error("redis command failed: {operation}")]
    #[diagnostic(code(storage::redis_error))]
    Redis {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Directory proto failed to decode.
    #[error("failed to decode Directory proto for {key}")]
    #[diagnostic(code(storage::decode_error))]
    Decode {
        key: String,
        #[source]
        source: prost::DecodeError,
    },

    /// Configuration was invalid at load time.
    #[error("configuration error: {0}")]
    #[diagnostic(code(storage::config_error))]
    Config(String),

    /// Every shard in a sharded `FindMissing` fan-out failed (strict mode).
    #[error("all {attempted} shards failed during find_missing; last error: {last}")]
    #[diagnostic(code(storage::shard_fanout_failed))]
    ShardFanoutFailed { attempted: usize, last: String },

    /// Serialization of an ancillary record (e.g. a failed ActionResult envelope) failed.
    #[error("serialization error: {context}")]
    #[diagnostic(code(storage::serialization_error))]
    Serialization {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct a `NotFound` error for the given canonical key.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Construct a `FailedPrecondition` error for the given canonical key.
    pub fn failed_precondition(key: impl Into<String>) -> Self {
        Self::FailedPrecondition { key: key.into() }
    }

    /// Construct an `Io` error, tagging the operation that failed.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Construct a `Grpc` error from a `tonic::Status`.
    pub fn grpc(operation: impl Into<String>, source: tonic::Status) -> Self {
        Self::Grpc {
            operation: operation.into(),
            source,
        }
    }

    /// Map this error onto the canonical gRPC status code REAPI clients expect.
    #[must_use]
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            Self::NotFound { .. } => tonic::Code::NotFound,
            Self::FailedPrecondition { .. } => tonic::Code::FailedPrecondition,
            Self::InvalidDigest(_) | Self::InvalidResourceName(_) | Self::Config(_) => {
                tonic::Code::InvalidArgument
            }
            // Corruption detected by the integrity adapter: Internal on the
            // read path (the store is at fault). The gRPC edge remaps these
            // to InvalidArgument specifically for Put, where the client sent
            // a reader that didn't match its own declared digest.
            Self::SizeMismatch { .. } | Self::HashMismatch { .. } | Self::Decode { .. } => {
                tonic::Code::Internal
            }
            Self::Unimplemented(_) => tonic::Code::Unimplemented,
            Self::Io { .. } | Self::Http { .. } | Self::Redis { .. } => tonic::Code::Unavailable,
            Self::Grpc { source, .. } => source.code(),
            Self::ShardFanoutFailed { .. } => tonic::Code::Unavailable,
            Self::Serialization { .. } => tonic::Code::Internal,
        }
    }
}

impl From<StorageError> for tonic::Status {
    fn from(err: StorageError) -> Self {
        let code = err.grpc_code();
        Self::new(code, err.to_string())
    }
}
