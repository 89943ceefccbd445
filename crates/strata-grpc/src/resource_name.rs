//! Parses Bazel ByteStream resource-name strings arriving on `Read`/`Write`
//! RPCs into `(instance_name, Digest)`.

use strata_core::{Digest, StorageError};

/// A parsed resource name, distinguishing the read and write wire forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceName {
    /// `[{instance}/]blobs/{hash}/{size}`
    Read { instance_name: String, digest: Digest },
    /// `[{instance}/]uploads/{uuid}/blobs/{hash}/{size}`
    Write {
        instance_name: String,
        upload_uuid: String,
        digest: Digest,
    },
}

fn invalid(resource_name: &str) -> StorageError {
    StorageError::InvalidResourceName(resource_name.to_string())
}

/// Parse a `Read`-form resource name: 3 or 4 non-empty slash-delimited
/// segments, `blobs` at the fixed position from the tail.
pub fn parse_read(resource_name: &str) -> Result<ResourceName, StorageError> {
    let segments: Vec<&str> = resource_name.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid(resource_name));
    }

    let (instance_name, rest) = match segments.len() {
        3 => (String::new(), &segments[..]),
        4 => (segments[0].to_string(), &segments[1..]),
        _ => return Err(invalid(resource_name)),
    };

    if rest[0] != "blobs" {
        return Err(invalid(resource_name));
    }
    let hash = rest[1];
    let size: i64 = rest[2].parse().map_err(|_| invalid(resource_name))?;

    // Structural/hygiene validation only: a recognized hash-family length is
    // not enforced here, since that's the integrity adapter's job, not the
    // resource-name codec's.
    let digest = Digest::new_lenient(instance_name.clone(), hash, size).map_err(|_| invalid(resource_name))?;
    Ok(ResourceName::Read { instance_name, digest })
}

/// Parse a `Write`-form resource name: 5 or 6 non-empty slash-delimited
/// segments, `uploads/{uuid}/blobs` at the fixed position from the tail.
pub fn parse_write(resource_name: &str) -> Result<ResourceName, StorageError> {
    let segments: Vec<&str> = resource_name.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid(resource_name));
    }

    let (instance_name, rest) = match segments.len() {
        5 => (String::new(), &segments[..]),
        6 => (segments[0].to_string(), &segments[1..]),
        _ => return Err(invalid(resource_name)),
    };

    if rest[0] != "uploads" || rest[2] != "blobs" {
        return Err(invalid(resource_name));
    }
    let upload_uuid = rest[1].to_string();
    let hash = rest[3];
    let size: i64 = rest[4].parse().map_err(|_| invalid(resource_name))?;

    let digest = Digest::new_lenient(instance_name.clone(), hash, size).map_err(|_| invalid(resource_name))?;
    Ok(ResourceName::Write {
        instance_name,
        upload_uuid,
        digest,
    })
}

/// Format a resource name for an upload, mirroring the write form this
/// module parses; used when this process acts as a ByteStream client (the
/// `grpc_cas` backend leaf).
#[must_use]
pub fn format_write(instance_name: &str, upload_uuid: &str, digest: &Digest) -> String {
    if instance_name.is_empty() {
        format!("uploads/{upload_uuid}/blobs/{}/{}", digest.hash, digest.size_bytes)
    } else {
        format!(
            "{instance_name}/uploads/{upload_uuid}/blobs/{}/{}",
            digest.hash, digest.size_bytes
        )
    }
}

/// Format a resource name for a read, mirroring the read form this module
/// parses.
#[must_use]
pub fn format_read(instance_name: &str, digest: &Digest) -> String {
    if instance_name.is_empty() {
        format!("blobs/{}/{}", digest.hash, digest.size_bytes)
    } else {
        format!("{instance_name}/blobs/{}/{}", digest.hash, digest.size_bytes)
    }
}

/// Format a `bytestream://` URL for a stored blob, the form the teacher's
/// own client config recognizes as a ByteStream address (host supplied by
/// the caller, since the codec itself has no notion of the serving address).
#[must_use]
pub fn format_bytestream_url(host: &str, instance_name: &str, digest: &Digest) -> String {
    format!("bytestream://{host}/{}", format_read(instance_name, digest))
}
