//! Content-addressed digest and canonical key helpers.

use crate::error::{Result, StorageError};
use sha2::{Digest as _, Sha256, Sha512};
use sha1::Sha1;
use std::fmt;

/// The hash family a digest belongs to, derived from its hex length rather
/// than carried as a separate field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashFunction {
    Sha1,
    Sha256,
    Sha512,
}

impl HashFunction {
    /// Recover the hash family from a hex string's length. REAPI digests
    /// never encode their own family, so length is the only signal we have.
    fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            128 => Some(Self::Sha512),
            _ => None,
        }
    }
}

/// A content-addressed digest: an instance name scoping the store, a hash,
/// and the declared size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub instance_name: String,
    pub hash: String,
    pub size_bytes: i64,
}

impl Digest {
    /// Build a digest after validating hex hygiene and a recognized length.
    ///
    /// Hashes must be lowercase hex; REAPI servers that accept uppercase
    /// digests end up with two keys for one blob.
    pub fn new(
        instance_name: impl Into<String>,
        hash: impl Into<String>,
        size_bytes: i64,
    ) -> Result<Self> {
        let hash = hash.into();
        Self::validate_hygiene(&hash)?;
        if HashFunction::from_hex_len(hash.len()).is_none() {
            return Err(StorageError::InvalidDigest(format!(
                "unrecognized hash length {} (expected 40, 64, or 128 hex chars)",
                hash.len()
            )));
        }
        Self::validate_size(size_bytes)?;
        Ok(Self {
            instance_name: instance_name.into(),
            hash,
            size_bytes,
        })
    }

    /// Build a digest validating only hex hygiene (lowercase, hex digits) and
    /// a non-negative size, not a recognized hash-family length.
    ///
    /// Resource-name and wire parsing use this: a request for
    /// `blobs/abc/5` must parse to a structurally valid digest even though
    /// `abc` names no known hash family. Whether the hash function is one
    /// this server can verify is the integrity adapter's concern, checked
    /// via `hash_function()` at the point content is actually hashed.
    pub fn new_lenient(
        instance_name: impl Into<String>,
        hash: impl Into<String>,
        size_bytes: i64,
    ) -> Result<Self> {
        let hash = hash.into();
        Self::validate_hygiene(&hash)?;
        Self::validate_size(size_bytes)?;
        Ok(Self {
            instance_name: instance_name.into(),
            hash,
            size_bytes,
        })
    }

    fn validate_hygiene(hash: &str) -> Result<()> {
        if hash.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(StorageError::InvalidDigest(format!(
                "hash must be lowercase hex, got {hash}"
            )));
        }
        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest(format!(
                "hash must be hex, got {hash}"
            )));
        }
        Ok(())
    }

    fn validate_size(size_bytes: i64) -> Result<()> {
        if size_bytes < 0 {
            return Err(StorageError::InvalidDigest(format!(
                "size_bytes must be non-negative, got {size_bytes}"
            )));
        }
        Ok(())
    }

    /// The hash family, derived from hex length. Fails if this digest's hash
    /// length names no recognized family (possible for digests built via
    /// `new_lenient`, e.g. ones parsed straight off an incoming resource
    /// name); callers that need to actually hash content should propagate
    /// this error rather than assume construction already checked it.
    pub fn hash_function(&self) -> Result<HashFunction> {
        HashFunction::from_hex_len(self.hash.len()).ok_or_else(|| {
            StorageError::InvalidDigest(format!(
                "unrecognized hash length {} (expected 40, 64, or 128 hex chars)",
                self.hash.len()
            ))
        })
    }

    /// Compute a digest from bytes in the given hash function, scoped to an instance.
    #[must_use]
    pub fn from_bytes(instance_name: impl Into<String>, function: HashFunction, bytes: &[u8]) -> Self {
        let hash = match function {
            HashFunction::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            HashFunction::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            HashFunction::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
        };
        Self {
            instance_name: instance_name.into(),
            hash,
            size_bytes: bytes.len() as i64,
        }
    }

    /// Whether this digest addresses zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }

    /// Canonical key including the instance name: `{instance}:{hash}:{size}`,
    /// or the instance-less form when the instance name is empty.
    #[must_use]
    pub fn key_with_instance(&self) -> String {
        if self.instance_name.is_empty() {
            self.key_without_instance()
        } else {
            format!("{}:{}:{}", self.instance_name, self.hash, self.size_bytes)
        }
    }

    /// Canonical key omitting the instance name: `{hash}:{size}`.
    ///
    /// Back ends that are not multi-tenant (e.g. the in-process memory
    /// store) key purely on this form; sharding and integrity adapters also
    /// use it so a blob shared by two instances lands on the same shard.
    #[must_use]
    pub fn key_without_instance(&self) -> String {
        format!("{}:{}", self.hash, self.size_bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_with_instance())
    }
}

/// FNV-1a, 64-bit, used by the sharding adapter to pick a shard for a key
/// and by tests that need a stable, dependency-free hash.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 1_099_511_628_211;

/// Hash `data` with FNV-1a, seeded so callers can decorrelate independent
/// hash choices (e.g. primary shard selection vs. drained-shard reprobing).
#[must_use]
pub fn fnv1a_hash(data: &[u8], seed: u64) -> u64 {
    let mut hash = FNV_OFFSET_BASIS ^ seed;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_uppercase_hash() {
        let hash = "A".repeat(64);
        assert!(Digest::new("", hash, 0).is_err());
    }

    #[test]
    fn rejects_unrecognized_length() {
        let hash = "a".repeat(32);
        assert!(Digest::new("", hash, 0).is_err());
    }

    #[test]
    fn accepts_sha1_sha256_sha512_lengths() {
        assert!(Digest::new("", "a".repeat(40), 0).is_ok());
        assert!(Digest::new("", "a".repeat(64), 0).is_ok());
        assert!(Digest::new("", "a".repeat(128), 0).is_ok());
    }

    #[test]
    fn from_bytes_matches_known_sha256() {
        let digest = Digest::from_bytes("", HashFunction::Sha256, b"hello world");
        assert_eq!(
            digest.hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(digest.size_bytes, 11);
    }

    #[test]
    fn key_forms_differ_by_instance() {
        let d = Digest::new("main", "a".repeat(64), 10).unwrap();
        assert_eq!(d.key_without_instance(), format!("{}:{}", "a".repeat(64), 10));
        assert_eq!(
            d.key_with_instance(),
            format!("main:{}:{}", "a".repeat(64), 10)
        );
    }

    #[test]
    fn key_with_instance_falls_back_when_empty() {
        let d = Digest::new("", "a".repeat(64), 10).unwrap();
        assert_eq!(d.key_with_instance(), d.key_without_instance());
    }

    #[test]
    fn new_lenient_accepts_an_unrecognized_hash_length() {
        let d = Digest::new_lenient("", "abc", 5).unwrap();
        assert_eq!(d.hash, "abc");
        assert_eq!(d.size_bytes, 5);
    }

    #[test]
    fn new_lenient_still_rejects_uppercase_or_non_hex() {
        assert!(Digest::new_lenient("", "ABC", 5).is_err());
        assert!(Digest::new_lenient("", "not-hex!", 5).is_err());
        assert!(Digest::new_lenient("", "abc", -1).is_err());
    }

    #[test]
    fn hash_function_fails_on_unrecognized_length_instead_of_panicking() {
        let d = Digest::new_lenient("", "abc", 5).unwrap();
        assert!(d.hash_function().is_err());
    }

    #[test]
    fn fnv1a_is_deterministic_and_seed_sensitive() {
        let a = fnv1a_hash(b"shard-key", 0);
        let b = fnv1a_hash(b"shard-key", 0);
        let c = fnv1a_hash(b"shard-key", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
