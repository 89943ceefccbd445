//! Conversions between the wire `Digest` proto and the domain `Digest`.

use crate::reapi;
use strata_core::{Digest, StorageError};

/// Convert a wire digest into a domain digest scoped to `instance_name`.
pub fn domain_digest(instance_name: &str, wire: &reapi::Digest) -> Result<Digest, StorageError> {
    Digest::new(instance_name, wire.hash.clone(), wire.size_bytes)
}

/// Convert a domain digest back into its wire form (instance name is carried
/// out-of-band on REAPI messages, not inside the `Digest` proto itself).
#[must_use]
pub fn wire_digest(digest: &Digest) -> reapi::Digest {
    reapi::Digest {
        hash: digest.hash.clone(),
        size_bytes: digest.size_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_digest_scopes_the_wire_digest_to_an_instance() {
        let wire = reapi::Digest {
            hash: "a".repeat(64),
            size_bytes: 10,
        };
        let domain = domain_digest("main", &wire).unwrap();
        assert_eq!(domain.instance_name, "main");
        assert_eq!(domain.hash, wire.hash);
        assert_eq!(domain.size_bytes, 10);
    }

    #[test]
    fn wire_digest_drops_the_instance_name() {
        let domain = Digest::new("main", "b".repeat(64), 5).unwrap();
        let wire = wire_digest(&domain);
        assert_eq!(wire.hash, domain.hash);
        assert_eq!(wire.size_bytes, 5);
    }

    #[test]
    fn domain_digest_rejects_malformed_hash() {
        let wire = reapi::Digest {
            hash: "not-hex".to_string(),
            size_bytes: 1,
        };
        assert!(domain_digest("main", &wire).is_err());
    }
}
