//! `StorageConfig`: the `serde`-deserializable (TOML) configuration for the
//! composed `BlobAccess` stack and the gRPC edge, following the teacher's
//! `RemoteConfig` pattern of `#[serde(default = "...")]` helper functions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Memory,
    Disk {
        root: String,
    },
    Redis {
        url: String,
    },
    Http {
        base_url: String,
        #[serde(default = "default_http_prefix")]
        prefix: String,
    },
    GrpcCas {
        endpoint: String,
        #[serde(default = "default_instance_name")]
        instance_name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Listen address for the gRPC edge, e.g. `0.0.0.0:8980`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Instance name accepted on inbound RPCs; digests outside this
    /// instance are rejected the same way an unrecognized instance would be.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// One leaf per shard. A single entry means no sharding in practice
    /// (`ShardSet` degenerates to one live slot).
    pub shards: Vec<BackendConfig>,

    /// Seed for the sharding adapter's FNV-1a shard selection.
    #[serde(default)]
    pub shard_seed: u64,

    /// Whether `FindMissing` across shards fails hard on the first shard
    /// error, rather than accepting a partial result. Default `false`
    /// (partial-failure acceptance), per the sharding Open Question.
    #[serde(default)]
    pub strict_find_missing: bool,

    /// Whether the integrity adapter verifies streamed reads/writes against
    /// the declared digest. Disabling this is only safe against a backend
    /// that is independently trusted to be correct.
    #[serde(default = "default_true")]
    pub integrity_enabled: bool,

    /// ByteStream chunk size in bytes, both for serving `Read` and for the
    /// `grpc_cas` leaf's own `Write` uploads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Max total bytes advertised in `GetCapabilities`'s `CacheCapabilities`.
    #[serde(default = "default_max_batch_total_size_bytes")]
    pub max_batch_total_size_bytes: i64,

    /// Host:port embedded in `bytestream://` URLs logged for failed action
    /// results. Defaults to `listen_addr` when unset, which is wrong behind
    /// a reverse proxy or NAT; set explicitly in that case.
    #[serde(default)]
    pub advertised_host: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            instance_name: default_instance_name(),
            shards: vec![BackendConfig::Memory],
            shard_seed: 0,
            strict_find_missing: false,
            integrity_enabled: default_true(),
            chunk_size: default_chunk_size(),
            max_batch_total_size_bytes: default_max_batch_total_size_bytes(),
            advertised_host: None,
        }
    }
}

impl StorageConfig {
    /// Parse a `StorageConfig` from TOML source.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8980".to_string()
}

fn default_instance_name() -> String {
    String::new()
}

fn default_http_prefix() -> String {
    "ac".to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    2 * 1024 * 1024
}

fn default_max_batch_total_size_bytes() -> i64 {
    4 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_minimal_toml() {
        let source = r#"
            shards = [{ kind = "memory" }]
        "#;
        let config = StorageConfig::from_toml(source).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8980");
        assert!(!config.strict_find_missing);
        assert!(config.integrity_enabled);
        assert_eq!(config.shards.len(), 1);
    }

    #[test]
    fn disk_backend_round_trips() {
        let source = r#"
            shards = [{ kind = "disk", root = "/var/lib/strata/cas" }]
        "#;
        let config = StorageConfig::from_toml(source).unwrap();
        match &config.shards[0] {
            BackendConfig::Disk { root } => assert_eq!(root, "/var/lib/strata/cas"),
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn multiple_shards_preserve_order() {
        let source = r#"
            shards = [
                { kind = "memory" },
                { kind = "disk", root = "/data/b" },
            ]
            shard_seed = 7
        "#;
        let config = StorageConfig::from_toml(source).unwrap();
        assert_eq!(config.shards.len(), 2);
        assert_eq!(config.shard_seed, 7);
    }
}
