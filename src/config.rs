//! Configuration for the csv index/query engine.
//!
//! Every field has a documented default, and the whole struct
//! round-trips through `serde` so it can be loaded from a config file if a
//! caller wants one (the core itself never reads one from disk — that is
//! the CLI's job, out of scope here).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable that overrides the request server's socket path.
pub const SOCKET_ENV_VAR: &str = "CSVQUERY_SOCKET";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of scanner/sorter worker threads. Defaults to the host CPU
    /// count.
    pub workers: usize,

    /// Total memory budget for the external sort, in megabytes.
    pub memory_mb: usize,

    /// Target bloom filter false positive rate.
    pub bloom_fp_rate: f64,

    /// Field separator byte.
    pub separator: u8,

    /// Maximum number of concurrently-handled server connections.
    pub max_concurrency: usize,

    /// Idle timeout for a server connection's read loop.
    #[serde(with = "duration_as_millis")]
    pub idle_timeout: Duration,

    /// Write deadline for a single server response.
    #[serde(with = "duration_as_millis")]
    pub write_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            memory_mb: 500,
            bloom_fp_rate: 0.01,
            separator: b',',
            max_concurrency: 50,
            idle_timeout: Duration::from_secs(30),
            write_deadline: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Minimum per-index memory budget: 10 MiB.
    pub const MIN_INDEX_MEMORY_BYTES: usize = 10 * 1024 * 1024;

    /// Total memory budget in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.memory_mb * 1024 * 1024
    }

    /// Divide the memory budget evenly across `index_count` indexes,
    /// never going below [`Config::MIN_INDEX_MEMORY_BYTES`] per index.
    pub fn memory_per_index(&self, index_count: usize) -> usize {
        if index_count == 0 {
            return Self::MIN_INDEX_MEMORY_BYTES;
        }
        (self.memory_bytes() / index_count).max(Self::MIN_INDEX_MEMORY_BYTES)
    }

    /// Resolve the socket path a server should bind, honoring
    /// [`SOCKET_ENV_VAR`] when set.
    pub fn socket_path(&self, default: &str) -> String {
        std::env::var(SOCKET_ENV_VAR).unwrap_or_else(|_| default.to_string())
    }
}

mod duration_as_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.memory_mb, 500);
        assert_eq!(cfg.bloom_fp_rate, 0.01);
        assert_eq!(cfg.separator, b',');
        assert_eq!(cfg.max_concurrency, 50);
        assert_eq!(cfg.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn memory_per_index_has_a_floor() {
        let mut cfg = Config::default();
        cfg.memory_mb = 1;
        assert_eq!(cfg.memory_per_index(100), Config::MIN_INDEX_MEMORY_BYTES);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.workers, cfg.workers);
        assert_eq!(back.idle_timeout, cfg.idle_timeout);
    }
}
