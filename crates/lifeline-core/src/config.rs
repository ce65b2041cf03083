//! Wire constants and configuration for the relay mesh
//!
//! The constants at the top of this module are wire-level contracts: every
//! implementation exchanging packets must agree on the service identity, the
//! two characteristic identities, the payload ceiling, the default ttl, the
//! hop ceiling, and the dedup-key derivation (see [`crate::packet`]).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Well-known service identity advertised by every relay node
pub const SERVICE_IDENTITY: &str = "f3e1a4c0-9d2b-4e5f-8a17-6b0c52d9e301";

/// Characteristic exposing the current head packet's wire bytes
pub const PACKET_CHARACTERISTIC: &str = "f3e1a4c1-9d2b-4e5f-8a17-6b0c52d9e301";

/// Characteristic exposing small node metadata (identity, queue depth, peers)
pub const METADATA_CHARACTERISTIC: &str = "f3e1a4c2-9d2b-4e5f-8a17-6b0c52d9e301";

/// Maximum payload size in bytes for a single packet
pub const MAX_PAYLOAD: usize = 512;

/// Default packet time-to-live (one hour)
pub const DEFAULT_TTL: Duration = Duration::from_millis(3_600_000);

/// Hop ceiling: packets at or above this count are stored but not relayed
pub const HOP_CEILING: u8 = 7;

/// Default priority store capacity in packets
pub const DEFAULT_CAPACITY: usize = 500;

/// Default TTL sweep interval
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Fixed retry delay after a failed connect or read
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Main configuration for a relay node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Priority store and dedup settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Discovery and exchange protocol settings
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Priority store and dedup pre-filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of buffered packets
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Default ttl applied to packets that do not carry one
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub default_ttl: Duration,

    /// Expected insertions used to size the pre-filter bit array
    #[serde(default = "default_prefilter_insertions")]
    pub prefilter_expected_insertions: usize,

    /// Target false-positive rate for the pre-filter
    #[serde(default = "default_prefilter_fp_rate")]
    pub prefilter_fp_rate: f64,

    /// Fill ratio at which the pre-filter is cleared and rebuilt
    #[serde(default = "default_rebuild_threshold")]
    pub prefilter_rebuild_threshold: f64,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

fn default_prefilter_insertions() -> usize {
    2048
}

fn default_prefilter_fp_rate() -> f64 {
    0.01
}

fn default_rebuild_threshold() -> f64 {
    0.75
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            default_ttl: DEFAULT_TTL,
            prefilter_expected_insertions: 2048,
            prefilter_fp_rate: 0.01,
            prefilter_rebuild_threshold: 0.75,
        }
    }
}

/// Discovery and exchange protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Interval between TTL sweeps
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// Fixed delay before the scanner resumes after a failure
    ///
    /// Deliberately not exponential: peer visibility windows are short and
    /// unpredictable, so growing backoff only loses relay opportunities.
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// How long a contacted peer is left alone before being pulled again
    #[serde(with = "humantime_serde", default = "default_peer_cooldown")]
    pub peer_cooldown: Duration,

    /// Maximum hops before a packet is retained locally but not relayed
    #[serde(default = "default_hop_ceiling")]
    pub hop_ceiling: u8,

    /// Maximum accepted payload size in bytes
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

fn default_retry_delay() -> Duration {
    DEFAULT_RETRY_DELAY
}

fn default_peer_cooldown() -> Duration {
    Duration::from_secs(10)
}

fn default_hop_ceiling() -> u8 {
    HOP_CEILING
}

fn default_max_payload() -> usize {
    MAX_PAYLOAD
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            peer_cooldown: Duration::from_secs(10),
            hop_ceiling: HOP_CEILING,
            max_payload: MAX_PAYLOAD,
        }
    }
}

/// Builder for [`MeshConfig`]
#[derive(Debug, Default)]
pub struct MeshConfigBuilder {
    config: MeshConfig,
}

impl MeshConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the priority store capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.store.capacity = capacity.max(1);
        self
    }

    /// Set the default packet ttl
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.store.default_ttl = ttl;
        self
    }

    /// Set the pre-filter sizing parameters
    pub fn prefilter(mut self, expected_insertions: usize, fp_rate: f64) -> Self {
        self.config.store.prefilter_expected_insertions = expected_insertions.max(1);
        self.config.store.prefilter_fp_rate = fp_rate.clamp(1e-6, 0.5);
        self
    }

    /// Set the sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.protocol.sweep_interval = interval;
        self
    }

    /// Set the fixed retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.protocol.retry_delay = delay;
        self
    }

    /// Set the peer re-contact cooldown
    pub fn peer_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.protocol.peer_cooldown = cooldown;
        self
    }

    /// Set the hop ceiling, clamped to the wire maximum
    pub fn hop_ceiling(mut self, hops: u8) -> Self {
        self.config.protocol.hop_ceiling = hops.min(HOP_CEILING);
        self
    }

    /// Build the configuration
    pub fn build(self) -> MeshConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeshConfig::default();
        assert_eq!(config.store.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.protocol.hop_ceiling, HOP_CEILING);
        assert_eq!(config.store.default_ttl, DEFAULT_TTL);
    }

    #[test]
    fn test_config_builder() {
        let config = MeshConfigBuilder::new()
            .capacity(50)
            .default_ttl(Duration::from_secs(60))
            .sweep_interval(Duration::from_secs(5))
            .build();

        assert_eq!(config.store.capacity, 50);
        assert_eq!(config.store.default_ttl, Duration::from_secs(60));
        assert_eq!(config.protocol.sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_hop_ceiling_clamping() {
        let config = MeshConfigBuilder::new().hop_ceiling(12).build();
        assert_eq!(config.protocol.hop_ceiling, HOP_CEILING);
    }

    #[test]
    fn test_capacity_floor() {
        let config = MeshConfigBuilder::new().capacity(0).build();
        assert_eq!(config.store.capacity, 1);
    }

    #[test]
    fn test_duration_humantime_round_trip() {
        let config = MeshConfigBuilder::new()
            .sweep_interval(Duration::from_secs(90))
            .build();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("1m 30s"));

        let parsed: MeshConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.protocol.sweep_interval, Duration::from_secs(90));
    }

    #[test]
    fn test_service_identities_are_distinct() {
        assert_ne!(SERVICE_IDENTITY, PACKET_CHARACTERISTIC);
        assert_ne!(PACKET_CHARACTERISTIC, METADATA_CHARACTERISTIC);
    }
}
