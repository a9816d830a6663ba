//! Configuration data types.

use serde::{Deserialize, Serialize};

/// Largest ring size accepted for either bound.
pub const MAX_RING_SIZE_LIMIT: u64 = 8_388_608;

/// Configuration for the ring hash policy.
///
/// Arrives as a JSON object from the resolver; unrecognized fields are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RingHashConfig {
    /// Lower bound on the number of virtual nodes on the ring.
    #[serde(default = "default_min_ring_size")]
    pub min_ring_size: u64,

    /// Upper bound on the number of virtual nodes on the ring.
    #[serde(default = "default_max_ring_size")]
    pub max_ring_size: u64,
}

impl Default for RingHashConfig {
    fn default() -> Self {
        Self {
            min_ring_size: default_min_ring_size(),
            max_ring_size: default_max_ring_size(),
        }
    }
}

impl RingHashConfig {
    /// Create a config with explicit bounds.
    pub fn new(min_ring_size: u64, max_ring_size: u64) -> Self {
        Self {
            min_ring_size,
            max_ring_size,
        }
    }
}

/// A resolved backend address with its traffic weight.
///
/// The address string is fed verbatim to the ring hash, so it must be stable
/// across updates for the same backend. Weight 0 is a valid resolver signal
/// meaning "not eligible"; such addresses are filtered out before endpoint
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointAddress {
    /// Backend identity, host:port or equivalent.
    pub address: String,

    /// Traffic weight (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl EndpointAddress {
    /// Create an address with the default weight of 1.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            weight: default_weight(),
        }
    }

    /// Set an explicit weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

// Default value functions
fn default_min_ring_size() -> u64 {
    1024
}

fn default_max_ring_size() -> u64 {
    MAX_RING_SIZE_LIMIT
}

fn default_weight() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RingHashConfig::default();
        assert_eq!(config.min_ring_size, 1024);
        assert_eq!(config.max_ring_size, 8_388_608);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: RingHashConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RingHashConfig::default());

        let config: RingHashConfig =
            serde_json::from_str(r#"{"min_ring_size": 8}"#).unwrap();
        assert_eq!(config.min_ring_size, 8);
        assert_eq!(config.max_ring_size, 8_388_608);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let config: RingHashConfig =
            serde_json::from_str(r#"{"min_ring_size": 16, "hash_function": "XX_HASH"}"#).unwrap();
        assert_eq!(config.min_ring_size, 16);
    }

    #[test]
    fn test_address_weight_default() {
        let addr = EndpointAddress::new("10.0.0.1:80");
        assert_eq!(addr.weight, 1);

        let addr = EndpointAddress::new("10.0.0.1:80").with_weight(3);
        assert_eq!(addr.weight, 3);
    }
}
