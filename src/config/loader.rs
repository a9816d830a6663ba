//! Configuration parsing.

use crate::config::{validate_config, RingHashConfig};
use thiserror::Error;

/// Errors that can occur while parsing a policy configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse ring_hash_experimental config: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("ring_hash_experimental config validation failed: {0}")]
    ValidationError(String),
}

/// Parse a ring hash policy configuration from its JSON form.
///
/// Both fields are optional; `min_ring_size` defaults to 1024 and
/// `max_ring_size` to 8388608. Unrecognized fields are ignored.
///
/// # Arguments
///
/// * `json` - The JSON object delivered by the resolver
///
/// # Returns
///
/// The parsed and validated configuration, or an error.
pub fn parse_config(json: &str) -> Result<RingHashConfig, ConfigError> {
    let config: RingHashConfig = serde_json::from_str(json)?;
    validate_config(&config).map_err(ConfigError::ValidationError)?;
    Ok(config)
}
