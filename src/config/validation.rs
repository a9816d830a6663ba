//! Configuration validation.

use crate::config::{RingHashConfig, MAX_RING_SIZE_LIMIT};

/// Validate a ring hash configuration.
///
/// Checks for:
/// - Both ring size bounds within `[1, 8388608]`
/// - `min_ring_size <= max_ring_size`
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing the problem.
pub fn validate_config(config: &RingHashConfig) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.min_ring_size == 0 || config.min_ring_size > MAX_RING_SIZE_LIMIT {
        errors.push(format!(
            "min_ring_size {} out of range (must be in 1..={})",
            config.min_ring_size, MAX_RING_SIZE_LIMIT
        ));
    }

    if config.max_ring_size == 0 || config.max_ring_size > MAX_RING_SIZE_LIMIT {
        errors.push(format!(
            "max_ring_size {} out of range (must be in 1..={})",
            config.max_ring_size, MAX_RING_SIZE_LIMIT
        ));
    }

    if config.min_ring_size > config.max_ring_size {
        errors.push(format!(
            "min_ring_size {} exceeds max_ring_size {}",
            config.min_ring_size, config.max_ring_size
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
