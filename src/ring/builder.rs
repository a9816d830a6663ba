//! Weighted consistent-hash ring construction.

use std::fmt::Write as _;
use xxhash_rust::xxh64::xxh64;

/// One virtual node: a point on the hash ring owned by an endpoint.
///
/// `endpoint` indexes into the endpoint list the ring was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingEntry {
    pub hash: u64,
    pub endpoint: usize,
}

/// Build a sorted ring from `(address, weight)` pairs.
///
/// The ring size lands in `[min_ring_size, max_ring_size]`: the scale is
/// chosen so that the least-weighted endpoint still receives a whole number
/// of entries (so every endpoint appears on the ring), then capped at
/// `max_ring_size` to bound memory. Each endpoint's share of entries tracks
/// its normalized weight up to the rounding of the running-sum scheme.
///
/// Entry hashes are XXH64 with seed 0 over `address + "_" + decimal(count)`.
/// Both the hash function and the key format are a wire contract shared with
/// peer implementations; changing either breaks cross-process stickiness.
///
/// The caller guarantees a non-empty input with all weights >= 1; weight-0
/// addresses are filtered out before endpoint creation and the empty case
/// short-circuits to a failing picker without building a ring.
pub fn build_ring(
    endpoints: &[(String, u32)],
    min_ring_size: u64,
    max_ring_size: u64,
) -> Vec<RingEntry> {
    debug_assert!(!endpoints.is_empty());
    debug_assert!(endpoints.iter().all(|(_, weight)| *weight >= 1));

    let sum: u64 = endpoints.iter().map(|(_, weight)| u64::from(*weight)).sum();
    let mut min_normalized_weight = 1.0f64;
    let normalized_weights: Vec<f64> = endpoints
        .iter()
        .map(|(_, weight)| {
            let normalized = f64::from(*weight) / sum as f64;
            min_normalized_weight = min_normalized_weight.min(normalized);
            normalized
        })
        .collect();

    // Scale up the hash count so the least-weighted endpoint gets a whole
    // number of entries; other endpoints may get fractional targets, which
    // the running sums below absorb without bias.
    let scale = ((min_normalized_weight * min_ring_size as f64).ceil() / min_normalized_weight)
        .min(max_ring_size as f64);
    let ring_size = scale.ceil() as usize;
    let mut ring: Vec<RingEntry> = Vec::with_capacity(ring_size);

    let mut current_hashes = 0.0f64;
    let mut target_hashes = 0.0f64;
    let mut hash_key = String::new();
    for (index, (address, _)) in endpoints.iter().enumerate() {
        target_hashes += scale * normalized_weights[index];
        let mut count: u64 = 0;
        while current_hashes < target_hashes {
            hash_key.clear();
            hash_key.push_str(address);
            hash_key.push('_');
            // Infallible for String.
            let _ = write!(hash_key, "{count}");
            ring.push(RingEntry {
                hash: xxh64(hash_key.as_bytes(), 0),
                endpoint: index,
            });
            count += 1;
            current_hashes += 1.0;
        }
    }

    // Stable sort: hash collisions keep insertion order.
    ring.sort_by(|a, b| a.hash.cmp(&b.hash));
    ring
}
