//! The policy surface: external interfaces, names, and the controller.

mod attempter;
pub mod controller;

pub use attempter::ConnectionAttempter;

use crate::config::{parse_config, ConfigError, RingHashConfig};
use crate::endpoint::ConnectivityState;
use crate::ring::picker::{Picker, Status};
use std::sync::Arc;

/// Name under which the surrounding runtime registers this policy.
pub const POLICY_NAME: &str = "ring_hash_experimental";

/// Call attribute carrying the per-request hash, as a base-10 u64 string.
pub const REQUEST_RING_HASH_ATTRIBUTE: &str = "request_ring_hash";

/// Upward interface to the surrounding channel, provided by the runtime.
///
/// `update_state` publishes the policy's aggregated connectivity together
/// with the picker the data plane should use from now on;
/// `request_reresolution` asks the resolver for a fresh address list.
pub trait ChannelController: Send + Sync {
    fn update_state(&self, state: ConnectivityState, status: Status, picker: Arc<dyn Picker>);
    fn request_reresolution(&self);
}

/// Factory handed to the runtime's policy registry at initialization.
#[derive(Debug, Default)]
pub struct RingHashFactory;

impl RingHashFactory {
    pub fn name(&self) -> &'static str {
        POLICY_NAME
    }

    /// Parse the policy's JSON configuration.
    pub fn parse_config(&self, json: &str) -> Result<RingHashConfig, ConfigError> {
        parse_config(json)
    }
}
