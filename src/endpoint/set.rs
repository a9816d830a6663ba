//! Ordered endpoint collection with per-state population counters.

use crate::endpoint::{ConnectivityState, Endpoint};
use tracing::trace;

/// Ordered collection of endpoint records for one resolver generation.
///
/// Order preserves the resolver's order; it is the neighbor order used when
/// the policy cycles reconnect attempts. The four counters always equal the
/// population of endpoints whose *reported* state matches, and sum to the
/// endpoint count.
pub struct EndpointSet {
    generation: u64,
    endpoints: Vec<Endpoint>,
    num_idle: usize,
    num_connecting: usize,
    num_ready: usize,
    num_transient_failure: usize,
}

impl EndpointSet {
    /// Create an empty set for the given generation.
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            endpoints: Vec::new(),
            num_idle: 0,
            num_connecting: 0,
            num_ready: 0,
            num_transient_failure: 0,
        }
    }

    /// Generation tag used to discard watcher callbacks from replaced sets.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoint(&self, index: usize) -> &Endpoint {
        &self.endpoints[index]
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn num_idle(&self) -> usize {
        self.num_idle
    }

    pub fn num_connecting(&self) -> usize {
        self.num_connecting
    }

    pub fn num_ready(&self) -> usize {
        self.num_ready
    }

    pub fn num_transient_failure(&self) -> usize {
        self.num_transient_failure
    }

    /// Append a record. New endpoints report IDLE.
    pub fn push(&mut self, endpoint: Endpoint) {
        debug_assert_eq!(endpoint.reported_state(), ConnectivityState::Idle);
        self.num_idle += 1;
        self.endpoints.push(endpoint);
    }

    /// Apply a connectivity change for one endpoint, updating the counters
    /// through the seen-failure-since-ready latch.
    ///
    /// While the latch is set, only a transition to READY touches the
    /// counters; intermediate CONNECTING/IDLE bounces keep reporting
    /// TRANSIENT_FAILURE so that the aggregated state does not flap.
    pub fn apply_state(&mut self, index: usize, new_state: ConnectivityState) {
        let old_reported = self.endpoints[index].reported_state();
        if !self.endpoints[index].seen_failure_since_ready() {
            if new_state == ConnectivityState::TransientFailure {
                self.endpoints[index].set_seen_failure_since_ready(true);
            }
            self.update_state_counters(old_reported, new_state);
            self.endpoints[index].set_reported_state(new_state);
        } else if new_state == ConnectivityState::Ready {
            self.endpoints[index].set_seen_failure_since_ready(false);
            self.update_state_counters(ConnectivityState::TransientFailure, new_state);
            self.endpoints[index].set_reported_state(new_state);
        }
        trace!(
            address = %self.endpoints[index].address(),
            state = %new_state,
            reported = %self.endpoints[index].reported_state(),
            "endpoint connectivity changed"
        );
        self.endpoints[index].set_connectivity_state(new_state);
    }

    /// Fold the counters into the single policy-level state.
    ///
    /// 1. Any endpoint READY: READY.
    /// 2. Else any CONNECTING with fewer than two failures: CONNECTING.
    /// 3. Else any IDLE with fewer than two failures: IDLE.
    /// 4. Otherwise: TRANSIENT_FAILURE.
    pub fn aggregated_state(&self) -> ConnectivityState {
        if self.num_ready > 0 {
            ConnectivityState::Ready
        } else if self.num_connecting > 0 && self.num_transient_failure < 2 {
            ConnectivityState::Connecting
        } else if self.num_idle > 0 && self.num_transient_failure < 2 {
            ConnectivityState::Idle
        } else {
            ConnectivityState::TransientFailure
        }
    }

    fn update_state_counters(&mut self, old_state: ConnectivityState, new_state: ConnectivityState) {
        if old_state != new_state {
            match old_state {
                ConnectivityState::Idle => {
                    debug_assert!(self.num_idle > 0);
                    self.num_idle -= 1;
                }
                ConnectivityState::Connecting => {
                    debug_assert!(self.num_connecting > 0);
                    self.num_connecting -= 1;
                }
                ConnectivityState::Ready => {
                    debug_assert!(self.num_ready > 0);
                    self.num_ready -= 1;
                }
                ConnectivityState::TransientFailure => {
                    debug_assert!(self.num_transient_failure > 0);
                    self.num_transient_failure -= 1;
                }
            }
            match new_state {
                ConnectivityState::Idle => self.num_idle += 1,
                ConnectivityState::Connecting => self.num_connecting += 1,
                ConnectivityState::Ready => self.num_ready += 1,
                ConnectivityState::TransientFailure => self.num_transient_failure += 1,
            }
        }
    }
}
