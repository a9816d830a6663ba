//! Pick-time ring lookup and the placeholder pickers.

use crate::config::RingHashConfig;
use crate::endpoint::{ConnectivityState, EndpointConnection};
use crate::policy::controller::RingHashPolicy;
use crate::policy::{ConnectionAttempter, REQUEST_RING_HASH_ATTRIBUTE};
use crate::ring::{build_ring, RingEntry};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::debug;

/// RPC status code carried by a failed pick or a published policy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Internal,
    Unavailable,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
        })
    }
}

/// RPC-style status: a code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Internal,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Unavailable,
            message: message.into(),
        }
    }
}

/// Call-scoped inputs for a single pick.
pub struct PickArgs<'a> {
    attributes: &'a HashMap<String, String>,
}

impl<'a> PickArgs<'a> {
    pub fn new(attributes: &'a HashMap<String, String>) -> Self {
        Self { attributes }
    }

    /// Look up a call attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Outcome of a pick.
pub enum PickResult {
    /// The RPC proceeds on the chosen connection.
    Complete(Arc<dyn EndpointConnection>),
    /// No decision yet; the caller should retry the pick later.
    Queue,
    /// The pick cannot be served.
    Fail(Status),
}

impl fmt::Debug for PickResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(_) => f.write_str("Complete(..)"),
            Self::Queue => f.write_str("Queue"),
            Self::Fail(status) => f.debug_tuple("Fail").field(status).finish(),
        }
    }
}

/// An immutable pick snapshot published by the policy controller.
///
/// Pick runs on arbitrary caller threads, concurrently with the control
/// plane; implementations are bounded, non-blocking computations over
/// immutable data.
pub trait Picker: Send + Sync {
    fn pick(&self, args: &PickArgs<'_>) -> PickResult;
}

/// Snapshot of one endpoint taken when a ring picker is built.
pub(crate) struct RingEndpoint {
    pub(crate) address: String,
    pub(crate) weight: u32,
    pub(crate) state: ConnectivityState,
    pub(crate) connection: Arc<dyn EndpointConnection>,
}

/// The ring picker: a sorted hash ring over an endpoint snapshot.
///
/// Holds a non-owning back-reference to the policy so the data plane can
/// schedule connection attempts; the endpoint snapshot keeps the underlying
/// connections alive for as long as any caller holds this picker.
pub struct RingPicker {
    policy: Weak<RingHashPolicy>,
    endpoints: Vec<RingEndpoint>,
    ring: Vec<RingEntry>,
}

impl RingPicker {
    pub(crate) fn new(
        policy: Weak<RingHashPolicy>,
        endpoints: Vec<RingEndpoint>,
        config: &RingHashConfig,
    ) -> Self {
        let weighted: Vec<(String, u32)> = endpoints
            .iter()
            .map(|e| (e.address.clone(), e.weight))
            .collect();
        let ring = build_ring(&weighted, config.min_ring_size, config.max_ring_size);
        debug!(
            endpoints = endpoints.len(),
            ring_entries = ring.len(),
            "built ring picker"
        );
        Self {
            policy,
            endpoints,
            ring,
        }
    }

    /// Number of virtual nodes on the ring.
    pub fn ring_size(&self) -> usize {
        self.ring.len()
    }

    fn schedule_attempt(
        &self,
        attempter: &mut Option<ConnectionAttempter>,
        connection: &Arc<dyn EndpointConnection>,
    ) {
        if attempter.is_none() {
            // A gone policy means shutdown already happened; attempts would
            // no-op anyway.
            let Some(policy) = self.policy.upgrade() else {
                return;
            };
            *attempter = Some(ConnectionAttempter::new(policy));
        }
        if let Some(attempter) = attempter.as_mut() {
            attempter.add(Arc::clone(connection));
        }
    }
}

impl Picker for RingPicker {
    fn pick(&self, args: &PickArgs<'_>) -> PickResult {
        let h = match args.attribute(REQUEST_RING_HASH_ATTRIBUTE) {
            Some(value) => match value.parse::<u64>() {
                Ok(h) => h,
                Err(_) => {
                    return PickResult::Fail(Status::internal(format!(
                        "call attribute {REQUEST_RING_HASH_ATTRIBUTE} is not an unsigned integer"
                    )))
                }
            },
            None => {
                return PickResult::Fail(Status::internal(format!(
                    "missing call attribute {REQUEST_RING_HASH_ATTRIBUTE}"
                )))
            }
        };

        // Connection attempts observed along the way are batched and posted
        // to the control-plane serializer when `attempter` drops at the end
        // of this call; the pick path itself never touches policy state.
        let mut attempter: Option<ConnectionAttempter> = None;

        let first_index = find_ring_index(&self.ring, h);
        let first = &self.endpoints[self.ring[first_index].endpoint];
        match first.state {
            ConnectivityState::Ready => {
                return PickResult::Complete(Arc::clone(&first.connection));
            }
            ConnectivityState::Idle => {
                self.schedule_attempt(&mut attempter, &first.connection);
                return PickResult::Queue;
            }
            ConnectivityState::Connecting => {
                return PickResult::Queue;
            }
            ConnectivityState::TransientFailure => {
                self.schedule_attempt(&mut attempter, &first.connection);
            }
        }

        // The initially chosen endpoint has failed; walk the rest of the
        // ring looking for one in READY, making sure the right set of
        // connection attempts is scheduled on the way.
        let first_endpoint = self.ring[first_index].endpoint;
        let mut found_second_endpoint = false;
        let mut found_first_non_failed = false;
        for i in 1..self.ring.len() {
            let entry = &self.ring[(first_index + i) % self.ring.len()];
            if entry.endpoint == first_endpoint {
                continue;
            }
            let endpoint = &self.endpoints[entry.endpoint];
            if endpoint.state == ConnectivityState::Ready {
                return PickResult::Complete(Arc::clone(&endpoint.connection));
            }
            if endpoint.state == ConnectivityState::Connecting && !found_second_endpoint {
                return PickResult::Queue;
            }
            found_second_endpoint = true;
            // Only IDLE fills the first-non-failed slot; a CONNECTING entry
            // past the first distinct one neither fills it nor needs an
            // attempt, so failed endpoints behind it still get dialed.
            if !found_first_non_failed {
                match endpoint.state {
                    ConnectivityState::TransientFailure => {
                        self.schedule_attempt(&mut attempter, &endpoint.connection);
                    }
                    ConnectivityState::Idle => {
                        self.schedule_attempt(&mut attempter, &endpoint.connection);
                        found_first_non_failed = true;
                    }
                    ConnectivityState::Ready | ConnectivityState::Connecting => {}
                }
            }
        }
        PickResult::Fail(Status::unavailable(
            "every reachable endpoint on the ring is in transient failure",
        ))
    }
}

/// Placeholder picker published while the policy is CONNECTING or IDLE.
#[derive(Debug, Default)]
pub struct QueuePicker;

impl Picker for QueuePicker {
    fn pick(&self, _args: &PickArgs<'_>) -> PickResult {
        PickResult::Queue
    }
}

/// Placeholder picker published while the policy is in TRANSIENT_FAILURE.
#[derive(Debug)]
pub struct FailurePicker {
    status: Status,
}

impl FailurePicker {
    pub fn new(status: Status) -> Self {
        Self { status }
    }
}

impl Picker for FailurePicker {
    fn pick(&self, _args: &PickArgs<'_>) -> PickResult {
        PickResult::Fail(self.status.clone())
    }
}

/// Ketama lookup: index of the first ring entry whose hash is >= `h`,
/// wrapping to 0 when `h` exceeds every entry.
///
/// Ported from the classic ketama binary search (ketama_get_server); the
/// termination condition depends on signed arithmetic for the bounds, so
/// `lowp`/`highp`/`mid` stay `i64`.
fn find_ring_index(ring: &[RingEntry], h: u64) -> usize {
    let size = ring.len() as i64;
    let mut lowp: i64 = 0;
    let mut highp: i64 = size;
    loop {
        let mid = (lowp + highp) / 2;
        if mid == size {
            return 0;
        }
        let midval = ring[mid as usize].hash;
        let midval1 = if mid == 0 {
            0
        } else {
            ring[mid as usize - 1].hash
        };
        if h <= midval && h > midval1 {
            return mid as usize;
        }
        if midval < h {
            lowp = mid + 1;
        } else {
            highp = mid - 1;
        }
        if lowp > highp {
            return 0;
        }
    }
}
