//! Backend endpoints and their connectivity interface.

mod set;

pub use set::EndpointSet;

use std::fmt;
use std::sync::Arc;

/// Connectivity of a single endpoint connection.
///
/// SHUTDOWN is terminal and handled by the surrounding runtime; it never
/// appears in transitions delivered to the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
}

impl ConnectivityState {
    /// Human-readable name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::TransientFailure => "TRANSIENT_FAILURE",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked by a connection whenever its connectivity changes.
pub type StateWatcher = Box<dyn Fn(ConnectivityState) + Send + Sync>;

/// A connection handle to one backend, provided by the surrounding channel
/// stack. Implementations perform the actual dialing and connectivity
/// observation.
pub trait EndpointConnection: Send + Sync {
    /// Current connectivity as observed by the transport.
    fn check_connectivity_state(&self) -> ConnectivityState;

    /// Register a watcher for connectivity changes. The watcher may be
    /// invoked from any thread; the policy hops onto its serializer before
    /// touching state.
    fn start_connectivity_watch(&self, watcher: StateWatcher);

    /// Ask the transport to start (or retry) connecting.
    fn attempt_to_connect(&self);
}

/// Produces endpoint connections from resolved addresses.
pub trait EndpointFactory: Send + Sync {
    fn create_endpoint(&self, address: &str, weight: u32) -> Arc<dyn EndpointConnection>;
}

/// Per-endpoint record owned by the policy controller.
///
/// `reported_state` is the state reflected in the set's counters; it lags
/// `connectivity_state` while the seen-failure latch is set, hiding
/// CONNECTING/IDLE bounces of an endpoint that has broken and not yet
/// recovered.
pub struct Endpoint {
    address: String,
    weight: u32,
    connection: Arc<dyn EndpointConnection>,
    connectivity_state: ConnectivityState,
    reported_state: ConnectivityState,
    seen_failure_since_ready: bool,
}

impl Endpoint {
    /// Create a record for a freshly built connection. Endpoints begin in
    /// IDLE.
    pub fn new(address: String, weight: u32, connection: Arc<dyn EndpointConnection>) -> Self {
        Self {
            address,
            weight,
            connection,
            connectivity_state: ConnectivityState::Idle,
            reported_state: ConnectivityState::Idle,
            seen_failure_since_ready: false,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn connection(&self) -> &Arc<dyn EndpointConnection> {
        &self.connection
    }

    /// Last connectivity delivered by the watcher.
    pub fn connectivity_state(&self) -> ConnectivityState {
        self.connectivity_state
    }

    /// State currently reflected in the set's counters.
    pub fn reported_state(&self) -> ConnectivityState {
        self.reported_state
    }

    pub fn seen_failure_since_ready(&self) -> bool {
        self.seen_failure_since_ready
    }

    pub(crate) fn set_connectivity_state(&mut self, state: ConnectivityState) {
        self.connectivity_state = state;
    }

    pub(crate) fn set_reported_state(&mut self, state: ConnectivityState) {
        self.reported_state = state;
    }

    pub(crate) fn set_seen_failure_since_ready(&mut self, seen: bool) {
        self.seen_failure_since_ready = seen;
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("weight", &self.weight)
            .field("connectivity_state", &self.connectivity_state)
            .field("reported_state", &self.reported_state)
            .field("seen_failure_since_ready", &self.seen_failure_since_ready)
            .finish()
    }
}
