//! Published policy state shared with the data plane.

use crate::endpoint::ConnectivityState;
use crate::policy::ChannelController;
use crate::ring::picker::{Picker, QueuePicker, Status};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One published (connectivity, status, picker) bundle.
pub struct PolicyState {
    pub connectivity: ConnectivityState,
    pub status: Status,
    pub picker: Arc<dyn Picker>,
}

/// Data-plane handle to the most recently published policy state.
///
/// Publication swaps the bundle atomically with release semantics; pick
/// paths load it with acquire semantics and never observe a torn picker.
/// Doubles as a ready-made [`ChannelController`] for embedders that do not
/// bring their own channel stack.
pub struct StateHandle {
    current: ArcSwap<PolicyState>,
    reresolution_requests: AtomicU64,
}

impl StateHandle {
    /// Create a handle. Before the policy publishes anything, the handle
    /// reports IDLE with a queueing picker.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(PolicyState {
                connectivity: ConnectivityState::Idle,
                status: Status::ok(),
                picker: Arc::new(QueuePicker),
            }),
            reresolution_requests: AtomicU64::new(0),
        }
    }

    /// Load the current published bundle.
    pub fn load(&self) -> Arc<PolicyState> {
        self.current.load_full()
    }

    /// Number of re-resolution requests the policy has issued so far.
    pub fn reresolution_requests(&self) -> u64 {
        self.reresolution_requests.load(Ordering::Relaxed)
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelController for StateHandle {
    fn update_state(
        &self,
        connectivity: ConnectivityState,
        status: Status,
        picker: Arc<dyn Picker>,
    ) {
        debug!(state = %connectivity, "publishing policy state");
        self.current.store(Arc::new(PolicyState {
            connectivity,
            status,
            picker,
        }));
    }

    fn request_reresolution(&self) {
        self.reresolution_requests.fetch_add(1, Ordering::Relaxed);
    }
}
