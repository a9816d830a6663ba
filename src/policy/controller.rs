//! The ring hash policy controller.

use crate::config::{EndpointAddress, RingHashConfig};
use crate::endpoint::{
    ConnectivityState, Endpoint, EndpointConnection, EndpointFactory, EndpointSet,
};
use crate::policy::ChannelController;
use crate::ring::picker::{FailurePicker, QueuePicker, RingEndpoint, RingPicker, Status};
use crate::util::WorkSerializer;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// Collaborators handed to the policy at construction.
pub struct PolicyArgs {
    pub factory: Arc<dyn EndpointFactory>,
    pub controller: Arc<dyn ChannelController>,
    pub serializer: WorkSerializer,
}

/// The `ring_hash_experimental` policy controller.
///
/// Owns the current endpoint set and decides, after every membership or
/// connectivity event, which aggregated state and picker to publish. All
/// state mutations run as jobs on the control-plane serializer; the inner
/// mutex is never held across a call into a collaborator trait.
pub struct RingHashPolicy {
    factory: Arc<dyn EndpointFactory>,
    controller: Arc<dyn ChannelController>,
    serializer: WorkSerializer,
    inner: Mutex<PolicyInner>,
}

struct PolicyInner {
    config: RingHashConfig,
    endpoints: Option<EndpointSet>,
    next_generation: u64,
    shutdown: bool,
}

/// What to publish once the policy lock is released.
enum Publication {
    Ready(RingHashConfig, Vec<EndpointParts>),
    Queue(ConnectivityState),
    Failure,
}

type EndpointParts = (String, u32, Arc<dyn EndpointConnection>);

impl RingHashPolicy {
    pub fn new(args: PolicyArgs) -> Arc<Self> {
        Arc::new(Self {
            factory: args.factory,
            controller: args.controller,
            serializer: args.serializer,
            inner: Mutex::new(PolicyInner {
                config: RingHashConfig::default(),
                endpoints: None,
                next_generation: 0,
                shutdown: false,
            }),
        })
    }

    /// Accept a fresh address list and configuration from the resolver.
    ///
    /// Runs asynchronously on the control-plane serializer. Addresses with
    /// weight 0 are dropped; an update with no usable addresses transitions
    /// the policy to TRANSIENT_FAILURE.
    pub fn update(self: &Arc<Self>, addresses: Vec<EndpointAddress>, config: RingHashConfig) {
        let policy = Arc::clone(self);
        self.serializer
            .run(move || policy.update_on_serializer(addresses, config));
    }

    /// Stop the policy: pending and future reconnect jobs become no-ops and
    /// no further pickers are published. Pickers already held by the data
    /// plane keep working on their snapshots.
    pub fn shutdown(self: &Arc<Self>) {
        let policy = Arc::clone(self);
        self.serializer.run(move || {
            let mut inner = policy.lock_inner();
            if inner.shutdown {
                return;
            }
            info!("ring hash policy shutting down");
            inner.shutdown = true;
            inner.endpoints = None;
        });
    }

    pub(crate) fn serializer(&self) -> &WorkSerializer {
        &self.serializer
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.lock_inner().shutdown
    }

    fn lock_inner(&self) -> MutexGuard<'_, PolicyInner> {
        self.inner.lock().expect("ring hash policy lock poisoned")
    }

    fn update_on_serializer(
        self: &Arc<Self>,
        addresses: Vec<EndpointAddress>,
        config: RingHashConfig,
    ) {
        let generation = {
            let mut inner = self.lock_inner();
            if inner.shutdown {
                return;
            }
            inner.config = config;
            let generation = inner.next_generation;
            inner.next_generation += 1;
            generation
        };

        let total = addresses.len();
        let usable: Vec<EndpointAddress> =
            addresses.into_iter().filter(|a| a.weight > 0).collect();
        debug!(
            generation,
            addresses = total,
            usable = usable.len(),
            "received address update"
        );

        if usable.is_empty() {
            {
                let mut inner = self.lock_inner();
                if inner.shutdown {
                    return;
                }
                inner.endpoints = None;
            }
            warn!(generation, "address update contained no usable endpoints");
            let status = Status::unavailable("Empty update");
            self.controller.update_state(
                ConnectivityState::TransientFailure,
                status.clone(),
                Arc::new(FailurePicker::new(status)),
            );
            return;
        }

        // Create connections and begin watching before installing the set.
        // Watcher callbacks hop back onto the serializer, so none of them
        // can observe the set before this job finishes.
        let mut set = EndpointSet::new(generation);
        for (index, addr) in usable.into_iter().enumerate() {
            let connection = self.factory.create_endpoint(&addr.address, addr.weight);
            let weak = Arc::downgrade(self);
            connection.start_connectivity_watch(Box::new(move |state| {
                if let Some(policy) = weak.upgrade() {
                    let job_policy = Arc::clone(&policy);
                    policy.serializer.run(move || {
                        job_policy.on_connectivity_change(generation, index, state);
                    });
                }
            }));
            set.push(Endpoint::new(addr.address, addr.weight, connection));
        }

        let parts = endpoint_parts(&set);
        let config = {
            let mut inner = self.lock_inner();
            if inner.shutdown {
                return;
            }
            inner.endpoints = Some(set);
            inner.config.clone()
        };

        // Publish the initial ring picker eagerly, while every endpoint is
        // still IDLE: startup must not stall waiting for a dial, because
        // ring hash has no a-priori backend to probe. The first data-plane
        // picks drive the first connection attempts.
        info!(generation, "watching new endpoint set");
        let picker = self.build_ring_picker(&config, parts);
        self.controller
            .update_state(ConnectivityState::Ready, Status::ok(), Arc::new(picker));
    }

    /// Watcher delivery for one endpoint, running on the serializer.
    fn on_connectivity_change(
        self: &Arc<Self>,
        generation: u64,
        index: usize,
        state: ConnectivityState,
    ) {
        let (publication, reattempt_target) = {
            let mut inner = self.lock_inner();
            if inner.shutdown {
                return;
            }
            let config = inner.config.clone();
            let Some(set) = inner.endpoints.as_mut() else {
                return;
            };
            if set.generation() != generation {
                trace!(
                    generation,
                    index,
                    "ignoring connectivity change for a replaced endpoint set"
                );
                return;
            }
            set.apply_state(index, state);
            let aggregate = set.aggregated_state();
            debug!(
                index,
                state = %state,
                aggregate = %aggregate,
                "endpoint connectivity changed"
            );
            let publication = match aggregate {
                ConnectivityState::Ready => Publication::Ready(config, endpoint_parts(set)),
                ConnectivityState::Connecting => Publication::Queue(ConnectivityState::Connecting),
                ConnectivityState::Idle => Publication::Queue(ConnectivityState::Idle),
                ConnectivityState::TransientFailure => Publication::Failure,
            };
            // While nothing is READY the policy keeps one connection attempt
            // in flight, cycling to the neighbor of whichever endpoint
            // reported, so recovery proceeds even with no pick traffic.
            let reattempt_target = matches!(
                aggregate,
                ConnectivityState::Idle | ConnectivityState::TransientFailure
            )
            .then(|| {
                let next = (index + 1) % set.len();
                Arc::clone(set.endpoint(next).connection())
            });
            (publication, reattempt_target)
        };

        // External calls happen with the lock released.
        if state == ConnectivityState::TransientFailure {
            debug!(index, "endpoint failed; requesting re-resolution");
            self.controller.request_reresolution();
        }
        match publication {
            Publication::Ready(config, parts) => {
                let picker = self.build_ring_picker(&config, parts);
                self.controller.update_state(
                    ConnectivityState::Ready,
                    Status::ok(),
                    Arc::new(picker),
                );
            }
            Publication::Queue(aggregate) => {
                self.controller
                    .update_state(aggregate, Status::ok(), Arc::new(QueuePicker));
            }
            Publication::Failure => {
                let status = Status::unavailable("connections to all backends failing or idle");
                self.controller.update_state(
                    ConnectivityState::TransientFailure,
                    status.clone(),
                    Arc::new(FailurePicker::new(status)),
                );
            }
        }
        if let Some(connection) = reattempt_target {
            connection.attempt_to_connect();
        }
    }

    /// Build a ring picker over a connectivity snapshot taken right now.
    fn build_ring_picker(
        self: &Arc<Self>,
        config: &RingHashConfig,
        parts: Vec<EndpointParts>,
    ) -> RingPicker {
        let endpoints = parts
            .into_iter()
            .map(|(address, weight, connection)| {
                let state = connection.check_connectivity_state();
                RingEndpoint {
                    address,
                    weight,
                    state,
                    connection,
                }
            })
            .collect();
        RingPicker::new(Arc::downgrade(self), endpoints, config)
    }
}

fn endpoint_parts(set: &EndpointSet) -> Vec<EndpointParts> {
    set.endpoints()
        .iter()
        .map(|e| {
            (
                e.address().to_string(),
                e.weight(),
                Arc::clone(e.connection()),
            )
        })
        .collect()
}
