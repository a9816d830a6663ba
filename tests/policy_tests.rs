//! Integration tests for the ring hash policy.
//!
//! These drive the policy through a mock channel stack: a factory that
//! records created connections, connections whose connectivity the tests
//! flip by hand, and a `StateHandle` standing in for the channel.

use ringlb::config::{EndpointAddress, RingHashConfig};
use ringlb::endpoint::{ConnectivityState, EndpointConnection, EndpointFactory, StateWatcher};
use ringlb::policy::controller::{PolicyArgs, RingHashPolicy};
use ringlb::policy::REQUEST_RING_HASH_ATTRIBUTE;
use ringlb::ring::picker::{PickArgs, PickResult, StatusCode};
use ringlb::state::StateHandle;
use ringlb::util::{init_logging, LogFormat, WorkSerializer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

static LOGGING: Once = Once::new();

fn init_test_logging() {
    LOGGING.call_once(|| init_logging("debug", LogFormat::Pretty));
}

/// A connection whose connectivity the test flips by hand.
struct MockConnection {
    address: String,
    state: Mutex<ConnectivityState>,
    watcher: Mutex<Option<StateWatcher>>,
    attempts: AtomicUsize,
}

impl MockConnection {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            state: Mutex::new(ConnectivityState::Idle),
            watcher: Mutex::new(None),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Change connectivity and notify the policy's watcher.
    fn transition(&self, state: ConnectivityState) {
        *self.state.lock().unwrap() = state;
        let watcher = self.watcher.lock().unwrap();
        if let Some(watcher) = watcher.as_ref() {
            watcher(state);
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl EndpointConnection for MockConnection {
    fn check_connectivity_state(&self) -> ConnectivityState {
        *self.state.lock().unwrap()
    }

    fn start_connectivity_watch(&self, watcher: StateWatcher) {
        *self.watcher.lock().unwrap() = Some(watcher);
    }

    fn attempt_to_connect(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockFactory {
    created: Mutex<Vec<Arc<MockConnection>>>,
}

impl EndpointFactory for MockFactory {
    fn create_endpoint(&self, address: &str, _weight: u32) -> Arc<dyn EndpointConnection> {
        let connection = Arc::new(MockConnection::new(address));
        self.created.lock().unwrap().push(Arc::clone(&connection));
        connection
    }
}

struct Harness {
    policy: Arc<RingHashPolicy>,
    factory: Arc<MockFactory>,
    state: Arc<StateHandle>,
    serializer: WorkSerializer,
}

impl Harness {
    fn new() -> Self {
        init_test_logging();
        let serializer = WorkSerializer::new();
        let factory = Arc::new(MockFactory::default());
        let state = Arc::new(StateHandle::new());
        let policy = RingHashPolicy::new(PolicyArgs {
            factory: Arc::clone(&factory) as Arc<dyn EndpointFactory>,
            controller: Arc::clone(&state) as _,
            serializer: serializer.clone(),
        });
        Self {
            policy,
            factory,
            state,
            serializer,
        }
    }

    /// Drain the control-plane serializer.
    async fn settle(&self) {
        self.serializer.flush().await;
    }

    /// Connections the factory has produced, in creation order.
    fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.factory.created.lock().unwrap().clone()
    }

    fn pick(&self, h: u64) -> PickResult {
        let attributes = HashMap::from([(
            REQUEST_RING_HASH_ATTRIBUTE.to_string(),
            h.to_string(),
        )]);
        self.state.load().picker.pick(&PickArgs::new(&attributes))
    }
}

fn addresses(specs: &[(&str, u32)]) -> Vec<EndpointAddress> {
    specs
        .iter()
        .map(|(address, weight)| EndpointAddress::new(*address).with_weight(*weight))
        .collect()
}

#[tokio::test]
async fn test_startup_publishes_eager_ready_picker() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 1), ("10.0.0.2:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;

    // All endpoints are IDLE, yet the policy reports READY with a real ring
    // picker so the channel is unblocked and picks can drive the first
    // connection attempts.
    let state = harness.state.load();
    assert_eq!(state.connectivity, ConnectivityState::Ready);
    assert!(matches!(harness.pick(0), PickResult::Queue));

    // The pick scheduled a connection attempt on the chosen endpoint.
    harness.settle().await;
    let total_attempts: usize = harness.connections().iter().map(|c| c.attempts()).sum();
    assert_eq!(total_attempts, 1);
}

#[tokio::test]
async fn test_empty_update_reports_transient_failure() {
    let harness = Harness::new();
    harness
        .policy
        .update(Vec::new(), RingHashConfig::default());
    harness.settle().await;

    let state = harness.state.load();
    assert_eq!(state.connectivity, ConnectivityState::TransientFailure);
    assert_eq!(state.status.code, StatusCode::Unavailable);
    assert_eq!(state.status.message, "Empty update");
    match harness.pick(7) {
        PickResult::Fail(status) => assert_eq!(status.code, StatusCode::Unavailable),
        other => panic!("expected Fail, got {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_weight_addresses_are_filtered() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 2), ("10.0.0.2:80", 0), ("10.0.0.3:80", 5)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;

    let created: Vec<String> = harness
        .connections()
        .iter()
        .map(|c| c.address.clone())
        .collect();
    assert_eq!(created, vec!["10.0.0.1:80", "10.0.0.3:80"]);
    assert_eq!(
        harness.state.load().connectivity,
        ConnectivityState::Ready
    );
}

#[tokio::test]
async fn test_all_zero_weights_count_as_empty() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 0), ("10.0.0.2:80", 0)]),
        RingHashConfig::default(),
    );
    harness.settle().await;

    assert!(harness.connections().is_empty());
    let state = harness.state.load();
    assert_eq!(state.connectivity, ConnectivityState::TransientFailure);
    assert_eq!(state.status.message, "Empty update");
}

#[tokio::test]
async fn test_ready_endpoint_serves_all_picks() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 1), ("10.0.0.2:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;

    let connections = harness.connections();
    connections[1].transition(ConnectivityState::TransientFailure);
    connections[0].transition(ConnectivityState::Ready);
    harness.settle().await;

    assert_eq!(harness.state.load().connectivity, ConnectivityState::Ready);
    // Whatever the hash, the single READY endpoint serves the pick, either
    // directly or through the fallback walk.
    for h in [0u64, 1, 1 << 20, 1 << 50, u64::MAX] {
        match harness.pick(h) {
            PickResult::Complete(chosen) => {
                assert!(Arc::ptr_eq(
                    &chosen,
                    &(Arc::clone(&connections[0]) as Arc<dyn EndpointConnection>)
                ));
            }
            other => panic!("expected Complete for h={h}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_recovery_cycles_reconnects_without_picks() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[
            ("10.0.0.1:80", 1),
            ("10.0.0.2:80", 1),
            ("10.0.0.3:80", 1),
            ("10.0.0.4:80", 1),
        ]),
        RingHashConfig::new(16, 1024),
    );
    harness.settle().await;
    let connections = harness.connections();

    // Endpoints fail one after another; after each callback the policy
    // schedules a connection attempt on the *next* endpoint, cycling
    // 0 -> 1 -> 2 -> 3 -> 0, so recovery proceeds with no pick traffic.
    for i in 0..4 {
        connections[i].transition(ConnectivityState::TransientFailure);
        harness.settle().await;
        let next = (i + 1) % 4;
        assert_eq!(
            connections[next].attempts(),
            1,
            "endpoint {next} should have exactly one attempt after callback {i}"
        );
    }

    let state = harness.state.load();
    assert_eq!(state.connectivity, ConnectivityState::TransientFailure);
    assert_eq!(state.status.code, StatusCode::Unavailable);
    match harness.pick(42) {
        PickResult::Fail(status) => assert_eq!(status.code, StatusCode::Unavailable),
        other => panic!("expected Fail, got {other:?}"),
    }

    // Progress is callback-driven: with no further callbacks, no further
    // attempts appear.
    harness.settle().await;
    let attempts: Vec<usize> = connections.iter().map(|c| c.attempts()).collect();
    assert_eq!(attempts, vec![1, 1, 1, 1]);
}

#[tokio::test]
async fn test_failure_triggers_reresolution() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 1), ("10.0.0.2:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;
    assert_eq!(harness.state.reresolution_requests(), 0);

    harness.connections()[0].transition(ConnectivityState::TransientFailure);
    harness.settle().await;
    assert_eq!(harness.state.reresolution_requests(), 1);

    // Non-failure transitions do not re-resolve.
    harness.connections()[1].transition(ConnectivityState::Connecting);
    harness.settle().await;
    assert_eq!(harness.state.reresolution_requests(), 1);
}

#[tokio::test]
async fn test_latch_keeps_aggregate_stable_while_flapping() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 1), ("10.0.0.2:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;
    let connections = harness.connections();

    connections[0].transition(ConnectivityState::TransientFailure);
    harness.settle().await;
    assert_eq!(harness.state.load().connectivity, ConnectivityState::Idle);

    // The broken endpoint bounces back to CONNECTING; the latch keeps it
    // reported as failed, so the aggregate must not move to CONNECTING.
    connections[0].transition(ConnectivityState::Connecting);
    harness.settle().await;
    assert_eq!(harness.state.load().connectivity, ConnectivityState::Idle);

    // Actual recovery clears the latch and the aggregate goes READY.
    connections[0].transition(ConnectivityState::Ready);
    harness.settle().await;
    assert_eq!(harness.state.load().connectivity, ConnectivityState::Ready);
}

#[tokio::test]
async fn test_stale_generation_callbacks_are_ignored() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;
    let old_connection = Arc::clone(&harness.connections()[0]);

    harness.policy.update(
        addresses(&[("10.0.0.9:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;

    // A late delivery from the replaced set must not mutate counters,
    // publish, or re-resolve.
    old_connection.transition(ConnectivityState::TransientFailure);
    harness.settle().await;
    assert_eq!(harness.state.load().connectivity, ConnectivityState::Ready);
    assert_eq!(harness.state.reresolution_requests(), 0);
}

#[tokio::test]
async fn test_shutdown_suppresses_attempts_and_publishes() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 1), ("10.0.0.2:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;
    let connections = harness.connections();

    harness.policy.shutdown();
    harness.settle().await;

    // The previously published picker still computes results, but its
    // scheduled connection attempts are dropped on the control plane.
    assert!(matches!(harness.pick(3), PickResult::Queue));
    harness.settle().await;
    assert!(connections.iter().all(|c| c.attempts() == 0));

    // Watcher deliveries after shutdown neither publish nor re-resolve.
    connections[0].transition(ConnectivityState::TransientFailure);
    harness.settle().await;
    assert_eq!(harness.state.load().connectivity, ConnectivityState::Ready);
    assert_eq!(harness.state.reresolution_requests(), 0);
}

#[tokio::test]
async fn test_missing_hash_attribute_leaves_state_untouched() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;

    let attributes = HashMap::new();
    match harness.state.load().picker.pick(&PickArgs::new(&attributes)) {
        PickResult::Fail(status) => {
            assert_eq!(status.code, StatusCode::Internal);
            assert!(status.message.contains("request_ring_hash"));
        }
        other => panic!("expected Fail, got {other:?}"),
    }

    harness.settle().await;
    assert!(harness.connections().iter().all(|c| c.attempts() == 0));
    assert_eq!(harness.state.load().connectivity, ConnectivityState::Ready);
}

#[tokio::test]
async fn test_update_replaces_endpoint_set() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;

    harness.policy.update(
        addresses(&[("10.0.1.1:80", 1), ("10.0.1.2:80", 1)]),
        RingHashConfig::new(8, 1024),
    );
    harness.settle().await;

    // Picks now route to the new generation's connections.
    assert!(matches!(harness.pick(11), PickResult::Queue));
    harness.settle().await;
    let connections = harness.connections();
    assert_eq!(connections.len(), 3);
    assert_eq!(connections[0].attempts(), 0, "old endpoint must not be dialed");
    let new_attempts: usize = connections[1..].iter().map(|c| c.attempts()).sum();
    assert_eq!(new_attempts, 1);
}

#[tokio::test]
async fn test_sticky_hash_maps_to_same_endpoint_across_picks() {
    let harness = Harness::new();
    harness.policy.update(
        addresses(&[("10.0.0.1:80", 1), ("10.0.0.2:80", 1), ("10.0.0.3:80", 1)]),
        RingHashConfig::new(64, 1024),
    );
    harness.settle().await;
    for connection in harness.connections() {
        connection.transition(ConnectivityState::Ready);
    }
    harness.settle().await;

    for h in [0u64, 123_456_789, u64::MAX / 3, u64::MAX] {
        let first = match harness.pick(h) {
            PickResult::Complete(connection) => connection,
            other => panic!("expected Complete for h={h}, got {other:?}"),
        };
        for _ in 0..3 {
            match harness.pick(h) {
                PickResult::Complete(connection) => {
                    assert!(Arc::ptr_eq(&first, &connection), "h={h} moved endpoints")
                }
                other => panic!("expected Complete for h={h}, got {other:?}"),
            }
        }
    }
}
