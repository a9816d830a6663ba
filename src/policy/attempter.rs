//! Scope-exit dispatch of connection attempts from the data plane.

use crate::endpoint::EndpointConnection;
use crate::policy::controller::RingHashPolicy;
use std::sync::Arc;

/// Collects endpoints needing `attempt_to_connect` during a pick.
///
/// The pick path must not call into the control plane directly; instead the
/// attempts gathered here are posted to the control-plane serializer when
/// this value drops at the end of the pick. The posted job checks the
/// shutdown flag before touching any connection.
///
/// Holds an owning policy reference for its lifetime, so the serializer it
/// posts to outlives the batch.
pub struct ConnectionAttempter {
    policy: Arc<RingHashPolicy>,
    connections: Vec<Arc<dyn EndpointConnection>>,
}

impl ConnectionAttempter {
    pub(crate) fn new(policy: Arc<RingHashPolicy>) -> Self {
        Self {
            policy,
            connections: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, connection: Arc<dyn EndpointConnection>) {
        self.connections.push(connection);
    }
}

impl Drop for ConnectionAttempter {
    fn drop(&mut self) {
        let connections = std::mem::take(&mut self.connections);
        if connections.is_empty() {
            return;
        }
        let policy = Arc::clone(&self.policy);
        self.policy.serializer().run(move || {
            if policy.is_shutdown() {
                return;
            }
            for connection in &connections {
                connection.attempt_to_connect();
            }
        });
    }
}
