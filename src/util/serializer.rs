//! Control-plane work serializer.

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-writer executor for the policy's control plane.
///
/// Every mutation of the endpoint set, counters, and shutdown flag runs as
/// a job on one drain task, in submission order; that ordering is the only
/// ordering the policy relies on. `run` is synchronous and callable from any
/// thread, including data-plane pick paths and `Drop` impls.
#[derive(Clone)]
pub struct WorkSerializer {
    tx: mpsc::UnboundedSender<Job>,
}

impl WorkSerializer {
    /// Create a serializer whose drain loop runs on the current tokio
    /// runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            trace!("work serializer closed");
        });
        Self { tx }
    }

    /// Enqueue a job. Jobs submitted after the owning runtime has shut down
    /// are dropped.
    pub fn run(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            trace!("work serializer gone, dropping job");
        }
    }

    /// Wait until every job enqueued before this call has run.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.run(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

impl Default for WorkSerializer {
    fn default() -> Self {
        Self::new()
    }
}
