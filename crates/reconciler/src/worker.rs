//! Fixed-size worker pool draining a [`KeyQueue`].

use std::sync::Arc;

use sources_core::SourceResult;
use sources_store::KeyQueue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::orchestrator::KeyReconciler;

#[derive(Debug)]
pub struct Outcome {
    pub kind: &'static str,
    pub key: String,
    pub result: SourceResult<()>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    results: mpsc::UnboundedReceiver<Outcome>,
}

/// Spawn `workers` tasks reconciling keys from `queue` until it is shut
/// down and drained. Each result is reported once; retries are up to the
/// caller.
pub fn spawn_workers(queue: Arc<KeyQueue>, reconciler: Arc<dyn KeyReconciler>, workers: usize) -> WorkerPool {
    let (tx, results) = mpsc::unbounded_channel();
    let handles = (0..workers.max(1))
        .map(|id| {
            let queue = queue.clone();
            let reconciler = reconciler.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    let result = reconciler.reconcile(&key).await;
                    if let Err(e) = &result {
                        warn!(worker = id, kind = reconciler.kind(), key = %key, error = %e, "reconcile failed");
                    }
                    queue.done(&key);
                    let outcome = Outcome { kind: reconciler.kind(), key, result };
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
                debug!(worker = id, "worker stopped");
            })
        })
        .collect();
    WorkerPool { handles, results }
}

impl WorkerPool {
    /// Next reported result; `None` once every worker has stopped.
    pub async fn next(&mut self) -> Option<Outcome> {
        self.results.recv().await
    }

    /// Wait for every worker to stop and collect the results not yet taken.
    pub async fn join(mut self) -> Vec<Outcome> {
        for h in self.handles.drain(..) {
            if let Err(e) = h.await {
                warn!(error = %e, "worker task failed");
            }
        }
        let mut out = Vec::new();
        while let Ok(o) = self.results.try_recv() {
            out.push(o);
        }
        out
    }
}
