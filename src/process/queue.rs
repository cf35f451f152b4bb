//! Work queue feeding operation ids to a pool of workers.
//!
//! An id is processed by at most one worker at a time. Ids added while
//! already queued are collapsed. Ids added while in flight are deferred and
//! re-queued once the running execution finishes, unless that execution
//! asked for a delay. While a requested delay is pending the id is only
//! released by its timer, so no caller can run it early.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::OperationExecutor;

#[derive(Default)]
struct QueueState {
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    deferred: HashSet<String>,
    /// Ids waiting on a requeue timer, with the instant it fires
    delayed: HashMap<String, Instant>,
}

struct Inner {
    executor: Arc<dyn OperationExecutor>,
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    state: Mutex<QueueState>,
}

/// Cloneable handle to the queue
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

impl Queue {
    pub fn new(executor: Arc<dyn OperationExecutor>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                executor,
                tx,
                rx: tokio::sync::Mutex::new(rx),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Enqueue an operation for immediate processing.
    ///
    /// No-op while the id is waiting out a requested delay.
    pub fn add(&self, operation_id: &str) {
        {
            let mut state = self.lock_state();
            if state.delayed.contains_key(operation_id) {
                debug!(operation_id, "operation is delayed, ignoring add");
                return;
            }
            if state.in_flight.contains(operation_id) {
                state.deferred.insert(operation_id.to_string());
                return;
            }
            if !state.queued.insert(operation_id.to_string()) {
                return;
            }
        }
        self.send(operation_id);
    }

    /// Enqueue an operation once `delay` has passed. A later call for the
    /// same id replaces the pending deadline.
    pub fn add_after(&self, operation_id: &str, delay: Duration) {
        let deadline = Instant::now() + delay;
        self.lock_state()
            .delayed
            .insert(operation_id.to_string(), deadline);
        self.spawn_release(operation_id, deadline);
    }

    fn spawn_release(&self, operation_id: &str, deadline: Instant) {
        let queue = self.clone();
        let id = operation_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.release(&id, deadline);
        });
    }

    fn release(&self, operation_id: &str, deadline: Instant) {
        {
            let mut state = self.lock_state();
            if state.delayed.get(operation_id) != Some(&deadline) {
                // Superseded by a newer timer
                return;
            }
            state.delayed.remove(operation_id);
            if state.in_flight.contains(operation_id) {
                state.deferred.insert(operation_id.to_string());
                return;
            }
            if !state.queued.insert(operation_id.to_string()) {
                return;
            }
        }
        self.send(operation_id);
    }

    fn send(&self, operation_id: &str) {
        if self.inner.tx.send(operation_id.to_string()).is_err() {
            warn!("queue closed, dropping operation {}", operation_id);
        }
    }

    /// Number of ids waiting, delayed or being processed
    pub fn pending(&self) -> usize {
        let state = self.lock_state();
        state.queued.len() + state.in_flight.len() + state.delayed.len()
    }

    /// Whether the id is waiting out a requested delay
    pub fn is_delayed(&self, operation_id: &str) -> bool {
        self.lock_state().delayed.contains_key(operation_id)
    }

    /// Process ids with `workers` concurrent workers until a shutdown
    /// message arrives or the sender is dropped.
    pub async fn run(&self, workers: usize, mut shutdown_rx: mpsc::Receiver<()>) {
        info!("operation queue started with {} workers", workers.max(1));

        let mut tasks = JoinSet::new();
        for worker in 0..workers.max(1) {
            let queue = self.clone();
            tasks.spawn(async move { queue.worker(worker).await });
        }

        let _ = shutdown_rx.recv().await;
        info!("operation queue shutting down");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }

    async fn worker(&self, worker: usize) {
        loop {
            let next = {
                let mut rx = self.inner.rx.lock().await;
                rx.recv().await
            };
            let Some(operation_id) = next else {
                break;
            };
            self.process(worker, operation_id).await;
        }
    }

    async fn process(&self, worker: usize, operation_id: String) {
        {
            let mut state = self.lock_state();
            state.queued.remove(&operation_id);
            if state.in_flight.contains(&operation_id) {
                state.deferred.insert(operation_id);
                return;
            }
            state.in_flight.insert(operation_id.clone());
        }

        debug!(worker, operation_id = %operation_id, "processing operation");
        let delay = match self.inner.executor.execute(&operation_id).await {
            Ok(delay) if !delay.is_zero() => {
                debug!(operation_id = %operation_id, "requeue after {:?}", delay);
                Some(delay)
            }
            Ok(_) => {
                info!(operation_id = %operation_id, "operation processing finished");
                None
            }
            Err(e) => {
                error!(operation_id = %operation_id, "operation processing stopped: {}", e);
                None
            }
        };

        // Leaving in-flight and entering the delay happen under one lock so
        // no add can slip in between
        let (rerun, deadline) = {
            let mut state = self.lock_state();
            state.in_flight.remove(&operation_id);
            let deferred = state.deferred.remove(&operation_id);
            match delay {
                Some(delay) => {
                    // A requested delay wins over adds that arrived during the run
                    let deadline = Instant::now() + delay;
                    state.delayed.insert(operation_id.clone(), deadline);
                    (false, Some(deadline))
                }
                None => (deferred, None),
            }
        };
        if let Some(deadline) = deadline {
            self.spawn_release(&operation_id, deadline);
        } else if rerun {
            self.add(&operation_id);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
