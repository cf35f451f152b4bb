//! Operation scanner - periodically re-enqueues in-progress operations.
//!
//! Operations whose requeue timer was lost (process restart, crash) are
//! picked up again on the next scan. The queue ignores ids that are already
//! queued, running or waiting out a requested delay, so rescanning never
//! shortens a delay.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::process::Queue;
use crate::storage::{OperationStorage, StorageError};

/// Default scan interval
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct OperationScanner {
    storage: Arc<dyn OperationStorage>,
    queue: Queue,
    poll_interval: Duration,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl OperationScanner {
    pub fn new(storage: Arc<dyn OperationStorage>, queue: Queue) -> Self {
        Self {
            storage,
            queue,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_rx: None,
        }
    }

    /// Zero is raised to one millisecond; `tokio::time::interval` rejects it
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set shutdown receiver
    pub fn with_shutdown(mut self, rx: mpsc::Receiver<()>) -> Self {
        self.shutdown_rx = Some(rx);
        self
    }

    /// Enqueue every in-progress operation once; returns how many were found
    pub fn scan_once(&self) -> Result<usize, StorageError> {
        let operations = self.storage.list_in_progress(None)?;
        debug!("Found {} in-progress operations", operations.len());
        for operation in &operations {
            self.queue.add(&operation.id);
        }
        Ok(operations.len())
    }

    /// Scan on every tick until shutdown. The first tick fires immediately.
    #[instrument(skip(self))]
    pub async fn run(&mut self) {
        info!(
            "Operation scanner started, poll interval: {:?}",
            self.poll_interval
        );

        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan_once() {
                        error!("Error scanning operations: {}", e);
                    }
                }
                _ = async {
                    if let Some(ref mut rx) = self.shutdown_rx {
                        rx.recv().await
                    } else {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    info!("Operation scanner shutting down");
                    break;
                }
            }
        }
    }
}
