//! Step pipeline execution.
//!
//! Steps return a [`StepResult`]: the (possibly mutated) operation, a
//! requeue delay and an optional error. Nothing in here sleeps; the caller
//! owns the wait.

pub mod conditional;
pub mod error;
pub mod executor;
pub mod log;
pub mod manager;
pub mod policy;
pub mod queue;
pub mod step;

use std::time::Duration;

pub use conditional::ConditionalStep;
pub use error::{ExternalError, ProcessError};
pub use executor::{Executor, OperationExecutor};
pub use log::OpLog;
pub use manager::{OperationManager, STORAGE_RETRY_DELAY};
pub use policy::ExternalErrorPolicy;
pub use queue::Queue;
pub use step::Step;

use crate::operation::Operation;

/// Outcome of running a step (or a manager transition) against an operation
#[derive(Debug)]
pub struct StepResult {
    pub operation: Operation,
    /// Non-zero: re-invoke after this long
    pub delay: Duration,
    pub error: Option<ProcessError>,
}

impl StepResult {
    /// Step finished; move on
    pub fn done(operation: Operation) -> Self {
        Self {
            operation,
            delay: Duration::ZERO,
            error: None,
        }
    }

    /// Step not finished; come back after `delay`
    pub fn retry_after(operation: Operation, delay: Duration) -> Self {
        Self {
            operation,
            delay,
            error: None,
        }
    }

    pub fn failed(operation: Operation, error: ProcessError) -> Self {
        Self {
            operation,
            delay: Duration::ZERO,
            error: Some(error),
        }
    }

    pub fn is_done(&self) -> bool {
        self.delay.is_zero() && self.error.is_none()
    }
}
