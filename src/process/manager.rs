//! Operation state transitions and the retry budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use super::{OpLog, ProcessError, StepResult};
use crate::clock::{Clock, SystemClock};
use crate::operation::{Operation, OperationState};
use crate::storage::OperationStorage;

/// Delay returned when a write fails; the caller retries the write, not the
/// business decision
pub const STORAGE_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Persists operation transitions and decides retry vs. fail.
///
/// Cheap to clone; every step that needs to fail or retry holds its own copy.
#[derive(Clone)]
pub struct OperationManager {
    storage: Arc<dyn OperationStorage>,
    clock: Arc<dyn Clock>,
}

impl OperationManager {
    pub fn new(storage: Arc<dyn OperationStorage>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn OperationStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Mark the operation succeeded. Only asks for a repeat on storage error.
    pub fn operation_succeeded(
        &self,
        operation: Operation,
        description: &str,
        log: &OpLog,
    ) -> StepResult {
        let (operation, repeat) =
            self.update(operation, OperationState::Succeeded, description, log);
        StepResult::retry_after(operation, repeat)
    }

    /// Mark the operation failed.
    ///
    /// Returns a terminal error unless the write failed, in which case the
    /// caller is asked to come back and the error is withheld.
    pub fn operation_failed(
        &self,
        operation: Operation,
        description: &str,
        log: &OpLog,
    ) -> StepResult {
        let (operation, repeat) = self.update(operation, OperationState::Failed, description, log);
        if !repeat.is_zero() {
            return StepResult::retry_after(operation, repeat);
        }
        StepResult::failed(
            operation,
            ProcessError::OperationFailed(description.to_string()),
        )
    }

    /// Retry every `retry_interval` until `max_time` has passed since the
    /// operation was last updated, then fail it.
    pub fn retry_operation(
        &self,
        operation: Operation,
        error_message: &str,
        retry_interval: Duration,
        max_time: Duration,
        log: &OpLog,
    ) -> StepResult {
        log.info(format!(
            "Retry Operation was triggered with message: {error_message}"
        ));
        log.info(format!("Retrying for {max_time:?} in {retry_interval:?} steps"));
        if self.within_budget(&operation, max_time) {
            return StepResult::retry_after(operation, retry_interval);
        }
        log.error(format!("Aborting after {max_time:?} of failing retries"));
        self.operation_failed(operation, error_message, log)
    }

    /// Like [`retry_operation`](Self::retry_operation), but once the budget is
    /// spent the step is given up on and the workflow moves on as if it had
    /// succeeded. For best-effort work that must not block the operation.
    pub fn retry_operation_without_fail(
        &self,
        operation: Operation,
        error_message: &str,
        retry_interval: Duration,
        max_time: Duration,
        log: &OpLog,
    ) -> StepResult {
        log.info(format!(
            "Retry Operation was triggered with message: {error_message}"
        ));
        log.info(format!("Retrying for {max_time:?} in {retry_interval:?} steps"));
        if self.within_budget(&operation, max_time) {
            return StepResult::retry_after(operation, retry_interval);
        }
        log.error(format!(
            "Aborting after {max_time:?} of failing retries, proceeding without this step: {error_message}"
        ));
        StepResult::done(operation)
    }

    /// Persist the operation. On failure, returns the input unchanged and a
    /// repeat delay.
    pub fn update_operation(&self, operation: Operation, log: &OpLog) -> (Operation, Duration) {
        match self.storage.update_operation(operation.clone()) {
            Ok(updated) => (updated, Duration::ZERO),
            Err(e) => {
                log.error(format!(
                    "Error when updating operation {} in storage: {e}",
                    operation.id
                ));
                (operation, STORAGE_RETRY_DELAY)
            }
        }
    }

    /// Time since the operation last made progress
    pub fn elapsed_since_update(&self, operation: &Operation) -> TimeDelta {
        self.clock.now() - operation.updated_at
    }

    /// True while less than `max_time` has elapsed since the last update
    pub fn within_budget(&self, operation: &Operation, max_time: Duration) -> bool {
        let budget = TimeDelta::from_std(max_time).unwrap_or(TimeDelta::MAX);
        self.elapsed_since_update(operation) < budget
    }

    fn update(
        &self,
        operation: Operation,
        state: OperationState,
        description: &str,
        log: &OpLog,
    ) -> (Operation, Duration) {
        let mut changed = operation.clone();
        changed.state = state;
        changed.description = description.to_string();

        let (updated, repeat) = self.update_operation(changed, log);
        if repeat.is_zero() {
            (updated, repeat)
        } else {
            // The attempted transition was not committed
            (operation, repeat)
        }
    }
}
