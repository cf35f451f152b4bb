//! Retry policy for errors returned by external services.

use std::time::Duration;

use super::{ExternalError, OpLog, OperationManager, StepResult};
use crate::operation::Operation;

/// Default delay between polls while a temporary error persists
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default time a temporary error is tolerated before giving up
pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(30 * 60);

/// How a step reacts to a failed external call.
///
/// Temporary errors are re-polled until `budget` has elapsed since the
/// operation was last updated. After that, or for permanent errors, a
/// required step fails the operation and an optional one is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalErrorPolicy {
    pub poll_interval: Duration,
    pub budget: Duration,
    pub required: bool,
}

impl ExternalErrorPolicy {
    pub fn new(required: bool) -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            budget: DEFAULT_RETRY_BUDGET,
            required,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn handle(
        &self,
        manager: &OperationManager,
        operation: Operation,
        error: &ExternalError,
        step_name: &str,
        message: &str,
        log: &OpLog,
    ) -> StepResult {
        log.error(format!("{message}: {error}"));

        if error.is_temporary() && manager.within_budget(&operation, self.budget) {
            log.error(format!("request failed: {error}. Retry..."));
            return StepResult::retry_after(operation, self.poll_interval);
        }

        if !self.required {
            log.error(format!(
                "Step {step_name} failed. Step is not required. Skip step."
            ));
            return StepResult::done(operation);
        }

        manager.operation_failed(operation, message, log)
    }
}
