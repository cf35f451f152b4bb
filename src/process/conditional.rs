//! Step decorator gated on the operation's provisioning parameters.

use std::sync::Arc;

use async_trait::async_trait;

use super::{OpLog, OperationManager, Step, StepResult};
use crate::operation::{Operation, ProvisioningParameters};

type Predicate = dyn Fn(&ProvisioningParameters) -> bool + Send + Sync;

/// Runs the wrapped step only when the predicate holds.
///
/// A false predicate skips the step: the operation comes back untouched with
/// no delay. Parameters that cannot be decoded fail the operation.
pub struct ConditionalStep {
    step: Arc<dyn Step>,
    predicate: Box<Predicate>,
    operation_manager: OperationManager,
}

impl ConditionalStep {
    pub fn new<F>(step: Arc<dyn Step>, operation_manager: OperationManager, predicate: F) -> Self
    where
        F: Fn(&ProvisioningParameters) -> bool + Send + Sync + 'static,
    {
        Self {
            step,
            predicate: Box::new(predicate),
            operation_manager,
        }
    }

    /// Run `step` only for instances on the trial plan
    pub fn trial_only(step: Arc<dyn Step>, operation_manager: OperationManager) -> Self {
        Self::new(step, operation_manager, ProvisioningParameters::is_trial)
    }
}

#[async_trait]
impl Step for ConditionalStep {
    fn name(&self) -> &str {
        self.step.name()
    }

    async fn run(&self, operation: Operation, log: &OpLog) -> StepResult {
        let parameters = match operation.get_provisioning_parameters() {
            Ok(p) => p,
            Err(e) => {
                log.error(format!("cannot fetch provisioning parameters from operation: {e}"));
                return self.operation_manager.operation_failed(
                    operation,
                    "invalid operation provisioning parameters",
                    log,
                );
            }
        };

        if (self.predicate)(&parameters) {
            log.info(format!("Running step {}", self.name()));
            return self.step.run(operation, log).await;
        }

        log.debug(format!("Skipping step {}", self.name()));
        StepResult::done(operation)
    }
}
