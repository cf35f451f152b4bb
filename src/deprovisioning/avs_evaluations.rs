use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::avs::{Delegator, EvalAssistant};
use crate::operation::Operation;
use crate::process::{OpLog, OperationManager, Step, StepResult};

const RETRY_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_BUDGET: Duration = Duration::from_secs(10 * 60);

/// Removes the internal and then the external evaluation.
///
/// Monitoring cleanup never blocks deprovisioning: once the retry budget is
/// spent the step is abandoned and the workflow continues.
pub struct AvsEvaluationRemovalStep {
    delegator: Arc<Delegator>,
    internal_eval_assistant: Arc<dyn EvalAssistant>,
    external_eval_assistant: Arc<dyn EvalAssistant>,
    operation_manager: OperationManager,
}

impl AvsEvaluationRemovalStep {
    pub fn new(
        delegator: Arc<Delegator>,
        internal_eval_assistant: Arc<dyn EvalAssistant>,
        external_eval_assistant: Arc<dyn EvalAssistant>,
        operation_manager: OperationManager,
    ) -> Self {
        Self {
            delegator,
            internal_eval_assistant,
            external_eval_assistant,
            operation_manager,
        }
    }
}

#[async_trait]
impl Step for AvsEvaluationRemovalStep {
    fn name(&self) -> &str {
        "De-provision_AVS_Evaluations"
    }

    async fn run(&self, mut operation: Operation, log: &OpLog) -> StepResult {
        log.info(format!("Avs lifecycle {:?}", operation.avs));
        if self.internal_eval_assistant.is_already_deleted(&operation)
            && self.external_eval_assistant.is_already_deleted(&operation)
        {
            log.info("Both internal and external evaluations have been deleted");
            return StepResult::done(operation);
        }

        for assistant in [&self.internal_eval_assistant, &self.external_eval_assistant] {
            if let Err(e) = self
                .delegator
                .delete_evaluation(&mut operation, log, &**assistant)
                .await
            {
                return self.operation_manager.retry_operation_without_fail(
                    operation,
                    &e.to_string(),
                    RETRY_INTERVAL,
                    RETRY_BUDGET,
                    log,
                );
            }
        }

        StepResult::done(operation)
    }
}
