use async_trait::async_trait;

use crate::operation::{ConfigEntry, Operation};
use crate::process::{OpLog, OperationManager, Step, StepResult};

pub const NATS_STREAMING_COMPONENT: &str = "nats-streaming";

/// Turns off NATS Streaming persistence. Usually wrapped in
/// [`ConditionalStep::trial_only`](crate::process::ConditionalStep::trial_only).
pub struct NatsStreamingStep {
    operation_manager: OperationManager,
}

impl NatsStreamingStep {
    pub fn new(operation_manager: OperationManager) -> Self {
        Self { operation_manager }
    }
}

#[async_trait]
impl Step for NatsStreamingStep {
    fn name(&self) -> &str {
        "Provision Nats Streaming"
    }

    async fn run(&self, mut operation: Operation, log: &OpLog) -> StepResult {
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

        log.info(format!("Provisioning for PlanID: {}", parameters.plan_id));
        operation
            .input
            .append_overrides(NATS_STREAMING_COMPONENT, nats_streaming_overrides());
        StepResult::done(operation)
    }
}

fn nats_streaming_overrides() -> Vec<ConfigEntry> {
    vec![ConfigEntry::new(
        "global.natsStreaming.persistence.enabled",
        "false",
    )]
}
