use std::sync::Arc;

use thiserror::Error;

use super::{AvsClient, EvalAssistant};
use crate::operation::Operation;
use crate::process::{ExternalError, OpLog, OperationManager};

#[derive(Error, Debug)]
pub enum DelegatorError {
    #[error(transparent)]
    External(#[from] ExternalError),

    /// The evaluation is gone but the flag could not be persisted
    #[error("cannot persist {0} evaluation removal")]
    Storage(String),
}

/// Deletes monitoring evaluations at most once per operation.
///
/// The assistant's flag is the idempotency boundary: once it is set and
/// persisted, replaying the workflow never calls out again.
pub struct Delegator {
    client: Arc<dyn AvsClient>,
    operation_manager: OperationManager,
}

impl Delegator {
    pub fn new(client: Arc<dyn AvsClient>, operation_manager: OperationManager) -> Self {
        Self {
            client,
            operation_manager,
        }
    }

    /// Delete the evaluation selected by `assistant`.
    ///
    /// On success the operation is updated in place with the flag set and
    /// persisted. On any error it is left exactly as it was passed in.
    pub async fn delete_evaluation(
        &self,
        operation: &mut Operation,
        log: &OpLog,
        assistant: &dyn EvalAssistant,
    ) -> Result<(), DelegatorError> {
        if assistant.is_already_deleted(operation) {
            log.debug(format!("{} evaluation already deleted", assistant.name()));
            return Ok(());
        }

        match assistant.evaluation_id(operation) {
            Some(evaluation_id) => {
                log.info(format!(
                    "deleting {} evaluation {evaluation_id}",
                    assistant.name()
                ));
                self.client
                    .remove_reference_from_parent_eval(assistant.parent_id(), evaluation_id)
                    .await?;
                self.client.delete_evaluation(evaluation_id).await?;
            }
            None => {
                log.info(format!(
                    "no {} evaluation recorded, nothing to delete",
                    assistant.name()
                ));
            }
        }

        let mut changed = operation.clone();
        assistant.set_deleted(&mut changed);
        let (updated, repeat) = self.operation_manager.update_operation(changed, log);
        if !repeat.is_zero() {
            return Err(DelegatorError::Storage(assistant.name().to_string()));
        }
        *operation = updated;
        Ok(())
    }
}
