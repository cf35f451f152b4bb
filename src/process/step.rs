use async_trait::async_trait;

use super::{OpLog, StepResult};
use crate::operation::Operation;

/// A named, idempotent unit of work over an operation.
///
/// Running a step twice against an operation in the same state must not
/// repeat externally visible side effects. A step may set side-effect flags
/// and append to the operation input, but never changes its parameters.
/// Whatever the returned operation carries beyond the last committed copy is
/// persisted by the executor before the next step runs.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable identifier used in logs
    fn name(&self) -> &str;

    async fn run(&self, operation: Operation, log: &OpLog) -> StepResult;
}
