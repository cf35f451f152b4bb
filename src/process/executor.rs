//! Runs the ordered step list for an operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{OpLog, OperationManager, ProcessError, Step, STORAGE_RETRY_DELAY};
use crate::operation::{Operation, OperationKind};
use crate::storage::{OperationStorage, StorageError};

/// Anything the work queue can hand an operation id to
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Advance the operation as far as possible.
    ///
    /// `Ok(Duration::ZERO)` means nothing more to do; a non-zero delay asks
    /// to be called again no earlier than that.
    async fn execute(&self, operation_id: &str) -> Result<Duration, ProcessError>;
}

/// Executes the static step list registered for each operation kind.
///
/// Every execution replays the list from the first step; steps skip work
/// they have already done. The operation is persisted after each step
/// before the next one runs.
pub struct Executor {
    storage: Arc<dyn OperationStorage>,
    operation_manager: OperationManager,
    steps: HashMap<OperationKind, Vec<Arc<dyn Step>>>,
}

impl Executor {
    pub fn new(storage: Arc<dyn OperationStorage>, operation_manager: OperationManager) -> Self {
        Self {
            storage,
            operation_manager,
            steps: HashMap::new(),
        }
    }

    /// Register the ordered steps for an operation kind
    pub fn with_steps(mut self, kind: OperationKind, steps: Vec<Arc<dyn Step>>) -> Self {
        self.steps.insert(kind, steps);
        self
    }

    pub fn step_names(&self, kind: OperationKind) -> Vec<&str> {
        self.steps
            .get(&kind)
            .map(|steps| steps.iter().map(|s| s.name()).collect())
            .unwrap_or_default()
    }

    async fn run_steps(&self, mut operation: Operation) -> Result<Duration, ProcessError> {
        let log = OpLog::for_operation(&operation);
        let steps = self
            .steps
            .get(&operation.kind)
            .ok_or(ProcessError::NoSteps(operation.kind))?;

        for step in steps {
            let step_log = log.with_step(step.name());
            step_log.debug("running step");

            let before = operation.clone();
            let result = step.run(operation, &step_log).await;
            let mut current = result.operation;

            // Persist in-memory changes no one has committed yet, including
            // those a step made after committing through the manager
            let uncommitted = if current.version == before.version {
                current != before
            } else if current.is_terminal() {
                false
            } else {
                match self.storage.get_operation(&current.id) {
                    Ok(stored) => stored.version == current.version && stored != current,
                    Err(e) => {
                        step_log.warn(format!("cannot reload operation: {e}"));
                        return Ok(STORAGE_RETRY_DELAY);
                    }
                }
            };
            if uncommitted {
                let (persisted, repeat) = self.operation_manager.update_operation(current, &step_log);
                if !repeat.is_zero() {
                    return Ok(repeat);
                }
                current = persisted;
            }

            if let Some(error) = result.error {
                if current.is_terminal() {
                    return Err(error);
                }
                // The step handed the decision up: the operation cannot proceed
                let description = error.to_string();
                let failed = self
                    .operation_manager
                    .operation_failed(current, &description, &step_log);
                return match failed.error {
                    Some(e) => Err(e),
                    None => Ok(failed.delay),
                };
            }

            if !result.delay.is_zero() {
                step_log.info(format!("step requested requeue after {:?}", result.delay));
                return Ok(result.delay);
            }

            if current.is_terminal() {
                step_log.info(format!("operation reached state {}", current.state));
                return Ok(Duration::ZERO);
            }
            operation = current;
        }

        let finished = self
            .operation_manager
            .operation_succeeded(operation, "Operation succeeded", &log);
        if finished.delay.is_zero() {
            log.info("all steps completed");
        }
        Ok(finished.delay)
    }
}

#[async_trait]
impl OperationExecutor for Executor {
    #[instrument(skip(self))]
    async fn execute(&self, operation_id: &str) -> Result<Duration, ProcessError> {
        let operation = match self.storage.get_operation(operation_id) {
            Ok(op) => op,
            Err(e @ (StorageError::NotFound(_) | StorageError::InvalidId(_))) => {
                return Err(e.into())
            }
            Err(e) => {
                info!("cannot load operation {}: {}", operation_id, e);
                return Ok(STORAGE_RETRY_DELAY);
            }
        };

        if operation.is_terminal() {
            debug!("operation {} already {}", operation_id, operation.state);
            return Ok(Duration::ZERO);
        }

        self.run_steps(operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationState;
    use crate::process::StepResult;
    use crate::storage::InMemoryStorage;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted step: each call pops the next behaviour
    #[derive(Clone, Copy)]
    enum Behaviour {
        SetFlag(&'static str),
        CommitThenSetFlag(&'static str, &'static str),
        Requeue(u64),
        Fail,
        RawError,
    }

    struct ScriptedStep {
        name: &'static str,
        script: Mutex<Vec<Behaviour>>,
        calls: AtomicUsize,
        manager: OperationManager,
    }

    impl ScriptedStep {
        fn new(name: &'static str, manager: &OperationManager, script: Vec<Behaviour>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                manager: manager.clone(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Step for ScriptedStep {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, mut operation: Operation, log: &OpLog) -> StepResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    script[0]
                }
            };
            match next {
                Behaviour::SetFlag(flag) => {
                    operation.side_effect_flags.set(flag);
                    StepResult::done(operation)
                }
                Behaviour::CommitThenSetFlag(first, second) => {
                    operation.side_effect_flags.set(first);
                    let (mut committed, repeat) = self.manager.update_operation(operation, log);
                    if !repeat.is_zero() {
                        return StepResult::retry_after(committed, repeat);
                    }
                    committed.side_effect_flags.set(second);
                    StepResult::done(committed)
                }
                Behaviour::Requeue(secs) => {
                    StepResult::retry_after(operation, Duration::from_secs(secs))
                }
                Behaviour::Fail => self.manager.operation_failed(operation, "step broke", log),
                Behaviour::RawError => StepResult::failed(
                    operation,
                    crate::process::ExternalError::permanent("upstream said no").into(),
                ),
            }
        }
    }

    fn steps(list: &[&Arc<ScriptedStep>]) -> Vec<Arc<dyn Step>> {
        list.iter()
            .map(|step| Arc::clone(*step) as Arc<dyn Step>)
            .collect()
    }

    fn setup() -> (Arc<InMemoryStorage>, OperationManager, Operation) {
        let storage = Arc::new(InMemoryStorage::new());
        let op = storage
            .insert_operation(Operation::new(OperationKind::Deprovision, "i", "{}", Utc::now()))
            .unwrap();
        let manager = OperationManager::new(storage.clone());
        (storage, manager, op)
    }

    #[tokio::test]
    async fn test_runs_all_steps_and_succeeds() {
        let (storage, manager, op) = setup();
        let a = ScriptedStep::new("a", &manager, vec![Behaviour::SetFlag("a")]);
        let b = ScriptedStep::new("b", &manager, vec![Behaviour::SetFlag("b")]);
        let executor = Executor::new(storage.clone(), manager)
            .with_steps(OperationKind::Deprovision, steps(&[&a, &b]));

        let delay = executor.execute(&op.id).await.unwrap();
        assert!(delay.is_zero());

        let stored = storage.get_operation(&op.id).unwrap();
        assert_eq!(stored.state, OperationState::Succeeded);
        assert_eq!(stored.description, "Operation succeeded");
        assert!(stored.side_effect_flags.is_set("a"));
        assert!(stored.side_effect_flags.is_set("b"));
        assert_eq!(executor.step_names(OperationKind::Deprovision), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_persists_between_steps_before_requeue() {
        let (storage, manager, op) = setup();
        let a = ScriptedStep::new("a", &manager, vec![Behaviour::SetFlag("a")]);
        let b = ScriptedStep::new(
            "b",
            &manager,
            vec![Behaviour::Requeue(10), Behaviour::SetFlag("b")],
        );
        let executor = Executor::new(storage.clone(), manager)
            .with_steps(OperationKind::Deprovision, steps(&[&a, &b]));

        let delay = executor.execute(&op.id).await.unwrap();
        assert_eq!(delay, Duration::from_secs(10));
        let stored = storage.get_operation(&op.id).unwrap();
        assert!(stored.side_effect_flags.is_set("a"));
        assert_eq!(stored.state, OperationState::InProgress);

        // Second pass replays from the first step
        let delay = executor.execute(&op.id).await.unwrap();
        assert!(delay.is_zero());
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 2);
        assert_eq!(
            storage.get_operation(&op.id).unwrap().state,
            OperationState::Succeeded
        );
    }

    #[tokio::test]
    async fn test_persists_changes_made_after_step_commit() {
        let (storage, manager, op) = setup();
        let a = ScriptedStep::new(
            "a",
            &manager,
            vec![Behaviour::CommitThenSetFlag("first", "second")],
        );
        let b = ScriptedStep::new("b", &manager, vec![Behaviour::Requeue(10)]);
        let executor = Executor::new(storage.clone(), manager)
            .with_steps(OperationKind::Deprovision, steps(&[&a, &b]));

        let delay = executor.execute(&op.id).await.unwrap();
        assert_eq!(delay, Duration::from_secs(10));

        let stored = storage.get_operation(&op.id).unwrap();
        assert!(stored.side_effect_flags.is_set("first"));
        assert!(stored.side_effect_flags.is_set("second"));
        assert_eq!(stored.version, op.version + 2);
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline() {
        let (storage, manager, op) = setup();
        let a = ScriptedStep::new("a", &manager, vec![Behaviour::Fail]);
        let b = ScriptedStep::new("b", &manager, vec![Behaviour::SetFlag("b")]);
        let executor = Executor::new(storage.clone(), manager)
            .with_steps(OperationKind::Deprovision, steps(&[&a, &b]));

        let err = executor.execute(&op.id).await.unwrap_err();
        assert!(matches!(err, ProcessError::OperationFailed(ref d) if d == "step broke"));
        assert_eq!(b.calls(), 0);
        assert_eq!(
            storage.get_operation(&op.id).unwrap().state,
            OperationState::Failed
        );

        // Terminal: nothing more runs
        assert!(executor.execute(&op.id).await.unwrap().is_zero());
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_raw_step_error_fails_operation() {
        let (storage, manager, op) = setup();
        let a = ScriptedStep::new("a", &manager, vec![Behaviour::RawError]);
        let executor = Executor::new(storage.clone(), manager)
            .with_steps(OperationKind::Deprovision, steps(&[&a]));

        let err = executor.execute(&op.id).await.unwrap_err();
        assert!(matches!(err, ProcessError::OperationFailed(_)));
        let stored = storage.get_operation(&op.id).unwrap();
        assert_eq!(stored.state, OperationState::Failed);
        assert_eq!(stored.description, "upstream said no");
    }

    #[tokio::test]
    async fn test_storage_failure_discards_step_changes() {
        let (storage, manager, op) = setup();
        let a = ScriptedStep::new("a", &manager, vec![Behaviour::SetFlag("a")]);
        let executor = Executor::new(storage.clone(), manager)
            .with_steps(OperationKind::Deprovision, steps(&[&a]));

        storage.fail_updates(true);
        let delay = executor.execute(&op.id).await.unwrap();
        assert_eq!(delay, STORAGE_RETRY_DELAY);
        assert_eq!(storage.get_operation(&op.id).unwrap(), op);

        storage.fail_updates(false);
        assert!(executor.execute(&op.id).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_unknown_operation_and_missing_steps() {
        let (storage, manager, op) = setup();
        let executor = Executor::new(storage, manager);

        assert!(matches!(
            executor.execute("nope").await,
            Err(ProcessError::Storage(StorageError::NotFound(_)))
        ));
        assert!(matches!(
            executor.execute(&op.id).await,
            Err(ProcessError::NoSteps(OperationKind::Deprovision))
        ));
    }
}
