use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{check_update, OperationStorage, StorageError};
use crate::clock::{Clock, SystemClock};
use crate::operation::{Operation, OperationKind};

/// In-process storage backed by a map.
///
/// Cloning shares the underlying records. `fail_updates` switches every
/// subsequent update into a storage error, which is how tests exercise the
/// manager's retry-the-write path.
#[derive(Clone)]
pub struct InMemoryStorage {
    operations: Arc<Mutex<HashMap<String, Operation>>>,
    clock: Arc<dyn Clock>,
    fail_updates: Arc<AtomicBool>,
    update_calls: Arc<AtomicUsize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            operations: Arc::new(Mutex::new(HashMap::new())),
            clock,
            fail_updates: Arc::new(AtomicBool::new(false)),
            update_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Number of `update_operation` calls, successful or not
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Operation>> {
        self.operations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationStorage for InMemoryStorage {
    fn get_operation(&self, id: &str) -> Result<Operation, StorageError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn insert_operation(&self, operation: Operation) -> Result<Operation, StorageError> {
        let mut operations = self.lock();
        if operations.contains_key(&operation.id) {
            return Err(StorageError::AlreadyExists(operation.id));
        }
        operations.insert(operation.id.clone(), operation.clone());
        Ok(operation)
    }

    fn update_operation(&self, mut operation: Operation) -> Result<Operation, StorageError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }

        let mut operations = self.lock();
        let stored = operations
            .get(&operation.id)
            .ok_or_else(|| StorageError::NotFound(operation.id.clone()))?;
        check_update(stored, &operation)?;

        operation.version += 1;
        operation.touch(self.clock.now());
        operations.insert(operation.id.clone(), operation.clone());
        Ok(operation)
    }

    fn list_in_progress(
        &self,
        kind: Option<OperationKind>,
    ) -> Result<Vec<Operation>, StorageError> {
        let mut found: Vec<Operation> = self
            .lock()
            .values()
            .filter(|op| !op.is_terminal())
            .filter(|op| kind.map_or(true, |k| op.kind == k))
            .cloned()
            .collect();
        found.sort_by_key(|op| op.created_at);
        Ok(found)
    }
}
