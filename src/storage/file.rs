use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{check_update, OperationStorage, StorageError};
use crate::clock::{Clock, SystemClock};
use crate::operation::{Operation, OperationKind};

/// Directory of JSON records, one file per operation.
///
/// Writes go to a temporary file that is renamed over the record, so a crash
/// mid-write leaves the previous version intact. The read-compare-write
/// sequence is serialized within the process by a lock.
pub struct FileStorage {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            clock,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids are joined into a file name, so only `[A-Za-z0-9_-]` is accepted
    fn record_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn read(&self, id: &str) -> Result<Operation, StorageError> {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Err(StorageError::NotFound(id.to_string()));
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(&self, operation: &Operation) -> Result<(), StorageError> {
        let path = self.record_path(&operation.id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", operation.id));
        let contents = serde_json::to_string_pretty(operation)?;
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)?;
        debug!(operation_id = %operation.id, version = operation.version, "operation record written");
        Ok(())
    }
}

impl OperationStorage for FileStorage {
    fn get_operation(&self, id: &str) -> Result<Operation, StorageError> {
        self.read(id)
    }

    fn insert_operation(&self, operation: Operation) -> Result<Operation, StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.record_path(&operation.id)?.exists() {
            return Err(StorageError::AlreadyExists(operation.id));
        }
        self.write(&operation)?;
        Ok(operation)
    }

    fn update_operation(&self, mut operation: Operation) -> Result<Operation, StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let stored = self.read(&operation.id)?;
        check_update(&stored, &operation)?;

        operation.version += 1;
        operation.touch(self.clock.now());
        self.write(&operation)?;
        Ok(operation)
    }

    fn list_in_progress(
        &self,
        kind: Option<OperationKind>,
    ) -> Result<Vec<Operation>, StorageError> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            let operation: Operation = match serde_json::from_str(&contents) {
                Ok(op) => op,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable operation record");
                    continue;
                }
            };
            if !operation.is_terminal() && kind.map_or(true, |k| operation.kind == k) {
                found.push(operation);
            }
        }
        found.sort_by_key(|op| op.created_at);
        Ok(found)
    }
}
