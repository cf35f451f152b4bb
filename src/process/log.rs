//! Per-operation logging context.

use std::fmt::Display;

use tracing::{debug, error, info, warn};

use crate::operation::Operation;

/// Structured logging sink handed to every step and manager call.
///
/// Events carry the operation id and, once scoped, the step name.
#[derive(Debug, Clone)]
pub struct OpLog {
    operation_id: String,
    step: Option<String>,
}

impl OpLog {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            step: None,
        }
    }

    pub fn for_operation(operation: &Operation) -> Self {
        Self::new(operation.id.clone())
    }

    /// Same context, scoped to a step
    pub fn with_step(&self, step: &str) -> Self {
        Self {
            operation_id: self.operation_id.clone(),
            step: Some(step.to_string()),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    pub fn debug(&self, message: impl Display) {
        debug!(operation_id = %self.operation_id, step = self.step_field(), "{message}");
    }

    pub fn info(&self, message: impl Display) {
        info!(operation_id = %self.operation_id, step = self.step_field(), "{message}");
    }

    pub fn warn(&self, message: impl Display) {
        warn!(operation_id = %self.operation_id, step = self.step_field(), "{message}");
    }

    pub fn error(&self, message: impl Display) {
        error!(operation_id = %self.operation_id, step = self.step_field(), "{message}");
    }

    fn step_field(&self) -> &str {
        self.step.as_deref().unwrap_or("-")
    }
}
