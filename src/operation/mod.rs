//! Persisted operation records.
//!
//! An [`Operation`] is the unit of workflow state: steps read its immutable
//! parameters, set side-effect flags and append to its input, and the
//! operation manager persists the result after every step.

pub mod input;
pub mod parameters;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use input::{ConfigEntry, InputCreator};
pub use parameters::{ErsContext, ProvisioningParameters, ServiceParameters, TRIAL_PLAN_ID};

/// Errors raised while reading an operation's own data
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("invalid provisioning parameters: {0}")]
    InvalidParameters(#[from] serde_json::Error),
}

/// Lifecycle state of an operation. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    InProgress,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Succeeded | OperationState::Failed)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::InProgress => write!(f, "in progress"),
            OperationState::Succeeded => write!(f, "succeeded"),
            OperationState::Failed => write!(f, "failed"),
        }
    }
}

/// Which workflow an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Provision,
    Deprovision,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Provision => write!(f, "provision"),
            OperationKind::Deprovision => write!(f, "deprovision"),
        }
    }
}

/// Named idempotency guards.
///
/// A flag is set at most once and never cleared; there is deliberately no
/// way to unset one through this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SideEffectFlags(BTreeSet<String>);

impl SideEffectFlags {
    pub fn is_set(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Set a flag. Returns `false` when it was already set.
    pub fn set(&mut self, name: &str) -> bool {
        self.0.insert(name.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Monitoring evaluations created for the instance during provisioning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvsLifecycle {
    #[serde(default)]
    pub internal_evaluation_id: Option<i64>,
    #[serde(default)]
    pub external_evaluation_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub instance_id: String,
    pub kind: OperationKind,
    /// Optimistic-concurrency counter, bumped by storage on every update
    #[serde(default)]
    pub version: i64,
    pub state: OperationState,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Clock for the retry budget; advanced on every persisted mutation
    pub updated_at: DateTime<Utc>,
    /// Raw JSON, decoded on demand so a corrupt record surfaces as an error
    pub provisioning_parameters: String,
    #[serde(default)]
    pub avs: AvsLifecycle,
    #[serde(default)]
    pub side_effect_flags: SideEffectFlags,
    #[serde(default)]
    pub input: InputCreator,
}

impl Operation {
    /// Create a fresh in-progress operation
    pub fn new(
        kind: OperationKind,
        instance_id: impl Into<String>,
        provisioning_parameters: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instance_id: instance_id.into(),
            kind,
            version: 0,
            state: OperationState::InProgress,
            description: String::new(),
            created_at: now,
            updated_at: now,
            provisioning_parameters: provisioning_parameters.into(),
            avs: AvsLifecycle::default(),
            side_effect_flags: SideEffectFlags::default(),
            input: InputCreator::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn get_provisioning_parameters(&self) -> Result<ProvisioningParameters, OperationError> {
        Ok(serde_json::from_str(&self.provisioning_parameters)?)
    }

    /// Advance `updated_at` to `now`, or by one microsecond if the clock has
    /// not moved past the previous value.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + ChronoDuration::microseconds(1)
        };
    }
}
