//! Monitoring evaluation (AVS) lifecycle.
//!
//! Each instance gets an internal and an external evaluation. Removing them
//! on deprovisioning goes through the [`Delegator`], which guards each
//! deletion with a side-effect flag on the operation.

mod assistant;
mod client;
mod delegator;

pub use assistant::{
    EvalAssistant, ExternalEvalAssistant, InternalEvalAssistant, EXTERNAL_EVALUATION_DELETED,
    INTERNAL_EVALUATION_DELETED,
};
pub use client::{AvsCall, AvsClient, HttpAvsClient, MockAvsClient};
pub use delegator::{Delegator, DelegatorError};

use serde::{Deserialize, Serialize};

/// AVS connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvsConfig {
    /// Base URL of the evaluation API
    #[serde(default)]
    pub api_endpoint: String,
    /// Bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,
    /// Parent evaluation that internal evaluations are attached to
    #[serde(default)]
    pub internal_tester_parent_id: i64,
    /// Parent evaluation that external evaluations are attached to
    #[serde(default)]
    pub external_tester_parent_id: i64,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for AvsConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "http://localhost:8081/api/v2/evaluationmetadata".to_string(),
            api_token: None,
            internal_tester_parent_id: 0,
            external_tester_parent_id: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}
