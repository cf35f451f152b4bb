//! Provisioning parameters supplied when the instance was requested.

use serde::{Deserialize, Serialize};

/// Plan id of the free trial service plan
pub const TRIAL_PLAN_ID: &str = "7d55d31d-35ae-4438-bf13-6ffdfa107d9f";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningParameters {
    pub plan_id: String,
    #[serde(default)]
    pub service_id: String,
    pub ers_context: ErsContext,
    #[serde(default)]
    pub platform_region: String,
    #[serde(default)]
    pub parameters: ServiceParameters,
}

impl ProvisioningParameters {
    pub fn is_trial(&self) -> bool {
        is_trial_plan(&self.plan_id)
    }
}

/// Account context forwarded by the platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErsContext {
    pub subaccount_id: String,
    #[serde(default)]
    pub global_account_id: String,
    #[serde(default)]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceParameters {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
}

pub fn is_trial_plan(plan_id: &str) -> bool {
    plan_id == TRIAL_PLAN_ID
}
