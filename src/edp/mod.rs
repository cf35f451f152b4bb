//! Event data platform (EDP) tenant registration.

mod client;

pub use client::{EdpCall, EdpClient, HttpEdpClient, MockEdpClient};

use serde::{Deserialize, Serialize};

pub const MAAS_CONSUMER_ENVIRONMENT_KEY: &str = "maasConsumerEnvironment";
pub const MAAS_CONSUMER_REGION_KEY: &str = "maasConsumerRegion";
pub const MAAS_CONSUMER_SUBACCOUNT_KEY: &str = "maasConsumerSubAccount";

/// EDP connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdpConfig {
    /// Base URL of the EDP admin API
    #[serde(default)]
    pub admin_url: String,
    #[serde(default)]
    pub namespace: String,
    /// Landscape the tenants are registered in, e.g. "dev" or "prod"
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Whether a registration failure fails the whole provisioning
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for EdpConfig {
    fn default() -> Self {
        Self {
            admin_url: "http://localhost:8082/edp".to_string(),
            namespace: "kyma-dev".to_string(),
            environment: "dev".to_string(),
            token: None,
            required: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTenantPayload {
    pub name: String,
    pub environment: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTenantPayload {
    pub key: String,
    pub value: String,
}
