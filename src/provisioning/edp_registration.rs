use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::edp::{
    DataTenantPayload, EdpClient, EdpConfig, MetadataTenantPayload, MAAS_CONSUMER_ENVIRONMENT_KEY,
    MAAS_CONSUMER_REGION_KEY, MAAS_CONSUMER_SUBACCOUNT_KEY,
};
use crate::operation::Operation;
use crate::process::{
    ExternalError, ExternalErrorPolicy, OpLog, OperationManager, Step, StepResult,
};

/// Registers the instance's subaccount as a data tenant in EDP.
///
/// Both calls are create-or-accept-existing, so replaying the step after a
/// partial run is harmless.
///
/// Unlike other steps, malformed provisioning parameters are routed through
/// the required/optional policy: an optional registration is skipped rather
/// than failing the operation.
pub struct EdpRegistrationStep {
    operation_manager: OperationManager,
    client: Arc<dyn EdpClient>,
    config: EdpConfig,
    policy: ExternalErrorPolicy,
}

impl EdpRegistrationStep {
    pub fn new(
        operation_manager: OperationManager,
        client: Arc<dyn EdpClient>,
        config: EdpConfig,
    ) -> Self {
        let policy = ExternalErrorPolicy::new(config.required);
        Self {
            operation_manager,
            client,
            config,
            policy,
        }
    }

    pub fn with_policy(mut self, policy: ExternalErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn handle_error(
        &self,
        operation: Operation,
        error: &ExternalError,
        message: &str,
        log: &OpLog,
    ) -> StepResult {
        self.policy
            .handle(&self.operation_manager, operation, error, self.name(), message, log)
    }
}

#[async_trait]
impl Step for EdpRegistrationStep {
    fn name(&self) -> &str {
        "EDP_Registration"
    }

    async fn run(&self, operation: Operation, log: &OpLog) -> StepResult {
        let parameters = match operation.get_provisioning_parameters() {
            Ok(p) => p,
            Err(e) => {
                let error = ExternalError::permanent(e.to_string());
                return self.handle_error(
                    operation,
                    &error,
                    "invalid operation provisioning parameters",
                    log,
                );
            }
        };
        let subaccount_id = parameters.ers_context.subaccount_id.as_str();
        let environment = self.config.environment.as_str();

        log.info(format!("Create DataTenant for {subaccount_id} subaccount"));
        let payload = DataTenantPayload {
            name: subaccount_id.to_string(),
            environment: environment.to_string(),
            secret: generate_secret(subaccount_id, environment),
        };
        if let Err(e) = self.client.create_data_tenant(payload).await {
            return self.handle_error(operation, &e, "cannot create DataTenant", log);
        }

        log.info(format!("Create DataTenant metadata for {subaccount_id} subaccount"));
        let metadata = [
            (
                MAAS_CONSUMER_ENVIRONMENT_KEY,
                select_environment_key(&parameters.platform_region, log),
            ),
            (MAAS_CONSUMER_REGION_KEY, parameters.platform_region.as_str()),
            (MAAS_CONSUMER_SUBACCOUNT_KEY, subaccount_id),
        ];
        for (key, value) in metadata {
            let payload = MetadataTenantPayload {
                key: key.to_string(),
                value: value.to_string(),
            };
            if let Err(e) = self
                .client
                .create_metadata_tenant(subaccount_id, environment, payload)
                .await
            {
                let message = format!("cannot create DataTenant metadata {key}");
                return self.handle_error(operation, &e, &message, log);
            }
        }

        StepResult::done(operation)
    }
}

/// Map a platform region such as `cf-eu10` to the EDP consumer environment
pub fn select_environment_key(region: &str, log: &OpLog) -> &'static str {
    match region.split('-').next().unwrap_or_default() {
        "cf" => "CF",
        "k8s" => "KUBERNETES",
        "neo" => "NEO",
        _ => {
            log.warn(format!(
                "region {region} does not fit any of the options, default CF is used"
            ));
            "CF"
        }
    }
}

/// The tenant secret is required by the API but never used afterwards
fn generate_secret(name: &str, environment: &str) -> String {
    STANDARD.encode(format!("{name}{environment}"))
}
