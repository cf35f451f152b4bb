//! Ordered step lists per operation kind.

use std::sync::Arc;

use crate::avs::{AvsClient, AvsConfig, Delegator, ExternalEvalAssistant, InternalEvalAssistant};
use crate::deprovisioning::AvsEvaluationRemovalStep;
use crate::edp::{EdpClient, EdpConfig};
use crate::operation::OperationKind;
use crate::process::{ConditionalStep, Executor, OperationManager, Step};
use crate::provisioning::{EdpRegistrationStep, NatsStreamingStep};
use crate::storage::OperationStorage;

pub fn provisioning_steps(
    operation_manager: &OperationManager,
    edp_client: Arc<dyn EdpClient>,
    edp_config: &EdpConfig,
) -> Vec<Arc<dyn Step>> {
    let edp: Arc<dyn Step> = Arc::new(EdpRegistrationStep::new(
        operation_manager.clone(),
        edp_client,
        edp_config.clone(),
    ));
    let nats: Arc<dyn Step> = Arc::new(NatsStreamingStep::new(operation_manager.clone()));
    let trial_nats: Arc<dyn Step> =
        Arc::new(ConditionalStep::trial_only(nats, operation_manager.clone()));
    vec![edp, trial_nats]
}

pub fn deprovisioning_steps(
    operation_manager: &OperationManager,
    avs_client: Arc<dyn AvsClient>,
    avs_config: &AvsConfig,
) -> Vec<Arc<dyn Step>> {
    let delegator = Arc::new(Delegator::new(avs_client, operation_manager.clone()));
    let avs_removal: Arc<dyn Step> = Arc::new(AvsEvaluationRemovalStep::new(
        delegator,
        Arc::new(InternalEvalAssistant::new(avs_config)),
        Arc::new(ExternalEvalAssistant::new(avs_config)),
        operation_manager.clone(),
    ));
    vec![avs_removal]
}

/// External collaborators the workflows talk to
pub struct Clients {
    pub edp: Arc<dyn EdpClient>,
    pub avs: Arc<dyn AvsClient>,
}

/// Executor with both workflows registered
pub fn build_executor(
    storage: Arc<dyn OperationStorage>,
    operation_manager: OperationManager,
    clients: Clients,
    edp_config: &EdpConfig,
    avs_config: &AvsConfig,
) -> Executor {
    let provisioning = provisioning_steps(&operation_manager, clients.edp, edp_config);
    let deprovisioning = deprovisioning_steps(&operation_manager, clients.avs, avs_config);
    Executor::new(storage, operation_manager)
        .with_steps(OperationKind::Provision, provisioning)
        .with_steps(OperationKind::Deprovision, deprovisioning)
}
