//! End-to-end tests for the provisioning and deprovisioning workflows.
//!
//! External services are replaced by the in-crate mock clients; operations
//! are persisted with `FileStorage` so a "restart" is simulated by opening a
//! fresh storage and executor on the same directory.

use std::sync::Arc;
use std::time::Duration;

use broker_lifecycle::avs::{
    AvsCall, AvsConfig, MockAvsClient, EXTERNAL_EVALUATION_DELETED, INTERNAL_EVALUATION_DELETED,
};
use broker_lifecycle::clock::{Clock, ManualClock};
use broker_lifecycle::edp::{EdpConfig, MockEdpClient};
use broker_lifecycle::operation::{Operation, OperationKind, OperationState, TRIAL_PLAN_ID};
use broker_lifecycle::process::{
    Executor, ExternalError, OperationExecutor, OperationManager, ProcessError,
};
use broker_lifecycle::provisioning::NATS_STREAMING_COMPONENT;
use broker_lifecycle::storage::{FileStorage, InMemoryStorage, OperationStorage};
use broker_lifecycle::workflows::{build_executor, Clients};
use chrono::{TimeDelta, Utc};
use tempfile::TempDir;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn avs_config() -> AvsConfig {
    AvsConfig {
        internal_tester_parent_id: 1000,
        external_tester_parent_id: 2000,
        ..AvsConfig::default()
    }
}

fn edp_config(required: bool) -> EdpConfig {
    EdpConfig {
        environment: "dev".to_string(),
        required,
        ..EdpConfig::default()
    }
}

fn params(plan_id: &str) -> String {
    serde_json::json!({
        "plan_id": plan_id,
        "service_id": "47c9dcbf-ff30-448e-ab36-d3bad66ba281",
        "ers_context": {
            "subaccount_id": "sub-42",
            "global_account_id": "ga-1",
            "tenant_id": "tenant-1"
        },
        "platform_region": "cf-eu10",
        "parameters": {"name": "my-cluster"}
    })
    .to_string()
}

fn executor_on(
    storage: Arc<dyn OperationStorage>,
    manager: OperationManager,
    edp: &MockEdpClient,
    avs: &MockAvsClient,
    edp_required: bool,
) -> Executor {
    build_executor(
        storage,
        manager,
        Clients {
            edp: Arc::new(edp.clone()),
            avs: Arc::new(avs.clone()),
        },
        &edp_config(edp_required),
        &avs_config(),
    )
}

fn file_executor(
    dir: &TempDir,
    edp: &MockEdpClient,
    avs: &MockAvsClient,
) -> (Arc<FileStorage>, Executor) {
    let storage = Arc::new(FileStorage::open(dir.path()).unwrap());
    let manager = OperationManager::new(storage.clone());
    let executor = executor_on(storage.clone(), manager, edp, avs, true);
    (storage, executor)
}

fn deprovisioning_operation(storage: &FileStorage) -> Operation {
    let mut op = Operation::new(
        OperationKind::Deprovision,
        "instance-1",
        params("4deee563-e5ec-4731-b9b1-53b42d855f0c"),
        Utc::now(),
    );
    op.avs.internal_evaluation_id = Some(11);
    op.avs.external_evaluation_id = Some(22);
    storage.insert_operation(op).unwrap()
}

// ─── Deprovisioning ──────────────────────────────────────────────────────────

#[tokio::test]
async fn deprovisioning_removes_both_evaluations_and_succeeds() {
    let dir = TempDir::new().unwrap();
    let avs = MockAvsClient::new();
    let (storage, executor) = file_executor(&dir, &MockEdpClient::new(), &avs);
    let op = deprovisioning_operation(&storage);

    let delay = executor.execute(&op.id).await.unwrap();
    assert!(delay.is_zero());

    let stored = storage.get_operation(&op.id).unwrap();
    assert_eq!(stored.state, OperationState::Succeeded);
    assert_eq!(stored.description, "Operation succeeded");
    assert!(stored.side_effect_flags.is_set(INTERNAL_EVALUATION_DELETED));
    assert!(stored.side_effect_flags.is_set(EXTERNAL_EVALUATION_DELETED));
    assert_eq!(
        avs.recorded(),
        vec![
            AvsCall::RemoveReference {
                parent_id: 1000,
                evaluation_id: 11
            },
            AvsCall::DeleteEvaluation { evaluation_id: 11 },
            AvsCall::RemoveReference {
                parent_id: 2000,
                evaluation_id: 22
            },
            AvsCall::DeleteEvaluation { evaluation_id: 22 },
        ]
    );

    // Finished operations are left alone
    assert!(executor.execute(&op.id).await.unwrap().is_zero());
    assert_eq!(avs.call_count(), 4);
}

#[tokio::test]
async fn restart_after_partial_deprovisioning_does_not_repeat_deletions() {
    let dir = TempDir::new().unwrap();
    let avs = MockAvsClient::new();
    avs.fail_for(22, ExternalError::temporary("avs: HTTP 503 - "));

    let op = {
        let (storage, executor) = file_executor(&dir, &MockEdpClient::new(), &avs);
        let op = deprovisioning_operation(&storage);

        let delay = executor.execute(&op.id).await.unwrap();
        assert_eq!(delay, Duration::from_secs(10));

        let stored = storage.get_operation(&op.id).unwrap();
        assert_eq!(stored.state, OperationState::InProgress);
        assert!(stored.side_effect_flags.is_set(INTERNAL_EVALUATION_DELETED));
        assert!(!stored.side_effect_flags.is_set(EXTERNAL_EVALUATION_DELETED));
        op
    };

    // Fresh process: new storage handle, new executor, healthy AVS
    let avs = MockAvsClient::new();
    let (storage, executor) = file_executor(&dir, &MockEdpClient::new(), &avs);
    assert!(executor.execute(&op.id).await.unwrap().is_zero());

    assert_eq!(
        avs.recorded(),
        vec![
            AvsCall::RemoveReference {
                parent_id: 2000,
                evaluation_id: 22
            },
            AvsCall::DeleteEvaluation { evaluation_id: 22 },
        ]
    );
    assert_eq!(
        storage.get_operation(&op.id).unwrap().state,
        OperationState::Succeeded
    );
}

#[tokio::test]
async fn restart_with_all_flags_persisted_makes_no_external_calls() {
    let dir = TempDir::new().unwrap();
    let avs = MockAvsClient::new();
    let (storage, executor) = file_executor(&dir, &MockEdpClient::new(), &avs);

    let mut op = deprovisioning_operation(&storage);
    op.side_effect_flags.set(INTERNAL_EVALUATION_DELETED);
    op.side_effect_flags.set(EXTERNAL_EVALUATION_DELETED);
    let op = storage.update_operation(op).unwrap();

    assert!(executor.execute(&op.id).await.unwrap().is_zero());
    assert_eq!(avs.call_count(), 0);
    assert_eq!(
        storage.get_operation(&op.id).unwrap().state,
        OperationState::Succeeded
    );
}

// ─── Provisioning ────────────────────────────────────────────────────────────

#[tokio::test]
async fn trial_provisioning_registers_edp_and_disables_nats_persistence() {
    let dir = TempDir::new().unwrap();
    let edp = MockEdpClient::new();
    let (storage, executor) = file_executor(&dir, &edp, &MockAvsClient::new());
    let op = storage
        .insert_operation(Operation::new(
            OperationKind::Provision,
            "instance-2",
            params(TRIAL_PLAN_ID),
            Utc::now(),
        ))
        .unwrap();

    assert!(executor.execute(&op.id).await.unwrap().is_zero());

    let stored = storage.get_operation(&op.id).unwrap();
    assert_eq!(stored.state, OperationState::Succeeded);
    assert_eq!(edp.call_count(), 4);
    let overrides = stored.input.overrides(NATS_STREAMING_COMPONENT);
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].key, "global.natsStreaming.persistence.enabled");
    assert_eq!(overrides[0].value, "false");
}

#[tokio::test]
async fn paid_provisioning_skips_nats_override() {
    let dir = TempDir::new().unwrap();
    let edp = MockEdpClient::new();
    let (storage, executor) = file_executor(&dir, &edp, &MockAvsClient::new());
    let op = storage
        .insert_operation(Operation::new(
            OperationKind::Provision,
            "instance-3",
            params("4deee563-e5ec-4731-b9b1-53b42d855f0c"),
            Utc::now(),
        ))
        .unwrap();

    assert!(executor.execute(&op.id).await.unwrap().is_zero());

    let stored = storage.get_operation(&op.id).unwrap();
    assert_eq!(stored.state, OperationState::Succeeded);
    assert!(stored.input.overrides(NATS_STREAMING_COMPONENT).is_empty());
    assert_eq!(stored.input.components().count(), 0);
}

#[tokio::test]
async fn edp_outage_fails_required_registration_after_budget() {
    let clock = ManualClock::new(Utc::now());
    let storage = Arc::new(InMemoryStorage::with_clock(Arc::new(clock.clone())));
    let manager = OperationManager::with_clock(storage.clone(), Arc::new(clock.clone()));
    let edp = MockEdpClient::new();
    edp.fail_with(Some(ExternalError::temporary("edp: request failed")));
    let executor = executor_on(storage.clone(), manager, &edp, &MockAvsClient::new(), true);

    let op = storage
        .insert_operation(Operation::new(
            OperationKind::Provision,
            "instance-4",
            params(TRIAL_PLAN_ID),
            clock.now(),
        ))
        .unwrap();

    // Polled while the outage is young
    let delay = executor.execute(&op.id).await.unwrap();
    assert_eq!(delay, Duration::from_secs(10));

    clock.advance(TimeDelta::minutes(31));
    let err = executor.execute(&op.id).await.unwrap_err();
    assert!(matches!(err, ProcessError::OperationFailed(ref d) if d == "cannot create DataTenant"));

    let stored = storage.get_operation(&op.id).unwrap();
    assert_eq!(stored.state, OperationState::Failed);
    assert!(stored.input.overrides(NATS_STREAMING_COMPONENT).is_empty());
}

#[tokio::test]
async fn edp_outage_skips_optional_registration() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = OperationManager::new(storage.clone());
    let edp = MockEdpClient::new();
    edp.fail_with(Some(ExternalError::permanent("edp: HTTP 400 - ")));
    let executor = executor_on(storage.clone(), manager, &edp, &MockAvsClient::new(), false);

    let op = storage
        .insert_operation(Operation::new(
            OperationKind::Provision,
            "instance-5",
            params(TRIAL_PLAN_ID),
            Utc::now(),
        ))
        .unwrap();

    assert!(executor.execute(&op.id).await.unwrap().is_zero());
    let stored = storage.get_operation(&op.id).unwrap();
    assert_eq!(stored.state, OperationState::Succeeded);
    assert_eq!(stored.input.overrides(NATS_STREAMING_COMPONENT).len(), 1);
}
