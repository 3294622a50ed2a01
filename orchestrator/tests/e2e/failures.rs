//! Fatal and per-stage failures

use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_orchestrator::{
    Capability, CapabilityRegistry, CapabilityTag, DependencyTable, DryRunCapability,
    ExecutionStrategy, Orchestrator, OrchestratorConfig, OrchestratorError, StageStatus,
    UserRequest,
};
use tokio_test::{assert_err, assert_ok};

use super::support::{dry_run_engine, request, scripted_registry, FixedPolicy, Script};

#[tokio::test]
async fn test_cycle_rejects_request_and_leaves_no_workflow() {
    let cyclic =
        DependencyTable::builtin().with_entry(CapabilityTag::PLANNING, [CapabilityTag::TESTING]);
    let engine = dry_run_engine().with_dependency_table(cyclic);

    let err = assert_err!(
        engine
            .process_request(request("plan, implement, review and test the new API"))
            .await
    );

    match err {
        OrchestratorError::CircularDependency { remaining } => {
            assert!(remaining.contains(&CapabilityTag::PLANNING));
            assert!(remaining.contains(&CapabilityTag::TESTING));
        }
        other => panic!("Expected CircularDependency, got {other:?}"),
    }
    assert!(engine.active_workflows().is_empty());
    assert_eq!(engine.running_workers(), 0);
}

#[tokio::test]
async fn test_timeout_fails_stage_without_hanging() {
    let mut config = OrchestratorConfig::default();
    config.engine.worker_timeout_secs = 1;

    let (registry, counters) = scripted_registry(&[(CapabilityTag::TESTING, Script::Hang)]);
    let engine = Orchestrator::new(config)
        .with_capabilities(registry)
        .with_policy(Box::new(FixedPolicy(
            vec![CapabilityTag::REVIEWING, CapabilityTag::TESTING],
            ExecutionStrategy::Parallel,
        )));

    let started = Instant::now();
    let run = engine.process_request(request("anything"));
    let result = assert_ok!(tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("workflow should finish shortly after the worker timeout"));

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert_eq!(result.stages[0].status, StageStatus::Completed);
    assert_eq!(result.stages[1].status, StageStatus::Error);
    assert_eq!(result.stages[1].error.as_ref().unwrap().code, "TIMEOUT");
    assert!(result.stages[1].error.as_ref().unwrap().recoverable);

    // The timed-out worker was asked to stop and still disposed
    assert_eq!(counters.cancelled(), 1);
    assert_eq!(counters.disposed(), 2);
}

#[tokio::test]
async fn test_unknown_capability_fails_only_its_stage() {
    let engine = Orchestrator::new(OrchestratorConfig::default())
        .with_capabilities(CapabilityRegistry::new().with_dry_run())
        .with_policy(Box::new(FixedPolicy(
            vec![CapabilityTag::FILE_DISCOVERY, CapabilityTag::new("deploy")],
            ExecutionStrategy::Parallel,
        )));

    let result = assert_ok!(engine.process_request(request("anything")).await);

    assert!(!result.success);
    assert_eq!(result.stages[0].status, StageStatus::Completed);
    assert_eq!(result.stages[1].status, StageStatus::Error);
    assert_eq!(result.stages[1].error.as_ref().unwrap().code, "UNKNOWN_CAPABILITY");
}

#[tokio::test]
async fn test_panicking_constructor_fails_only_its_stage() {
    let (mut registry, _) = scripted_registry(&[]);
    registry.register(CapabilityTag::EDITING, |_| panic!("ctor blew up"));

    let engine = Orchestrator::new(OrchestratorConfig::default())
        .with_capabilities(registry)
        .with_policy(Box::new(FixedPolicy(
            vec![CapabilityTag::FILE_DISCOVERY, CapabilityTag::EDITING],
            ExecutionStrategy::Parallel,
        )));

    let result = assert_ok!(engine.process_request(request("anything")).await);

    assert!(!result.success);
    assert_eq!(result.stages[0].status, StageStatus::Completed);
    assert_eq!(result.stages[1].status, StageStatus::Error);
    let error = result.stages[1].error.as_ref().unwrap();
    assert_eq!(error.code, "WORKER_EXECUTION_ERROR");
    assert!(error.message.contains("ctor blew up"));
    assert!(engine.active_workflows().is_empty());
}

#[tokio::test]
async fn test_panicking_cancel_after_timeout_is_contained() {
    let mut config = OrchestratorConfig::default();
    config.engine.worker_timeout_secs = 1;

    let (registry, counters) =
        scripted_registry(&[(CapabilityTag::EDITING, Script::HangPanicOnCancel)]);
    let engine = Orchestrator::new(config)
        .with_capabilities(registry)
        .with_policy(Box::new(FixedPolicy(
            vec![CapabilityTag::FILE_DISCOVERY, CapabilityTag::EDITING],
            ExecutionStrategy::Parallel,
        )));

    let run = engine.process_request(request("anything"));
    let result = assert_ok!(tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("workflow should finish shortly after the worker timeout"));

    assert_eq!(result.stages[0].status, StageStatus::Completed);
    assert_eq!(result.stages[1].error.as_ref().unwrap().code, "TIMEOUT");
    assert_eq!(counters.cancelled(), 1);
    assert_eq!(counters.disposed(), 2);
    assert_eq!(engine.running_workers(), 0);
}

#[tokio::test]
async fn test_constructor_without_table_entry_is_unknown() {
    let registry = CapabilityRegistry::new()
        .with_dry_run()
        .with_capability(CapabilityTag::new("deploy"), |config| {
            Ok(Arc::new(DryRunCapability::new(config)) as Arc<dyn Capability>)
        });
    let engine = Orchestrator::new(OrchestratorConfig::default())
        .with_capabilities(registry)
        .with_policy(Box::new(FixedPolicy(
            vec![CapabilityTag::new("deploy")],
            ExecutionStrategy::Sequential,
        )));

    let result = assert_ok!(engine.process_request(request("anything")).await);

    assert!(!result.success);
    assert_eq!(result.stages.len(), 1);
    assert_eq!(result.stages[0].status, StageStatus::Error);
    assert_eq!(result.stages[0].worker_id, None);
    assert_eq!(result.stages[0].error.as_ref().unwrap().code, "UNKNOWN_CAPABILITY");
}

#[tokio::test]
async fn test_malformed_request_is_rejected_up_front() {
    let engine = dry_run_engine();

    let err = assert_err!(
        engine
            .process_request(UserRequest::new("has space", "chat", "fix it"))
            .await
    );
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert!(err.is_fatal());
    assert!(engine.active_workflows().is_empty());
}
