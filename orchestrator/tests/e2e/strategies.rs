//! Strategy behaviour seen through process_request

use std::time::Duration;

use agent_orchestrator::{
    CapabilityTag, ExecutionStrategy, Orchestrator, OrchestratorConfig, StageStatus,
};
use tokio_test::assert_ok;

use super::support::{request, scripted_engine, scripted_registry, FixedPolicy, Script};

#[tokio::test]
async fn test_sequential_stops_at_first_failure() {
    let (engine, counters) = scripted_engine(&[(CapabilityTag::EDITING, Script::Fail)]);
    let engine = engine.with_policy(Box::new(FixedPolicy(
        vec![CapabilityTag::PLANNING, CapabilityTag::EDITING, CapabilityTag::REVIEWING],
        ExecutionStrategy::Sequential,
    )));

    let result = assert_ok!(engine.process_request(request("anything")).await);

    assert!(!result.success);
    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.stages[1].status, StageStatus::Error);
    assert_eq!(result.stages[1].error.as_ref().unwrap().code, "SCRIPTED_FAILURE");
    assert_eq!(counters.executed(), 2);
    assert_eq!(counters.disposed(), 2);
    // Only the completed stage contributes an artifact
    assert_eq!(result.artifacts.len(), 1);
}

#[tokio::test]
async fn test_parallel_isolates_one_failure() {
    let (engine, counters) = scripted_engine(&[(CapabilityTag::REVIEWING, Script::Fail)]);
    let caps = vec![
        CapabilityTag::FILE_DISCOVERY,
        CapabilityTag::PLANNING,
        CapabilityTag::REVIEWING,
        CapabilityTag::TESTING,
    ];
    let engine =
        engine.with_policy(Box::new(FixedPolicy(caps.clone(), ExecutionStrategy::Parallel)));

    let result = assert_ok!(engine.process_request(request("anything")).await);

    assert!(!result.success);
    assert_eq!(result.stages.len(), 4);
    assert_eq!(result.failed_stages().count(), 1);
    assert_eq!(
        result.stages.iter().map(|s| s.capability.clone()).collect::<Vec<_>>(),
        caps
    );
    assert_eq!(counters.executed(), 4);
}

#[tokio::test]
async fn test_dag_skips_dependents_of_failed_stage() {
    let (engine, counters) = scripted_engine(&[(CapabilityTag::PLANNING, Script::Fail)]);
    let engine = engine.with_policy(Box::new(FixedPolicy(
        vec![
            CapabilityTag::FILE_DISCOVERY,
            CapabilityTag::PLANNING,
            CapabilityTag::EDITING,
            CapabilityTag::TESTING,
        ],
        ExecutionStrategy::Dag,
    )));

    let result = assert_ok!(engine.process_request(request("anything")).await);

    let statuses: Vec<_> = result.stages.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StageStatus::Completed,
            StageStatus::Error,
            StageStatus::Skipped,
            StageStatus::Skipped,
        ]
    );
    assert_eq!(result.stages[2].error.as_ref().unwrap().code, "DEPENDENCY_FAILED");
    assert_eq!(counters.executed(), 2);
}

#[tokio::test]
async fn test_admission_limit_bounds_running_workers() {
    let mut config = OrchestratorConfig::default();
    config.engine.max_concurrent_workers = 2;

    let sleepy = Script::Sleep(Duration::from_millis(30));
    let scripts: Vec<_> = CapabilityTag::builtin().into_iter().map(|t| (t, sleepy)).collect();
    let (registry, counters) = scripted_registry(&scripts);

    let engine = Orchestrator::new(config)
        .with_capabilities(registry)
        .with_policy(Box::new(FixedPolicy(
            CapabilityTag::builtin().to_vec(),
            ExecutionStrategy::Parallel,
        )));

    let result = assert_ok!(engine.process_request(request("anything")).await);

    assert!(result.success);
    assert_eq!(result.stages.len(), 5);
    assert_eq!(counters.peak(), 2);
}
