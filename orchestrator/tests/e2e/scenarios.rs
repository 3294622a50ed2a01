//! Request analysis through to a finished workflow, with dry-run workers

use agent_orchestrator::{
    event_channel, ArtifactKind, CapabilityTag, ExecutionStrategy, Priority, StageStatus,
    WorkflowEvent, WorkflowEventSender, WorkflowStatus,
};
use tokio_test::assert_ok;

use super::support::{dry_run_engine, request};

#[test]
fn test_analysis_is_deterministic() {
    let engine = dry_run_engine();
    let first = engine.analyze(&request("Refactor the parser and add tests"));
    let second = engine.analyze(&request("Refactor the parser and add tests"));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_find_and_fix_runs_in_parallel() {
    let engine = dry_run_engine();
    let req = request("find and fix a bug in this file");

    let decision = engine.analyze(&req);
    assert_eq!(
        decision.capabilities,
        vec![CapabilityTag::FILE_DISCOVERY, CapabilityTag::EDITING]
    );
    assert_eq!(decision.strategy, ExecutionStrategy::Parallel);
    assert_eq!(decision.priority, Priority::Normal);

    let result = assert_ok!(engine.process_request(req).await);
    assert!(result.success);
    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.stages[0].capability, CapabilityTag::FILE_DISCOVERY);
    assert_eq!(result.stages[1].capability, CapabilityTag::EDITING);

    let kinds: Vec<_> = result.artifacts.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![ArtifactKind::Discovery, ArtifactKind::Diff]);
    assert!(engine.active_workflows().is_empty());
}

#[tokio::test]
async fn test_full_pipeline_runs_as_dag() {
    let (tx, mut rx) = event_channel();
    let engine = dry_run_engine().with_event_sender(WorkflowEventSender::new(tx));
    let req = request("plan, implement, review and test the new API");

    let decision = engine.analyze(&req);
    assert_eq!(
        decision.capabilities,
        vec![
            CapabilityTag::PLANNING,
            CapabilityTag::EDITING,
            CapabilityTag::REVIEWING,
            CapabilityTag::TESTING,
        ]
    );
    assert_eq!(decision.strategy, ExecutionStrategy::Dag);
    assert_eq!(decision.priority, Priority::High);

    let result = assert_ok!(engine.process_request(req).await);
    assert!(result.success);
    assert_eq!(result.stages.len(), 4);
    assert!(result.stages.iter().all(|s| s.status == StageStatus::Completed));

    // Editing received planning's output
    let editing = result
        .stages
        .iter()
        .find(|s| s.capability == CapabilityTag::EDITING)
        .unwrap();
    let deps = &editing.output.as_ref().unwrap()["dependencies"];
    assert!(deps.get("planning").is_some());

    drop(engine);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(WorkflowEvent::WorkflowStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(WorkflowEvent::WorkflowFinished {
            status: WorkflowStatus::Completed,
            ..
        })
    ));

    // Index of the start (or finish) event of one capability's stage
    let position = |started: bool, tag: CapabilityTag| {
        events
            .iter()
            .position(|e| match e {
                WorkflowEvent::StageStarted { capability, .. } => started && *capability == tag,
                WorkflowEvent::StageFinished { capability, .. } => !started && *capability == tag,
                _ => false,
            })
            .unwrap()
    };
    let planning_done = position(false, CapabilityTag::PLANNING);
    let editing_started = position(true, CapabilityTag::EDITING);
    let editing_done = position(false, CapabilityTag::EDITING);
    let reviewing_started = position(true, CapabilityTag::REVIEWING);

    assert!(planning_done < editing_started);
    assert!(editing_done < reviewing_started);
}

#[tokio::test]
async fn test_empty_description_is_vacuous_success() {
    let engine = dry_run_engine();
    let req = request("");

    let decision = engine.analyze(&req);
    assert!(decision.is_empty());
    assert_eq!(decision.strategy, ExecutionStrategy::Sequential);

    let result = assert_ok!(engine.process_request(req).await);
    assert!(result.success);
    assert!(result.stages.is_empty());
    assert!(result.artifacts.is_empty());
    assert!(engine.active_workflows().is_empty());
}
