//! `.orchestrator.toml` driving the engine

use std::io::Write;

use agent_orchestrator::{
    CapabilityRegistry, CapabilityTag, DependencyFailurePolicy, DependencyResolver,
    ExecutionStrategy, Orchestrator, OrchestratorConfig, OrchestratorError, StageStatus,
};
use tokio_test::assert_ok;

use super::support::{request, scripted_registry, FixedPolicy, Script};

fn load(dir: &tempfile::TempDir) -> OrchestratorConfig {
    OrchestratorConfig::load_from_path(&dir.path().join(".orchestrator.toml")).unwrap()
}

fn write_config(content: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mut file = std::fs::File::create(dir.path().join(".orchestrator.toml")).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    dir
}

#[test]
fn test_dependency_overrides_change_waves() {
    let dir = write_config(
        r#"
        [dependencies]
        planning = []
        deploy = ["testing", "reviewing"]
        "#,
    );

    let config = load(&dir);
    assert!(config.validate().is_ok());

    let resolver = DependencyResolver::new(config.dependency_table());
    let deploy = CapabilityTag::new("deploy");
    let waves = resolver
        .waves(&[
            deploy.clone(),
            CapabilityTag::FILE_DISCOVERY,
            CapabilityTag::PLANNING,
            CapabilityTag::EDITING,
            CapabilityTag::REVIEWING,
            CapabilityTag::TESTING,
        ])
        .unwrap();

    assert_eq!(
        waves,
        vec![
            vec![CapabilityTag::FILE_DISCOVERY, CapabilityTag::PLANNING],
            vec![CapabilityTag::EDITING],
            vec![CapabilityTag::REVIEWING, CapabilityTag::TESTING],
            vec![deploy],
        ]
    );
}

#[test]
fn test_cyclic_overrides_fail_validation() {
    let dir = write_config("[dependencies]\nfile-discovery = [\"reviewing\"]\n");
    let config = load(&dir);

    assert!(matches!(
        config.validate(),
        Err(OrchestratorError::CircularDependency { .. })
    ));
}

#[tokio::test]
async fn test_continue_policy_from_config() {
    let dir = write_config(
        r#"
        [engine]
        max_concurrent_workers = 1
        dependency_failure = "continue"
        "#,
    );
    let config = load(&dir);
    assert_eq!(config.engine.dependency_failure, DependencyFailurePolicy::Continue);

    let (registry, counters) = scripted_registry(&[(CapabilityTag::EDITING, Script::Fail)]);
    let engine = Orchestrator::new(config)
        .with_capabilities(registry)
        .with_policy(Box::new(FixedPolicy(
            vec![CapabilityTag::EDITING, CapabilityTag::REVIEWING, CapabilityTag::TESTING],
            ExecutionStrategy::Dag,
        )));

    let result = assert_ok!(engine.process_request(request("anything")).await);

    assert_eq!(result.stages[0].status, StageStatus::Error);
    assert!(result.stages[1..].iter().all(|s| s.status == StageStatus::Completed));
    assert_eq!(counters.executed(), 3);
    assert_eq!(counters.peak(), 1);
}

#[test]
fn test_dry_run_covers_default_table() {
    let config = OrchestratorConfig::default();
    let registry = CapabilityRegistry::new().with_dry_run();

    for tag in config.dependency_table().tags() {
        assert!(registry.contains(tag), "no dry-run worker for {tag}");
    }
}
