mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{log_entries, new_call_log, CallLog, ScriptedResource, TestProvider};

use strato::clock::{SequentialIdGenerator, StaticClock};
use strato::deploy::drift::DriftChecker;
use strato::deploy::orchestrator::{
    ChangeSet, DeploymentOrchestrator, DestroyItem, DestroySet, StagedResource,
};
use strato::deploy::{CancelHandle, DeployConfig, DeployError, DeployEvent};
use strato::provider::{Provider, ProviderError};
use strato::schema::mapping::MappingNode;
use strato::staging::changes::{AppliedResourceInfo, ResourceChanges};
use strato::state::models::{InstanceState, PreciseResourceStatus, ResourceState};
use strato::state::StateContainer;

const RESOURCE_TYPE: &str = "test/compute/function";

fn orchestrator_with(
    provider: TestProvider,
    config: DeployConfig,
) -> (DeploymentOrchestrator, Arc<StateContainer>) {
    let state = Arc::new(StateContainer::new(Arc::new(StaticClock::default())));
    let providers: HashMap<String, Arc<dyn Provider>> =
        HashMap::from([("test".to_string(), Arc::new(provider) as Arc<dyn Provider>)]);
    let orchestrator = DeploymentOrchestrator::new(
        providers,
        Arc::clone(&state),
        Arc::new(StaticClock::default()),
        Arc::new(SequentialIdGenerator::new("gen")),
        config,
    );
    (orchestrator, state)
}

fn fast_config() -> DeployConfig {
    DeployConfig {
        stabilisation_base_delay_ms: 1,
        ..DeployConfig::default()
    }
}

fn staged(name: &str, deps: &[&str]) -> StagedResource {
    StagedResource {
        resource_name: name.to_string(),
        resource_type: RESOURCE_TYPE.to_string(),
        desired_spec: MappingNode::fields(vec![(
            "name".to_string(),
            MappingNode::string(name),
        )]),
        changes: ResourceChanges {
            applied_resource_info: AppliedResourceInfo {
                resource_id: None,
                resource_name: name.to_string(),
                resource_type: RESOURCE_TYPE.to_string(),
                instance_id: "inst-1".to_string(),
            },
            ..ResourceChanges::default()
        },
        depends_on_resources: deps.iter().map(|d| d.to_string()).collect(),
        depends_on_children: Vec::new(),
    }
}

fn change_set(resources: Vec<StagedResource>) -> ChangeSet {
    ChangeSet {
        instance_id: "inst-1".to_string(),
        resources,
    }
}

fn first_index(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("expected \"{}\" in call log {:?}", entry, log))
}

#[tokio::test]
async fn deploy_retries_transient_failures_then_succeeds() {
    let log = new_call_log();
    let plugin =
        ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log)).with_retryable_deploy_failures(2);
    let provider = TestProvider::new("test").with_resource(RESOURCE_TYPE, Arc::new(plugin));
    let (orchestrator, state) = orchestrator_with(provider, fast_config());

    let result = orchestrator
        .deploy(change_set(vec![staged("orders", &[])]), CancelHandle::new(), None)
        .await
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(
        result.resource_statuses.get("orders"),
        Some(&PreciseResourceStatus::Stabilised)
    );
    // Two transient failures, then success: three calls in total.
    assert_eq!(
        result.current_deploy_attempts.get("arn:test:orders"),
        Some(&3)
    );
    assert_eq!(
        log_entries(&log)
            .iter()
            .filter(|e| e.as_str() == "deploy:orders")
            .count(),
        3
    );

    // The provider-synthesised id and computed fields are persisted.
    let persisted = state
        .resources()
        .get_by_name("inst-1", "orders")
        .unwrap();
    assert_eq!(persisted.resource_id, "arn:test:orders");
    assert_eq!(persisted.precise_status, PreciseResourceStatus::Stabilised);
    let spec = persisted.spec_data.unwrap();
    let id_field = spec
        .get_field("id")
        .and_then(|n| n.as_scalar())
        .and_then(|s| s.as_str().map(String::from));
    assert_eq!(id_field, Some("arn:test:orders".to_string()));
}

#[tokio::test]
async fn stabilisation_probe_retries_do_not_consume_poll_budget() {
    let log = new_call_log();
    let plugin = ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log)).with_stabilise_script(vec![
        Err(ProviderError::retryable("settling")),
        Err(ProviderError::retryable("settling")),
    ]);
    let stabilise_calls = Arc::new(plugin);
    let provider =
        TestProvider::new("test").with_resource(RESOURCE_TYPE, stabilise_calls.clone());
    let (orchestrator, _state) = orchestrator_with(provider, fast_config());

    let result = orchestrator
        .deploy(change_set(vec![staged("orders", &[])]), CancelHandle::new(), None)
        .await
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(
        result.resource_statuses.get("orders"),
        Some(&PreciseResourceStatus::Stabilised)
    );
    // Two retryable probe failures then stabilised: exactly three calls.
    assert_eq!(
        stabilise_calls
            .stabilise_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        3
    );
}

#[tokio::test]
async fn stabilisation_poll_cap_surfaces_timeout() {
    let log = new_call_log();
    let plugin = ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log))
        .with_stabilise_script(vec![Ok(false), Ok(false), Ok(false)]);
    let provider = TestProvider::new("test").with_resource(RESOURCE_TYPE, Arc::new(plugin));
    let config = DeployConfig {
        max_stabilisation_polls: 2,
        stabilisation_base_delay_ms: 1,
        ..DeployConfig::default()
    };
    let (orchestrator, state) = orchestrator_with(provider, config);

    let result = orchestrator
        .deploy(change_set(vec![staged("orders", &[])]), CancelHandle::new(), None)
        .await
        .unwrap();

    assert_eq!(result.errors.len(), 1);
    assert!(matches!(
        result.errors[0],
        DeployError::StabilisationTimeout { polls: 2, .. }
    ));
    let persisted = state.resources().get_by_name("inst-1", "orders").unwrap();
    assert_eq!(
        persisted.precise_status,
        PreciseResourceStatus::StabiliseFailed
    );
}

#[tokio::test]
async fn dependents_wait_for_their_dependencies() {
    let log = new_call_log();
    let plugin = ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log))
        .with_deploy_delay(Duration::from_millis(30));
    let provider = TestProvider::new("test").with_resource(RESOURCE_TYPE, Arc::new(plugin));
    let (orchestrator, _state) = orchestrator_with(provider, fast_config());

    let result = orchestrator
        .deploy(
            change_set(vec![
                staged("networking", &[]),
                staged("cluster", &["networking"]),
                staged("service", &["cluster"]),
            ]),
            CancelHandle::new(),
            None,
        )
        .await
        .unwrap();

    assert!(result.succeeded());
    let entries = log_entries(&log);
    let networking = first_index(&entries, "deploy:networking");
    let cluster = first_index(&entries, "deploy:cluster");
    let service = first_index(&entries, "deploy:service");
    assert!(networking < cluster);
    assert!(cluster < service);
}

#[tokio::test]
async fn independent_branches_run_concurrently() {
    let log = new_call_log();
    let plugin = ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log))
        .with_deploy_delay(Duration::from_millis(100));
    let provider = TestProvider::new("test").with_resource(RESOURCE_TYPE, Arc::new(plugin));
    let (orchestrator, _state) = orchestrator_with(provider, fast_config());

    let started = Instant::now();
    let result = orchestrator
        .deploy(
            change_set(vec![staged("queue", &[]), staged("topic", &[])]),
            CancelHandle::new(),
            None,
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(result.succeeded());
    // Serial execution would take >= 200ms.
    assert!(
        elapsed < Duration::from_millis(190),
        "expected concurrent execution, took {:?}",
        elapsed
    );
}

#[tokio::test]
async fn must_recreate_issues_destroy_then_create() {
    let log = new_call_log();
    let plugin = ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log));
    let provider = TestProvider::new("test").with_resource(RESOURCE_TYPE, Arc::new(plugin));
    let (orchestrator, state) = orchestrator_with(provider, fast_config());

    // Seed the prior deployment.
    state
        .instances()
        .save(InstanceState::new("inst-1"))
        .unwrap();
    state
        .resources()
        .save(
            "inst-1",
            ResourceState {
                resource_id: "arn:old:orders".to_string(),
                name: "orders".to_string(),
                resource_type: RESOURCE_TYPE.to_string(),
                instance_id: "inst-1".to_string(),
                ..ResourceState::default()
            },
        )
        .unwrap();

    let mut resource = staged("orders", &[]);
    resource.changes.applied_resource_info.resource_id = Some("arn:old:orders".to_string());
    resource.changes.must_recreate = true;

    let result = orchestrator
        .deploy(change_set(vec![resource]), CancelHandle::new(), None)
        .await
        .unwrap();

    assert!(result.succeeded());
    let entries = log_entries(&log);
    let destroy = first_index(&entries, "destroy:orders");
    let deploy = first_index(&entries, "deploy:orders");
    assert!(destroy < deploy, "destroy must precede re-create: {:?}", entries);
}

#[tokio::test]
async fn terminal_failure_skips_dependents_and_continues_independent_branches() {
    let log = new_call_log();
    let failing = ScriptedResource::new("test/db/cluster", Arc::clone(&log))
        .with_terminal_deploy_failure("subnet exhausted");
    let healthy = ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log));
    let provider = TestProvider::new("test")
        .with_resource("test/db/cluster", Arc::new(failing))
        .with_resource(RESOURCE_TYPE, Arc::new(healthy));
    let (orchestrator, _state) = orchestrator_with(provider, fast_config());

    let mut database = staged("database", &[]);
    database.resource_type = "test/db/cluster".to_string();
    let api = staged("api", &["database"]);
    let monitoring = staged("monitoring", &[]);

    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel::<DeployEvent>(32);
    let result = orchestrator
        .deploy(
            change_set(vec![database, api, monitoring]),
            CancelHandle::new(),
            Some(events_tx),
        )
        .await
        .unwrap();

    // The failed branch surfaces an error, the independent branch finishes.
    assert_eq!(result.errors.len(), 1);
    assert!(matches!(
        result.errors[0],
        DeployError::TerminalDeploy { .. }
    ));
    assert_eq!(
        result.resource_statuses.get("database"),
        Some(&PreciseResourceStatus::DeployFailed)
    );
    assert_eq!(
        result.resource_statuses.get("monitoring"),
        Some(&PreciseResourceStatus::Stabilised)
    );

    // The dependent never reached the provider.
    let entries = log_entries(&log);
    assert!(!entries.contains(&"deploy:api".to_string()));

    // A skip event was emitted for the dependent.
    let mut saw_api_skip = false;
    while let Ok(event) = events_rx.try_recv() {
        if let DeployEvent::ResourceSkipped { resource_name, .. } = event {
            if resource_name == "api" {
                saw_api_skip = true;
            }
        }
    }
    assert!(saw_api_skip);

    let aggregate = result.aggregate_error(3).unwrap();
    assert!(matches!(
        aggregate,
        DeployError::Aggregate { failed: 1, total: 3, .. }
    ));
}

#[tokio::test]
async fn stop_on_first_error_prevents_queued_work() {
    let log = new_call_log();
    let failing = ScriptedResource::new("test/db/cluster", Arc::clone(&log))
        .with_terminal_deploy_failure("boom");
    let healthy = ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log));
    let provider = TestProvider::new("test")
        .with_resource("test/db/cluster", Arc::new(failing))
        .with_resource(RESOURCE_TYPE, Arc::new(healthy));
    let config = DeployConfig {
        max_concurrency: 1,
        stop_on_first_error: true,
        stabilisation_base_delay_ms: 1,
        ..DeployConfig::default()
    };
    let (orchestrator, _state) = orchestrator_with(provider, config);

    let mut database = staged("database", &[]);
    database.resource_type = "test/db/cluster".to_string();
    let monitoring = staged("monitoring", &[]);

    let result = orchestrator
        .deploy(
            change_set(vec![database, monitoring]),
            CancelHandle::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.errors.len(), 1);
    // With a single worker the queued resource observes the cancellation
    // before it issues any provider call.
    let entries = log_entries(&log);
    assert!(!entries.contains(&"deploy:monitoring".to_string()));
}

#[tokio::test]
async fn cancellation_stops_new_operations_but_persists_progress() {
    let log = new_call_log();
    let plugin = ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log))
        .with_deploy_delay(Duration::from_millis(80));
    let provider = TestProvider::new("test").with_resource(RESOURCE_TYPE, Arc::new(plugin));
    let (orchestrator, state) = orchestrator_with(provider, fast_config());

    let cancel = CancelHandle::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result = orchestrator
        .deploy(
            change_set(vec![
                staged("networking", &[]),
                staged("cluster", &["networking"]),
            ]),
            cancel,
            None,
        )
        .await
        .unwrap();

    // The in-flight deploy finished and was persisted; the dependent never
    // started.
    let entries = log_entries(&log);
    assert!(entries.contains(&"deploy:networking".to_string()));
    assert!(!entries.contains(&"deploy:cluster".to_string()));
    let networking = state
        .resources()
        .get_by_name("inst-1", "networking")
        .unwrap();
    assert_eq!(networking.resource_id, "arn:test:networking");
    assert_eq!(
        result.resource_statuses.get("cluster"),
        Some(&PreciseResourceStatus::Pending)
    );
}

#[tokio::test]
async fn destroy_runs_in_reverse_dependency_order() {
    let log = new_call_log();
    let plugin = ScriptedResource::new(RESOURCE_TYPE, Arc::clone(&log));
    let provider = TestProvider::new("test").with_resource(RESOURCE_TYPE, Arc::new(plugin));
    let (orchestrator, state) = orchestrator_with(provider, fast_config());

    state
        .instances()
        .save(InstanceState::new("inst-1"))
        .unwrap();
    for (id, name) in [("res-a", "networking"), ("res-b", "cluster")] {
        state
            .resources()
            .save(
                "inst-1",
                ResourceState {
                    resource_id: id.to_string(),
                    name: name.to_string(),
                    resource_type: RESOURCE_TYPE.to_string(),
                    instance_id: "inst-1".to_string(),
                    ..ResourceState::default()
                },
            )
            .unwrap();
    }

    let result = orchestrator
        .destroy(
            DestroySet {
                instance_id: "inst-1".to_string(),
                resources: vec![
                    DestroyItem {
                        resource_name: "networking".to_string(),
                        resource_id: "res-a".to_string(),
                        resource_type: RESOURCE_TYPE.to_string(),
                        depends_on_resources: Vec::new(),
                    },
                    DestroyItem {
                        resource_name: "cluster".to_string(),
                        resource_id: "res-b".to_string(),
                        resource_type: RESOURCE_TYPE.to_string(),
                        depends_on_resources: vec!["networking".to_string()],
                    },
                ],
            },
            CancelHandle::new(),
            None,
        )
        .await
        .unwrap();

    assert!(result.succeeded());
    let entries = log_entries(&log);
    let cluster = first_index(&entries, "destroy:cluster");
    let networking = first_index(&entries, "destroy:networking");
    assert!(cluster < networking, "dependent destroys first: {:?}", entries);

    // Destroyed resources leave the state container.
    assert!(state.resources().get_by_name("inst-1", "cluster").is_err());
    assert!(state.resources().get_by_name("inst-1", "networking").is_err());
}

// ─── Drift ──────────────────────────────────────────────────────────────────

fn seeded_state_for_drift(log: &CallLog, external: MappingNode) -> (DriftChecker, Arc<StateContainer>) {
    let plugin =
        ScriptedResource::new(RESOURCE_TYPE, Arc::clone(log)).with_external_state(external);
    let provider = TestProvider::new("test").with_resource(RESOURCE_TYPE, Arc::new(plugin));
    let state = Arc::new(StateContainer::new(Arc::new(StaticClock::default())));
    let providers: HashMap<String, Arc<dyn Provider>> =
        HashMap::from([("test".to_string(), Arc::new(provider) as Arc<dyn Provider>)]);

    state
        .instances()
        .save(InstanceState::new("inst-1"))
        .unwrap();
    state
        .resources()
        .save(
            "inst-1",
            ResourceState {
                resource_id: "res-1".to_string(),
                name: "orders".to_string(),
                resource_type: RESOURCE_TYPE.to_string(),
                instance_id: "inst-1".to_string(),
                spec_data: Some(Arc::new(MappingNode::fields(vec![
                    ("name".to_string(), MappingNode::string("orders")),
                    ("size".to_string(), MappingNode::string("small")),
                ]))),
                ..ResourceState::default()
            },
        )
        .unwrap();

    let checker = DriftChecker::new(providers, Arc::clone(&state), Arc::new(StaticClock::default()));
    (checker, state)
}

#[tokio::test]
async fn drift_checker_records_divergent_fields() {
    let log = new_call_log();
    let external = MappingNode::fields(vec![
        ("name".to_string(), MappingNode::string("orders")),
        ("size".to_string(), MappingNode::string("large")),
    ]);
    let (checker, state) = seeded_state_for_drift(&log, external);

    let drifted = checker.check_instance("inst-1").await.unwrap();
    assert_eq!(drifted.len(), 1);
    assert_eq!(drifted[0].resource_name, "orders");
    assert_eq!(drifted[0].drifted_fields, vec!["spec.size".to_string()]);
    assert_eq!(drifted[0].timestamp, Some(1_694_097_824));

    let resource = state.resources().get("inst-1", "res-1").unwrap();
    assert!(resource.drifted);
    assert_eq!(
        resource.last_drift_detected_timestamp,
        Some(1_694_097_824)
    );
}

#[tokio::test]
async fn drift_clears_when_external_state_matches() {
    let log = new_call_log();
    let external = MappingNode::fields(vec![
        ("name".to_string(), MappingNode::string("orders")),
        ("size".to_string(), MappingNode::string("small")),
    ]);
    let (checker, state) = seeded_state_for_drift(&log, external);

    // Pre-existing drift entry from an earlier pass.
    state
        .resources()
        .save_drift(
            "inst-1",
            strato::state::models::ResourceDriftState {
                resource_id: "res-1".to_string(),
                resource_name: "orders".to_string(),
                drifted_fields: vec!["spec.size".to_string()],
                timestamp: None,
            },
        )
        .unwrap();

    let drifted = checker.check_instance("inst-1").await.unwrap();
    assert!(drifted.is_empty());
    let resource = state.resources().get("inst-1", "res-1").unwrap();
    assert!(!resource.drifted);
    assert!(state
        .resources()
        .get_drift("inst-1", "res-1")
        .unwrap()
        .is_none());
}
