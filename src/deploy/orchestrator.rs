use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::graph::{build_deployment_graph, build_destruction_graph};
use super::retry::with_retry;
use super::walker::{DagWalker, NodeExecutor, NodeOutcome, NodeResult, NodeStatus};
use super::{CancelHandle, DeployConfig, DeployError, DeployEvent};
use crate::clock::{Clock, IdGenerator};
use crate::errors::BlueprintError;
use crate::provider::{
    DeployResourceInput, DestroyResourceInput, HasStabilisedInput, LinkStageInput, Provider,
    ResourcePlugin, RetryPolicy,
};
use crate::schema::mapping::{MappingNode, PathItem};
use crate::staging::changes::ResourceChanges;
use crate::state::models::{
    InstanceState, InstanceStatus, LinkState, LinkStatus, PreciseResourceStatus, ResourceDurations,
    ResourceState,
};
use crate::state::StateContainer;

// ─── Change Sets ────────────────────────────────────────────────────────────

/// One resource of a staged change set, ready for deployment.
#[derive(Debug, Clone)]
pub struct StagedResource {
    pub resource_name: String,
    pub resource_type: String,
    /// The fully resolved spec to deploy.
    pub desired_spec: MappingNode,
    pub changes: ResourceChanges,
    pub depends_on_resources: Vec<String>,
    pub depends_on_children: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub instance_id: String,
    pub resources: Vec<StagedResource>,
}

/// One resource scheduled for destruction.
#[derive(Debug, Clone)]
pub struct DestroyItem {
    pub resource_name: String,
    pub resource_id: String,
    pub resource_type: String,
    pub depends_on_resources: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DestroySet {
    pub instance_id: String,
    pub resources: Vec<DestroyItem>,
}

// ─── Results ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DeploymentResult {
    pub instance_id: String,
    pub status: Option<InstanceStatus>,
    /// Final precise status per resource name.
    pub resource_statuses: HashMap<String, PreciseResourceStatus>,
    /// Provider call attempts for the main operation, keyed by resource id
    /// once known, resource name otherwise.
    pub current_deploy_attempts: HashMap<String, u32>,
    pub errors: Vec<DeployError>,
}

impl DeploymentResult {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    /// A single aggregate error covering every failed branch, when any
    /// branch failed.
    pub fn aggregate_error(&self, total: usize) -> Option<DeployError> {
        if self.errors.is_empty() {
            return None;
        }
        Some(DeployError::Aggregate {
            failed: self.errors.len(),
            total,
            errors: self.errors.clone(),
        })
    }
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

/// Executes a staged change set against provider backends: concurrent
/// workers honouring dependency order, retry policies, stabilisation
/// polling, and cooperative cancellation. All state flows through the state
/// container.
pub struct DeploymentOrchestrator {
    providers: HashMap<String, Arc<dyn Provider>>,
    state: Arc<StateContainer>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: DeployConfig,
}

struct DeployCtx {
    instance_id: String,
    resources: HashMap<String, StagedResource>,
    providers: HashMap<String, Arc<dyn Provider>>,
    state: Arc<StateContainer>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: DeployConfig,
    cancel: CancelHandle,
    attempts: DashMap<String, u32>,
}

impl DeploymentOrchestrator {
    pub fn new(
        providers: HashMap<String, Arc<dyn Provider>>,
        state: Arc<StateContainer>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: DeployConfig,
    ) -> Self {
        Self {
            providers,
            state,
            clock,
            ids,
            config,
        }
    }

    /// Deploy a change set. Independent branches continue after a terminal
    /// failure unless `stop_on_first_error` is set; failures are collected
    /// into the result.
    pub async fn deploy(
        &self,
        change_set: ChangeSet,
        cancel: CancelHandle,
        events: Option<mpsc::Sender<DeployEvent>>,
    ) -> Result<DeploymentResult, BlueprintError> {
        let instance_id = change_set.instance_id.clone();
        self.ensure_instance(&instance_id, InstanceStatus::Deploying);

        let items: Vec<(String, Vec<String>)> = change_set
            .resources
            .iter()
            .map(|r| (r.resource_name.clone(), r.depends_on_resources.clone()))
            .collect();
        let graph = build_deployment_graph(&items)?;
        let total = items.len();

        let ctx = Arc::new(DeployCtx {
            instance_id: instance_id.clone(),
            resources: change_set
                .resources
                .into_iter()
                .map(|r| (r.resource_name.clone(), r))
                .collect(),
            providers: self.providers.clone(),
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
            config: self.config.clone(),
            cancel: cancel.clone(),
            attempts: DashMap::new(),
        });

        let executor_ctx = Arc::clone(&ctx);
        let executor: Arc<NodeExecutor> = Arc::new(Box::new(move |name: String| {
            let ctx = Arc::clone(&executor_ctx);
            Box::pin(async move { deploy_one(ctx, name).await }) as BoxFuture<'static, _>
        }));

        let walker = DagWalker::new(self.config.max_concurrency, self.config.stop_on_first_error);
        let results = walker.walk(&graph, executor, cancel, events).await;

        let result = self.assemble_result(&instance_id, results, &ctx.attempts, false);
        info!(
            instance_id = %instance_id,
            status = ?result.status,
            failed = result.errors.len(),
            total = total,
            "deployment finished"
        );
        Ok(result)
    }

    /// Destroy resources in reverse dependency order.
    pub async fn destroy(
        &self,
        destroy_set: DestroySet,
        cancel: CancelHandle,
        events: Option<mpsc::Sender<DeployEvent>>,
    ) -> Result<DeploymentResult, BlueprintError> {
        let instance_id = destroy_set.instance_id.clone();
        self.ensure_instance(&instance_id, InstanceStatus::Destroying);

        let items: Vec<(String, Vec<String>)> = destroy_set
            .resources
            .iter()
            .map(|r| (r.resource_name.clone(), r.depends_on_resources.clone()))
            .collect();
        let graph = build_destruction_graph(&items)?;

        let by_name: HashMap<String, DestroyItem> = destroy_set
            .resources
            .into_iter()
            .map(|r| (r.resource_name.clone(), r))
            .collect();
        let providers = self.providers.clone();
        let state = Arc::clone(&self.state);
        let attempts: Arc<DashMap<String, u32>> = Arc::new(DashMap::new());

        let exec_attempts = Arc::clone(&attempts);
        let exec_instance = instance_id.clone();
        let executor: Arc<NodeExecutor> = Arc::new(Box::new(move |name: String| {
            let providers = providers.clone();
            let state = Arc::clone(&state);
            let attempts = Arc::clone(&exec_attempts);
            let instance_id = exec_instance.clone();
            let item = by_name.get(&name).cloned();
            Box::pin(async move {
                destroy_one(providers, state, attempts, instance_id, name, item).await
            }) as BoxFuture<'static, _>
        }));

        let walker = DagWalker::new(self.config.max_concurrency, self.config.stop_on_first_error);
        let results = walker.walk(&graph, executor, cancel, events).await;

        let result = self.assemble_result(&instance_id, results, attempts.as_ref(), true);
        Ok(result)
    }

    fn ensure_instance(&self, instance_id: &str, status: InstanceStatus) {
        if self.state.instances().get(instance_id).is_err() {
            let _ = self.state.instances().save(InstanceState::new(instance_id));
        }
        let _ = self
            .state
            .instances()
            .update_status(instance_id, status, None);
    }

    fn assemble_result(
        &self,
        instance_id: &str,
        results: Vec<NodeResult>,
        attempts: &DashMap<String, u32>,
        is_destroy: bool,
    ) -> DeploymentResult {
        let mut result = DeploymentResult {
            instance_id: instance_id.to_string(),
            ..DeploymentResult::default()
        };

        for node in results {
            match node.status {
                NodeStatus::Succeeded => {
                    if let Some(outcome) = node.outcome {
                        result
                            .resource_statuses
                            .insert(node.name.clone(), outcome.precise_status);
                    }
                }
                NodeStatus::Failed => {
                    let failed_status = if is_destroy {
                        PreciseResourceStatus::DestroyFailed
                    } else {
                        PreciseResourceStatus::DeployFailed
                    };
                    result
                        .resource_statuses
                        .insert(node.name.clone(), failed_status);
                    if let Some(err) = node.error {
                        result.errors.push(err);
                    }
                }
                NodeStatus::Skipped => {
                    result
                        .resource_statuses
                        .insert(node.name.clone(), PreciseResourceStatus::Pending);
                }
                _ => {}
            }
        }

        for entry in attempts.iter() {
            result
                .current_deploy_attempts
                .insert(entry.key().clone(), *entry.value());
        }

        let instance_status = if result.errors.is_empty() {
            if is_destroy {
                InstanceStatus::Destroyed
            } else {
                InstanceStatus::Deployed
            }
        } else if is_destroy {
            InstanceStatus::DestroyFailed
        } else {
            InstanceStatus::DeployFailed
        };
        let _ = self
            .state
            .instances()
            .update_status(instance_id, instance_status, None);
        result.status = Some(instance_status);
        result
    }
}

// ─── Deploy Worker ──────────────────────────────────────────────────────────

fn provider_for(
    providers: &HashMap<String, Arc<dyn Provider>>,
    resource_type: &str,
    resource_name: &str,
) -> Result<Arc<dyn Provider>, DeployError> {
    let namespace = resource_type.split('/').next().unwrap_or(resource_type);
    providers.get(namespace).cloned().ok_or_else(|| {
        DeployError::TerminalDeploy {
            resource: resource_name.to_string(),
            message: format!("no provider registered for namespace \"{}\"", namespace),
        }
    })
}

fn plugin_for(
    provider: &Arc<dyn Provider>,
    resource_type: &str,
    resource_name: &str,
) -> Result<Arc<dyn ResourcePlugin>, DeployError> {
    provider
        .resource(resource_type)
        .ok_or_else(|| DeployError::TerminalDeploy {
            resource: resource_name.to_string(),
            message: format!(
                "provider does not implement resource type \"{}\"",
                resource_type
            ),
        })
}

async fn deploy_one(ctx: Arc<DeployCtx>, name: String) -> Result<NodeOutcome, DeployError> {
    let staged = ctx
        .resources
        .get(&name)
        .cloned()
        .ok_or_else(|| DeployError::TerminalDeploy {
            resource: name.clone(),
            message: "resource is not part of the change set".to_string(),
        })?;

    check_child_dependencies(&ctx, &staged)?;

    let provider = provider_for(&ctx.providers, &staged.resource_type, &name)?;
    let plugin = plugin_for(&provider, &staged.resource_type, &name)?;
    let policy = provider.retry_policy();

    let started = Instant::now();
    let mut existing_id = staged.changes.applied_resource_info.resource_id.clone();

    save_resource_status(
        &ctx,
        &staged,
        existing_id.clone(),
        PreciseResourceStatus::Deploying,
        Vec::new(),
        None,
    );

    // A changed must-recreate field forces destroy-then-create.
    if staged.changes.must_recreate {
        if let Some(resource_id) = existing_id.clone() {
            debug!(resource = %name, "destroying before re-create");
            let destroy_input = DestroyResourceInput {
                instance_id: ctx.instance_id.clone(),
                resource_id: resource_id.clone(),
                resource_name: name.clone(),
            };
            let (destroyed, _) = with_retry(&policy, "destroy", || {
                plugin.destroy(destroy_input.clone())
            })
            .await;
            if let Err(err) = destroyed {
                save_resource_status(
                    &ctx,
                    &staged,
                    Some(resource_id),
                    PreciseResourceStatus::DestroyFailed,
                    err.failure_reasons(),
                    None,
                );
                return Err(DeployError::TerminalDestroy {
                    resource: name,
                    message: err.to_string(),
                });
            }
            existing_id = None;
        }
    }

    // Deploy under the provider's retry policy.
    let deploy_input = DeployResourceInput {
        instance_id: ctx.instance_id.clone(),
        resource_id: existing_id.clone(),
        resource_name: name.clone(),
        spec: staged.desired_spec.clone(),
        changes: staged.changes.clone(),
    };
    let (deployed, attempts) =
        with_retry(&policy, "deploy", || plugin.deploy(deploy_input.clone())).await;

    let output = match deployed {
        Ok(output) => output,
        Err(err) => {
            ctx.attempts.insert(
                existing_id.clone().unwrap_or_else(|| name.clone()),
                attempts,
            );
            save_resource_status(
                &ctx,
                &staged,
                existing_id,
                PreciseResourceStatus::DeployFailed,
                err.failure_reasons(),
                None,
            );
            return Err(DeployError::TerminalDeploy {
                resource: name,
                message: err.to_string(),
            });
        }
    };

    let resource_id = output.resource_id.clone();
    ctx.attempts.insert(resource_id.clone(), attempts);

    // Merge computed field values into the persisted spec.
    let mut final_spec = staged.desired_spec.clone();
    for (path, value) in &output.computed_field_values {
        final_spec.set_path(&parse_field_path(path), value.clone());
    }

    let durations = ResourceDurations {
        config_complete_ms: None,
        total_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
        attempt_durations_ms: Vec::new(),
    };
    save_deployed_resource(
        &ctx,
        &staged,
        &resource_id,
        Arc::new(final_spec),
        PreciseResourceStatus::Deployed,
        Some(durations),
    );

    // Stabilisation: poll until settled, capped, with backoff. Retryable
    // probe errors consume the retry budget, not the poll cap.
    let final_status = stabilise(&ctx, &plugin, &policy, &resource_id, &name).await?;

    // Establish any new outbound links once this end is settled.
    if !staged.changes.new_outbound_links.is_empty() {
        establish_links(&ctx, &staged, &provider, &name, &policy).await;
    }

    Ok(NodeOutcome {
        resource_id: Some(resource_id),
        precise_status: final_status,
        attempts,
    })
}

fn check_child_dependencies(ctx: &DeployCtx, staged: &StagedResource) -> Result<(), DeployError> {
    if staged.depends_on_children.is_empty() {
        return Ok(());
    }
    let parent = ctx.state.instances().get(&ctx.instance_id).map_err(|_| {
        DeployError::TerminalDeploy {
            resource: staged.resource_name.clone(),
            message: "parent instance is missing from state".to_string(),
        }
    })?;
    for child_name in &staged.depends_on_children {
        let deployed = parent
            .child_blueprints
            .get(child_name)
            .map(|child| child.status == Some(InstanceStatus::Deployed))
            .unwrap_or(false);
        if !deployed {
            return Err(DeployError::DependencySkipped {
                resource: staged.resource_name.clone(),
                dependency: format!("children.{}", child_name),
                reason: "child blueprint has not reached a deployed state".to_string(),
            });
        }
    }
    Ok(())
}

async fn stabilise(
    ctx: &DeployCtx,
    plugin: &Arc<dyn ResourcePlugin>,
    policy: &RetryPolicy,
    resource_id: &str,
    name: &str,
) -> Result<PreciseResourceStatus, DeployError> {
    update_precise_status(ctx, resource_id, PreciseResourceStatus::Stabilising);

    let mut polls = 0u32;
    loop {
        // Cooperative cancellation between provider calls.
        if ctx.cancel.is_cancelled() {
            return Ok(PreciseResourceStatus::Stabilising);
        }

        let probe_input = HasStabilisedInput {
            instance_id: ctx.instance_id.clone(),
            resource_id: resource_id.to_string(),
            resource_name: name.to_string(),
        };
        let (probe, _) = with_retry(policy, "has_stabilised", || {
            plugin.has_stabilised(probe_input.clone())
        })
        .await;

        match probe {
            Ok(true) => {
                update_precise_status(ctx, resource_id, PreciseResourceStatus::Stabilised);
                return Ok(PreciseResourceStatus::Stabilised);
            }
            Ok(false) => {
                polls += 1;
                if polls >= ctx.config.max_stabilisation_polls {
                    update_precise_status(ctx, resource_id, PreciseResourceStatus::StabiliseFailed);
                    return Err(DeployError::StabilisationTimeout {
                        resource: name.to_string(),
                        polls,
                    });
                }
                tokio::time::sleep(stabilisation_delay(&ctx.config, polls)).await;
            }
            Err(err) => {
                update_precise_status(ctx, resource_id, PreciseResourceStatus::StabiliseFailed);
                return Err(DeployError::TerminalDeploy {
                    resource: name.to_string(),
                    message: format!("stabilisation probe failed: {}", err),
                });
            }
        }
    }
}

fn stabilisation_delay(config: &DeployConfig, polls: u32) -> std::time::Duration {
    let exp = polls.saturating_sub(1).min(8);
    std::time::Duration::from_millis(config.stabilisation_base_delay_ms.saturating_mul(1 << exp))
}

/// Establish new outbound links: deploy the plugin's intermediary
/// resources, run the stage operation, then tear the intermediaries down.
async fn establish_links(
    ctx: &DeployCtx,
    staged: &StagedResource,
    provider: &Arc<dyn Provider>,
    name: &str,
    policy: &RetryPolicy,
) {
    for link in &staged.changes.new_outbound_links {
        let Some(target_name) = link.link_name.split("::").nth(1) else {
            warn!(link = %link.link_name, "malformed link name, skipping");
            continue;
        };
        let target_type = ctx
            .resources
            .get(target_name)
            .map(|r| r.resource_type.clone())
            .or_else(|| {
                ctx.state
                    .resources()
                    .get_by_name(&ctx.instance_id, target_name)
                    .ok()
                    .map(|r| r.resource_type)
            });
        let Some(target_type) = target_type else {
            warn!(link = %link.link_name, "link target is unknown, skipping");
            continue;
        };
        let Some(link_plugin) = provider.link(&staged.resource_type, &target_type) else {
            warn!(
                link = %link.link_name,
                "no link plugin for {} -> {}", staged.resource_type, target_type
            );
            continue;
        };

        let stage_input = LinkStageInput {
            instance_id: ctx.instance_id.clone(),
            link_name: link.link_name.clone(),
            resource_a_name: name.to_string(),
            resource_b_name: target_name.to_string(),
            resource_a_spec: Some(staged.desired_spec.clone()),
            resource_b_spec: ctx
                .resources
                .get(target_name)
                .map(|r| r.desired_spec.clone()),
        };

        // Intermediaries live only for the duration of link establishment.
        let definitions = link_plugin.intermediary_resources(&stage_input);
        let mut intermediary_states = Vec::with_capacity(definitions.len());
        let mut intermediary_failed = false;
        for definition in &definitions {
            let Some(intermediary_plugin) = provider.resource(&definition.resource_type) else {
                warn!(
                    link = %link.link_name,
                    resource_type = %definition.resource_type,
                    "no plugin for intermediary resource type"
                );
                intermediary_failed = true;
                break;
            };
            let deploy_input = DeployResourceInput {
                instance_id: ctx.instance_id.clone(),
                resource_id: None,
                resource_name: definition.name.clone(),
                spec: definition.spec.clone(),
                changes: ResourceChanges::default(),
            };
            let (deployed, _) = with_retry(policy, "deploy_intermediary", || {
                intermediary_plugin.deploy(deploy_input.clone())
            })
            .await;
            match deployed {
                Ok(output) => {
                    intermediary_states.push(ResourceState {
                        resource_id: output.resource_id,
                        name: definition.name.clone(),
                        resource_type: definition.resource_type.clone(),
                        instance_id: ctx.instance_id.clone(),
                        status: PreciseResourceStatus::Deployed.coarse(),
                        precise_status: PreciseResourceStatus::Deployed,
                        spec_data: Some(Arc::new(definition.spec.clone())),
                        last_deployed_timestamp: Some(ctx.clock.now_unix()),
                        ..ResourceState::default()
                    });
                }
                Err(err) => {
                    warn!(link = %link.link_name, error = %err, "intermediary deploy failed");
                    intermediary_failed = true;
                    break;
                }
            }
        }

        let mut link_state = LinkState {
            link_id: ctx.ids.generate(),
            link_name: link.link_name.clone(),
            instance_id: ctx.instance_id.clone(),
            status: LinkStatus::Creating,
            intermediary_resource_states: intermediary_states,
            last_deploy_attempt_timestamp: Some(ctx.clock.now_unix()),
            ..LinkState::default()
        };

        if intermediary_failed {
            link_state.status = LinkStatus::CreateFailed;
            link_state
                .failure_reasons
                .push("failed to materialise intermediary resources".to_string());
            let _ = ctx.state.links().save(&ctx.instance_id, link_state);
            continue;
        }

        let (staged_link, _) =
            with_retry(policy, "link_stage", || link_plugin.stage(stage_input.clone())).await;
        match staged_link {
            Ok(output) => {
                link_state.status = LinkStatus::Created;
                link_state.link_data = Some(output.link_data);
                link_state.last_deployed_timestamp = Some(ctx.clock.now_unix());
            }
            Err(err) => {
                link_state.status = LinkStatus::CreateFailed;
                link_state.failure_reasons.push(err.to_string());
            }
        }

        // Tear intermediaries down now the link is established (or failed).
        for intermediary in &link_state.intermediary_resource_states {
            if let Some(intermediary_plugin) = provider.resource(&intermediary.resource_type) {
                let destroy_input = DestroyResourceInput {
                    instance_id: ctx.instance_id.clone(),
                    resource_id: intermediary.resource_id.clone(),
                    resource_name: intermediary.name.clone(),
                };
                let (result, _) = with_retry(policy, "destroy_intermediary", || {
                    intermediary_plugin.destroy(destroy_input.clone())
                })
                .await;
                if let Err(err) = result {
                    warn!(
                        link = %link_state.link_name,
                        resource = %intermediary.name,
                        error = %err,
                        "intermediary teardown failed"
                    );
                }
            }
        }

        let _ = ctx.state.links().save(&ctx.instance_id, link_state);
    }
}

fn save_resource_status(
    ctx: &DeployCtx,
    staged: &StagedResource,
    resource_id: Option<String>,
    precise_status: PreciseResourceStatus,
    failure_reasons: Vec<String>,
    durations: Option<ResourceDurations>,
) {
    let existing = ctx
        .state
        .resources()
        .get_by_name(&ctx.instance_id, &staged.resource_name)
        .ok();
    let resource_id = resource_id
        .or_else(|| existing.as_ref().map(|r| r.resource_id.clone()))
        .unwrap_or_else(|| format!("pending-{}", staged.resource_name));
    let spec_data = existing.as_ref().and_then(|r| r.spec_data.clone());

    let state = ResourceState {
        resource_id,
        name: staged.resource_name.clone(),
        resource_type: staged.resource_type.clone(),
        template_name: None,
        instance_id: ctx.instance_id.clone(),
        status: precise_status.coarse(),
        precise_status,
        failure_reasons,
        spec_data,
        last_deployed_timestamp: existing.as_ref().and_then(|r| r.last_deployed_timestamp),
        last_deploy_attempt_timestamp: Some(ctx.clock.now_unix()),
        last_drift_detected_timestamp: existing
            .as_ref()
            .and_then(|r| r.last_drift_detected_timestamp),
        drifted: existing.as_ref().map(|r| r.drifted).unwrap_or(false),
        durations: durations.or_else(|| existing.and_then(|r| r.durations)),
    };
    let _ = ctx.state.resources().save(&ctx.instance_id, state);
}

fn save_deployed_resource(
    ctx: &DeployCtx,
    staged: &StagedResource,
    resource_id: &str,
    spec: Arc<MappingNode>,
    precise_status: PreciseResourceStatus,
    durations: Option<ResourceDurations>,
) {
    // The resource may sit in state under a placeholder id, or under the
    // old provider id when it was just re-created.
    if let Ok(existing) = ctx
        .state
        .resources()
        .get_by_name(&ctx.instance_id, &staged.resource_name)
    {
        if existing.resource_id != resource_id {
            let _ = ctx
                .state
                .resources()
                .remove(&ctx.instance_id, &existing.resource_id);
        }
    }

    let state = ResourceState {
        resource_id: resource_id.to_string(),
        name: staged.resource_name.clone(),
        resource_type: staged.resource_type.clone(),
        template_name: None,
        instance_id: ctx.instance_id.clone(),
        status: precise_status.coarse(),
        precise_status,
        failure_reasons: Vec::new(),
        spec_data: Some(spec),
        last_deployed_timestamp: Some(ctx.clock.now_unix()),
        last_deploy_attempt_timestamp: Some(ctx.clock.now_unix()),
        last_drift_detected_timestamp: None,
        drifted: false,
        durations,
    };
    let _ = ctx.state.resources().save(&ctx.instance_id, state);
}

fn update_precise_status(ctx: &DeployCtx, resource_id: &str, precise_status: PreciseResourceStatus) {
    if let Ok(mut resource) = ctx.state.resources().get(&ctx.instance_id, resource_id) {
        resource.precise_status = precise_status;
        resource.status = precise_status.coarse();
        let _ = ctx.state.resources().save(&ctx.instance_id, resource);
    }
}

/// Parse a change-set field path like `spec.ports[0].name` into path items.
/// A leading `spec` segment addresses the spec root and is dropped.
fn parse_field_path(path: &str) -> Vec<PathItem> {
    let mut items = Vec::new();
    for (i, segment) in path.split('.').enumerate() {
        let mut rest = segment;
        let field_end = rest.find('[').unwrap_or(rest.len());
        let field = &rest[..field_end];
        if !field.is_empty() && !(i == 0 && field == "spec") {
            items.push(PathItem::FieldName(field.to_string()));
        }
        rest = &rest[field_end..];
        while let Some(close) = rest.find(']') {
            if let Ok(index) = rest[1..close].parse::<usize>() {
                items.push(PathItem::ArrayIndex(index));
            }
            rest = &rest[close + 1..];
            if !rest.starts_with('[') {
                break;
            }
        }
    }
    items
}

// ─── Destroy Worker ─────────────────────────────────────────────────────────

async fn destroy_one(
    providers: HashMap<String, Arc<dyn Provider>>,
    state: Arc<StateContainer>,
    attempts: Arc<DashMap<String, u32>>,
    instance_id: String,
    name: String,
    item: Option<DestroyItem>,
) -> Result<NodeOutcome, DeployError> {
    let item = item.ok_or_else(|| DeployError::TerminalDestroy {
        resource: name.clone(),
        message: "resource is not part of the destroy set".to_string(),
    })?;

    let provider = provider_for(&providers, &item.resource_type, &name)?;
    let plugin = plugin_for(&provider, &item.resource_type, &name)?;
    let policy = provider.retry_policy();

    if let Ok(mut resource) = state.resources().get(&instance_id, &item.resource_id) {
        resource.precise_status = PreciseResourceStatus::Destroying;
        resource.status = PreciseResourceStatus::Destroying.coarse();
        let _ = state.resources().save(&instance_id, resource);
    }

    let destroy_input = DestroyResourceInput {
        instance_id: instance_id.clone(),
        resource_id: item.resource_id.clone(),
        resource_name: name.clone(),
    };
    let (destroyed, attempt_count) =
        with_retry(&policy, "destroy", || plugin.destroy(destroy_input.clone())).await;
    attempts.insert(item.resource_id.clone(), attempt_count);

    match destroyed {
        Ok(()) => {
            // Remove outbound links owned by this resource, then the
            // resource itself.
            if let Ok(instance) = state.instances().get(&instance_id) {
                let prefix = format!("{}::", name);
                for link_name in instance.links.keys() {
                    if link_name.starts_with(&prefix) {
                        let _ = state.links().remove(&instance_id, link_name);
                    }
                }
            }
            let _ = state.resources().remove(&instance_id, &item.resource_id);
            Ok(NodeOutcome {
                resource_id: Some(item.resource_id),
                precise_status: PreciseResourceStatus::Destroyed,
                attempts: attempt_count,
            })
        }
        Err(err) => {
            if let Ok(mut resource) = state.resources().get(&instance_id, &item.resource_id) {
                resource.precise_status = PreciseResourceStatus::DestroyFailed;
                resource.status = PreciseResourceStatus::DestroyFailed.coarse();
                resource.failure_reasons = err.failure_reasons();
                let _ = state.resources().save(&instance_id, resource);
            }
            Err(DeployError::TerminalDestroy {
                resource: name,
                message: err.to_string(),
            })
        }
    }
}
