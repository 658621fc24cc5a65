use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use petgraph::graph::NodeIndex;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use super::graph::DeploymentGraph;
use super::{CancelHandle, DeployError, DeployEvent};
use crate::state::models::PreciseResourceStatus;

// ─── Node Results ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// What a successful node execution produced.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub resource_id: Option<String>,
    pub precise_status: PreciseResourceStatus,
    /// Provider call attempts issued for the main operation.
    pub attempts: u32,
}

#[derive(Debug)]
pub struct NodeResult {
    pub name: String,
    pub status: NodeStatus,
    pub outcome: Option<NodeOutcome>,
    pub error: Option<DeployError>,
    pub skip_reason: Option<String>,
}

/// Callback executing one node. Receives the resource name.
pub type NodeExecutor =
    Box<dyn Fn(String) -> BoxFuture<'static, Result<NodeOutcome, DeployError>> + Send + Sync>;

enum WalkerMessage {
    NodeCompleted(NodeIndex, NodeResult),
}

// ─── Walker ─────────────────────────────────────────────────────────────────

/// Event-driven DAG walker: executes nodes as their dependencies reach a
/// successful terminal state, bounded by a semaphore-backed worker pool.
pub struct DagWalker {
    max_parallelism: usize,
    stop_on_first_error: bool,
}

impl DagWalker {
    pub fn new(max_parallelism: usize, stop_on_first_error: bool) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
            stop_on_first_error,
        }
    }

    pub async fn walk(
        &self,
        graph: &DeploymentGraph,
        executor: Arc<NodeExecutor>,
        cancel: CancelHandle,
        events: Option<mpsc::Sender<DeployEvent>>,
    ) -> Vec<NodeResult> {
        let node_count = graph.node_count();
        if node_count == 0 {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let statuses: Arc<DashMap<NodeIndex, NodeStatus>> = Arc::new(DashMap::new());
        let (tx, mut rx) = mpsc::channel::<WalkerMessage>(node_count);

        // Precompute dependency info.
        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut dependencies: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();

        for idx in graph.node_indices() {
            in_degree.insert(idx, 0);
            dependents.insert(idx, Vec::new());
            dependencies.insert(idx, Vec::new());
            statuses.insert(idx, NodeStatus::Pending);
        }
        for edge in graph.edge_indices() {
            if let Some((from, to)) = graph.edge_endpoints(edge) {
                *in_degree.entry(to).or_insert(0) += 1;
                dependents.entry(from).or_default().push(to);
                dependencies.entry(to).or_default().push(from);
            }
        }

        // Ready set in node insertion order for deterministic emission.
        let ready: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|idx| in_degree.get(idx) == Some(&0))
            .collect();

        for &idx in &ready {
            spawn_node(idx, graph, &executor, &semaphore, &statuses, &tx, &cancel, &events);
        }

        let mut completed = 0usize;
        let mut results: Vec<NodeResult> = Vec::new();

        while completed < node_count {
            let Some(WalkerMessage::NodeCompleted(node_idx, result)) = rx.recv().await else {
                break;
            };

            statuses.insert(node_idx, result.status.clone());
            completed += 1;

            debug!(
                resource = %result.name,
                status = ?result.status,
                progress = format!("{}/{}", completed, node_count),
                "node completed"
            );

            match result.status {
                NodeStatus::Succeeded => {
                    if let Some(sender) = &events {
                        if let Some(outcome) = &result.outcome {
                            let _ = sender
                                .send(DeployEvent::ResourceCompleted {
                                    resource_name: result.name.clone(),
                                    resource_id: outcome.resource_id.clone(),
                                    status: outcome.precise_status,
                                    attempts: outcome.attempts,
                                })
                                .await;
                        }
                    }
                    if let Some(deps) = dependents.get(&node_idx) {
                        for &dependent_idx in deps {
                            let all_deps_met = dependencies
                                .get(&dependent_idx)
                                .map(|dep_list| {
                                    dep_list.iter().all(|dep_idx| {
                                        statuses
                                            .get(dep_idx)
                                            .map(|s| *s == NodeStatus::Succeeded)
                                            .unwrap_or(false)
                                    })
                                })
                                .unwrap_or(true);
                            let still_pending = statuses
                                .get(&dependent_idx)
                                .map(|s| *s == NodeStatus::Pending)
                                .unwrap_or(false);
                            if all_deps_met && still_pending {
                                spawn_node(
                                    dependent_idx,
                                    graph,
                                    &executor,
                                    &semaphore,
                                    &statuses,
                                    &tx,
                                    &cancel,
                                    &events,
                                );
                            }
                        }
                    }
                }
                NodeStatus::Failed | NodeStatus::Skipped => {
                    if let Some(sender) = &events {
                        let event = match result.status {
                            NodeStatus::Failed => DeployEvent::ResourceFailed {
                                resource_name: result.name.clone(),
                                message: result
                                    .error
                                    .as_ref()
                                    .map(|e| e.to_string())
                                    .unwrap_or_default(),
                            },
                            _ => DeployEvent::ResourceSkipped {
                                resource_name: result.name.clone(),
                                reason: result.skip_reason.clone().unwrap_or_default(),
                            },
                        };
                        let _ = sender.send(event).await;
                    }

                    if result.status == NodeStatus::Failed && self.stop_on_first_error {
                        cancel.cancel();
                    }

                    // Cascade-skip everything that transitively depends on a
                    // node that will never succeed; otherwise those nodes
                    // would stay pending forever.
                    let cascade_reason = match result.status {
                        NodeStatus::Failed => format!("dependency \"{}\" failed", result.name),
                        _ => result
                            .skip_reason
                            .clone()
                            .unwrap_or_else(|| format!("dependency \"{}\" was skipped", result.name)),
                    };
                    let skipped = collect_transitive_dependents(node_idx, &dependents);
                    for &skip_idx in &skipped {
                        let is_pending = statuses
                            .get(&skip_idx)
                            .map(|s| *s == NodeStatus::Pending)
                            .unwrap_or(false);
                        if !is_pending {
                            continue;
                        }
                        let skip_name = graph[skip_idx].clone();
                        statuses.insert(skip_idx, NodeStatus::Skipped);
                        completed += 1;
                        if let Some(sender) = &events {
                            let _ = sender
                                .send(DeployEvent::ResourceSkipped {
                                    resource_name: skip_name.clone(),
                                    reason: cascade_reason.clone(),
                                })
                                .await;
                        }
                        results.push(NodeResult {
                            name: skip_name,
                            status: NodeStatus::Skipped,
                            outcome: None,
                            error: None,
                            skip_reason: Some(cascade_reason.clone()),
                        });
                    }
                }
                NodeStatus::Pending | NodeStatus::Running => {}
            }

            results.push(result);
        }

        results
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_node(
    idx: NodeIndex,
    graph: &DeploymentGraph,
    executor: &Arc<NodeExecutor>,
    semaphore: &Arc<Semaphore>,
    statuses: &Arc<DashMap<NodeIndex, NodeStatus>>,
    tx: &mpsc::Sender<WalkerMessage>,
    cancel: &CancelHandle,
    events: &Option<mpsc::Sender<DeployEvent>>,
) {
    let name = graph[idx].clone();
    let executor = Arc::clone(executor);
    let semaphore = Arc::clone(semaphore);
    let cancel = cancel.clone();
    let events = events.clone();
    let tx = tx.clone();

    statuses.insert(idx, NodeStatus::Running);

    tokio::spawn(async move {
        let _permit = semaphore.acquire().await;

        // Observe cancellation right before the provider call would be
        // issued; nothing new starts once it is set.
        if cancel.is_cancelled() {
            let _ = tx
                .send(WalkerMessage::NodeCompleted(
                    idx,
                    NodeResult {
                        name,
                        status: NodeStatus::Skipped,
                        outcome: None,
                        error: None,
                        skip_reason: Some("deployment cancelled".to_string()),
                    },
                ))
                .await;
            return;
        }

        if let Some(sender) = &events {
            let _ = sender
                .send(DeployEvent::ResourceStarted {
                    resource_name: name.clone(),
                })
                .await;
        }

        let result = executor(name.clone()).await;
        let node_result = match result {
            Ok(outcome) => NodeResult {
                name,
                status: NodeStatus::Succeeded,
                outcome: Some(outcome),
                error: None,
                skip_reason: None,
            },
            Err(err) => NodeResult {
                name,
                status: NodeStatus::Failed,
                outcome: None,
                error: Some(err),
                skip_reason: None,
            },
        };

        let _ = tx.send(WalkerMessage::NodeCompleted(idx, node_result)).await;
    });
}

/// All transitive dependents of a node, for cascade skip on failure.
fn collect_transitive_dependents(
    start: NodeIndex,
    dependents: &HashMap<NodeIndex, Vec<NodeIndex>>,
) -> Vec<NodeIndex> {
    let mut visited = HashSet::new();
    let mut stack = vec![start];

    while let Some(node) = stack.pop() {
        if let Some(deps) = dependents.get(&node) {
            for &dep in deps {
                if visited.insert(dep) {
                    stack.push(dep);
                }
            }
        }
    }

    visited.into_iter().collect()
}
