use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::errors::{BlueprintError, ReasonCode};

/// The dependency graph walked during deployment. Nodes are resource names;
/// an edge A -> B means B depends on A (A must finish first).
pub type DeploymentGraph = DiGraph<String, ()>;

/// Build the deployment graph from `(resource, depends_on)` pairs.
pub fn build_deployment_graph(
    items: &[(String, Vec<String>)],
) -> Result<DeploymentGraph, BlueprintError> {
    let mut graph = DiGraph::new();
    let mut node_map: HashMap<String, NodeIndex> = HashMap::new();

    for (name, _) in items {
        let idx = graph.add_node(name.clone());
        node_map.insert(name.clone(), idx);
    }

    for (name, depends_on) in items {
        let to_idx = node_map[name];
        for dep in depends_on {
            let from_idx = match node_map.get(dep) {
                Some(idx) => *idx,
                None => {
                    return Err(BlueprintError::new(
                        ReasonCode::InvalidReference,
                        format!(
                            "resource \"{}\" depends on \"{}\", which is not part of the change set",
                            name, dep
                        ),
                    ))
                }
            };
            graph.add_edge(from_idx, to_idx, ());
        }
    }

    if petgraph::algo::is_cyclic_directed(&graph) {
        return Err(BlueprintError::new(
            ReasonCode::InvalidReference,
            "circular dependency detected in the change set",
        ));
    }

    Ok(graph)
}

/// The same graph with every edge reversed: destruction order.
pub fn build_destruction_graph(
    items: &[(String, Vec<String>)],
) -> Result<DeploymentGraph, BlueprintError> {
    let forward = build_deployment_graph(items)?;
    let mut reversed = DiGraph::new();
    let mut node_map: HashMap<String, NodeIndex> = HashMap::new();
    for idx in forward.node_indices() {
        let name = forward[idx].clone();
        let new_idx = reversed.add_node(name.clone());
        node_map.insert(name, new_idx);
    }
    for edge in forward.edge_indices() {
        if let Some((from, to)) = forward.edge_endpoints(edge) {
            reversed.add_edge(node_map[&forward[to]], node_map[&forward[from]], ());
        }
    }
    Ok(reversed)
}
