use std::collections::{HashMap, VecDeque};

use crate::errors::{BlueprintError, ReasonCode};
use crate::schema::blueprint::Blueprint;
use crate::schema::mapping::{MappingNode, MappingNodeValue};
use crate::subst::ast::StringOrSubstitutions;
use crate::subst::parser::{parse_substitution, ParseContext};

// ─── Reference Chain Graph ──────────────────────────────────────────────────

/// One vertex in the bidirectional reference graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceChainNode {
    pub element_name: String,
    /// Elements this one references (its dependencies).
    pub references: Vec<String>,
    /// Elements that reference this one.
    pub referenced_by: Vec<String>,
}

/// The reference graph of a blueprint. Edges are kept symmetric: adding or
/// removing an edge always updates both endpoints.
#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    order: Vec<String>,
    nodes: HashMap<String, ReferenceChainNode>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, element_name: &str) {
        if !self.nodes.contains_key(element_name) {
            self.order.push(element_name.to_string());
            self.nodes.insert(
                element_name.to_string(),
                ReferenceChainNode {
                    element_name: element_name.to_string(),
                    ..ReferenceChainNode::default()
                },
            );
        }
    }

    /// Record that `from` references `to`. Both endpoints are created when
    /// missing.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(from);
        self.add_node(to);
        if let Some(from_node) = self.nodes.get_mut(from) {
            if !from_node.references.iter().any(|r| r == to) {
                from_node.references.push(to.to_string());
            }
        }
        if let Some(to_node) = self.nodes.get_mut(to) {
            if !to_node.referenced_by.iter().any(|r| r == from) {
                to_node.referenced_by.push(from.to_string());
            }
        }
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) {
        if let Some(from_node) = self.nodes.get_mut(from) {
            from_node.references.retain(|r| r != to);
        }
        if let Some(to_node) = self.nodes.get_mut(to) {
            to_node.referenced_by.retain(|r| r != from);
        }
    }

    pub fn node(&self, element_name: &str) -> Option<&ReferenceChainNode> {
        self.nodes.get(element_name)
    }

    /// Node names in insertion order.
    pub fn element_names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Build the graph from every element of a blueprint, parsing each
    /// interpolated string for references. Parse failures are returned
    /// alongside the best-effort graph.
    pub fn from_blueprint(blueprint: &Blueprint) -> (ReferenceGraph, Vec<BlueprintError>) {
        let mut graph = ReferenceGraph::new();
        let mut errors = Vec::new();

        for variable in &blueprint.variables {
            graph.add_node(&format!("variables.{}", variable.name));
        }
        for data_source in &blueprint.data_sources {
            let name = format!("datasources.{}", data_source.name);
            graph.add_node(&name);
            if let Some(filter) = &data_source.filter {
                for interp in &filter.search {
                    graph.add_interp_edges(&name, interp);
                }
            }
        }
        for resource in &blueprint.resources {
            let name = format!("resources.{}", resource.name);
            graph.add_node(&name);
            graph.add_mapping_edges(&name, &resource.spec);
            for (_, annotation) in &resource.metadata.annotations {
                graph.add_mapping_edges(&name, annotation);
            }
        }
        for include in &blueprint.includes {
            let name = format!("children.{}", include.name);
            graph.add_node(&name);
            graph.add_interp_edges(&name, &include.path);
            if let Some(variables) = &include.variables {
                graph.add_mapping_edges(&name, variables);
            }
        }
        for export in &blueprint.exports {
            let name = format!("exports.{}", export.name);
            graph.add_node(&name);
            let (parsed, parse_errors) =
                parse_substitution(&export.field, &ParseContext::default());
            errors.extend(parse_errors.into_iter().map(|e| {
                BlueprintError::new(ReasonCode::InvalidReferenceSubstitution, e.message)
                    .at(e.location)
            }));
            if let Some(sub) = parsed {
                for element_ref in sub.referenced_elements() {
                    graph.add_edge(&name, &element_ref.element_name());
                }
            }
        }

        (graph, errors)
    }

    fn add_interp_edges(&mut self, from: &str, interp: &StringOrSubstitutions) {
        for substitution in interp.substitutions() {
            for element_ref in substitution.referenced_elements() {
                self.add_edge(from, &element_ref.element_name());
            }
        }
    }

    fn add_mapping_edges(&mut self, from: &str, node: &MappingNode) {
        match &node.value {
            MappingNodeValue::StringWithSubstitutions(interp) => {
                self.add_interp_edges(from, interp);
            }
            MappingNodeValue::Fields(entries) => {
                for (_, child) in entries {
                    self.add_mapping_edges(from, child);
                }
            }
            MappingNodeValue::Items(items) => {
                for child in items {
                    self.add_mapping_edges(from, child);
                }
            }
            MappingNodeValue::Scalar(_) => {}
        }
    }
}

// ─── Topological Sort ───────────────────────────────────────────────────────

/// Which edge orientation drives the sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Dependencies first: for every reference `u → v`, `v` precedes `u`.
    /// This is deployment order.
    ReferencedBy,
    /// Dependents first: destruction order.
    References,
}

/// Kahn's algorithm over the requested items. The FIFO work queue is seeded
/// in `items` order, which keeps ties deterministic by insertion order.
/// Returns a circular-reference error when a cycle prevents completion.
pub fn topological_sort(
    graph: &ReferenceGraph,
    items: &[String],
    direction: SortDirection,
) -> Result<Vec<String>, BlueprintError> {
    let in_scope: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let incoming = |name: &str| -> Vec<String> {
        let Some(node) = graph.node(name) else {
            return Vec::new();
        };
        let list = match direction {
            SortDirection::ReferencedBy => &node.references,
            SortDirection::References => &node.referenced_by,
        };
        list.iter()
            .filter(|n| in_scope.contains_key(n.as_str()))
            .cloned()
            .collect()
    };
    let outgoing = |name: &str| -> Vec<String> {
        let Some(node) = graph.node(name) else {
            return Vec::new();
        };
        let list = match direction {
            SortDirection::ReferencedBy => &node.referenced_by,
            SortDirection::References => &node.references,
        };
        list.iter()
            .filter(|n| in_scope.contains_key(n.as_str()))
            .cloned()
            .collect()
    };

    let mut in_degree: HashMap<String, usize> = HashMap::new();
    for name in items {
        in_degree.insert(name.clone(), incoming(name).len());
    }

    let mut queue: VecDeque<String> = items
        .iter()
        .filter(|name| in_degree.get(name.as_str()) == Some(&0))
        .cloned()
        .collect();

    let mut sorted = Vec::with_capacity(items.len());
    while let Some(name) = queue.pop_front() {
        for dependent in outgoing(&name) {
            if let Some(degree) = in_degree.get_mut(&dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        sorted.push(name);
    }

    if sorted.len() != items.len() {
        let stuck: Vec<&str> = items
            .iter()
            .filter(|name| !sorted.contains(name))
            .map(|s| s.as_str())
            .collect();
        return Err(BlueprintError::new(
            ReasonCode::InvalidReference,
            format!(
                "circular reference detected involving: {}",
                stuck.join(", ")
            ),
        ));
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_graph() -> ReferenceGraph {
        // B references A, C references B.
        let mut graph = ReferenceGraph::new();
        graph.add_node("resources.A");
        graph.add_node("resources.B");
        graph.add_node("resources.C");
        graph.add_edge("resources.B", "resources.A");
        graph.add_edge("resources.C", "resources.B");
        graph
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn edges_are_symmetric() {
        let graph = chain_graph();
        let a = graph.node("resources.A").unwrap();
        let b = graph.node("resources.B").unwrap();
        assert_eq!(a.referenced_by, vec!["resources.B".to_string()]);
        assert_eq!(b.references, vec!["resources.A".to_string()]);
        assert_eq!(b.referenced_by, vec!["resources.C".to_string()]);
    }

    #[test]
    fn remove_edge_updates_both_endpoints() {
        let mut graph = chain_graph();
        graph.remove_edge("resources.B", "resources.A");
        assert!(graph.node("resources.B").unwrap().references.is_empty());
        assert!(graph.node("resources.A").unwrap().referenced_by.is_empty());
    }

    #[test]
    fn referenced_by_direction_is_deploy_order() {
        let graph = chain_graph();
        let items = names(&["resources.A", "resources.B", "resources.C"]);
        let sorted = topological_sort(&graph, &items, SortDirection::ReferencedBy).unwrap();
        assert_eq!(sorted, names(&["resources.A", "resources.B", "resources.C"]));
    }

    #[test]
    fn references_direction_is_destroy_order() {
        let graph = chain_graph();
        let items = names(&["resources.A", "resources.B", "resources.C"]);
        let sorted = topological_sort(&graph, &items, SortDirection::References).unwrap();
        assert_eq!(sorted, names(&["resources.C", "resources.B", "resources.A"]));
    }

    #[test]
    fn independent_nodes_keep_insertion_order() {
        let mut graph = ReferenceGraph::new();
        graph.add_node("resources.z");
        graph.add_node("resources.a");
        graph.add_node("resources.m");
        let items = names(&["resources.z", "resources.a", "resources.m"]);
        let sorted = topological_sort(&graph, &items, SortDirection::ReferencedBy).unwrap();
        assert_eq!(sorted, items);
    }

    #[test]
    fn cycles_are_reported() {
        let mut graph = ReferenceGraph::new();
        graph.add_edge("resources.A", "resources.B");
        graph.add_edge("resources.B", "resources.A");
        let items = names(&["resources.A", "resources.B"]);
        let err = topological_sort(&graph, &items, SortDirection::ReferencedBy).unwrap_err();
        assert!(err.message.contains("circular reference"));
    }

    #[test]
    fn diamond_orders_every_edge_correctly() {
        // B and C reference A; D references B and C.
        let mut graph = ReferenceGraph::new();
        for name in ["resources.A", "resources.B", "resources.C", "resources.D"] {
            graph.add_node(name);
        }
        graph.add_edge("resources.B", "resources.A");
        graph.add_edge("resources.C", "resources.A");
        graph.add_edge("resources.D", "resources.B");
        graph.add_edge("resources.D", "resources.C");

        let items = names(&["resources.A", "resources.B", "resources.C", "resources.D"]);
        let sorted = topological_sort(&graph, &items, SortDirection::ReferencedBy).unwrap();
        let pos =
            |name: &str| sorted.iter().position(|n| n == name).unwrap();
        assert!(pos("resources.A") < pos("resources.B"));
        assert!(pos("resources.A") < pos("resources.C"));
        assert!(pos("resources.B") < pos("resources.D"));
        assert!(pos("resources.C") < pos("resources.D"));
    }
}
