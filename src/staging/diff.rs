use crate::errors::BlueprintError;
use crate::provider::schema::{resolve_union, ResourceSpecDefinition, SpecSchema, SpecSchemaKind};
use crate::schema::mapping::{MappingNode, MappingNodeValue, MAX_MAPPING_DEPTH};
use crate::state::models::ResourceState;

use super::changes::{AppliedResourceInfo, FieldChange, LinkChanges, ResourceChanges};

// ─── Inputs ─────────────────────────────────────────────────────────────────

/// Inputs to change staging for one resource: the prior persisted state
/// (absent for new resources), the desired spec after substitution
/// resolution, and the resource's current external state.
pub struct StageResourceChangesInput<'a> {
    pub instance_id: &'a str,
    pub resource_name: &'a str,
    pub resource_type: &'a str,
    pub prior_state: Option<&'a ResourceState>,
    pub desired_spec: &'a MappingNode,
    pub external_state: Option<&'a MappingNode>,
    pub spec_definition: &'a ResourceSpecDefinition,
}

// ─── Staging ────────────────────────────────────────────────────────────────

/// Diff the desired spec against the resource's current state and produce a
/// deterministic change set. The baseline is the external state when the
/// provider returned one, falling back to the last persisted spec.
pub fn stage_resource_changes(
    input: StageResourceChangesInput<'_>,
) -> Result<ResourceChanges, BlueprintError> {
    let persisted_spec = input
        .prior_state
        .and_then(|state| state.spec_data.as_deref());
    let baseline = input.external_state.or(persisted_spec);

    let mut acc = DiffAccumulator::default();
    walk(
        "spec",
        Some(input.desired_spec),
        baseline,
        Some(&input.spec_definition.schema),
        0,
        &mut acc,
    )?;

    // A must-recreate change only means anything against an existing
    // resource; brand-new resources are created either way.
    let must_recreate = input.prior_state.is_some() && acc.must_recreate;

    let mut changes = ResourceChanges {
        applied_resource_info: AppliedResourceInfo {
            resource_id: input
                .prior_state
                .map(|state| state.resource_id.clone())
                .filter(|id| !id.is_empty()),
            resource_name: input.resource_name.to_string(),
            resource_type: input.resource_type.to_string(),
            instance_id: input.instance_id.to_string(),
        },
        must_recreate,
        modified_fields: acc.modified,
        new_fields: acc.new,
        removed_fields: acc.removed,
        unchanged_fields: acc.unchanged,
        computed_fields: acc.computed,
        field_changes_known_on_deploy: acc.known_on_deploy,
        ..ResourceChanges::default()
    };

    changes.modified_fields.sort_by(|a, b| a.field_path.cmp(&b.field_path));
    changes.new_fields.sort_by(|a, b| a.field_path.cmp(&b.field_path));
    changes.removed_fields.sort();
    changes.unchanged_fields.sort();
    changes.computed_fields.sort();
    changes.field_changes_known_on_deploy.sort();

    Ok(changes)
}

#[derive(Default)]
struct DiffAccumulator {
    modified: Vec<FieldChange>,
    new: Vec<FieldChange>,
    removed: Vec<String>,
    unchanged: Vec<String>,
    computed: Vec<String>,
    known_on_deploy: Vec<String>,
    must_recreate: bool,
}

impl DiffAccumulator {
    fn record_change(&mut self, schema: Option<&SpecSchema>) {
        if schema.is_some_and(|s| s.must_recreate) {
            self.must_recreate = true;
        }
    }
}

fn is_leaf(node: &MappingNode) -> bool {
    matches!(
        node.value,
        MappingNodeValue::Scalar(_) | MappingNodeValue::StringWithSubstitutions(_)
    )
}

fn walk(
    path: &str,
    desired: Option<&MappingNode>,
    baseline: Option<&MappingNode>,
    schema: Option<&SpecSchema>,
    depth: usize,
    acc: &mut DiffAccumulator,
) -> Result<(), BlueprintError> {
    // Resolve union schemas against whichever side has a value; a desired
    // value matching no alternative is a validation error.
    let schema = match schema {
        Some(s) => match &s.kind {
            SpecSchemaKind::Union { alternatives } => {
                let probe = desired.or(baseline);
                match probe {
                    Some(node) => match resolve_union(alternatives, node) {
                        Some(matched) => Some(matched),
                        None if desired.is_some() => {
                            return Err(crate::provider::schema::validate_spec(s, node, path)
                                .into_iter()
                                .next()
                                .unwrap_or_else(|| {
                                    BlueprintError::new(
                                        crate::errors::ReasonCode::InvalidResource,
                                        format!(
                                            "field \"{}\" matches none of the allowed forms",
                                            path
                                        ),
                                    )
                                }));
                        }
                        None => None,
                    },
                    None => None,
                }
            }
            _ => Some(s),
        },
        None => None,
    };

    // Computed fields the author left unset are filled in by the provider
    // after deploy; they are recorded, not diffed.
    if schema.is_some_and(|s| s.computed) && desired.is_none() {
        acc.computed.push(path.to_string());
        return Ok(());
    }

    match (desired, baseline) {
        (None, None) => Ok(()),
        (Some(desired_node), None) => {
            record_new(path, desired_node, schema, depth, acc);
            Ok(())
        }
        (None, Some(_)) => {
            acc.record_change(schema);
            acc.removed.push(path.to_string());
            Ok(())
        }
        (Some(desired_node), Some(baseline_node)) => {
            diff_nodes(path, desired_node, baseline_node, schema, depth, acc)
        }
    }
}

/// Computed attributes the author left out entirely are still part of the
/// change set: the provider fills them in after deploy.
fn record_absent_computed(
    path: &str,
    schema: Option<&SpecSchema>,
    present: impl Fn(&str) -> bool,
    acc: &mut DiffAccumulator,
) {
    let Some(SpecSchemaKind::Object { attributes }) = schema.map(|s| &s.kind) else {
        return;
    };
    for (attr, attr_schema) in attributes {
        if attr_schema.computed && !present(attr) {
            acc.computed.push(format!("{}.{}", path, attr));
        }
    }
}

/// Record every leaf of a desired-only subtree as a new field.
fn record_new(
    path: &str,
    node: &MappingNode,
    schema: Option<&SpecSchema>,
    depth: usize,
    acc: &mut DiffAccumulator,
) {
    if depth >= MAX_MAPPING_DEPTH && !is_leaf(node) {
        acc.known_on_deploy.push(path.to_string());
        return;
    }
    match &node.value {
        MappingNodeValue::Fields(entries) => {
            for (key, child) in entries {
                let child_schema = schema.and_then(|s| s.attribute(key));
                record_new(&format!("{}.{}", path, key), child, child_schema, depth + 1, acc);
            }
            record_absent_computed(
                path,
                schema,
                |attr| entries.iter().any(|(key, _)| key == attr),
                acc,
            );
        }
        MappingNodeValue::Items(items) => {
            for (i, child) in items.iter().enumerate() {
                let child_schema = schema.and_then(|s| s.items());
                record_new(&format!("{}[{}]", path, i), child, child_schema, depth + 1, acc);
            }
        }
        _ => {
            acc.record_change(schema);
            acc.new.push(FieldChange {
                field_path: path.to_string(),
                prev_value: None,
                new_value: Some(node.clone()),
                must_recreate: schema.is_some_and(|s| s.must_recreate),
            });
        }
    }
}

fn diff_nodes(
    path: &str,
    desired: &MappingNode,
    baseline: &MappingNode,
    schema: Option<&SpecSchema>,
    depth: usize,
    acc: &mut DiffAccumulator,
) -> Result<(), BlueprintError> {
    // Below the depth bound, report the subtree without recursing.
    if depth >= MAX_MAPPING_DEPTH && !(is_leaf(desired) && is_leaf(baseline)) {
        acc.known_on_deploy.push(path.to_string());
        return Ok(());
    }

    match (&desired.value, &baseline.value) {
        (MappingNodeValue::Fields(desired_entries), MappingNodeValue::Fields(baseline_entries)) => {
            for (key, desired_child) in desired_entries {
                let baseline_child = baseline_entries
                    .iter()
                    .find(|(baseline_key, _)| baseline_key == key)
                    .map(|(_, child)| child);
                let child_schema = schema.and_then(|s| s.attribute(key));
                walk(
                    &format!("{}.{}", path, key),
                    Some(desired_child),
                    baseline_child,
                    child_schema,
                    depth + 1,
                    acc,
                )?;
            }
            for (key, baseline_child) in baseline_entries {
                if desired_entries.iter().any(|(desired_key, _)| desired_key == key) {
                    continue;
                }
                let child_schema = schema.and_then(|s| s.attribute(key));
                walk(
                    &format!("{}.{}", path, key),
                    None,
                    Some(baseline_child),
                    child_schema,
                    depth + 1,
                    acc,
                )?;
            }
            record_absent_computed(
                path,
                schema,
                |attr| {
                    desired_entries.iter().any(|(key, _)| key == attr)
                        || baseline_entries.iter().any(|(key, _)| key == attr)
                },
                acc,
            );
            Ok(())
        }
        (MappingNodeValue::Items(desired_items), MappingNodeValue::Items(baseline_items)) => {
            let len = desired_items.len().max(baseline_items.len());
            for i in 0..len {
                let child_schema = schema.and_then(|s| s.items());
                walk(
                    &format!("{}[{}]", path, i),
                    desired_items.get(i),
                    baseline_items.get(i),
                    child_schema,
                    depth + 1,
                    acc,
                )?;
            }
            Ok(())
        }
        _ if is_leaf(desired) && is_leaf(baseline) => {
            if desired.value == baseline.value {
                acc.unchanged.push(path.to_string());
            } else {
                acc.record_change(schema);
                acc.modified.push(FieldChange {
                    field_path: path.to_string(),
                    prev_value: Some(baseline.clone()),
                    new_value: Some(desired.clone()),
                    must_recreate: schema.is_some_and(|s| s.must_recreate),
                });
            }
            Ok(())
        }
        // Shape changed entirely (scalar became a map, etc.).
        _ => {
            acc.record_change(schema);
            acc.modified.push(FieldChange {
                field_path: path.to_string(),
                prev_value: Some(baseline.clone()),
                new_value: Some(desired.clone()),
                must_recreate: schema.is_some_and(|s| s.must_recreate),
            });
            Ok(())
        }
    }
}

// ─── Link Deltas ────────────────────────────────────────────────────────────

/// Classify outbound links for a resource: links only in the desired set
/// are new, links only in the prior set are removed, links in both carry
/// potential data changes resolved at deploy time by the link plugin.
pub fn stage_outbound_links(
    desired: &[String],
    prior: &[String],
) -> (Vec<LinkChanges>, Vec<LinkChanges>, Vec<String>) {
    let mut new_links: Vec<LinkChanges> = desired
        .iter()
        .filter(|name| !prior.contains(name))
        .map(|name| LinkChanges {
            link_name: name.clone(),
            ..LinkChanges::default()
        })
        .collect();
    let mut changed: Vec<LinkChanges> = desired
        .iter()
        .filter(|name| prior.contains(name))
        .map(|name| LinkChanges {
            link_name: name.clone(),
            ..LinkChanges::default()
        })
        .collect();
    let mut removed: Vec<String> = prior
        .iter()
        .filter(|name| !desired.contains(name))
        .cloned()
        .collect();

    new_links.sort_by(|a, b| a.link_name.cmp(&b.link_name));
    changed.sort_by(|a, b| a.link_name.cmp(&b.link_name));
    removed.sort();
    (new_links, changed, removed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::provider::schema::{ResourceSpecDefinition, SpecSchema};
    use crate::schema::mapping::MappingNode;
    use crate::state::models::ResourceState;

    fn table_definition() -> ResourceSpecDefinition {
        ResourceSpecDefinition {
            schema: SpecSchema::object(vec![
                ("tableName", SpecSchema::string().must_recreate()),
                ("readCapacity", SpecSchema::integer()),
                ("arn", SpecSchema::string().computed()),
                (
                    "tags",
                    SpecSchema::map(SpecSchema::string()),
                ),
            ]),
            id_field: Some("arn".to_string()),
        }
    }

    fn prior_state(spec: MappingNode) -> ResourceState {
        ResourceState {
            resource_id: "res-1".to_string(),
            name: "ordersTable".to_string(),
            resource_type: "aws/dynamodb/table".to_string(),
            instance_id: "inst-1".to_string(),
            spec_data: Some(Arc::new(spec)),
            ..ResourceState::default()
        }
    }

    fn stage(
        prior: Option<&ResourceState>,
        desired: &MappingNode,
        definition: &ResourceSpecDefinition,
    ) -> ResourceChanges {
        stage_resource_changes(StageResourceChangesInput {
            instance_id: "inst-1",
            resource_name: "ordersTable",
            resource_type: "aws/dynamodb/table",
            prior_state: prior,
            desired_spec: desired,
            external_state: None,
            spec_definition: definition,
        })
        .unwrap()
    }

    #[test]
    fn new_resource_records_every_leaf_as_new() {
        let desired = MappingNode::fields(vec![
            ("tableName".to_string(), MappingNode::string("orders")),
            ("readCapacity".to_string(), MappingNode::int(5)),
        ]);
        let changes = stage(None, &desired, &table_definition());

        assert!(changes.applied_resource_info.resource_id.is_none());
        assert!(!changes.must_recreate);
        assert_eq!(
            changes.new_fields.iter().map(|f| f.field_path.as_str()).collect::<Vec<_>>(),
            vec!["spec.readCapacity", "spec.tableName"]
        );
        assert_eq!(changes.computed_fields, vec!["spec.arn".to_string()]);
    }

    #[test]
    fn modified_and_unchanged_fields_are_classified() {
        let prior_spec = MappingNode::fields(vec![
            ("tableName".to_string(), MappingNode::string("orders")),
            ("readCapacity".to_string(), MappingNode::int(5)),
        ]);
        let desired = MappingNode::fields(vec![
            ("tableName".to_string(), MappingNode::string("orders")),
            ("readCapacity".to_string(), MappingNode::int(10)),
        ]);
        let prior = prior_state(prior_spec);
        let changes = stage(Some(&prior), &desired, &table_definition());

        assert_eq!(changes.applied_resource_info.resource_id.as_deref(), Some("res-1"));
        assert_eq!(changes.unchanged_fields, vec!["spec.tableName".to_string()]);
        assert_eq!(changes.modified_fields.len(), 1);
        assert_eq!(changes.modified_fields[0].field_path, "spec.readCapacity");
        assert_eq!(
            changes.modified_fields[0].prev_value,
            Some(MappingNode::int(5))
        );
        assert!(!changes.must_recreate);
    }

    #[test]
    fn must_recreate_field_change_sets_top_level_flag() {
        let prior_spec = MappingNode::fields(vec![(
            "tableName".to_string(),
            MappingNode::string("orders"),
        )]);
        let desired = MappingNode::fields(vec![(
            "tableName".to_string(),
            MappingNode::string("orders-v2"),
        )]);
        let prior = prior_state(prior_spec);
        let changes = stage(Some(&prior), &desired, &table_definition());

        assert!(changes.must_recreate);
        assert!(changes.modified_fields[0].must_recreate);
    }

    #[test]
    fn external_state_takes_precedence_over_persisted_spec() {
        let persisted = MappingNode::fields(vec![(
            "readCapacity".to_string(),
            MappingNode::int(10),
        )]);
        let external = MappingNode::fields(vec![(
            "readCapacity".to_string(),
            MappingNode::int(3),
        )]);
        let desired = MappingNode::fields(vec![(
            "readCapacity".to_string(),
            MappingNode::int(10),
        )]);
        let prior = prior_state(persisted);

        let changes = stage_resource_changes(StageResourceChangesInput {
            instance_id: "inst-1",
            resource_name: "ordersTable",
            resource_type: "aws/dynamodb/table",
            prior_state: Some(&prior),
            desired_spec: &desired,
            external_state: Some(&external),
            spec_definition: &table_definition(),
        })
        .unwrap();

        // Against external reality the capacity differs even though the
        // persisted spec matches.
        assert_eq!(changes.modified_fields.len(), 1);
        assert_eq!(changes.modified_fields[0].prev_value, Some(MappingNode::int(3)));
    }

    #[test]
    fn depth_bound_defers_deep_subtrees() {
        // Build a chain of nested maps deeper than the traversal bound.
        let mut desired_leaf = MappingNode::string("new");
        let mut baseline_leaf = MappingNode::string("old");
        for _ in 0..(MAX_MAPPING_DEPTH + 2) {
            desired_leaf = MappingNode::fields(vec![("inner".to_string(), desired_leaf)]);
            baseline_leaf = MappingNode::fields(vec![("inner".to_string(), baseline_leaf)]);
        }
        let prior = prior_state(baseline_leaf);
        let definition = ResourceSpecDefinition {
            schema: SpecSchema::map(SpecSchema::string()),
            id_field: None,
        };
        let changes = stage(Some(&prior), &desired_leaf, &definition);

        assert!(changes.modified_fields.is_empty());
        assert_eq!(changes.field_changes_known_on_deploy.len(), 1);
        let deferred = &changes.field_changes_known_on_deploy[0];
        assert!(deferred.starts_with("spec.inner"));
    }

    #[test]
    fn staging_is_deterministic() {
        let prior_spec = MappingNode::fields(vec![
            ("tableName".to_string(), MappingNode::string("orders")),
            (
                "tags".to_string(),
                MappingNode::fields(vec![
                    ("env".to_string(), MappingNode::string("prod")),
                    ("team".to_string(), MappingNode::string("payments")),
                ]),
            ),
        ]);
        let desired = MappingNode::fields(vec![
            ("tableName".to_string(), MappingNode::string("orders")),
            (
                "tags".to_string(),
                MappingNode::fields(vec![
                    ("team".to_string(), MappingNode::string("orders")),
                    ("env".to_string(), MappingNode::string("prod")),
                ]),
            ),
            ("readCapacity".to_string(), MappingNode::int(2)),
        ]);
        let prior = prior_state(prior_spec);
        let definition = table_definition();

        let first = stage(Some(&prior), &desired, &definition);
        let second = stage(Some(&prior), &desired, &definition);
        let first_json = serde_json::to_string(&first).unwrap();
        let second_json = serde_json::to_string(&second).unwrap();
        assert_eq!(first_json, second_json);

        // Sorted by path.
        let paths: Vec<&str> = first
            .unchanged_fields
            .iter()
            .map(String::as_str)
            .collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn union_mismatch_is_a_validation_error() {
        let definition = ResourceSpecDefinition {
            schema: SpecSchema::object(vec![(
                "handler",
                SpecSchema::union(vec![SpecSchema::string(), SpecSchema::integer()]),
            )]),
            id_field: None,
        };
        let desired = MappingNode::fields(vec![(
            "handler".to_string(),
            MappingNode::items(vec![MappingNode::int(1)]),
        )]);
        let err = stage_resource_changes(StageResourceChangesInput {
            instance_id: "inst-1",
            resource_name: "fn",
            resource_type: "aws/lambda/function",
            prior_state: None,
            desired_spec: &desired,
            external_state: None,
            spec_definition: &definition,
        })
        .unwrap_err();
        assert!(err.message.contains("spec.handler"));
    }

    #[test]
    fn outbound_links_are_classified_and_sorted() {
        let desired = vec![
            "orders::ordersTable".to_string(),
            "orders::auditTopic".to_string(),
        ];
        let prior = vec![
            "orders::ordersTable".to_string(),
            "orders::legacyQueue".to_string(),
        ];
        let (new_links, changed, removed) = stage_outbound_links(&desired, &prior);
        assert_eq!(new_links.len(), 1);
        assert_eq!(new_links[0].link_name, "orders::auditTopic");
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].link_name, "orders::ordersTable");
        assert_eq!(removed, vec!["orders::legacyQueue".to_string()]);
    }
}
