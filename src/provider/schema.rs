use crate::errors::{BlueprintError, ReasonCode};
use crate::schema::mapping::{MappingNode, MappingNodeValue};
use crate::schema::scalar::ScalarValue;

// ─── Resource Spec Schemas ──────────────────────────────────────────────────

/// The schema a resource plugin declares for its `spec` mapping. Drives spec
/// validation, computed-field discovery, and must-recreate classification
/// during change staging.
#[derive(Debug, Clone)]
pub struct ResourceSpecDefinition {
    pub schema: SpecSchema,
    /// Path of the field populated with the provider-synthesised id, when
    /// the type exposes one (e.g. `id`).
    pub id_field: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpecSchema {
    pub label: Option<String>,
    pub description: Option<String>,
    pub kind: SpecSchemaKind,
    /// Populated by the provider after deploy rather than by the author.
    pub computed: bool,
    /// Any change to this field forces destroy-then-create.
    pub must_recreate: bool,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub enum SpecSchemaKind {
    Scalar(ScalarKind),
    /// A fixed set of named attributes.
    Object { attributes: Vec<(String, SpecSchema)> },
    /// Arbitrary keys with a uniform value schema.
    Map { values: Box<SpecSchema> },
    Array { items: Box<SpecSchema> },
    /// Alternative sub-schemas matched by best structural fit.
    Union { alternatives: Vec<SpecSchema> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl SpecSchema {
    fn of(kind: SpecSchemaKind) -> Self {
        Self {
            label: None,
            description: None,
            kind,
            computed: false,
            must_recreate: false,
            nullable: false,
        }
    }

    pub fn string() -> Self {
        Self::of(SpecSchemaKind::Scalar(ScalarKind::String))
    }

    pub fn integer() -> Self {
        Self::of(SpecSchemaKind::Scalar(ScalarKind::Integer))
    }

    pub fn float() -> Self {
        Self::of(SpecSchemaKind::Scalar(ScalarKind::Float))
    }

    pub fn boolean() -> Self {
        Self::of(SpecSchemaKind::Scalar(ScalarKind::Boolean))
    }

    pub fn object(attributes: Vec<(&str, SpecSchema)>) -> Self {
        Self::of(SpecSchemaKind::Object {
            attributes: attributes
                .into_iter()
                .map(|(name, schema)| (name.to_string(), schema))
                .collect(),
        })
    }

    pub fn map(values: SpecSchema) -> Self {
        Self::of(SpecSchemaKind::Map {
            values: Box::new(values),
        })
    }

    pub fn array(items: SpecSchema) -> Self {
        Self::of(SpecSchemaKind::Array {
            items: Box::new(items),
        })
    }

    pub fn union(alternatives: Vec<SpecSchema>) -> Self {
        Self::of(SpecSchemaKind::Union { alternatives })
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn must_recreate(mut self) -> Self {
        self.must_recreate = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The attribute schema for a named field, looking through unions.
    pub fn attribute(&self, name: &str) -> Option<&SpecSchema> {
        match &self.kind {
            SpecSchemaKind::Object { attributes } => attributes
                .iter()
                .find(|(attr, _)| attr == name)
                .map(|(_, schema)| schema),
            SpecSchemaKind::Map { values } => Some(values),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&SpecSchema> {
        match &self.kind {
            SpecSchemaKind::Array { items } => Some(items),
            _ => None,
        }
    }
}

// ─── Union Resolution ───────────────────────────────────────────────────────

/// Pick the union alternative whose structural shape matches the value:
/// map keys for objects, element shape for arrays, scalar kind for leaves.
pub fn resolve_union<'a>(
    alternatives: &'a [SpecSchema],
    node: &MappingNode,
) -> Option<&'a SpecSchema> {
    alternatives.iter().find(|alt| shape_matches(alt, node))
}

fn shape_matches(schema: &SpecSchema, node: &MappingNode) -> bool {
    match (&schema.kind, &node.value) {
        (SpecSchemaKind::Scalar(kind), MappingNodeValue::Scalar(scalar)) => {
            scalar_kind_matches(*kind, scalar)
        }
        (SpecSchemaKind::Scalar(ScalarKind::String), MappingNodeValue::StringWithSubstitutions(_)) => {
            true
        }
        (SpecSchemaKind::Object { attributes }, MappingNodeValue::Fields(entries)) => entries
            .iter()
            .all(|(key, _)| attributes.iter().any(|(attr, _)| attr == key)),
        (SpecSchemaKind::Map { .. }, MappingNodeValue::Fields(_)) => true,
        (SpecSchemaKind::Array { items }, MappingNodeValue::Items(values)) => values
            .first()
            .map(|first| shape_matches(items, first))
            .unwrap_or(true),
        (SpecSchemaKind::Union { alternatives }, _) => resolve_union(alternatives, node).is_some(),
        _ => false,
    }
}

fn scalar_kind_matches(kind: ScalarKind, scalar: &ScalarValue) -> bool {
    matches!(
        (kind, scalar),
        (ScalarKind::String, ScalarValue::String(_))
            | (ScalarKind::Integer, ScalarValue::Int(_))
            | (ScalarKind::Float, ScalarValue::Float(_))
            | (ScalarKind::Boolean, ScalarValue::Bool(_))
    )
}

// ─── Spec Validation ────────────────────────────────────────────────────────

/// Validate a resource spec against the plugin's declared schema. Union
/// nodes with no matching alternative are validation errors; computed
/// fields may be absent from the authored spec.
pub fn validate_spec(schema: &SpecSchema, node: &MappingNode, path: &str) -> Vec<BlueprintError> {
    let mut errors = Vec::new();
    validate_node(schema, node, path, &mut errors);
    errors
}

fn validate_node(schema: &SpecSchema, node: &MappingNode, path: &str, out: &mut Vec<BlueprintError>) {
    match &schema.kind {
        SpecSchemaKind::Scalar(kind) => {
            let ok = match &node.value {
                MappingNodeValue::Scalar(scalar) => scalar_kind_matches(*kind, scalar),
                MappingNodeValue::StringWithSubstitutions(_) => true,
                _ => false,
            };
            if !ok {
                out.push(
                    BlueprintError::new(
                        ReasonCode::InvalidResource,
                        format!("field \"{}\" does not match its declared scalar type", path),
                    )
                    .at(node.source_meta),
                );
            }
        }
        SpecSchemaKind::Object { attributes } => {
            let MappingNodeValue::Fields(entries) = &node.value else {
                out.push(
                    BlueprintError::new(
                        ReasonCode::InvalidResource,
                        format!("field \"{}\" must be a mapping", path),
                    )
                    .at(node.source_meta),
                );
                return;
            };
            for (key, child) in entries {
                match attributes.iter().find(|(attr, _)| attr == key) {
                    Some((_, child_schema)) => {
                        validate_node(child_schema, child, &format!("{}.{}", path, key), out);
                    }
                    None => out.push(
                        BlueprintError::new(
                            ReasonCode::InvalidResource,
                            format!("field \"{}.{}\" is not defined by the resource type", path, key),
                        )
                        .at(child.source_meta),
                    ),
                }
            }
        }
        SpecSchemaKind::Map { values } => {
            let MappingNodeValue::Fields(entries) = &node.value else {
                out.push(
                    BlueprintError::new(
                        ReasonCode::InvalidResource,
                        format!("field \"{}\" must be a mapping", path),
                    )
                    .at(node.source_meta),
                );
                return;
            };
            for (key, child) in entries {
                validate_node(values, child, &format!("{}.{}", path, key), out);
            }
        }
        SpecSchemaKind::Array { items } => {
            let MappingNodeValue::Items(values) = &node.value else {
                out.push(
                    BlueprintError::new(
                        ReasonCode::InvalidResource,
                        format!("field \"{}\" must be a sequence", path),
                    )
                    .at(node.source_meta),
                );
                return;
            };
            for (i, child) in values.iter().enumerate() {
                validate_node(items, child, &format!("{}[{}]", path, i), out);
            }
        }
        SpecSchemaKind::Union { alternatives } => match resolve_union(alternatives, node) {
            Some(matched) => validate_node(matched, node, path, out),
            None => out.push(
                BlueprintError::new(
                    ReasonCode::InvalidResource,
                    format!(
                        "field \"{}\" matches none of the {} allowed forms",
                        path,
                        alternatives.len()
                    ),
                )
                .at(node.source_meta),
            ),
        },
    }
}
