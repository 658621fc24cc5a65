use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::scalar::ScalarValue;
use crate::subst::ast::StringOrSubstitutions;

/// Traversal bound for diffing and drift checks. Changes below this depth are
/// reported as known-only-at-deploy-time and not recursed into.
pub const MAX_MAPPING_DEPTH: usize = 25;

// ─── Source Metadata ────────────────────────────────────────────────────────

/// Position of an element in the surface document, when the surface parser
/// provided one. 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMeta {
    pub line: usize,
    pub column: usize,
}

impl SourceMeta {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

// ─── Path Items ─────────────────────────────────────────────────────────────

/// One step into a mapping tree: a field name or a primitive array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathItem {
    FieldName(String),
    ArrayIndex(usize),
}

impl fmt::Display for PathItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathItem::FieldName(name) => write!(f, ".{}", name),
            PathItem::ArrayIndex(i) => write!(f, "[{}]", i),
        }
    }
}

/// Render a path as the JSON-pointer-like key used in change sets, e.g.
/// `spec.ports[0].containerPort`.
pub fn render_field_path(root: &str, path: &[PathItem]) -> String {
    let mut out = String::from(root);
    for item in path {
        match item {
            PathItem::FieldName(name) => {
                out.push('.');
                out.push_str(name);
            }
            PathItem::ArrayIndex(i) => {
                out.push_str(&format!("[{}]", i));
            }
        }
    }
    out
}

// ─── MappingNode ────────────────────────────────────────────────────────────

/// A recursive tree mixing literal scalars, ordered maps, sequences, and
/// interpolated strings. Exactly one of the variants is set per node.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingNode {
    pub value: MappingNodeValue,
    pub source_meta: Option<SourceMeta>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappingNodeValue {
    Scalar(ScalarValue),
    /// Ordered field map; insertion order is preserved for diagnostics.
    Fields(Vec<(String, MappingNode)>),
    Items(Vec<MappingNode>),
    StringWithSubstitutions(StringOrSubstitutions),
}

impl MappingNode {
    pub fn scalar(value: ScalarValue) -> Self {
        Self {
            value: MappingNodeValue::Scalar(value),
            source_meta: None,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::scalar(ScalarValue::String(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Self::scalar(ScalarValue::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Self::scalar(ScalarValue::Bool(value))
    }

    pub fn fields(entries: Vec<(String, MappingNode)>) -> Self {
        Self {
            value: MappingNodeValue::Fields(entries),
            source_meta: None,
        }
    }

    pub fn items(items: Vec<MappingNode>) -> Self {
        Self {
            value: MappingNodeValue::Items(items),
            source_meta: None,
        }
    }

    pub fn interpolated(value: StringOrSubstitutions) -> Self {
        Self {
            value: MappingNodeValue::StringWithSubstitutions(value),
            source_meta: None,
        }
    }

    pub fn at(mut self, meta: SourceMeta) -> Self {
        self.source_meta = Some(meta);
        self
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match &self.value {
            MappingNodeValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a direct child field by name, preserving the first match.
    pub fn get_field(&self, name: &str) -> Option<&MappingNode> {
        match &self.value {
            MappingNodeValue::Fields(entries) => entries
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, node)| node),
            _ => None,
        }
    }

    pub fn get_index(&self, index: usize) -> Option<&MappingNode> {
        match &self.value {
            MappingNodeValue::Items(items) => items.get(index),
            _ => None,
        }
    }

    /// Navigate a path of field names and array indices.
    pub fn get_path(&self, path: &[PathItem]) -> Option<&MappingNode> {
        let mut current = self;
        for item in path {
            current = match item {
                PathItem::FieldName(name) => current.get_field(name)?,
                PathItem::ArrayIndex(i) => current.get_index(*i)?,
            };
        }
        Some(current)
    }

    /// Insert or replace a field at a path, creating intermediate field maps.
    /// Used to inject computed field values after deploy.
    pub fn set_path(&mut self, path: &[PathItem], node: MappingNode) {
        let Some((first, rest)) = path.split_first() else {
            *self = node;
            return;
        };
        match first {
            PathItem::FieldName(name) => {
                if !matches!(self.value, MappingNodeValue::Fields(_)) {
                    self.value = MappingNodeValue::Fields(Vec::new());
                }
                if let MappingNodeValue::Fields(entries) = &mut self.value {
                    if let Some((_, child)) =
                        entries.iter_mut().find(|(field, _)| field == name)
                    {
                        child.set_path(rest, node);
                    } else {
                        let mut child = MappingNode::fields(Vec::new());
                        child.set_path(rest, node);
                        entries.push((name.clone(), child));
                    }
                }
            }
            PathItem::ArrayIndex(i) => {
                if !matches!(self.value, MappingNodeValue::Items(_)) {
                    self.value = MappingNodeValue::Items(Vec::new());
                }
                if let MappingNodeValue::Items(items) = &mut self.value {
                    while items.len() <= *i {
                        items.push(MappingNode::fields(Vec::new()));
                    }
                    items[*i].set_path(rest, node);
                }
            }
        }
    }
}

impl Serialize for MappingNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.value {
            MappingNodeValue::Scalar(scalar) => scalar.serialize(serializer),
            MappingNodeValue::Fields(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, node) in entries {
                    map.serialize_entry(key, node)?;
                }
                map.end()
            }
            MappingNodeValue::Items(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            MappingNodeValue::StringWithSubstitutions(interp) => {
                serializer.serialize_str(&interp.to_source_string())
            }
        }
    }
}

struct MappingNodeVisitor;

impl<'de> Visitor<'de> for MappingNodeVisitor {
    type Value = MappingNode;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a scalar, sequence, or mapping")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(MappingNode::scalar(ScalarValue::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(MappingNode::scalar(ScalarValue::Int(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(|i| MappingNode::scalar(ScalarValue::Int(i)))
            .map_err(|_| E::custom(format!("integer {} overflows int64", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(MappingNode::scalar(ScalarValue::Float(v)))
    }

    // Interpolated strings deserialize as literal scalars; the surface loader
    // upgrades them via the substitution parser.
    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(MappingNode::scalar(ScalarValue::String(v.to_string())))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(MappingNode::items(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::new();
        while let Some((key, node)) = map.next_entry::<String, MappingNode>()? {
            entries.push((key, node));
        }
        Ok(MappingNode::fields(entries))
    }
}

impl<'de> Deserialize<'de> for MappingNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MappingNodeVisitor)
    }
}
