use std::fmt;

use super::mapping::{MappingNode, SourceMeta};
use super::scalar::ScalarValue;
use crate::subst::ast::StringOrSubstitutions;

/// The sole blueprint version supported by the core engine.
pub const BLUEPRINT_VERSION: &str = "2023-04-20";

pub const SUPPORTED_VERSIONS: &[&str] = &[BLUEPRINT_VERSION];

// ─── Blueprint ──────────────────────────────────────────────────────────────

/// The root of a parsed blueprint document. Element lists preserve the
/// surface document's insertion order for diagnostics; names are unique per
/// list (enforced by the surface parser).
#[derive(Debug, Clone, Default)]
pub struct Blueprint {
    pub version: String,
    pub transforms: Vec<String>,
    pub variables: Vec<VariableDefinition>,
    pub resources: Vec<ResourceDefinition>,
    pub data_sources: Vec<DataSourceDefinition>,
    pub includes: Vec<IncludeDefinition>,
    pub exports: Vec<ExportDefinition>,
    pub metadata: Option<MappingNode>,
}

impl Blueprint {
    pub fn resource(&self, name: &str) -> Option<&ResourceDefinition> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn data_source(&self, name: &str) -> Option<&DataSourceDefinition> {
        self.data_sources.iter().find(|d| d.name == name)
    }

    pub fn include(&self, name: &str) -> Option<&IncludeDefinition> {
        self.includes.iter().find(|i| i.name == name)
    }
}

// ─── Resource ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    pub name: String,
    pub type_name: String,
    pub description: Option<String>,
    pub metadata: ResourceMetadata,
    pub link_selector: Option<LinkSelector>,
    pub spec: MappingNode,
    pub source_meta: Option<SourceMeta>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceMetadata {
    pub display_name: Option<String>,
    pub annotations: Vec<(String, MappingNode)>,
    pub labels: Vec<(String, String)>,
    pub custom: Option<MappingNode>,
}

/// Selects link targets by label, e.g. `byLabel: {app: orders}` links this
/// resource to every resource labelled `app: orders`.
#[derive(Debug, Clone, Default)]
pub struct LinkSelector {
    pub by_label: Vec<(String, String)>,
}

impl LinkSelector {
    pub fn matches(&self, labels: &[(String, String)]) -> bool {
        self.by_label.iter().all(|(key, value)| {
            labels
                .iter()
                .any(|(label_key, label_value)| label_key == key && label_value == value)
        })
    }
}

// ─── Variable ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VariableDefinition {
    pub name: String,
    pub var_type: VariableType,
    pub secret: bool,
    pub default: Option<ScalarValue>,
    pub allowed_values: Vec<ScalarValue>,
    pub description: Option<String>,
    pub source_meta: Option<SourceMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableType {
    String,
    Integer,
    Float,
    Boolean,
    /// Resolved through a provider's custom variable type plugin, which
    /// enumerates a finite option set.
    Custom(String),
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableType::String => write!(f, "string"),
            VariableType::Integer => write!(f, "integer"),
            VariableType::Float => write!(f, "float"),
            VariableType::Boolean => write!(f, "boolean"),
            VariableType::Custom(name) => write!(f, "{}", name),
        }
    }
}

// ─── Data Source ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DataSourceDefinition {
    pub name: String,
    pub type_name: String,
    pub metadata: DataSourceMetadata,
    pub filter: Option<DataSourceFilter>,
    pub exports: Vec<DataSourceExport>,
    pub description: Option<String>,
    pub source_meta: Option<SourceMeta>,
}

#[derive(Debug, Clone, Default)]
pub struct DataSourceMetadata {
    pub display_name: Option<String>,
    pub annotations: Vec<(String, MappingNode)>,
}

#[derive(Debug, Clone)]
pub struct DataSourceFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub search: Vec<StringOrSubstitutions>,
    pub source_meta: Option<SourceMeta>,
}

/// The closed set of data source filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    HasKey,
    NotHasKey,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
}

impl FilterOperator {
    pub const ALL: &'static [FilterOperator] = &[
        FilterOperator::Equals,
        FilterOperator::NotEquals,
        FilterOperator::In,
        FilterOperator::NotIn,
        FilterOperator::HasKey,
        FilterOperator::NotHasKey,
        FilterOperator::Contains,
        FilterOperator::NotContains,
        FilterOperator::StartsWith,
        FilterOperator::NotStartsWith,
        FilterOperator::EndsWith,
        FilterOperator::NotEndsWith,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "=",
            FilterOperator::NotEquals => "!=",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not in",
            FilterOperator::HasKey => "has key",
            FilterOperator::NotHasKey => "not has key",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "not contains",
            FilterOperator::StartsWith => "starts with",
            FilterOperator::NotStartsWith => "not starts with",
            FilterOperator::EndsWith => "ends with",
            FilterOperator::NotEndsWith => "not ends with",
        }
    }

    pub fn parse(raw: &str) -> Option<FilterOperator> {
        FilterOperator::ALL.iter().copied().find(|op| op.as_str() == raw)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DataSourceExport {
    pub name: String,
    pub field_type: DataSourceFieldType,
    pub alias_for: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceFieldType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
}

// ─── Export ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExportDefinition {
    pub name: String,
    pub export_type: ExportType,
    /// A reference path into some element of the blueprint, e.g.
    /// `resources.orders.spec.id`.
    pub field: String,
    pub description: Option<String>,
    pub source_meta: Option<SourceMeta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportType {
    String,
    Object,
    Integer,
    Float,
    Array,
    Boolean,
}

// ─── Include (child blueprint) ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IncludeDefinition {
    pub name: String,
    pub path: StringOrSubstitutions,
    pub variables: Option<MappingNode>,
    pub metadata: Option<MappingNode>,
    pub description: Option<String>,
    pub source_meta: Option<SourceMeta>,
}
