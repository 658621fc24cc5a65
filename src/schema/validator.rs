use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;

use super::blueprint::{
    Blueprint, DataSourceDefinition, DataSourceFieldType, ExportDefinition, FilterOperator,
    IncludeDefinition, ResourceDefinition, VariableDefinition, VariableType, SUPPORTED_VERSIONS,
};
use super::mapping::{MappingNode, MappingNodeValue, SourceMeta};
use super::scalar::ScalarValue;
use crate::errors::{BlueprintError, Diagnostic, ReasonCode};
use crate::provider::CustomVariableType;
use crate::subst::ast::{ElementRef, StringOrSubstitutions, Substitution, SubstitutionValue};
use crate::subst::parser::{parse_substitution, parse_string_or_substitutions, ParseContext};

/// Blueprint element names: no substitutions, no punctuation beyond `_`/`-`.
/// Keeping names static is what makes the reference graph constructible
/// before anything is deployed.
static ELEMENT_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("name pattern compiles"));

/// Names appearing in references may additionally be dotted.
static REFERENCE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*$").expect("reference pattern compiles")
});

// ─── Inputs ─────────────────────────────────────────────────────────────────

/// External context the validator consumes: user-supplied variable values
/// and the custom variable type plugins resolved from providers.
#[derive(Default)]
pub struct ValidationParams {
    pub variable_overrides: HashMap<String, ScalarValue>,
    pub custom_types: HashMap<String, Arc<dyn CustomVariableType>>,
}

/// The element categories a substitution can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefCategory {
    Variable,
    DataSource,
    Resource,
    Child,
}

fn all_categories() -> HashSet<RefCategory> {
    HashSet::from([
        RefCategory::Variable,
        RefCategory::DataSource,
        RefCategory::Resource,
        RefCategory::Child,
    ])
}

// ─── Top-Level Validation ───────────────────────────────────────────────────

/// Validate the whole blueprint. Every issue found is aggregated into one
/// error tree so a caller sees them all in a single pass.
pub async fn validate_blueprint(
    blueprint: &Blueprint,
    params: &ValidationParams,
) -> (Vec<Diagnostic>, Result<(), BlueprintError>) {
    let mut diagnostics = Vec::new();
    let mut errors = Vec::new();

    errors.extend(validate_version(blueprint));
    errors.extend(validate_transforms(blueprint));

    if blueprint.resources.is_empty() {
        errors.push(BlueprintError::new(
            ReasonCode::MissingResources,
            "a blueprint must define at least one resource",
        ));
    }

    for variable in &blueprint.variables {
        if !ELEMENT_NAME_PATTERN.is_match(&variable.name) {
            errors.push(
                BlueprintError::new(
                    ReasonCode::InvalidVariable,
                    format!("\"{}\" is not a valid variable name", variable.name),
                )
                .at(variable.source_meta),
            );
            continue;
        }
        let override_value = params.variable_overrides.get(&variable.name);
        let (var_diagnostics, result) =
            validate_core_variable(variable, override_value, &params.custom_types).await;
        diagnostics.extend(var_diagnostics);
        if let Err(err) = result {
            errors.push(err);
        }
    }

    for resource in &blueprint.resources {
        errors.extend(validate_resource(resource, blueprint));
    }

    for data_source in &blueprint.data_sources {
        errors.extend(validate_data_source(data_source, blueprint));
    }

    for export in &blueprint.exports {
        errors.extend(validate_export(export, blueprint));
    }

    for include in &blueprint.includes {
        errors.extend(validate_include(include, blueprint));
    }

    if errors.is_empty() {
        (diagnostics, Ok(()))
    } else {
        let count = errors.iter().map(|e| 1 + e.child_errors.len()).sum::<usize>();
        let root_code = errors[0].reason_code;
        let root = BlueprintError::new(
            root_code,
            format!("blueprint failed validation with {} issue(s)", count),
        )
        .with_children(errors);
        (diagnostics, Err(root))
    }
}

fn validate_version(blueprint: &Blueprint) -> Vec<BlueprintError> {
    if blueprint.version.trim().is_empty() {
        return vec![BlueprintError::new(
            ReasonCode::MissingVersion,
            "a blueprint must declare a version",
        )];
    }
    if !SUPPORTED_VERSIONS.contains(&blueprint.version.as_str()) {
        return vec![BlueprintError::new(
            ReasonCode::InvalidVersion,
            format!(
                "version \"{}\" is not supported, expected one of: {}",
                blueprint.version,
                SUPPORTED_VERSIONS.join(", ")
            ),
        )];
    }
    Vec::new()
}

fn validate_transforms(blueprint: &Blueprint) -> Vec<BlueprintError> {
    blueprint
        .transforms
        .iter()
        .filter(|t| t.trim().is_empty())
        .map(|_| {
            BlueprintError::new(
                ReasonCode::InvalidTransformType,
                "transform entries must be non-empty strings",
            )
        })
        .collect()
}

// ─── Variables ──────────────────────────────────────────────────────────────

/// Validate one variable definition against an optional user-provided value
/// and resolve the effective value.
pub async fn validate_core_variable(
    variable: &VariableDefinition,
    override_value: Option<&ScalarValue>,
    custom_types: &HashMap<String, Arc<dyn CustomVariableType>>,
) -> (Vec<Diagnostic>, Result<ScalarValue, BlueprintError>) {
    let mut diagnostics = Vec::new();
    if variable.secret && variable.default.is_some() {
        diagnostics.push(Diagnostic::warning(
            format!(
                "variable \"{}\" is marked secret; prefer supplying it at deploy time over a default",
                variable.name
            ),
            variable.source_meta,
        ));
    }

    let result = match &variable.var_type {
        VariableType::String => validate_string_variable(variable, override_value),
        VariableType::Integer => validate_numeric_variable(
            variable,
            override_value,
            "integer",
            |v| matches!(v, ScalarValue::Int(_)),
            ScalarValue::Int(0),
        ),
        VariableType::Float => validate_numeric_variable(
            variable,
            override_value,
            "float",
            |v| matches!(v, ScalarValue::Float(_)),
            ScalarValue::Float(0.0),
        ),
        VariableType::Boolean => validate_boolean_variable(variable, override_value),
        VariableType::Custom(type_name) => {
            validate_custom_variable(variable, override_value, type_name, custom_types).await
        }
    };

    (diagnostics, result)
}

fn invalid_variable(variable: &VariableDefinition, message: String) -> BlueprintError {
    BlueprintError::new(ReasonCode::InvalidVariable, message).at(variable.source_meta)
}

fn check_allowed(
    variable: &VariableDefinition,
    resolved: &ScalarValue,
) -> Result<(), BlueprintError> {
    if variable.allowed_values.is_empty() || variable.allowed_values.contains(resolved) {
        return Ok(());
    }
    let allowed = variable
        .allowed_values
        .iter()
        .map(|v| format!("\"{}\"", v))
        .collect::<Vec<_>>()
        .join(", ");
    Err(invalid_variable(
        variable,
        format!(
            "value \"{}\" provided for variable \"{}\" is not one of the allowed values: {}",
            resolved, variable.name, allowed
        ),
    ))
}

fn validate_string_variable(
    variable: &VariableDefinition,
    override_value: Option<&ScalarValue>,
) -> Result<ScalarValue, BlueprintError> {
    if let Some(default) = &variable.default {
        match default {
            ScalarValue::String(s) if !s.trim().is_empty() => {}
            _ => {
                return Err(invalid_variable(
                    variable,
                    format!(
                        "default value for string variable \"{}\" must be a non-empty string",
                        variable.name
                    ),
                ))
            }
        }
    }
    for value in &variable.allowed_values {
        if !matches!(value, ScalarValue::String(_)) {
            return Err(invalid_variable(
                variable,
                format!(
                    "allowed values for string variable \"{}\" must all be strings",
                    variable.name
                ),
            ));
        }
    }

    if let Some(value) = override_value {
        match value {
            ScalarValue::String(s) if s.is_empty() => {
                return Err(invalid_variable(
                    variable,
                    format!("an empty string is not a valid value for variable \"{}\"", variable.name),
                ))
            }
            ScalarValue::String(_) => {}
            other => {
                return Err(invalid_variable(
                    variable,
                    format!(
                        "variable \"{}\" expects a string, got {}",
                        variable.name,
                        other.type_name()
                    ),
                ))
            }
        }
    }

    let resolved = override_value.or(variable.default.as_ref()).cloned();
    match resolved {
        Some(value) => {
            check_allowed(variable, &value)?;
            Ok(value)
        }
        None => Err(invalid_variable(
            variable,
            format!("a value must be provided for variable \"{}\"", variable.name),
        )),
    }
}

fn validate_numeric_variable(
    variable: &VariableDefinition,
    override_value: Option<&ScalarValue>,
    type_label: &str,
    matches_type: impl Fn(&ScalarValue) -> bool,
    empty_value: ScalarValue,
) -> Result<ScalarValue, BlueprintError> {
    if let Some(default) = &variable.default {
        if !matches_type(default) {
            return Err(invalid_variable(
                variable,
                format!(
                    "default value for {} variable \"{}\" must be {}",
                    type_label, variable.name, type_label
                ),
            ));
        }
    }
    for value in &variable.allowed_values {
        if !matches_type(value) {
            return Err(invalid_variable(
                variable,
                format!(
                    "allowed values for {} variable \"{}\" must all be {}s",
                    type_label, variable.name, type_label
                ),
            ));
        }
    }
    if let Some(value) = override_value {
        if !matches_type(value) {
            return Err(invalid_variable(
                variable,
                format!(
                    "variable \"{}\" expects {}, got {}",
                    variable.name,
                    type_label,
                    value.type_name()
                ),
            ));
        }
    }

    // An absent numeric value resolves to zero.
    let resolved = override_value
        .or(variable.default.as_ref())
        .cloned()
        .unwrap_or(empty_value);
    check_allowed(variable, &resolved)?;
    Ok(resolved)
}

fn validate_boolean_variable(
    variable: &VariableDefinition,
    override_value: Option<&ScalarValue>,
) -> Result<ScalarValue, BlueprintError> {
    if !variable.allowed_values.is_empty() {
        return Err(invalid_variable(
            variable,
            format!(
                "allowed values are not supported for boolean variable \"{}\"",
                variable.name
            ),
        ));
    }
    if let Some(default) = &variable.default {
        if !matches!(default, ScalarValue::Bool(_)) {
            return Err(invalid_variable(
                variable,
                format!(
                    "default value for boolean variable \"{}\" must be a boolean",
                    variable.name
                ),
            ));
        }
    }
    if let Some(value) = override_value {
        if !matches!(value, ScalarValue::Bool(_)) {
            return Err(invalid_variable(
                variable,
                format!(
                    "variable \"{}\" expects a boolean, got {}",
                    variable.name,
                    value.type_name()
                ),
            ));
        }
    }

    Ok(override_value
        .or(variable.default.as_ref())
        .cloned()
        .unwrap_or(ScalarValue::Bool(false)))
}

async fn validate_custom_variable(
    variable: &VariableDefinition,
    override_value: Option<&ScalarValue>,
    type_name: &str,
    custom_types: &HashMap<String, Arc<dyn CustomVariableType>>,
) -> Result<ScalarValue, BlueprintError> {
    let plugin = custom_types.get(type_name).ok_or_else(|| {
        BlueprintError::new(
            ReasonCode::InvalidVariableType,
            format!(
                "no provider implements custom variable type \"{}\" used by variable \"{}\"",
                type_name, variable.name
            ),
        )
        .at(variable.source_meta)
    })?;

    let options = plugin.options().await.map_err(|err| {
        BlueprintError::new(
            ReasonCode::InvalidVariableType,
            format!(
                "failed to load options for custom variable type \"{}\": {}",
                type_name, err
            ),
        )
        .at(variable.source_meta)
    })?;

    // Options must share a single scalar variant.
    let mut variants = options.values();
    if let Some(first) = variants.next() {
        if variants.any(|value| !value.same_variant(first)) {
            return Err(BlueprintError::new(
                ReasonCode::InvalidVariableType,
                format!(
                    "custom variable type \"{}\" returned options of mixed scalar types",
                    type_name
                ),
            )
            .at(variable.source_meta));
        }
    }

    let label_of = |value: &ScalarValue| -> Result<String, BlueprintError> {
        match value {
            ScalarValue::String(label) if options.contains_key(label) => Ok(label.clone()),
            other => Err(invalid_variable(
                variable,
                format!(
                    "\"{}\" is not an option of custom variable type \"{}\"",
                    other, type_name
                ),
            )),
        }
    };

    if let Some(default) = &variable.default {
        label_of(default)?;
    }
    for allowed in &variable.allowed_values {
        label_of(allowed)?;
    }

    let resolved = override_value.or(variable.default.as_ref()).cloned();
    match resolved {
        Some(value) => {
            label_of(&value)?;
            check_allowed(variable, &value)?;
            Ok(value)
        }
        None => Err(invalid_variable(
            variable,
            format!("a value must be provided for variable \"{}\"", variable.name),
        )),
    }
}

// ─── References ─────────────────────────────────────────────────────────────

/// Validate every reference inside an interpolated string: the referenced
/// category must be in the caller's access set, the textual form must match
/// the reference name pattern, and the target element must exist.
fn validate_references(
    owner: &str,
    interp: &StringOrSubstitutions,
    blueprint: &Blueprint,
    has_access_to: &HashSet<RefCategory>,
    location: Option<SourceMeta>,
) -> Vec<BlueprintError> {
    let mut errors = Vec::new();
    for substitution in interp.substitutions() {
        collect_reference_errors(owner, substitution, blueprint, has_access_to, location, &mut errors);
    }
    errors
}

fn collect_reference_errors(
    owner: &str,
    substitution: &Substitution,
    blueprint: &Blueprint,
    has_access_to: &HashSet<RefCategory>,
    location: Option<SourceMeta>,
    out: &mut Vec<BlueprintError>,
) {
    let location = substitution.source_meta.or(location);
    if let SubstitutionValue::FunctionCall { args, .. } = &substitution.value {
        for arg in args {
            collect_reference_errors(owner, arg, blueprint, has_access_to, location, out);
        }
        return;
    }

    for element_ref in substitution.referenced_elements() {
        let (category, name, exists) = match &element_ref {
            ElementRef::Variable(name) => (
                RefCategory::Variable,
                name.clone(),
                blueprint.variable(name).is_some(),
            ),
            ElementRef::DataSource(name) => (
                RefCategory::DataSource,
                name.clone(),
                blueprint.data_source(name).is_some(),
            ),
            ElementRef::Resource(name) => (
                RefCategory::Resource,
                name.clone(),
                blueprint.resource(name).is_some(),
            ),
            ElementRef::Child(name) => (
                RefCategory::Child,
                name.clone(),
                blueprint.include(name).is_some(),
            ),
        };

        if !has_access_to.contains(&category) {
            out.push(
                BlueprintError::new(
                    ReasonCode::InvalidReference,
                    format!(
                        "{} cannot reference {}",
                        owner,
                        element_ref.element_name()
                    ),
                )
                .at(location),
            );
            continue;
        }
        if !REFERENCE_NAME_PATTERN.is_match(&name) {
            out.push(
                BlueprintError::new(
                    ReasonCode::InvalidReference,
                    format!("\"{}\" is not a valid reference name", name),
                )
                .at(location),
            );
            continue;
        }
        if !exists {
            out.push(
                BlueprintError::new(
                    ReasonCode::InvalidReference,
                    format!(
                        "{} references {}, which is not defined in the blueprint",
                        owner,
                        element_ref.element_name()
                    ),
                )
                .at(location),
            );
        }
    }
}

/// Collect every interpolated string in a mapping tree, with the closest
/// source location.
fn collect_interpolations<'a>(
    node: &'a MappingNode,
    out: &mut Vec<(&'a StringOrSubstitutions, Option<SourceMeta>)>,
) {
    match &node.value {
        MappingNodeValue::StringWithSubstitutions(interp) => {
            out.push((interp, node.source_meta));
        }
        MappingNodeValue::Fields(entries) => {
            for (_, child) in entries {
                collect_interpolations(child, out);
            }
        }
        MappingNodeValue::Items(items) => {
            for child in items {
                collect_interpolations(child, out);
            }
        }
        MappingNodeValue::Scalar(_) => {}
    }
}

// ─── Resources ──────────────────────────────────────────────────────────────

fn validate_resource(resource: &ResourceDefinition, blueprint: &Blueprint) -> Vec<BlueprintError> {
    let mut errors = Vec::new();

    // Names carrying substitutions would make the reference graph dynamic.
    if resource.name.contains("${") {
        errors.push(
            BlueprintError::new(
                ReasonCode::InvalidResource,
                format!(
                    "resource name \"{}\" must not contain substitutions",
                    resource.name
                ),
            )
            .at(resource.source_meta),
        );
    } else if !ELEMENT_NAME_PATTERN.is_match(&resource.name) {
        errors.push(
            BlueprintError::new(
                ReasonCode::InvalidResource,
                format!("\"{}\" is not a valid resource name", resource.name),
            )
            .at(resource.source_meta),
        );
    }

    if resource.type_name.trim().is_empty() {
        errors.push(
            BlueprintError::new(
                ReasonCode::InvalidResource,
                format!("resource \"{}\" must declare a type", resource.name),
            )
            .at(resource.source_meta),
        );
    }

    let owner = format!("resource \"{}\"", resource.name);
    let access = all_categories();
    let mut interps = Vec::new();
    collect_interpolations(&resource.spec, &mut interps);
    for (_, annotation) in &resource.metadata.annotations {
        collect_interpolations(annotation, &mut interps);
    }
    if let Some(custom) = &resource.metadata.custom {
        collect_interpolations(custom, &mut interps);
    }
    for (interp, location) in interps {
        errors.extend(validate_references(&owner, interp, blueprint, &access, location));
    }

    errors
}

// ─── Data Sources ───────────────────────────────────────────────────────────

fn validate_data_source(
    data_source: &DataSourceDefinition,
    blueprint: &Blueprint,
) -> Vec<BlueprintError> {
    let mut errors = Vec::new();
    let owner = format!("data source \"{}\"", data_source.name);

    if !ELEMENT_NAME_PATTERN.is_match(&data_source.name) {
        errors.push(
            BlueprintError::new(
                ReasonCode::InvalidDataSource,
                format!("\"{}\" is not a valid data source name", data_source.name),
            )
            .at(data_source.source_meta),
        );
    }

    match &data_source.filter {
        None => errors.push(
            BlueprintError::new(
                ReasonCode::InvalidDataSource,
                format!("{} must define a filter", owner),
            )
            .at(data_source.source_meta),
        ),
        Some(filter) => {
            if filter.field.trim().is_empty() {
                errors.push(
                    BlueprintError::new(
                        ReasonCode::InvalidDataSource,
                        format!("{} filter must name a field", owner),
                    )
                    .at(filter.source_meta),
                );
            }
            if filter.search.is_empty() {
                errors.push(
                    BlueprintError::new(
                        ReasonCode::InvalidDataSource,
                        format!("{} filter must provide at least one search value", owner),
                    )
                    .at(filter.source_meta),
                );
            }
            // Filters run before any resource is deployed, so they may only
            // draw on variables.
            let access = HashSet::from([RefCategory::Variable]);
            for interp in &filter.search {
                errors.extend(validate_references(
                    &owner,
                    interp,
                    blueprint,
                    &access,
                    filter.source_meta,
                ));
            }
        }
    }

    if data_source.exports.is_empty() {
        errors.push(
            BlueprintError::new(
                ReasonCode::InvalidDataSource,
                format!("{} must define at least one export", owner),
            )
            .at(data_source.source_meta),
        );
    }

    errors
}

/// Resolve a raw operator string to the closed operator set. Surface loaders
/// call this before constructing a filter.
pub fn validate_filter_operator(raw: &str) -> Result<FilterOperator, BlueprintError> {
    FilterOperator::parse(raw).ok_or_else(|| {
        let allowed = FilterOperator::ALL
            .iter()
            .map(|op| format!("\"{}\"", op))
            .collect::<Vec<_>>()
            .join(", ");
        BlueprintError::new(
            ReasonCode::InvalidDataSourceFilterOperator,
            format!("\"{}\" is not a filter operator, expected one of: {}", raw, allowed),
        )
    })
}

/// Resolve a raw data source export field type.
pub fn validate_data_source_field_type(raw: &str) -> Result<DataSourceFieldType, BlueprintError> {
    match raw {
        "string" => Ok(DataSourceFieldType::String),
        "integer" => Ok(DataSourceFieldType::Integer),
        "float" => Ok(DataSourceFieldType::Float),
        "boolean" => Ok(DataSourceFieldType::Boolean),
        "array" => Ok(DataSourceFieldType::Array),
        "object" => Ok(DataSourceFieldType::Object),
        other => Err(BlueprintError::new(
            ReasonCode::InvalidDataSourceFieldType,
            format!(
                "\"{}\" is not a data source field type, expected one of: string, integer, float, boolean, array, object",
                other
            ),
        )),
    }
}

// ─── Exports ────────────────────────────────────────────────────────────────

fn validate_export(export: &ExportDefinition, blueprint: &Blueprint) -> Vec<BlueprintError> {
    let mut errors = Vec::new();
    let owner = format!("export \"{}\"", export.name);

    if export.field.trim().is_empty() {
        errors.push(
            BlueprintError::new(
                ReasonCode::InvalidExport,
                format!("{} must declare a field path", owner),
            )
            .at(export.source_meta),
        );
        return errors;
    }

    let ctx = export
        .source_meta
        .map(|meta| ParseContext::new(meta.line, meta.column))
        .unwrap_or_default();
    let (parsed, parse_errors) = parse_substitution(&export.field, &ctx);
    if !parse_errors.is_empty() {
        errors.push(
            BlueprintError::new(
                ReasonCode::InvalidExport,
                format!(
                    "{} field \"{}\" is not a valid reference",
                    owner, export.field
                ),
            )
            .at(export.source_meta)
            .with_children(
                parse_errors
                    .into_iter()
                    .map(|e| {
                        BlueprintError::new(ReasonCode::InvalidReferenceSubstitution, e.message)
                            .at(e.location)
                    })
                    .collect(),
            ),
        );
        return errors;
    }

    match parsed {
        Some(sub)
            if !matches!(
                sub.value,
                SubstitutionValue::Literal(_) | SubstitutionValue::FunctionCall { .. }
            ) =>
        {
            let access = all_categories();
            collect_reference_errors(
                &owner,
                &sub,
                blueprint,
                &access,
                export.source_meta,
                &mut errors,
            );
        }
        _ => errors.push(
            BlueprintError::new(
                ReasonCode::InvalidExport,
                format!(
                    "{} field \"{}\" must reference a resource, variable, data source, or child",
                    owner, export.field
                ),
            )
            .at(export.source_meta),
        ),
    }

    errors
}

// ─── Includes ───────────────────────────────────────────────────────────────

fn validate_include(include: &IncludeDefinition, blueprint: &Blueprint) -> Vec<BlueprintError> {
    let mut errors = Vec::new();
    let owner = format!("include \"{}\"", include.name);

    if !ELEMENT_NAME_PATTERN.is_match(&include.name) {
        errors.push(
            BlueprintError::new(
                ReasonCode::InvalidInclude,
                format!("\"{}\" is not a valid include name", include.name),
            )
            .at(include.source_meta),
        );
    }

    if include.path.values.is_empty() {
        errors.push(
            BlueprintError::new(
                ReasonCode::InvalidInclude,
                format!("{} must declare a path", owner),
            )
            .at(include.source_meta),
        );
    } else {
        let access = all_categories();
        errors.extend(validate_references(
            &owner,
            &include.path,
            blueprint,
            &access,
            include.source_meta,
        ));
    }

    if let Some(variables) = &include.variables {
        let access = all_categories();
        let mut interps = Vec::new();
        collect_interpolations(variables, &mut interps);
        for (interp, location) in interps {
            errors.extend(validate_references(&owner, interp, blueprint, &access, location));
        }
    }

    errors
}

// ─── Surface Helpers ────────────────────────────────────────────────────────

/// Upgrade string scalars containing `${...}` into interpolated nodes,
/// recursively. Surface loaders run this over freshly deserialized trees;
/// parse failures surface as reference substitution errors.
pub fn parse_mapping_interpolations(
    node: &mut MappingNode,
) -> Vec<BlueprintError> {
    let mut errors = Vec::new();
    upgrade_node(node, &mut errors);
    errors
}

fn upgrade_node(node: &mut MappingNode, errors: &mut Vec<BlueprintError>) {
    match &mut node.value {
        MappingNodeValue::Scalar(ScalarValue::String(s)) if s.contains("${") => {
            let ctx = node
                .source_meta
                .map(|meta| ParseContext::new(meta.line, meta.column))
                .unwrap_or_default();
            let (interp, parse_errors) = parse_string_or_substitutions(s, &ctx);
            errors.extend(parse_errors.into_iter().map(|e| {
                BlueprintError::new(ReasonCode::InvalidReferenceSubstitution, e.message)
                    .at(e.location)
            }));
            node.value = MappingNodeValue::StringWithSubstitutions(interp);
        }
        MappingNodeValue::Fields(entries) => {
            for (_, child) in entries {
                upgrade_node(child, errors);
            }
        }
        MappingNodeValue::Items(items) => {
            for child in items {
                upgrade_node(child, errors);
            }
        }
        _ => {}
    }
}
