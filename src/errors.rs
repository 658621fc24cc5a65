use std::fmt;

use thiserror::Error;

use crate::schema::mapping::SourceMeta;

// ─── Reason Codes ───────────────────────────────────────────────────────────

/// Machine-readable failure categories surfaced to callers. Tooling dispatches
/// on these rather than on error message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    // Validation surface
    InvalidVariable,
    InvalidExport,
    InvalidReference,
    InvalidInclude,
    InvalidResource,
    InvalidDataSource,
    MissingVersion,
    InvalidVersion,
    MissingResources,
    InvalidVariableType,
    InvalidDataSourceFieldType,
    InvalidDataSourceFilterOperator,
    InvalidTransformType,
    InvalidReferenceSubstitution,
    // Function dispatch surface
    FuncCallFunctionNotFound,
    FuncCallArgumentTypeMismatch,
    FuncCallInvalidArgumentValue,
    FuncCallExecutionFailed,
    // Orchestration surface
    Retryable,
    TerminalDeploy,
    TerminalDestroy,
    StabilisationTimeout,
    Cancelled,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InvalidVariable => "invalid_variable",
            ReasonCode::InvalidExport => "invalid_export",
            ReasonCode::InvalidReference => "invalid_reference",
            ReasonCode::InvalidInclude => "invalid_include",
            ReasonCode::InvalidResource => "invalid_resource",
            ReasonCode::InvalidDataSource => "invalid_data_source",
            ReasonCode::MissingVersion => "missing_version",
            ReasonCode::InvalidVersion => "invalid_version",
            ReasonCode::MissingResources => "missing_resources",
            ReasonCode::InvalidVariableType => "invalid_variable_type",
            ReasonCode::InvalidDataSourceFieldType => "invalid_data_source_field_type",
            ReasonCode::InvalidDataSourceFilterOperator => "invalid_data_source_filter_operator",
            ReasonCode::InvalidTransformType => "invalid_transform_type",
            ReasonCode::InvalidReferenceSubstitution => "invalid_reference_substitution",
            ReasonCode::FuncCallFunctionNotFound => "func_call_error_function_not_found",
            ReasonCode::FuncCallArgumentTypeMismatch => "func_call_error_argument_type_mismatch",
            ReasonCode::FuncCallInvalidArgumentValue => "func_call_error_invalid_argument_value",
            ReasonCode::FuncCallExecutionFailed => "func_call_error_execution_failed",
            ReasonCode::Retryable => "retryable",
            ReasonCode::TerminalDeploy => "terminal_deploy",
            ReasonCode::TerminalDestroy => "terminal_destroy",
            ReasonCode::StabilisationTimeout => "stabilisation_timeout",
            ReasonCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Blueprint Load Errors ──────────────────────────────────────────────────

/// A load/validation failure. Child errors nest so a caller sees every issue
/// from a validation pass in one tree; rendering is a pre-order print.
#[derive(Debug, Clone, Error)]
pub struct BlueprintError {
    pub reason_code: ReasonCode,
    pub message: String,
    pub child_errors: Vec<BlueprintError>,
    pub location: Option<SourceMeta>,
}

impl BlueprintError {
    pub fn new(reason_code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            reason_code,
            message: message.into(),
            child_errors: Vec::new(),
            location: None,
        }
    }

    pub fn at(mut self, location: Option<SourceMeta>) -> Self {
        self.location = location;
        self
    }

    pub fn with_children(mut self, children: Vec<BlueprintError>) -> Self {
        self.child_errors = children;
        self
    }

    /// Pre-order walk over this error and every nested child.
    pub fn iter(&self) -> BlueprintErrorIter<'_> {
        BlueprintErrorIter { stack: vec![self] }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        if depth > 0 {
            writeln!(f)?;
        }
        write!(f, "{}[{}]", "  ".repeat(depth), self.reason_code)?;
        if let Some(loc) = &self.location {
            write!(f, " ({}:{})", loc.line, loc.column)?;
        }
        write!(f, " {}", self.message)?;
        for child in &self.child_errors {
            child.render(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for BlueprintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

pub struct BlueprintErrorIter<'a> {
    stack: Vec<&'a BlueprintError>,
}

impl<'a> Iterator for BlueprintErrorIter<'a> {
    type Item = &'a BlueprintError;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        for child in next.child_errors.iter().rev() {
            self.stack.push(child);
        }
        Some(next)
    }
}

// ─── Diagnostics ────────────────────────────────────────────────────────────

/// Non-fatal findings emitted alongside validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub location: Option<SourceMeta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warning,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>, location: Option<SourceMeta>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            message: message.into(),
            location,
        }
    }

    pub fn info(message: impl Into<String>, location: Option<SourceMeta>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            message: message.into(),
            location,
        }
    }
}
