pub mod callstack;
pub mod registry;

use std::collections::HashMap;
use std::fmt;

use crate::schema::scalar::ScalarValue;

// ─── Type Vocabulary ────────────────────────────────────────────────────────

/// The closed set of types a function signature can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Bool,
    List,
    Map,
    Object,
    Function,
    Any,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::Int32 => "int32",
            ValueType::Int64 => "int64",
            ValueType::Uint32 => "uint32",
            ValueType::Uint64 => "uint64",
            ValueType::Float32 => "float32",
            ValueType::Float64 => "float64",
            ValueType::Bool => "bool",
            ValueType::List => "list",
            ValueType::Map => "map",
            ValueType::Object => "object",
            ValueType::Function => "function",
            ValueType::Any => "any",
        };
        write!(f, "{}", name)
    }
}

// ─── Signatures ─────────────────────────────────────────────────────────────

/// One parameter of a function signature. Shared metadata sits on the struct;
/// the kind is a tagged union over the concrete parameter shapes.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub label: Option<String>,
    pub description: Option<String>,
    pub allow_null: bool,
    pub kind: ParameterKind,
}

#[derive(Debug, Clone)]
pub enum ParameterKind {
    Scalar(ValueType),
    List { element_type: ValueType },
    Map { value_type: ValueType },
    Object { attributes: Vec<(String, ValueType)> },
    Function { signature: Box<FunctionSignature> },
    /// A trailing variadic. `single_type` requires every trailing argument
    /// to share `value_type`; otherwise any type is accepted.
    Variadic { value_type: ValueType, single_type: bool },
    Any { allowed: Option<Vec<ValueType>> },
}

impl Parameter {
    pub fn scalar(value_type: ValueType) -> Self {
        Self {
            label: None,
            description: None,
            allow_null: false,
            kind: ParameterKind::Scalar(value_type),
        }
    }

    pub fn list(element_type: ValueType) -> Self {
        Self {
            label: None,
            description: None,
            allow_null: false,
            kind: ParameterKind::List { element_type },
        }
    }

    pub fn variadic(value_type: ValueType, single_type: bool) -> Self {
        Self {
            label: None,
            description: None,
            allow_null: false,
            kind: ParameterKind::Variadic {
                value_type,
                single_type,
            },
        }
    }

    pub fn any() -> Self {
        Self {
            label: None,
            description: None,
            allow_null: false,
            kind: ParameterKind::Any { allowed: None },
        }
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn is_variadic(&self) -> bool {
        matches!(self.kind, ParameterKind::Variadic { .. })
    }
}

/// Return types mirror parameters, minus variadics.
#[derive(Debug, Clone)]
pub struct Return {
    pub description: Option<String>,
    pub kind: ReturnKind,
}

#[derive(Debug, Clone)]
pub enum ReturnKind {
    Scalar(ValueType),
    List { element_type: ValueType },
    Map { value_type: ValueType },
    Object { attributes: Vec<(String, ValueType)> },
    Function { signature: Box<FunctionSignature> },
    Any,
}

impl Return {
    pub fn scalar(value_type: ValueType) -> Self {
        Self {
            description: None,
            kind: ReturnKind::Scalar(value_type),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub parameters: Vec<Parameter>,
    pub return_type: Return,
}

/// A named function's full signature as exposed by the registry.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Vec<Parameter>,
    pub return_type: Return,
}

// ─── Runtime Values ─────────────────────────────────────────────────────────

/// A value flowing through function dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionValue {
    Scalar(ScalarValue),
    List(Vec<FunctionValue>),
    Map(HashMap<String, FunctionValue>),
    /// A reference to a named function, for higher-order parameters.
    FunctionRef(String),
    Null,
}

impl FunctionValue {
    pub fn string(value: impl Into<String>) -> Self {
        FunctionValue::Scalar(ScalarValue::String(value.into()))
    }

    pub fn int(value: i64) -> Self {
        FunctionValue::Scalar(ScalarValue::Int(value))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FunctionValue::Scalar(ScalarValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// The vocabulary type this value inhabits.
    pub fn value_type(&self) -> ValueType {
        match self {
            FunctionValue::Scalar(ScalarValue::String(_)) => ValueType::String,
            FunctionValue::Scalar(ScalarValue::Int(_)) => ValueType::Int64,
            FunctionValue::Scalar(ScalarValue::Float(_)) => ValueType::Float64,
            FunctionValue::Scalar(ScalarValue::Bool(_)) => ValueType::Bool,
            FunctionValue::List(_) => ValueType::List,
            FunctionValue::Map(_) => ValueType::Map,
            FunctionValue::FunctionRef(_) => ValueType::Function,
            FunctionValue::Null => ValueType::Any,
        }
    }

    /// Whether this value satisfies the named vocabulary type.
    pub fn satisfies(&self, expected: ValueType) -> bool {
        match expected {
            ValueType::Any => true,
            // Narrow integer/float widths all accept the corresponding
            // 64-bit runtime representation.
            ValueType::Int32 | ValueType::Uint32 | ValueType::Uint64 => {
                self.value_type() == ValueType::Int64
            }
            ValueType::Float32 => self.value_type() == ValueType::Float64,
            ValueType::Object => matches!(self.value_type(), ValueType::Map | ValueType::Object),
            other => self.value_type() == other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_types_follow_runtime_shape() {
        assert_eq!(FunctionValue::string("a").value_type(), ValueType::String);
        assert_eq!(FunctionValue::int(1).value_type(), ValueType::Int64);
        assert_eq!(
            FunctionValue::List(vec![]).value_type(),
            ValueType::List
        );
        assert_eq!(
            FunctionValue::Map(HashMap::new()).value_type(),
            ValueType::Map
        );
    }

    #[test]
    fn narrow_widths_accept_wide_runtime_values() {
        assert!(FunctionValue::int(7).satisfies(ValueType::Int32));
        assert!(FunctionValue::int(7).satisfies(ValueType::Uint64));
        assert!(!FunctionValue::string("7").satisfies(ValueType::Int64));
        assert!(FunctionValue::Null.satisfies(ValueType::Any));
    }
}
