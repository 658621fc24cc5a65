use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::callstack::{Call, CallContext};
use super::{
    FunctionDefinition, FunctionValue, Parameter, ParameterKind, Return, ValueType,
};
use crate::errors::ReasonCode;
use crate::schema::mapping::SourceMeta;
use crate::schema::scalar::ScalarValue;

// ─── Errors ─────────────────────────────────────────────────────────────────

/// A function dispatch failure. Carries a snapshot of the call stack at the
/// point of failure, top of stack first, so diagnostics print in natural
/// order.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct FuncCallError {
    pub code: ReasonCode,
    pub message: String,
    pub call_stack: Vec<Call>,
}

impl FuncCallError {
    pub fn new(code: ReasonCode, message: impl Into<String>, context: &CallContext) -> Self {
        Self {
            code,
            message: message.into(),
            call_stack: context.snapshot(),
        }
    }
}

// ─── Function Trait ─────────────────────────────────────────────────────────

/// The input handed to a function implementation on dispatch.
pub struct FunctionCallInput<'a> {
    pub args: Vec<FunctionValue>,
    pub context: &'a CallContext,
    pub registry: &'a FunctionRegistry,
}

/// An interpolation function callable from `${...}` expressions. Providers
/// expose implementations of this trait through their function listings.
#[async_trait]
pub trait BlueprintFunction: Send + Sync {
    fn definition(&self) -> FunctionDefinition;

    async fn call(&self, input: FunctionCallInput<'_>) -> Result<FunctionValue, FuncCallError>;
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// Typed signature checking and runtime dispatch for interpolation
/// functions.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn BlueprintFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the core built-ins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReplaceFunction));
        registry.register(Arc::new(JoinFunction));
        registry.register(Arc::new(LenFunction));
        registry
    }

    pub fn register(&mut self, function: Arc<dyn BlueprintFunction>) {
        let name = function.definition().name;
        self.functions.insert(name, function);
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn list_functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate arguments against the named function's signature and invoke
    /// it. The stack frame is pushed before validation and popped
    /// unconditionally when dispatch finishes, on every exit path.
    pub async fn call(
        &self,
        context: &CallContext,
        name: &str,
        args: Vec<FunctionValue>,
        location: Option<SourceMeta>,
    ) -> Result<FunctionValue, FuncCallError> {
        let function = self.functions.get(name).cloned().ok_or_else(|| {
            FuncCallError::new(
                ReasonCode::FuncCallFunctionNotFound,
                format!("function \"{}\" is not registered", name),
                context,
            )
        })?;

        let _frame = context.enter(name, location);
        let definition = function.definition();
        validate_args(&definition, &args, context)?;

        debug!(function = name, args = args.len(), "dispatching function");
        function
            .call(FunctionCallInput {
                args,
                context,
                registry: self,
            })
            .await
    }
}

/// Check argument count (respecting a trailing variadic) and each argument's
/// type against the corresponding parameter.
fn validate_args(
    definition: &FunctionDefinition,
    args: &[FunctionValue],
    context: &CallContext,
) -> Result<(), FuncCallError> {
    let params = &definition.parameters;
    let variadic = params.last().filter(|p| p.is_variadic());
    let required = if variadic.is_some() {
        params.len() - 1
    } else {
        params.len()
    };

    let count_ok = if variadic.is_some() {
        args.len() >= required
    } else {
        args.len() == required
    };
    if !count_ok {
        return Err(FuncCallError::new(
            ReasonCode::FuncCallArgumentTypeMismatch,
            format!(
                "function \"{}\" expects {}{} arguments, got {}",
                definition.name,
                if variadic.is_some() { "at least " } else { "" },
                required,
                args.len()
            ),
            context,
        ));
    }

    for (i, arg) in args.iter().enumerate() {
        let Some(param) = params.get(i).or(variadic) else {
            continue;
        };
        check_arg(definition, i, arg, param, context)?;
    }

    Ok(())
}

fn check_arg(
    definition: &FunctionDefinition,
    position: usize,
    arg: &FunctionValue,
    param: &Parameter,
    context: &CallContext,
) -> Result<(), FuncCallError> {
    if matches!(arg, FunctionValue::Null) {
        if param.allow_null {
            return Ok(());
        }
        return Err(mismatch(definition, position, "null", param, context));
    }

    let ok = match &param.kind {
        ParameterKind::Scalar(value_type) => arg.satisfies(*value_type),
        ParameterKind::List { element_type } => match arg {
            FunctionValue::List(items) => {
                items.iter().all(|item| item.satisfies(*element_type))
            }
            _ => false,
        },
        ParameterKind::Map { value_type } => match arg {
            FunctionValue::Map(entries) => {
                entries.values().all(|value| value.satisfies(*value_type))
            }
            _ => false,
        },
        ParameterKind::Object { attributes } => match arg {
            FunctionValue::Map(entries) => attributes.iter().all(|(name, value_type)| {
                entries
                    .get(name)
                    .is_some_and(|value| value.satisfies(*value_type))
            }),
            _ => false,
        },
        ParameterKind::Function { .. } => matches!(arg, FunctionValue::FunctionRef(_)),
        ParameterKind::Variadic {
            value_type,
            single_type,
        } => !*single_type || arg.satisfies(*value_type),
        ParameterKind::Any { allowed } => match allowed {
            Some(types) => types.iter().any(|value_type| arg.satisfies(*value_type)),
            None => true,
        },
    };

    if ok {
        Ok(())
    } else {
        Err(mismatch(
            definition,
            position,
            &arg.value_type().to_string(),
            param,
            context,
        ))
    }
}

fn mismatch(
    definition: &FunctionDefinition,
    position: usize,
    got: &str,
    param: &Parameter,
    context: &CallContext,
) -> FuncCallError {
    let expected = match &param.kind {
        ParameterKind::Scalar(value_type) => value_type.to_string(),
        ParameterKind::List { element_type } => format!("list of {}", element_type),
        ParameterKind::Map { value_type } => format!("map of {}", value_type),
        ParameterKind::Object { .. } => "object".to_string(),
        ParameterKind::Function { .. } => "function".to_string(),
        ParameterKind::Variadic { value_type, .. } => value_type.to_string(),
        ParameterKind::Any { .. } => "any".to_string(),
    };
    FuncCallError::new(
        ReasonCode::FuncCallArgumentTypeMismatch,
        format!(
            "argument {} of \"{}\" must be {}, got {}",
            position, definition.name, expected, got
        ),
        context,
    )
}

// ─── Built-ins ──────────────────────────────────────────────────────────────

/// `replace(target, search, replacement)` — substring replacement.
struct ReplaceFunction;

#[async_trait]
impl BlueprintFunction for ReplaceFunction {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "replace".to_string(),
            description: Some(
                "Replaces every occurrence of a substring in the input string.".to_string(),
            ),
            parameters: vec![
                Parameter::scalar(ValueType::String).labelled("target"),
                Parameter::scalar(ValueType::String).labelled("search"),
                Parameter::scalar(ValueType::String).labelled("replacement"),
            ],
            return_type: Return::scalar(ValueType::String),
        }
    }

    async fn call(&self, input: FunctionCallInput<'_>) -> Result<FunctionValue, FuncCallError> {
        let [target, search, replacement] = &input.args[..] else {
            return Err(FuncCallError::new(
                ReasonCode::FuncCallExecutionFailed,
                "replace expects exactly 3 arguments",
                input.context,
            ));
        };
        let (Some(target), Some(search), Some(replacement)) =
            (target.as_str(), search.as_str(), replacement.as_str())
        else {
            return Err(FuncCallError::new(
                ReasonCode::FuncCallInvalidArgumentValue,
                "replace arguments must be strings",
                input.context,
            ));
        };
        Ok(FunctionValue::string(target.replace(search, replacement)))
    }
}

/// `join(separator, items)` — joins a list of strings.
struct JoinFunction;

#[async_trait]
impl BlueprintFunction for JoinFunction {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "join".to_string(),
            description: Some("Joins a list of strings with a separator.".to_string()),
            parameters: vec![
                Parameter::scalar(ValueType::String).labelled("separator"),
                Parameter::list(ValueType::String).labelled("items"),
            ],
            return_type: Return::scalar(ValueType::String),
        }
    }

    async fn call(&self, input: FunctionCallInput<'_>) -> Result<FunctionValue, FuncCallError> {
        let [separator, items] = &input.args[..] else {
            return Err(FuncCallError::new(
                ReasonCode::FuncCallExecutionFailed,
                "join expects exactly 2 arguments",
                input.context,
            ));
        };
        let Some(separator) = separator.as_str() else {
            return Err(FuncCallError::new(
                ReasonCode::FuncCallInvalidArgumentValue,
                "join separator must be a string",
                input.context,
            ));
        };
        let FunctionValue::List(items) = items else {
            return Err(FuncCallError::new(
                ReasonCode::FuncCallInvalidArgumentValue,
                "join items must be a list",
                input.context,
            ));
        };
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            match item.as_str() {
                Some(s) => parts.push(s),
                None => {
                    return Err(FuncCallError::new(
                        ReasonCode::FuncCallInvalidArgumentValue,
                        "join items must all be strings",
                        input.context,
                    ))
                }
            }
        }
        Ok(FunctionValue::string(parts.join(separator)))
    }
}

/// `len(value)` — length of a string, list, or map.
struct LenFunction;

#[async_trait]
impl BlueprintFunction for LenFunction {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "len".to_string(),
            description: Some("Length of a string, list, or map.".to_string()),
            parameters: vec![Parameter {
                label: Some("value".to_string()),
                description: None,
                allow_null: false,
                kind: ParameterKind::Any {
                    allowed: Some(vec![ValueType::String, ValueType::List, ValueType::Map]),
                },
            }],
            return_type: Return::scalar(ValueType::Int64),
        }
    }

    async fn call(&self, input: FunctionCallInput<'_>) -> Result<FunctionValue, FuncCallError> {
        let length = match input.args.first() {
            Some(FunctionValue::Scalar(ScalarValue::String(s))) => s.chars().count(),
            Some(FunctionValue::List(items)) => items.len(),
            Some(FunctionValue::Map(entries)) => entries.len(),
            _ => {
                return Err(FuncCallError::new(
                    ReasonCode::FuncCallInvalidArgumentValue,
                    "len expects a string, list, or map",
                    input.context,
                ))
            }
        };
        Ok(FunctionValue::int(length as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::with_builtins()
    }

    #[tokio::test]
    async fn replace_rewrites_substrings() {
        let ctx = CallContext::new(None);
        let result = registry()
            .call(
                &ctx,
                "replace",
                vec![
                    FunctionValue::string("orders.internal"),
                    FunctionValue::string(".internal"),
                    FunctionValue::string(""),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(result, FunctionValue::string("orders"));
    }

    #[tokio::test]
    async fn unknown_function_reports_not_found() {
        let ctx = CallContext::new(None);
        let err = registry()
            .call(&ctx, "nope", vec![], None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::FuncCallFunctionNotFound);
    }

    #[tokio::test]
    async fn type_mismatch_carries_stack_snapshot() {
        let ctx = CallContext::new(Some("app.blueprint.yaml".to_string()));
        let err = registry()
            .call(
                &ctx,
                "replace",
                vec![
                    FunctionValue::int(1),
                    FunctionValue::string("a"),
                    FunctionValue::string("b"),
                ],
                Some(SourceMeta::new(7, 3)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::FuncCallArgumentTypeMismatch);
        assert_eq!(err.call_stack.len(), 1);
        assert_eq!(err.call_stack[0].function_name, "replace");
        assert_eq!(err.call_stack[0].location, Some(SourceMeta::new(7, 3)));
        // The frame was popped on the error path too.
        assert!(ctx.snapshot().is_empty());
    }

    #[tokio::test]
    async fn join_validates_element_types() {
        let ctx = CallContext::new(None);
        let err = registry()
            .call(
                &ctx,
                "join",
                vec![
                    FunctionValue::string(","),
                    FunctionValue::List(vec![FunctionValue::int(1)]),
                ],
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ReasonCode::FuncCallArgumentTypeMismatch);
    }

    #[tokio::test]
    async fn len_counts_collections() {
        let ctx = CallContext::new(None);
        let result = registry()
            .call(
                &ctx,
                "len",
                vec![FunctionValue::List(vec![
                    FunctionValue::int(1),
                    FunctionValue::int(2),
                ])],
                None,
            )
            .await
            .unwrap();
        assert_eq!(result, FunctionValue::int(2));
    }
}
