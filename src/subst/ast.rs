use std::fmt;

use crate::schema::mapping::{PathItem, SourceMeta};
use crate::schema::scalar::ScalarValue;

// ─── Substitution AST ───────────────────────────────────────────────────────

/// A parsed `${...}` expression with the source coordinates of its first
/// token, offset from the enclosing string's position.
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub value: SubstitutionValue,
    pub source_meta: Option<SourceMeta>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubstitutionValue {
    Variable {
        name: String,
    },
    DataSourceProperty {
        data_source_name: String,
        field_name: String,
        primitive_arr_index: Option<usize>,
    },
    ResourceProperty {
        resource_name: String,
        path: Vec<PathItem>,
    },
    Child {
        child_name: String,
        path: Vec<PathItem>,
    },
    FunctionCall {
        name: String,
        args: Vec<Substitution>,
    },
    Literal(ScalarValue),
}

impl Substitution {
    pub fn new(value: SubstitutionValue, source_meta: Option<SourceMeta>) -> Self {
        Self { value, source_meta }
    }

    /// The blueprint element this substitution refers to, if any. Function
    /// call arguments are walked recursively; literals refer to nothing.
    pub fn referenced_elements(&self) -> Vec<ElementRef> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs(&self, out: &mut Vec<ElementRef>) {
        match &self.value {
            SubstitutionValue::Variable { name } => {
                out.push(ElementRef::Variable(name.clone()));
            }
            SubstitutionValue::DataSourceProperty {
                data_source_name, ..
            } => {
                out.push(ElementRef::DataSource(data_source_name.clone()));
            }
            SubstitutionValue::ResourceProperty { resource_name, .. } => {
                out.push(ElementRef::Resource(resource_name.clone()));
            }
            SubstitutionValue::Child { child_name, .. } => {
                out.push(ElementRef::Child(child_name.clone()));
            }
            SubstitutionValue::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_refs(out);
                }
            }
            SubstitutionValue::Literal(_) => {}
        }
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            SubstitutionValue::Variable { name } => write!(f, "variables.{}", name),
            SubstitutionValue::DataSourceProperty {
                data_source_name,
                field_name,
                primitive_arr_index,
            } => {
                write!(f, "datasources.{}.{}", data_source_name, field_name)?;
                if let Some(i) = primitive_arr_index {
                    write!(f, "[{}]", i)?;
                }
                Ok(())
            }
            SubstitutionValue::ResourceProperty {
                resource_name,
                path,
            } => {
                write!(f, "resources.{}", resource_name)?;
                for item in path {
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            SubstitutionValue::Child { child_name, path } => {
                write!(f, "children.{}", child_name)?;
                for item in path {
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            SubstitutionValue::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            SubstitutionValue::Literal(ScalarValue::String(s)) => {
                write!(f, "\"{}\"", s.replace('"', "\\\""))
            }
            SubstitutionValue::Literal(scalar) => write!(f, "{}", scalar),
        }
    }
}

/// A reference to another blueprint element, extracted from a substitution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementRef {
    Variable(String),
    DataSource(String),
    Resource(String),
    Child(String),
}

impl ElementRef {
    /// The qualified element name used as a reference-graph node label.
    pub fn element_name(&self) -> String {
        match self {
            ElementRef::Variable(name) => format!("variables.{}", name),
            ElementRef::DataSource(name) => format!("datasources.{}", name),
            ElementRef::Resource(name) => format!("resources.{}", name),
            ElementRef::Child(name) => format!("children.{}", name),
        }
    }
}

// ─── Interpolated Strings ───────────────────────────────────────────────────

/// An ordered sequence of literal fragments and substitutions. Concatenating
/// every fragment with each evaluated substitution yields the final string.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StringOrSubstitutions {
    pub values: Vec<StringOrSubstitution>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringOrSubstitution {
    StringValue(String),
    Substitution(Substitution),
}

impl StringOrSubstitutions {
    /// Whether the string contains no substitutions at all.
    pub fn is_plain(&self) -> bool {
        self.values
            .iter()
            .all(|v| matches!(v, StringOrSubstitution::StringValue(_)))
    }

    pub fn substitutions(&self) -> impl Iterator<Item = &Substitution> {
        self.values.iter().filter_map(|v| match v {
            StringOrSubstitution::Substitution(sub) => Some(sub),
            StringOrSubstitution::StringValue(_) => None,
        })
    }

    /// Reconstruct the source form, wrapping substitutions back in `${...}`.
    pub fn to_source_string(&self) -> String {
        let mut out = String::new();
        for value in &self.values {
            match value {
                StringOrSubstitution::StringValue(s) => out.push_str(s),
                StringOrSubstitution::Substitution(sub) => {
                    out.push_str("${");
                    out.push_str(&sub.to_string());
                    out.push('}');
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_reference_forms() {
        let sub = Substitution::new(
            SubstitutionValue::ResourceProperty {
                resource_name: "orders".to_string(),
                path: vec![
                    PathItem::FieldName("spec".to_string()),
                    PathItem::FieldName("ports".to_string()),
                    PathItem::ArrayIndex(0),
                ],
            },
            None,
        );
        assert_eq!(sub.to_string(), "resources.orders.spec.ports[0]");
    }

    #[test]
    fn referenced_elements_walks_function_args() {
        let sub = Substitution::new(
            SubstitutionValue::FunctionCall {
                name: "join".to_string(),
                args: vec![
                    Substitution::new(
                        SubstitutionValue::Variable {
                            name: "region".to_string(),
                        },
                        None,
                    ),
                    Substitution::new(
                        SubstitutionValue::Literal(ScalarValue::String("-".to_string())),
                        None,
                    ),
                    Substitution::new(
                        SubstitutionValue::DataSourceProperty {
                            data_source_name: "network".to_string(),
                            field_name: "vpc".to_string(),
                            primitive_arr_index: None,
                        },
                        None,
                    ),
                ],
            },
            None,
        );
        assert_eq!(
            sub.referenced_elements(),
            vec![
                ElementRef::Variable("region".to_string()),
                ElementRef::DataSource("network".to_string()),
            ]
        );
    }
}
