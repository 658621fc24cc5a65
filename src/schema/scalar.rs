use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─── ScalarValue ────────────────────────────────────────────────────────────

/// A typed leaf value: exactly one of string, int64, float64, or bool.
///
/// Ambiguous textual forms resolve with priority int > bool > float > string;
/// strings are matched last because they subsume every other form.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ScalarValue {
    /// Coerce a raw textual value into the highest-priority matching variant.
    pub fn parse_str(raw: &str) -> ScalarValue {
        if let Ok(i) = raw.parse::<i64>() {
            return ScalarValue::Int(i);
        }
        match raw {
            "true" => return ScalarValue::Bool(true),
            "false" => return ScalarValue::Bool(false),
            _ => {}
        }
        // Floats require a decimal point; "1e9" and "inf" stay strings.
        if raw.contains('.') {
            if let Ok(f) = raw.parse::<f64>() {
                return ScalarValue::Float(f);
            }
        }
        ScalarValue::String(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ScalarValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The variant name used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::String(_) => "string",
            ScalarValue::Int(_) => "integer",
            ScalarValue::Float(_) => "float",
            ScalarValue::Bool(_) => "boolean",
        }
    }

    /// Whether `other` holds the same variant, regardless of value.
    pub fn same_variant(&self, other: &ScalarValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ScalarValue::String(s) => serde_json::Value::String(s.clone()),
            ScalarValue::Int(i) => serde_json::json!(*i),
            ScalarValue::Float(f) => serde_json::json!(*f),
            ScalarValue::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::String(s) => write!(f, "{}", s),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScalarValue::String(s) => serializer.serialize_str(s),
            ScalarValue::Int(i) => serializer.serialize_i64(*i),
            ScalarValue::Float(f) => serializer.serialize_f64(*f),
            ScalarValue::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

struct ScalarVisitor;

impl<'de> Visitor<'de> for ScalarVisitor {
    type Value = ScalarValue;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a scalar value (string, integer, float, or boolean)")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(ScalarValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(ScalarValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(ScalarValue::Int)
            .map_err(|_| E::custom(format!("integer {} overflows int64", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(ScalarValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(ScalarValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(ScalarValue::String(v))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, _seq: A) -> Result<Self::Value, A::Error> {
        Err(de::Error::custom("value must be a scalar, found a sequence"))
    }

    fn visit_map<A: de::MapAccess<'de>>(self, _map: A) -> Result<Self::Value, A::Error> {
        Err(de::Error::custom("value must be a scalar, found a mapping"))
    }
}

impl<'de> Deserialize<'de> for ScalarValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ScalarVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_priority_int_bool_float_string() {
        assert_eq!(ScalarValue::parse_str("42"), ScalarValue::Int(42));
        assert_eq!(ScalarValue::parse_str("-7"), ScalarValue::Int(-7));
        assert_eq!(ScalarValue::parse_str("true"), ScalarValue::Bool(true));
        assert_eq!(ScalarValue::parse_str("3.25"), ScalarValue::Float(3.25));
        assert_eq!(
            ScalarValue::parse_str("1e9"),
            ScalarValue::String("1e9".to_string())
        );
        assert_eq!(
            ScalarValue::parse_str("hello"),
            ScalarValue::String("hello".to_string())
        );
    }

    #[test]
    fn yaml_round_trip_all_variants() {
        let cases = vec![
            ScalarValue::String("eu-west-1".to_string()),
            ScalarValue::Int(3),
            ScalarValue::Float(1.5),
            ScalarValue::Bool(true),
        ];
        for value in cases {
            let encoded = serde_yaml::to_string(&value).unwrap();
            let decoded: ScalarValue = serde_yaml::from_str(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn json_round_trip_all_variants() {
        let cases = vec![
            ScalarValue::String("eu-west-1".to_string()),
            ScalarValue::Int(-12),
            ScalarValue::Float(0.5),
            ScalarValue::Bool(false),
        ];
        for value in cases {
            let encoded = serde_json::to_string(&value).unwrap();
            let decoded: ScalarValue = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn decoding_a_sequence_fails() {
        let err = serde_yaml::from_str::<ScalarValue>("- a\n- b\n").unwrap_err();
        assert!(err.to_string().contains("must be a scalar"));

        let err = serde_json::from_str::<ScalarValue>("{\"a\": 1}").unwrap_err();
        assert!(err.to_string().contains("must be a scalar"));
    }
}
