//! Runtime values
//!
//! A tagged value enum covering everything the expression language can
//! produce. Dictionary-style lookup goes through [`Value::get`] with an
//! optional default; there is no reflection anywhere in the engine.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use weft_model::{FieldType, TypeKind};

use crate::error::{Error, Result};

/// A runtime value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    pub fn record(fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Record(fields.into_iter().collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view with int-to-float coercion
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Safe keyed access: `None` when the key is absent or the value is not
    /// a record
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_record().and_then(|r| r.get(key))
    }

    /// Keyed access with a fallback value
    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.get(key).unwrap_or(default)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// Coerce a computed value to its declared attribute type.
///
/// Declared int accepts whole floats; declared float accepts ints. Null is
/// only legal for nullable fields. Anything else that does not match the
/// declared kind is a typed error, never a silent null.
pub fn coerce(value: Value, ty: &FieldType, path: &str) -> Result<Value> {
    if value.is_null() {
        if ty.nullable {
            return Ok(Value::Null);
        }
        return Err(Error::TypeMismatch {
            path: path.to_string(),
            expected: ty.to_string(),
            actual: "null".to_string(),
        });
    }

    if ty.many {
        let Value::List(items) = value else {
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                expected: ty.to_string(),
                actual: value.type_name().to_string(),
            });
        };
        let inner = FieldType {
            kind: ty.kind,
            many: false,
            nullable: ty.nullable,
        };
        let coerced = items
            .into_iter()
            .map(|item| coerce(item, &inner, path))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Value::List(coerced));
    }

    let mismatch = |value: &Value| Error::TypeMismatch {
        path: path.to_string(),
        expected: ty.to_string(),
        actual: value.type_name().to_string(),
    };

    match (ty.kind, value) {
        (TypeKind::Int, Value::Int(i)) => Ok(Value::Int(i)),
        (TypeKind::Int, Value::Float(f)) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
        (TypeKind::Float, Value::Float(f)) => Ok(Value::Float(f)),
        (TypeKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (TypeKind::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (TypeKind::Text, Value::Str(s)) => Ok(Value::Str(s)),
        (TypeKind::Record, Value::Record(r)) => Ok(Value::Record(r)),
        (_, other) => Err(mismatch(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_with_default() {
        let rec = Value::record([("p".to_string(), Value::Int(10))]);
        assert_eq!(rec.get("p"), Some(&Value::Int(10)));
        assert_eq!(rec.get("missing"), None);
        let fallback = Value::Int(0);
        assert_eq!(rec.get_or("missing", &fallback), &Value::Int(0));
    }

    #[test]
    fn coerce_int_float() {
        let ty = FieldType::scalar(TypeKind::Int);
        assert_eq!(coerce(Value::Float(42.0), &ty, "e.x").unwrap(), Value::Int(42));
        assert!(coerce(Value::Float(42.5), &ty, "e.x").is_err());

        let ty = FieldType::scalar(TypeKind::Float);
        assert_eq!(coerce(Value::Int(2), &ty, "e.x").unwrap(), Value::Float(2.0));
    }

    #[test]
    fn coerce_null_requires_nullable() {
        let strict = FieldType::scalar(TypeKind::Text);
        assert!(coerce(Value::Null, &strict, "e.s").is_err());

        let lax = FieldType::scalar(TypeKind::Text).nullable();
        assert_eq!(coerce(Value::Null, &lax, "e.s").unwrap(), Value::Null);
    }

    #[test]
    fn coerce_list_elements() {
        let ty = FieldType::list(TypeKind::Int);
        let coerced = coerce(
            Value::List(vec![Value::Int(1), Value::Float(2.0)]),
            &ty,
            "e.xs",
        )
        .unwrap();
        assert_eq!(coerced, Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn value_serde_is_untagged() {
        let v = Value::record([
            ("n".to_string(), Value::Int(1)),
            ("s".to_string(), Value::Str("hi".into())),
        ]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"n":1,"s":"hi"}"#);
    }
}
