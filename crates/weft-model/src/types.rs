//! Declared attribute types
//!
//! The DSL's type annotations as they arrive from the parser. The engine uses
//! them for int/float coercion at record assembly and for nullable-field
//! handling; it does not run a full type checker (the external validator has
//! already accepted the model).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar kind of a declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Int,
    Float,
    Bool,
    Text,
    /// Nested record typed by another entity declaration
    Record,
}

/// Full declared type of an attribute or parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldType {
    pub kind: TypeKind,
    /// Declared as a list of `kind`
    pub many: bool,
    /// Missing values are legal and evaluate to null instead of erroring
    pub nullable: bool,
}

impl FieldType {
    pub fn scalar(kind: TypeKind) -> Self {
        Self {
            kind,
            many: false,
            nullable: false,
        }
    }

    pub fn list(kind: TypeKind) -> Self {
        Self {
            kind,
            many: true,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Bool => "bool",
            TypeKind::Text => "string",
            TypeKind::Record => "record",
        };
        if self.many {
            write!(f, "[{kind}]")?;
        } else {
            write!(f, "{kind}")?;
        }
        if self.nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}
