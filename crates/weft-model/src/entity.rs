//! Entity declarations
//!
//! An entity is a named record type. It is either *pure schema* (no parents,
//! no expressed attributes; the client or a source supplies every field) or
//! *composite* (has parents; every attribute carries an expression). The
//! graph builder enforces that dichotomy structurally.

use serde::{Deserialize, Serialize};

use crate::expr::RawExpr;
use crate::names::{AttrName, EntityName, SourceName};
use crate::types::FieldType;

/// A single attribute of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: AttrName,
    pub ty: FieldType,
    /// Computed attributes carry a parsed expression; schema fields carry none
    pub expr: Option<RawExpr>,
}

impl Attribute {
    pub fn schema(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            expr: None,
        }
    }

    pub fn computed(name: &str, ty: FieldType, expr: RawExpr) -> Self {
        Self {
            name: name.into(),
            ty,
            expr: Some(expr),
        }
    }
}

/// Reference to a parent entity this entity reads from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentRef {
    pub entity: EntityName,
    /// Parent resolves to a list; the dependent fans out per item unless it
    /// is itself list-shaped
    pub many: bool,
    /// Explicit relationship declaration overriding join-key inference
    pub join_key: Option<AttrName>,
}

impl ParentRef {
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.into(),
            many: false,
            join_key: None,
        }
    }

    pub fn many(entity: &str) -> Self {
        Self {
            entity: entity.into(),
            many: true,
            join_key: None,
        }
    }

    pub fn with_join_key(mut self, key: &str) -> Self {
        self.join_key = Some(key.into());
        self
    }
}

/// Access-control metadata, carried through untouched
///
/// The engine never interprets these; they ride along so the code-generator
/// host can see them on compiled artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSpec {
    pub roles: Vec<String>,
}

/// An entity declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: EntityName,
    pub attributes: Vec<Attribute>,
    /// Parents in declaration order; order is the planner's tie-break rule
    pub parents: Vec<ParentRef>,
    /// Read/subscribe source this entity is populated from
    pub source: Option<SourceName>,
    /// Write/publish source this entity is sent to
    pub target: Option<SourceName>,
    /// Declared as list-shaped (affects array-parent fan-out)
    pub many: bool,
    pub access: AccessSpec,
}

impl Entity {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            parents: Vec::new(),
            source: None,
            target: None,
            many: false,
            access: AccessSpec::default(),
        }
    }

    pub fn attr(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn parent(mut self, parent: ParentRef) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn from_source(mut self, source: &str) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn to_target(mut self, target: &str) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn list_shaped(mut self) -> Self {
        self.many = true;
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name.as_str() == name)
    }

    /// True when every attribute carries an expression
    pub fn fully_computed(&self) -> bool {
        self.attributes.iter().all(|a| a.expr.is_some())
    }

    /// True when no attribute carries an expression
    pub fn pure_schema(&self) -> bool {
        self.attributes.iter().all(|a| a.expr.is_none())
    }

    /// Wrapper entities carry a primitive/array value through a
    /// schema-shaped flow: exactly one attribute, unexpressed
    pub fn is_wrapper(&self) -> bool {
        self.attributes.len() == 1 && self.attributes[0].expr.is_none()
    }
}
