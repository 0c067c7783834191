//! Weft metamodel
//!
//! The validated object graph the external parser/validator hands to the
//! engine: entities, sources, endpoints, and already-parsed expression ASTs.
//! This crate never parses text and performs no semantic validation beyond
//! what its constructors enforce structurally.

pub mod entity;
pub mod expr;
pub mod metamodel;
pub mod names;
pub mod source;
pub mod types;

pub use entity::{Attribute, Entity, ParentRef};
pub use expr::{BinOp, RawExpr, UnaryOp};
pub use metamodel::Metamodel;
pub use names::{AttrName, EntityName, SourceName};
pub use source::{Direction, Endpoint, Param, Source};
pub use types::{FieldType, TypeKind};
