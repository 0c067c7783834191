//! The metamodel root
//!
//! Declaration order is semantic: the planner's tie-break rule for
//! independent parents preserves it, so entities and sources live in
//! `IndexMap`s keyed by name with insertion order intact.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::names::{EntityName, SourceName};
use crate::source::{Endpoint, Source};

/// Validated model of one DSL program
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metamodel {
    entities: IndexMap<EntityName, Entity>,
    sources: IndexMap<SourceName, Source>,
    endpoints: Vec<Endpoint>,
}

impl Metamodel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity declaration. Later declarations with the same name
    /// replace earlier ones; the external validator rejects duplicates
    /// before the model reaches this crate.
    pub fn entity(mut self, entity: Entity) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.sources.insert(source.name.clone(), source);
        self
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn get_entity(&self, name: &EntityName) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn get_source(&self, name: &SourceName) -> Option<&Source> {
        self.sources.get(name)
    }

    /// Position of an entity in declaration order
    pub fn declaration_index(&self, name: &EntityName) -> Option<usize> {
        self.entities.get_index_of(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Attribute;
    use crate::expr::{BinOp, RawExpr};
    use crate::types::{FieldType, TypeKind};

    #[test]
    fn declaration_order_is_preserved() {
        let model = Metamodel::new()
            .entity(Entity::new("zebra"))
            .entity(Entity::new("apple"))
            .entity(Entity::new("mango"));

        let names: Vec<_> = model.entities().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zebra", "apple", "mango"]);
        assert_eq!(model.declaration_index(&"apple".into()), Some(1));
    }

    #[test]
    fn wrapper_detection() {
        let wrapper = Entity::new("ClientMsg")
            .attr(Attribute::schema("value", FieldType::scalar(TypeKind::Text)));
        assert!(wrapper.is_wrapper());

        let two_fields = Entity::new("Pair")
            .attr(Attribute::schema("a", FieldType::scalar(TypeKind::Int)))
            .attr(Attribute::schema("b", FieldType::scalar(TypeKind::Int)));
        assert!(!two_fields.is_wrapper());

        let computed = Entity::new("Derived").parent(crate::ParentRef::new("Raw")).attr(
            Attribute::computed(
                "y",
                FieldType::scalar(TypeKind::Int),
                RawExpr::binary(BinOp::Mul, RawExpr::field("Raw", "x"), RawExpr::IntLit(2)),
            ),
        );
        assert!(!computed.is_wrapper());
        assert!(computed.fully_computed());
    }

    #[test]
    fn metamodel_serde_round_trip() {
        let model = Metamodel::new()
            .entity(
                Entity::new("Raw")
                    .attr(Attribute::schema("x", FieldType::scalar(TypeKind::Int)))
                    .from_source("raw_api"),
            )
            .source(Source::read("raw_api", "Raw"));

        let json = serde_json::to_string(&model).unwrap();
        let back: Metamodel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_entity(&"Raw".into()).unwrap().source, Some("raw_api".into()));
    }
}
