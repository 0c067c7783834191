//! Dependency graph construction
//!
//! `Graph::build` is a pure function of the validated metamodel, run once at
//! startup. It classifies every entity↔source edge from the source's declared
//! direction — never from the entity — and rejects structural problems
//! (cycles, ambiguous edge kinds, dichotomy violations) before any plan is
//! built, so runtime evaluation never fails on model structure.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use weft_model::{Direction, Entity, EntityName, Metamodel, SourceName};

use crate::error::{BuildError, BuildErrorKind};

/// Classified edge tag.
///
/// `Provides` and `MutationResponse` are deliberately distinct: an entity
/// reused as both a GET response and a POST response must carry both tags,
/// never a merged one, or a read plan would inherit the write source's side
/// effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Read source -> entity
    Provides,
    /// Write source -> response entity
    MutationResponse,
    /// Subscribe source -> entity
    Subscribes,
    /// Entity -> write source payload
    Consumes,
    /// Entity -> publish source
    Publishes,
    /// Parent entity -> dependent entity
    ParentOf,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::Provides => "provides",
            EdgeKind::MutationResponse => "mutation-response",
            EdgeKind::Subscribes => "subscribes",
            EdgeKind::Consumes => "consumes",
            EdgeKind::Publishes => "publishes",
            EdgeKind::ParentOf => "parent-of",
        };
        f.write_str(s)
    }
}

/// A single classified edge, kept for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub kind: EdgeKind,
    pub from: String,
    pub to: String,
}

/// The inbound source binding that materializes an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub source: SourceName,
    /// `Provides`, `MutationResponse`, or `Subscribes`
    pub kind: EdgeKind,
}

/// The outbound source binding an entity is delivered to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sink {
    pub source: SourceName,
    /// `Consumes` or `Publishes`
    pub kind: EdgeKind,
}

/// Immutable typed dependency graph, shared read-only after build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    edges: Vec<Edge>,
    /// Parent entities per dependent, declaration order
    parents: IndexMap<EntityName, Vec<EntityName>>,
    /// Dependent entities per parent, declaration order
    children: IndexMap<EntityName, Vec<EntityName>>,
    providers: IndexMap<EntityName, Provider>,
    sinks: IndexMap<EntityName, Sink>,
    /// Entities statically marked for primitive auto-wrap/unwrap
    wrappers: IndexSet<EntityName>,
}

impl Graph {
    /// Build the graph from a validated metamodel, collecting every
    /// structural error rather than stopping at the first.
    #[instrument(skip(model), fields(entities = model.entities().count()))]
    pub fn build(model: &Metamodel) -> Result<Graph, Vec<BuildError>> {
        let mut builder = GraphBuilder::new(model);
        builder.add_entities();
        builder.add_sources();
        builder.check_cycles();
        builder.finish()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn parents_of(&self, entity: &EntityName) -> &[EntityName] {
        self.parents.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children_of(&self, entity: &EntityName) -> &[EntityName] {
        self.children.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn provider(&self, entity: &EntityName) -> Option<&Provider> {
        self.providers.get(entity)
    }

    pub fn sink(&self, entity: &EntityName) -> Option<&Sink> {
        self.sinks.get(entity)
    }

    pub fn is_wrapper(&self, entity: &EntityName) -> bool {
        self.wrappers.contains(entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityName> {
        self.parents.keys()
    }

    /// One-line-per-edge rendering for host debugging
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for edge in &self.edges {
            out.push_str(&format!("{} -[{}]-> {}\n", edge.from, edge.kind, edge.to));
        }
        out
    }
}

struct GraphBuilder<'a> {
    model: &'a Metamodel,
    edges: Vec<Edge>,
    parents: IndexMap<EntityName, Vec<EntityName>>,
    children: IndexMap<EntityName, Vec<EntityName>>,
    providers: IndexMap<EntityName, Provider>,
    sinks: IndexMap<EntityName, Sink>,
    wrappers: IndexSet<EntityName>,
    errors: Vec<BuildError>,
}

impl<'a> GraphBuilder<'a> {
    fn new(model: &'a Metamodel) -> Self {
        Self {
            model,
            edges: Vec::new(),
            parents: IndexMap::new(),
            children: IndexMap::new(),
            providers: IndexMap::new(),
            sinks: IndexMap::new(),
            wrappers: IndexSet::new(),
            errors: Vec::new(),
        }
    }

    fn add_entities(&mut self) {
        for entity in self.model.entities() {
            self.parents.entry(entity.name.clone()).or_default();
            self.children.entry(entity.name.clone()).or_default();
            if entity.is_wrapper() {
                self.wrappers.insert(entity.name.clone());
            }
            self.check_dichotomy(entity);
            self.add_parent_edges(entity);
            self.add_binding_edges(entity);
        }
    }

    /// Composite/pure dichotomy: parents mean every attribute is expressed;
    /// no parents and no source binding means no attribute is
    fn check_dichotomy(&mut self, entity: &Entity) {
        if !entity.parents.is_empty() && !entity.fully_computed() {
            self.errors.push(
                BuildError::new(
                    BuildErrorKind::MixedEntity,
                    format!(
                        "entity '{}' declares parents but has unexpressed attributes",
                        entity.name
                    ),
                )
                .with_note("composite entities must express every attribute"),
            );
        }
        if !entity.parents.is_empty() && entity.source.is_some() {
            self.errors.push(
                BuildError::new(
                    BuildErrorKind::MixedEntity,
                    format!(
                        "entity '{}' is source-bound and also declares parents",
                        entity.name
                    ),
                )
                .with_note("source-bound entities are dependency leaves"),
            );
        }
        if entity.parents.is_empty() && entity.source.is_none() && !entity.pure_schema() {
            self.errors.push(
                BuildError::new(
                    BuildErrorKind::MixedEntity,
                    format!(
                        "entity '{}' has computed attributes but no parents or source",
                        entity.name
                    ),
                )
                .with_note("entities without inputs must be pure request/publish schemas"),
            );
        }
    }

    fn add_parent_edges(&mut self, entity: &Entity) {
        for parent in &entity.parents {
            if self.model.get_entity(&parent.entity).is_none() {
                self.errors.push(BuildError::new(
                    BuildErrorKind::UnknownEntity,
                    format!(
                        "entity '{}' references unknown parent '{}'",
                        entity.name, parent.entity
                    ),
                ));
                continue;
            }
            self.edges.push(Edge {
                kind: EdgeKind::ParentOf,
                from: parent.entity.to_string(),
                to: entity.name.to_string(),
            });
            self.parents
                .entry(entity.name.clone())
                .or_default()
                .push(parent.entity.clone());
            self.children
                .entry(parent.entity.clone())
                .or_default()
                .push(entity.name.clone());
        }
    }

    /// Edges from the entity's own `source`/`target` declarations.
    /// Kind comes from the named source's direction, nothing else.
    fn add_binding_edges(&mut self, entity: &Entity) {
        if let Some(source_name) = &entity.source {
            match self.model.get_source(source_name) {
                None => self.errors.push(BuildError::new(
                    BuildErrorKind::UnknownSource,
                    format!(
                        "entity '{}' is bound to unknown source '{source_name}'",
                        entity.name
                    ),
                )),
                Some(source) => match source.direction {
                    Direction::Read => {
                        self.add_provider(&entity.name, source_name, EdgeKind::Provides)
                    }
                    Direction::Subscribe => {
                        self.add_provider(&entity.name, source_name, EdgeKind::Subscribes)
                    }
                    Direction::Write => self.add_provider(
                        &entity.name,
                        source_name,
                        EdgeKind::MutationResponse,
                    ),
                    Direction::Publish => self.errors.push(BuildError::new(
                        BuildErrorKind::UnresolvedSourceBinding,
                        format!(
                            "entity '{}' cannot be populated from publish source '{source_name}'",
                            entity.name
                        ),
                    )),
                },
            }
        }
        if let Some(target_name) = &entity.target {
            match self.model.get_source(target_name) {
                None => self.errors.push(BuildError::new(
                    BuildErrorKind::UnknownSource,
                    format!(
                        "entity '{}' targets unknown source '{target_name}'",
                        entity.name
                    ),
                )),
                Some(source) => match source.direction {
                    Direction::Write => {
                        self.add_sink(&entity.name, target_name, EdgeKind::Consumes)
                    }
                    Direction::Publish => {
                        self.add_sink(&entity.name, target_name, EdgeKind::Publishes)
                    }
                    Direction::Read | Direction::Subscribe => {
                        self.errors.push(BuildError::new(
                            BuildErrorKind::UnresolvedSourceBinding,
                            format!(
                                "entity '{}' cannot target inbound source '{target_name}'",
                                entity.name
                            ),
                        ))
                    }
                },
            }
        }
    }

    /// Edges from the sources' own entity declarations
    fn add_sources(&mut self) {
        for source in self.model.sources() {
            if self.model.get_entity(&source.entity).is_none() {
                self.errors.push(BuildError::new(
                    BuildErrorKind::UnknownEntity,
                    format!(
                        "source '{}' references unknown entity '{}'",
                        source.name, source.entity
                    ),
                ));
                continue;
            }
            match source.direction {
                Direction::Read => {
                    self.add_provider(&source.entity, &source.name, EdgeKind::Provides)
                }
                Direction::Subscribe => {
                    self.add_provider(&source.entity, &source.name, EdgeKind::Subscribes)
                }
                Direction::Write => {
                    self.add_sink(&source.entity, &source.name, EdgeKind::Consumes);
                    if let Some(response) = &source.response {
                        if self.model.get_entity(response).is_none() {
                            self.errors.push(BuildError::new(
                                BuildErrorKind::UnknownEntity,
                                format!(
                                    "source '{}' declares unknown response entity '{response}'",
                                    source.name
                                ),
                            ));
                        } else {
                            self.add_provider(response, &source.name, EdgeKind::MutationResponse);
                        }
                    }
                }
                Direction::Publish => {
                    self.add_sink(&source.entity, &source.name, EdgeKind::Publishes)
                }
            }
        }
    }

    /// Register an inbound binding, enforcing at most one provider per
    /// entity. The same (source, kind) pair declared from both sides is
    /// one binding, not a conflict.
    fn add_provider(&mut self, entity: &EntityName, source: &SourceName, kind: EdgeKind) {
        if let Some(existing) = self.providers.get(entity) {
            if existing.source == *source && existing.kind == kind {
                return;
            }
            let error_kind = if existing.kind != kind {
                BuildErrorKind::AmbiguousEdgeKind
            } else {
                BuildErrorKind::DuplicateProvider
            };
            self.errors.push(
                BuildError::new(
                    error_kind,
                    format!(
                        "entity '{entity}' is provided by both '{}' ({}) and '{source}' ({kind})",
                        existing.source, existing.kind
                    ),
                )
                .with_note("an entity has at most one inbound provides/mutation-response/subscribes edge"),
            );
            return;
        }
        debug!(%entity, %source, %kind, "provider edge");
        self.edges.push(Edge {
            kind,
            from: source.to_string(),
            to: entity.to_string(),
        });
        self.providers.insert(
            entity.clone(),
            Provider {
                source: source.clone(),
                kind,
            },
        );
    }

    fn add_sink(&mut self, entity: &EntityName, source: &SourceName, kind: EdgeKind) {
        if let Some(existing) = self.sinks.get(entity) {
            if existing.source == *source && existing.kind == kind {
                return;
            }
            self.errors.push(BuildError::new(
                BuildErrorKind::DuplicateProvider,
                format!(
                    "entity '{entity}' is consumed by both '{}' ({}) and '{source}' ({kind})",
                    existing.source, existing.kind
                ),
            ));
            return;
        }
        debug!(%entity, %source, %kind, "sink edge");
        self.edges.push(Edge {
            kind,
            from: entity.to_string(),
            to: source.to_string(),
        });
        self.sinks.insert(
            entity.clone(),
            Sink {
                source: source.clone(),
                kind,
            },
        );
    }

    /// Kahn's algorithm over `ParentOf` edges; leftovers mean a cycle,
    /// reported with a concrete dependency path.
    fn check_cycles(&mut self) {
        let mut indegree: IndexMap<&EntityName, usize> = self
            .parents
            .iter()
            .map(|(name, parents)| (name, parents.len()))
            .collect();
        let mut ready: Vec<&EntityName> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut visited = 0usize;

        while let Some(node) = ready.pop() {
            visited += 1;
            for child in self.children.get(node).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(child);
                    }
                }
            }
        }

        if visited < indegree.len() {
            let leftover: IndexSet<&EntityName> = indegree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(n, _)| *n)
                .collect();
            let path = self.trace_cycle_path(&leftover);
            self.errors.push(
                BuildError::new(
                    BuildErrorKind::CycleDetected,
                    format!("dependency cycle through entity '{}'", path[0]),
                )
                .with_note(format!("cycle path: {}", path.join(" -> "))),
            );
        }
    }

    /// Walk parent edges inside the unresolvable set until a node repeats
    fn trace_cycle_path(&self, leftover: &IndexSet<&EntityName>) -> Vec<String> {
        let mut path: Vec<&EntityName> = Vec::new();
        let mut current = match leftover.first() {
            Some(n) => *n,
            None => return vec!["<unknown>".to_string()],
        };
        loop {
            if let Some(pos) = path.iter().position(|n| *n == current) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|n| n.to_string()).collect();
                cycle.push(current.to_string());
                return cycle;
            }
            path.push(current);
            current = match self
                .parents
                .get(current)
                .into_iter()
                .flatten()
                .find(|p| leftover.contains(p))
            {
                Some(next) => next,
                None => return path.iter().map(|n| n.to_string()).collect(),
            };
        }
    }

    fn finish(self) -> Result<Graph, Vec<BuildError>> {
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        debug!(edges = self.edges.len(), "graph built");
        Ok(Graph {
            edges: self.edges,
            parents: self.parents,
            children: self.children,
            providers: self.providers,
            sinks: self.sinks,
            wrappers: self.wrappers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_model::{Attribute, BinOp, Entity, FieldType, ParentRef, RawExpr, Source, TypeKind};

    fn raw_doubled_model() -> Metamodel {
        Metamodel::new()
            .entity(
                Entity::new("Raw")
                    .attr(Attribute::schema("x", FieldType::scalar(TypeKind::Int)))
                    .from_source("raw_api"),
            )
            .entity(
                Entity::new("Doubled")
                    .parent(ParentRef::new("Raw"))
                    .attr(Attribute::computed(
                        "y",
                        FieldType::scalar(TypeKind::Int),
                        RawExpr::binary(BinOp::Mul, RawExpr::field("Raw", "x"), RawExpr::IntLit(2)),
                    )),
            )
            .source(Source::read("raw_api", "Raw"))
    }

    #[test]
    fn classifies_edges_from_source_direction() {
        let graph = Graph::build(&raw_doubled_model()).unwrap();
        assert_eq!(
            graph.provider(&"Raw".into()),
            Some(&Provider {
                source: "raw_api".into(),
                kind: EdgeKind::Provides,
            })
        );
        assert_eq!(graph.parents_of(&"Doubled".into()), &["Raw".into()]);
        assert_eq!(graph.children_of(&"Raw".into()), &["Doubled".into()]);
    }

    #[test]
    fn one_edge_kind_tag_per_source_entity_pair() {
        let graph = Graph::build(&raw_doubled_model()).unwrap();
        // Entity-side and source-side declarations of the same binding
        // collapse into one edge
        let provides: Vec<_> = graph
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::Provides)
            .collect();
        assert_eq!(provides.len(), 1);
    }

    #[test]
    fn read_and_write_sources_sharing_an_entity_is_ambiguous() {
        let model = Metamodel::new()
            .entity(
                Entity::new("Account")
                    .attr(Attribute::schema("id", FieldType::scalar(TypeKind::Int))),
            )
            .source(Source::read("get_account", "Account"))
            .source(Source::write("save_account", "Payload").with_response("Account"))
            .entity(
                Entity::new("Payload")
                    .attr(Attribute::schema("id", FieldType::scalar(TypeKind::Int))),
            );

        let errors = Graph::build(&model).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.kind == BuildErrorKind::AmbiguousEdgeKind));
    }

    #[test]
    fn parent_cycle_is_reported_with_path() {
        let model = Metamodel::new()
            .entity(
                Entity::new("A").parent(ParentRef::new("B")).attr(Attribute::computed(
                    "v",
                    FieldType::scalar(TypeKind::Int),
                    RawExpr::field("B", "v"),
                )),
            )
            .entity(
                Entity::new("B").parent(ParentRef::new("A")).attr(Attribute::computed(
                    "v",
                    FieldType::scalar(TypeKind::Int),
                    RawExpr::field("A", "v"),
                )),
            );

        let errors = Graph::build(&model).unwrap_err();
        let cycle = errors
            .iter()
            .find(|e| e.kind == BuildErrorKind::CycleDetected)
            .unwrap();
        assert!(cycle.notes.iter().any(|n| n.contains(" -> ")));
    }

    #[test]
    fn composite_with_unexpressed_attribute_is_mixed() {
        let model = Metamodel::new()
            .entity(Entity::new("P").attr(Attribute::schema("id", FieldType::scalar(TypeKind::Int))))
            .entity(
                Entity::new("Bad")
                    .parent(ParentRef::new("P"))
                    .attr(Attribute::schema("loose", FieldType::scalar(TypeKind::Int))),
            );

        let errors = Graph::build(&model).unwrap_err();
        assert!(errors.iter().any(|e| e.kind == BuildErrorKind::MixedEntity));
    }

    #[test]
    fn wrapper_marked_statically() {
        let model = Metamodel::new().entity(
            Entity::new("ClientMsg")
                .attr(Attribute::schema("value", FieldType::scalar(TypeKind::Text))),
        );
        let graph = Graph::build(&model).unwrap();
        assert!(graph.is_wrapper(&"ClientMsg".into()));
    }

    #[test]
    fn unknown_parent_and_source_are_reported() {
        let model = Metamodel::new().entity(
            Entity::new("Orphan")
                .parent(ParentRef::new("Ghost"))
                .from_source("nowhere")
                .attr(Attribute::computed(
                    "v",
                    FieldType::scalar(TypeKind::Int),
                    RawExpr::IntLit(1),
                )),
        );
        let errors = Graph::build(&model).unwrap_err();
        assert!(errors.iter().any(|e| e.kind == BuildErrorKind::UnknownEntity));
        assert!(errors.iter().any(|e| e.kind == BuildErrorKind::UnknownSource));
    }
}
