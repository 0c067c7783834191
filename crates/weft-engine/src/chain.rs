//! Duplex chain resolution
//!
//! Inbound chains walk `ParentOf` edges *forward* from the client-facing
//! entity until an entity with an external sink appears; that entity is the
//! terminal. The forward search matters: authors declare transformation
//! entities downstream of the client entity, and an ancestors-only walk would
//! stop one hop short and silently drop them. The terminal is always resolved
//! before the chain is built, never the reverse. Outbound chains walk
//! backward to the subscribe-bound root and return root → client.

use indexmap::IndexMap;
use tracing::{debug, instrument};

use weft_model::EntityName;
use weft_runtime::chain::Chain;

use crate::error::{BuildError, BuildErrorKind, BuildResult};
use crate::graph::{EdgeKind, Graph};

/// Chain from the client-published entity to the external-bound terminal
#[instrument(skip(graph), fields(client = %client))]
pub fn resolve_inbound(graph: &Graph, client: &EntityName) -> BuildResult<Chain> {
    let terminal = find_descendant_terminal(graph, client)?;
    let path = shortest_path(client, &terminal, |e| graph.children_of(e));
    debug!(terminal = %terminal, hops = path.len(), "inbound chain resolved");
    Ok(Chain::new(path))
}

/// Chain from the subscribe-bound root entity to the client-facing entity
#[instrument(skip(graph), fields(client = %client))]
pub fn resolve_outbound(graph: &Graph, client: &EntityName) -> BuildResult<Chain> {
    let root = find_ancestor_root(graph, client)?;
    let mut path = shortest_path(client, &root, |e| graph.parents_of(e));
    path.reverse();
    debug!(root = %root, hops = path.len(), "outbound chain resolved");
    Ok(Chain::new(path))
}

/// Forward BFS over `ParentOf` to the first entity with a
/// `Consumes`/`Publishes` sink edge
fn find_descendant_terminal(graph: &Graph, start: &EntityName) -> BuildResult<EntityName> {
    bfs_first(start, |e| graph.children_of(e), |e| graph.sink(e).is_some()).ok_or_else(|| {
        BuildError::new(
            BuildErrorKind::UnresolvedTerminalEntity,
            format!("no descendant of '{start}' is bound to an external sink"),
        )
        .with_note("inbound chains need a terminal entity with a write/publish target")
    })
}

/// Backward BFS over `ParentOf` to the entity a subscribe source feeds
fn find_ancestor_root(graph: &Graph, start: &EntityName) -> BuildResult<EntityName> {
    bfs_first(
        start,
        |e| graph.parents_of(e),
        |e| {
            graph
                .provider(e)
                .is_some_and(|p| p.kind == EdgeKind::Subscribes)
        },
    )
    .ok_or_else(|| {
        BuildError::new(
            BuildErrorKind::UnresolvedTerminalEntity,
            format!("no ancestor of '{start}' is bound to a subscribe source"),
        )
        .with_note("outbound chains need a root entity fed by a subscribe source")
    })
}

/// First node satisfying the predicate in BFS order, the start included.
/// Neighbor order follows the graph's stored (declaration) order, so
/// resolution is deterministic.
fn bfs_first<'g>(
    start: &EntityName,
    neighbors: impl Fn(&EntityName) -> &'g [EntityName],
    hit: impl Fn(&EntityName) -> bool,
) -> Option<EntityName> {
    let mut queue = std::collections::VecDeque::from([start.clone()]);
    let mut seen = indexmap::IndexSet::from([start.clone()]);
    while let Some(node) = queue.pop_front() {
        if hit(&node) {
            return Some(node);
        }
        for next in neighbors(&node) {
            if seen.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
    }
    None
}

/// Shortest path start..=goal by BFS predecessor reconstruction
fn shortest_path<'g>(
    start: &EntityName,
    goal: &EntityName,
    neighbors: impl Fn(&EntityName) -> &'g [EntityName],
) -> Vec<String> {
    if start == goal {
        return vec![start.to_string()];
    }
    let mut pred: IndexMap<EntityName, EntityName> = IndexMap::new();
    let mut queue = std::collections::VecDeque::from([start.clone()]);
    while let Some(node) = queue.pop_front() {
        for next in neighbors(&node) {
            if *next == *start || pred.contains_key(next) {
                continue;
            }
            pred.insert(next.clone(), node.clone());
            if next == goal {
                queue.clear();
                break;
            }
            queue.push_back(next.clone());
        }
    }

    let mut path = vec![goal.to_string()];
    let mut current = goal;
    while let Some(previous) = pred.get(current) {
        path.push(previous.to_string());
        current = previous;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_model::{Attribute, Entity, FieldType, Metamodel, ParentRef, RawExpr, Source, TypeKind};

    fn duplex_model() -> Metamodel {
        Metamodel::new()
            .entity(
                Entity::new("ClientMsg")
                    .attr(Attribute::schema("value", FieldType::scalar(TypeKind::Text))),
            )
            .entity(
                Entity::new("Processed")
                    .parent(ParentRef::new("ClientMsg"))
                    .to_target("external_pub")
                    .attr(Attribute::computed(
                        "text",
                        FieldType::scalar(TypeKind::Text),
                        RawExpr::call("upper", vec![RawExpr::field("ClientMsg", "value")]),
                    )),
            )
            .entity(
                Entity::new("Tick")
                    .attr(Attribute::schema("price", FieldType::scalar(TypeKind::Float)))
                    .from_source("external_sub"),
            )
            .entity(
                Entity::new("Quote")
                    .parent(ParentRef::new("Tick"))
                    .attr(Attribute::computed(
                        "display",
                        FieldType::scalar(TypeKind::Float),
                        RawExpr::field("Tick", "price"),
                    )),
            )
            .source(Source::publish("external_pub", "Processed"))
            .source(Source::subscribe("external_sub", "Tick"))
    }

    #[test]
    fn inbound_walks_forward_to_the_sink() {
        let model = duplex_model();
        let graph = crate::graph::Graph::build(&model).unwrap();
        let chain = resolve_inbound(&graph, &"ClientMsg".into()).unwrap();
        assert_eq!(chain.entities(), &["ClientMsg", "Processed"]);
        assert_eq!(chain.terminal(), "Processed");
    }

    #[test]
    fn inbound_finds_terminal_beyond_one_hop() {
        // A transformation step between client entity and sink must not be
        // dropped by the search
        let model = Metamodel::new()
            .entity(
                Entity::new("In").attr(Attribute::schema("v", FieldType::scalar(TypeKind::Int))),
            )
            .entity(
                Entity::new("Mid")
                    .parent(ParentRef::new("In"))
                    .attr(Attribute::computed(
                        "v",
                        FieldType::scalar(TypeKind::Int),
                        RawExpr::field("In", "v"),
                    )),
            )
            .entity(
                Entity::new("Out")
                    .parent(ParentRef::new("Mid"))
                    .to_target("sink")
                    .attr(Attribute::computed(
                        "v",
                        FieldType::scalar(TypeKind::Int),
                        RawExpr::field("Mid", "v"),
                    )),
            )
            .source(Source::publish("sink", "Out"));

        let graph = crate::graph::Graph::build(&model).unwrap();
        let chain = resolve_inbound(&graph, &"In".into()).unwrap();
        assert_eq!(chain.entities(), &["In", "Mid", "Out"]);
    }

    #[test]
    fn outbound_runs_root_to_client() {
        let model = duplex_model();
        let graph = crate::graph::Graph::build(&model).unwrap();
        let chain = resolve_outbound(&graph, &"Quote".into()).unwrap();
        assert_eq!(chain.entities(), &["Tick", "Quote"]);
        assert_eq!(chain.root(), "Tick");
    }

    #[test]
    fn missing_terminal_is_a_build_error() {
        let model = Metamodel::new().entity(
            Entity::new("Lonely").attr(Attribute::schema("v", FieldType::scalar(TypeKind::Int))),
        );
        let graph = crate::graph::Graph::build(&model).unwrap();
        let err = resolve_inbound(&graph, &"Lonely".into()).unwrap_err();
        assert_eq!(err.kind, BuildErrorKind::UnresolvedTerminalEntity);
    }

    #[test]
    fn single_entity_duplex_shares_the_entity() {
        // One entity with both bindings: inbound and outbound chains both
        // consist of just that entity
        let model = Metamodel::new()
            .entity(
                Entity::new("Echo")
                    .attr(Attribute::schema("v", FieldType::scalar(TypeKind::Text)))
                    .from_source("feed")
                    .to_target("sink"),
            )
            .source(Source::subscribe("feed", "Echo"))
            .source(Source::publish("sink", "Echo"));

        let graph = crate::graph::Graph::build(&model).unwrap();
        let inbound = resolve_inbound(&graph, &"Echo".into()).unwrap();
        let outbound = resolve_outbound(&graph, &"Echo".into()).unwrap();
        assert_eq!(inbound.entities(), outbound.entities());
        assert_eq!(inbound.len(), 1);
    }
}
