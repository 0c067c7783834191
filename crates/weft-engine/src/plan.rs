//! Execution planning
//!
//! `Planner::plan` turns one target entity into a linear, topologically
//! ordered step sequence. Plans are deterministic: ties between independent
//! nodes are broken by metamodel declaration order, and the cache hands the
//! same `Arc` back for repeated targets. Multi-parent fan-in resolves join
//! keys and array-parent fan-out is marked explicitly here, so the evaluator
//! never infers structure at request time.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, instrument};

use weft_model::{Entity, EntityName, Metamodel, RawExpr};
use weft_runtime::plan::{ExecutionPlan, FanOut, JoinSpec, PlanStep};

use crate::error::{BuildError, BuildErrorKind, BuildResult};
use crate::graph::{EdgeKind, Graph};

/// Builds and caches execution plans against an immutable graph
pub struct Planner<'a> {
    graph: &'a Graph,
    model: &'a Metamodel,
    cache: IndexMap<EntityName, Arc<ExecutionPlan>>,
}

impl<'a> Planner<'a> {
    pub fn new(graph: &'a Graph, model: &'a Metamodel) -> Self {
        Self {
            graph,
            model,
            cache: IndexMap::new(),
        }
    }

    /// Plan the materialization of one target entity
    #[instrument(skip(self), fields(target = %target))]
    pub fn plan(&mut self, target: &EntityName) -> BuildResult<Arc<ExecutionPlan>> {
        if let Some(plan) = self.cache.get(target) {
            return Ok(Arc::clone(plan));
        }

        let closure = self.collect_closure(target)?;
        let ordered = self.topo_order(&closure)?;
        let joins = self.resolve_joins(&closure)?;
        let steps = self.lower(&ordered, &joins)?;
        debug!(steps = steps.len(), "plan built");

        let plan = Arc::new(ExecutionPlan {
            target: target.to_string(),
            steps,
        });
        self.cache.insert(target.clone(), Arc::clone(&plan));
        Ok(plan)
    }

    /// Entities this entity must have materialized first: its parents, plus
    /// the payload entity when it is a mutation response
    fn deps(&self, entity: &EntityName) -> BuildResult<Vec<EntityName>> {
        let mut deps: Vec<EntityName> = self.graph.parents_of(entity).to_vec();
        if let Some(provider) = self.graph.provider(entity) {
            if provider.kind == EdgeKind::MutationResponse {
                let source = self.model.get_source(&provider.source).ok_or_else(|| {
                    BuildError::new(
                        BuildErrorKind::UnresolvedSourceBinding,
                        format!(
                            "entity '{entity}' bound to missing source '{}'",
                            provider.source
                        ),
                    )
                })?;
                deps.push(source.entity.clone());
            }
        }
        Ok(deps)
    }

    /// Minimal dependency closure, reverse traversal from the target
    fn collect_closure(&self, target: &EntityName) -> BuildResult<IndexSet<EntityName>> {
        let mut closure = IndexSet::new();
        let mut stack = vec![target.clone()];
        while let Some(entity) = stack.pop() {
            if self.model.get_entity(&entity).is_none() {
                return Err(BuildError::new(
                    BuildErrorKind::UnknownEntity,
                    format!("plan target or dependency '{entity}' is not declared"),
                ));
            }
            if !closure.insert(entity.clone()) {
                continue;
            }
            for dep in self.deps(&entity)? {
                if !closure.contains(&dep) {
                    stack.push(dep);
                }
            }
        }
        Ok(closure)
    }

    /// Kahn's algorithm with declaration-order tie-break between ready nodes
    fn topo_order(&self, closure: &IndexSet<EntityName>) -> BuildResult<Vec<EntityName>> {
        let mut indegree: IndexMap<&EntityName, usize> = IndexMap::new();
        for entity in closure {
            let within = self
                .deps(entity)?
                .iter()
                .filter(|d| closure.contains(*d))
                .count();
            indegree.insert(entity, within);
        }

        // Declaration order of the whole closure, scanned each round for the
        // earliest-declared ready node
        let mut by_declaration: Vec<&EntityName> = closure.iter().collect();
        by_declaration.sort_by_key(|e| self.model.declaration_index(e).unwrap_or(usize::MAX));

        let mut ordered = Vec::with_capacity(closure.len());
        let mut emitted: IndexSet<&EntityName> = IndexSet::new();
        while ordered.len() < closure.len() {
            let next = by_declaration
                .iter()
                .find(|e| !emitted.contains(*e) && indegree.get(*e).copied() == Some(0))
                .copied();
            let Some(next) = next else {
                let stuck: Vec<String> = by_declaration
                    .iter()
                    .filter(|e| !emitted.contains(*e))
                    .map(|e| e.to_string())
                    .collect();
                return Err(BuildError::new(
                    BuildErrorKind::CycleDetected,
                    format!("dependency cycle among: {}", stuck.join(", ")),
                ));
            };
            emitted.insert(next);
            ordered.push(next.clone());
            for entity in closure {
                if self.deps(entity)?.contains(next) {
                    if let Some(d) = indegree.get_mut(entity) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
        }
        Ok(ordered)
    }

    /// Join keys for every source-fetched parent beyond the first of a
    /// multi-parent dependent
    fn resolve_joins(
        &self,
        closure: &IndexSet<EntityName>,
    ) -> BuildResult<IndexMap<EntityName, JoinSpec>> {
        let mut joins: IndexMap<EntityName, JoinSpec> = IndexMap::new();
        for entity in closure {
            let parents = self.graph.parents_of(entity);
            if parents.len() < 2 {
                continue;
            }
            let dependent = self.entity(entity)?;
            let first = &parents[0];
            let first_entity = self.entity(first)?;

            for parent_name in &parents[1..] {
                // Join keys only matter for parents the plan fetches
                if self.graph.provider(parent_name).is_none() {
                    continue;
                }
                let key = self.join_key(first_entity, parent_name, dependent)?;
                let spec = JoinSpec {
                    from_entity: first.to_string(),
                    key,
                };
                if let Some(existing) = joins.get(parent_name) {
                    if *existing != spec {
                        return Err(BuildError::new(
                            BuildErrorKind::AmbiguousParentKey,
                            format!(
                                "entity '{parent_name}' is joined as '{}.{}' and '{}.{}' by different dependents",
                                existing.from_entity, existing.key, spec.from_entity, spec.key
                            ),
                        ));
                    }
                } else {
                    joins.insert(parent_name.clone(), spec);
                }
            }
        }
        Ok(joins)
    }

    /// Resolve which field of the first parent keys the fetch of `parent`.
    /// An explicit `ParentRef::join_key` wins; otherwise: exact
    /// `{parent}Id`/`{parent}_id` attribute match, then expression-reference
    /// analysis over the dependent, then the primary `id` field.
    fn join_key(
        &self,
        first: &Entity,
        parent: &EntityName,
        dependent: &Entity,
    ) -> BuildResult<String> {
        if let Some(declared) = dependent
            .parents
            .iter()
            .find(|p| p.entity == *parent)
            .and_then(|p| p.join_key.as_ref())
        {
            if first.attribute(declared.as_str()).is_none() {
                return Err(BuildError::new(
                    BuildErrorKind::AmbiguousParentKey,
                    format!(
                        "declared join key '{declared}' is not an attribute of '{}'",
                        first.name
                    ),
                ));
            }
            return Ok(declared.to_string());
        }

        let wanted = format!("{}id", normalize(parent.as_str()));
        if let Some(attr) = first
            .attributes
            .iter()
            .find(|a| normalize(a.name.as_str()) == wanted)
        {
            return Ok(attr.name.to_string());
        }

        if let Some(field) = referenced_id_field(dependent, first.name.as_str()) {
            return Ok(field);
        }

        if first.attribute("id").is_some() {
            return Ok("id".to_string());
        }

        Err(BuildError::new(
            BuildErrorKind::AmbiguousParentKey,
            format!(
                "cannot infer which field of '{}' keys the fetch of '{parent}' for '{}'",
                first.name, dependent.name
            ),
        )
        .with_note("declare an explicit join key on the parent reference"))
    }

    /// Lower the ordered closure into plan steps
    fn lower(
        &self,
        ordered: &[EntityName],
        joins: &IndexMap<EntityName, JoinSpec>,
    ) -> BuildResult<Vec<PlanStep>> {
        let mut steps = Vec::new();
        for entity in ordered {
            match self.graph.provider(entity) {
                Some(provider) => match provider.kind {
                    EdgeKind::Provides | EdgeKind::Subscribes => steps.push(PlanStep::FetchSource {
                        source: provider.source.to_string(),
                        entity: entity.to_string(),
                        join: joins.get(entity).cloned(),
                        payload: None,
                    }),
                    EdgeKind::MutationResponse => {
                        let source = self.model.get_source(&provider.source).ok_or_else(|| {
                            BuildError::new(
                                BuildErrorKind::UnresolvedSourceBinding,
                                format!(
                                    "entity '{entity}' bound to missing source '{}'",
                                    provider.source
                                ),
                            )
                        })?;
                        steps.push(PlanStep::FetchSource {
                            source: provider.source.to_string(),
                            entity: entity.to_string(),
                            join: None,
                            payload: Some(source.entity.to_string()),
                        });
                    }
                    _ => {}
                },
                None => {
                    let decl = self.entity(entity)?;
                    if !decl.parents.is_empty() {
                        steps.push(PlanStep::Evaluate {
                            entity: entity.to_string(),
                            fan_out: fan_out_for(decl),
                        });
                    }
                    // Pure schemas with no provider are seeded by the host
                    // (request bodies, channel payloads); no step.
                }
            }
        }
        Ok(steps)
    }

    fn entity(&self, name: &EntityName) -> BuildResult<&'a Entity> {
        self.model.get_entity(name).ok_or_else(|| {
            BuildError::new(
                BuildErrorKind::UnknownEntity,
                format!("entity '{name}' is not declared"),
            )
        })
    }
}

/// Explicit fan-out marking for an entity with an array-shaped parent
fn fan_out_for(entity: &Entity) -> FanOut {
    match entity.parents.iter().find(|p| p.many) {
        None => FanOut::Single,
        Some(parent) => {
            if entity.many {
                FanOut::Collected {
                    parent: parent.entity.to_string(),
                }
            } else {
                FanOut::PerItem {
                    parent: parent.entity.to_string(),
                }
            }
        }
    }
}

/// Lowercase and strip underscores so `customer_id` matches `customerId`
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_lowercase()
}

/// Expression-reference analysis: the first `First.someId`-shaped access in
/// the dependent's expressions
fn referenced_id_field(dependent: &Entity, first_parent: &str) -> Option<String> {
    for attr in &dependent.attributes {
        if let Some(expr) = &attr.expr {
            if let Some(field) = find_id_access(expr, first_parent) {
                return Some(field);
            }
        }
    }
    None
}

fn find_id_access(expr: &RawExpr, base_name: &str) -> Option<String> {
    match expr {
        RawExpr::Member { base, name } => {
            if let RawExpr::Ident(ident) = base.as_ref() {
                if ident == base_name && normalize(name).ends_with("id") {
                    return Some(name.clone());
                }
            }
            find_id_access(base, base_name)
        }
        RawExpr::Index { base, key, default } => find_id_access(base, base_name)
            .or_else(|| find_id_access(key, base_name))
            .or_else(|| default.as_ref().and_then(|d| find_id_access(d, base_name))),
        RawExpr::Unary { expr, .. } => find_id_access(expr, base_name),
        RawExpr::Binary { lhs, rhs, .. } => {
            find_id_access(lhs, base_name).or_else(|| find_id_access(rhs, base_name))
        }
        RawExpr::Ternary {
            cond,
            then,
            otherwise,
        } => find_id_access(cond, base_name)
            .or_else(|| find_id_access(then, base_name))
            .or_else(|| find_id_access(otherwise, base_name)),
        RawExpr::Call { args, .. } => args.iter().find_map(|a| find_id_access(a, base_name)),
        RawExpr::Lambda { body, .. } => find_id_access(body, base_name),
        RawExpr::ListLit(items) => items.iter().find_map(|i| find_id_access(i, base_name)),
        RawExpr::RecordLit(fields) => {
            fields.iter().find_map(|(_, e)| find_id_access(e, base_name))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_model::{Attribute, BinOp, FieldType, ParentRef, Source, TypeKind};

    fn build(model: &Metamodel) -> Graph {
        Graph::build(model).unwrap()
    }

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
    fn fetch_then_evaluate_in_dependency_order() {
        let model = raw_doubled_model();
        let graph = build(&model);
        let mut planner = Planner::new(&graph, &model);
        let plan = planner.plan(&"Doubled".into()).unwrap();

        assert_eq!(plan.steps.len(), 2);
        assert!(matches!(
            &plan.steps[0],
            PlanStep::FetchSource { source, entity, .. }
                if source == "raw_api" && entity == "Raw"
        ));
        assert!(matches!(
            &plan.steps[1],
            PlanStep::Evaluate { entity, fan_out: FanOut::Single } if entity == "Doubled"
        ));
    }

    #[test]
    fn replanning_the_same_target_is_identical() {
        let model = raw_doubled_model();
        let graph = build(&model);
        let mut planner = Planner::new(&graph, &model);
        let first = planner.plan(&"Doubled".into()).unwrap();
        let second = planner.plan(&"Doubled".into()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[test]
    fn independent_parents_keep_declaration_order() {
        // Declared zebra-first; a name-sorted planner would flip them
        let model = Metamodel::new()
            .entity(
                Entity::new("Zeta")
                    .attr(Attribute::schema("id", FieldType::scalar(TypeKind::Int)))
                    .attr(Attribute::schema("v", FieldType::scalar(TypeKind::Int)))
                    .from_source("zeta_api"),
            )
            .entity(
                Entity::new("Alpha")
                    .attr(Attribute::schema("id", FieldType::scalar(TypeKind::Int)))
                    .from_source("alpha_api"),
            )
            .entity(
                Entity::new("Merged")
                    .parent(ParentRef::new("Zeta"))
                    .parent(ParentRef::new("Alpha"))
                    .attr(Attribute::computed(
                        "v",
                        FieldType::scalar(TypeKind::Int),
                        RawExpr::field("Zeta", "v"),
                    )),
            )
            .source(Source::read("zeta_api", "Zeta"))
            .source(Source::read("alpha_api", "Alpha"));

        let graph = build(&model);
        let mut planner = Planner::new(&graph, &model);
        let plan = planner.plan(&"Merged".into()).unwrap();

        let entities: Vec<_> = plan.steps.iter().map(|s| s.entity().to_string()).collect();
        assert_eq!(entities, vec!["Zeta", "Alpha", "Merged"]);
    }

    #[test]
    fn join_key_from_exact_attribute_match() {
        let model = Metamodel::new()
            .entity(
                Entity::new("Customer")
                    .attr(Attribute::schema("id", FieldType::scalar(TypeKind::Int)))
                    .attr(Attribute::schema("ordersId", FieldType::scalar(TypeKind::Int)))
                    .from_source("customer_api"),
            )
            .entity(
                Entity::new("Orders")
                    .attr(Attribute::schema("total", FieldType::scalar(TypeKind::Int)))
                    .from_source("orders_api"),
            )
            .entity(
                Entity::new("Report")
                    .parent(ParentRef::new("Customer"))
                    .parent(ParentRef::new("Orders"))
                    .attr(Attribute::computed(
                        "total",
                        FieldType::scalar(TypeKind::Int),
                        RawExpr::field("Orders", "total"),
                    )),
            )
            .source(Source::read("customer_api", "Customer"))
            .source(Source::read("orders_api", "Orders"));

        let graph = build(&model);
        let mut planner = Planner::new(&graph, &model);
        let plan = planner.plan(&"Report".into()).unwrap();

        let orders_fetch = plan
            .steps
            .iter()
            .find_map(|s| match s {
                PlanStep::FetchSource { entity, join, .. } if entity == "Orders" => join.clone(),
                _ => None,
            })
            .unwrap();
        assert_eq!(orders_fetch.from_entity, "Customer");
        assert_eq!(orders_fetch.key, "ordersId");
    }

    #[test]
    fn explicit_join_key_overrides_inference() {
        let model = Metamodel::new()
            .entity(
                Entity::new("Customer")
                    .attr(Attribute::schema("id", FieldType::scalar(TypeKind::Int)))
                    .attr(Attribute::schema("accountRef", FieldType::scalar(TypeKind::Int)))
                    .from_source("customer_api"),
            )
            .entity(
                Entity::new("Account")
                    .attr(Attribute::schema("balance", FieldType::scalar(TypeKind::Int)))
                    .from_source("account_api"),
            )
            .entity(
                Entity::new("View")
                    .parent(ParentRef::new("Customer"))
                    .parent(ParentRef::new("Account").with_join_key("accountRef"))
                    .attr(Attribute::computed(
                        "balance",
                        FieldType::scalar(TypeKind::Int),
                        RawExpr::field("Account", "balance"),
                    )),
            )
            .source(Source::read("customer_api", "Customer"))
            .source(Source::read("account_api", "Account"));

        let graph = build(&model);
        let mut planner = Planner::new(&graph, &model);
        let plan = planner.plan(&"View".into()).unwrap();

        let join = plan
            .steps
            .iter()
            .find_map(|s| match s {
                PlanStep::FetchSource { entity, join, .. } if entity == "Account" => join.clone(),
                _ => None,
            })
            .unwrap();
        assert_eq!(join.key, "accountRef");
    }

    #[test]
    fn unresolvable_join_key_fails_at_plan_time() {
        let model = Metamodel::new()
            .entity(
                Entity::new("Left")
                    .attr(Attribute::schema("name", FieldType::scalar(TypeKind::Text)))
                    .from_source("left_api"),
            )
            .entity(
                Entity::new("Right")
                    .attr(Attribute::schema("v", FieldType::scalar(TypeKind::Int)))
                    .from_source("right_api"),
            )
            .entity(
                Entity::new("Join")
                    .parent(ParentRef::new("Left"))
                    .parent(ParentRef::new("Right"))
                    .attr(Attribute::computed(
                        "v",
                        FieldType::scalar(TypeKind::Int),
                        RawExpr::field("Right", "v"),
                    )),
            )
            .source(Source::read("left_api", "Left"))
            .source(Source::read("right_api", "Right"));

        let graph = build(&model);
        let mut planner = Planner::new(&graph, &model);
        let err = planner.plan(&"Join".into()).unwrap_err();
        assert_eq!(err.kind, BuildErrorKind::AmbiguousParentKey);
    }

    #[test]
    fn mutation_response_fetch_sends_payload_entity() {
        let model = Metamodel::new()
            .entity(
                Entity::new("NewOrder")
                    .attr(Attribute::schema("total", FieldType::scalar(TypeKind::Int))),
            )
            .entity(
                Entity::new("SaveResult")
                    .attr(Attribute::schema("orderId", FieldType::scalar(TypeKind::Int))),
            )
            .source(Source::write("save_order", "NewOrder").with_response("SaveResult"));

        let graph = build(&model);
        let mut planner = Planner::new(&graph, &model);
        let plan = planner.plan(&"SaveResult".into()).unwrap();

        assert_eq!(plan.steps.len(), 1);
        assert!(matches!(
            &plan.steps[0],
            PlanStep::FetchSource { source, payload: Some(p), .. }
                if source == "save_order" && p == "NewOrder"
        ));
    }

    #[test]
    fn read_plan_never_touches_a_write_source() {
        // Account is both a GET response and a POST payload; planning the
        // read target must involve only the read source
        let model = Metamodel::new()
            .entity(
                Entity::new("Account")
                    .attr(Attribute::schema("id", FieldType::scalar(TypeKind::Int)))
                    .from_source("get_account"),
            )
            .source(Source::read("get_account", "Account"))
            .source(Source::write("save_account", "Account"));

        let graph = build(&model);
        let mut planner = Planner::new(&graph, &model);
        let plan = planner.plan(&"Account".into()).unwrap();

        assert_eq!(plan.steps.len(), 1);
        assert!(matches!(
            &plan.steps[0],
            PlanStep::FetchSource { source, payload: None, .. } if source == "get_account"
        ));
    }

    #[test]
    fn many_parent_marks_fan_out() {
        let model = Metamodel::new()
            .entity(
                Entity::new("Item")
                    .attr(Attribute::schema("price", FieldType::scalar(TypeKind::Int)))
                    .from_source("items_api"),
            )
            .entity(
                Entity::new("Line")
                    .parent(ParentRef::many("Item"))
                    .attr(Attribute::computed(
                        "total",
                        FieldType::scalar(TypeKind::Int),
                        RawExpr::field("Item", "price"),
                    )),
            )
            .entity(
                Entity::new("Summary")
                    .parent(ParentRef::many("Item"))
                    .list_shaped()
                    .attr(Attribute::computed(
                        "p",
                        FieldType::scalar(TypeKind::Int),
                        RawExpr::field("Item", "price"),
                    )),
            )
            .source(Source::read("items_api", "Item"));

        let graph = build(&model);
        let mut planner = Planner::new(&graph, &model);

        let line = planner.plan(&"Line".into()).unwrap();
        assert!(matches!(
            &line.steps[1],
            PlanStep::Evaluate { fan_out: FanOut::PerItem { parent }, .. } if parent == "Item"
        ));

        let summary = planner.plan(&"Summary".into()).unwrap();
        assert!(matches!(
            &summary.steps[1],
            PlanStep::Evaluate { fan_out: FanOut::Collected { parent }, .. } if parent == "Item"
        ));
    }
}
