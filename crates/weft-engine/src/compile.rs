//! Compilation facade
//!
//! `compile` runs the whole pipeline — graph build, expression compilation,
//! plans for every REST endpoint, chains for every channel — and returns one
//! immutable `CompiledModel` the host shares read-only across all requests.
//! Errors are collected across phases so a broken model reports everything
//! in one pass.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{info, instrument};

use weft_model::{Endpoint, Metamodel};
use weft_runtime::builtins::BuiltinRegistry;
use weft_runtime::chain::DuplexChains;
use weft_runtime::plan::ExecutionPlan;
use weft_runtime::program::EntityPrograms;
use weft_runtime::{Context, Executor};

use crate::chain::{resolve_inbound, resolve_outbound};
use crate::error::BuildError;
use crate::expr::ExprCompiler;
use crate::graph::Graph;
use crate::plan::Planner;

/// Everything the host needs at request time, built once at startup
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub graph: Graph,
    pub programs: Arc<EntityPrograms>,
    /// Plans keyed by target entity name
    pub plans: IndexMap<String, Arc<ExecutionPlan>>,
    /// Duplex chain pairs keyed by channel endpoint name
    pub chains: IndexMap<String, DuplexChains>,
    pub builtins: Arc<BuiltinRegistry>,
}

impl CompiledModel {
    /// Fresh per-request/per-message context
    pub fn new_context(&self) -> Context {
        Context::new(Arc::clone(&self.builtins))
    }

    pub fn executor(&self) -> Executor {
        Executor::new(Arc::clone(&self.programs))
    }

    pub fn plan_for(&self, target: &str) -> Option<&Arc<ExecutionPlan>> {
        self.plans.get(target)
    }

    pub fn chains_for(&self, channel: &str) -> Option<&DuplexChains> {
        self.chains.get(channel)
    }

    /// Human-readable summary of every compiled artifact
    pub fn describe(&self) -> String {
        let mut out = self.graph.describe();
        for plan in self.plans.values() {
            out.push_str(&plan.describe());
        }
        for (channel, chains) in &self.chains {
            if let Some(inbound) = &chains.inbound {
                out.push_str(&format!("{channel} inbound: {inbound}\n"));
            }
            if let Some(outbound) = &chains.outbound {
                out.push_str(&format!("{channel} outbound: {outbound}\n"));
            }
        }
        out
    }
}

/// Compile a validated metamodel into executable artifacts
#[instrument(skip(model), fields(
    entities = model.entities().count(),
    endpoints = model.endpoints().len(),
))]
pub fn compile(model: &Metamodel) -> Result<CompiledModel, Vec<BuildError>> {
    let graph = Graph::build(model)?;

    let builtins = Arc::new(BuiltinRegistry::standard());
    let mut errors = Vec::new();

    let compiler = ExprCompiler::new(model, &builtins);
    let mut programs = EntityPrograms::default();
    for entity in model.entities() {
        match compiler.compile_entity(entity) {
            Ok(compiled) => programs.insert(compiled),
            Err(mut entity_errors) => errors.append(&mut entity_errors),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let mut planner = Planner::new(&graph, model);
    let mut plans = IndexMap::new();
    let mut chains = IndexMap::new();
    for endpoint in model.endpoints() {
        match endpoint {
            Endpoint::Rest { entity, .. } => match planner.plan(entity) {
                Ok(plan) => {
                    plans.insert(entity.to_string(), plan);
                }
                Err(e) => errors.push(e),
            },
            Endpoint::Channel {
                name,
                inbound,
                outbound,
                ..
            } => {
                let mut duplex = DuplexChains::default();
                if let Some(client) = inbound {
                    match resolve_inbound(&graph, client) {
                        Ok(chain) => duplex.inbound = Some(chain),
                        Err(e) => errors.push(e),
                    }
                }
                if let Some(client) = outbound {
                    match resolve_outbound(&graph, client) {
                        Ok(chain) => duplex.outbound = Some(chain),
                        Err(e) => errors.push(e),
                    }
                }
                chains.insert(name.clone(), duplex);
            }
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    info!(
        plans = plans.len(),
        chains = chains.len(),
        "model compiled"
    );
    Ok(CompiledModel {
        graph,
        programs: Arc::new(programs),
        plans,
        chains,
        builtins,
    })
}
