//! Plan and chain execution
//!
//! The [`Executor`] walks a compiled [`ExecutionPlan`] step by step against a
//! per-request [`Context`], delegating all transport I/O to the host through
//! the [`SourceFetcher`] trait. Chain execution is the synchronous
//! counterpart for channel messages: no fetches, just entity-to-entity
//! evaluation along a resolved path.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, trace};

use crate::chain::Chain;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::plan::{ExecutionPlan, FanOut, PlanStep};
use crate::program::EntityPrograms;
use crate::value::Value;

/// Host-provided transport collaborator. The executor decides *when* and
/// *with what* to call a source; the host decides *how* (HTTP, queue, mock).
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch from or deliver to a named source. `request` is the join-key
    /// record, the mutation payload, or the seeded endpoint parameters.
    async fn fetch(&self, source: &str, request: &Value) -> Result<Value>;
}

/// Executes plans and chains against per-request contexts.
///
/// Holds only shared immutable state, so one executor serves all concurrent
/// requests.
#[derive(Clone)]
pub struct Executor {
    programs: Arc<EntityPrograms>,
}

impl Executor {
    pub fn new(programs: Arc<EntityPrograms>) -> Self {
        Self { programs }
    }

    pub fn programs(&self) -> &EntityPrograms {
        &self.programs
    }

    /// Run a plan to completion and return the target entity's value.
    ///
    /// Steps run strictly in plan order; a failing step aborts the request
    /// with the step position attached.
    #[instrument(skip(self, ctx, fetcher), fields(target = %plan.target))]
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        ctx: &mut Context,
        fetcher: &dyn SourceFetcher,
    ) -> Result<Value> {
        debug!(steps = plan.steps.len(), "executing plan");
        for (index, step) in plan.steps.iter().enumerate() {
            self.run_step(step, ctx, fetcher)
                .await
                .map_err(|e| e.at_step(step.entity(), index))?;
        }
        ctx.get(&plan.target).cloned().ok_or_else(|| Error::Unresolved {
            name: plan.target.clone(),
            path: "plan target".to_string(),
        })
    }

    async fn run_step(
        &self,
        step: &PlanStep,
        ctx: &mut Context,
        fetcher: &dyn SourceFetcher,
    ) -> Result<()> {
        match step {
            PlanStep::FetchSource {
                source,
                entity,
                join,
                payload,
            } => {
                let request = self.fetch_request(ctx, join.as_ref(), payload.as_deref())?;
                trace!(%source, %entity, "fetching");
                let mut value = fetcher.fetch(source, &request).await?;
                if let Some(program) = self.programs.get(entity) {
                    value = program.wrap(value)?;
                }
                ctx.insert(entity, value);
            }
            PlanStep::Evaluate { entity, fan_out } => {
                let value = self.evaluate_entity(entity, fan_out, ctx)?;
                ctx.insert(entity, value);
            }
        }
        Ok(())
    }

    /// Assemble the request value for a fetch step: the mutation payload
    /// entity if one is named, otherwise the seeded parameters plus any
    /// join key drawn from an earlier entity.
    fn fetch_request(
        &self,
        ctx: &Context,
        join: Option<&crate::plan::JoinSpec>,
        payload: Option<&str>,
    ) -> Result<Value> {
        if let Some(payload) = payload {
            return ctx.get(payload).cloned().ok_or_else(|| Error::Unresolved {
                name: payload.to_string(),
                path: "fetch payload".to_string(),
            });
        }
        let mut request = ctx.params_record();
        if let Some(join) = join {
            let from = ctx.get(&join.from_entity).ok_or_else(|| Error::Unresolved {
                name: join.from_entity.clone(),
                path: "fetch join".to_string(),
            })?;
            let key = from.get(&join.key).cloned().ok_or_else(|| Error::MissingField {
                field: format!("{}.{}", join.from_entity, join.key),
                path: "fetch join".to_string(),
            })?;
            if let Value::Record(rec) = &mut request {
                rec.insert(join.key.clone(), key);
            }
        }
        Ok(request)
    }

    fn evaluate_entity(&self, entity: &str, fan_out: &FanOut, ctx: &Context) -> Result<Value> {
        let program = self.programs.get(entity).ok_or_else(|| Error::UnknownEntity {
            entity: entity.to_string(),
        })?;
        match fan_out {
            // Collected binds the whole parent list as one value, which is
            // exactly what the context already holds
            FanOut::Single | FanOut::Collected { .. } => program.assemble(ctx, None),
            FanOut::PerItem { parent } => {
                let parent_value = ctx.get(parent).ok_or_else(|| Error::Unresolved {
                    name: parent.clone(),
                    path: format!("{entity} fan-out"),
                })?;
                let Value::List(items) = parent_value else {
                    return Err(Error::TypeMismatch {
                        path: format!("{entity} fan-out"),
                        expected: "list".to_string(),
                        actual: parent_value.type_name().to_string(),
                    });
                };
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(program.assemble(ctx, Some((parent, item)))?);
                }
                Ok(Value::List(out))
            }
        }
    }

    /// Run an inbound chain: auto-wrap the raw client value into the root
    /// entity, evaluate each dependent in order, return the terminal record
    /// for delivery to the sink source.
    #[instrument(skip(self, ctx, raw), fields(chain = %chain))]
    pub fn execute_inbound(&self, chain: &Chain, raw: Value, ctx: &mut Context) -> Result<Value> {
        self.run_chain(chain, raw, ctx)
    }

    /// Run an outbound chain: auto-wrap the raw source payload into the root
    /// entity, evaluate forward, auto-unwrap the terminal for the client.
    #[instrument(skip(self, ctx, raw), fields(chain = %chain))]
    pub fn execute_outbound(&self, chain: &Chain, raw: Value, ctx: &mut Context) -> Result<Value> {
        let terminal = self.run_chain(chain, raw, ctx)?;
        match self.programs.get(chain.terminal()) {
            Some(program) => program.unwrap(terminal),
            None => Ok(terminal),
        }
    }

    fn run_chain(&self, chain: &Chain, raw: Value, ctx: &mut Context) -> Result<Value> {
        let root = chain.root();
        let rooted = match self.programs.get(root) {
            Some(program) => program.wrap(raw)?,
            None => raw,
        };
        debug!(%root, "seeding chain root");
        ctx.insert(root, rooted);

        for (index, entity) in chain.entities().iter().enumerate().skip(1) {
            let value = self
                .evaluate_entity(entity, &FanOut::Single, ctx)
                .map_err(|e| e.at_step(entity, index))?;
            ctx.insert(entity, value);
        }
        ctx.get(chain.terminal()).cloned().ok_or_else(|| Error::Unresolved {
            name: chain.terminal().to_string(),
            path: "chain terminal".to_string(),
        })
    }
}
