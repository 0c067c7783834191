//! Execution plans
//!
//! A plan is the topologically ordered list of fetch/evaluate steps needed to
//! materialize one target entity. Plans are built once per distinct target by
//! the engine's planner and shared read-only afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a join key feeds a dependent fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Entity already materialized earlier in the plan
    pub from_entity: String,
    /// Field of that entity supplying the lookup key
    pub key: String,
}

/// Fan-out marking for evaluate steps with an array-shaped parent.
///
/// This is decided at plan-build time and recorded explicitly; the evaluator
/// never infers it from runtime value shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanOut {
    /// Evaluate once against the context as-is
    Single,
    /// Parent is a list; evaluate once per item with the parent name bound
    /// to the current item
    PerItem { parent: String },
    /// Parent is a list and the dependent is itself list-shaped; bind the
    /// whole list as one value
    Collected { parent: String },
}

/// One step of an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanStep {
    /// Call the fetch collaborator and store the payload under `entity`
    FetchSource {
        source: String,
        entity: String,
        /// Lookup key drawn from an earlier entity (multi-parent fan-in)
        join: Option<JoinSpec>,
        /// Entity sent as the request body (mutation sources)
        payload: Option<String>,
    },
    /// Evaluate the entity's compiled attributes and store the record
    Evaluate { entity: String, fan_out: FanOut },
}

impl PlanStep {
    pub fn entity(&self) -> &str {
        match self {
            PlanStep::FetchSource { entity, .. } | PlanStep::Evaluate { entity, .. } => entity,
        }
    }
}

/// Ordered steps materializing one target entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub target: String,
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// One-line-per-step rendering for host debugging
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "plan for {}:", self.target)?;
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                PlanStep::FetchSource {
                    source,
                    entity,
                    join,
                    payload,
                } => {
                    write!(f, "  {i}: fetch {entity} from {source}")?;
                    if let Some(join) = join {
                        write!(f, " keyed by {}.{}", join.from_entity, join.key)?;
                    }
                    if let Some(payload) = payload {
                        write!(f, " sending {payload}")?;
                    }
                    writeln!(f)?;
                }
                PlanStep::Evaluate { entity, fan_out } => {
                    write!(f, "  {i}: evaluate {entity}")?;
                    match fan_out {
                        FanOut::Single => writeln!(f)?,
                        FanOut::PerItem { parent } => writeln!(f, " per item of {parent}")?,
                        FanOut::Collected { parent } => writeln!(f, " over all of {parent}")?,
                    }
                }
            }
        }
        Ok(())
    }
}
