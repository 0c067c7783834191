//! Weft runtime
//!
//! Executes compiled plans and chains against per-request contexts. All the
//! types in this crate are produced by `weft-engine` at startup and shared
//! read-only across requests; only the [`Context`] is per-request state.

pub mod builtins;
pub mod chain;
pub mod context;
pub mod error;
pub mod executor;
pub mod plan;
pub mod program;
pub mod value;

pub use builtins::{Arity, BuiltinRegistry, Signature};
pub use chain::Chain;
pub use context::Context;
pub use error::{Error, Result};
pub use executor::{Executor, SourceFetcher};
pub use plan::{ExecutionPlan, FanOut, JoinSpec, PlanStep};
pub use program::{CollectOp, CompiledAttribute, CompiledEntity, CompiledExpr, EntityPrograms, EvalScope};
pub use value::Value;
