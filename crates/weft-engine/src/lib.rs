//! Weft engine
//!
//! Build-time compiler for the Weft metamodel. Consumes validated entity,
//! source, and endpoint declarations (with parsed expression ASTs) and
//! produces the immutable artifacts `weft-runtime` executes: a typed
//! dependency graph, per-target execution plans, compiled entity programs,
//! and duplex channel chains. All structural failures surface here as
//! [`BuildError`]s; a model that compiles never fails on structure at
//! request time.

pub mod chain;
pub mod compile;
pub mod error;
pub mod expr;
pub mod graph;
pub mod plan;

pub use chain::{resolve_inbound, resolve_outbound};
pub use compile::{compile, CompiledModel};
pub use error::{BuildError, BuildErrorKind, BuildResult};
pub use expr::ExprCompiler;
pub use graph::{Edge, EdgeKind, Graph, Provider, Sink};
pub use plan::Planner;
