//! Per-request evaluation context
//!
//! A fresh context is created at the start of every REST request or channel
//! message and discarded at the end; contexts are never shared across
//! requests, which is what makes concurrent evaluation trivially safe.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::builtins::BuiltinRegistry;
use crate::value::Value;

/// Request/message-scoped value store
pub struct Context {
    /// Materialized entity values keyed by entity name
    values: IndexMap<String, Value>,
    /// Endpoint parameters seeded before the first plan step
    params: IndexMap<String, Value>,
    /// Shared immutable builtin table
    builtins: Arc<BuiltinRegistry>,
}

impl Context {
    pub fn new(builtins: Arc<BuiltinRegistry>) -> Self {
        Self {
            values: IndexMap::new(),
            params: IndexMap::new(),
            builtins,
        }
    }

    /// Seed an endpoint parameter
    pub fn seed_param(&mut self, name: &str, value: Value) {
        self.params.insert(name.to_string(), value);
    }

    /// Store a materialized entity value
    pub fn insert(&mut self, entity: &str, value: Value) {
        self.values.insert(entity.to_string(), value);
    }

    pub fn get(&self, entity: &str) -> Option<&Value> {
        self.values.get(entity)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// All seeded parameters as a single record, the default fetch payload
    pub fn params_record(&self) -> Value {
        Value::Record(self.params.clone())
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
