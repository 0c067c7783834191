//! Name types
//!
//! String newtypes for the three namespaces of the metamodel. Keeping them
//! distinct prevents an entity name from being used where a source name is
//! expected when wiring the graph.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique name of an entity declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityName(pub String);

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl EntityName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique name of a source declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceName(pub String);

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl SourceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name of an attribute within an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrName(pub String);

impl fmt::Display for AttrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AttrName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AttrName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
