//! Duplex chains
//!
//! An ordered path of entities from a root to a terminal, used for WebSocket
//! flows. Inbound chains run client entity → external-bound terminal;
//! outbound chains run source-bound root → client-facing entity. The engine's
//! chain resolver discovers the terminal by graph search; this type only
//! carries the result.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered entity path for one direction of a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    entities: Vec<String>,
}

impl Chain {
    /// Build a chain from an ordered, non-empty entity path
    pub fn new(entities: Vec<String>) -> Self {
        debug_assert!(!entities.is_empty(), "chains have at least one entity");
        Self { entities }
    }

    /// First entity of the path (client entity inbound, raw schema outbound)
    pub fn root(&self) -> &str {
        &self.entities[0]
    }

    /// Last entity of the path (external-bound terminal inbound, client
    /// entity outbound)
    pub fn terminal(&self) -> &str {
        self.entities
            .last()
            .map(String::as_str)
            .unwrap_or_else(|| self.root())
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entities.join(" -> "))
    }
}

/// Inbound/outbound chain pair for one bidirectional channel
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DuplexChains {
    pub inbound: Option<Chain>,
    pub outbound: Option<Chain>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_terminal() {
        let chain = Chain::new(vec!["ClientMsg".into(), "Processed".into()]);
        assert_eq!(chain.root(), "ClientMsg");
        assert_eq!(chain.terminal(), "Processed");
        assert_eq!(chain.to_string(), "ClientMsg -> Processed");
    }

    #[test]
    fn single_entity_chain() {
        let chain = Chain::new(vec!["Echo".into()]);
        assert_eq!(chain.root(), chain.terminal());
        assert_eq!(chain.len(), 1);
    }
}
