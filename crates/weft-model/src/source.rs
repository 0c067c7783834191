//! Source and endpoint declarations
//!
//! Sources describe external REST/WebSocket endpoints the engine fetches
//! from or sends to. Endpoints describe the client-facing surface whose
//! handlers consume the engine's plans and chains. Both are graph nodes;
//! neither owns entity data.

use serde::{Deserialize, Serialize};

use crate::names::{EntityName, SourceName};
use crate::types::FieldType;

/// Declared direction of a source
///
/// Edge classification keys off this tag alone. A read source never
/// contributes write edges no matter which entities it shares with a
/// write source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// REST GET-like: engine pulls an entity value
    Read,
    /// REST POST-like: engine pushes a payload, may receive a response entity
    Write,
    /// WebSocket inbound stream from the external system
    Subscribe,
    /// WebSocket outbound stream to the external system
    Publish,
}

impl Direction {
    /// Source delivers values into the graph
    pub fn is_inbound(&self) -> bool {
        matches!(self, Direction::Read | Direction::Subscribe)
    }

    /// Source accepts values out of the graph
    pub fn is_outbound(&self) -> bool {
        matches!(self, Direction::Write | Direction::Publish)
    }
}

/// External endpoint descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: SourceName,
    pub direction: Direction,
    /// Entity type this source exchanges: the value it provides (read,
    /// subscribe), or the payload it consumes (write, publish)
    pub entity: EntityName,
    /// For write sources: entity type of the response, if any
    pub response: Option<EntityName>,
}

impl Source {
    pub fn read(name: &str, entity: &str) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Read,
            entity: entity.into(),
            response: None,
        }
    }

    pub fn write(name: &str, payload: &str) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Write,
            entity: payload.into(),
            response: None,
        }
    }

    pub fn subscribe(name: &str, entity: &str) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Subscribe,
            entity: entity.into(),
            response: None,
        }
    }

    pub fn publish(name: &str, payload: &str) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Publish,
            entity: payload.into(),
            response: None,
        }
    }

    pub fn with_response(mut self, entity: &str) -> Self {
        self.response = Some(entity.into());
        self
    }
}

/// A typed endpoint parameter, seeded into the request context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: FieldType,
}

impl Param {
    pub fn new(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ty,
        }
    }
}

/// Client-facing surface declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Endpoint {
    /// REST endpoint returning one target entity
    Rest {
        name: String,
        entity: EntityName,
        params: Vec<Param>,
    },
    /// Bidirectional WebSocket channel
    Channel {
        name: String,
        /// Entity the client publishes into the channel
        inbound: Option<EntityName>,
        /// Entity the channel emits to the client
        outbound: Option<EntityName>,
        params: Vec<Param>,
    },
}

impl Endpoint {
    pub fn name(&self) -> &str {
        match self {
            Endpoint::Rest { name, .. } | Endpoint::Channel { name, .. } => name,
        }
    }

    pub fn params(&self) -> &[Param] {
        match self {
            Endpoint::Rest { params, .. } | Endpoint::Channel { params, .. } => params,
        }
    }
}
