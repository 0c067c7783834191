//! Evaluation-time errors
//!
//! Every runtime failure aborts only the request/message that raised it and
//! carries enough structure for the transport host to translate it into a
//! protocol failure. Retry policy belongs to the fetch collaborator.

use thiserror::Error;

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Evaluation-time errors
#[derive(Debug, Error)]
pub enum Error {
    // `source_name`, not `source`: the latter would be picked up as the
    // std::error::Error source chain
    #[error("fetch failed for source '{source_name}': {message}")]
    FetchFailure {
        source_name: String,
        message: String,
    },

    #[error("unresolved reference '{name}' at {path}")]
    Unresolved { name: String, path: String },

    #[error("type mismatch at {path}: expected {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("division by zero at {path}")]
    DivisionByZero { path: String },

    #[error("integer overflow at {path}")]
    Overflow { path: String },

    #[error("missing field '{field}' at {path}")]
    MissingField { field: String, path: String },

    #[error("builtin '{name}' failed at {path}: {message}")]
    BuiltinArgument {
        name: String,
        path: String,
        message: String,
    },

    #[error("unknown builtin '{name}' at {path}")]
    UnknownBuiltin { name: String, path: String },

    #[error("wrapper contract violated for entity '{entity}': {message}")]
    WrapperContract { entity: String, message: String },

    #[error("entity '{entity}' not found in compiled programs")]
    UnknownEntity { entity: String },

    #[error("entity '{entity}' failed at plan step {step}: {cause}")]
    StepFailed {
        entity: String,
        step: usize,
        #[source]
        cause: Box<Error>,
    },
}

impl Error {
    /// Wrap a step-level failure with its plan position
    pub fn at_step(self, entity: &str, step: usize) -> Self {
        Error::StepFailed {
            entity: entity.to_string(),
            step,
            cause: Box::new(self),
        }
    }
}
