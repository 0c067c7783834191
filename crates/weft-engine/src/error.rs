//! Build-time diagnostics
//!
//! Everything structural fails here, at model-compile time, so the runtime
//! never has to guess: a plan that builds is a plan that can execute (modulo
//! I/O). Compilation entry points return `Result<_, Vec<BuildError>>` and
//! keep collecting so authors see every problem in one pass.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified build failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildErrorKind {
    CycleDetected,
    /// Read and write sources resolve to one entity without distinct tags
    AmbiguousEdgeKind,
    AmbiguousParentKey,
    UnresolvedSourceBinding,
    /// Duplex chain has no reachable target-bound descendant
    UnresolvedTerminalEntity,
    UnknownEntity,
    UnknownSource,
    UnresolvedReference,
    UnknownBuiltin,
    WrongArgCount,
    /// Composite/pure dichotomy violation
    MixedEntity,
    /// More than one inbound provides/mutation-response/subscribes edge
    DuplicateProvider,
}

impl fmt::Display for BuildErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildErrorKind::CycleDetected => "cycle detected",
            BuildErrorKind::AmbiguousEdgeKind => "ambiguous edge kind",
            BuildErrorKind::AmbiguousParentKey => "ambiguous parent key",
            BuildErrorKind::UnresolvedSourceBinding => "unresolved source binding",
            BuildErrorKind::UnresolvedTerminalEntity => "unresolved terminal entity",
            BuildErrorKind::UnknownEntity => "unknown entity",
            BuildErrorKind::UnknownSource => "unknown source",
            BuildErrorKind::UnresolvedReference => "unresolved reference",
            BuildErrorKind::UnknownBuiltin => "unknown builtin",
            BuildErrorKind::WrongArgCount => "wrong argument count",
            BuildErrorKind::MixedEntity => "mixed entity",
            BuildErrorKind::DuplicateProvider => "duplicate provider",
        };
        f.write_str(s)
    }
}

/// A single structured diagnostic
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct BuildError {
    pub kind: BuildErrorKind,
    pub message: String,
    /// Supplementary context lines, rendered under the message
    pub notes: Vec<String>,
}

impl BuildError {
    pub fn new(kind: BuildErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Multi-line rendering including notes
    pub fn render(&self) -> String {
        let mut out = self.to_string();
        for note in &self.notes {
            out.push_str("\n  note: ");
            out.push_str(note);
        }
        out
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
