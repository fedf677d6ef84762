//! The pipeline error taxonomy
//!
//! Load and resolution problems abort the pipeline before any host state
//! is touched. Validation problems (a preparer rejecting rendered inputs)
//! ride along in the graph and become fatal statuses during planning.
//! Check and apply failures are captured into statuses and never surface
//! as errors here.

use graph::{NodeId, TraversalError};
use std::path::PathBuf;
use thiserror::Error;

/// A syntactic or schema problem in module source; fatal before the
/// pipeline starts
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("{id}: duplicate declaration")]
    Duplicate { id: NodeId },

    #[error("{id}: no resource kind {kind:?} is registered")]
    UnknownKind { id: NodeId, kind: String },

    #[error("{id}: {reason}")]
    Schema { id: NodeId, reason: String },

    #[error("module {id}: required param {name:?} was not supplied")]
    MissingParam { id: NodeId, name: String },

    #[error("module {id}: argument {name:?} does not match a declared param")]
    UnknownArgument { id: NodeId, name: String },

    #[error("param {id}: expected a {expected}, got a {got}")]
    ParamType {
        id: NodeId,
        expected: &'static str,
        got: &'static str,
    },

    #[error("module include cycle through {}", path.display())]
    RecursiveModule { path: PathBuf },

    #[error("{id}: invalid declaration")]
    Resource {
        id: NodeId,
        #[source]
        source: anyhow::Error,
    },
}

/// An unknown id, missing param, or would-be cycle found while resolving
/// dependencies; the graph cannot be trusted, so the pipeline aborts
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("{node}: depends on {target:?}, which does not exist")]
    UnknownTarget { node: NodeId, target: String },

    #[error("{node}: no param {name:?} in lexical scope")]
    MissingParam { node: NodeId, name: String },

    #[error("dependency cycle: {}", members.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(" -> "))]
    Cycle { members: Vec<NodeId> },

    #[error("{node}: template in {field}: {reason}")]
    Template {
        node: NodeId,
        field: String,
        reason: String,
    },
}

/// Top-level pipeline failure
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Cooperative shutdown; carries whatever per-node errors had been
    /// gathered when the run stopped
    #[error("run cancelled{}", if errors.is_empty() { String::new() } else { format!(" ({} node errors)", errors.len()) })]
    Cancelled { errors: Vec<String> },

    /// A graph engine invariant failed; this is a bug, not a resource
    /// problem
    #[error("graph traversal failed: {0}")]
    Traversal(String),
}

impl PipelineError {
    /// Fold a traversal failure into the taxonomy: cancellation becomes
    /// the sentinel, anything else is an engine-level failure
    pub(crate) fn from_traversal(err: TraversalError) -> Self {
        if err.cancelled {
            PipelineError::Cancelled {
                errors: err
                    .errors
                    .iter()
                    .map(|(id, e)| format!("{id}: {e:#}"))
                    .collect(),
            }
        } else {
            PipelineError::Traversal(err.to_string())
        }
    }
}
