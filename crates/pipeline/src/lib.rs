//! # Pipeline
//!
//! The convergence pipeline: a sequence of graph transforms, each
//! consuming the previous stage's graph and emitting a new one with
//! stronger invariants.
//!
//! ```text
//! load -> merge -> resolve -> render -> plan -> apply
//! ```
//!
//! - **load**: module source to fragment graph; module calls inlined,
//!   param values settled.
//! - **merge**: fragment graph to preparer graph; scopes assembled,
//!   preparers instantiated through the registry.
//! - **resolve**: dependency edges synthesized from explicit `depends`
//!   lists, template references, and control flow; cycles rejected.
//! - **render**: preparer graph to task graph; templates evaluated,
//!   conditional tasks gated by their case.
//! - **plan**: every task checked; statuses accumulated.
//! - **apply**: every changed task converged and confirmed.
//!
//! Intermediate graphs are plain values: callers keep whichever stages
//! they need for diagnostics and feed the latest to the next stage.

pub mod apply;
pub mod ast;
pub mod error;
pub mod load;
pub mod merge;
pub mod plan;
pub mod render;
pub mod resolve;

pub use apply::{apply, ApplyOptions, NoProgress, Progress};
pub use ast::{Decl, ModuleSource, ParamType};
pub use error::{LoadError, PipelineError, ResolutionError};
pub use load::{load, Fragment, FragmentValue};
pub use merge::{merge, PrepNode, PrepValue};
pub use plan::{has_fatal, plan, PlanEntry};
pub use render::{render, select_branches, Selection, TaskValue};
pub use resolve::resolve;

use graph::{CancelToken, Graph, WalkOptions};
use indexmap::IndexMap;
use resource::{Environment, Registry, Value};
use std::path::Path;

/// Shared context for one convergence run
///
/// The environment is captured once here; the cancellation token threads
/// through every traversal and into every check and apply via the
/// renderer.
#[derive(Debug)]
pub struct RunContext {
    pub env: Environment,
    pub cancel: CancelToken,
}

impl RunContext {
    /// Capture the process environment for a real run
    pub fn capture() -> Self {
        Self {
            env: Environment::capture(),
            cancel: CancelToken::new(),
        }
    }

    /// An empty environment and a fresh token, for tests
    pub fn for_tests() -> Self {
        Self {
            env: Environment::empty(),
            cancel: CancelToken::new(),
        }
    }
}

/// Load, merge, and resolve a module source file: everything up to the
/// point where the graph can be rendered, planned, or printed
pub fn load_resolved(
    path: &Path,
    overrides: &IndexMap<String, Value>,
    registry: &Registry,
    opts: &WalkOptions,
) -> Result<Graph<PrepNode>, PipelineError> {
    let fragments = load(path, overrides)?;
    let prep = merge(&fragments, registry, opts)?;
    resolve(&prep, opts)
}
