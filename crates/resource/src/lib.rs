//! # Resource
//!
//! The resource protocol: the two-phase check/apply contract every
//! resource kind implements, plus the renderer that supplies parameter
//! values and template functions to resources.
//!
//! ## Core Concepts
//!
//! - **Preparer**: the declaration-shaped value carrying raw template
//!   strings. `prepare` renders and validates them into a task.
//! - **Task**: a prepared unit with `check` (read-only state comparison)
//!   and `apply` (idempotent convergence), both producing a
//!   [`TaskStatus`].
//! - **Renderer**: evaluates `{{…}}` templates against a lexical
//!   parameter scope, with a closed set of typed template functions.
//! - **Registry**: maps kind strings to preparer factories; global and
//!   read-only after startup.
//! - **Control flow**: `macro.switch`/`macro.case` prune subgraphs based
//!   on rendered predicates.

pub mod control;
pub mod file;
pub mod registry;
pub mod renderer;
pub mod status;
pub mod template;
pub mod value;

pub use renderer::{Environment, LookupSource, NoLookups, RenderError, Renderer, Scope};
pub use registry::{Registry, RegistryError};
pub use status::{Diff, StatusCode, TaskStatus};
pub use template::References;
pub use value::{Value, ValueError};

use std::fmt;

/// The declaration side of the resource protocol
///
/// A preparer reads its templated fields, renders them through the given
/// renderer, validates the results, and returns a concrete task. Given the
/// same rendered inputs it must produce the same task.
pub trait Preparer: fmt::Debug + Send + Sync {
    fn prepare(&self, r: &Renderer) -> anyhow::Result<Box<dyn Task>>;
}

/// The execution side of the resource protocol
///
/// `check` must not mutate the host. `apply` may, and must be idempotent:
/// apply followed by check on an unchanged system yields no changes.
pub trait Task: fmt::Debug + Send + Sync {
    fn check(&self, r: &Renderer) -> anyhow::Result<TaskStatus>;

    fn apply(&self) -> anyhow::Result<TaskStatus>;

    /// Expose a field to `lookup` template references
    fn field(&self, _name: &str) -> Option<Value> {
        None
    }
}
