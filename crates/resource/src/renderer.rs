//! The renderer: parameter scopes, lookups, and template evaluation
//!
//! A renderer is built per node from the nearest enclosing module's
//! parameter scope, a lookup source into already-converged node values, a
//! process environment captured once per run, and the run's cancellation
//! token. Rendering is pure and idempotent: the same scope always yields
//! the same output and the same set of implicit dependencies.

use crate::template::{self, TemplateContext};
use crate::value::{Value, ValueError};
use graph::{CancelToken, NodeId};
use indexmap::IndexMap;
use thiserror::Error;

/// Errors from template rendering
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template source could not be parsed
    #[error("template parse error in {field}: {reason}")]
    Parse { field: String, reason: String },

    /// `param` named a parameter absent from the lexical scope
    #[error("no such param {name:?}")]
    NoSuchParam { name: String },

    /// The expression called a function outside the closed set
    #[error("unknown template function {name:?}")]
    UnknownFunction { name: String },

    /// A function was called with the wrong number of arguments
    #[error("wrong number of arguments to {name}: expected {expected}, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// A lookup could not be resolved
    #[error("lookup {target:?} field {field:?}: {reason}")]
    Lookup {
        target: String,
        field: String,
        reason: String,
    },

    /// A template expression produced a list or map at the top level
    #[error("template for {field} produced a {kind}; only scalar results can be rendered")]
    Unprintable { field: String, kind: &'static str },

    /// A value coercion failed inside an expression
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// An ordered parameter scope, as established by a module node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    params: IndexMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a parameter; redefinition replaces in place
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.params.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Process environment, captured once per run
///
/// Mutation of the real process environment during a long apply is
/// invisible to templates; `env` reads this snapshot only.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: IndexMap<String, String>,
}

impl Environment {
    /// Snapshot the current process environment
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// An empty environment, for tests
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Field access into other nodes' values, for the `lookup` function
pub trait LookupSource: Send + Sync {
    fn lookup(&self, target: &str, field: &str) -> Result<Value, RenderError>;
}

/// A lookup source for contexts with no graph available
pub struct NoLookups;

impl LookupSource for NoLookups {
    fn lookup(&self, target: &str, field: &str) -> Result<Value, RenderError> {
        Err(RenderError::Lookup {
            target: target.to_string(),
            field: field.to_string(),
            reason: "lookups are not available in this context".to_string(),
        })
    }
}

/// Renders template strings for one node
pub struct Renderer<'a> {
    node: NodeId,
    scope: &'a Scope,
    lookups: &'a dyn LookupSource,
    env: &'a Environment,
    cancel: CancelToken,
}

impl<'a> Renderer<'a> {
    pub fn new(
        node: NodeId,
        scope: &'a Scope,
        lookups: &'a dyn LookupSource,
        env: &'a Environment,
        cancel: CancelToken,
    ) -> Self {
        Self {
            node,
            scope,
            lookups,
            env,
            cancel,
        }
    }

    /// The id of the node being rendered
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Whether the run has been cancelled; long check/apply operations
    /// should poll this
    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Evaluate `source` as a template; `name` labels the field in errors
    pub fn render(&self, name: &str, source: &str) -> Result<String, RenderError> {
        template::eval_source(self, name, source)
    }
}

impl TemplateContext for Renderer<'_> {
    fn param(&self, name: &str) -> Result<Value, RenderError> {
        self.scope
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::NoSuchParam {
                name: name.to_string(),
            })
    }

    fn lookup(&self, target: &str, field: &str) -> Result<Value, RenderError> {
        self.lookups.lookup(target, field)
    }

    fn env(&self, name: &str) -> String {
        self.env.get(name).unwrap_or_default().to_string()
    }
}
