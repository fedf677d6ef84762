//! Control-flow resources: switch, case, and conditional masking
//!
//! A switch holds an ordered list of branch names; its cases carry a
//! predicate template. At most one case per switch is selected: the first
//! one, in declaration order, whose name appears in the branch list and
//! whose rendered predicate is true. Descendants of an unselected case are
//! masked: check and apply report `NoChange` with a pruned-branch output
//! line, while the underlying task's fields stay addressable for `lookup`.

use crate::renderer::Renderer;
use crate::status::TaskStatus;
use crate::value::Value;
use crate::{Preparer, Task};
use anyhow::Context;
use indexmap::IndexMap;
use thiserror::Error;

/// Errors from predicate evaluation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// The rendered predicate was not a recognized truth token
    #[error("{value}: not a valid truth value; should be one of [f false t true]")]
    BadPredicate { value: String },

    /// The predicate rendered to nothing
    #[error("predicate is empty")]
    EmptyPredicate,
}

/// Decide truthiness of a rendered predicate
///
/// The result is trimmed and lower-cased before comparing against the
/// truth tokens.
pub fn truthiness(raw: &str) -> Result<bool, ControlError> {
    if raw.is_empty() {
        return Err(ControlError::EmptyPredicate);
    }
    match raw.trim().to_lowercase().as_str() {
        "true" | "t" => Ok(true),
        "false" | "f" => Ok(false),
        other => Err(ControlError::BadPredicate {
            value: other.to_string(),
        }),
    }
}

/// Something that can gate conditional execution: a case, or a test double
pub trait EvaluationController {
    fn should_evaluate(&self) -> bool;
}

/// The status of a masked check
pub fn pruned_check() -> TaskStatus {
    TaskStatus::no_change().with_output("Check: pruned branch not executing task")
}

/// The status of a masked apply
pub fn pruned_apply() -> TaskStatus {
    TaskStatus::no_change().with_output("Apply: pruned branch not executing task")
}

/// Preparer for `macro.switch`
#[derive(Debug, Clone)]
pub struct SwitchPreparer {
    pub branches: Vec<String>,
}

impl SwitchPreparer {
    pub fn from_args(args: &IndexMap<String, Value>) -> anyhow::Result<Self> {
        let branches = args
            .get("branches")
            .context("switch requires a branches list")?
            .as_list()?
            .iter()
            .map(Value::as_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { branches })
    }
}

impl Preparer for SwitchPreparer {
    fn prepare(&self, _r: &Renderer) -> anyhow::Result<Box<dyn Task>> {
        Ok(Box::new(SwitchTask {
            branches: self.branches.clone(),
        }))
    }
}

/// Task for a switch node: check and apply are no-ops; the node exists to
/// structure conditional evaluation
#[derive(Debug, Clone)]
pub struct SwitchTask {
    pub branches: Vec<String>,
}

impl Task for SwitchTask {
    fn check(&self, _r: &Renderer) -> anyhow::Result<TaskStatus> {
        Ok(TaskStatus::no_change())
    }

    fn apply(&self) -> anyhow::Result<TaskStatus> {
        Ok(TaskStatus::no_change())
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "branches" => Some(Value::List(
                self.branches.iter().map(|b| Value::String(b.clone())).collect(),
            )),
            _ => None,
        }
    }
}

/// Preparer for `macro.case`: renders the predicate
#[derive(Debug, Clone)]
pub struct CasePreparer {
    pub name: String,
    pub predicate: String,
}

impl CasePreparer {
    pub fn from_args(name: impl Into<String>, args: &IndexMap<String, Value>) -> anyhow::Result<Self> {
        let predicate = args
            .get("predicate")
            .context("case requires a predicate")?
            .as_str()?;
        Ok(Self {
            name: name.into(),
            predicate,
        })
    }
}

impl Preparer for CasePreparer {
    fn prepare(&self, r: &Renderer) -> anyhow::Result<Box<dyn Task>> {
        let predicate = r.render("predicate", &self.predicate)?;
        Ok(Box::new(CaseTask::new(self.name.clone(), predicate, Vec::new())))
    }
}

/// Task for a case node, carrying the rendered predicate and the parent
/// switch's branch list
#[derive(Debug, Clone)]
pub struct CaseTask {
    pub name: String,
    pub predicate: String,
    branches: Vec<String>,
}

impl CaseTask {
    pub fn new(name: impl Into<String>, predicate: impl Into<String>, branches: Vec<String>) -> Self {
        Self {
            name: name.into(),
            predicate: predicate.into(),
            branches,
        }
    }

    /// Truthiness of the rendered predicate
    pub fn is_true(&self) -> Result<bool, ControlError> {
        truthiness(&self.predicate)
    }
}

impl EvaluationController for CaseTask {
    /// True when the parent switch declares this case's name as a branch
    /// and the predicate holds. A case with no parent never evaluates.
    fn should_evaluate(&self) -> bool {
        self.branches.iter().any(|b| b == &self.name) && self.is_true().unwrap_or(false)
    }
}

impl Task for CaseTask {
    fn check(&self, _r: &Renderer) -> anyhow::Result<TaskStatus> {
        Ok(TaskStatus::no_change())
    }

    fn apply(&self) -> anyhow::Result<TaskStatus> {
        Ok(TaskStatus::no_change())
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::String(self.name.clone())),
            "predicate" => Some(Value::String(self.predicate.clone())),
            _ => None,
        }
    }
}
