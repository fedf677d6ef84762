//! Plan: invoke every task's check and collect statuses
//!
//! A bottom-up traversal over the task graph. Check failures are captured
//! into fatal statuses, never raised through the traversal. A fatal node
//! poisons its reverse-reachable ancestors: they get a synthetic
//! "dependency failed" status and their check is never invoked, while
//! independent subtrees keep going.

use crate::error::PipelineError;
use crate::render::{Selection, TaskValue};
use crate::RunContext;
use graph::{Graph, NodeId, Transformed, TransformView, WalkOptions};
use resource::control::pruned_check;
use resource::{NoLookups, Renderer, Scope, StatusCode, TaskStatus};
use std::sync::Arc;

/// A planned node: the task it came from plus its status
///
/// `poisoned` marks nodes whose dependents must be skipped: fatal checks
/// and nodes already skipped for a failed dependency.
#[derive(Debug)]
pub struct PlanEntry {
    pub task: Arc<TaskValue>,
    pub status: TaskStatus,
    pub poisoned: bool,
}

impl std::fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status.code {
            StatusCode::WillChange => write!(f, "will change"),
            StatusCode::NoChange => write!(f, "no change"),
            StatusCode::CantChange => write!(f, "can't change"),
            StatusCode::Fatal => write!(f, "fatal"),
        }
    }
}

/// Whether any planned node is fatal
pub fn has_fatal(g: &Graph<PlanEntry>) -> bool {
    g.ids()
        .iter()
        .filter_map(|id| g.get(id))
        .any(|entry| entry.status.is_fatal())
}

/// A failed or skipped dependency of `id`, if any
pub(crate) fn poisoned_dep(
    g: &Graph<TaskValue>,
    view: &TransformView<PlanEntry>,
    id: &NodeId,
) -> Option<NodeId> {
    g.down_edges(id)
        .into_iter()
        .find(|dep| view.get(dep).is_some_and(|entry| entry.poisoned))
}

/// Run a task's check, folding any error into a fatal status
pub(crate) fn check_task(
    id: &NodeId,
    task: &TaskValue,
    selection: &Selection,
    ctx: &RunContext,
) -> TaskStatus {
    match task {
        TaskValue::Module { .. } | TaskValue::Param { .. } => TaskStatus::no_change(),
        TaskValue::Switch { .. } | TaskValue::Case(_) => TaskStatus::no_change(),
        TaskValue::Invalid { error } => TaskStatus::fatal(error.clone()),
        TaskValue::Conditional { task, gate, scope } => {
            if selection.masks(gate) {
                pruned_check()
            } else {
                run_check(id, task.as_ref(), scope, ctx)
            }
        }
        TaskValue::Plain { task, scope } => run_check(id, task.as_ref(), scope, ctx),
    }
}

fn run_check(id: &NodeId, task: &dyn resource::Task, scope: &Scope, ctx: &RunContext) -> TaskStatus {
    let renderer = Renderer::new(id.clone(), scope, &NoLookups, &ctx.env, ctx.cancel.clone());
    match task.check(&renderer) {
        Ok(status) => status,
        Err(err) => TaskStatus::fatal(format!("check failed: {err:#}")),
    }
}

/// Plan the run: a bottom-up traversal accumulating per-node statuses
pub fn plan(
    g: &Graph<TaskValue>,
    selection: &Selection,
    ctx: &RunContext,
    opts: &WalkOptions,
) -> Result<Graph<PlanEntry>, PipelineError> {
    g.transform(opts, |id, task, view| {
        if let Some(dep) = poisoned_dep(g, view, id) {
            return Ok(Transformed::new(PlanEntry {
                task: task.clone(),
                status: TaskStatus::cant_change(format!("dependency failed: {dep}")),
                poisoned: true,
            }));
        }

        let status = check_task(id, task, selection, ctx);
        let poisoned = status.is_fatal();
        Ok(Transformed::new(PlanEntry {
            task: task.clone(),
            status,
            poisoned,
        }))
    })
    .map_err(PipelineError::from_traversal)
}
