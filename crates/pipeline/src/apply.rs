//! Apply: converge every node the plan said would change
//!
//! A second bottom-up traversal over the planned graph. Nodes the plan
//! marked `NoChange` are skipped; everything else applies and then, by
//! default, checks once more to confirm convergence. Apply errors and
//! still-pending changes become fatal statuses whose ancestors are
//! skipped, exactly like planning.

use crate::error::PipelineError;
use crate::plan::PlanEntry;
use crate::render::{Selection, TaskValue};
use crate::RunContext;
use graph::{Graph, NodeId, Transformed, WalkOptions};
use resource::control::pruned_apply;
use resource::{NoLookups, Renderer, Scope, StatusCode, TaskStatus};
use std::sync::Arc;

/// Progress notifications during a traversal; implemented by UIs
pub trait Progress: Send + Sync {
    fn on_start(&self, _total: usize) {}
    fn on_node(&self, _id: &NodeId, _status: &TaskStatus) {}
    fn on_done(&self) {}
}

/// Silent progress sink
pub struct NoProgress;

impl Progress for NoProgress {}

/// Options for the apply traversal
pub struct ApplyOptions {
    /// Run a confirming check after each apply and fail nodes that still
    /// report changes
    pub verify: bool,
    /// Progress notifications
    pub progress: Arc<dyn Progress>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            verify: true,
            progress: Arc::new(NoProgress),
        }
    }
}

/// Converge one plain task: apply, then optionally confirm
fn converge(
    id: &NodeId,
    task: &dyn resource::Task,
    scope: &Scope,
    ctx: &RunContext,
    verify: bool,
) -> TaskStatus {
    let applied = match task.apply() {
        Ok(status) => status,
        Err(err) => return TaskStatus::fatal(format!("apply failed: {err:#}")),
    };
    if !verify {
        return applied;
    }

    let renderer = Renderer::new(id.clone(), scope, &NoLookups, &ctx.env, ctx.cancel.clone());
    match task.check(&renderer) {
        Ok(confirm) if confirm.has_changes() => {
            let mut status = TaskStatus::fatal("apply did not converge");
            status.diffs = confirm.diffs;
            status
        }
        Ok(mut confirm) => {
            // Keep the apply's output lines in the final report.
            let mut output = applied.output;
            output.append(&mut confirm.output);
            confirm.output = output;
            confirm
        }
        Err(err) => TaskStatus::fatal(format!("confirming check failed: {err:#}")),
    }
}

fn apply_entry(
    id: &NodeId,
    entry: &PlanEntry,
    selection: &Selection,
    ctx: &RunContext,
    verify: bool,
) -> (TaskStatus, bool) {
    match entry.status.code {
        // The plan found nothing to do; carry its status (including any
        // pruned-branch annotations) forward.
        StatusCode::NoChange => (entry.status.clone(), false),
        StatusCode::CantChange => (entry.status.clone(), entry.poisoned),
        StatusCode::Fatal => (entry.status.clone(), true),
        StatusCode::WillChange => match entry.task.as_ref() {
            TaskValue::Plain { task, scope } => {
                let status = converge(id, task.as_ref(), scope, ctx, verify);
                let poisoned = status.is_fatal();
                (status, poisoned)
            }
            TaskValue::Conditional { task, gate, scope } => {
                if selection.masks(gate) {
                    (pruned_apply(), false)
                } else {
                    let status = converge(id, task.as_ref(), scope, ctx, verify);
                    let poisoned = status.is_fatal();
                    (status, poisoned)
                }
            }
            // Structural nodes never plan WillChange; if one somehow did,
            // surface it rather than silently converging.
            _ => (
                TaskStatus::fatal("non-executable node planned a change"),
                true,
            ),
        },
    }
}

/// Apply the plan, producing the final statuses
pub fn apply(
    planned: &Graph<PlanEntry>,
    selection: &Selection,
    ctx: &RunContext,
    walk: &WalkOptions,
    opts: &ApplyOptions,
) -> Result<Graph<PlanEntry>, PipelineError> {
    opts.progress.on_start(planned.len());

    let result = planned.transform(walk, |id, entry, view| {
        let poisoned_dep = planned
            .down_edges(id)
            .into_iter()
            .find(|dep| view.get(dep).is_some_and(|e: Arc<PlanEntry>| e.poisoned));

        let (status, poisoned) = match poisoned_dep {
            Some(dep) => (
                TaskStatus::cant_change(format!("dependency failed: {dep}")),
                true,
            ),
            None => apply_entry(id, entry, selection, ctx, opts.verify),
        };

        opts.progress.on_node(id, &status);
        Ok(Transformed::new(PlanEntry {
            task: entry.task.clone(),
            status,
            poisoned,
        }))
    });

    opts.progress.on_done();
    result.map_err(PipelineError::from_traversal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{has_fatal, plan};
    use resource::{Diff, Task, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test double counting apply invocations
    #[derive(Debug)]
    struct CountingTask {
        checks_changed: bool,
        fail_apply: bool,
        applies: Arc<AtomicUsize>,
    }

    impl Task for CountingTask {
        fn check(&self, _r: &Renderer) -> anyhow::Result<TaskStatus> {
            // Converged once apply has run.
            if self.checks_changed && self.applies.load(Ordering::SeqCst) == 0 {
                Ok(TaskStatus::from_diffs(vec![Diff::new("state", "old", "new")]))
            } else {
                Ok(TaskStatus::no_change())
            }
        }

        fn apply(&self) -> anyhow::Result<TaskStatus> {
            if self.fail_apply {
                anyhow::bail!("apply exploded");
            }
            self.applies.fetch_add(1, Ordering::SeqCst);
            Ok(TaskStatus::no_change().with_output("applied"))
        }

        fn field(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    struct Fixture {
        g: Graph<TaskValue>,
        applies: Arc<AtomicUsize>,
    }

    fn fixture(checks_changed: bool, fail_apply: bool) -> Fixture {
        let applies = Arc::new(AtomicUsize::new(0));
        let mut g = Graph::new();
        g.add(NodeId::root(), TaskValue::Module { name: "root".to_string() }).unwrap();
        g.add(
            NodeId::root().child("task.one"),
            TaskValue::Plain {
                task: Box::new(CountingTask {
                    checks_changed,
                    fail_apply,
                    applies: applies.clone(),
                }),
                scope: Arc::new(Scope::new()),
            },
        )
        .unwrap();
        Fixture { g, applies }
    }

    fn run(fixture: &Fixture) -> Graph<PlanEntry> {
        let ctx = RunContext::for_tests();
        let opts = WalkOptions::with_concurrency(1);
        let selection = Selection::default();
        let planned = plan(&fixture.g, &selection, &ctx, &opts).unwrap();
        apply(&planned, &selection, &ctx, &opts, &ApplyOptions::default()).unwrap()
    }

    #[test]
    fn test_no_change_skips_apply() {
        let fixture = fixture(false, false);
        let finished = run(&fixture);

        assert_eq!(fixture.applies.load(Ordering::SeqCst), 0);
        let one = finished.get(&NodeId::root().child("task.one")).unwrap();
        assert_eq!(one.status.code, StatusCode::NoChange);
    }

    #[test]
    fn test_will_change_applies_and_confirms() {
        let fixture = fixture(true, false);
        let finished = run(&fixture);

        assert_eq!(fixture.applies.load(Ordering::SeqCst), 1);
        let one = finished.get(&NodeId::root().child("task.one")).unwrap();
        assert_eq!(one.status.code, StatusCode::NoChange);
        assert!(one.status.output.contains(&"applied".to_string()));
        assert!(!has_fatal(&finished));
    }

    #[test]
    fn test_apply_error_is_fatal_and_isolated() {
        let applies = Arc::new(AtomicUsize::new(0));
        let mut g = Graph::new();
        g.add(NodeId::root(), TaskValue::Module { name: "root".to_string() }).unwrap();
        g.add(
            NodeId::root().child("task.bad"),
            TaskValue::Plain {
                task: Box::new(CountingTask {
                    checks_changed: true,
                    fail_apply: true,
                    applies: applies.clone(),
                }),
                scope: Arc::new(Scope::new()),
            },
        )
        .unwrap();
        g.add(
            NodeId::root().child("task.good"),
            TaskValue::Plain {
                task: Box::new(CountingTask {
                    checks_changed: true,
                    fail_apply: false,
                    applies: applies.clone(),
                }),
                scope: Arc::new(Scope::new()),
            },
        )
        .unwrap();

        let ctx = RunContext::for_tests();
        let opts = WalkOptions::with_concurrency(1);
        let selection = Selection::default();
        let planned = plan(&g, &selection, &ctx, &opts).unwrap();
        let finished = apply(&planned, &selection, &ctx, &opts, &ApplyOptions::default()).unwrap();

        let bad = finished.get(&NodeId::root().child("task.bad")).unwrap();
        assert!(bad.status.is_fatal());
        assert!(bad.status.output[0].contains("apply exploded"));

        // The independent sibling converged anyway.
        let good = finished.get(&NodeId::root().child("task.good")).unwrap();
        assert_eq!(good.status.code, StatusCode::NoChange);

        // The root is skipped because a structural child failed.
        let root = finished.get(&NodeId::root()).unwrap();
        assert_eq!(root.status.code, StatusCode::CantChange);
        assert!(root.status.output[0].contains("dependency failed"));
    }

    #[test]
    fn test_masked_conditional_never_applies() {
        let applies = Arc::new(AtomicUsize::new(0));
        let mut g = Graph::new();
        g.add(NodeId::root(), TaskValue::Module { name: "root".to_string() }).unwrap();
        let gate = NodeId::root().child("macro.case.off");
        g.add(
            gate.clone(),
            TaskValue::Case(resource::control::CaseTask::new("off", "false", vec!["off".to_string()])),
        )
        .unwrap();
        g.add(
            gate.child("task.masked"),
            TaskValue::Conditional {
                task: Box::new(CountingTask {
                    checks_changed: true,
                    fail_apply: false,
                    applies: applies.clone(),
                }),
                gate: gate.clone(),
                scope: Arc::new(Scope::new()),
            },
        )
        .unwrap();

        let ctx = RunContext::for_tests();
        let opts = WalkOptions::with_concurrency(1);
        let selection = Selection::default();
        let planned = plan(&g, &selection, &ctx, &opts).unwrap();
        let finished = apply(&planned, &selection, &ctx, &opts, &ApplyOptions::default()).unwrap();

        assert_eq!(applies.load(Ordering::SeqCst), 0);
        let masked = finished.get(&gate.child("task.masked")).unwrap();
        assert_eq!(masked.status.code, StatusCode::NoChange);
        assert!(masked.status.output[0].contains("pruned branch"));
    }

    #[test]
    fn test_verify_off_trusts_apply_status() {
        // A task whose check never converges would fail verification; with
        // verify off the apply's own status is authoritative.
        #[derive(Debug)]
        struct StubbornTask;

        impl Task for StubbornTask {
            fn check(&self, _r: &Renderer) -> anyhow::Result<TaskStatus> {
                Ok(TaskStatus::from_diffs(vec![Diff::new("state", "old", "new")]))
            }

            fn apply(&self) -> anyhow::Result<TaskStatus> {
                Ok(TaskStatus::no_change().with_output("applied blindly"))
            }
        }

        let mut g = Graph::new();
        g.add(NodeId::root(), TaskValue::Module { name: "root".to_string() }).unwrap();
        g.add(
            NodeId::root().child("task.stubborn"),
            TaskValue::Plain {
                task: Box::new(StubbornTask),
                scope: Arc::new(Scope::new()),
            },
        )
        .unwrap();

        let ctx = RunContext::for_tests();
        let opts = WalkOptions::with_concurrency(1);
        let selection = Selection::default();
        let planned = plan(&g, &selection, &ctx, &opts).unwrap();

        let verified = apply(&planned, &selection, &ctx, &opts, &ApplyOptions::default()).unwrap();
        let entry = verified.get(&NodeId::root().child("task.stubborn")).unwrap();
        assert!(entry.status.is_fatal());
        assert!(entry.status.output[0].contains("did not converge"));

        let trusting = apply(
            &planned,
            &selection,
            &ctx,
            &opts,
            &ApplyOptions {
                verify: false,
                ..ApplyOptions::default()
            },
        )
        .unwrap();
        let entry = trusting.get(&NodeId::root().child("task.stubborn")).unwrap();
        assert_eq!(entry.status.code, StatusCode::NoChange);
        assert!(entry.status.output[0].contains("applied blindly"));
    }
}
