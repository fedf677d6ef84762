//! Render: preparer graph to task graph
//!
//! A bottom-up transform builds a renderer for every node from its nearest
//! module scope and a lookup view into already-rendered tasks, then asks
//! each preparer for its task. Preparers that reject their rendered inputs
//! become invalid task values: validation failures ride along in the graph
//! and turn into fatal statuses during planning instead of aborting the
//! pipeline. Descendants of a case are wrapped as conditional tasks gated
//! by that case's id.

use crate::error::PipelineError;
use crate::merge::{scope_for, PrepNode, PrepValue};
use crate::resolve::resolve_target;
use crate::RunContext;
use graph::{Graph, NodeId, Transformed, TransformView, WalkOptions};
use log::debug;
use resource::control::{CaseTask, EvaluationController, SwitchTask};
use resource::{LookupSource, RenderError, Renderer, Scope, Task, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A node in the task graph
pub enum TaskValue {
    Module { name: String },
    Param { name: String, value: Value },
    Switch { task: SwitchTask, cases: Vec<NodeId> },
    Case(CaseTask),
    /// An unconditionally-evaluated task
    Plain { task: Box<dyn Task>, scope: Arc<Scope> },
    /// A task gated by a controlling case, addressed by id
    Conditional {
        task: Box<dyn Task>,
        gate: NodeId,
        scope: Arc<Scope>,
    },
    /// A preparer that rejected its rendered inputs; planning turns this
    /// into a fatal status
    Invalid { error: String },
}

impl TaskValue {
    /// Field access for `lookup` references
    ///
    /// Gated tasks stay addressable even when their branch is pruned.
    pub fn field(&self, name: &str) -> Option<Value> {
        match self {
            TaskValue::Module { .. } => None,
            TaskValue::Param { value, .. } => (name == "value").then(|| value.clone()),
            TaskValue::Switch { task, .. } => task.field(name),
            TaskValue::Case(task) => task.field(name),
            TaskValue::Plain { task, .. } | TaskValue::Conditional { task, .. } => task.field(name),
            TaskValue::Invalid { .. } => None,
        }
    }
}

impl fmt::Debug for TaskValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskValue::Module { name } => f.debug_struct("Module").field("name", name).finish(),
            TaskValue::Param { name, value } => f
                .debug_struct("Param")
                .field("name", name)
                .field("value", value)
                .finish(),
            TaskValue::Switch { task, cases } => f
                .debug_struct("Switch")
                .field("branches", &task.branches)
                .field("cases", &cases.len())
                .finish(),
            TaskValue::Case(task) => f
                .debug_struct("Case")
                .field("name", &task.name)
                .field("predicate", &task.predicate)
                .finish(),
            TaskValue::Plain { task, .. } => f.debug_tuple("Plain").field(task).finish(),
            TaskValue::Conditional { task, gate, .. } => f
                .debug_struct("Conditional")
                .field("task", task)
                .field("gate", gate)
                .finish(),
            TaskValue::Invalid { error } => f.debug_tuple("Invalid").field(error).finish(),
        }
    }
}

impl fmt::Display for TaskValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskValue::Module { .. } => write!(f, "module"),
            TaskValue::Param { value, .. } => {
                write!(f, "param {}", serde_json::to_string(value).unwrap_or_default())
            }
            TaskValue::Switch { task, .. } => write!(f, "switch [{}]", task.branches.join(", ")),
            TaskValue::Case(task) => write!(f, "case when {}", task.predicate),
            TaskValue::Plain { .. } => write!(f, "task"),
            TaskValue::Conditional { gate, .. } => write!(f, "task gated by {}", gate.base()),
            TaskValue::Invalid { error } => write!(f, "invalid: {error}"),
        }
    }
}

/// Lookup source backed by the in-progress task view
///
/// The resolver has already added an edge for every lookup, so the target
/// is guaranteed to have completed before this node renders.
struct ViewLookups<'a> {
    graph: &'a Graph<PrepNode>,
    view: &'a TransformView<TaskValue>,
    node: NodeId,
}

impl LookupSource for ViewLookups<'_> {
    fn lookup(&self, target: &str, field: &str) -> Result<Value, RenderError> {
        let not_found = |reason: &str| RenderError::Lookup {
            target: target.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let id = resolve_target(self.graph, &self.node, target)
            .ok_or_else(|| not_found("no such node"))?;
        let value = self
            .view
            .get(&id)
            .ok_or_else(|| not_found("target has not been rendered"))?;
        value.field(field).ok_or_else(|| not_found("no such field"))
    }
}

/// The nearest case ancestor gating a node, if any
fn gate_for(g: &Graph<PrepNode>, id: &NodeId) -> Option<NodeId> {
    let mut at = id.parent();
    while let Some(current) = at {
        if let Some(PrepNode {
            value: PrepValue::Case { .. },
            ..
        }) = g.get(&current)
        {
            return Some(current);
        }
        at = current.parent();
    }
    None
}

/// Derive the task graph from the resolved preparer graph
pub fn render(
    g: &Graph<PrepNode>,
    ctx: &RunContext,
    opts: &WalkOptions,
) -> Result<Graph<TaskValue>, PipelineError> {
    g.transform(opts, |id, node, view| {
        let value = match &node.value {
            PrepValue::Module { name, .. } => TaskValue::Module { name: name.clone() },
            PrepValue::Param { name, value } => TaskValue::Param {
                name: name.clone(),
                value: value.clone(),
            },
            PrepValue::Switch { branches, cases } => TaskValue::Switch {
                task: SwitchTask {
                    branches: branches.clone(),
                },
                cases: cases.clone(),
            },
            PrepValue::Case { name, predicate } => {
                let scope = scope_for(g, id);
                let lookups = ViewLookups {
                    graph: g,
                    view,
                    node: id.clone(),
                };
                let renderer =
                    Renderer::new(id.clone(), &scope, &lookups, &ctx.env, ctx.cancel.clone());
                match renderer.render("predicate", predicate) {
                    Ok(rendered) => {
                        let branches = parent_branches(g, id);
                        TaskValue::Case(CaseTask::new(name.clone(), rendered, branches))
                    }
                    Err(err) => invalid(id, "predicate", &err),
                }
            }
            PrepValue::Resource { preparer, .. } => {
                let scope = scope_for(g, id);
                let lookups = ViewLookups {
                    graph: g,
                    view,
                    node: id.clone(),
                };
                let renderer =
                    Renderer::new(id.clone(), &scope, &lookups, &ctx.env, ctx.cancel.clone());
                match preparer.prepare(&renderer) {
                    Ok(task) => match gate_for(g, id) {
                        Some(gate) => TaskValue::Conditional { task, gate, scope },
                        None => TaskValue::Plain { task, scope },
                    },
                    Err(err) => {
                        debug!("{id}: prepare rejected rendered inputs: {err:#}");
                        TaskValue::Invalid {
                            error: format!("{err:#}"),
                        }
                    }
                }
            }
        };
        Ok(Transformed::new(value))
    })
    .map_err(PipelineError::from_traversal)
}

fn invalid(id: &NodeId, field: &str, err: &RenderError) -> TaskValue {
    debug!("{id}: rendering {field} failed: {err}");
    TaskValue::Invalid {
        error: err.to_string(),
    }
}

/// The branch list of a case's parent switch; empty when the parent shape
/// is unexpected
fn parent_branches(g: &Graph<PrepNode>, case: &NodeId) -> Vec<String> {
    match case.parent().and_then(|p| g.value(&p)) {
        Some(parent) => match &parent.value {
            PrepValue::Switch { branches, .. } => branches.clone(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    }
}

/// The set of selected cases: per switch, the first case in declaration
/// order that should evaluate
#[derive(Debug, Clone, Default)]
pub struct Selection {
    selected: BTreeSet<NodeId>,
}

impl Selection {
    /// Whether this case id was selected
    pub fn is_selected(&self, case: &NodeId) -> bool {
        self.selected.contains(case)
    }

    /// Whether a task gated by `case` is masked out
    pub fn masks(&self, case: &NodeId) -> bool {
        !self.selected.contains(case)
    }

    #[cfg(test)]
    pub(crate) fn select(&mut self, case: NodeId) {
        self.selected.insert(case);
    }
}

/// Evaluate branch selection over the rendered task graph
///
/// Ties break by declaration order: the first true case wins. A switch
/// with no true case contributes no active branch.
pub fn select_branches(g: &Graph<TaskValue>) -> Selection {
    let mut selection = Selection::default();
    for id in g.ids() {
        if let Some(TaskValue::Switch { cases, .. }) = g.get(&id) {
            for case_id in cases {
                if let Some(TaskValue::Case(case)) = g.get(case_id)
                    && case.should_evaluate()
                {
                    debug!("{id}: selected branch {}", case.name);
                    selection.selected.insert(case_id.clone());
                    break;
                }
            }
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::load;
    use crate::merge::merge;
    use crate::resolve::resolve;
    use indexmap::IndexMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn rendered(text: &str) -> Graph<TaskValue> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();

        let fragments = load(&path, &IndexMap::new()).unwrap();
        let opts = WalkOptions::default();
        let prep = merge(&fragments, &resource::registry::defaults(), &opts).unwrap();
        let resolved = resolve(&prep, &opts).unwrap();
        render(&resolved, &RunContext::for_tests(), &opts).unwrap()
    }

    #[test]
    fn test_render_interpolates_params() {
        let g = rendered(
            r#"
            [[declare]]
            kind = "param"
            name = "who"
            [declare.args]
            default = "world"

            [[declare]]
            kind = "file.content"
            name = "g"
            [declare.args]
            destination = "/tmp/attune-render-test"
            content = 'hello {{param "who"}}'
            "#,
        );

        let task = g.get(&NodeId::root().child("file.content.g")).unwrap();
        assert_eq!(task.field("content"), Some(Value::from("hello world")));
        assert!(matches!(task, TaskValue::Plain { .. }));
    }

    #[test]
    fn test_lookup_sees_rendered_dependency() {
        let g = rendered(
            r#"
            [[declare]]
            kind = "param"
            name = "who"
            [declare.args]
            default = "world"

            [[declare]]
            kind = "file.content"
            name = "upstream"
            [declare.args]
            destination = "/tmp/u"
            content = 'hi {{param "who"}}'

            [[declare]]
            kind = "file.content"
            name = "downstream"
            [declare.args]
            destination = "/tmp/d"
            content = 'copy: {{lookup "file.content.upstream.content"}}'
            "#,
        );

        let task = g.get(&NodeId::root().child("file.content.downstream")).unwrap();
        assert_eq!(task.field("content"), Some(Value::from("copy: hi world")));
    }

    #[test]
    fn test_case_descendants_are_conditional() {
        let g = rendered(
            r#"
            [[declare]]
            kind = "macro.switch"
            name = "env"
            [declare.args]
            branches = ["prod", "dev"]

            [[declare.body]]
            kind = "macro.case"
            name = "prod"
            [declare.body.args]
            predicate = "true"

            [[declare.body.body]]
            kind = "file.content"
            name = "p"
            [declare.body.body.args]
            destination = "/tmp/p"
            content = "P"

            [[declare.body]]
            kind = "macro.case"
            name = "dev"
            [declare.body.args]
            predicate = "false"

            [[declare.body.body]]
            kind = "file.content"
            name = "d"
            [declare.body.body.args]
            destination = "/tmp/d"
            content = "D"
            "#,
        );

        let switch = NodeId::root().child("macro.switch.env");
        let prod_case = switch.child("macro.case.prod");
        let dev_case = switch.child("macro.case.dev");

        match g.get(&prod_case.child("file.content.p")).unwrap() {
            TaskValue::Conditional { gate, .. } => assert_eq!(gate, &prod_case),
            other => panic!("expected conditional, got {other}"),
        }

        let selection = select_branches(&g);
        assert!(selection.is_selected(&prod_case));
        assert!(selection.masks(&dev_case));
    }

    #[test]
    fn test_first_true_case_wins() {
        let g = rendered(
            r#"
            [[declare]]
            kind = "macro.switch"
            name = "pick"
            [declare.args]
            branches = ["a", "b"]

            [[declare.body]]
            kind = "macro.case"
            name = "a"
            [declare.body.args]
            predicate = "true"

            [[declare.body]]
            kind = "macro.case"
            name = "b"
            [declare.body.args]
            predicate = "true"
            "#,
        );

        let switch = NodeId::root().child("macro.switch.pick");
        let selection = select_branches(&g);
        assert!(selection.is_selected(&switch.child("macro.case.a")));
        assert!(selection.masks(&switch.child("macro.case.b")));
    }

    #[test]
    fn test_no_true_case_selects_nothing() {
        let g = rendered(
            r#"
            [[declare]]
            kind = "macro.switch"
            name = "pick"
            [declare.args]
            branches = ["a"]

            [[declare.body]]
            kind = "macro.case"
            name = "a"
            [declare.body.args]
            predicate = "false"
            "#,
        );

        let switch = NodeId::root().child("macro.switch.pick");
        let selection = select_branches(&g);
        assert!(selection.masks(&switch.child("macro.case.a")));
    }

    #[test]
    fn test_prepare_failure_becomes_invalid_not_error() {
        let g = rendered(
            r#"
            [[declare]]
            kind = "file.content"
            name = "broken"
            [declare.args]
            destination = ""
            content = "x"
            "#,
        );

        match g.get(&NodeId::root().child("file.content.broken")).unwrap() {
            TaskValue::Invalid { error } => assert!(error.contains("empty"), "{error}"),
            other => panic!("expected invalid, got {other}"),
        }
    }
}
