//! Dependency resolution: synthesizing edges
//!
//! A bottom-up transform over the preparer graph adds dependency edges
//! from two sources: explicit `depends` lists and template references
//! discovered by dry-running each string argument (a case's predicate is
//! scanned like any other templated field). Control flow contributes no
//! edges of its own: a case already precedes its switch through the
//! structural hierarchy, and descendants of an unselected case are
//! masked at render time rather than ordered here. Every `connect` is
//! cycle-checked; a would-be cycle aborts resolution with the members
//! named, and no partial graph is produced.

use crate::error::{PipelineError, ResolutionError};
use crate::merge::{PrepNode, PrepValue};
use graph::{Graph, NodeId, Transformed, WalkOptions};
use log::debug;
use resource::template::{self, References};
use resource::Value;

/// Resolve a relative dependency target against a node's lexical position
///
/// Unqualified ids are tried against the lexical parent's prefix first,
/// then against the root, then as a full path.
pub(crate) fn resolve_target<V>(g: &Graph<V>, node: &NodeId, target: &str) -> Option<NodeId> {
    if let Some(parent) = node.parent() {
        let sibling = parent.child(target);
        if g.contains(&sibling) {
            return Some(sibling);
        }
    }
    let from_root = NodeId::root().child(target);
    if g.contains(&from_root) {
        return Some(from_root);
    }
    let absolute = NodeId::new(target);
    g.contains(&absolute).then_some(absolute)
}

/// The param node a `{{param "name"}}` reference resolves to: the param
/// child of the nearest enclosing module
fn resolve_param<V, F>(g: &Graph<V>, node: &NodeId, name: &str, is_module: F) -> Option<NodeId>
where
    F: Fn(&V) -> bool,
{
    let mut at = node.parent();
    while let Some(current) = at {
        if g.get(&current).is_some_and(&is_module) {
            let param = current.child(&format!("param.{name}"));
            return g.contains(&param).then_some(param);
        }
        at = current.parent();
    }
    None
}

/// Scan every string in an argument value tree for template references
fn scan_value(
    node: &NodeId,
    field: &str,
    value: &Value,
    refs: &mut References,
) -> Result<(), ResolutionError> {
    match value {
        Value::String(source) => {
            let found = template::scan(field, source).map_err(|err| ResolutionError::Template {
                node: node.clone(),
                field: field.to_string(),
                reason: err.to_string(),
            })?;
            refs.params.extend(found.params);
            refs.lookups.extend(found.lookups);
            Ok(())
        }
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                scan_value(node, &format!("{field}[{i}]"), item, refs)?;
            }
            Ok(())
        }
        Value::Map(entries) => {
            for (key, item) in entries {
                scan_value(node, &format!("{field}.{key}"), item, refs)?;
            }
            Ok(())
        }
        Value::Int(_) | Value::Bool(_) => Ok(()),
    }
}

/// Compute the dependency targets of one node
fn node_deps(g: &Graph<PrepNode>, id: &NodeId, node: &PrepNode) -> Result<Vec<NodeId>, ResolutionError> {
    let mut deps = Vec::new();

    // Explicit depends lists
    for target in &node.depends {
        let resolved =
            resolve_target(g, id, target).ok_or_else(|| ResolutionError::UnknownTarget {
                node: id.clone(),
                target: target.clone(),
            })?;
        deps.push(resolved);
    }

    // Template references in string fields
    let mut refs = References::default();
    match &node.value {
        PrepValue::Resource { args, .. } => {
            for (field, value) in args {
                scan_value(id, field, value, &mut refs)?;
            }
        }
        PrepValue::Case { predicate, .. } => {
            scan_value(id, "predicate", &Value::String(predicate.clone()), &mut refs)?;
        }
        PrepValue::Module { .. } | PrepValue::Param { .. } | PrepValue::Switch { .. } => {}
    }

    let is_module = |n: &PrepNode| matches!(n.value, PrepValue::Module { .. });
    for name in &refs.params {
        let param =
            resolve_param(g, id, name, is_module).ok_or_else(|| ResolutionError::MissingParam {
                node: id.clone(),
                name: name.clone(),
            })?;
        deps.push(param);
    }
    for target in &refs.lookups {
        let resolved =
            resolve_target(g, id, target).ok_or_else(|| ResolutionError::UnknownTarget {
                node: id.clone(),
                target: target.clone(),
            })?;
        deps.push(resolved);
    }

    deps.retain(|d| d != id);
    deps.sort();
    deps.dedup();
    Ok(deps)
}

/// Add dependency edges to the preparer graph
///
/// Deterministic: the same input graph always yields the same edge set.
pub fn resolve(g: &Graph<PrepNode>, opts: &WalkOptions) -> Result<Graph<PrepNode>, PipelineError> {
    let result = g.transform(opts, |id, node, _view| {
        let deps = node_deps(g, id, node).map_err(anyhow::Error::new)?;
        if !deps.is_empty() {
            debug!("{id} depends on {deps:?}");
        }
        Ok(Transformed::shared(node.clone()).with_deps(deps))
    });

    result.map_err(|mut err| {
        if err.cancelled {
            return PipelineError::from_traversal(err);
        }
        if let Some(graph::Error::WouldCycle { members, .. }) = err.graph_error() {
            return PipelineError::Resolution(ResolutionError::Cycle {
                members: members.clone(),
            });
        }
        let message = err.to_string();
        for (_, node_err) in err.errors.drain(..) {
            match node_err.downcast::<ResolutionError>() {
                Ok(resolution) => return PipelineError::Resolution(resolution),
                Err(_) => continue,
            }
        }
        PipelineError::Traversal(message)
    })
}
