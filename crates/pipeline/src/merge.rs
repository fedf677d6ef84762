//! Merge: fragment graph to preparer graph
//!
//! A bottom-up walk assembles each module's parameter scope from its param
//! children and instantiates a preparer for every resource declaration
//! through the registry. Unknown kinds and rejected argument blocks are
//! load errors; the pipeline never starts with them.

use crate::error::{LoadError, PipelineError};
use crate::load::{Fragment, FragmentValue};
use graph::{Graph, NodeId, Transformed, WalkOptions};
use indexmap::IndexMap;
use resource::{Preparer, Registry, RegistryError, Scope, Value};
use std::fmt;
use std::sync::Arc;

/// A node in the preparer graph
#[derive(Debug)]
pub struct PrepNode {
    pub depends: Vec<String>,
    pub value: PrepValue,
}

pub enum PrepValue {
    /// A module with its assembled parameter scope
    Module { name: String, params: Arc<Scope> },
    Param { name: String, value: Value },
    Switch { branches: Vec<String>, cases: Vec<NodeId> },
    Case { name: String, predicate: String },
    Resource {
        kind: String,
        preparer: Box<dyn Preparer>,
        args: IndexMap<String, Value>,
    },
}

impl fmt::Debug for PrepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module { name, params } => f
                .debug_struct("Module")
                .field("name", name)
                .field("params", &params.len())
                .finish(),
            Self::Param { name, value } => f
                .debug_struct("Param")
                .field("name", name)
                .field("value", value)
                .finish(),
            Self::Switch { branches, cases } => f
                .debug_struct("Switch")
                .field("branches", branches)
                .field("cases", &cases.len())
                .finish(),
            Self::Case { name, predicate } => f
                .debug_struct("Case")
                .field("name", name)
                .field("predicate", predicate)
                .finish(),
            Self::Resource { kind, .. } => f.debug_struct("Resource").field("kind", kind).finish(),
        }
    }
}

impl fmt::Display for PrepNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            PrepValue::Module { params, .. } => write!(f, "module ({} params)", params.len()),
            PrepValue::Param { value, .. } => {
                let rendered = serde_json::to_string(value).unwrap_or_default();
                write!(f, "param {rendered}")
            }
            PrepValue::Switch { branches, .. } => write!(f, "switch [{}]", branches.join(", ")),
            PrepValue::Case { predicate, .. } => write!(f, "case when {predicate}"),
            PrepValue::Resource { kind, .. } => write!(f, "{kind}"),
        }
    }
}

/// Derive the preparer graph from the fragment graph
pub fn merge(
    g: &Graph<Fragment>,
    registry: &Registry,
    opts: &WalkOptions,
) -> Result<Graph<PrepNode>, PipelineError> {
    let result = g.transform(opts, |id, fragment, _view| {
        let value = match &fragment.value {
            FragmentValue::Module { name } => PrepValue::Module {
                name: name.clone(),
                params: Arc::new(module_scope(g, id)),
            },
            FragmentValue::Param { name, value } => PrepValue::Param {
                name: name.clone(),
                value: value.clone(),
            },
            FragmentValue::Switch { branches, cases } => PrepValue::Switch {
                branches: branches.clone(),
                cases: cases.clone(),
            },
            FragmentValue::Case { name, predicate } => PrepValue::Case {
                name: name.clone(),
                predicate: predicate.clone(),
            },
            FragmentValue::Resource { kind, name, args } => {
                let preparer = registry.instantiate(kind, name, args).map_err(|err| {
                    anyhow::Error::new(match err {
                        RegistryError::Unknown { kind } => LoadError::UnknownKind {
                            id: id.clone(),
                            kind,
                        },
                        other => LoadError::Resource {
                            id: id.clone(),
                            source: anyhow::Error::new(other),
                        },
                    })
                })?;
                PrepValue::Resource {
                    kind: kind.clone(),
                    preparer,
                    args: args.clone(),
                }
            }
        };
        Ok(Transformed::new(PrepNode {
            depends: fragment.depends.clone(),
            value,
        }))
    });

    result.map_err(|mut err| {
        if err.cancelled {
            return PipelineError::from_traversal(err);
        }
        let message = err.to_string();
        for (_, node_err) in err.errors.drain(..) {
            match node_err.downcast::<LoadError>() {
                Ok(load_err) => return PipelineError::Load(load_err),
                Err(_) => continue,
            }
        }
        PipelineError::Traversal(message)
    })
}

/// Assemble a module's scope from its direct param children
fn module_scope(g: &Graph<Fragment>, module: &NodeId) -> Scope {
    let mut scope = Scope::new();
    for child in g.children(module) {
        if let Some(Fragment {
            value: FragmentValue::Param { name, value },
            ..
        }) = g.get(&child)
        {
            scope.define(name.clone(), value.clone());
        }
    }
    scope
}

/// The nearest enclosing module's scope for a node
///
/// Switch and case nodes pass their enclosing scope through; only module
/// nodes (and root) establish a new one.
pub fn scope_for(g: &Graph<PrepNode>, id: &NodeId) -> Arc<Scope> {
    let mut at = id.parent();
    while let Some(current) = at {
        if let Some(PrepNode {
            value: PrepValue::Module { params, .. },
            ..
        }) = g.get(&current)
        {
            return params.clone();
        }
        at = current.parent();
    }
    Arc::new(Scope::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::load;
    use indexmap::IndexMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn merged(text: &str) -> Graph<PrepNode> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();

        let fragments = load(&path, &IndexMap::new()).unwrap();
        merge(&fragments, &resource::registry::defaults(), &WalkOptions::default()).unwrap()
    }

    #[test]
    fn test_module_scope_assembly() {
        let g = merged(
            r#"
            [[declare]]
            kind = "param"
            name = "who"
            [declare.args]
            default = "world"

            [[declare]]
            kind = "file.content"
            name = "greeting"
            [declare.args]
            destination = "/tmp/g"
            content = 'hello {{param "who"}}'
            "#,
        );

        match &g.get(&NodeId::root()).unwrap().value {
            PrepValue::Module { params, .. } => {
                assert_eq!(params.get("who"), Some(&Value::from("world")));
            }
            other => panic!("expected module, got {other:?}"),
        }

        let resource_id = NodeId::root().child("file.content.greeting");
        let scope = scope_for(&g, &resource_id);
        assert_eq!(scope.get("who"), Some(&Value::from("world")));
    }

    #[test]
    fn test_unknown_kind_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"
            [[declare]]
            kind = "docker.container"
            name = "web"
            "#,
        )
        .unwrap();

        let fragments = load(&path, &IndexMap::new()).unwrap();
        let err = merge(&fragments, &resource::registry::defaults(), &WalkOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Load(LoadError::UnknownKind { kind, .. }) if kind == "docker.container"
        ));
    }

    #[test]
    fn test_invalid_args_are_a_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        // file.content without a destination
        file.write_all(
            br#"
            [[declare]]
            kind = "file.content"
            name = "broken"
            "#,
        )
        .unwrap();

        let fragments = load(&path, &IndexMap::new()).unwrap();
        let err = merge(&fragments, &resource::registry::defaults(), &WalkOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Load(LoadError::Resource { .. })));
    }

    #[test]
    fn test_scope_passes_through_switch() {
        let g = merged(
            r#"
            [[declare]]
            kind = "param"
            name = "enabled"
            [declare.args]
            default = "true"

            [[declare]]
            kind = "macro.switch"
            name = "env"
            [declare.args]
            branches = ["on"]

            [[declare.body]]
            kind = "macro.case"
            name = "on"
            [declare.body.args]
            predicate = '{{param "enabled"}}'

            [[declare.body.body]]
            kind = "file.content"
            name = "inner"
            [declare.body.body.args]
            destination = "/tmp/i"
            content = "x"
            "#,
        );

        let inner = NodeId::root()
            .child("macro.switch.env")
            .child("macro.case.on")
            .child("file.content.inner");
        let scope = scope_for(&g, &inner);
        assert_eq!(scope.get("enabled"), Some(&Value::from("true")));
    }
}
