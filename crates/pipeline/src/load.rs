//! Loading: module source to fragment graph
//!
//! Emits `root`, then one structural child per declaration. Module calls
//! are inlined recursively: the called file's declarations become a
//! subgraph rooted at `module.<name>`, with the caller's argument block
//! overriding param defaults. Param values are settled here; scopes are
//! assembled by the merge stage.

use crate::ast::{Decl, ModuleSource, ParamType};
use crate::error::LoadError;
use graph::{Graph, NodeId};
use indexmap::IndexMap;
use log::debug;
use resource::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded declaration: the AST fragment plus its settled pieces
#[derive(Debug, Clone)]
pub struct Fragment {
    pub depends: Vec<String>,
    pub value: FragmentValue,
}

#[derive(Debug, Clone)]
pub enum FragmentValue {
    /// A module scope holder; the root node is the implicit top module
    Module { name: String },
    /// A param with its final value (caller override or default)
    Param { name: String, value: Value },
    /// A switch with its declared branches and case ids in declaration
    /// order
    Switch { branches: Vec<String>, cases: Vec<NodeId> },
    /// A case with its raw predicate template
    Case { name: String, predicate: String },
    /// Any other resource declaration, still carrying raw args
    Resource {
        kind: String,
        name: String,
        args: IndexMap<String, Value>,
    },
}

impl Fragment {
    fn new(depends: Vec<String>, value: FragmentValue) -> Self {
        Self { depends, value }
    }
}

/// Load a module source file into the fragment graph
///
/// `overrides` are the top-level param values (from a params file or CLI);
/// they play the role of the caller's argument block for the root module.
pub fn load(path: &Path, overrides: &IndexMap<String, Value>) -> Result<Graph<Fragment>, LoadError> {
    let source = parse_file(path)?;
    debug!("loaded {} declarations from {}", source.declarations.len(), path.display());

    let mut g = Graph::new();
    let root = NodeId::root();
    g.add(
        root.clone(),
        Fragment::new(Vec::new(), FragmentValue::Module { name: "root".to_string() }),
    )
    .map_err(|_| LoadError::Duplicate { id: root.clone() })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let mut stack = vec![canonical(path)?];
    load_module_body(
        &mut g,
        &root,
        &source.declarations,
        &base_dir,
        overrides,
        &mut stack,
    )?;
    Ok(g)
}

fn parse_file(path: &Path) -> Result<ModuleSource, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|err| LoadError::Parse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn canonical(path: &Path) -> Result<PathBuf, LoadError> {
    fs::canonicalize(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the declarations of one module, then reject caller arguments that
/// matched no declared param
fn load_module_body(
    g: &mut Graph<Fragment>,
    module: &NodeId,
    decls: &[Decl],
    base_dir: &Path,
    caller_args: &IndexMap<String, Value>,
    stack: &mut Vec<PathBuf>,
) -> Result<(), LoadError> {
    let mut declared = BTreeSet::new();
    load_decls(g, module, decls, base_dir, caller_args, stack, Some(&mut declared))?;

    for name in caller_args.keys() {
        if !declared.contains(name) {
            return Err(LoadError::UnknownArgument {
                id: module.clone(),
                name: name.clone(),
            });
        }
    }
    Ok(())
}

fn load_decls(
    g: &mut Graph<Fragment>,
    parent: &NodeId,
    decls: &[Decl],
    base_dir: &Path,
    caller_args: &IndexMap<String, Value>,
    stack: &mut Vec<PathBuf>,
    mut params: Option<&mut BTreeSet<String>>,
) -> Result<(), LoadError> {
    for decl in decls {
        let id = parent.child(&decl.segment());
        if g.contains(&id) {
            return Err(LoadError::Duplicate { id });
        }
        let schema = |reason: &str| LoadError::Schema {
            id: id.clone(),
            reason: reason.to_string(),
        };

        match decl.kind.as_str() {
            "param" => {
                let declared = params
                    .as_deref_mut()
                    .ok_or_else(|| schema("param declarations must be direct children of a module"))?;
                if !decl.body.is_empty() {
                    return Err(schema("param does not take a body"));
                }
                let value = settle_param(&id, parent, decl, caller_args)?;
                declared.insert(decl.name.clone());
                add_node(
                    g,
                    id,
                    Fragment::new(
                        decl.depends.clone(),
                        FragmentValue::Param {
                            name: decl.name.clone(),
                            value,
                        },
                    ),
                )?;
            }

            "module" => {
                if !decl.body.is_empty() {
                    return Err(schema("module calls load their body from source"));
                }
                let source_arg = decl
                    .args
                    .get("source")
                    .ok_or_else(|| schema("module requires a source file"))?
                    .as_str()
                    .map_err(|e| schema(&e.to_string()))?;

                let module_path = base_dir.join(&source_arg);
                let canonical_path = canonical(&module_path)?;
                if stack.contains(&canonical_path) {
                    return Err(LoadError::RecursiveModule { path: module_path });
                }
                let body = parse_file(&module_path)?;

                add_node(
                    g,
                    id.clone(),
                    Fragment::new(
                        decl.depends.clone(),
                        FragmentValue::Module {
                            name: decl.name.clone(),
                        },
                    ),
                )?;

                let mut child_args = decl.args.clone();
                child_args.shift_remove("source");
                let child_base = module_path
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .to_path_buf();

                stack.push(canonical_path);
                let result = load_module_body(
                    g,
                    &id,
                    &body.declarations,
                    &child_base,
                    &child_args,
                    stack,
                );
                stack.pop();
                result?;
            }

            "macro.switch" => {
                let branches = decl
                    .args
                    .get("branches")
                    .ok_or_else(|| schema("switch requires a branches list"))?
                    .as_list()
                    .map_err(|e| schema(&e.to_string()))?
                    .iter()
                    .map(Value::as_str)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| schema(&e.to_string()))?;

                for case in &decl.body {
                    if case.kind != "macro.case" {
                        return Err(schema("switch body entries must be macro.case"));
                    }
                }

                add_node(
                    g,
                    id.clone(),
                    Fragment::new(
                        decl.depends.clone(),
                        FragmentValue::Switch {
                            branches: branches.clone(),
                            cases: Vec::new(),
                        },
                    ),
                )?;
                load_decls(g, &id, &decl.body, base_dir, caller_args, stack, None)?;

                // Cases in declaration order, now that they exist
                let cases = decl.body.iter().map(|c| id.child(&c.segment())).collect();
                g.update(
                    &id,
                    Arc::new(Fragment::new(
                        decl.depends.clone(),
                        FragmentValue::Switch { branches, cases },
                    )),
                )
                .map_err(|_| LoadError::Duplicate { id: id.clone() })?;
            }

            "macro.case" => {
                let under_switch = matches!(
                    g.get(parent).map(|f| &f.value),
                    Some(FragmentValue::Switch { .. })
                );
                if !under_switch {
                    return Err(schema("case requires a macro.switch parent"));
                }
                let predicate = decl
                    .args
                    .get("predicate")
                    .ok_or_else(|| schema("case requires a predicate"))?
                    .as_str()
                    .map_err(|e| schema(&e.to_string()))?;

                add_node(
                    g,
                    id.clone(),
                    Fragment::new(
                        decl.depends.clone(),
                        FragmentValue::Case {
                            name: decl.name.clone(),
                            predicate,
                        },
                    ),
                )?;
                load_decls(g, &id, &decl.body, base_dir, caller_args, stack, None)?;
            }

            _ => {
                if !decl.body.is_empty() {
                    return Err(schema("this kind does not take a body"));
                }
                add_node(
                    g,
                    id,
                    Fragment::new(
                        decl.depends.clone(),
                        FragmentValue::Resource {
                            kind: decl.kind.clone(),
                            name: decl.name.clone(),
                            args: decl.args.clone(),
                        },
                    ),
                )?;
            }
        }
    }
    Ok(())
}

/// Resolve a param declaration's final value: caller override, else
/// declared default; missing required params are a load error
fn settle_param(
    id: &NodeId,
    module: &NodeId,
    decl: &Decl,
    caller_args: &IndexMap<String, Value>,
) -> Result<Value, LoadError> {
    for key in decl.args.keys() {
        if key != "default" && key != "type" {
            return Err(LoadError::Schema {
                id: id.clone(),
                reason: format!("unknown param argument {key:?}"),
            });
        }
    }

    let ty = match decl.args.get("type") {
        Some(tag) => {
            let tag = tag.as_str().map_err(|e| LoadError::Schema {
                id: id.clone(),
                reason: e.to_string(),
            })?;
            Some(ParamType::parse(&tag).ok_or_else(|| LoadError::Schema {
                id: id.clone(),
                reason: format!("unknown param type {tag:?}"),
            })?)
        }
        None => None,
    };

    let value = caller_args
        .get(&decl.name)
        .or_else(|| decl.args.get("default"))
        .cloned()
        .ok_or_else(|| LoadError::MissingParam {
            id: module.clone(),
            name: decl.name.clone(),
        })?;

    if let Some(ty) = ty
        && !ty.matches(&value)
    {
        return Err(LoadError::ParamType {
            id: id.clone(),
            expected: ty.name(),
            got: value.kind(),
        });
    }
    Ok(value)
}

fn add_node(g: &mut Graph<Fragment>, id: NodeId, fragment: Fragment) -> Result<(), LoadError> {
    let key = id.clone();
    g.add(id, fragment)
        .map_err(|_| LoadError::Duplicate { id: key })
}
