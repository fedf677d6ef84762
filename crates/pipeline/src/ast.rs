//! The typed AST the loader consumes
//!
//! Syntax is out of scope for the pipeline: any front-end that produces a
//! declaration sequence will do. The bundled front-end reads TOML:
//!
//! ```toml
//! [[declare]]
//! kind = "param"
//! name = "who"
//! [declare.args]
//! default = "world"
//! type = "string"
//!
//! [[declare]]
//! kind = "file.content"
//! name = "greeting"
//! depends = []
//! [declare.args]
//! destination = "/tmp/greeting"
//! content = 'hello {{param "who"}}'
//! ```
//!
//! `module`, `macro.switch`, and `macro.case` declarations nest further
//! declarations under `body`.

use indexmap::IndexMap;
use resource::Value;
use serde::{Deserialize, Serialize};

/// A parsed module source file: a sequence of top-level declarations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSource {
    #[serde(default, rename = "declare")]
    pub declarations: Vec<Decl>,
}

/// One declaration: a kind, an instance name, an optional argument block,
/// a depends list, and (for control-flow and module kinds) a body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decl {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub args: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<Decl>,
}

impl Decl {
    /// The node id segment for this declaration: `<kind>.<name>`
    pub fn segment(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }
}

/// Type tags for param declarations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Int,
    Bool,
    List,
    Map,
}

impl ParamType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "string" => Some(Self::String),
            "int" => Some(Self::Int),
            "bool" => Some(Self::Bool),
            "list" => Some(Self::List),
            "map" => Some(Self::Map),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Map => "map",
        }
    }

    /// Whether a value satisfies this tag without coercion
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Int, Value::Int(_))
                | (Self::Bool, Value::Bool(_))
                | (Self::List, Value::List(_))
                | (Self::Map, Value::Map(_))
        )
    }
}
