//! Parameter values and their coercions
//!
//! Values come from module source args, param defaults, and params files.
//! The coercion rules are part of the module-source contract and must stay
//! stable: see the accessor methods for the exact table.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from value coercions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The source kind has no conversion to the requested kind
    #[error("cannot convert {kind} to {wanted}")]
    Coerce { kind: &'static str, wanted: &'static str },

    /// A string could not be parsed as a base-10 integer
    #[error("cannot parse {value:?} as an integer")]
    ParseInt { value: String },

    /// A string was not a recognized truth token
    #[error("{value}: not a valid truth value; should be one of [f false t true]")]
    Truthiness { value: String },
}

/// A typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    /// The kind name used in error messages and type tags
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Coerce to a string
    ///
    /// string: identity; int: decimal representation; bool: `true`/`false`;
    /// list/map: error.
    pub fn as_str(&self) -> Result<String, ValueError> {
        match self {
            Value::String(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
            other => Err(ValueError::Coerce {
                kind: other.kind(),
                wanted: "string",
            }),
        }
    }

    /// Coerce to an integer
    ///
    /// string: base-10 parse, else error; int: identity; bool: 1/0;
    /// list/map: error.
    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            Value::String(s) => s.parse().map_err(|_| ValueError::ParseInt { value: s.clone() }),
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(ValueError::Coerce {
                kind: other.kind(),
                wanted: "int",
            }),
        }
    }

    /// Coerce to a bool
    ///
    /// string: `"true"`/`"t"` and `"false"`/`"f"`, else error; int: 0 is
    /// false, anything else true; bool: identity; list/map: error.
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::String(s) => match s.as_str() {
                "true" | "t" => Ok(true),
                "false" | "f" => Ok(false),
                _ => Err(ValueError::Truthiness { value: s.clone() }),
            },
            Value::Int(i) => Ok(*i != 0),
            Value::Bool(b) => Ok(*b),
            other => Err(ValueError::Coerce {
                kind: other.kind(),
                wanted: "bool",
            }),
        }
    }

    /// Access as a list, without coercion
    pub fn as_list(&self) -> Result<&[Value], ValueError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(ValueError::Coerce {
                kind: other.kind(),
                wanted: "list",
            }),
        }
    }

    /// Access as a map, without coercion
    pub fn as_map(&self) -> Result<&IndexMap<String, Value>, ValueError> {
        match self {
            Value::Map(entries) => Ok(entries),
            other => Err(ValueError::Coerce {
                kind: other.kind(),
                wanted: "map",
            }),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
