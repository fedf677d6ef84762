//! Hierarchical node identifiers
//!
//! A node id is a slash-delimited path like `root/module.web/task.nginx`.
//! The id up to the last segment names the structural parent, so ids carry
//! the whole hierarchy with them. Ids are immutable once assigned.

use std::fmt;

/// The id of the graph root
const ROOT: &str = "root";

/// A hierarchical, slash-delimited node id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    /// The root id (`root`)
    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    /// Build an id from a full path string
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The id of a child with the given segment
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}/{}", self.0, segment))
    }

    /// The structural parent, or `None` for the root
    pub fn parent(&self) -> Option<Self> {
        self.0.rsplit_once('/').map(|(head, _)| Self(head.to_string()))
    }

    /// The last path segment
    pub fn base(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Whether this is the root id
    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// Whether `other` is a strict descendant of this id
    pub fn is_ancestor_of(&self, other: &NodeId) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// The full path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of path segments
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
