//! # Graph
//!
//! An in-memory directed acyclic graph keyed by hierarchical node ids, with
//! bounded-concurrency traversals and copy-on-write transforms.
//!
//! ## Core Concepts
//!
//! - **NodeId**: a slash-delimited path (`root/module.web/task.nginx`). The
//!   id fully determines a node's structural parent.
//! - **Graph**: nodes mapped to shared values plus a typed edge set.
//!   Structural edges mirror the id hierarchy; dependency edges are added
//!   explicitly and are checked for cycles as they are added.
//! - **Traversals**: bottom-up (`walk`, `transform`) and top-down
//!   (`root_first_walk`, `root_first_transform`) visits driven by a worker
//!   pool. For any edge `a -> b`, the visit of `b` completes before the
//!   visit of `a` begins.
//! - **Printers**: a visitor interface producing text or DOT renderings of
//!   a graph, driven by a deterministic sequential walk.
//!
//! ## Example
//!
//! ```
//! use graph::{Graph, NodeId, WalkOptions};
//!
//! let mut g = Graph::new();
//! g.add(NodeId::root(), "root").unwrap();
//! g.add(NodeId::root().child("task.a"), "a").unwrap();
//! g.add(NodeId::root().child("task.b"), "b").unwrap();
//! g.connect(&NodeId::root().child("task.a"), &NodeId::root().child("task.b")).unwrap();
//!
//! // task.b is visited before task.a, which is visited before root.
//! g.walk(&WalkOptions::default(), |_id, _value| Ok(())).unwrap();
//! ```

pub mod graph;
pub mod id;
pub mod print;
pub mod walk;

pub use graph::{Edge, EdgeKind, Graph};
pub use id::NodeId;
pub use print::{DotPrinter, Printer, TextPrinter, print};
pub use walk::{CancelToken, Transformed, TransformView, TraversalError, WalkOptions};

use thiserror::Error;

/// Errors raised by graph mutations and validation
#[derive(Debug, Error)]
pub enum Error {
    /// A node id was not present in the graph
    #[error("no such node: {id}")]
    NotFound { id: NodeId },

    /// A node id was already present in the graph
    #[error("node already exists: {id}")]
    AlreadyExists { id: NodeId },

    /// A non-root node was added before its structural parent
    #[error("cannot add {id}: parent {parent} is not in the graph")]
    Orphan { id: NodeId, parent: NodeId },

    /// Connecting two nodes would close a cycle
    #[error("edge {from} -> {to} would create a cycle through [{}]", members.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", "))]
    WouldCycle {
        from: NodeId,
        to: NodeId,
        members: Vec<NodeId>,
    },

    /// The edge to add is already present
    #[error("duplicate edge {from} -> {to}")]
    DuplicateEdge { from: NodeId, to: NodeId },

    /// Structural validation found problems
    #[error("invalid graph: {}", problems.join("; "))]
    Invalid { problems: Vec<String> },
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, Error>;
