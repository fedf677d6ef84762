//! Pluggable graph pretty-printers
//!
//! A [`Printer`] is a visitor producing one output fragment per node, with
//! subgraph and document hooks. The driver runs a deterministic sequential
//! top-down walk (sorted children), so output is reproducible byte for
//! byte. Two backends are provided: an indented text tree and graphviz DOT.

use crate::graph::{EdgeKind, Graph};
use crate::id::NodeId;
use std::fmt::Display;

/// Visitor interface for rendering a graph
pub trait Printer<V> {
    /// Document prologue, emitted once before any node
    fn prologue(&self, _g: &Graph<V>) -> String {
        String::new()
    }

    /// Document epilogue, emitted once after everything else
    fn epilogue(&self, _g: &Graph<V>) -> String {
        String::new()
    }

    /// Render a single node
    fn draw_node(&self, id: &NodeId, value: &V) -> String;

    /// Opening fragment for a node that has children
    fn start_subgraph(&self, _id: &NodeId) -> String {
        String::new()
    }

    /// Closing fragment for a node that has children
    fn finish_subgraph(&self, _id: &NodeId) -> String {
        String::new()
    }

    /// Render one edge; called after all nodes, in sorted edge order
    fn draw_edge(&self, _from: &NodeId, _to: &NodeId, _kind: EdgeKind) -> String {
        String::new()
    }
}

/// Render a graph with the given printer
pub fn print<V, P: Printer<V>>(g: &Graph<V>, printer: &P) -> String {
    let mut out = String::new();
    out.push_str(&printer.prologue(g));

    let root = NodeId::root();
    if g.contains(&root) {
        draw_subtree(g, printer, &root, &mut out);
    }

    for edge in g.edges() {
        out.push_str(&printer.draw_edge(&edge.from, &edge.to, edge.kind));
    }

    out.push_str(&printer.epilogue(g));
    out
}

fn draw_subtree<V, P: Printer<V>>(g: &Graph<V>, printer: &P, id: &NodeId, out: &mut String) {
    let children = g.children(id);
    if let Some(value) = g.get(id) {
        if children.is_empty() {
            out.push_str(&printer.draw_node(id, value));
        } else {
            out.push_str(&printer.start_subgraph(id));
            out.push_str(&printer.draw_node(id, value));
            for child in &children {
                draw_subtree(g, printer, child, out);
            }
            out.push_str(&printer.finish_subgraph(id));
        }
    }
}

/// Indented text tree, one node per line
pub struct TextPrinter;

impl<V: Display> Printer<V> for TextPrinter {
    fn draw_node(&self, id: &NodeId, value: &V) -> String {
        let indent = "  ".repeat(id.depth().saturating_sub(1));
        format!("{indent}{}: {value}\n", id.base())
    }

    fn draw_edge(&self, from: &NodeId, to: &NodeId, kind: EdgeKind) -> String {
        match kind {
            EdgeKind::Dependency => format!("{from} -> {to}\n"),
            EdgeKind::Structural => String::new(),
        }
    }
}

/// Graphviz DOT output
///
/// Dependency edges are solid, structural edges dashed; nodes with
/// children become labelled clusters.
pub struct DotPrinter {
    /// Include structural edges in the output
    pub show_structural: bool,
}

impl Default for DotPrinter {
    fn default() -> Self {
        Self {
            show_structural: true,
        }
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

impl<V: Display> Printer<V> for DotPrinter {
    fn prologue(&self, _g: &Graph<V>) -> String {
        "digraph {\n".to_string()
    }

    fn epilogue(&self, _g: &Graph<V>) -> String {
        "}\n".to_string()
    }

    fn draw_node(&self, id: &NodeId, value: &V) -> String {
        format!(
            "  {} [label={}];\n",
            quote(id.as_str()),
            quote(&format!("{}\n{value}", id.base()))
        )
    }

    fn start_subgraph(&self, id: &NodeId) -> String {
        format!(
            "subgraph {} {{\nlabel = {};\n",
            quote(&format!("cluster_{id}")),
            quote(id.base())
        )
    }

    fn finish_subgraph(&self, _id: &NodeId) -> String {
        "}\n".to_string()
    }

    fn draw_edge(&self, from: &NodeId, to: &NodeId, kind: EdgeKind) -> String {
        match kind {
            EdgeKind::Dependency => {
                format!("  {} -> {};\n", quote(from.as_str()), quote(to.as_str()))
            }
            EdgeKind::Structural if self.show_structural => format!(
                "  {} -> {} [style=dashed];\n",
                quote(from.as_str()),
                quote(to.as_str())
            ),
            EdgeKind::Structural => String::new(),
        }
    }
}
