//! Graphviz dump of the computation graph, for debugging.

use std::fmt::Write as _;
use std::path::Path;

use itertools::Itertools;

use super::Graph;
use crate::node::Node;
use crate::Result;

impl Graph {
    /// Renders the graph in Graphviz syntax. Nodes appear in insertion order; edges carry
    /// their argument slot as a label. Leaves are drawn as boxes, operations as ellipses.
    pub fn to_dot(&self) -> String {
        let nodes: Vec<&Node> = self
            .nodes
            .values()
            .sorted_by_key(|node| node.serial)
            .collect();
        let mut out = String::new();
        let _ = writeln!(out, "digraph kitsune {{");
        let _ = writeln!(out, "    rankdir = BT;");
        for node in &nodes {
            let shape = if node.is_leaf() { " shape=box" } else { "" };
            let _ = writeln!(
                out,
                "    \"{}\" [label=\"{}\\n{}\"{shape}];",
                node.id,
                node.kind,
                node.layout.shape().iter().join("x"),
            );
        }
        for node in &nodes {
            for (slot, input) in node.inputs.iter().enumerate() {
                let _ = writeln!(out, "    \"{input}\" -> \"{}\" [label=\"{slot}\"];", node.id);
            }
        }
        let _ = writeln!(out, "}}");
        out
    }

    /// Writes the Graphviz rendering to a file.
    pub fn dump_dot(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_dot())?;
        Ok(())
    }
}
