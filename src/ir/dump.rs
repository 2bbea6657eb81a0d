//! Graph dumping
//!
//! Pretty-prints a graph block by block for debugging, and produces a JSON
//! snapshot of the same information for external viewers. Analysis passes
//! can attach a per-node annotation (the combined pass reports lattice value
//! and congruence class through it).

use super::graph::Graph;
use super::{Mode, NodeId};
use serde::Serialize;
use std::fmt::Write;

/// Extra per-node information supplied by an analysis.
#[derive(Debug, Clone, Serialize)]
pub struct NodeAnnotation {
    /// Rendered lattice value.
    pub value: String,
    /// Congruence class number.
    pub class: u32,
}

/// Dump the whole graph to a string, blocks and nodes in id order.
pub fn dump_graph(graph: &Graph) -> String {
    dump_graph_annotated(graph, |_| None)
}

/// Dump with a per-node annotation column.
pub fn dump_graph_annotated(
    graph: &Graph,
    annotate: impl Fn(NodeId) -> Option<NodeAnnotation>,
) -> String {
    let mut out = String::new();
    writeln!(out, "graph \"{}\" {{", graph.name()).unwrap();

    let mut blocks: Vec<NodeId> = graph
        .live_nodes()
        .filter(|&n| graph.kind(n).is_block())
        .collect();
    blocks.sort();

    for block in blocks {
        let preds: Vec<String> = graph.ins(block).iter().map(|p| p.to_string()).collect();
        writeln!(out, "  {block}: preds [{}]", preds.join(", ")).unwrap();

        let mut members: Vec<NodeId> = graph
            .live_nodes()
            .filter(|&n| n != block && graph.block_of(n) == block)
            .collect();
        members.sort();
        for n in members {
            let ins: Vec<String> = graph.ins(n).iter().map(|p| p.to_string()).collect();
            write!(
                out,
                "    {n} = {} {} ({})",
                graph.kind(n),
                graph.mode(n),
                ins.join(", ")
            )
            .unwrap();
            if let Some(a) = annotate(n) {
                write!(out, "  ; {} class {}", a.value, a.class).unwrap();
            }
            out.push('\n');
        }
    }
    out.push_str("}\n");
    out
}

#[derive(Serialize)]
struct NodeSnapshot {
    id: u32,
    op: String,
    mode: Mode,
    block: u32,
    ins: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotation: Option<NodeAnnotation>,
}

#[derive(Serialize)]
struct GraphSnapshot {
    name: String,
    nodes: Vec<NodeSnapshot>,
}

/// JSON view of the graph for external visualization tooling.
pub fn graph_snapshot(
    graph: &Graph,
    annotate: impl Fn(NodeId) -> Option<NodeAnnotation>,
) -> String {
    let nodes = graph
        .live_nodes()
        .map(|n| NodeSnapshot {
            id: n.0,
            op: graph.kind(n).to_string(),
            mode: graph.mode(n),
            block: graph.block_of(n).0,
            ins: graph.ins(n).iter().map(|p| p.0).collect(),
            annotation: annotate(n),
        })
        .collect();
    let snapshot = GraphSnapshot {
        name: graph.name().to_string(),
        nodes,
    };
    serde_json::to_string_pretty(&snapshot).expect("graph snapshot serializes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::GraphBuilder;

    #[test]
    fn test_dump_lists_blocks_and_nodes() {
        let mut b = GraphBuilder::new("demo");
        let mem = b.initial_mem();
        let c = b.const_i32(3);
        b.ret(mem, &[c]);
        let text = dump_graph(b.graph());
        assert!(text.contains("graph \"demo\""));
        assert!(text.contains("Const"));
        assert!(text.contains("Return"));
    }

    #[test]
    fn test_snapshot_is_valid_json() {
        let mut b = GraphBuilder::new("demo");
        let mem = b.initial_mem();
        let c = b.const_i32(3);
        b.ret(mem, &[c]);
        let json = graph_snapshot(b.graph(), |_| None);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["name"], "demo");
        assert!(parsed["nodes"].as_array().unwrap().len() >= 5);
    }
}
