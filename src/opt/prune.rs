//! Dead node sweep
//!
//! Removes every node not reachable from End through inputs or block edges.
//! Run before the combined pass (its input contract assumes no dangling
//! nodes) and after it to sweep out the husks left behind by `exchange`.

use super::GraphPass;
use crate::ir::{Graph, NodeId};

/// Delete all nodes unreachable from End; returns true if any were removed.
pub fn prune_dead(graph: &mut Graph) -> usize {
    let mut reachable = vec![false; graph.len()];
    graph.walk(|n| reachable[n.index()] = true, |_| {});

    let dead: Vec<NodeId> = graph
        .live_nodes()
        .filter(|n| !reachable[n.index()])
        .collect();
    for &n in &dead {
        log::trace!("prune: removing dead node {n}");
        graph.kill_node(n);
    }
    if !dead.is_empty() {
        log::debug!("prune: removed {} dead node(s)", dead.len());
    }
    dead.len()
}

/// [`GraphPass`] wrapper around [`prune_dead`].
#[derive(Debug, Default)]
pub struct PruneDead;

impl GraphPass for PruneDead {
    fn name(&self) -> &'static str {
        "prune-dead"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        prune_dead(graph) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify::verify_graph;
    use crate::ir::{GraphBuilder, Mode};

    #[test]
    fn test_prunes_unused_values() {
        let mut b = GraphBuilder::new("t");
        let mem = b.initial_mem();
        let x = b.arg(0, Mode::I32);
        let unused = b.add(x, x);
        let c = b.const_i32(1);
        b.ret(mem, &[c]);
        let mut g = b.finish();
        assert!(!g.is_dead(unused));
        assert!(prune_dead(&mut g) > 0);
        assert!(g.is_dead(unused));
        assert!(g.is_dead(x));
        verify_graph(&g).unwrap();
    }

    #[test]
    fn test_keepalive_protects_nodes() {
        let mut b = GraphBuilder::new("t");
        let mem = b.initial_mem();
        let x = b.arg(0, Mode::I32);
        let hanging = b.add(x, x);
        b.keep_alive(hanging);
        let c = b.const_i32(1);
        b.ret(mem, &[c]);
        let mut g = b.finish();
        prune_dead(&mut g);
        assert!(!g.is_dead(hanging));
        verify_graph(&g).unwrap();
    }
}
