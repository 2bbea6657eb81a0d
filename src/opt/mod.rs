//! Optimization passes
//!
//! Passes transform one [`Graph`] in place and report whether they changed
//! it. They can be run directly or through the [`GraphPass`] trait when a
//! caller wants to sequence several of them.

pub mod combine;
pub mod prune;

use crate::ir::Graph;

/// A graph-to-graph optimization.
pub trait GraphPass {
    /// Name for diagnostics.
    fn name(&self) -> &'static str;

    /// Run on a graph; returns true when the graph was modified.
    fn run(&mut self, graph: &mut Graph) -> bool;
}

/// Run a sequence of passes until none of them changes the graph anymore.
pub fn run_to_fixpoint(graph: &mut Graph, passes: &mut [Box<dyn GraphPass>]) -> bool {
    let mut any = false;
    loop {
        let mut round = false;
        for pass in passes.iter_mut() {
            let changed = pass.run(graph);
            log::debug!("pass {}: modified={}", pass.name(), changed);
            round |= changed;
        }
        any |= round;
        if !round {
            return any;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::combine::Combine;
    use super::prune::PruneDead;
    use super::*;
    use crate::ir::{GraphBuilder, Mode};

    #[test]
    fn test_pipeline_reaches_a_fixpoint() {
        crate::logging::init_test();
        let mut b = GraphBuilder::new("pipeline");
        let mem = b.initial_mem();
        let two = b.const_i32(2);
        let three = b.const_i32(3);
        let sum = b.add(two, three);
        let x = b.arg(0, Mode::I32);
        let total = b.add(sum, x);
        b.ret(mem, &[total]);
        let mut g = b.finish();

        let mut passes: Vec<Box<dyn GraphPass>> =
            vec![Box::new(Combine::default()), Box::new(PruneDead)];
        assert!(run_to_fixpoint(&mut g, &mut passes));
        crate::ir::verify::verify_graph(&g).unwrap();
    }
}
