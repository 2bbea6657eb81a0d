//! Structural graph validation
//!
//! Checks the invariants every pass may assume: inputs are live, def-use
//! edges mirror inputs exactly, Phi arity matches the block's predecessor
//! count, projections hang off tuple producers, and control edges carry
//! control mode.

use super::graph::Graph;
use super::node::OpKind;
use super::{Mode, NodeId};
use std::fmt;

/// One violated invariant.
#[derive(Debug)]
pub enum VerifyError {
    DeadInput { node: NodeId, pos: i32, pred: NodeId },
    MissingDefUse { def: NodeId, user: NodeId, pos: i32 },
    DanglingDefUse { def: NodeId, user: NodeId, pos: i32 },
    PhiArity { phi: NodeId, arity: usize, block_preds: usize },
    NonTupleProj { proj: NodeId, pred: NodeId },
    NonControlBlockPred { block: NodeId, pos: i32, pred: NodeId },
    BadBlockField { node: NodeId, block: NodeId },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::DeadInput { node, pos, pred } => {
                write!(f, "{node} input {pos} refers to dead node {pred}")
            }
            VerifyError::MissingDefUse { def, user, pos } => {
                write!(f, "{def} lacks the def-use edge for {user} input {pos}")
            }
            VerifyError::DanglingDefUse { def, user, pos } => {
                write!(f, "{def} carries a stale def-use edge ({user}, {pos})")
            }
            VerifyError::PhiArity {
                phi,
                arity,
                block_preds,
            } => write!(
                f,
                "{phi} has {arity} operands but its block has {block_preds} predecessors"
            ),
            VerifyError::NonTupleProj { proj, pred } => {
                write!(f, "{proj} projects out of non-tuple {pred}")
            }
            VerifyError::NonControlBlockPred { block, pos, pred } => {
                write!(f, "{block} predecessor {pos} ({pred}) is not control mode")
            }
            VerifyError::BadBlockField { node, block } => {
                write!(f, "{node} is placed in {block}, which is not a live block")
            }
        }
    }
}

/// All violations found in one run.
#[derive(Debug, Default)]
pub struct VerifyErrors(pub Vec<VerifyError>);

impl fmt::Display for VerifyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} graph invariant violation(s):", self.0.len())?;
        for e in &self.0 {
            writeln!(f, "  {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VerifyErrors {}

/// Check the whole graph; returns every violation found.
pub fn verify_graph(graph: &Graph) -> Result<(), VerifyErrors> {
    let mut errors = Vec::new();

    for n in graph.live_nodes() {
        let data = graph.node(n);

        if !data.kind.is_block() {
            let block = data.block;
            if graph.is_dead(block) || !graph.kind(block).is_block() {
                errors.push(VerifyError::BadBlockField { node: n, block });
            } else if !has_edge(graph, block, n, -1) {
                errors.push(VerifyError::MissingDefUse {
                    def: block,
                    user: n,
                    pos: -1,
                });
            }
        }

        for (i, &p) in data.ins.iter().enumerate() {
            if graph.is_dead(p) {
                errors.push(VerifyError::DeadInput {
                    node: n,
                    pos: i as i32,
                    pred: p,
                });
                continue;
            }
            if !has_edge(graph, p, n, i as i32) {
                errors.push(VerifyError::MissingDefUse {
                    def: p,
                    user: n,
                    pos: i as i32,
                });
            }
        }

        for e in graph.outs(n) {
            let live = !graph.is_dead(e.user);
            let backed = live
                && if e.pos == -1 {
                    graph.block_of(e.user) == n
                } else {
                    graph
                        .ins(e.user)
                        .get(e.pos as usize)
                        .is_some_and(|&p| p == n)
                };
            if !backed {
                errors.push(VerifyError::DanglingDefUse {
                    def: n,
                    user: e.user,
                    pos: e.pos,
                });
            }
        }

        match &data.kind {
            OpKind::Phi => {
                let block_preds = graph.arity(data.block);
                if data.ins.len() != block_preds {
                    errors.push(VerifyError::PhiArity {
                        phi: n,
                        arity: data.ins.len(),
                        block_preds,
                    });
                }
            }
            OpKind::Proj { .. } => {
                let pred = data.ins[0];
                if graph.mode(pred) != Mode::T {
                    errors.push(VerifyError::NonTupleProj { proj: n, pred });
                }
            }
            OpKind::Block { .. } => {
                for (i, &p) in data.ins.iter().enumerate() {
                    if graph.mode(p) != Mode::X {
                        errors.push(VerifyError::NonControlBlockPred {
                            block: n,
                            pos: i as i32,
                            pred: p,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(VerifyErrors(errors))
    }
}

fn has_edge(graph: &Graph, def: NodeId, user: NodeId, pos: i32) -> bool {
    graph
        .outs(def)
        .iter()
        .any(|e| e.user == user && e.pos == pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GraphBuilder, Mode};

    #[test]
    fn test_accepts_well_formed_graph() {
        let mut b = GraphBuilder::new("ok");
        let mem = b.initial_mem();
        let x = b.arg(0, Mode::I32);
        let y = b.add(x, x);
        b.ret(mem, &[y]);
        assert!(verify_graph(b.graph()).is_ok());
    }

    #[test]
    fn test_rejects_phi_arity_mismatch() {
        let mut b = GraphBuilder::new("bad");
        let mem = b.initial_mem();
        let exec = b.initial_exec();
        b.block(&[exec]);
        let one = b.const_i32(1);
        let two = b.const_i32(2);
        // two operands against one block predecessor
        let phi = b.phi(Mode::I32, &[one, two]);
        b.ret(mem, &[phi]);
        let err = verify_graph(b.graph()).unwrap_err();
        assert!(err
            .0
            .iter()
            .any(|e| matches!(e, VerifyError::PhiArity { .. })));
    }
}
