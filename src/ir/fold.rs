//! Constant folding
//!
//! [`computed_value`] evaluates a node over an explicit `value_of` lookup for
//! its operands. Construction-time folding passes a lookup that reads Const
//! nodes; the combined optimization pass redirects it at its lattice, so the
//! folder sees constants that are not yet materialized in the graph.

use super::graph::Graph;
use super::node::OpKind;
use super::{NodeId, Tarval};

/// Value lookup reading only Const nodes.
pub fn const_value_of(graph: &Graph) -> impl Fn(NodeId) -> Option<Tarval> + '_ {
    |n| match *graph.kind(n) {
        OpKind::Const { value } => Some(value),
        _ => None,
    }
}

/// Evaluate a node to a constant if its operands allow it.
pub fn computed_value(
    graph: &Graph,
    n: NodeId,
    value_of: &dyn Fn(NodeId) -> Option<Tarval>,
) -> Option<Tarval> {
    let ins = graph.ins(n);
    match graph.kind(n) {
        OpKind::Const { value } => Some(*value),
        OpKind::SymConst { kind } => match *kind {
            super::SymConstKind::Address(_) => None,
            super::SymConstKind::Size(e) => {
                Some(Tarval::new(graph.mode(n), graph.entity(e).size as i64))
            }
            super::SymConstKind::Align(e) => {
                Some(Tarval::new(graph.mode(n), graph.entity(e).align as i64))
            }
        },
        OpKind::Add => Some(value_of(ins[0])?.add(value_of(ins[1])?)),
        OpKind::Sub => Some(value_of(ins[0])?.sub(value_of(ins[1])?)),
        OpKind::Mul => Some(value_of(ins[0])?.mul(value_of(ins[1])?)),
        OpKind::And => Some(value_of(ins[0])?.and(value_of(ins[1])?)),
        OpKind::Or => Some(value_of(ins[0])?.or(value_of(ins[1])?)),
        OpKind::Eor => Some(value_of(ins[0])?.eor(value_of(ins[1])?)),
        OpKind::Shl => Some(value_of(ins[0])?.shl(value_of(ins[1])?)),
        OpKind::Shr => Some(value_of(ins[0])?.shr(value_of(ins[1])?)),
        OpKind::Shrs => Some(value_of(ins[0])?.shrs(value_of(ins[1])?)),
        OpKind::Rotl => Some(value_of(ins[0])?.rotl(value_of(ins[1])?)),
        OpKind::Cmp { relation } => {
            let l = value_of(ins[0])?;
            let r = value_of(ins[1])?;
            let ord = l.compare(r)?;
            Some(Tarval::bool_val(relation.eval(ord)))
        }
        OpKind::Conv => value_of(ins[0])?.convert(graph.mode(n)),
        OpKind::Mux => {
            let sel = value_of(ins[0])?;
            if sel.is_true() {
                value_of(ins[2])
            } else {
                value_of(ins[1])
            }
        }
        OpKind::Confirm { relation } => {
            if relation == &super::Relation::Eq {
                if let Some(bound) = value_of(ins[1]) {
                    return Some(bound);
                }
            }
            value_of(ins[0])
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Mode, Relation, SymConstKind};

    fn iconst(g: &mut Graph, v: i64) -> NodeId {
        g.new_const(Tarval::new(Mode::I32, v))
    }

    #[test]
    fn test_fold_arithmetic() {
        let mut g = Graph::new("t");
        let a = iconst(&mut g, 6);
        let b = iconst(&mut g, 7);
        let block = g.start_block();
        let mul = g.add_node(OpKind::Mul, Mode::I32, block, &[a, b]);
        let v = computed_value(&g, mul, &const_value_of(&g));
        assert_eq!(v, Some(Tarval::new(Mode::I32, 42)));
    }

    #[test]
    fn test_fold_cmp() {
        let mut g = Graph::new("t");
        let a = iconst(&mut g, 1);
        let b = iconst(&mut g, 2);
        let block = g.start_block();
        let cmp = g.add_node(
            OpKind::Cmp {
                relation: Relation::Lt,
            },
            Mode::B,
            block,
            &[a, b],
        );
        let v = computed_value(&g, cmp, &const_value_of(&g));
        assert_eq!(v, Some(Tarval::b_true()));
    }

    #[test]
    fn test_fold_symconst_size() {
        let mut g = Graph::new("t");
        let ent = g.add_entity("buffer", 64, 8);
        let sc = g.new_symconst(Mode::U32, SymConstKind::Size(ent));
        let v = computed_value(&g, sc, &const_value_of(&g));
        assert_eq!(v, Some(Tarval::new(Mode::U32, 64)));
        let addr = g.new_symconst(Mode::P, SymConstKind::Address(ent));
        assert_eq!(computed_value(&g, addr, &const_value_of(&g)), None);
    }

    #[test]
    fn test_fold_needs_all_operands() {
        let mut g = Graph::new("t");
        let a = iconst(&mut g, 6);
        let block = g.start_block();
        let unk = g.new_unknown(Mode::I32);
        let add = g.add_node(OpKind::Add, Mode::I32, block, &[a, unk]);
        assert_eq!(computed_value(&g, add, &const_value_of(&g)), None);
    }
}
