//! Programmatic graph construction
//!
//! The builder owns a [`Graph`] and an insert point. SSA form is explicit:
//! callers create Phis with all operands spelled out and thread the memory
//! value by hand. Blocks may be created with their control predecessors, or
//! empty with predecessors appended later for loop back edges.

use super::graph::Graph;
use super::node::{
    OpKind, SwitchTable, PN_COND_FALSE, PN_COND_TRUE, PN_MEM, PN_RES, PN_START_ARG_BASE,
    PN_START_EXEC, PN_START_MEM,
};
use super::{Mode, NodeId, Relation, SymConstKind, Tarval};

/// The two control projections of a Cond.
#[derive(Debug, Clone, Copy)]
pub struct CondProjs {
    pub if_true: NodeId,
    pub if_false: NodeId,
}

/// Builder for one function graph.
pub struct GraphBuilder {
    graph: Graph,
    current: NodeId,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let graph = Graph::new(name);
        let current = graph.start_block();
        Self { graph, current }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Direct graph access for edits the builder has no sugar for
    /// (completing Phis after a loop back edge was appended).
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Hand over the finished graph.
    pub fn finish(self) -> Graph {
        self.graph
    }

    /// The block new nodes are placed in.
    pub fn current_block(&self) -> NodeId {
        self.current
    }

    pub fn set_current_block(&mut self, block: NodeId) {
        self.current = block;
    }

    /// Create a block and make it current.
    pub fn block(&mut self, preds: &[NodeId]) -> NodeId {
        let b = self.graph.new_block(false, preds);
        self.current = b;
        b
    }

    /// Create a block carrying an address-taken label.
    pub fn labelled_block(&mut self, preds: &[NodeId]) -> NodeId {
        let b = self.graph.new_block(true, preds);
        self.current = b;
        b
    }

    /// Append a control predecessor to a block (loop back edges).
    pub fn add_block_pred(&mut self, block: NodeId, pred: NodeId) {
        self.graph.add_in(block, pred);
    }

    // ---- start projections -------------------------------------------

    /// The initial control flow out of the start block.
    pub fn initial_exec(&mut self) -> NodeId {
        let start = self.graph.start();
        self.graph.new_proj(start, Mode::X, PN_START_EXEC)
    }

    /// The initial memory value.
    pub fn initial_mem(&mut self) -> NodeId {
        let start = self.graph.start();
        self.graph.new_proj(start, Mode::M, PN_START_MEM)
    }

    /// The i-th function argument.
    pub fn arg(&mut self, i: u32, mode: Mode) -> NodeId {
        let start = self.graph.start();
        self.graph.new_proj(start, mode, PN_START_ARG_BASE + i)
    }

    // ---- values ------------------------------------------------------

    pub fn const_val(&mut self, value: Tarval) -> NodeId {
        self.graph.new_const(value)
    }

    pub fn const_i32(&mut self, value: i64) -> NodeId {
        self.graph.new_const(Tarval::new(Mode::I32, value))
    }

    pub fn symconst(&mut self, mode: Mode, kind: SymConstKind) -> NodeId {
        self.graph.new_symconst(mode, kind)
    }

    pub fn add_entity(&mut self, name: impl Into<String>, size: u32, align: u32) -> super::EntityId {
        self.graph.add_entity(name, size, align)
    }

    pub fn unknown(&mut self, mode: Mode) -> NodeId {
        self.graph.new_unknown(mode)
    }

    fn binop(&mut self, kind: OpKind, left: NodeId, right: NodeId) -> NodeId {
        let mode = self.graph.mode(left);
        self.graph.add_node(kind, mode, self.current, &[left, right])
    }

    pub fn add(&mut self, l: NodeId, r: NodeId) -> NodeId {
        self.binop(OpKind::Add, l, r)
    }

    pub fn sub(&mut self, l: NodeId, r: NodeId) -> NodeId {
        self.binop(OpKind::Sub, l, r)
    }

    pub fn mul(&mut self, l: NodeId, r: NodeId) -> NodeId {
        self.binop(OpKind::Mul, l, r)
    }

    pub fn and(&mut self, l: NodeId, r: NodeId) -> NodeId {
        self.binop(OpKind::And, l, r)
    }

    pub fn or(&mut self, l: NodeId, r: NodeId) -> NodeId {
        self.binop(OpKind::Or, l, r)
    }

    pub fn eor(&mut self, l: NodeId, r: NodeId) -> NodeId {
        self.binop(OpKind::Eor, l, r)
    }

    pub fn shl(&mut self, l: NodeId, r: NodeId) -> NodeId {
        self.binop(OpKind::Shl, l, r)
    }

    pub fn shr(&mut self, l: NodeId, r: NodeId) -> NodeId {
        self.binop(OpKind::Shr, l, r)
    }

    pub fn cmp(&mut self, relation: Relation, l: NodeId, r: NodeId) -> NodeId {
        self.graph
            .add_node(OpKind::Cmp { relation }, Mode::B, self.current, &[l, r])
    }

    pub fn confirm(&mut self, value: NodeId, relation: Relation, bound: NodeId) -> NodeId {
        let mode = self.graph.mode(value);
        self.graph.add_node(
            OpKind::Confirm { relation },
            mode,
            self.current,
            &[value, bound],
        )
    }

    pub fn mux(&mut self, sel: NodeId, if_false: NodeId, if_true: NodeId) -> NodeId {
        let mode = self.graph.mode(if_false);
        self.graph
            .add_node(OpKind::Mux, mode, self.current, &[sel, if_false, if_true])
    }

    pub fn conv(&mut self, value: NodeId, mode: Mode) -> NodeId {
        let block = self.current;
        self.graph.new_conv(block, value, mode)
    }

    pub fn phi(&mut self, mode: Mode, ins: &[NodeId]) -> NodeId {
        let block = self.current;
        self.graph.new_phi(block, mode, ins)
    }

    // ---- control flow ------------------------------------------------

    pub fn jmp(&mut self) -> NodeId {
        let block = self.current;
        self.graph.new_jmp(block)
    }

    /// Branch on a boolean selector.
    pub fn cond(&mut self, sel: NodeId) -> CondProjs {
        let c = self
            .graph
            .add_node(OpKind::Cond, Mode::T, self.current, &[sel]);
        CondProjs {
            if_true: self.graph.new_proj(c, Mode::X, PN_COND_TRUE),
            if_false: self.graph.new_proj(c, Mode::X, PN_COND_FALSE),
        }
    }

    /// Multi-way branch; returns the Switch node, projections come from
    /// [`GraphBuilder::switch_out`].
    pub fn switch(&mut self, sel: NodeId, table: SwitchTable) -> NodeId {
        self.graph
            .add_node(OpKind::Switch { table }, Mode::T, self.current, &[sel])
    }

    pub fn switch_out(&mut self, switch: NodeId, pn: u32) -> NodeId {
        self.graph.new_proj(switch, Mode::X, pn)
    }

    /// Return from the function; wires the end block.
    pub fn ret(&mut self, mem: NodeId, values: &[NodeId]) -> NodeId {
        let mut ins = vec![mem];
        ins.extend_from_slice(values);
        let r = self
            .graph
            .add_node(OpKind::Return, Mode::X, self.current, &ins);
        let end_block = self.graph.end_block();
        self.graph.add_in(end_block, r);
        r
    }

    pub fn keep_alive(&mut self, n: NodeId) {
        self.graph.add_end_keepalive(n);
    }

    // ---- memory ------------------------------------------------------

    /// Load through a pointer; yields the new memory value and the result.
    pub fn load(&mut self, mem: NodeId, ptr: NodeId, mode: Mode) -> (NodeId, NodeId) {
        let l = self
            .graph
            .add_node(OpKind::Load, Mode::T, self.current, &[mem, ptr]);
        let m = self.graph.new_proj(l, Mode::M, PN_MEM);
        let v = self.graph.new_proj(l, mode, PN_RES);
        (m, v)
    }

    /// Store through a pointer; yields the new memory value.
    pub fn store(&mut self, mem: NodeId, ptr: NodeId, value: NodeId) -> NodeId {
        let s = self
            .graph
            .add_node(OpKind::Store, Mode::T, self.current, &[mem, ptr, value]);
        self.graph.new_proj(s, Mode::M, PN_MEM)
    }

    /// Call a callee value; yields the new memory value and the result.
    pub fn call(
        &mut self,
        mem: NodeId,
        callee: NodeId,
        args: &[NodeId],
        res_mode: Mode,
    ) -> (NodeId, NodeId) {
        let mut ins = vec![mem, callee];
        ins.extend_from_slice(args);
        let c = self
            .graph
            .add_node(OpKind::Call, Mode::T, self.current, &ins);
        let m = self.graph.new_proj(c, Mode::M, PN_MEM);
        let v = self.graph.new_proj(c, res_mode, PN_RES);
        (m, v)
    }

    pub fn sync(&mut self, mems: &[NodeId]) -> NodeId {
        self.graph.add_node(OpKind::Sync, Mode::M, self.current, mems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify::verify_graph;

    #[test]
    fn test_build_straight_line() {
        let mut b = GraphBuilder::new("add2");
        let mem = b.initial_mem();
        let x = b.arg(0, Mode::I32);
        let two = b.const_i32(2);
        let sum = b.add(x, two);
        b.ret(mem, &[sum]);
        let g = b.finish();
        verify_graph(&g).unwrap();
    }

    #[test]
    fn test_build_diamond_with_phi() {
        let mut b = GraphBuilder::new("select");
        let mem = b.initial_mem();
        let exec = b.initial_exec();
        let x = b.arg(0, Mode::I32);
        let zero = b.const_i32(0);
        let entry = b.block(&[exec]);
        let is_pos = b.cmp(Relation::Gt, x, zero);
        let projs = b.cond(is_pos);

        b.block(&[projs.if_true]);
        let jmp_t = b.jmp();
        b.block(&[projs.if_false]);
        let jmp_f = b.jmp();

        b.block(&[jmp_t, jmp_f]);
        let one = b.const_i32(1);
        let minus = b.const_i32(-1);
        let res = b.phi(Mode::I32, &[one, minus]);
        b.ret(mem, &[res]);

        let g = b.finish();
        verify_graph(&g).unwrap();
        assert!(g.kind(entry).is_block());
    }
}
