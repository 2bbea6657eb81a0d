//! The lattice and its transfer functions
//!
//! Every node carries one [`LatticeValue`]; transitions go downward only.
//! Data nodes move Top → constant → Bottom. Control nodes use Reachable and
//! Unreachable instead of constants; a control projection that became
//! Reachable never reverts (the latch that absorbs the one non-monotone
//! interaction between selector timing and projection evaluation).

use super::Ctx;
use crate::ir::node::{OpKind, PN_COND_TRUE, PN_SWITCH_DEFAULT};
use crate::ir::{EntityId, Mode, NodeId, Relation, SymConstKind, Tarval};
use std::fmt;

/// Abstract value of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatticeValue {
    /// Nothing known yet; above every other element.
    Top,
    /// Control that cannot execute. Ordered like Top for every structural
    /// purpose; only control transfers distinguish the two.
    Unreachable,
    /// Control that may execute.
    Reachable,
    /// A concrete constant.
    Const(Tarval),
    /// The address of an entity, constant but symbolic.
    Address(EntityId),
    /// Not a constant; below every other element.
    Bottom,
}

impl LatticeValue {
    /// Top and Unreachable behave identically outside control transfers.
    pub fn is_top_like(self) -> bool {
        matches!(self, LatticeValue::Top | LatticeValue::Unreachable)
    }

    pub fn is_reachable(self) -> bool {
        self == LatticeValue::Reachable
    }

    /// Constant in the wide sense: concrete, symbolic, or Reachable.
    /// Partitions of such values are never split by inputs.
    pub fn is_constant_like(self) -> bool {
        matches!(
            self,
            LatticeValue::Const(_) | LatticeValue::Address(_) | LatticeValue::Reachable
        )
    }

    /// Only Bottom-valued nodes take part in input splitting.
    pub fn is_splittable(self) -> bool {
        self == LatticeValue::Bottom
    }

    pub fn tarval(self) -> Option<Tarval> {
        match self {
            LatticeValue::Const(tv) => Some(tv),
            _ => None,
        }
    }

    /// Is `new` a legal successor of `old` on the descending chain?
    pub fn transition_ok(old: LatticeValue, new: LatticeValue) -> bool {
        old == new
            || old == LatticeValue::Top
            || new == LatticeValue::Bottom
            || new == LatticeValue::Reachable
    }
}

impl fmt::Display for LatticeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatticeValue::Top => f.write_str("T"),
            LatticeValue::Unreachable => f.write_str("U"),
            LatticeValue::Reachable => f.write_str("R"),
            LatticeValue::Const(tv) => write!(f, "{tv}"),
            LatticeValue::Address(e) => write!(f, "&{e}"),
            LatticeValue::Bottom => f.write_str("_"),
        }
    }
}

impl Ctx<'_> {
    fn set_ty(&mut self, n: NodeId, ty: LatticeValue) {
        self.info_mut(n).ty = ty;
    }

    /// `computed_value` over the lattice: operands evaluate to their
    /// current constant, not to what the graph materializes.
    fn lattice_computed_value(&self, n: NodeId) -> Option<Tarval> {
        let infos = &self.infos;
        crate::ir::fold::computed_value(self.graph, n, &|m| infos[m.index()].ty.tarval())
    }

    /// Recompute the lattice value of a node from its inputs.
    pub(super) fn compute(&mut self, n: NodeId) {
        if !self.config.verify_monotone && self.ty(n) == LatticeValue::Bottom {
            // Bottom is final; skip unless the verifier wants to see
            // every transition.
            return;
        }

        let kind = self.graph.kind(n).clone();

        if !kind.is_block() && self.graph.is_pinned(n) {
            let block = self.graph.block_of(n);
            if !self.ty(block).is_reachable() {
                self.set_ty(n, LatticeValue::Top);
                return;
            }
        }

        match kind {
            OpKind::Block { labelled } => self.compute_block(n, labelled),
            OpKind::Bad => self.set_ty(n, LatticeValue::Top),
            OpKind::Unknown => {
                let ty = if self.config.unknown_as_top {
                    LatticeValue::Top
                } else {
                    LatticeValue::Bottom
                };
                self.set_ty(n, ty);
            }
            OpKind::Jmp => {
                let block = self.graph.block_of(n);
                let ty = self.ty(block);
                self.set_ty(n, ty);
            }
            OpKind::Return | OpKind::End => self.set_ty(n, LatticeValue::Reachable),
            OpKind::Call => self.set_ty(n, LatticeValue::Bottom),
            OpKind::Phi => self.compute_phi(n),
            OpKind::Add => self.compute_add(n),
            OpKind::Sub => self.compute_sub(n),
            OpKind::Eor => self.compute_eor(n),
            OpKind::Mul => self.compute_mul(n),
            OpKind::And => self.compute_and(n),
            OpKind::Or => self.compute_or(n),
            OpKind::Shl | OpKind::Shr | OpKind::Shrs | OpKind::Rotl => self.compute_shift(n),
            OpKind::Cmp { relation } => self.compute_cmp(n, relation),
            OpKind::SymConst { kind } => self.compute_symconst(n, kind),
            OpKind::Proj { num } => self.compute_proj(n, num),
            OpKind::Confirm { relation } => self.compute_confirm(n, relation),
            _ => self.default_compute(n),
        }
    }

    /// Any Top input yields Top; otherwise control is Reachable and data
    /// folds through `computed_value` or falls to Bottom.
    fn default_compute(&mut self, n: NodeId) {
        for i in 0..self.graph.arity(n) {
            let p = self.graph.ins(n)[i];
            if self.ty(p).is_top_like() {
                self.set_ty(n, LatticeValue::Top);
                return;
            }
        }
        if self.graph.mode(n) == Mode::X {
            self.set_ty(n, LatticeValue::Reachable);
        } else {
            let ty = match self.lattice_computed_value(n) {
                Some(tv) => LatticeValue::Const(tv),
                None => LatticeValue::Bottom,
            };
            self.set_ty(n, ty);
        }
    }

    /// Reachable iff it is the start block, carries a label, or has a
    /// Reachable predecessor.
    fn compute_block(&mut self, n: NodeId, labelled: bool) {
        if n == self.graph.start_block() || labelled {
            self.set_ty(n, LatticeValue::Reachable);
            return;
        }
        for i in 0..self.graph.arity(n) {
            let p = self.graph.ins(n)[i];
            if self.ty(p).is_reachable() {
                self.set_ty(n, LatticeValue::Reachable);
                return;
            }
        }
        self.set_ty(n, LatticeValue::Top);
    }

    /// The meet over the values of live inputs.
    fn compute_phi(&mut self, n: NodeId) {
        let block = self.graph.block_of(n);
        if !self.ty(block).is_reachable() {
            self.set_ty(n, LatticeValue::Top);
            return;
        }
        let mut ty = LatticeValue::Top;
        for i in 0..self.graph.arity(n) {
            let pred_x = self.graph.get_in(block, i as i32);
            if !self.ty(pred_x).is_reachable() {
                // value flowing in over dead control does not count
                continue;
            }
            let pv = self.ty(self.graph.ins(n)[i]);
            if pv.is_top_like() {
                continue;
            }
            if pv == LatticeValue::Bottom {
                self.set_ty(n, LatticeValue::Bottom);
                return;
            }
            if ty == LatticeValue::Top {
                ty = pv;
            } else if ty != pv {
                self.set_ty(n, LatticeValue::Bottom);
                return;
            }
        }
        self.set_ty(n, ty);
    }

    fn binop_tys(&self, n: NodeId) -> (LatticeValue, LatticeValue) {
        let ins = self.graph.ins(n);
        (self.ty(ins[0]), self.ty(ins[1]))
    }

    fn compute_add(&mut self, n: NodeId) {
        let (a, b) = self.binop_tys(n);
        let ty = if a.is_top_like() || b.is_top_like() {
            LatticeValue::Top
        } else if a == LatticeValue::Bottom || b == LatticeValue::Bottom {
            LatticeValue::Bottom
        } else {
            // fold first: float +0 + -0 must go through the arithmetic
            match (a.tarval(), b.tarval()) {
                (Some(ta), Some(tb)) => LatticeValue::Const(ta.add(tb)),
                (Some(ta), None) if ta.is_null() => b,
                (None, Some(tb)) if tb.is_null() => a,
                _ => LatticeValue::Bottom,
            }
        };
        self.set_ty(n, ty);
    }

    fn compute_sub(&mut self, n: NodeId) {
        let (a, b) = self.binop_tys(n);
        let ins = self.graph.ins(n);
        let (l, r) = (ins[0], ins[1]);
        let ty = if a.is_top_like() || b.is_top_like() {
            LatticeValue::Top
        } else if a.is_constant_like() && b.is_constant_like() {
            match (a.tarval(), b.tarval()) {
                (Some(ta), Some(tb)) => LatticeValue::Const(ta.sub(tb)),
                (None, Some(tb)) if tb.is_null() => a,
                _ => LatticeValue::Bottom,
            }
        } else if self.part_of(l) == self.part_of(r) && !self.graph.mode(l).is_float() {
            self.latched_zero_result(n)
        } else {
            LatticeValue::Bottom
        };
        self.set_ty(n, ty);
    }

    fn compute_eor(&mut self, n: NodeId) {
        let (a, b) = self.binop_tys(n);
        let ins = self.graph.ins(n);
        let (l, r) = (ins[0], ins[1]);
        let ty = if a.is_top_like() || b.is_top_like() {
            LatticeValue::Top
        } else if a.is_constant_like() && b.is_constant_like() {
            match (a.tarval(), b.tarval()) {
                (Some(ta), Some(tb)) => LatticeValue::Const(ta.eor(tb)),
                (Some(ta), None) if ta.is_null() => b,
                (None, Some(tb)) if tb.is_null() => a,
                _ => LatticeValue::Bottom,
            }
        } else if self.part_of(l) == self.part_of(r) {
            self.latched_zero_result(n)
        } else {
            LatticeValue::Bottom
        };
        self.set_ty(n, ty);
    }

    fn compute_cmp(&mut self, n: NodeId, relation: Relation) {
        let (a, b) = self.binop_tys(n);
        let ins = self.graph.ins(n);
        let (l, r) = (ins[0], ins[1]);
        if a.is_top_like() || b.is_top_like() {
            self.set_ty(n, LatticeValue::Top);
        } else if a.is_constant_like() && b.is_constant_like() {
            self.default_compute(n);
        } else if self.part_of(l) == self.part_of(r) && !self.graph.mode(l).is_float() {
            // NaN != NaN keeps floats out of the congruence shortcut
            let claimed = Tarval::bool_val(relation.holds_for_equal());
            let ty = self.guarded_identity_result(n, claimed);
            self.set_ty(n, ty);
        } else {
            self.set_ty(n, LatticeValue::Bottom);
        }
    }

    /// `x - x = 0` by congruence, but only as a latch: every node starts
    /// out congruent to everything, so claiming 0 from Top would freeze a
    /// speculative constant that also blocks the follower demotion of
    /// `Sub(x, 0)`. The zero survives only when constant evaluation
    /// already produced it.
    fn latched_zero_result(&self, n: NodeId) -> LatticeValue {
        let zero = LatticeValue::Const(Tarval::null(self.graph.mode(n)));
        if self.ty(n) == zero {
            zero
        } else {
            LatticeValue::Bottom
        }
    }

    /// The congruence-based boolean for Cmp. The claim stands unless the
    /// node already fell to Bottom or held the opposite constant; unlike
    /// Sub/Eor there is no follower identity a speculative constant could
    /// block.
    fn guarded_identity_result(&self, n: NodeId, claimed: Tarval) -> LatticeValue {
        let cur = self.ty(n);
        let claimed = LatticeValue::Const(claimed);
        if cur == LatticeValue::Bottom || (cur.is_constant_like() && cur != claimed) {
            LatticeValue::Bottom
        } else {
            claimed
        }
    }

    fn compute_mul(&mut self, n: NodeId) {
        let (a, b) = self.binop_tys(n);
        let ty = if a.is_top_like() || b.is_top_like() {
            LatticeValue::Top
        } else if a == LatticeValue::Bottom || b == LatticeValue::Bottom {
            LatticeValue::Bottom
        } else {
            match (a.tarval(), b.tarval()) {
                (Some(ta), Some(tb)) => LatticeValue::Const(ta.mul(tb)),
                (Some(ta), None) if ta.is_one() => b,
                (None, Some(tb)) if tb.is_one() => a,
                _ => LatticeValue::Bottom,
            }
        };
        self.set_ty(n, ty);
    }

    fn compute_and(&mut self, n: NodeId) {
        let (a, b) = self.binop_tys(n);
        let ty = if a.is_top_like() || b.is_top_like() {
            LatticeValue::Top
        } else if a == LatticeValue::Bottom || b == LatticeValue::Bottom {
            LatticeValue::Bottom
        } else {
            match (a.tarval(), b.tarval()) {
                (Some(ta), Some(tb)) => LatticeValue::Const(ta.and(tb)),
                (Some(ta), None) if ta.is_all_one() => b,
                (None, Some(tb)) if tb.is_all_one() => a,
                _ => LatticeValue::Bottom,
            }
        };
        self.set_ty(n, ty);
    }

    fn compute_or(&mut self, n: NodeId) {
        let (a, b) = self.binop_tys(n);
        let ty = if a.is_top_like() || b.is_top_like() {
            LatticeValue::Top
        } else if a == LatticeValue::Bottom || b == LatticeValue::Bottom {
            LatticeValue::Bottom
        } else {
            match (a.tarval(), b.tarval()) {
                (Some(ta), Some(tb)) => LatticeValue::Const(ta.or(tb)),
                (Some(ta), None) if ta.is_null() => b,
                (None, Some(tb)) if tb.is_null() => a,
                _ => LatticeValue::Bottom,
            }
        };
        self.set_ty(n, ty);
    }

    /// Shared by Shl/Shr/Shrs/Rotl: fold, or shift-by-zero passthrough.
    fn compute_shift(&mut self, n: NodeId) {
        let (a, b) = self.binop_tys(n);
        let ty = if a.is_top_like() || b.is_top_like() {
            LatticeValue::Top
        } else if a == LatticeValue::Bottom || b == LatticeValue::Bottom {
            LatticeValue::Bottom
        } else {
            match (a.tarval(), b.tarval()) {
                (Some(_), Some(_)) => match self.lattice_computed_value(n) {
                    Some(tv) => LatticeValue::Const(tv),
                    None => LatticeValue::Bottom,
                },
                (None, Some(tb)) if tb.is_null() => a,
                _ => LatticeValue::Bottom,
            }
        };
        self.set_ty(n, ty);
    }

    fn compute_symconst(&mut self, n: NodeId, kind: SymConstKind) {
        let block = self.graph.block_of(n);
        if !self.ty(block).is_reachable() {
            self.set_ty(n, LatticeValue::Top);
            return;
        }
        let ty = match kind {
            SymConstKind::Address(e) => LatticeValue::Address(e),
            SymConstKind::Size(e) => LatticeValue::Const(Tarval::new(
                self.graph.mode(n),
                self.graph.entity(e).size as i64,
            )),
            SymConstKind::Align(e) => LatticeValue::Const(Tarval::new(
                self.graph.mode(n),
                self.graph.entity(e).align as i64,
            )),
        };
        self.set_ty(n, ty);
    }

    fn compute_proj(&mut self, n: NodeId, num: u32) {
        let pred = self.graph.ins(n)[0];
        let block = self.graph.block_of(self.graph.skip_proj(n));
        if !self.ty(block).is_reachable() {
            // a projection in an unreachable block stays Top
            self.set_ty(n, LatticeValue::Top);
            return;
        }
        let pred_is_branch = matches!(self.graph.kind(pred), OpKind::Cond | OpKind::Switch { .. });
        if self.ty(pred).is_top_like() && !pred_is_branch {
            self.set_ty(n, LatticeValue::Top);
            return;
        }
        match self.graph.mode(n) {
            Mode::M => self.set_ty(n, LatticeValue::Bottom),
            Mode::X => match self.graph.kind(pred).clone() {
                OpKind::Start => self.set_ty(n, LatticeValue::Reachable),
                OpKind::Cond => self.compute_proj_cond(n, pred, num),
                OpKind::Switch { table } => {
                    let sel = self.graph.ins(pred)[0];
                    self.compute_proj_switch(n, sel, &table, num)
                }
                _ => self.default_compute(n),
            },
            _ => self.default_compute(n),
        }
    }

    /// Control projections are evaluated only after the data queue drained,
    /// so the selector has settled as far as it will; and once a side is
    /// Reachable it stays Reachable, because a selector may still fall from
    /// a constant to Bottom afterwards.
    fn compute_proj_cond(&mut self, n: NodeId, cond: NodeId, num: u32) {
        if self.ty(n).is_reachable() {
            return;
        }
        let sel = self.graph.ins(cond)[0];
        let selt = self.ty(sel);
        let on_true_side = num == PN_COND_TRUE;

        let ty = match selt {
            LatticeValue::Const(tv) if tv.is_true() => {
                if on_true_side {
                    LatticeValue::Reachable
                } else {
                    LatticeValue::Unreachable
                }
            }
            LatticeValue::Const(tv) if tv.is_false() => {
                if on_true_side {
                    LatticeValue::Unreachable
                } else {
                    LatticeValue::Reachable
                }
            }
            LatticeValue::Bottom => LatticeValue::Reachable,
            _ => {
                // selector still Top: the false exit is the canonical side
                if !on_true_side && self.config.unknown_as_top {
                    LatticeValue::Reachable
                } else {
                    LatticeValue::Unreachable
                }
            }
        };
        self.set_ty(n, ty);
    }

    fn compute_proj_switch(
        &mut self,
        n: NodeId,
        sel: NodeId,
        table: &crate::ir::SwitchTable,
        num: u32,
    ) {
        if self.ty(n).is_reachable() {
            return;
        }
        let ty = match self.ty(sel) {
            LatticeValue::Bottom => LatticeValue::Reachable,
            LatticeValue::Const(tv) => {
                if table.lookup(tv.as_long()) == num {
                    LatticeValue::Reachable
                } else {
                    LatticeValue::Unreachable
                }
            }
            _ => {
                // selector still Top: only the default exit may survive
                if self.config.unknown_as_top && num == PN_SWITCH_DEFAULT {
                    LatticeValue::Reachable
                } else {
                    LatticeValue::Unreachable
                }
            }
        };
        self.set_ty(n, ty);
    }

    /// An equality Confirm against a constant bound takes the bound's
    /// value, otherwise a Confirm is a copy.
    fn compute_confirm(&mut self, n: NodeId, relation: Relation) {
        let ins = self.graph.ins(n);
        let (value, bound) = (ins[0], ins[1]);
        if relation == Relation::Eq {
            let bty = self.ty(bound);
            if bty.is_constant_like() {
                self.set_ty(n, bty);
                return;
            }
        }
        let vty = self.ty(value);
        self.set_ty(n, vty);
    }

    pub(super) fn verify_transition(&self, old: LatticeValue, new: LatticeValue, n: NodeId) {
        if self.config.verify_monotone && !LatticeValue::transition_ok(old, new) {
            panic!("non-monotone lattice transition {old} -> {new} on {n}");
        }
    }

    // ---- algebraic identities ----------------------------------------

    /// The node a follower is algebraically equal to, or the node itself.
    ///
    /// This is deliberately not the classical local value-numbering helper:
    /// the result must be one of the node's own data inputs, because the
    /// partition machinery traces follower edges along def-use chains.
    pub(super) fn identity(&self, n: NodeId) -> NodeId {
        match self.graph.kind(n) {
            OpKind::Phi => self.identity_phi(n),
            OpKind::Mul => self.identity_by_neutral(n, Tarval::one(self.graph.mode(n)), true),
            OpKind::Add | OpKind::Or | OpKind::Eor => {
                self.identity_by_neutral(n, Tarval::null(self.graph.mode(n)), true)
            }
            OpKind::And => self.identity_by_neutral(n, Tarval::all_one(self.graph.mode(n)), false),
            OpKind::Shl | OpKind::Shr | OpKind::Shrs | OpKind::Rotl => self.identity_shift(n),
            OpKind::Sub => self.identity_sub(n),
            OpKind::Confirm { .. } => self.graph.ins(n)[0],
            OpKind::Mux => self.identity_mux(n),
            _ => n,
        }
    }

    /// A Phi whose live inputs all sit in one partition merges nothing.
    fn identity_phi(&self, n: NodeId) -> NodeId {
        let block = self.graph.block_of(n);
        let mut found: Option<NodeId> = None;
        for i in 0..self.graph.arity(n) {
            let pred_x = self.graph.get_in(block, i as i32);
            if !self.ty(pred_x).is_reachable() {
                continue;
            }
            let pred = self.graph.ins(n)[i];
            match found {
                None => found = Some(pred),
                Some(f) => {
                    if self.part_of(f) != self.part_of(pred) {
                        return n;
                    }
                }
            }
        }
        // a Phi with no live input computes Top and sits in the Top
        // partition, where nobody asks for its identity
        found.expect("follower Phi has a live input")
    }

    /// `op(x, e) = x` for a neutral element `e`; commutative ops also
    /// accept the mirrored form.
    fn identity_by_neutral(&self, n: NodeId, neutral: Tarval, fp_guard: bool) -> NodeId {
        let mode = self.graph.mode(n);
        if fp_guard && mode.is_float() && self.graph.strict_fp {
            return n;
        }
        let ins = self.graph.ins(n);
        let neutral = LatticeValue::Const(neutral);
        if self.graph.kind(n).is_commutative() && self.ty(ins[0]) == neutral {
            return ins[1];
        }
        if self.ty(ins[1]) == neutral {
            return ins[0];
        }
        n
    }

    /// `x << 0 = x`; the shift amount has its own mode.
    fn identity_shift(&self, n: NodeId) -> NodeId {
        let ins = self.graph.ins(n);
        let amount_mode = self.graph.mode(ins[1]);
        if self.ty(ins[1]) == LatticeValue::Const(Tarval::null(amount_mode)) {
            return ins[0];
        }
        n
    }

    fn identity_sub(&self, n: NodeId) -> NodeId {
        let mode = self.graph.mode(n);
        if mode.is_float() && self.graph.strict_fp {
            return n;
        }
        let ins = self.graph.ins(n);
        if self.ty(ins[1]) == LatticeValue::Const(Tarval::null(mode)) {
            return ins[0];
        }
        n
    }

    /// A Mux with congruent branches selects nothing. The one-input form
    /// over a constant selector is not recognized here; a constant selector
    /// folds the Mux through `computed_value` instead.
    fn identity_mux(&self, n: NodeId) -> NodeId {
        let ins = self.graph.ins(n);
        let (f, t) = (ins[1], ins[2]);
        if self.part_of(t) == self.part_of(f) {
            return t;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_rules() {
        use LatticeValue::*;
        let c1 = Const(Tarval::new(Mode::I32, 1));
        let c2 = Const(Tarval::new(Mode::I32, 2));
        assert!(LatticeValue::transition_ok(Top, c1));
        assert!(LatticeValue::transition_ok(c1, c1));
        assert!(LatticeValue::transition_ok(c1, Bottom));
        assert!(LatticeValue::transition_ok(Unreachable, Reachable));
        assert!(LatticeValue::transition_ok(Top, Unreachable));
        assert!(!LatticeValue::transition_ok(c1, c2));
        assert!(!LatticeValue::transition_ok(Bottom, c1));
        assert!(!LatticeValue::transition_ok(Reachable, Unreachable));
    }

    #[test]
    fn test_constant_like() {
        use LatticeValue::*;
        assert!(Const(Tarval::b_true()).is_constant_like());
        assert!(Address(EntityId(0)).is_constant_like());
        assert!(Reachable.is_constant_like());
        assert!(!Top.is_constant_like());
        assert!(!Unreachable.is_constant_like());
        assert!(!Bottom.is_constant_like());
        assert!(Bottom.is_splittable());
    }
}
