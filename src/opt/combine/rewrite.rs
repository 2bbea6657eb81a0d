//! Applying the fixed point
//!
//! Four phases: collect memory values whose users all died (they must stay
//! alive through End), rewrite control flow per block, clean the keep-alive
//! list so the node walk does not wander into dead regions, then rewrite
//! every remaining node: constants materialize, congruent nodes collapse
//! onto their partition leader, decided branches turn into plain jumps.

use super::lattice::LatticeValue;
use super::Ctx;
use crate::ir::node::OpKind;
use crate::ir::{Mode, NodeId, SymConstKind, Tarval};
use rustc_hash::FxHashSet;

impl Ctx<'_> {
    /// Run all rewrite phases; leaves `self.modified` set accordingly.
    pub(super) fn apply(&mut self) {
        self.find_kept_memory();

        let mut blocks = Vec::new();
        self.graph.walk_blocks(|b| blocks.push(b));
        for &b in &blocks {
            if !self.graph.is_dead(b) {
                self.apply_cf(b);
            }
        }

        // drop keep-alives of dead regions before walking nodes, so the
        // walk below stays inside the live graph
        self.apply_end();

        let order = self.graph.reachable_nodes();
        for &n in &order {
            if n.index() < self.n_orig && !self.graph.is_dead(n) {
                self.apply_node(n);
            }
        }

        self.add_memory_keeps();
    }

    // ---- fresh nodes, hash-consed per pass ---------------------------

    fn make_const(&mut self, tv: Tarval) -> NodeId {
        if let Some(&c) = self.const_cache.get(&tv) {
            return c;
        }
        let c = self.graph.new_const(tv);
        self.const_cache.insert(tv, c);
        c
    }

    fn make_symconst(&mut self, mode: Mode, kind: SymConstKind) -> NodeId {
        if let Some(&c) = self.symconst_cache.get(&(mode, kind)) {
            return c;
        }
        let c = self.graph.new_symconst(mode, kind);
        self.symconst_cache.insert((mode, kind), c);
        c
    }

    fn make_bad(&mut self, mode: Mode) -> NodeId {
        if let Some(&b) = self.bad_cache.get(&mode) {
            return b;
        }
        let b = self.graph.new_bad(mode);
        self.bad_cache.insert(mode, b);
        b
    }

    fn make_unknown(&mut self, mode: Mode) -> NodeId {
        if let Some(&u) = self.unknown_cache.get(&mode) {
            return u;
        }
        let u = self.graph.new_unknown(mode);
        self.unknown_cache.insert(mode, u);
        u
    }

    /// Exchange against a leader, inserting a conversion when the modes
    /// disagree (a pointer Add collapsing onto its integer operand).
    fn exchange_leader(&mut self, old: NodeId, new: NodeId) {
        let old_mode = self.graph.mode(old);
        let new = if old_mode != self.graph.mode(new) {
            let block = self.graph.block_of(new);
            self.graph.new_conv(block, new, old_mode)
        } else {
            new
        };
        self.graph.exchange(old, new);
        self.modified = true;
    }

    // ---- memory keeps ------------------------------------------------

    /// A live memory value whose users are all unreachable or Top would
    /// silently lose its side effect; such values go on the keep-alive
    /// list.
    fn find_kept_memory(&mut self) {
        let mut mem_nodes = Vec::new();
        self.graph.walk(|_| {}, |n| mem_nodes.push(n));
        for n in mem_nodes {
            if self.graph.mode(n) != Mode::M {
                continue;
            }
            let block = self.graph.block_of(n);
            if !self.ty(block).is_reachable() {
                continue;
            }
            if self.ty(n).is_top_like() {
                continue;
            }
            if self.all_users_are_dead(n) {
                log::debug!("{n} carries a side effect with no live user, keeping");
                self.kept_memory.push(n);
            }
        }
    }

    fn all_users_are_dead(&self, n: NodeId) -> bool {
        for e in self.graph.outs(n) {
            let user = e.user;
            let block = if self.graph.kind(user).is_block() {
                user
            } else {
                self.graph.block_of(user)
            };
            if !self.ty(block).is_reachable() {
                continue;
            }
            if !self.ty(user).is_top_like() {
                return false;
            }
        }
        true
    }

    // ---- control flow ------------------------------------------------

    /// A predecessor block about to lose an outgoing edge may turn into an
    /// endless loop nobody refers to; keep it alive once.
    fn record_detached_pred(&mut self, pred: NodeId) {
        if self.graph.is_dead(pred) || matches!(self.graph.kind(pred), OpKind::Bad) {
            return;
        }
        let pred_block = self.graph.block_of(self.graph.skip_proj(pred));
        if self.graph.is_dead(pred_block) {
            return;
        }
        if self.info(pred_block).flagged != 0 {
            return;
        }
        self.info_mut(pred_block).flagged = 3;
        if self.ty(pred_block).is_reachable() {
            log::debug!("keeping predecessor block {pred_block} alive");
            self.graph.add_end_keepalive(pred_block);
        }
    }

    /// Is `pred` the only control exit its block takes, so that the target
    /// block can fuse with the source block?
    fn can_exchange(&self, pred: NodeId, block: NodeId) -> bool {
        if matches!(self.graph.kind(pred), OpKind::Start) {
            return false;
        }
        if matches!(self.graph.kind(block), OpKind::Block { labelled: true }) {
            return false;
        }
        match self.graph.kind(pred) {
            OpKind::Jmp => true,
            _ if self.graph.mode(pred) == Mode::T => self.only_one_reachable_proj(pred),
            _ => false,
        }
    }

    fn only_one_reachable_proj(&self, n: NodeId) -> bool {
        let mut k = 0;
        for e in self.graph.outs(n) {
            let proj = e.user;
            if self.graph.is_dead(proj) || self.graph.mode(proj) != Mode::X {
                continue;
            }
            if self.try_ty(proj) == Some(LatticeValue::Reachable) {
                k += 1;
                if k > 1 {
                    return false;
                }
            }
        }
        true
    }

    /// Apply reachability to one block: cut dead blocks loose, shorten the
    /// inputs of partially dead blocks together with their Phis, and fuse
    /// a block with its single predecessor where control cannot branch.
    fn apply_cf(&mut self, block: NodeId) {
        let n = self.graph.arity(block);

        if !self.ty(block).is_reachable() {
            if n > 0 {
                for i in 0..n {
                    let pred = self.graph.ins(block)[i];
                    self.record_detached_pred(pred);
                }
                // cut all control entries; the content dies with the block
                self.graph.set_irn_in(block, &[]);
                self.modified = true;
            }
            return;
        }

        if n == 1 {
            let pred = self.graph.skip_proj(self.graph.ins(block)[0]);
            if self.can_exchange(pred, block) {
                let new_block = self.graph.block_of(pred);
                log::debug!("fuse {block} into {new_block}");
                self.graph.exchange(block, new_block);
                self.modified = true;
            }
            return;
        }

        let mut in_x = Vec::with_capacity(n);
        for i in 0..n {
            let pred = self.graph.ins(block)[i];
            if self.ty(pred).is_reachable() {
                in_x.push(pred);
            } else {
                log::debug!("removing dead input {i} from {block}");
                self.record_detached_pred(pred);
            }
        }
        let k = in_x.len();
        if k >= n {
            return;
        }

        // shorten the Phis in the same order as the block inputs
        let mut phi_cur = self.info(block).phi_list;
        while let Some(phi) = phi_cur {
            phi_cur = self.info(phi).phi_next;
            if self.graph.is_dead(phi) {
                continue;
            }
            if let LatticeValue::Const(tv) = self.ty(phi) {
                let c = self.make_const(tv);
                log::debug!("{phi} is the constant {tv}");
                self.graph.exchange(phi, c);
                self.modified = true;
            } else {
                let mut ins = Vec::with_capacity(k);
                for i in 0..n {
                    let pred = self.graph.ins(block)[i];
                    if self.ty(pred).is_reachable() {
                        ins.push(self.graph.ins(phi)[i]);
                    }
                }
                if ins.len() == 1 {
                    log::debug!("{phi} reduced to its single live input");
                    self.graph.exchange(phi, ins[0]);
                } else {
                    self.graph.set_irn_in(phi, &ins);
                }
                self.modified = true;
            }
        }

        if k == 1 {
            let pred = self.graph.skip_proj(in_x[0]);
            if self.can_exchange(pred, block) {
                let new_block = self.graph.block_of(pred);
                log::debug!("fuse {block} into {new_block}");
                self.graph.exchange(block, new_block);
                self.modified = true;
                return;
            }
        }
        self.graph.set_irn_in(block, &in_x);
        self.modified = true;
    }

    /// Remove keep-alive edges into unreachable regions.
    fn apply_end(&mut self) {
        let mut keep = Vec::new();
        for &ka in self.graph.end_keepalives() {
            if self.graph.is_dead(ka) || matches!(self.graph.kind(ka), OpKind::Bad) {
                continue;
            }
            let block = if self.graph.kind(ka).is_block() {
                ka
            } else {
                self.graph.block_of(ka)
            };
            if self.graph.is_dead(block) {
                continue;
            }
            match self.try_ty(block) {
                Some(t) if !t.is_reachable() => {}
                _ => keep.push(ka),
            }
        }
        if keep.len() != self.graph.end_keepalives().len() {
            self.graph.set_end_keepalives(&keep);
            self.modified = true;
        }
    }

    // ---- node rewriting ----------------------------------------------

    fn apply_node(&mut self, n: NodeId) {
        match self.graph.kind(n) {
            OpKind::Block { .. } | OpKind::End | OpKind::Bad => return,
            _ => {}
        }

        let block = self.graph.block_of(n);
        if !self.ty(block).is_reachable() {
            let bad = self.make_bad(self.graph.mode(n));
            log::debug!("{n} sits in an unreachable block");
            self.graph.exchange(n, bad);
            self.modified = true;
            return;
        }

        let t = self.ty(n);
        if t == LatticeValue::Top {
            match self.graph.mode(n) {
                Mode::M => {
                    // a memory projection of a dead operation forwards the
                    // operation's incoming memory; other memory values stay
                    if matches!(self.graph.kind(n), OpKind::Proj { .. }) {
                        let pred = self.graph.ins(n)[0];
                        if self.try_ty(pred) == Some(LatticeValue::Top)
                            && matches!(self.graph.kind(pred), OpKind::Load | OpKind::Store)
                        {
                            let mem = self.graph.ins(pred)[0];
                            log::debug!("{n} skips dead memory op {pred}");
                            self.graph.exchange(n, mem);
                            self.modified = true;
                        }
                    }
                }
                Mode::T => {}
                Mode::X => {
                    debug_assert!(false, "control flow handled per block");
                }
                mode => {
                    if !matches!(self.graph.kind(n), OpKind::Unknown) {
                        let unk = self.make_unknown(mode);
                        log::debug!("{n} computes no value at all");
                        self.graph.exchange(n, unk);
                        self.modified = true;
                    }
                }
            }
            return;
        }

        if self.graph.mode(n) == Mode::X {
            if matches!(self.graph.kind(n), OpKind::Proj { .. }) {
                let pred = self.graph.ins(n)[0];
                match self.graph.kind(pred) {
                    OpKind::Cond | OpKind::Switch { .. } => {
                        if t.is_reachable() && self.only_one_reachable_proj(pred) {
                            let jmp = self.graph.new_jmp(block);
                            log::debug!("{n} is the only live exit, now a plain {jmp}");
                            self.graph.exchange(n, jmp);
                            self.modified = true;
                        } else if let OpKind::Switch { .. } = self.graph.kind(pred) {
                            let sel = self.graph.ins(pred)[0];
                            if self.ty(sel).tarval().is_some() {
                                // a constant selector with several live
                                // exits: some case was never reachable in
                                // the source
                                self.unopt_cf = true;
                            }
                        }
                    }
                    _ => {}
                }
            }
            return;
        }

        match t {
            LatticeValue::Const(tv) => {
                if !matches!(self.graph.kind(n), OpKind::Const { .. })
                    && self.graph.mode(n) != Mode::T
                {
                    let c = self.make_const(tv);
                    log::debug!("{n} is the constant {tv}");
                    self.exchange_leader(n, c);
                }
            }
            LatticeValue::Address(e) => {
                if !matches!(self.graph.kind(n), OpKind::SymConst { .. }) {
                    let mode = self.graph.mode(n);
                    let sc = self.make_symconst(mode, SymConstKind::Address(e));
                    log::debug!("{n} is the address of {e}");
                    self.exchange_leader(n, sc);
                }
            }
            _ => {
                if matches!(self.graph.kind(n), OpKind::Confirm { .. }) {
                    // Confirms are always followers of their value, but
                    // they carry range facts later passes still want
                    return;
                }
                let part = self.part_of(n);
                let leader = if self.part(part).n_leader > 1 || self.info(n).is_follower {
                    self.first_leader(part)
                } else {
                    n
                };
                if leader != n && !self.phi_would_lose_strictness(n, leader) {
                    log::debug!("{n} collapses onto its congruence leader {leader}");
                    self.exchange_leader(n, leader);
                }
            }
        }
    }

    /// Replacing `Phi(Unknown, ..., x)` by a non-Unknown leader would
    /// strengthen a non-strict program.
    fn phi_would_lose_strictness(&self, n: NodeId, leader: NodeId) -> bool {
        if !self.info(n).is_follower || !matches!(self.graph.kind(n), OpKind::Phi) {
            return false;
        }
        if matches!(self.graph.kind(leader), OpKind::Unknown) {
            return false;
        }
        self.graph
            .ins(n)
            .iter()
            .any(|&p| matches!(self.graph.kind(p), OpKind::Unknown))
    }

    /// Append the collected memory keeps, skipping what rewriting killed
    /// and what is already kept.
    fn add_memory_keeps(&mut self) {
        let mut present: FxHashSet<NodeId> = self.graph.end_keepalives().iter().copied().collect();
        let kept = std::mem::take(&mut self.kept_memory);
        for ka in kept {
            if self.graph.is_dead(ka) || present.contains(&ka) {
                continue;
            }
            self.graph.add_end_keepalive(ka);
            present.insert(ka);
        }
    }
}
