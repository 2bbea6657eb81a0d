//! The fixed-point solver
//!
//! Two worklists cooperate: partitions with pending retypings drain through
//! `propagate`, partitions pending structural refinement drain through
//! `cause_splits`. Constant propagation always drains completely before the
//! splitting worklist is consulted, and within one partition the data queue
//! drains before the Cond/Switch queue, so selectors settle before their
//! control projections are decided.

use super::partition::{fifo_pop, fifo_push, list_push_tail, list_remove};
use super::{Ctx, PartId};
use crate::ir::node::OpKind;
use crate::ir::{Mode, NodeId};

impl Ctx<'_> {
    pub(super) fn add_to_worklist(&mut self, p: PartId) {
        debug_assert!(!self.part(p).on_worklist);
        log::trace!("part{} goes on the split worklist", self.part(p).nr);
        self.part_mut(p).wl_next = self.worklist;
        self.part_mut(p).on_worklist = true;
        self.worklist = Some(p);
    }

    pub(super) fn add_partition_to_cprop(&mut self, p: PartId) {
        if !self.part(p).on_cprop {
            self.part_mut(p).cprop_next = self.cprop;
            self.part_mut(p).on_cprop = true;
            self.cprop = Some(p);
        }
    }

    /// Schedule a node for retyping. Cond/Switch nodes and their
    /// projections go on the separate control queue; tuple values pull
    /// their projections along and blocks pull their Phis, since both
    /// depend on state their own inputs do not express.
    pub(super) fn add_to_cprop(&mut self, y: NodeId) {
        if !self.info(y).on_cprop {
            let p = self.part_of(y);
            let skipped = self.graph.skip_proj(y);
            let control = matches!(
                self.graph.kind(skipped),
                OpKind::Cond | OpKind::Switch { .. }
            );
            {
                let (infos, parts) = (&mut self.infos, &mut self.parts);
                let part = &mut parts[p.index()];
                if control {
                    fifo_push(infos, &mut part.cprop_x, y);
                } else {
                    fifo_push(infos, &mut part.cprop, y);
                }
            }
            self.info_mut(y).on_cprop = true;
            log::trace!("add {y} to part{}.cprop", self.part(p).nr);
            self.add_partition_to_cprop(p);
        }

        if self.graph.mode(y) == Mode::T {
            for i in (0..self.graph.outs(y).len()).rev() {
                let user = self.graph.outs(y)[i].user;
                self.add_to_cprop(user);
            }
        } else if self.graph.kind(y).is_block() {
            let mut phi = self.info(y).phi_list;
            while let Some(p) = phi {
                self.add_to_cprop(p);
                phi = self.info(p).phi_next;
            }
        }
    }

    fn add_to_touched(&mut self, y: NodeId) {
        if self.info(y).on_touched {
            return;
        }
        let p = self.part_of(y);
        self.info_mut(y).next = self.part(p).touched;
        self.part_mut(p).touched = Some(y);
        self.info_mut(y).on_touched = true;
        self.part_mut(p).n_touched += 1;
        if !self.part(p).on_touched {
            self.part_mut(p).touched_next = self.touched;
            self.part_mut(p).on_touched = true;
            self.touched = Some(p);
        }
    }

    fn is_live_input(&self, phi: NodeId, i: i32) -> bool {
        if i < 0 {
            return true;
        }
        let block = self.graph.block_of(phi);
        self.ty(self.graph.get_in(block, i)).is_reachable()
    }

    /// Gather the users at input position `idx` of every node on `list`
    /// into the touched sets of their partitions.
    fn collect_touched(&mut self, list: Option<NodeId>, idx: i32) {
        let mut cur = list;
        while let Some(x) = cur {
            let next_in_list = self.info(x).list_next;

            if idx == -1 {
                // leader edges start after the follower prefix
                let nf = self.info(x).n_followers;
                self.info_mut(x).next_edge = nf;
            }
            let num_edges = self.graph.outs(x).len();

            while self.info(x).next_edge < num_edges {
                let edge = self.graph.outs(x)[self.info(x).next_edge];
                if edge.pos > idx {
                    break;
                }
                self.info_mut(x).next_edge += 1;
                let succ = edge.user;

                // commutative users are handled by the normalized collector
                if self.config.commutative
                    && (idx == 0 || idx == 1)
                    && self.graph.kind(succ).is_commutative()
                {
                    continue;
                }
                if idx < self.end_idx && !self.graph.is_pinned(succ) {
                    continue;
                }
                debug_assert_eq!(self.graph.get_in(succ, idx), x);
                if idx == -1 && self.info(succ).is_follower {
                    continue;
                }

                let sty = self.ty(succ);
                if sty.is_constant_like() {
                    // re-check identity-rule results when operand
                    // partitions move
                    if matches!(self.graph.kind(succ), OpKind::Sub | OpKind::Cmp { .. }) {
                        self.add_to_cprop(succ);
                    }
                }
                // partitions of constants are never split by inputs
                if sty.is_splittable()
                    && (!matches!(self.graph.kind(succ), OpKind::Phi)
                        || self.is_live_input(succ, idx))
                {
                    self.add_to_touched(succ);
                }
            }
            cur = next_in_list;
        }
    }

    /// Commutative users are touched once with normalized operands instead
    /// of once per input position.
    fn collect_commutative_touched(&mut self, list: Option<NodeId>) {
        let mut cur = list;
        while let Some(x) = cur {
            let next_in_list = self.info(x).list_next;

            let nf = self.info(x).n_followers;
            self.info_mut(x).next_edge = nf;
            let num_edges = self.graph.outs(x).len();

            while self.info(x).next_edge < num_edges {
                let edge = self.graph.outs(x)[self.info(x).next_edge];
                if edge.pos > 1 {
                    break;
                }
                self.info_mut(x).next_edge += 1;
                if edge.pos < 0 {
                    continue;
                }
                let succ = edge.user;
                if !self.graph.kind(succ).is_commutative() {
                    continue;
                }

                let sty = self.ty(succ);
                if sty.is_constant_like() {
                    if matches!(self.graph.kind(succ), OpKind::Eor) {
                        self.add_to_cprop(succ);
                    }
                }
                if sty.is_splittable() {
                    self.add_to_touched(succ);
                }
            }
            cur = next_in_list;
        }
    }

    /// Drain the constant-propagation worklist completely.
    pub(super) fn propagate(&mut self) {
        while let Some(x) = self.cprop {
            self.cprop = self.part(x).cprop_next;
            self.part_mut(x).on_cprop = false;

            let old_type_was_t_or_c = self.part(x).type_is_t_or_c;
            log::trace!("propagate types on part{}", self.part(x).nr);

            let mut fallen: Option<NodeId> = None;
            let mut oldopcode: Option<u32> = None;

            loop {
                let popped = {
                    let (infos, parts) = (&mut self.infos, &mut self.parts);
                    let part = &mut parts[x.index()];
                    // the control queue waits until the data queue is dry
                    match fifo_pop(infos, &mut part.cprop) {
                        Some(n) => Some(n),
                        None => fifo_pop(infos, &mut part.cprop_x),
                    }
                };
                let Some(n) = popped else { break };
                self.info_mut(n).on_cprop = false;

                if self.info(n).is_follower && self.identity(n) == n {
                    // identity gone: promote; a changed opcode class must
                    // fall out of the partition
                    if oldopcode.is_none() {
                        let first = self.first_leader(x);
                        oldopcode = Some(self.opcode_id(first));
                    }
                    let own = self.opcode_id(n);
                    if oldopcode != Some(own) && !self.info(n).on_fallen {
                        self.info_mut(n).next = fallen;
                        self.info_mut(n).on_fallen = true;
                        fallen = Some(n);
                    }
                    self.follower_to_leader(n);
                    // a promoted Phi needs the input split re-run; dead
                    // block predecessors may already have caused it once
                    if matches!(self.graph.kind(n), OpKind::Phi) {
                        let p = self.part_of(n);
                        if !self.part(p).on_worklist {
                            self.add_to_worklist(p);
                        }
                    }
                }

                let old = self.ty(n);
                self.compute(n);
                let new = self.ty(n);
                if new != old {
                    log::trace!("{n}: {old} -> {new}");
                    self.verify_transition(old, new, n);
                    // nodes may fall Top -> constant -> Bottom, so they can
                    // already be on the fallen list
                    if !self.info(n).on_fallen {
                        self.info_mut(n).next = fallen;
                        self.info_mut(n).on_fallen = true;
                        fallen = Some(n);
                    }
                    for i in (0..self.graph.outs(n).len()).rev() {
                        let user = self.graph.outs(n)[i].user;
                        self.add_to_cprop(user);
                    }
                }
            }

            // a node may sit on this queue although a split already moved
            // it elsewhere; only the nodes still in x can split off here,
            // foreign ones re-derive their partition in an own cprop round
            let mut fallen_vec = Vec::new();
            let mut cur = fallen;
            while let Some(n) = cur {
                fallen_vec.push(n);
                self.info_mut(n).on_fallen = false;
                cur = self.info(n).next;
            }
            let mut in_x: Option<NodeId> = None;
            let mut n_in_x = 0usize;
            for &n in fallen_vec.iter().rev() {
                if self.part_of(n) == x {
                    self.info_mut(n).next = in_x;
                    in_x = Some(n);
                    n_in_x += 1;
                } else {
                    let p = self.part_of(n);
                    self.add_partition_to_cprop(p);
                }
            }

            let y = if n_in_x > 0 && n_in_x != self.part(x).n_leader {
                log::debug!("split part{} by fallen", self.part(x).nr);
                let mut xv = x;
                let fallen_part = self.split(&mut xv, in_x);
                // the moved nodes changed type; re-derive the tag later
                self.part_mut(fallen_part).type_is_t_or_c = false;
                fallen_part
            } else {
                x
            };

            if old_type_was_t_or_c {
                // falling out of the all-constant world may expose
                // leader -> follower transitions
                let mut cur = self.part(y).leader.first;
                while let Some(n) = cur {
                    let next = self.info(n).list_next;
                    if self.ty(n).is_splittable() {
                        let eq = self.identity(n);
                        if eq != n && self.part_of(eq) == self.part_of(n) {
                            log::trace!("{n} becomes a follower of {eq}");
                            self.info_mut(n).is_follower = true;
                            let p = self.part_of(n);
                            let (infos, parts) = (&mut self.infos, &mut self.parts);
                            list_remove(infos, &mut parts[p.index()].leader, n);
                            list_push_tail(infos, &mut parts[p.index()].follower, n);
                            parts[p.index()].n_leader -= 1;
                            self.segregate_def_use_chain(n);
                        }
                    }
                    cur = next;
                }
            }
            self.split_by(y);
        }
    }

    /// Pop one partition from the splitting worklist and split every
    /// partition its members feed, by each input position in turn.
    pub(super) fn cause_splits(&mut self) {
        let Some(x) = self.worklist else { return };
        self.worklist = self.part(x).wl_next;
        self.part_mut(x).on_worklist = false;
        log::trace!("cause splits from part{}", self.part(x).nr);

        if self.config.commutative {
            self.touched = None;
            let leaders = self.part(x).leader.first;
            self.collect_commutative_touched(leaders);
            let followers = self.part(x).follower.first;
            self.collect_commutative_touched(followers);

            let mut z_iter = self.touched;
            self.touched = None;
            while let Some(z) = z_iter {
                z_iter = self.part(z).touched_next;
                self.part_mut(z).on_touched = false;
                let touched = self.part(z).touched;
                self.part_mut(z).touched = None;
                let n_touched = self.part(z).n_touched;
                self.part_mut(z).n_touched = 0;

                // op(a,a) is not congruent to op(a,b): bifurcate first
                let mut aa: Option<NodeId> = None;
                let mut n_aa = 0usize;
                let mut ab: Option<NodeId> = None;
                let mut n_ab = 0usize;
                let mut e = touched;
                while let Some(node) = e {
                    let next = self.info(node).next;
                    debug_assert!(!self.info(node).is_follower);
                    self.info_mut(node).on_touched = false;
                    let ins = self.graph.ins(node);
                    let same = self.part_of(ins[0]) == self.part_of(ins[1]);
                    if same {
                        self.info_mut(node).next = aa;
                        aa = Some(node);
                        n_aa += 1;
                    } else {
                        self.info_mut(node).next = ab;
                        ab = Some(node);
                        n_ab += 1;
                    }
                    e = next;
                }
                debug_assert_eq!(n_aa + n_ab, n_touched);

                // the first split may move the other chain along with it,
                // so each split targets the chain's current partition
                if let Some(head) = aa {
                    let zp = self.part_of(head);
                    if n_aa < self.part(zp).n_leader {
                        let mut t = zp;
                        self.split(&mut t, aa);
                    }
                }
                if let Some(head) = ab {
                    let zp = self.part_of(head);
                    if n_ab < self.part(zp).n_leader {
                        let mut t = zp;
                        self.split(&mut t, ab);
                    }
                }
            }
        }

        let mut idx = -1;
        while idx <= self.part(x).max_user_inputs {
            self.touched = None;
            let leaders = self.part(x).leader.first;
            self.collect_touched(leaders, idx);
            let followers = self.part(x).follower.first;
            self.collect_touched(followers, idx);

            let mut z_iter = self.touched;
            self.touched = None;
            while let Some(z) = z_iter {
                z_iter = self.part(z).touched_next;
                self.part_mut(z).on_touched = false;
                let touched = self.part(z).touched;
                self.part_mut(z).touched = None;
                let n_touched = self.part(z).n_touched;
                self.part_mut(z).n_touched = 0;
                debug_assert!(touched.is_some());

                let mut e = touched;
                while let Some(node) = e {
                    debug_assert!(!self.info(node).is_follower);
                    self.info_mut(node).on_touched = false;
                    e = self.info(node).next;
                }

                if n_touched > 0 && n_touched < self.part(z).n_leader {
                    log::debug!("split part{} by touched", self.part(z).nr);
                    let mut t = z;
                    self.split(&mut t, touched);
                }
            }
            idx += 1;
        }
    }
}
