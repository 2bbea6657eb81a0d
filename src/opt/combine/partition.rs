//! The partition store
//!
//! Partitions hold their members in intrusive index-linked lists so that a
//! split moves nodes in constant time. The def-use array of every node is
//! kept sorted by input position with one twist: a prefix of
//! `n_followers` edges points at followers and is allowed to be unordered,
//! the suffix of leader edges stays sorted. The race split walks only
//! follower edges and therefore touches work proportional to the smaller
//! side.

use super::lattice::LatticeValue;
use super::{Ctx, NodeInfo, PartId};
use crate::ir::node::OpKind;
use crate::ir::{Mode, NodeId, Relation, SwitchTable, SymConstKind, Tarval};
use indexmap::IndexMap;
use std::mem::Discriminant;

/// Head of an intrusive doubly-linked member list.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ListHead {
    pub first: Option<NodeId>,
    pub last: Option<NodeId>,
}

/// Head of an intrusive FIFO (the cprop queues).
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Fifo {
    pub first: Option<NodeId>,
    pub last: Option<NodeId>,
}

pub(super) fn list_push_tail(infos: &mut [NodeInfo], head: &mut ListHead, n: NodeId) {
    infos[n.index()].list_prev = head.last;
    infos[n.index()].list_next = None;
    match head.last {
        Some(t) => infos[t.index()].list_next = Some(n),
        None => head.first = Some(n),
    }
    head.last = Some(n);
}

pub(super) fn list_push_front(infos: &mut [NodeInfo], head: &mut ListHead, n: NodeId) {
    infos[n.index()].list_prev = None;
    infos[n.index()].list_next = head.first;
    match head.first {
        Some(f) => infos[f.index()].list_prev = Some(n),
        None => head.last = Some(n),
    }
    head.first = Some(n);
}

pub(super) fn list_remove(infos: &mut [NodeInfo], head: &mut ListHead, n: NodeId) {
    let prev = infos[n.index()].list_prev;
    let next = infos[n.index()].list_next;
    match prev {
        Some(p) => infos[p.index()].list_next = next,
        None => head.first = next,
    }
    match next {
        Some(x) => infos[x.index()].list_prev = prev,
        None => head.last = prev,
    }
    infos[n.index()].list_prev = None;
    infos[n.index()].list_next = None;
}

pub(super) fn fifo_push(infos: &mut [NodeInfo], q: &mut Fifo, n: NodeId) {
    infos[n.index()].cprop_next = None;
    match q.last {
        Some(t) => infos[t.index()].cprop_next = Some(n),
        None => q.first = Some(n),
    }
    q.last = Some(n);
}

pub(super) fn fifo_pop(infos: &mut [NodeInfo], q: &mut Fifo) -> Option<NodeId> {
    let n = q.first?;
    q.first = infos[n.index()].cprop_next;
    if q.first.is_none() {
        q.last = None;
    }
    infos[n.index()].cprop_next = None;
    Some(n)
}

/// Congruence requires equal opcode, attributes, mode and arity; blocks are
/// never congruent with each other.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(super) struct OpcodeKey {
    tag: Discriminant<OpKind>,
    mode: Mode,
    arity: usize,
    attr: OpAttr,
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum OpAttr {
    None,
    Proj(u32),
    Const(Tarval),
    Sym(SymConstKind),
    Relation(Relation),
    Table(SwitchTable),
    Unique(NodeId),
}

/// Characteristic to split a partition by.
#[derive(Debug, Clone, Copy)]
pub(super) enum What {
    Type,
    Opcode,
    Input(i32),
}

/// Bucket key produced by [`What`] for one node.
#[derive(Clone, PartialEq, Eq, Hash)]
enum SplitKey {
    Type(LatticeValue),
    Opcode(u32),
    Part(PartId),
}

/// One side of the race.
struct RaceSide {
    initial: Option<NodeId>,
    unwalked: Option<NodeId>,
    walked: Option<NodeId>,
    index: usize,
    side: u8,
}

impl Ctx<'_> {
    /// Intern the opcode class of a node.
    pub(super) fn opcode_id(&mut self, n: NodeId) -> u32 {
        let kind = self.graph.kind(n);
        let attr = match kind {
            OpKind::Block { .. } => OpAttr::Unique(n),
            OpKind::Proj { num } => OpAttr::Proj(*num),
            OpKind::Const { value } => OpAttr::Const(*value),
            OpKind::SymConst { kind } => OpAttr::Sym(*kind),
            OpKind::Cmp { relation } => OpAttr::Relation(*relation),
            OpKind::Confirm { relation } => OpAttr::Relation(*relation),
            OpKind::Switch { table } => OpAttr::Table(table.clone()),
            _ => OpAttr::None,
        };
        let key = OpcodeKey {
            tag: std::mem::discriminant(kind),
            mode: self.graph.mode(n),
            arity: self.graph.arity(n),
            attr,
        };
        let next = self.opcode_ids.len() as u32;
        *self.opcode_ids.entry(key).or_insert(next)
    }

    /// Is this input a follower edge at all? Ignored inputs never carry
    /// the algebraic identity: the Confirm bound, the Mux selector, dead
    /// Phi operands, and the non-identity operand of the binops.
    fn is_real_follower(&self, user: NodeId, pos: i32) -> bool {
        match self.graph.kind(user) {
            OpKind::Confirm { .. } => pos != 1,
            OpKind::Mux => pos != 0,
            OpKind::Phi => {
                let block = self.graph.block_of(user);
                self.ty(self.graph.get_in(block, pos)).is_reachable()
            }
            OpKind::Sub | OpKind::Shr | OpKind::Shl | OpKind::Shrs | OpKind::Rotl => pos != 1,
            OpKind::Add | OpKind::Or | OpKind::Eor => {
                match self.ty(self.graph.ins(user)[pos as usize]).tarval() {
                    Some(tv) if tv.is_null() => false,
                    _ => true,
                }
            }
            OpKind::Mul => match self.ty(self.graph.ins(user)[pos as usize]).tarval() {
                Some(tv) if tv.is_one() => false,
                _ => true,
            },
            OpKind::And => match self.ty(self.graph.ins(user)[pos as usize]).tarval() {
                Some(tv) if tv.is_all_one() => false,
                _ => true,
            },
            other => {
                debug_assert!(false, "follower user with opcode {}", other.name());
                true
            }
        }
    }

    /// Turn a follower into a leader of its partition.
    pub(super) fn follower_to_leader(&mut self, n: NodeId) {
        debug_assert!(self.info(n).is_follower);
        log::trace!("{n} makes the follower -> leader transition");
        self.info_mut(n).is_follower = false;
        self.move_edges_to_leader(n);
        let p = self.part_of(n);
        let (infos, parts) = (&mut self.infos, &mut self.parts);
        list_remove(infos, &mut parts[p.index()].follower, n);
        list_push_tail(infos, &mut parts[p.index()].leader, n);
        parts[p.index()].n_leader += 1;
    }

    /// A promoted node's edges leave the follower region of each
    /// predecessor's def-use array and sort back into the leader region.
    fn move_edges_to_leader(&mut self, x: NodeId) {
        for i in (0..self.graph.arity(x)).rev() {
            let pred = self.graph.ins(x)[i];
            let nf = self.infos[pred.index()].n_followers;
            let outs = self.graph.outs_mut(pred);
            let total = outs.len();
            for j in 0..nf {
                let edge = outs[j];
                if edge.pos == i as i32 && edge.user == x {
                    let nf_new = nf - 1;
                    outs[j] = outs[nf_new];
                    let mut k = nf_new + 1;
                    while k < total {
                        if outs[k].pos >= edge.pos {
                            break;
                        }
                        outs[k - 1] = outs[k];
                        k += 1;
                    }
                    outs[k - 1] = edge;
                    self.infos[pred.index()].n_followers = nf_new;
                    break;
                }
            }
        }
    }

    /// A demoted node's edges move from the leader region into the
    /// follower prefix of each predecessor's def-use array.
    pub(super) fn segregate_def_use_chain(&mut self, follower: NodeId) {
        for i in (0..self.graph.arity(follower)).rev() {
            let pred = self.graph.ins(follower)[i];
            let nf = self.infos[pred.index()].n_followers;
            let outs = self.graph.outs_mut(pred);
            for idx in nf..outs.len() {
                if outs[idx].user == follower {
                    let edge = outs[idx];
                    let mut j = idx;
                    while j > nf {
                        outs[j] = outs[j - 1];
                        j -= 1;
                    }
                    outs[nf] = edge;
                    self.infos[pred.index()].n_followers = nf + 1;
                    break;
                }
            }
        }
    }

    /// Fast split of a partition without followers: re-bucket the chain.
    fn split_no_followers(&mut self, z: PartId, gg: Option<NodeId>) -> PartId {
        let mut n = 0;
        let mut cur = gg;
        while let Some(node) = cur {
            debug_assert_eq!(self.info(node).part, z);
            let (infos, parts) = (&mut self.infos, &mut self.parts);
            list_remove(infos, &mut parts[z.index()].leader, node);
            n += 1;
            cur = self.info(node).next;
        }
        debug_assert!(n < self.part(z).n_leader, "split would empty the partition");
        self.part_mut(z).n_leader -= n;

        let z_prime = self.new_partition();
        let mut max_input = 0;
        let mut cur = gg;
        while let Some(node) = cur {
            let (infos, parts) = (&mut self.infos, &mut self.parts);
            list_push_tail(infos, &mut parts[z_prime.index()].leader, node);
            infos[node.index()].part = z_prime;
            if infos[node.index()].max_user_input > max_input {
                max_input = infos[node.index()].max_user_input;
            }
            cur = self.info(node).next;
        }
        self.part_mut(z_prime).max_user_inputs = max_input;
        self.part_mut(z_prime).n_leader = n;
        self.part_mut(z_prime).type_is_t_or_c = self.part(z).type_is_t_or_c;

        self.check_partition(z);
        self.check_partition(z_prime);
        log::debug!(
            "split part{} -> part{} ({} node(s) moved)",
            self.part(z).nr,
            self.part(z_prime).nr,
            n
        );

        self.update_worklist(z, z_prime);
        z_prime
    }

    /// One step of a race side. Returns true when the side has exhausted
    /// its frontier and wins.
    fn race_step(&mut self, env: &mut RaceSide) -> bool {
        if let Some(n) = env.initial {
            env.initial = self.info(n).race_next;
            self.info_mut(n).race_next = env.unwalked;
            env.unwalked = Some(n);
            return false;
        }

        while let Some(n) = env.unwalked {
            while env.index < self.info(n).n_followers {
                let edge = self.graph.outs(n)[env.index];
                let m = edge.user;
                debug_assert!(self.info(m).is_follower);
                if !self.is_real_follower(m, edge.pos) {
                    env.index += 1;
                    continue;
                }
                env.index += 1;
                if self.info(m).part != self.info(n).part {
                    continue;
                }
                if self.info(m).flagged & env.side == 0 {
                    self.info_mut(m).flagged |= env.side;
                    if self.info(m).flagged != 3 {
                        // first reached: queue it behind the current head
                        let after = self.info(n).race_next;
                        self.info_mut(m).race_next = after;
                        self.info_mut(n).race_next = Some(m);
                        return false;
                    }
                    // reached from both sides; promoted after the race
                }
            }
            env.unwalked = self.info(n).race_next;
            self.info_mut(n).race_next = env.walked;
            env.walked = Some(n);
            env.index = 0;
        }
        true
    }

    /// Reset race marks; followers reached from both sides lose their
    /// congruence and become leaders.
    fn clear_flags(&mut self, chain: Option<NodeId>) -> bool {
        let mut promoted = false;
        let mut cur = chain;
        while let Some(n) = cur {
            if self.info(n).flagged == 3 {
                self.follower_to_leader(n);
                promoted = true;
            }
            self.info_mut(n).flagged = 0;
            cur = self.info(n).race_next;
        }
        promoted
    }

    /// Split the subset chained through `NodeInfo::next` out of `*x`.
    /// Returns the partition containing the subset; `*x` is left pointing
    /// at the other part.
    pub(super) fn split(&mut self, x_ref: &mut PartId, gg: Option<NodeId>) -> PartId {
        let x = *x_ref;
        debug_assert!(gg.is_some());
        if self.part(x).follower.first.is_none() {
            return self.split_no_followers(x, gg);
        }

        // race: seed side 1 with the subset, side 2 with its complement
        let mut gvec = Vec::new();
        let mut cur = gg;
        while let Some(n) = cur {
            gvec.push(n);
            cur = self.info(n).next;
        }

        let mut g: Option<NodeId> = None;
        for &n in &gvec {
            debug_assert_eq!(self.info(n).part, x);
            debug_assert!(!self.info(n).is_follower);
            let (infos, parts) = (&mut self.infos, &mut self.parts);
            list_remove(infos, &mut parts[x.index()].leader, n);
            self.info_mut(n).race_next = g;
            g = Some(n);
        }
        let mut h: Option<NodeId> = None;
        let mut cur = self.part(x).leader.first;
        while let Some(n) = cur {
            let next = self.info(n).list_next;
            self.info_mut(n).race_next = h;
            h = Some(n);
            cur = next;
        }
        for &n in gvec.iter().rev() {
            let (infos, parts) = (&mut self.infos, &mut self.parts);
            list_push_front(infos, &mut parts[x.index()].leader, n);
        }

        let mut sides = [
            RaceSide {
                initial: g,
                unwalked: None,
                walked: None,
                index: 0,
                side: 1,
            },
            RaceSide {
                initial: h,
                unwalked: None,
                walked: None,
                index: 0,
                side: 2,
            },
        ];
        let winner: usize;
        loop {
            if self.race_step(&mut sides[0]) {
                winner = 0;
                break;
            }
            if self.race_step(&mut sides[1]) {
                winner = 1;
                break;
            }
        }
        debug_assert!(sides[winner].initial.is_none());
        debug_assert!(sides[winner].unwalked.is_none());

        let shf = winner as u8;
        let mut transitions = (self.clear_flags(sides[0].unwalked) as u8) << shf;
        transitions |= (self.clear_flags(sides[0].walked) as u8) << shf;
        let shf = shf ^ 1;
        transitions |= (self.clear_flags(sides[1].unwalked) as u8) << shf;
        transitions |= (self.clear_flags(sides[1].walked) as u8) << shf;

        // only the walked nodes of the winning side move out
        let x_prime = self.new_partition();
        let mut max_input = 0;
        let mut n_leader = 0;
        let mut cur = sides[winner].walked;
        while let Some(node) = cur {
            cur = self.info(node).race_next;
            let is_f = self.info(node).is_follower;
            let (infos, parts) = (&mut self.infos, &mut self.parts);
            if is_f {
                list_remove(infos, &mut parts[x.index()].follower, node);
                list_push_tail(infos, &mut parts[x_prime.index()].follower, node);
            } else {
                list_remove(infos, &mut parts[x.index()].leader, node);
                list_push_tail(infos, &mut parts[x_prime.index()].leader, node);
                n_leader += 1;
            }
            infos[node.index()].part = x_prime;
            if infos[node.index()].max_user_input > max_input {
                max_input = infos[node.index()].max_user_input;
            }
        }
        self.part_mut(x_prime).n_leader = n_leader;
        self.part_mut(x_prime).max_user_inputs = max_input;
        self.part_mut(x).n_leader -= n_leader;
        self.part_mut(x_prime).type_is_t_or_c = self.part(x).type_is_t_or_c;

        // a follower may have lost its identity even without being
        // reached from both sides
        let mut transitions = transitions;
        let mut cur = self.part(x_prime).follower.first;
        while let Some(node) = cur {
            let next = self.info(node).list_next;
            if self.identity(node) == node {
                self.follower_to_leader(node);
                transitions |= 1;
            }
            cur = next;
        }

        self.check_partition(x);
        self.check_partition(x_prime);
        log::debug!(
            "race split part{} -> part{} ({} leader(s) moved)",
            self.part(x).nr,
            self.part(x_prime).nr,
            n_leader
        );

        // the walked side is the smaller part
        self.add_to_worklist(x_prime);

        // promoted followers must be able to split out by opcode, which
        // only happens through the cprop path
        if transitions & 1 != 0 {
            self.add_partition_to_cprop(x_prime);
        }
        if transitions & 2 != 0 {
            self.add_partition_to_cprop(x);
        }

        if winner != 0 {
            *x_ref = x_prime;
            x
        } else {
            x_prime
        }
    }

    fn update_worklist(&mut self, z: PartId, z_prime: PartId) {
        if self.part(z).on_worklist || self.part(z_prime).n_leader < self.part(z).n_leader {
            self.add_to_worklist(z_prime);
        } else {
            self.add_to_worklist(z);
        }
    }

    fn what_key(&mut self, n: NodeId, what: What) -> Option<SplitKey> {
        match what {
            What::Type => Some(SplitKey::Type(self.ty(n))),
            What::Opcode => Some(SplitKey::Opcode(self.opcode_id(n))),
            What::Input(i) => {
                if i >= self.graph.arity(n) as i32 {
                    // splitting by opcode may promote followers with a
                    // different arity into this partition; they are split
                    // again through the cprop path
                    return None;
                }
                let skipped = self.graph.skip_proj(n);
                if i < self.end_idx && !self.graph.kind(skipped).is_pinned() {
                    return None;
                }
                if i == -1 {
                    let pred = self.graph.block_of(skipped);
                    return Some(SplitKey::Part(self.part_of(pred)));
                }
                if self.config.commutative
                    && (i == 0 || i == 1)
                    && self.graph.kind(n).is_commutative()
                {
                    // normalized operand order keeps op(a,b) and op(b,a)
                    // congruent
                    let pl = self.part_of(self.graph.ins(n)[0]);
                    let pr = self.part_of(self.graph.ins(n)[1]);
                    let key = if i == 0 { pl.min(pr) } else { pl.max(pr) };
                    return Some(SplitKey::Part(key));
                }
                Some(SplitKey::Part(self.part_of(self.graph.ins(n)[i as usize])))
            }
        }
    }

    /// Split `*x` by a characteristic; the first bucket stays, every other
    /// bucket becomes a new partition. All result partitions (including
    /// the remainder) are appended to `out`.
    fn split_by_what(&mut self, x: &mut PartId, what: What, out: &mut Vec<PartId>) {
        let mut map: IndexMap<SplitKey, Option<NodeId>> = IndexMap::new();
        let mut cur = self.part(*x).leader.first;
        while let Some(n) = cur {
            let next = self.info(n).list_next;
            if let Some(key) = self.what_key(n, what) {
                let entry = map.entry(key).or_insert(None);
                self.infos[n.index()].next = *entry;
                *entry = Some(n);
            }
            cur = next;
        }
        let buckets: Vec<Option<NodeId>> = map.into_values().collect();
        for chain in buckets.into_iter().skip(1) {
            let r = self.split(x, chain);
            out.push(r);
        }
        out.push(*x);
    }

    /// Refine one partition by lattice value, then opcode class, then each
    /// input's partition. Partitions whose members are all Top or constant
    /// are never split structurally.
    pub(super) fn split_by(&mut self, y: PartId) {
        if self.part(y).n_leader == 1 {
            let f = self.first_leader(y);
            let t = self.ty(f);
            self.part_mut(y).type_is_t_or_c = t.is_top_like() || t.is_constant_like();
            return;
        }

        let mut by_type = Vec::new();
        let mut x = y;
        self.split_by_what(&mut x, What::Type, &mut by_type);

        for &p in &by_type {
            let f = self.first_leader(p);
            let t = self.ty(f);
            self.part_mut(p).type_is_t_or_c = t.is_top_like() || t.is_constant_like();
        }

        for &p in &by_type {
            if self.part(p).n_leader <= 1 || self.part(p).type_is_t_or_c {
                continue;
            }
            let mut by_opcode = Vec::new();
            let mut z = p;
            self.split_by_what(&mut z, What::Opcode, &mut by_opcode);

            for &q in &by_opcode {
                if self.part(q).n_leader <= 1 {
                    continue;
                }
                let arity = self.graph.arity(self.first_leader(q)) as i32;
                // splitting by input i may create partitions that still
                // differ at input j < i, so re-split every result
                let mut round = vec![q];
                for input in (-1..arity).rev() {
                    let mut next_round = Vec::new();
                    for zp in round {
                        if self.part(zp).n_leader > 1 {
                            let mut t = zp;
                            self.split_by_what(&mut t, What::Input(input), &mut next_round);
                        } else {
                            next_round.push(zp);
                        }
                    }
                    round = next_round;
                }
            }
        }
    }
}
