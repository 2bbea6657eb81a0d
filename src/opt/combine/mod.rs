//! Combined constant propagation, congruence partitioning and
//! unreachable-code elimination
//!
//! One monotone fixed point over two cooperating worklists drives all three
//! analyses at once: a per-node lattice value is refined by transfer
//! functions while congruence classes are refined by partition splitting.
//! The two directions feed each other: lattice values sharpen partitions,
//! partition identity unlocks algebraic identities, and both decide
//! reachability. After the fixed point the graph is rewritten: constants
//! materialize, congruent nodes collapse onto one leader, and dead control
//! flow is cut.
//!
//! Within a partition, *leaders* are the representative members; a
//! *follower* is a node equal to some leader through an algebraic identity
//! (`x + 0`, `x & ~0`, a Phi with one live value, ...). Followers ride along
//! with their partition and are rewritten onto the leader at the end.

mod lattice;
mod partition;
mod rewrite;
mod solver;

pub use lattice::LatticeValue;

use crate::ir::dump::{self, NodeAnnotation};
use crate::ir::node::OpKind;
use crate::ir::{Graph, NodeId};
use crate::opt::GraphPass;
use partition::{Fifo, ListHead, OpcodeKey};
use rustc_hash::FxHashMap;

/// Tuning knobs of the combined pass.
#[derive(Debug, Clone)]
pub struct CombineConfig {
    /// Treat `Add(a,b)` and `Add(b,a)` as congruent.
    pub commutative: bool,
    /// Unknown values compute Top (aggressive) instead of Bottom.
    pub unknown_as_top: bool,
    /// Ignore the block input of unpinned nodes, yielding global congruences.
    pub global_cse: bool,
    /// Panic when a lattice value does not descend monotonically.
    pub verify_monotone: bool,
    /// Re-check partition invariants after the fixed point.
    pub check_partitions: bool,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            commutative: true,
            unknown_as_top: true,
            global_cse: false,
            verify_monotone: cfg!(debug_assertions),
            check_partitions: cfg!(debug_assertions),
        }
    }
}

/// Run the combined pass with default configuration.
pub fn combine(graph: &mut Graph) -> bool {
    combine_with(graph, &CombineConfig::default())
}

/// Run the combined pass; returns true when the graph was modified.
pub fn combine_with(graph: &mut Graph, config: &CombineConfig) -> bool {
    log::info!("combine: running on graph \"{}\"", graph.name());
    // the solver assumes every live node is reachable from End
    crate::opt::prune::prune_dead(graph);
    let mut ctx = Ctx::new(graph, config.clone());
    ctx.init();

    loop {
        ctx.propagate();
        if ctx.worklist.is_some() {
            ctx.cause_splits();
        }
        if ctx.cprop.is_none() && ctx.worklist.is_none() {
            break;
        }
    }

    ctx.check_all_partitions();
    if log::log_enabled!(log::Level::Trace) {
        log::trace!("combine: fixed point\n{}", ctx.snapshot());
    }

    ctx.apply();

    if ctx.unopt_cf {
        log::warn!(
            "combine: constant switch selector with several live exits, control flow left in place"
        );
    }
    log::info!(
        "combine: graph \"{}\" {}",
        ctx.graph.name(),
        if ctx.modified { "modified" } else { "unchanged" }
    );
    ctx.modified
}

/// [`GraphPass`] wrapper around [`combine_with`].
#[derive(Debug, Default)]
pub struct Combine {
    pub config: CombineConfig,
}

impl GraphPass for Combine {
    fn name(&self) -> &'static str {
        "combine"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        combine_with(graph, &self.config)
    }
}

/// Index of a partition in the pass context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(super) struct PartId(pub(super) u32);

impl PartId {
    pub(super) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-node solver state; the IR node itself is untouched until rewriting.
#[derive(Debug, Clone)]
struct NodeInfo {
    part: PartId,
    ty: LatticeValue,
    /// Links of the leader/follower membership list.
    list_prev: Option<NodeId>,
    list_next: Option<NodeId>,
    /// Link of the partition's constant-propagation queue.
    cprop_next: Option<NodeId>,
    /// Scratch link shared by the touched/fallen/bucket chains.
    next: Option<NodeId>,
    /// Scratch link of the race lists.
    race_next: Option<NodeId>,
    /// Largest input position among the def-use edges.
    max_user_input: i32,
    /// Cursor into the sorted def-use array during touch collection.
    next_edge: usize,
    /// The def-use array prefix [0, n_followers) holds edges to followers.
    n_followers: usize,
    on_touched: bool,
    on_cprop: bool,
    on_fallen: bool,
    is_follower: bool,
    /// Race side marks (bit 1 and bit 2).
    flagged: u8,
    /// Next Phi in the same block (Phi nodes only).
    phi_next: Option<NodeId>,
    /// Head of the block's Phi chain (Block nodes only).
    phi_list: Option<NodeId>,
}

impl NodeInfo {
    fn new() -> Self {
        Self {
            part: PartId(0),
            ty: LatticeValue::Top,
            list_prev: None,
            list_next: None,
            cprop_next: None,
            next: None,
            race_next: None,
            max_user_input: -1,
            next_edge: 0,
            n_followers: 0,
            on_touched: false,
            on_cprop: false,
            on_fallen: false,
            is_follower: false,
            flagged: 0,
            phi_next: None,
            phi_list: None,
        }
    }
}

/// A congruence class.
#[derive(Debug)]
struct Partition {
    leader: ListHead,
    follower: ListHead,
    /// Members scheduled for retyping (data nodes).
    cprop: Fifo,
    /// Members scheduled for retyping (Cond/Switch and their projections);
    /// drained only after `cprop` is empty.
    cprop_x: Fifo,
    wl_next: Option<PartId>,
    touched_next: Option<PartId>,
    cprop_next: Option<PartId>,
    /// Head of the local touched chain (through `NodeInfo::next`).
    touched: Option<NodeId>,
    n_leader: usize,
    n_touched: usize,
    max_user_inputs: i32,
    on_worklist: bool,
    on_touched: bool,
    on_cprop: bool,
    /// Every member is Top or a constant; such partitions are exempt from
    /// opcode/input splitting.
    type_is_t_or_c: bool,
    /// Stable number for diagnostics.
    nr: u32,
}

/// The pass context: all scratch state, dropped wholesale at the end.
pub(super) struct Ctx<'g> {
    graph: &'g mut Graph,
    config: CombineConfig,
    infos: Vec<NodeInfo>,
    parts: Vec<Partition>,
    /// Partitions pending input/opcode refinement.
    worklist: Option<PartId>,
    /// Partitions with a non-empty constant-propagation queue.
    cprop: Option<PartId>,
    /// Partitions with a non-empty touched set (during one refinement step).
    touched: Option<PartId>,
    opcode_ids: FxHashMap<OpcodeKey, u32>,
    kept_memory: Vec<NodeId>,
    /// `0` ignores the block input of unpinned nodes (global congruences),
    /// `-1` keeps it.
    end_idx: i32,
    /// Node count before rewriting; nodes at or past this index are
    /// rewrite products without solver state.
    n_orig: usize,
    modified: bool,
    unopt_cf: bool,
    // rewrite-time caches
    const_cache: FxHashMap<crate::ir::Tarval, NodeId>,
    symconst_cache: FxHashMap<(crate::ir::Mode, crate::ir::SymConstKind), NodeId>,
    bad_cache: FxHashMap<crate::ir::Mode, NodeId>,
    unknown_cache: FxHashMap<crate::ir::Mode, NodeId>,
}

impl<'g> Ctx<'g> {
    fn new(graph: &'g mut Graph, config: CombineConfig) -> Self {
        let n = graph.len();
        let end_idx = if config.global_cse { 0 } else { -1 };
        Self {
            graph,
            config,
            infos: vec![NodeInfo::new(); n],
            parts: Vec::new(),
            worklist: None,
            cprop: None,
            touched: None,
            opcode_ids: FxHashMap::default(),
            kept_memory: Vec::new(),
            end_idx,
            n_orig: n,
            modified: false,
            unopt_cf: false,
            const_cache: FxHashMap::default(),
            symconst_cache: FxHashMap::default(),
            bad_cache: FxHashMap::default(),
            unknown_cache: FxHashMap::default(),
        }
    }

    fn info(&self, n: NodeId) -> &NodeInfo {
        &self.infos[n.index()]
    }

    fn info_mut(&mut self, n: NodeId) -> &mut NodeInfo {
        &mut self.infos[n.index()]
    }

    /// Lattice value of a node known to the solver.
    fn ty(&self, n: NodeId) -> LatticeValue {
        self.infos[n.index()].ty
    }

    /// Lattice value, if the node predates rewriting.
    fn try_ty(&self, n: NodeId) -> Option<LatticeValue> {
        if n.index() < self.n_orig {
            Some(self.infos[n.index()].ty)
        } else {
            None
        }
    }

    fn part_of(&self, n: NodeId) -> PartId {
        self.infos[n.index()].part
    }

    fn part(&self, p: PartId) -> &Partition {
        &self.parts[p.index()]
    }

    fn part_mut(&mut self, p: PartId) -> &mut Partition {
        &mut self.parts[p.index()]
    }

    fn new_partition(&mut self) -> PartId {
        let id = PartId(self.parts.len() as u32);
        self.parts.push(Partition {
            leader: ListHead::default(),
            follower: ListHead::default(),
            cprop: Fifo::default(),
            cprop_x: Fifo::default(),
            wl_next: None,
            touched_next: None,
            cprop_next: None,
            touched: None,
            n_leader: 0,
            n_touched: 0,
            max_user_inputs: 0,
            on_worklist: false,
            on_touched: false,
            on_cprop: false,
            type_is_t_or_c: false,
            nr: id.0,
        });
        id
    }

    /// The canonical representative of a partition.
    fn first_leader(&self, p: PartId) -> NodeId {
        self.part(p).leader.first.expect("partition has a leader")
    }

    /// One initial walk: sort every def-use array by input position, hand
    /// every node to the initial partition, and chain up each block's Phis.
    fn init(&mut self) {
        let initial = self.new_partition();
        debug_assert_eq!(initial, PartId(0));
        self.add_to_worklist(initial);

        let mut order = Vec::with_capacity(self.n_orig);
        self.graph.walk(|n| order.push(n), |_| {});
        debug_assert_eq!(
            order.len(),
            self.graph.live_nodes().count(),
            "input graph carries nodes unreachable from End"
        );

        for &n in &order {
            self.graph.outs_mut(n).sort_by_key(|e| e.pos);
            let max_input = self.graph.outs(n).last().map_or(-1, |e| e.pos);
            self.infos[n.index()].max_user_input = max_input;
            let (infos, parts) = (&mut self.infos, &mut self.parts);
            let part = &mut parts[initial.index()];
            partition::list_push_tail(infos, &mut part.leader, n);
            part.n_leader += 1;
            if max_input > part.max_user_inputs {
                part.max_user_inputs = max_input;
            }
        }

        for &n in &order {
            if matches!(self.graph.kind(n), OpKind::Phi) {
                let block = self.graph.block_of(n);
                self.infos[n.index()].phi_next = self.infos[block.index()].phi_list;
                self.infos[block.index()].phi_list = Some(n);
            }
        }

        // every node starts at Top
        self.part_mut(initial).type_is_t_or_c = true;

        let start_block = self.graph.start_block();
        self.add_to_cprop(start_block);
    }

    // ---- consistency checks ------------------------------------------

    fn check_partition(&self, p: PartId) {
        if !self.config.check_partitions {
            return;
        }
        let mut n = 0;
        let mut cur = self.part(p).leader.first;
        while let Some(x) = cur {
            let info = self.info(x);
            assert!(!info.is_follower, "{x} on leader list but marked follower");
            assert_eq!(info.flagged, 0, "{x} kept a race mark");
            assert_eq!(info.part, p, "{x} on the list of a foreign partition");
            n += 1;
            cur = info.list_next;
        }
        assert_eq!(n, self.part(p).n_leader, "leader count out of sync");

        let mut cur = self.part(p).follower.first;
        while let Some(x) = cur {
            let info = self.info(x);
            assert!(info.is_follower, "{x} on follower list but marked leader");
            assert_eq!(info.flagged, 0, "{x} kept a race mark");
            assert_eq!(info.part, p, "{x} on the list of a foreign partition");
            cur = info.list_next;
        }
    }

    fn check_all_partitions(&mut self) {
        if !self.config.check_partitions {
            return;
        }
        for i in 0..self.parts.len() {
            let p = PartId(i as u32);
            if self.part(p).leader.first.is_none() && self.part(p).follower.first.is_none() {
                continue;
            }
            self.check_partition(p);
            if !self.part(p).type_is_t_or_c {
                self.check_opcodes(p);
            }
            let mut cur = self.part(p).follower.first;
            while let Some(x) = cur {
                let leader = self.identity(x);
                assert!(
                    leader != x && self.part_of(leader) == self.part_of(x),
                    "{x} is a follower without an identity in its partition"
                );
                cur = self.info(x).list_next;
            }
        }
    }

    /// All leaders of a partition must agree on the opcode class.
    fn check_opcodes(&mut self, p: PartId) {
        let mut repr: Option<u32> = None;
        let mut cur = self.part(p).leader.first;
        while let Some(x) = cur {
            let id = self.opcode_id(x);
            match repr {
                None => repr = Some(id),
                Some(r) => assert_eq!(
                    r, id,
                    "partition {} mixes opcode classes at {x}",
                    self.part(p).nr
                ),
            }
            cur = self.info(x).list_next;
        }
    }

    /// Render the fixed point for the debug snapshot sink.
    fn snapshot(&self) -> String {
        dump::graph_snapshot(self.graph, |n| {
            if n.index() >= self.n_orig {
                return None;
            }
            let info = self.info(n);
            Some(NodeAnnotation {
                value: info.ty.to_string(),
                class: self.part(info.part).nr,
            })
        })
    }
}
