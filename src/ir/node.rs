//! Node opcodes and per-node storage
//!
//! Opcodes carry their attributes as payload: a Proj knows its projection
//! number, a Cmp its relation, a Const its value. Two nodes are candidates
//! for congruence only when opcode, attributes, mode and arity all agree.

use super::{EntityId, Mode, NodeId, Relation, Tarval};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Projection numbers of a Cond node.
pub const PN_COND_FALSE: u32 = 0;
pub const PN_COND_TRUE: u32 = 1;

/// Projection number selecting a Switch's default exit.
pub const PN_SWITCH_DEFAULT: u32 = 0;

/// Projection numbers of the Start node.
pub const PN_START_EXEC: u32 = 0;
pub const PN_START_MEM: u32 = 1;
pub const PN_START_ARG_BASE: u32 = 2;

/// Projection numbers of memory operations and calls.
pub const PN_MEM: u32 = 0;
pub const PN_RES: u32 = 1;

/// One case range of a Switch table, mapping values to an exit projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwitchCase {
    pub min: i64,
    pub max: i64,
    pub pn: u32,
}

/// A Switch's value-to-exit mapping; values not covered take the default exit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwitchTable {
    pub cases: Vec<SwitchCase>,
}

impl SwitchTable {
    /// The exit projection a selector value jumps to.
    pub fn lookup(&self, value: i64) -> u32 {
        for case in &self.cases {
            if case.min <= value && value <= case.max {
                return case.pn;
            }
        }
        PN_SWITCH_DEFAULT
    }

    /// Largest projection number used by the table (the default is 0).
    pub fn max_pn(&self) -> u32 {
        self.cases.iter().map(|c| c.pn).max().unwrap_or(0)
    }
}

/// What a symbolic constant denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymConstKind {
    /// The address of an entity; stays symbolic until link time.
    Address(EntityId),
    /// The size of an entity; folds to an integer constant.
    Size(EntityId),
    /// The alignment of an entity; folds to an integer constant.
    Align(EntityId),
}

/// The operation of a node, including its opcode-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Basic block; inputs are the entering control edges.
    Block { labelled: bool },
    Start,
    /// Graph end; inputs are the keep-alive edges.
    End,
    Bad,
    Unknown,
    Jmp,
    /// Two-way branch on a boolean selector; a tuple of two X projections.
    Cond,
    /// Multi-way branch on an integer selector.
    Switch { table: SwitchTable },
    Proj { num: u32 },
    Phi,
    Const { value: Tarval },
    SymConst { kind: SymConstKind },
    Add,
    Sub,
    Mul,
    And,
    Or,
    Eor,
    Shl,
    Shr,
    Shrs,
    Rotl,
    Cmp { relation: Relation },
    /// Value refinement: the value input is asserted to be in `relation`
    /// with the bound input.
    Confirm { relation: Relation },
    /// Select between two values; inputs are selector, false value, true value.
    Mux,
    Call,
    Return,
    /// Join several memory values.
    Sync,
    Load,
    Store,
    Conv,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Block { .. } => "Block",
            OpKind::Start => "Start",
            OpKind::End => "End",
            OpKind::Bad => "Bad",
            OpKind::Unknown => "Unknown",
            OpKind::Jmp => "Jmp",
            OpKind::Cond => "Cond",
            OpKind::Switch { .. } => "Switch",
            OpKind::Proj { .. } => "Proj",
            OpKind::Phi => "Phi",
            OpKind::Const { .. } => "Const",
            OpKind::SymConst { .. } => "SymConst",
            OpKind::Add => "Add",
            OpKind::Sub => "Sub",
            OpKind::Mul => "Mul",
            OpKind::And => "And",
            OpKind::Or => "Or",
            OpKind::Eor => "Eor",
            OpKind::Shl => "Shl",
            OpKind::Shr => "Shr",
            OpKind::Shrs => "Shrs",
            OpKind::Rotl => "Rotl",
            OpKind::Cmp { .. } => "Cmp",
            OpKind::Confirm { .. } => "Confirm",
            OpKind::Mux => "Mux",
            OpKind::Call => "Call",
            OpKind::Return => "Return",
            OpKind::Sync => "Sync",
            OpKind::Store => "Store",
            OpKind::Load => "Load",
            OpKind::Conv => "Conv",
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, OpKind::Block { .. })
    }

    /// Operations whose operand order does not matter.
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            OpKind::Add | OpKind::Mul | OpKind::And | OpKind::Or | OpKind::Eor
        )
    }

    /// Pinned operations are fixed to their block; everything else may be
    /// considered block-independent by global congruence.
    pub fn is_pinned(&self) -> bool {
        matches!(
            self,
            OpKind::Block { .. }
                | OpKind::Start
                | OpKind::End
                | OpKind::Jmp
                | OpKind::Cond
                | OpKind::Switch { .. }
                | OpKind::Phi
                | OpKind::Call
                | OpKind::Return
                | OpKind::Sync
                | OpKind::Load
                | OpKind::Store
                | OpKind::Confirm { .. }
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Proj { num } => write!(f, "Proj[{num}]"),
            OpKind::Const { value } => write!(f, "Const[{value}]"),
            OpKind::Cmp { relation } => write!(f, "Cmp[{relation}]"),
            OpKind::Confirm { relation } => write!(f, "Confirm[{relation}]"),
            OpKind::SymConst { kind } => write!(f, "SymConst[{kind:?}]"),
            other => f.write_str(other.name()),
        }
    }
}

/// A def-use edge: `user`'s input at `pos` is the node owning the edge.
/// Position `-1` is the block edge (the user is placed in this block).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutEdge {
    pub user: NodeId,
    pub pos: i32,
}

/// Storage of one node in the graph arena.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: OpKind,
    pub mode: Mode,
    /// Containing block; blocks refer to themselves.
    pub block: NodeId,
    /// Ordered predecessors. For blocks these are the entering control
    /// edges, for End the keep-alive edges.
    pub ins: Vec<NodeId>,
    /// Def-use edges, kept consistent with `ins`/`block` of all users.
    pub outs: Vec<OutEdge>,
    /// Set once the node has been exchanged away.
    pub dead: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_table_lookup() {
        let table = SwitchTable {
            cases: vec![
                SwitchCase { min: 1, max: 1, pn: 1 },
                SwitchCase { min: 5, max: 9, pn: 2 },
            ],
        };
        assert_eq!(table.lookup(1), 1);
        assert_eq!(table.lookup(7), 2);
        assert_eq!(table.lookup(4), PN_SWITCH_DEFAULT);
        assert_eq!(table.max_pn(), 2);
    }

    #[test]
    fn test_opcode_classes() {
        assert!(OpKind::Add.is_commutative());
        assert!(!OpKind::Sub.is_commutative());
        assert!(OpKind::Phi.is_pinned());
        assert!(!OpKind::Mul.is_pinned());
    }
}
