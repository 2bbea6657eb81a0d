//! Graph-based SSA intermediate representation
//!
//! Every value-producing operation is a node; control flow is explicit via
//! Block nodes and control-mode projections, and memory is threaded as an
//! explicit value. Nodes live in an arena owned by [`Graph`] and refer to
//! each other through [`NodeId`] indices, so Phi cycles are plain data.

pub mod builder;
pub mod dump;
pub mod fold;
pub mod graph;
pub mod node;
pub mod tarval;
pub mod verify;

pub use builder::GraphBuilder;
pub use graph::Graph;
pub use node::{OpKind, OutEdge, SwitchCase, SwitchTable, SymConstKind};
pub use tarval::Tarval;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a node inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Unique identifier of an entity (a named global object an address can refer to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ent{}", self.0)
    }
}

/// A named program entity with a known layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub size: u32,
    pub align: u32,
}

/// The mode of a node: its data width, or one of the non-data kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Internal boolean (comparison results, Cond selectors).
    B,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Pointer.
    P,
    /// Memory.
    M,
    /// Tuple (Cond, Switch, Call, Load, Store, Start).
    T,
    /// Control flow.
    X,
    /// Basic block.
    BB,
}

impl Mode {
    /// Bit width of a data mode, `None` for the non-data kinds.
    pub fn bits(self) -> Option<u32> {
        match self {
            Mode::B => Some(1),
            Mode::I8 | Mode::U8 => Some(8),
            Mode::I16 | Mode::U16 => Some(16),
            Mode::I32 | Mode::U32 | Mode::F32 => Some(32),
            Mode::I64 | Mode::U64 | Mode::F64 | Mode::P => Some(64),
            Mode::M | Mode::T | Mode::X | Mode::BB => None,
        }
    }

    pub fn is_data(self) -> bool {
        self.bits().is_some()
    }

    pub fn is_float(self) -> bool {
        matches!(self, Mode::F32 | Mode::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Mode::I8 | Mode::I16 | Mode::I32 | Mode::I64)
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            Mode::B
                | Mode::I8
                | Mode::I16
                | Mode::I32
                | Mode::I64
                | Mode::U8
                | Mode::U16
                | Mode::U32
                | Mode::U64
                | Mode::P
        )
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::B => "b",
            Mode::I8 => "i8",
            Mode::I16 => "i16",
            Mode::I32 => "i32",
            Mode::I64 => "i64",
            Mode::U8 => "u8",
            Mode::U16 => "u16",
            Mode::U32 => "u32",
            Mode::U64 => "u64",
            Mode::F32 => "f32",
            Mode::F64 => "f64",
            Mode::P => "p",
            Mode::M => "M",
            Mode::T => "T",
            Mode::X => "X",
            Mode::BB => "BB",
        };
        f.write_str(s)
    }
}

/// Comparison relation carried by Cmp and Confirm nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    /// Does the relation hold for two equal operands?
    pub fn holds_for_equal(self) -> bool {
        matches!(self, Relation::Eq | Relation::Le | Relation::Ge)
    }

    /// Evaluate the relation for a concrete ordering of the operands.
    pub fn eval(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Relation::Eq => ord == Equal,
            Relation::Ne => ord != Equal,
            Relation::Lt => ord == Less,
            Relation::Le => ord != Greater,
            Relation::Gt => ord == Greater,
            Relation::Ge => ord != Less,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relation::Eq => "==",
            Relation::Ne => "!=",
            Relation::Lt => "<",
            Relation::Le => "<=",
            Relation::Gt => ">",
            Relation::Ge => ">=",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_predicates() {
        assert!(Mode::I32.is_data());
        assert!(Mode::I32.is_signed());
        assert!(!Mode::U32.is_signed());
        assert!(Mode::F64.is_float());
        assert!(!Mode::X.is_data());
        assert_eq!(Mode::P.bits(), Some(64));
        assert_eq!(Mode::M.bits(), None);
    }

    #[test]
    fn test_relation_eval() {
        use std::cmp::Ordering::*;
        assert!(Relation::Eq.eval(Equal));
        assert!(!Relation::Eq.eval(Less));
        assert!(Relation::Le.eval(Equal));
        assert!(Relation::Lt.eval(Less));
        assert!(Relation::Ge.eval(Greater));
        assert!(Relation::Ne.eval(Greater));
        assert!(Relation::Eq.holds_for_equal());
        assert!(!Relation::Lt.holds_for_equal());
    }
}
