//! basalt: a graph-based SSA middle-end
//!
//! The IR is a sea of nodes: every operation is a node with explicit
//! predecessors, control flow lives in Block nodes and control-mode
//! projections, and memory is threaded as a value. On top of it sits
//! [`opt::combine`], a combined pass performing sparse conditional constant
//! propagation, congruence-class discovery and unreachable-code elimination
//! in one fixed point.

pub mod ir;
pub mod logging;
pub mod opt;

pub use ir::{Graph, GraphBuilder};
pub use opt::combine::{combine, combine_with, CombineConfig};
