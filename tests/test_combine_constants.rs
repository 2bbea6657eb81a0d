//! Constant propagation through the combined pass: plain folding, the
//! algebraic neutral-element identities, and Unknown handling.

use basalt::ir::node::OpKind;
use basalt::ir::{GraphBuilder, Mode, NodeId, Relation, Tarval};
use basalt::opt::prune::prune_dead;
use basalt::{combine, combine_with, logging, CombineConfig, Graph};

fn const_value(g: &Graph, n: NodeId) -> Option<Tarval> {
    match g.kind(n) {
        OpKind::Const { value } => Some(*value),
        _ => None,
    }
}

#[test]
fn test_adding_two_constants_folds_into_the_return() {
    logging::init_test();
    let mut b = GraphBuilder::new("fold_add");
    let mem = b.initial_mem();
    let two = b.const_i32(2);
    let three = b.const_i32(3);
    let sum = b.add(two, three);
    let ret = b.ret(mem, &[sum]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    let v = g.ins(ret)[1];
    assert_eq!(const_value(&g, v), Some(Tarval::new(Mode::I32, 5)));
}

#[test]
fn test_constants_fold_through_a_chain() {
    logging::init_test();
    let mut b = GraphBuilder::new("fold_chain");
    let mem = b.initial_mem();
    let two = b.const_i32(2);
    let three = b.const_i32(3);
    let sum = b.add(two, three);
    let four = b.const_i32(4);
    let prod = b.mul(sum, four);
    let diff = b.sub(prod, two);
    let ret = b.ret(mem, &[diff]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    let v = g.ins(ret)[1];
    assert_eq!(const_value(&g, v), Some(Tarval::new(Mode::I32, 18)));
}

#[test]
fn test_subtracting_zero_is_discovered_as_identity() {
    logging::init_test();
    let mut b = GraphBuilder::new("sub_zero");
    let mem = b.initial_mem();
    let x = b.arg(0, Mode::I32);
    let zero = b.const_i32(0);
    let sub = b.sub(x, zero);
    let ret = b.ret(mem, &[sub]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    assert_eq!(g.ins(ret)[1], x, "Sub(x, 0) collapses onto x");
}

#[test]
fn test_neutral_elements_collapse_onto_the_operand() {
    logging::init_test();
    let mut b = GraphBuilder::new("neutral");
    let mem = b.initial_mem();
    let x = b.arg(0, Mode::I32);
    let zero = b.const_i32(0);
    let one = b.const_i32(1);
    let ones = b.const_val(Tarval::all_one(Mode::I32));

    let a = b.add(x, zero);
    let o = b.or(a, zero);
    let m = b.mul(o, one);
    let n = b.and(m, ones);
    let s = b.shl(n, zero);
    let ret = b.ret(mem, &[s]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    assert_eq!(g.ins(ret)[1], x, "the whole identity chain collapses onto x");
}

#[test]
fn test_comparing_a_value_with_itself_folds() {
    logging::init_test();
    let mut b = GraphBuilder::new("cmp_self");
    let mem = b.initial_mem();
    let x = b.arg(0, Mode::I32);
    let le = b.cmp(Relation::Le, x, x);
    let ret = b.ret(mem, &[le]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    let v = g.ins(ret)[1];
    assert_eq!(const_value(&g, v), Some(Tarval::b_true()));
}

#[test]
fn test_float_self_subtraction_is_left_alone() {
    logging::init_test();
    let mut b = GraphBuilder::new("float_sub");
    let mem = b.initial_mem();
    let x = b.arg(0, Mode::F64);
    // NaN - NaN is NaN, so congruence must not claim 0.0 here
    let sub = b.sub(x, x);
    let ret = b.ret(mem, &[sub]);
    let mut g = b.finish();

    assert!(!combine(&mut g));
    assert_eq!(g.ins(ret)[1], sub);
}

#[test]
fn test_unknown_operand_swallows_the_addition() {
    logging::init_test();
    let mut b = GraphBuilder::new("unknown_add");
    let mem = b.initial_mem();
    let x = b.arg(0, Mode::I32);
    let unk = b.unknown(Mode::I32);
    let sum = b.add(x, unk);
    let ret = b.ret(mem, &[sum]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    assert!(
        matches!(g.kind(g.ins(ret)[1]), OpKind::Unknown),
        "with Unknown treated as Top the sum computes no value"
    );
}

#[test]
fn test_conservative_unknown_config_keeps_the_addition() {
    logging::init_test();
    let mut b = GraphBuilder::new("unknown_add_conservative");
    let mem = b.initial_mem();
    let x = b.arg(0, Mode::I32);
    let unk = b.unknown(Mode::I32);
    let sum = b.add(x, unk);
    let ret = b.ret(mem, &[sum]);
    let mut g = b.finish();

    let config = CombineConfig {
        unknown_as_top: false,
        ..CombineConfig::default()
    };
    assert!(!combine_with(&mut g, &config));
    assert_eq!(g.ins(ret)[1], sum);
}

#[test]
fn test_symconst_size_folds_to_a_constant() {
    logging::init_test();
    let mut b = GraphBuilder::new("entity_size");
    let mem = b.initial_mem();
    let ent = b.add_entity("buffer", 64, 8);
    let size = b.symconst(Mode::U32, basalt::ir::SymConstKind::Size(ent));
    let eight = b.const_val(Tarval::new(Mode::U32, 8));
    let sum = b.add(size, eight);
    let ret = b.ret(mem, &[sum]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    let v = g.ins(ret)[1];
    assert_eq!(const_value(&g, v), Some(Tarval::new(Mode::U32, 72)));
}

#[test]
fn test_symconst_address_stays_symbolic() {
    logging::init_test();
    let mut b = GraphBuilder::new("entity_addr");
    let mem = b.initial_mem();
    let ent = b.add_entity("global", 4, 4);
    let addr = b.symconst(Mode::P, basalt::ir::SymConstKind::Address(ent));
    let value = b.confirm(addr, Relation::Ge, addr);
    let ret = b.ret(mem, &[value]);
    let mut g = b.finish();

    combine(&mut g);
    // the address never becomes a numeric constant
    let v = g.ins(ret)[1];
    assert!(matches!(
        g.kind(v),
        OpKind::SymConst { .. } | OpKind::Confirm { .. }
    ));
}

#[test]
fn test_folding_is_idempotent() {
    logging::init_test();
    let mut b = GraphBuilder::new("idempotent_fold");
    let mem = b.initial_mem();
    let two = b.const_i32(2);
    let three = b.const_i32(3);
    let sum = b.add(two, three);
    b.ret(mem, &[sum]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    prune_dead(&mut g);
    assert!(!combine(&mut g), "a second run finds nothing left to do");
}
