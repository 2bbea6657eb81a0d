//! Congruence-class discovery: common subexpressions collapse onto one
//! leader, commutative operations are congruent across operand order, and
//! followers (Phi merges of one value, Mux with equal branches, Confirm)
//! resolve onto the node they equal.

use basalt::ir::node::OpKind;
use basalt::ir::{GraphBuilder, Mode, Relation};
use basalt::{combine, logging};

#[test]
fn test_common_subexpressions_collapse() {
    logging::init_test();
    let mut b = GraphBuilder::new("cse");
    let mem = b.initial_mem();
    let a = b.arg(0, Mode::I32);
    let x = b.arg(1, Mode::I32);
    let c = b.arg(2, Mode::I32);

    let sum1 = b.add(a, x);
    let prod1 = b.mul(sum1, c);
    let sum2 = b.add(a, x);
    let prod2 = b.mul(sum2, c);
    let ret = b.ret(mem, &[prod1, prod2]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    assert_eq!(
        g.ins(ret)[1],
        g.ins(ret)[2],
        "both products use one surviving multiplication"
    );
    assert!(matches!(g.kind(g.ins(ret)[1]), OpKind::Mul));
}

#[test]
fn test_commutated_operands_are_congruent() {
    logging::init_test();
    let mut b = GraphBuilder::new("commutative");
    let mem = b.initial_mem();
    let a = b.arg(0, Mode::I32);
    let x = b.arg(1, Mode::I32);

    let ab = b.add(a, x);
    let ba = b.add(x, a);
    let ret = b.ret(mem, &[ab, ba]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    assert_eq!(g.ins(ret)[1], g.ins(ret)[2]);
}

#[test]
fn test_self_operands_stay_apart_from_mixed_operands() {
    logging::init_test();
    let mut b = GraphBuilder::new("aa_vs_ab");
    let mem = b.initial_mem();
    let a = b.arg(0, Mode::I32);
    let x = b.arg(1, Mode::I32);

    let aa = b.add(a, a);
    let ax = b.add(a, x);
    let ret = b.ret(mem, &[aa, ax]);
    let mut g = b.finish();

    combine(&mut g);
    assert_ne!(
        g.ins(ret)[1],
        g.ins(ret)[2],
        "Add(a,a) must not merge with Add(a,x)"
    );
}

#[test]
fn test_phi_over_one_value_is_a_follower() {
    logging::init_test();
    let mut b = GraphBuilder::new("phi_follower");
    let mem = b.initial_mem();
    let exec = b.initial_exec();
    let a = b.arg(0, Mode::I32);
    let sel = b.arg(1, Mode::B);
    b.block(&[exec]);
    let projs = b.cond(sel);

    b.block(&[projs.if_true]);
    let jt = b.jmp();
    b.block(&[projs.if_false]);
    let jf = b.jmp();

    b.block(&[jt, jf]);
    let merged = b.phi(Mode::I32, &[a, a]);
    let ret = b.ret(mem, &[merged]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    assert_eq!(g.ins(ret)[1], a, "Phi(a, a) merges nothing");
}

#[test]
fn test_mux_with_equal_branches_is_a_follower() {
    logging::init_test();
    let mut b = GraphBuilder::new("mux_follower");
    let mem = b.initial_mem();
    let a = b.arg(0, Mode::I32);
    let sel = b.arg(1, Mode::B);
    let mux = b.mux(sel, a, a);
    let ret = b.ret(mem, &[mux]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    assert_eq!(g.ins(ret)[1], a);
}

#[test]
fn test_confirm_is_a_follower_but_survives() {
    logging::init_test();
    let mut b = GraphBuilder::new("confirm_kept");
    let mem = b.initial_mem();
    let x = b.arg(0, Mode::I32);
    let zero = b.const_i32(0);
    let confirmed = b.confirm(x, Relation::Ge, zero);
    let ret = b.ret(mem, &[confirmed]);
    let mut g = b.finish();

    combine(&mut g);
    assert_eq!(
        g.ins(ret)[1],
        confirmed,
        "the range fact is kept for later passes"
    );
}

#[test]
fn test_equality_confirm_against_constant_folds() {
    logging::init_test();
    let mut b = GraphBuilder::new("confirm_eq");
    let mem = b.initial_mem();
    let x = b.arg(0, Mode::I32);
    let seven = b.const_i32(7);
    let confirmed = b.confirm(x, Relation::Eq, seven);
    let doubled = b.add(confirmed, confirmed);
    let ret = b.ret(mem, &[doubled]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    let v = g.ins(ret)[1];
    assert!(
        matches!(g.kind(v), OpKind::Const { value } if value.as_long() == 14),
        "x confirmed equal to 7 makes x + x fold to 14"
    );
}

#[test]
fn test_phi_over_congruent_values_becomes_a_follower() {
    logging::init_test();
    let mut b = GraphBuilder::new("phi_congruent");
    let mem = b.initial_mem();
    let exec = b.initial_exec();
    let a = b.arg(0, Mode::I32);
    let x = b.arg(1, Mode::I32);
    let sel = b.arg(2, Mode::B);
    let first = b.add(a, x);
    let second = b.add(a, x);
    let third = b.add(a, x);
    b.block(&[exec]);
    let projs = b.cond(sel);

    b.block(&[projs.if_true]);
    let jt = b.jmp();
    b.block(&[projs.if_false]);
    let jf = b.jmp();

    b.block(&[jt, jf]);
    let merged = b.phi(Mode::I32, &[second, third]);
    let combined = b.add(merged, first);
    let ret = b.ret(mem, &[combined]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    // the three additions are congruent, so the Phi merges one value and
    // follows it; what remains is an addition of that value with itself
    let v = g.ins(ret)[1];
    assert!(matches!(g.kind(v), OpKind::Add));
    assert_eq!(g.ins(v)[0], g.ins(v)[1]);
}
