//! Unreachable-code elimination: decided branches fold, dead blocks
//! disappear, memory side effects survive through keep-alive edges, and
//! undecidable control flow is left strictly alone.

use basalt::ir::node::OpKind;
use basalt::ir::verify::verify_graph;
use basalt::ir::{GraphBuilder, Mode, NodeId, Relation, Tarval};
use basalt::opt::prune::prune_dead;
use basalt::{combine, logging, Graph};

fn const_value(g: &Graph, n: NodeId) -> Option<Tarval> {
    match g.kind(n) {
        OpKind::Const { value } => Some(*value),
        _ => None,
    }
}

/// if (true) { r = 1 } else { r = 2 }; return r
fn build_decided_branch() -> (Graph, NodeId) {
    let mut b = GraphBuilder::new("decided_branch");
    let mem = b.initial_mem();
    let exec = b.initial_exec();
    let sel = b.const_val(Tarval::b_true());
    b.block(&[exec]);
    let projs = b.cond(sel);

    b.block(&[projs.if_true]);
    let jt = b.jmp();
    b.block(&[projs.if_false]);
    let jf = b.jmp();

    b.block(&[jt, jf]);
    let one = b.const_i32(1);
    let two = b.const_i32(2);
    let r = b.phi(Mode::I32, &[one, two]);
    let ret = b.ret(mem, &[r]);
    (b.finish(), ret)
}

#[test]
fn test_decided_branch_returns_the_taken_value() {
    logging::init_test();
    let (mut g, ret) = build_decided_branch();

    assert!(combine(&mut g));
    let v = g.ins(ret)[1];
    assert_eq!(const_value(&g, v), Some(Tarval::new(Mode::I32, 1)));
    prune_dead(&mut g);
    verify_graph(&g).unwrap();
}

#[test]
fn test_decided_branch_is_idempotent() {
    logging::init_test();
    let (mut g, _) = build_decided_branch();

    assert!(combine(&mut g));
    assert!(!combine(&mut g), "the folded graph has nothing left to do");
}

#[test]
fn test_constant_comparison_decides_the_branch() {
    logging::init_test();
    let mut b = GraphBuilder::new("cmp_branch");
    let mem = b.initial_mem();
    let exec = b.initial_exec();
    let two = b.const_i32(2);
    let three = b.const_i32(3);
    b.block(&[exec]);
    let sel = b.cmp(Relation::Lt, three, two);
    let projs = b.cond(sel);

    b.block(&[projs.if_true]);
    let jt = b.jmp();
    b.block(&[projs.if_false]);
    let jf = b.jmp();

    b.block(&[jt, jf]);
    let r = b.phi(Mode::I32, &[two, three]);
    let ret = b.ret(mem, &[r]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    // 3 < 2 is false, the else value survives
    let v = g.ins(ret)[1];
    assert_eq!(const_value(&g, v), Some(Tarval::new(Mode::I32, 3)));
}

#[test]
fn test_undecidable_branch_stays_conservative() {
    logging::init_test();
    let mut b = GraphBuilder::new("open_branch");
    let mem = b.initial_mem();
    let exec = b.initial_exec();
    let x = b.arg(0, Mode::I32);
    let two = b.const_i32(2);
    b.block(&[exec]);
    // the comparison may transiently look constant while x merges in; the
    // reachability latch must end with both exits live
    let sel = b.cmp(Relation::Eq, x, two);
    let projs = b.cond(sel);

    b.block(&[projs.if_true]);
    let jt = b.jmp();
    b.block(&[projs.if_false]);
    let jf = b.jmp();

    b.block(&[jt, jf]);
    let one = b.const_i32(1);
    let r = b.phi(Mode::I32, &[one, two]);
    let ret = b.ret(mem, &[r]);
    let mut g = b.finish();

    assert!(!combine(&mut g));
    let v = g.ins(ret)[1];
    assert!(matches!(g.kind(v), OpKind::Phi));
    assert_eq!(g.arity(g.block_of(v)), 2, "both entries stay live");
}

#[test]
fn test_constant_switch_takes_its_case() {
    logging::init_test();
    let mut b = GraphBuilder::new("const_switch");
    let mem = b.initial_mem();
    let exec = b.initial_exec();
    let sel = b.const_i32(7);
    b.block(&[exec]);
    let table = basalt::ir::SwitchTable {
        cases: vec![
            basalt::ir::SwitchCase { min: 7, max: 7, pn: 1 },
            basalt::ir::SwitchCase { min: 9, max: 11, pn: 2 },
        ],
    };
    let sw = b.switch(sel, table);
    let out_case7 = b.switch_out(sw, 1);
    let out_case9 = b.switch_out(sw, 2);
    let out_default = b.switch_out(sw, 0);

    b.block(&[out_case7]);
    let j1 = b.jmp();
    b.block(&[out_case9]);
    let j2 = b.jmp();
    b.block(&[out_default]);
    let j3 = b.jmp();

    b.block(&[j1, j2, j3]);
    let c10 = b.const_i32(10);
    let c20 = b.const_i32(20);
    let c30 = b.const_i32(30);
    let r = b.phi(Mode::I32, &[c10, c20, c30]);
    let ret = b.ret(mem, &[r]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    let v = g.ins(ret)[1];
    assert_eq!(const_value(&g, v), Some(Tarval::new(Mode::I32, 10)));
    prune_dead(&mut g);
    verify_graph(&g).unwrap();
}

#[test]
fn test_switch_out_of_range_takes_the_default() {
    logging::init_test();
    let mut b = GraphBuilder::new("default_switch");
    let mem = b.initial_mem();
    let exec = b.initial_exec();
    let sel = b.const_i32(42);
    b.block(&[exec]);
    let table = basalt::ir::SwitchTable {
        cases: vec![basalt::ir::SwitchCase { min: 7, max: 7, pn: 1 }],
    };
    let sw = b.switch(sel, table);
    let out_case7 = b.switch_out(sw, 1);
    let out_default = b.switch_out(sw, 0);

    b.block(&[out_case7]);
    let j1 = b.jmp();
    b.block(&[out_default]);
    let j2 = b.jmp();

    b.block(&[j1, j2]);
    let c10 = b.const_i32(10);
    let c30 = b.const_i32(30);
    let r = b.phi(Mode::I32, &[c10, c30]);
    let ret = b.ret(mem, &[r]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    let v = g.ins(ret)[1];
    assert_eq!(const_value(&g, v), Some(Tarval::new(Mode::I32, 30)));
}

#[test]
fn test_side_effect_without_live_users_is_kept_alive() {
    logging::init_test();
    let mut b = GraphBuilder::new("kept_memory");
    let mem = b.initial_mem();
    let exec = b.initial_exec();
    let ptr = b.arg(0, Mode::P);
    let val = b.arg(1, Mode::I32);
    b.block(&[exec]);
    let m1 = b.store(mem, ptr, val);
    let sel = b.const_val(Tarval::b_false());
    let projs = b.cond(sel);

    // the only reader of the store's memory sits on the dead path
    b.block(&[projs.if_true]);
    let (_m2, _loaded) = b.load(m1, ptr, Mode::I32);
    let jt = b.jmp();
    b.block(&[projs.if_false]);
    let jf = b.jmp();

    b.block(&[jt, jf]);
    b.ret(mem, &[]);
    let mut g = b.finish();

    assert!(combine(&mut g));
    assert!(
        g.end_keepalives().contains(&m1),
        "the store's memory value must be pinned through End"
    );
    prune_dead(&mut g);
    assert!(!g.is_dead(m1), "the side effect survived the sweep");
}

#[test]
fn test_dead_loop_body_folds_to_the_entry_value() {
    logging::init_test();
    let mut b = GraphBuilder::new("dead_loop");
    let mem = b.initial_mem();
    let exec = b.initial_exec();
    let zero = b.const_i32(0);
    let one = b.const_i32(1);

    // loop header; the back edge and second Phi operand follow once the
    // body exists
    let header = b.block(&[exec]);
    let x = b.phi(Mode::I32, &[zero]);
    let stays = b.cmp(Relation::Lt, x, zero);
    let projs = b.cond(stays);

    b.block(&[projs.if_true]);
    let xn = b.add(x, one);
    let back = b.jmp();
    b.add_block_pred(header, back);
    b.graph_mut().set_irn_in(x, &[zero, xn]);

    b.block(&[projs.if_false]);
    let ret = b.ret(mem, &[x]);
    let mut g = b.finish();
    verify_graph(&g).unwrap();

    assert!(combine(&mut g));
    // 0 < 0 never holds: the body is unreachable and x is the entry zero
    let v = g.ins(ret)[1];
    assert_eq!(const_value(&g, v), Some(Tarval::new(Mode::I32, 0)));
}
