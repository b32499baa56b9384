//! Integration tests for live ranges and loop records

use tyflow_bytecode::{BytecodeWriter, Opcode, Script, ScriptId};
use tyflow_engine::analysis::{LoopId, LoopTest};
use tyflow_engine::{InferenceConfig, LifetimeScript, ScriptAnalysis, Slot};

struct NestedLoops {
    outer_head: u32,
    outer_backedge: u32,
    inner_head: u32,
    inner_backedge: u32,
    inner_inc: u32,
    code: Vec<u8>,
}

/// for (i = 0; i < n; i++) for (j = 0; j < i; j++) {}
fn nested_loops(inner_body: impl FnOnce(&mut BytecodeWriter)) -> NestedLoops {
    let mut w = BytecodeWriter::new();
    w.emit_op(Opcode::Zero);
    w.emit_set_local(0);
    w.emit_op(Opcode::Pop);
    let enter_outer = w.emit_forward_jump(Opcode::Goto);
    let outer_head = w.emit_op(Opcode::LoopHead);

    w.emit_op(Opcode::Zero);
    w.emit_set_local(1);
    w.emit_op(Opcode::Pop);
    let enter_inner = w.emit_forward_jump(Opcode::Goto);
    let inner_head = w.emit_op(Opcode::LoopHead);
    inner_body(&mut w);
    let inner_inc = w.emit_op_u16(Opcode::LocalInc, 1);
    w.emit_op(Opcode::Pop);
    w.patch_jump(enter_inner);
    w.emit_get_local(1);
    w.emit_get_local(0);
    w.emit_op(Opcode::Lt);
    let inner_backedge = w.emit_jump(Opcode::IfNe, inner_head);

    w.emit_op_u16(Opcode::LocalInc, 0);
    w.emit_op(Opcode::Pop);
    w.patch_jump(enter_outer);
    w.emit_get_local(0);
    w.emit_get_arg(0);
    w.emit_op(Opcode::Lt);
    let outer_backedge = w.emit_jump(Opcode::IfNe, outer_head);
    w.emit_op(Opcode::Stop);

    NestedLoops {
        outer_head: outer_head as u32,
        outer_backedge: outer_backedge as u32,
        inner_head: inner_head as u32,
        inner_backedge: inner_backedge as u32,
        inner_inc: inner_inc as u32,
        code: w.into_bytes(),
    }
}

fn lifetimes(code: Vec<u8>) -> LifetimeScript {
    let script = Script {
        nargs: 1,
        nfixed: 2,
        ..Script::new(ScriptId(3), "nested", code)
    };
    let config = InferenceConfig::default();
    let analysis = ScriptAnalysis::analyze(&script, &config).expect("flow analysis failed");
    LifetimeScript::analyze(&analysis, &config).expect("lifetime analysis failed")
}

// ============================================================================
// Loop discovery
// ============================================================================

#[test]
fn test_nested_loops_are_found() {
    let nested = nested_loops(|_| {});
    let lifetimes = lifetimes(nested.code);

    // The outer back-edge is seen first by the backward scan
    assert_eq!(lifetimes.loops().len(), 2);
    let outer = lifetimes.loop_at(nested.outer_head).unwrap();
    let inner = lifetimes.loop_at(nested.inner_head).unwrap();
    assert_eq!(outer.backedge, nested.outer_backedge);
    assert_eq!(inner.backedge, nested.inner_backedge);
    assert_eq!(outer.parent, None);
    assert_eq!(inner.parent, Some(LoopId(0)));
    assert!(outer.contains(nested.inner_head));
    assert!(!inner.contains(nested.outer_head));

    // A nested loop counts as a call for the enclosing loop
    assert!(outer.has_calls_loops);
    assert!(!inner.has_calls_loops);
}

#[test]
fn test_inner_loop_facts() {
    let nested = nested_loops(|_| {});
    let lifetimes = lifetimes(nested.code);
    let inner = lifetimes.loop_at(nested.inner_head).unwrap();

    assert_eq!(inner.modified.as_slice(), &[Slot::Local(1)]);
    assert!(!inner.unknown_modset);
    assert_eq!(inner.increments.len(), 1);
    assert_eq!(inner.increments[0].slot, Slot::Local(1));
    assert_eq!(inner.increments[0].offset, nested.inner_inc);
    assert_eq!(
        inner.test,
        Some(LoopTest {
            lhs: Slot::Local(1),
            rhs: Some(Slot::Local(0)),
            constant: -1,
            less_equal: true,
        })
    );

    let outer = lifetimes.loop_at(nested.outer_head).unwrap();
    assert!(outer.modified.contains(&Slot::Local(0)));
    assert!(outer.modified.contains(&Slot::Local(1)));
}

#[test]
fn test_call_in_inner_loop() {
    let nested = nested_loops(|w| {
        w.emit_get_gname(0);
        w.emit_op(Opcode::Undefined);
        w.emit_call(0);
        w.emit_op(Opcode::Pop);
    });
    let lifetimes = lifetimes(nested.code);
    let inner = lifetimes.loop_at(nested.inner_head).unwrap();
    assert!(inner.has_calls_loops);
    assert!(inner.unknown_modset);
}

// ============================================================================
// Live ranges
// ============================================================================

#[test]
fn test_live_ranges_across_nested_loops() {
    let nested = nested_loops(|_| {});
    let lifetimes = lifetimes(nested.code);

    // The outer counter is read by the inner test on every iteration
    assert!(lifetimes.live_at(Slot::Local(0), nested.inner_head).is_some());
    assert!(lifetimes.live_at(Slot::Local(0), nested.outer_backedge).is_some());
    // The bound is live through the whole outer loop
    assert!(lifetimes.live_at(Slot::Arg(0), nested.outer_head).is_some());
    assert!(lifetimes.live_at(Slot::Arg(0), nested.inner_backedge).is_some());
    // The inner counter is rewritten before each inner loop
    assert!(lifetimes.live_at(Slot::Local(1), nested.inner_head).is_some());
    assert!(lifetimes.live_at(Slot::Local(1), nested.outer_backedge).is_none());
    assert!(lifetimes.live_at(Slot::Local(1), nested.outer_head).is_none());
}

#[test]
fn test_first_write_in_loop() {
    let nested = nested_loops(|_| {});
    let lifetimes = lifetimes(nested.code);

    assert_eq!(lifetimes.first_write(Slot::Arg(0), LoopId(0)), None);
    assert_eq!(lifetimes.first_write(Slot::Local(0), LoopId(1)), None);
    assert_eq!(lifetimes.only_write(Slot::Local(1), LoopId(1)), Some(nested.inner_inc));
}

#[test]
fn test_read_at_loop_head_spans_body() {
    // x = 1; do { y = x; } while (a)
    let mut w = BytecodeWriter::new();
    w.emit_op(Opcode::One);
    w.emit_set_local(0);
    w.emit_op(Opcode::Pop);
    let head = w.emit_op(Opcode::LoopHead) as u32;
    let read = w.emit_get_local(0) as u32;
    w.emit_set_local(1);
    w.emit_op(Opcode::Pop);
    let body = w.emit_op(Opcode::Nop) as u32;
    w.emit_get_arg(0);
    let backedge = w.emit_jump(Opcode::IfNe, head as usize) as u32;
    w.emit_op(Opcode::Stop);

    let lifetimes = lifetimes(w.into_bytes());
    let segments = lifetimes.segments(Slot::Local(0));
    let tail = segments.iter().find(|segment| segment.loop_tail).unwrap();
    assert_eq!(tail.start, read);
    assert_eq!(tail.end, backedge);
    for offset in [head, read, body, backedge] {
        assert!(lifetimes.live_at(Slot::Local(0), offset).is_some(), "dead at {offset}");
    }
}

#[test]
fn test_back_edge_to_read_spans_body() {
    // x = 1; do { y = x; } while (a), the back-edge lands on the read itself
    let mut w = BytecodeWriter::new();
    w.emit_op(Opcode::One);
    w.emit_set_local(0);
    w.emit_op(Opcode::Pop);
    let read = w.emit_get_local(0);
    w.emit_set_local(1);
    let body = w.emit_op(Opcode::Pop) as u32;
    w.emit_get_arg(0);
    let backedge = w.emit_jump(Opcode::IfNe, read) as u32;
    w.emit_op(Opcode::Stop);
    let read = read as u32;

    let lifetimes = lifetimes(w.into_bytes());
    assert_eq!(lifetimes.loops().len(), 1);
    assert!(lifetimes.loop_at(read).is_some());
    let segments = lifetimes.segments(Slot::Local(0));
    let tail = segments.iter().find(|segment| segment.loop_tail).unwrap();
    assert_eq!(tail.end, backedge);
    for offset in [read, body, backedge] {
        assert!(lifetimes.live_at(Slot::Local(0), offset).is_some(), "dead at {offset}");
    }
}
