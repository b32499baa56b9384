//! Integration tests for the type inference engine
//!
//! Scripts are assembled with the bytecode writer and driven through the
//! same entry points an interpreter and a compiler would use.

use tyflow_bytecode::{BytecodeWriter, HeapRef, Opcode, Script, ScriptId};
use tyflow_engine::{
    AnalysisError, HeapObject, InferenceConfig, InferenceEngine, InferenceError, Liveness, ObjectFlags, ProtoKind,
    Type, TypeObjectId, TypeTag,
};

/// return arg0 + 1, with the offset of the ADD
fn increment(engine: &mut InferenceEngine, id: u32) -> (ScriptId, u32) {
    let mut w = BytecodeWriter::new();
    w.emit_get_arg(0);
    w.emit_op(Opcode::One);
    let add = w.emit_op(Opcode::Add) as u32;
    w.emit_op(Opcode::Return);
    let script = engine.add_script(Script {
        nargs: 1,
        ..Script::new(ScriptId(id), "increment", w.into_bytes())
    });
    (script, add)
}

fn return_types(engine: &InferenceEngine, script: ScriptId) -> Vec<Type> {
    let set = engine.type_script(script).unwrap().return_types();
    engine.set(set).types().to_vec()
}

// ============================================================================
// Arithmetic and runtime feedback
// ============================================================================

#[test]
fn test_increment_widens_with_feedback() {
    let mut engine = InferenceEngine::default();
    let (id, add) = increment(&mut engine, 1);

    engine.report_observed_call(id, Type::Undefined, &[Type::Int32], false);
    engine.ensure_ran_inference(id).unwrap();
    assert_eq!(return_types(&engine, id), vec![Type::Int32]);

    // String concatenation
    engine.report_observed_call(id, Type::Undefined, &[Type::String], false);
    assert_eq!(return_types(&engine, id), vec![Type::Int32, Type::String]);

    // A fractional argument widens without dropping earlier types
    engine.report_observed_call(id, Type::Undefined, &[Type::Double], false);
    assert_eq!(return_types(&engine, id), vec![Type::Int32, Type::Double, Type::String]);
    assert!(engine.check_pushed(id, add, 0, Type::Double));
    assert!(!engine.check_pushed(id, add, 0, Type::Boolean));
}

#[test]
fn test_overflow_reported_at_add() {
    let mut engine = InferenceEngine::default();
    let (id, add) = increment(&mut engine, 1);
    engine.report_observed_call(id, Type::Undefined, &[Type::Int32], false);
    engine.ensure_ran_inference(id).unwrap();

    engine.report_observed_type(id, add, Type::Double);
    assert_eq!(return_types(&engine, id), vec![Type::Int32, Type::Double]);
    assert!(engine.check_pushed(id, add, 0, Type::Double));
}

#[test]
fn test_compiled_assumption_is_invalidated() {
    let mut engine = InferenceEngine::default();
    let (id, _) = increment(&mut engine, 1);
    engine.report_observed_call(id, Type::Undefined, &[Type::Int32], false);
    engine.ensure_ran_inference(id).unwrap();

    engine.mark_compiled(id);
    let returns = engine.type_script(id).unwrap().return_types();
    assert_eq!(engine.known_type_tag(id, returns), TypeTag::Int32);
    assert!(engine.take_pending_recompiles().is_empty());

    engine.report_observed_call(id, Type::Undefined, &[Type::String], false);
    assert_eq!(engine.take_pending_recompiles(), vec![id]);
    assert_eq!(engine.known_type_tag(id, returns), TypeTag::Unknown);
}

#[test]
fn test_nuked_types_answer_conservatively() {
    let mut engine = InferenceEngine::default();
    let (id, _) = increment(&mut engine, 1);
    engine.report_observed_call(id, Type::Undefined, &[Type::Int32], false);
    engine.ensure_ran_inference(id).unwrap();
    engine.mark_compiled(id);
    let returns = engine.type_script(id).unwrap().return_types();

    engine.set_pending_nuke_types();
    engine.nuke_types();
    assert_eq!(engine.take_pending_recompiles(), vec![id]);

    // The recompiled code must not rely on the stale int result
    assert_eq!(engine.known_type_tag(id, returns), TypeTag::Unknown);
    assert!(engine.known_non_empty(id, returns));
    assert_eq!(engine.singleton(id, returns), None);
    assert!(matches!(engine.ensure_ran_inference(id), Err(InferenceError::TypesNuked)));
}

// ============================================================================
// Properties and calls across scripts
// ============================================================================

#[test]
fn test_property_write_reaches_reader_through_barrier() {
    let mut engine = InferenceEngine::default();

    // function set(p) { p.x = 1 }
    let mut w = BytecodeWriter::new();
    w.emit_get_arg(0);
    w.emit_op(Opcode::One);
    w.emit_set_prop(0);
    w.emit_op(Opcode::Pop);
    w.emit_op(Opcode::Stop);
    let writer = engine.add_script(Script {
        nargs: 1,
        atoms: vec!["x".into()],
        ..Script::new(ScriptId(1), "set", w.into_bytes())
    });

    // function get(p) { return p.x }
    let mut w = BytecodeWriter::new();
    w.emit_get_arg(0);
    let read = w.emit_get_prop(0) as u32;
    w.emit_op(Opcode::Return);
    let reader = engine.add_script(Script {
        nargs: 1,
        atoms: vec!["x".into()],
        ..Script::new(ScriptId(2), "get", w.into_bytes())
    });

    let point = engine.new_type_object("point", None, ProtoKind::Object);
    for script in [writer, reader] {
        engine.report_observed_call(script, Type::Undefined, &[Type::Object(point)], false);
        engine.ensure_ran_inference(script).unwrap();
    }

    let x = engine.property_id("x");
    let property = engine.get_property(point, x, false);
    assert!(engine.has_type(property, Type::Int32));

    // The read only sees the type once the interpreter reports it
    assert!(return_types(&engine, reader).is_empty());
    let barriers = engine.type_barriers(reader, read).to_vec();
    assert_eq!(barriers.len(), 1);
    assert_eq!(barriers[0].ty, Type::Int32);

    engine.report_observed_type(reader, read, Type::Int32);
    assert_eq!(return_types(&engine, reader), vec![Type::Int32]);
    engine.prune_type_barriers(reader, read);
    assert!(engine.type_barriers(reader, read).is_empty());
}

#[test]
fn test_call_binds_arguments_and_returns() {
    let mut engine = InferenceEngine::default();

    // function id(a) { return a }
    let mut w = BytecodeWriter::new();
    w.emit_get_arg(0);
    w.emit_op(Opcode::Return);
    let callee = engine.add_script(Script {
        nargs: 1,
        ..Script::new(ScriptId(1), "id", w.into_bytes())
    });

    // return id(5)
    let mut w = BytecodeWriter::new();
    let get = w.emit_get_gname(0) as u32;
    w.emit_op(Opcode::Undefined);
    w.emit_int(5);
    let call = w.emit_call(1) as u32;
    w.emit_op(Opcode::Return);
    let caller = engine.add_script(Script {
        atoms: vec!["id".into()],
        ..Script::new(ScriptId(2), "caller", w.into_bytes())
    });

    engine.ensure_ran_inference(caller).unwrap();
    let function = engine.function_type(callee).unwrap();
    engine.report_observed_type(caller, get, Type::Object(function));
    assert!(engine.ran_inference(callee));

    // Arguments reach the callee's formals only through its own frame
    let barriers = engine.type_barriers(caller, call).to_vec();
    assert_eq!(barriers.len(), 1);
    assert_eq!(barriers[0].ty, Type::Int32);
    assert!(return_types(&engine, caller).is_empty());

    engine.report_observed_call(callee, Type::Undefined, &[Type::Int32], false);
    assert_eq!(return_types(&engine, callee), vec![Type::Int32]);
    assert_eq!(return_types(&engine, caller), vec![Type::Int32]);
    engine.prune_type_barriers(caller, call);
    assert!(engine.type_barriers(caller, call).is_empty());
}

// ============================================================================
// Constructors
// ============================================================================

#[test]
fn test_constructor_definite_properties() {
    let mut engine = InferenceEngine::default();

    // function Point() { this.x = 1; this.y = 2 }
    let mut w = BytecodeWriter::new();
    for (atom, value) in [(0, 1), (1, 2)] {
        w.emit_op(Opcode::This);
        w.emit_int(value);
        w.emit_set_prop(atom);
        w.emit_op(Opcode::Pop);
    }
    w.emit_op(Opcode::Stop);
    let constructor = engine.add_script(Script {
        atoms: vec!["x".into(), "y".into()],
        ..Script::new(ScriptId(1), "Point", w.into_bytes())
    });
    let compiled = engine.add_script(Script::new(ScriptId(2), "user", vec![Opcode::Stop.to_u8()]));
    engine.mark_compiled(compiled);

    let point = engine.make_new_type(constructor, None).unwrap();
    let (x, y) = (engine.property_id("x"), engine.property_id("y"));
    assert_eq!(engine.definite_slot(compiled, point, x), Some(0));
    assert_eq!(engine.definite_slot(compiled, point, y), Some(1));
    let slot_y = engine.get_property(point, y, false);
    assert!(engine.has_type(slot_y, Type::Int32));

    engine.clear_new_script(point);
    assert!(engine.object(point).unwrap().new_script.is_none());
    assert!(engine.object(point).unwrap().has_any_flags(ObjectFlags::NEW_SCRIPT_CLEARED));
    assert_eq!(engine.take_pending_recompiles(), vec![compiled]);
    assert_eq!(engine.definite_slot(compiled, point, x), None);
}

// ============================================================================
// Collection
// ============================================================================

struct Collector {
    dead_scripts: Vec<ScriptId>,
    dead_objects: Vec<TypeObjectId>,
}

impl Liveness for Collector {
    fn is_object_alive(&self, object: TypeObjectId) -> bool {
        !self.dead_objects.contains(&object)
    }

    fn is_heap_ref_alive(&self, _heap: HeapRef) -> bool {
        true
    }

    fn is_script_alive(&self, script: ScriptId) -> bool {
        !self.dead_scripts.contains(&script)
    }
}

#[test]
fn test_sweep_keeps_live_types() {
    let mut engine = InferenceEngine::default();
    let (live, _) = increment(&mut engine, 1);
    let (dead, _) = increment(&mut engine, 2);
    let gone = engine.new_type_object("gone", None, ProtoKind::Object);
    engine.register_object(HeapRef(1), HeapObject::plain(None));

    engine.report_observed_call(live, Type::Undefined, &[Type::Int32], false);
    engine.report_observed_call(live, Type::Undefined, &[Type::Object(gone)], false);
    engine.ensure_ran_inference(live).unwrap();
    engine.ensure_ran_inference(dead).unwrap();
    engine.mark_compiled(live);

    let stats = engine.sweep(&Collector {
        dead_scripts: vec![dead],
        dead_objects: vec![gone],
    });
    assert_eq!(stats.scripts, 1);
    assert_eq!(stats.objects, 1);
    assert_eq!(stats.heap_refs, 0);
    assert!(stats.object_types >= 1);
    assert!(engine.type_script(dead).is_none());
    assert!(engine.heap_object(HeapRef(1)).is_some());

    let arg = engine.type_script(live).unwrap().arg_types()[0];
    assert_eq!(engine.set(arg).types().as_slice(), &[Type::Int32]);
    assert!(!engine.ran_inference(live));
    assert_eq!(engine.take_pending_recompiles(), vec![live]);

    engine.ensure_ran_inference(live).unwrap();
    assert_eq!(return_types(&engine, live), vec![Type::Int32]);
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_analysis_out_of_memory_discards_types() {
    let mut engine = InferenceEngine::new(InferenceConfig {
        analysis_memory_limit: Some(2),
        ..InferenceConfig::default()
    });
    let compiled = engine.add_script(Script::new(ScriptId(1), "compiled", vec![Opcode::Stop.to_u8()]));
    engine.mark_compiled(compiled);

    let mut w = BytecodeWriter::new();
    w.emit_get_arg(0);
    let skip = w.emit_forward_jump(Opcode::IfEq);
    w.emit_op(Opcode::Nop);
    w.patch_jump(skip);
    w.emit_op(Opcode::Stop);
    let branchy = engine.add_script(Script {
        nargs: 1,
        ..Script::new(ScriptId(2), "branchy", w.into_bytes())
    });

    let err = engine.ensure_ran_inference(branchy).unwrap_err();
    assert_eq!(err, InferenceError::Analysis(AnalysisError::OutOfMemory));
    assert!(!engine.is_enabled());
    assert_eq!(engine.stats().nukes, 1);
    assert_eq!(engine.take_pending_recompiles(), vec![compiled]);
    assert_eq!(engine.ensure_ran_inference(compiled), Err(InferenceError::TypesNuked));
}

#[test]
fn test_malformed_script_is_dynamic() {
    let mut engine = InferenceEngine::default();
    // POP on an empty stack
    let id = engine.add_script(Script::new(ScriptId(1), "broken", vec![Opcode::Pop.to_u8(), Opcode::Stop.to_u8()]));

    let err = engine.ensure_ran_inference(id).unwrap_err();
    assert_eq!(err, InferenceError::Analysis(AnalysisError::StackUnderflow(0)));
    assert!(engine.is_enabled());
    assert_eq!(return_types(&engine, id), vec![Type::Unknown]);
    // Not retried
    assert!(engine.ensure_ran_inference(id).is_ok());
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn test_script_snapshot_after_inference() {
    let mut engine = InferenceEngine::default();
    let (id, add) = increment(&mut engine, 1);
    engine.report_observed_call(id, Type::Undefined, &[Type::String], false);
    engine.ensure_ran_inference(id).unwrap();

    let snapshot = engine.script_snapshot(id).unwrap();
    assert_eq!(snapshot.arg_types.len(), 1);
    assert_eq!(snapshot.return_types.types, vec!["string"]);
    assert!(snapshot.pushed.iter().any(|p| p.offset == add && p.set.types == vec!["string"]));

    let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
    assert_eq!(json["argTypes"][0]["types"][0], "string");
    assert_eq!(json["returnTypes"]["tag"], "String");
}
