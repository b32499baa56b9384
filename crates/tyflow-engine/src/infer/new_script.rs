//! Definite properties of constructed objects
//!
//! Objects built by `new F()` get a type object per function and prototype.
//! The constructor is scanned for the properties it always assigns to
//! `this` before `this` can escape. Those properties are definite: every
//! object of the type has them, at fixed slots, from the moment the
//! constructor's prologue completes. A compiler may then read them without
//! a shape check, as long as the type keeps its constructor descriptor.

use super::constraint::Constraint;
use super::engine::InferenceEngine;
use super::object::{Initializer, NewScript, ObjectFlags, ProtoKind};
use super::types::{PropertyId, Type, TypeObjectId};
use crate::analysis::{InstrFlags, StackValue};
use crate::error::{InferenceError, InferenceResult};
use tracing::debug;
use tyflow_bytecode::{HeapRef, Opcode, ScriptId};

/// Nesting of `f.call(this)` frames followed into callees
const FRAME_DEPTH_LIMIT: usize = 3;

#[derive(Debug, Default)]
struct DefiniteWalk {
    object: Option<TypeObjectId>,
    proto_type: Option<TypeObjectId>,
    properties: Vec<PropertyId>,
    initializers: Vec<Initializer>,
    limit: usize,
}

impl InferenceEngine {
    /// Type object for objects `script`'s function constructs with `proto`
    ///
    /// The object type is added to the constructor's `this` types. On first
    /// use the constructor is scanned for definite properties.
    pub fn make_new_type(&mut self, script: ScriptId, proto: Option<HeapRef>) -> InferenceResult<TypeObjectId> {
        if let Some(object) = self.tables.constructed(script, proto) {
            return Ok(object);
        }
        let name = match self.script_source(script) {
            Some(source) => format!("new {}", source.name),
            None => return Err(InferenceError::UnknownScript(script)),
        };
        let object = self.new_type_object(name, proto, ProtoKind::Object);
        self.tables.insert_constructed(script, proto, object);
        if let Some(this_types) = self.type_script(script).map(|types| types.this_types()) {
            self.add_type(this_types, Type::Object(object));
        }

        if self.is_enabled() {
            if let Err(err) = self.analyze_new_script(script, object) {
                debug!(script = script.0, %err, "constructor not analyzed");
            }
        }
        self.flush_nuke();
        Ok(object)
    }

    fn analyze_new_script(&mut self, script: ScriptId, object: TypeObjectId) -> InferenceResult<()> {
        let proto_type = match self.object(object).and_then(|o| o.proto) {
            Some(proto) => self.heap_type(proto),
            None => None,
        };
        let mut walk = DefiniteWalk {
            object: Some(object),
            proto_type,
            limit: self.config.max_definite_properties as usize,
            ..DefiniteWalk::default()
        };
        self.walk_constructor(script, 0, &mut walk)?;
        if walk.properties.is_empty() {
            return Ok(());
        }
        walk.initializers.push(Initializer::Done);

        debug!(script = script.0, object = object.0, count = walk.properties.len(), "definite properties");
        self.add_definite_properties(object, &walk.properties);
        if let Some(entry) = self.object_mut(object) {
            entry.new_script = Some(NewScript {
                script,
                properties: walk.properties,
                initializers: walk.initializers,
            });
        }
        Ok(())
    }

    /// Follow `this` through straight-line code of `script`
    ///
    /// Returns `false` once `this` is used in a way that could observe a
    /// missing property, or control flow branches. Properties found up to
    /// that point stay definite.
    fn walk_constructor(&mut self, script: ScriptId, depth: usize, walk: &mut DefiniteWalk) -> InferenceResult<bool> {
        self.ensure_ran_inference(script)?;
        let Some(inference) = self.inference(script) else {
            return Ok(false);
        };
        let flow = inference.flow.clone();
        let stack = inference.stack.clone();

        for instr in flow.reachable() {
            let offset = instr.offset;
            if offset > 0 && flow.has_flag(offset, InstrFlags::JUMP_TARGET) {
                return Ok(false);
            }
            if matches!(instr.opcode, Opcode::Return | Opcode::RetRval | Opcode::Stop) {
                return Ok(true);
            }
            if instr.opcode.is_jump() || !instr.opcode.falls_through() {
                return Ok(false);
            }

            for which in 0..instr.uses() {
                let StackValue::Pushed { offset: producer, .. } = stack.popped(offset, which) else {
                    continue;
                };
                if flow.instr_at(producer).map(|p| p.opcode) != Some(Opcode::This) {
                    continue;
                }

                match instr.opcode {
                    Opcode::Pop => {}
                    Opcode::SetProp if which == 1 => {
                        let name = self.script_atom(script, instr.index_operand());
                        let id = self.property_id(&name);
                        if walk.properties.contains(&id) {
                            continue;
                        }
                        if walk.properties.len() >= walk.limit || !self.watch_proto_property(walk, id) {
                            return Ok(false);
                        }
                        walk.properties.push(id);
                        walk.initializers.push(Initializer::SetProp(offset));
                    }
                    Opcode::GetProp if which == 0 => {
                        let name = self.script_atom(script, instr.index_operand());
                        let id = self.property_id(&name);
                        if !walk.properties.contains(&id) {
                            return Ok(false);
                        }
                    }
                    // f.call(this, ...) initializing in a callee
                    Opcode::FunCall if which + 1 == instr.u16_operand() => {
                        let next_op = flow.next_instr(offset).map(|next| next.opcode);
                        if depth + 1 >= FRAME_DEPTH_LIMIT || next_op != Some(Opcode::Pop) {
                            return Ok(false);
                        }
                        let Some(callee) = self.single_callee(script, offset, instr.u16_operand(), walk) else {
                            return Ok(false);
                        };
                        walk.initializers.push(Initializer::FramePush(offset));
                        if !self.walk_constructor(callee, depth + 1, walk)? {
                            return Ok(false);
                        }
                        walk.initializers.push(Initializer::FramePop);
                    }
                    _ => return Ok(false),
                }
            }
        }
        Ok(true)
    }

    /// Check `id` is not on the prototype chain, watching it in case it appears
    fn watch_proto_property(&mut self, walk: &DefiniteWalk, id: PropertyId) -> bool {
        let Some(object) = walk.object else {
            return true;
        };
        let mut watched = Vec::new();
        let mut current = walk.proto_type;
        while let Some(proto_type) = current {
            if self.object(proto_type).map_or(true, |o| o.unknown_properties()) {
                return false;
            }
            let set = self.get_property(proto_type, id, false);
            if !self.set(set).is_empty() || self.set(set).is_own_property(false) {
                return false;
            }
            watched.push(set);
            current = match self.object(proto_type).and_then(|o| o.proto) {
                Some(proto) => self.heap_type(proto),
                None => None,
            };
        }
        for set in watched {
            self.add_constraint(set, Constraint::ClearDefiniteSetter { object }, false);
        }
        true
    }

    /// The one interpreted function the callee operand of `f.call` can be
    fn single_callee(&mut self, script: ScriptId, offset: u32, argc: u32, walk: &DefiniteWalk) -> Option<ScriptId> {
        let object = walk.object?;
        let functions = self.popped_types(script, offset, argc);
        let set = self.set(functions);
        if !set.base_flags().is_empty() || set.object_count() != 1 {
            return None;
        }
        let ty = set.objects()[0];
        let callee = self.interpreted_callee(ty)?;
        // Another callee showing up invalidates what the walk assumed
        self.add_constraint(functions, Constraint::ClearDefiniteSingle { object }, false);
        Some(callee)
    }

    /// Discard the definite properties of `object`
    ///
    /// Each formerly definite property becomes an ordinary configured own
    /// property, and compiled code that relied on the slots is recompiled.
    pub fn clear_new_script(&mut self, object: TypeObjectId) {
        let Some(entry) = self.object_mut(object) else {
            return;
        };
        if entry.flags.contains(ObjectFlags::NEW_SCRIPT_CLEARED) {
            return;
        }
        let properties = entry.new_script.take().map(|n| n.properties).unwrap_or_default();
        debug!(object = object.0, count = properties.len(), "clear definite properties");

        for id in properties {
            let Some(set) = self.object(object).and_then(|o| o.maybe_property(id)) else {
                continue;
            };
            self.sets[set.index()].clear_definite();
            self.set_own_property(set, true);
        }
        self.set_object_flags(object, ObjectFlags::NEW_SCRIPT_CLEARED);
    }

    /// Fixed slot of a definite property of `object`
    ///
    /// A slot answer is watched: clearing the constructor descriptor
    /// recompiles `script`.
    pub fn definite_slot(&mut self, script: ScriptId, object: TypeObjectId, id: PropertyId) -> Option<u32> {
        let set = self.object(object)?.maybe_property(id)?;
        let slot = self.set(set).definite_slot()?;
        if self.object_has_flags(script, object, ObjectFlags::NEW_SCRIPT_CLEARED) {
            return None;
        }
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::object::HeapObject;
    use tyflow_bytecode::{BytecodeWriter, Script};

    fn assign(w: &mut BytecodeWriter, atom: u32, value: i32) -> u32 {
        w.emit_op(Opcode::This);
        w.emit_int(value);
        let at = w.emit_set_prop(atom) as u32;
        w.emit_op(Opcode::Pop);
        at
    }

    fn constructor(engine: &mut InferenceEngine, w: BytecodeWriter, atoms: &[&str]) -> ScriptId {
        engine.add_script(Script {
            atoms: atoms.iter().map(|a| a.to_string()).collect(),
            ..Script::new(ScriptId(1), "F", w.into_bytes())
        })
    }

    #[test]
    fn test_straight_line_assignments_are_definite() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        let a = assign(&mut w, 0, 1);
        let b = assign(&mut w, 1, 2);
        // Reassigning and reading back keeps the walk going
        assign(&mut w, 0, 3);
        w.emit_op(Opcode::This);
        w.emit_get_prop(1);
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::Stop);
        let id = constructor(&mut engine, w, &["a", "b"]);

        let object = engine.make_new_type(id, None).unwrap();
        assert_eq!(engine.make_new_type(id, None).unwrap(), object);
        let this = engine.type_script(id).unwrap().this_types();
        assert!(engine.set(this).has_type(Type::Object(object)));

        let new_script = engine.object(object).unwrap().new_script.clone().unwrap();
        let (pa, pb) = (engine.property_id("a"), engine.property_id("b"));
        assert_eq!(new_script.properties, vec![pa, pb]);
        assert_eq!(
            new_script.initializers,
            vec![Initializer::SetProp(a), Initializer::SetProp(b), Initializer::Done]
        );
        let script = engine.add_test_script("compiled", true);
        assert_eq!(engine.definite_slot(script, object, pb), Some(1));
    }

    #[test]
    fn test_escape_ends_definite_properties() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        assign(&mut w, 0, 1);
        w.emit_op_u32(Opcode::BindGName, 2);
        w.emit_op(Opcode::This);
        w.emit_op_u32(Opcode::SetGName, 2);
        w.emit_op(Opcode::Pop);
        assign(&mut w, 1, 2);
        w.emit_op(Opcode::Stop);
        let id = constructor(&mut engine, w, &["a", "b", "leak"]);

        let object = engine.make_new_type(id, None).unwrap();
        let new_script = engine.object(object).unwrap().new_script.clone().unwrap();
        assert_eq!(new_script.properties, vec![engine.property_id("a")]);
    }

    #[test]
    fn test_branch_ends_definite_properties() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0);
        let jump = w.emit_forward_jump(Opcode::IfEq);
        assign(&mut w, 0, 1);
        w.patch_jump(jump);
        assign(&mut w, 1, 2);
        w.emit_op(Opcode::Stop);
        let id = engine.add_script(Script {
            nargs: 1,
            atoms: vec!["a".into(), "b".into()],
            ..Script::new(ScriptId(1), "F", w.into_bytes())
        });

        let object = engine.make_new_type(id, None).unwrap();
        assert!(engine.object(object).unwrap().new_script.is_none());
    }

    #[test]
    fn test_funcall_frame_adds_callee_properties() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        let b = assign(&mut w, 0, 2);
        w.emit_op(Opcode::Stop);
        let init = engine.add_script(Script {
            atoms: vec!["b".into()],
            ..Script::new(ScriptId(2), "init", w.into_bytes())
        });

        // this.a = 1; init.call(this); return
        let mut w = BytecodeWriter::new();
        let a = assign(&mut w, 0, 1);
        w.emit_op_u32(Opcode::Lambda, 0);
        w.emit_op_u32(Opcode::CallProp, 1);
        w.emit_op(Opcode::This);
        let call = w.emit_op_u16(Opcode::FunCall, 1) as u32;
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::Stop);
        let id = engine.add_script(Script {
            atoms: vec!["a".into(), "call".into()],
            functions: vec![init],
            ..Script::new(ScriptId(1), "F", w.into_bytes())
        });

        let object = engine.make_new_type(id, None).unwrap();
        let new_script = engine.object(object).unwrap().new_script.clone().unwrap();
        assert_eq!(new_script.properties, vec![engine.property_id("a"), engine.property_id("b")]);
        assert_eq!(
            new_script.initializers,
            vec![
                Initializer::SetProp(a),
                Initializer::FramePush(call),
                Initializer::SetProp(b),
                Initializer::FramePop,
                Initializer::Done,
            ]
        );
    }

    #[test]
    fn test_prototype_setter_clears_definite_properties() {
        let mut engine = InferenceEngine::default();
        engine.register_object(HeapRef(5), HeapObject::plain(None));
        let mut w = BytecodeWriter::new();
        assign(&mut w, 0, 1);
        w.emit_op(Opcode::Stop);
        let id = constructor(&mut engine, w, &["a"]);

        let object = engine.make_new_type(id, Some(HeapRef(5))).unwrap();
        let a = engine.property_id("a");
        let script = engine.add_test_script("compiled", true);
        assert_eq!(engine.definite_slot(script, object, a), Some(0));

        let proto_type = engine.heap_type(HeapRef(5)).unwrap();
        engine.mark_property_configured(proto_type, a);
        assert!(engine.object(object).unwrap().has_any_flags(ObjectFlags::NEW_SCRIPT_CLEARED));
        assert_eq!(engine.take_pending_recompiles(), vec![script]);
        assert_eq!(engine.definite_slot(script, object, a), None);
        let set = engine.object(object).unwrap().maybe_property(a).unwrap();
        assert!(engine.set(set).is_own_property(true));
    }

    #[test]
    fn test_property_on_prototype_is_not_definite() {
        let mut engine = InferenceEngine::default();
        let a = engine.property_id("a");
        engine.register_object(HeapRef(5), HeapObject::plain(None).with_property(a, Type::Int32));
        let mut w = BytecodeWriter::new();
        assign(&mut w, 0, 1);
        w.emit_op(Opcode::Stop);
        let id = constructor(&mut engine, w, &["a"]);

        let object = engine.make_new_type(id, Some(HeapRef(5))).unwrap();
        assert!(engine.object(object).unwrap().new_script.is_none());
    }

    #[test]
    fn test_unknown_script() {
        let mut engine = InferenceEngine::default();
        assert_eq!(
            engine.make_new_type(ScriptId(9), None),
            Err(InferenceError::UnknownScript(ScriptId(9)))
        );
    }
}
