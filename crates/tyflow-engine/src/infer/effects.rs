//! Type-effect rules
//!
//! One rule per opcode, run once over each reachable instruction when a
//! script is analyzed. A rule adds the types it can predict to the sets of
//! the values it pushes and attaches constraints that keep those sets up
//! to date as the sets it reads grow. Values that cannot be predicted come
//! from the observed set of the instruction, filled in by the runtime.

use super::constraint::{CallSite, Constraint};
use super::engine::InferenceEngine;
use super::object::{ObjectFlags, ProtoKind};
use super::types::{PropertyId, Type, TypeObjectId, TypeSetId};
use crate::analysis::{Slot, StackValue};
use smallvec::SmallVec;
use tracing::trace;
use tyflow_bytecode::{Instr, Opcode, Script, ScriptId};

/// State carried between the rules of one analysis pass
#[derive(Debug, Default)]
pub(crate) struct RuleState {
    /// Values produced by `for-in`/`for-each` iterators in the script
    for_types: Option<TypeSetId>,
    /// The last element initializer stored a hole
    has_hole: bool,
}

impl InferenceEngine {
    /// Apply the type-effect rule of one reachable instruction
    pub(crate) fn apply_type_rule(
        &mut self,
        id: ScriptId,
        script: &Script,
        instr: &Instr,
        state: &mut RuleState,
    ) {
        let offset = instr.offset;
        trace!(script = id.0, offset, op = instr.opcode.name(), "type rule");

        match instr.opcode {
            Opcode::Nop
            | Opcode::LoopHead
            | Opcode::Pop
            | Opcode::PopN
            | Opcode::PopV
            | Opcode::Goto
            | Opcode::IfEq
            | Opcode::IfNe
            | Opcode::Default
            | Opcode::TableSwitch
            | Opcode::LookupSwitch
            | Opcode::Try
            | Opcode::Throw
            | Opcode::EnterBlock
            | Opcode::LeaveBlock
            | Opcode::EnterWith
            | Opcode::LeaveWith
            | Opcode::RetRval
            | Opcode::EndIter
            | Opcode::EndInit
            | Opcode::BindName
            | Opcode::BindGName
            | Opcode::Debugger => {}

            // Constants and operators with a fixed result type
            Opcode::Undefined | Opcode::Void => self.push_type(id, offset, Type::Undefined),
            Opcode::Null => self.push_type(id, offset, Type::Null),
            Opcode::Double => self.push_type(id, offset, Type::Double),
            Opcode::String | Opcode::TypeOf => self.push_type(id, offset, Type::String),
            Opcode::Zero
            | Opcode::One
            | Opcode::Int8
            | Opcode::Int32
            | Opcode::ToId
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::BitNot
            | Opcode::Lsh
            | Opcode::Rsh
            | Opcode::Ursh => self.push_type(id, offset, Type::Int32),
            Opcode::True
            | Opcode::False
            | Opcode::Not
            | Opcode::In
            | Opcode::InstanceOf
            | Opcode::DelName
            | Opcode::DelProp
            | Opcode::DelElem
            | Opcode::Lt
            | Opcode::Le
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::Eq
            | Opcode::Ne
            | Opcode::StrictEq
            | Opcode::StrictNe => self.push_type(id, offset, Type::Boolean),
            Opcode::RegExp => {
                let regexp = self.standard_type(ProtoKind::RegExp);
                self.push_type(id, offset, Type::Object(regexp));
            }
            Opcode::Object => {
                let ty = script
                    .objects
                    .get(instr.index_operand() as usize)
                    .map_or(Type::Unknown, |heap| Type::Singleton(*heap));
                self.push_type(id, offset, ty);
            }
            Opcode::Exception | Opcode::Yield | Opcode::XmlName => {
                self.push_type(id, offset, Type::Unknown)
            }

            // Returns
            Opcode::Stop => {
                if script.is_function {
                    let returns = self.return_set(id);
                    self.add_type(returns, Type::Undefined);
                }
            }
            Opcode::Return | Opcode::SetRval => {
                if script.is_function {
                    let value = self.popped_types(id, offset, 0);
                    let returns = self.return_set(id);
                    self.add_subset(value, returns);
                }
            }
            Opcode::Generator => {
                if script.is_function {
                    let generator = self.standard_type(ProtoKind::Generator);
                    let returns = self.return_set(id);
                    self.add_type(returns, Type::Object(generator));
                }
            }

            // Stack shuffles
            Opcode::Or | Opcode::And => self.forward(id, offset, 0, 0),
            Opcode::Case => self.forward(id, offset, 1, 0),
            Opcode::Dup => {
                self.forward(id, offset, 0, 0);
                self.forward(id, offset, 0, 1);
            }
            Opcode::Dup2 => {
                self.forward(id, offset, 1, 0);
                self.forward(id, offset, 0, 1);
                self.forward(id, offset, 1, 2);
                self.forward(id, offset, 0, 3);
            }
            Opcode::Swap | Opcode::Pick => {
                let picked = if instr.opcode == Opcode::Swap {
                    1
                } else {
                    instr.u16_operand()
                };
                // The picked value ends on top, the others shift down one
                self.forward(id, offset, picked, picked);
                for which in 0..picked {
                    self.forward(id, offset, which, picked - 1 - which);
                }
            }

            // Arguments and locals
            Opcode::GetArg | Opcode::CallArg | Opcode::GetLocal | Opcode::CallLocal => {
                let slot = slot_of(instr);
                let slot_types = self.slot_set(id, slot);
                let pushed = self.pushed(id, offset, 0);
                self.add_subset(slot_types, pushed);
                if matches!(instr.opcode, Opcode::CallArg | Opcode::CallLocal) {
                    self.push_call_this(id, offset, Type::Undefined);
                }
            }
            Opcode::SetArg | Opcode::SetLocal => {
                let slot_types = self.slot_set(id, slot_of(instr));
                let value = self.popped_types(id, offset, 0);
                self.add_subset(value, slot_types);
                self.forward(id, offset, 0, 0);
            }
            Opcode::IncArg
            | Opcode::DecArg
            | Opcode::ArgInc
            | Opcode::ArgDec
            | Opcode::IncLocal
            | Opcode::DecLocal
            | Opcode::LocalInc
            | Opcode::LocalDec => {
                let slot_types = self.slot_set(id, slot_of(instr));
                self.add_constraint(
                    slot_types,
                    Constraint::Arith {
                        target: slot_types,
                        other: None,
                    },
                    true,
                );
                let pushed = self.pushed(id, offset, 0);
                self.add_subset(slot_types, pushed);
            }
            Opcode::This => {
                let this_types = self.this_set(id);
                let pushed = self.pushed(id, offset, 0);
                self.add_constraint(this_types, Constraint::TransformThis { script: id, target: pushed }, true);
            }
            Opcode::Arguments => self.arguments_rule(id, offset),
            Opcode::Callee => {
                let ty = self.function_type(id).map_or(Type::Unknown, Type::Object);
                self.push_type(id, offset, ty);
            }
            Opcode::Lambda => {
                let ty = script
                    .functions
                    .get(instr.index_operand() as usize)
                    .and_then(|function| self.function_type(*function))
                    .map_or(Type::Unknown, Type::Object);
                self.push_type(id, offset, ty);
            }

            // Global and scope names
            Opcode::GetGName | Opcode::CallGName => {
                let property = self.atom_property(script, instr);
                let seen = self.observed(id, offset);
                let pushed = self.pushed(id, offset, 0);
                self.add_subset(seen, pushed);

                let well_known = self.well_known;
                if property == PropertyId::Named(well_known.undefined) {
                    self.add_type(seen, Type::Undefined);
                }
                if property == PropertyId::Named(well_known.nan)
                    || property == PropertyId::Named(well_known.infinity)
                {
                    self.add_type(seen, Type::Double);
                }
                let global = self.global_type();
                self.property_access(id, offset, global, false, seen, property);

                if instr.opcode == Opcode::CallGName {
                    self.push_call_this(id, offset, Type::Unknown);
                }
                if self.followed_by_test(id, offset) {
                    self.add_type(pushed, Type::Undefined);
                }
            }
            Opcode::SetGName => {
                let property = self.atom_property(script, instr);
                let value = self.popped_types(id, offset, 0);
                let global = self.global_type();
                self.property_access(id, offset, global, true, value, property);
                self.forward(id, offset, 0, 0);
            }
            Opcode::IncGName | Opcode::GNameInc => {
                let property = self.atom_property(script, instr);
                let seen = self.observed(id, offset);
                let pushed = self.pushed(id, offset, 0);
                let global = self.global_type();
                self.property_access(id, offset, global, false, seen, property);
                self.add_constraint(seen, Constraint::Arith { target: pushed, other: None }, true);
                self.property_access(id, offset, global, true, pushed, property);
            }
            Opcode::Name | Opcode::CallName => {
                let seen = self.observed(id, offset);
                self.add_type_barrier(id, offset, seen, Type::Unknown);
                let pushed = self.pushed(id, offset, 0);
                self.add_subset(seen, pushed);
                if instr.opcode == Opcode::CallName {
                    self.push_call_this(id, offset, Type::Unknown);
                }
            }
            Opcode::SetName => {
                self.monitor_bytecode(id, offset, false);
                self.forward(id, offset, 0, 0);
            }
            Opcode::IncName | Opcode::NameInc => {
                self.monitor_bytecode(id, offset, false);
                self.push_type(id, offset, Type::Unknown);
            }

            // Properties and elements
            Opcode::GetProp | Opcode::CallProp | Opcode::Length => {
                let property = if instr.opcode == Opcode::Length {
                    PropertyId::Named(self.length_atom())
                } else {
                    self.atom_property(script, instr)
                };
                self.read_property(id, instr, 0, property);
            }
            Opcode::GetElem | Opcode::CallElem => {
                self.read_property(id, instr, 1, PropertyId::Elements);
            }
            Opcode::SetProp => {
                let property = self.atom_property(script, instr);
                self.write_property(id, offset, 1, property);
            }
            Opcode::SetElem => self.write_property(id, offset, 2, PropertyId::Elements),
            Opcode::IncProp | Opcode::PropInc => {
                let property = self.atom_property(script, instr);
                self.update_property(id, offset, 0, property);
            }
            Opcode::IncElem | Opcode::ElemInc => {
                self.update_property(id, offset, 1, PropertyId::Elements);
            }

            // Arithmetic
            Opcode::Add => {
                let left = self.popped_types(id, offset, 1);
                let right = self.popped_types(id, offset, 0);
                let pushed = self.pushed(id, offset, 0);
                self.add_constraint(left, Constraint::Arith { target: pushed, other: Some(right) }, true);
                self.add_constraint(right, Constraint::Arith { target: pushed, other: Some(left) }, true);
            }
            Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let pushed = self.pushed(id, offset, 0);
                for which in [0, 1] {
                    let operand = self.popped_types(id, offset, which);
                    self.add_constraint(operand, Constraint::Arith { target: pushed, other: None }, true);
                }
            }
            Opcode::Neg | Opcode::Pos => {
                let pushed = self.pushed(id, offset, 0);
                let operand = self.popped_types(id, offset, 0);
                self.add_constraint(operand, Constraint::Arith { target: pushed, other: None }, true);
            }

            // Calls
            Opcode::Call | Opcode::New | Opcode::Eval | Opcode::FunCall | Opcode::FunApply => {
                self.call_rule(id, instr);
            }

            // Initializers
            Opcode::NewInit | Opcode::NewArray | Opcode::NewObject => {
                let ty = self.initializer_type(id, instr).map_or(Type::Unknown, Type::Object);
                self.push_type(id, offset, ty);
            }
            Opcode::InitElem => {
                match self.literal_type(id, offset, 2) {
                    Some(object) => {
                        self.push_type(id, offset, Type::Object(object));
                        if !self.object(object).map_or(true, |o| o.unknown_properties()) {
                            let elements = self.get_property(object, PropertyId::Elements, true);
                            if state.has_hole {
                                self.set_object_flags(object, ObjectFlags::NON_PACKED_ARRAY);
                            } else {
                                let value = self.popped_types(id, offset, 0);
                                self.add_subset(value, elements);
                            }
                        }
                    }
                    None => self.push_type(id, offset, Type::Unknown),
                }
                state.has_hole = false;
            }
            Opcode::Hole => state.has_hole = true,
            Opcode::InitProp => {
                let property = self.atom_property(script, instr);
                match self.literal_type(id, offset, 1) {
                    Some(object) => {
                        self.push_type(id, offset, Type::Object(object));
                        let well_known = self.well_known;
                        if property == PropertyId::Named(well_known.proto)
                            || property == PropertyId::Named(well_known.prototype)
                        {
                            self.monitor_bytecode(id, offset, false);
                        } else if !self.object(object).map_or(true, |o| o.unknown_properties()) {
                            let types = self.get_property(object, property, true);
                            let value = self.popped_types(id, offset, 0);
                            self.add_subset(value, types);
                        }
                    }
                    None => self.push_type(id, offset, Type::Unknown),
                }
            }
            Opcode::ArrayPush | Opcode::EnumElem => self.monitor_bytecode(id, offset, false),

            // Iteration
            Opcode::Iter => {
                let for_types = self.for_types(state);
                let iterated = self.popped_types(id, offset, 0);
                self.add_subset(iterated, for_types);
                // Bit 0 marks for-each, whose values could be anything
                if instr.u16_operand() & 1 != 0 {
                    self.add_type(for_types, Type::Unknown);
                }
                let pushed = self.pushed(id, offset, 0);
                self.add_subset(pushed, for_types);
            }
            Opcode::IterNext => {
                let for_types = self.for_types(state);
                let pushed = self.pushed(id, offset, 0);
                self.add_type(pushed, Type::String);
                self.add_constraint(for_types, Constraint::Generator { target: pushed }, true);
            }
            Opcode::MoreIter => {
                self.forward(id, offset, 0, 0);
                let more = self.pushed(id, offset, 1);
                self.add_type(more, Type::Boolean);
            }
        }
    }

    /// Set of value `index` pushed at `offset`
    fn pushed(&mut self, script: ScriptId, offset: u32, index: u32) -> TypeSetId {
        match self.pushed_types(script, offset, index) {
            Some(set) => set,
            None => self.unknown_set(),
        }
    }

    fn push_type(&mut self, script: ScriptId, offset: u32, ty: Type) {
        let pushed = self.pushed(script, offset, 0);
        self.add_type(pushed, ty);
    }

    /// Operand `which` flows unchanged into pushed value `index`
    fn forward(&mut self, script: ScriptId, offset: u32, which: u32, index: u32) {
        let popped = self.popped_types(script, offset, which);
        let pushed = self.pushed(script, offset, index);
        self.add_subset(popped, pushed);
    }

    fn observed(&mut self, script: ScriptId, offset: u32) -> TypeSetId {
        match self.bytecode_types(script, offset) {
            Some(set) => set,
            None => self.unknown_set(),
        }
    }

    fn slot_set(&mut self, script: ScriptId, slot: Slot) -> TypeSetId {
        match self.type_script(script).and_then(|types| types.slot_types(slot)) {
            Some(set) => set,
            None => self.unknown_set(),
        }
    }

    fn this_set(&mut self, script: ScriptId) -> TypeSetId {
        match self.type_script(script) {
            Some(types) => types.this_types(),
            None => self.unknown_set(),
        }
    }

    fn return_set(&mut self, script: ScriptId) -> TypeSetId {
        match self.type_script(script) {
            Some(types) => types.return_types(),
            None => self.unknown_set(),
        }
    }

    fn for_types(&mut self, state: &mut RuleState) -> TypeSetId {
        match state.for_types {
            Some(set) => set,
            None => {
                let set = self.new_set();
                state.for_types = Some(set);
                set
            }
        }
    }

    fn atom_property(&mut self, script: &Script, instr: &Instr) -> PropertyId {
        let name = script.atom(instr.index_operand()).unwrap_or_default();
        self.property_id(name)
    }

    /// The value pushed next is only tested for truthiness or type
    fn followed_by_test(&self, script: ScriptId, offset: u32) -> bool {
        self.inference(script)
            .and_then(|inference| inference.flow.next_instr(offset))
            .map_or(false, |next| next.opcode.is_detecting())
    }

    /// `this` for a callee pushed by a call-prefixed opcode
    fn push_call_this(&mut self, script: ScriptId, offset: u32, this_type: Type) {
        let this = self.pushed(script, offset, 1);
        self.add_type(this, this_type);
        let callee = self.pushed(script, offset, 0);
        let call_offset = self.call_pc(script, offset);
        self.add_constraint(
            callee,
            Constraint::PropagateThis {
                script,
                call_offset,
                this_type,
            },
            true,
        );
    }

    /// Property read of operand `object`, through the instruction's observed set
    fn read_property(&mut self, script: ScriptId, instr: &Instr, object: u32, id: PropertyId) {
        let offset = instr.offset;
        let seen = self.observed(script, offset);
        let receivers = self.popped_types(script, offset, object);
        self.add_constraint(
            receivers,
            Constraint::Prop {
                script,
                offset,
                target: seen,
                id,
                assign: false,
            },
            true,
        );
        let is_call = matches!(instr.opcode, Opcode::CallProp | Opcode::CallElem);
        if is_call {
            let call_offset = self.call_pc(script, offset);
            self.add_constraint(receivers, Constraint::CallProp { script, call_offset, id }, true);
        }

        let pushed = self.pushed(script, offset, 0);
        self.add_subset(seen, pushed);
        if is_call {
            let this = self.pushed(script, offset, 1);
            self.add_constraint(
                receivers,
                Constraint::FilterPrimitives {
                    target: this,
                    only_null_void: true,
                },
                true,
            );
        }
        if self.followed_by_test(script, offset) {
            self.add_type(pushed, Type::Undefined);
        }
    }

    /// Property write of the top operand into operand `object`
    fn write_property(&mut self, script: ScriptId, offset: u32, object: u32, id: PropertyId) {
        let value = self.popped_types(script, offset, 0);
        let receivers = self.popped_types(script, offset, object);
        self.add_constraint(
            receivers,
            Constraint::Prop {
                script,
                offset,
                target: value,
                id,
                assign: true,
            },
            true,
        );
        self.forward(script, offset, 0, 0);
    }

    /// Increment or decrement of property `id` of operand `object`
    fn update_property(&mut self, script: ScriptId, offset: u32, object: u32, id: PropertyId) {
        let seen = self.observed(script, offset);
        let receivers = self.popped_types(script, offset, object);
        let pushed = self.pushed(script, offset, 0);
        self.add_constraint(
            receivers,
            Constraint::Prop {
                script,
                offset,
                target: seen,
                id,
                assign: false,
            },
            true,
        );
        self.add_constraint(seen, Constraint::Arith { target: pushed, other: None }, true);
        self.add_constraint(
            receivers,
            Constraint::Prop {
                script,
                offset,
                target: pushed,
                id,
                assign: true,
            },
            true,
        );
    }

    fn arguments_rule(&mut self, script: ScriptId, offset: u32) {
        let pushed = self.pushed(script, offset, 0);
        let lazy = self.function_type(script).filter(|fun| {
            self.object(*fun).map_or(false, |o| {
                !o.unknown_properties() && !o.has_any_flags(ObjectFlags::CREATED_ARGUMENTS)
            })
        });
        match lazy {
            Some(fun) => {
                // Turns the pushed value unknown once an arguments object is created
                let state = self.get_property(fun, PropertyId::Empty, false);
                self.add_constraint(state, Constraint::LazyArguments { target: pushed }, true);
                self.add_type(pushed, Type::LazyArgs);
            }
            None => self.add_type(pushed, Type::Unknown),
        }
    }

    fn call_rule(&mut self, script: ScriptId, instr: &Instr) {
        let offset = instr.offset;
        let argc = instr.u16_operand();
        let seen = self.observed(script, offset);
        let pushed = self.pushed(script, offset, 0);
        self.add_subset(seen, pushed);

        let args: SmallVec<[TypeSetId; 4]> = (0..argc)
            .map(|arg| self.popped_types(script, offset, argc - 1 - arg))
            .collect();
        let this_types = self.popped_types(script, offset, argc);
        let site = self.add_call_site(CallSite {
            script,
            offset,
            is_new: instr.opcode == Opcode::New,
            args,
            this_types,
            return_types: seen,
        });

        // Eval, `call` and `apply` bind their real target only at runtime
        if matches!(instr.opcode, Opcode::Eval | Opcode::FunCall | Opcode::FunApply) {
            self.monitor_bytecode(script, offset, false);
        }
        let callees = self.popped_types(script, offset, argc + 1);
        self.add_constraint(callees, Constraint::Call { site }, true);
    }

    /// Initializer type of the literal that operand `which` at `offset` builds
    fn literal_type(&mut self, script: ScriptId, offset: u32, which: u32) -> Option<TypeObjectId> {
        let producer = {
            let inference = self.inference(script)?;
            let mut value = inference.stack.popped(offset, which);
            // Each initializer step pushes the literal back; walk to its creation
            loop {
                let StackValue::Pushed { offset: at, .. } = value else {
                    return None;
                };
                let instr = inference.flow.instr_at(at)?;
                match instr.opcode {
                    Opcode::InitElem => value = inference.stack.popped(at, 2),
                    Opcode::InitProp => value = inference.stack.popped(at, 1),
                    _ => break instr.clone(),
                }
            }
        };
        self.initializer_type(script, &producer)
    }
}

fn slot_of(instr: &Instr) -> Slot {
    if instr.opcode.is_arg_op() {
        Slot::Arg(instr.u16_operand())
    } else {
        Slot::Local(instr.u16_operand())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::object::{HeapObject, ObjectKind};
    use tyflow_bytecode::{BytecodeWriter, HeapRef};

    fn analyze(engine: &mut InferenceEngine, script: Script) -> ScriptId {
        let id = engine.add_script(script);
        engine.ensure_ran_inference(id).unwrap();
        id
    }

    fn pushed(engine: &InferenceEngine, id: ScriptId, offset: usize, index: u32) -> TypeSetId {
        engine.pushed_types(id, offset as u32, index).unwrap()
    }

    #[test]
    fn test_constant_rules() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        let int = w.emit_int(7);
        w.emit_op(Opcode::Pop);
        let double = w.emit_double(0.5);
        w.emit_op(Opcode::Pop);
        let null = w.emit_op(Opcode::Null);
        let not = w.emit_op(Opcode::Not);
        let typeof_ = w.emit_op(Opcode::TypeOf);
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::Stop);
        let id = analyze(&mut engine, Script::new(ScriptId(1), "consts", w.into_bytes()));

        assert_eq!(engine.set(pushed(&engine, id, int, 0)).types().as_slice(), &[Type::Int32]);
        assert_eq!(engine.set(pushed(&engine, id, double, 0)).types().as_slice(), &[Type::Double]);
        assert_eq!(engine.set(pushed(&engine, id, null, 0)).types().as_slice(), &[Type::Null]);
        assert_eq!(engine.set(pushed(&engine, id, not, 0)).types().as_slice(), &[Type::Boolean]);
        assert_eq!(engine.set(pushed(&engine, id, typeof_, 0)).types().as_slice(), &[Type::String]);

        let returns = engine.type_script(id).unwrap().return_types();
        assert!(engine.set(returns).has_type(Type::Undefined));
    }

    #[test]
    fn test_swap_exchanges_types() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        w.emit_int(1);
        w.emit_op(Opcode::Null);
        let swap = w.emit_op(Opcode::Swap);
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::Stop);
        let id = analyze(&mut engine, Script::new(ScriptId(1), "swap", w.into_bytes()));

        assert_eq!(engine.set(pushed(&engine, id, swap, 0)).types().as_slice(), &[Type::Null]);
        assert_eq!(engine.set(pushed(&engine, id, swap, 1)).types().as_slice(), &[Type::Int32]);
    }

    #[test]
    fn test_dup2_copies_pair() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        w.emit_int(1);
        w.emit_op(Opcode::True);
        let dup2 = w.emit_op(Opcode::Dup2);
        w.emit_op_u16(Opcode::PopN, 4);
        w.emit_op(Opcode::Stop);
        let id = analyze(&mut engine, Script::new(ScriptId(1), "dup2", w.into_bytes()));

        for (index, ty) in [(0, Type::Int32), (1, Type::Boolean), (2, Type::Int32), (3, Type::Boolean)] {
            assert_eq!(engine.set(pushed(&engine, id, dup2, index)).types().as_slice(), &[ty]);
        }
    }

    #[test]
    fn test_global_undefined_and_nan() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        let undefined = w.emit_get_gname(0);
        w.emit_op(Opcode::Pop);
        let nan = w.emit_get_gname(1);
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::Stop);
        let id = analyze(
            &mut engine,
            Script {
                atoms: vec!["undefined".into(), "NaN".into()],
                ..Script::new(ScriptId(1), "globals", w.into_bytes())
            },
        );
        assert!(engine.set(pushed(&engine, id, undefined, 0)).has_type(Type::Undefined));
        assert!(engine.set(pushed(&engine, id, nan, 0)).has_type(Type::Double));
    }

    #[test]
    fn test_detected_reads_may_be_undefined() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0);
        let get = w.emit_get_prop(0);
        let branch = w.emit_forward_jump(Opcode::IfEq);
        w.patch_jump(branch);
        w.emit_op(Opcode::Stop);
        let id = analyze(
            &mut engine,
            Script {
                nargs: 1,
                atoms: vec!["f".into()],
                ..Script::new(ScriptId(1), "test", w.into_bytes())
            },
        );
        assert!(engine.set(pushed(&engine, id, get, 0)).has_type(Type::Undefined));
    }

    #[test]
    fn test_call_links_arguments_and_result() {
        let mut engine = InferenceEngine::default();

        // function id(x) { return x; }
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0);
        w.emit_op(Opcode::Return);
        let callee = engine.add_script(Script {
            nargs: 1,
            ..Script::new(ScriptId(2), "id", w.into_bytes())
        });
        engine.register_object(HeapRef(1), HeapObject::function(callee, None));

        // return id(1)
        let mut w = BytecodeWriter::new();
        let get = w.emit_get_gname(0);
        w.emit_op(Opcode::Undefined);
        w.emit_int(1);
        let call = w.emit_call(1);
        w.emit_op(Opcode::Return);
        let caller = analyze(
            &mut engine,
            Script {
                atoms: vec!["id".into()],
                ..Script::new(ScriptId(1), "caller", w.into_bytes())
            },
        );

        // The runtime observes the callee at the global read
        let seen = engine.type_script(caller).unwrap().observed_types(get as u32).unwrap();
        engine.add_type(seen, Type::Singleton(HeapRef(1)));

        // Arguments cross the call through a barrier
        let formal = engine.type_script(callee).unwrap().arg_types()[0];
        assert!(engine.set(formal).is_empty());
        assert_eq!(engine.type_barriers(caller, call as u32).len(), 1);

        engine.add_type(formal, Type::Int32);
        let result = pushed(&engine, caller, call, 0);
        assert!(engine.set(result).has_type(Type::Int32));
        let returns = engine.type_script(caller).unwrap().return_types();
        assert!(engine.set(returns).has_type(Type::Int32));
    }

    #[test]
    fn test_call_prop_propagates_receiver() {
        let mut engine = InferenceEngine::default();

        // function m() { return this; }
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::This);
        w.emit_op(Opcode::Return);
        let method = engine.add_script(Script::new(ScriptId(2), "m", w.into_bytes()));
        engine.register_object(HeapRef(1), HeapObject::function(method, None));

        // arg0.m()
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0);
        let call_prop = w.emit_op_u32(Opcode::CallProp, 0);
        w.emit_call(0);
        w.emit_op(Opcode::Return);
        let caller = analyze(
            &mut engine,
            Script {
                nargs: 1,
                atoms: vec!["m".into()],
                ..Script::new(ScriptId(1), "caller", w.into_bytes())
            },
        );

        let object = engine.new_type_object("receiver", None, ProtoKind::Object);
        let m = engine.property_id("m");
        engine.add_property_type(object, m, Type::Singleton(HeapRef(1)));
        let arg = engine.type_script(caller).unwrap().arg_types()[0];
        engine.add_type(arg, Type::Object(object));

        let this = pushed(&engine, caller, call_prop, 1);
        assert!(engine.set(this).has_type(Type::Object(object)));
        let method_this = engine.type_script(method).unwrap().this_types();
        assert!(engine.set(method_this).has_type(Type::Object(object)));
        assert_eq!(
            engine.heap_object(HeapRef(1)).map(|o| o.kind.clone()),
            Some(ObjectKind::Function(method))
        );
    }

    #[test]
    fn test_array_literal_elements() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        let new = w.emit_op_u32(Opcode::NewArray, 2);
        w.emit_op(Opcode::Zero);
        w.emit_string(0);
        let first = w.emit_op(Opcode::InitElem);
        w.emit_op(Opcode::One);
        w.emit_op(Opcode::Hole);
        w.emit_op(Opcode::InitElem);
        w.emit_op(Opcode::EndInit);
        w.emit_op(Opcode::Return);
        let id = analyze(&mut engine, Script::new(ScriptId(1), "literal", w.into_bytes()));

        let literal = engine.set(pushed(&engine, id, new, 0)).types()[0];
        let Type::Object(object) = literal else {
            panic!("expected an object type, got {literal}");
        };
        assert!(engine.set(pushed(&engine, id, first, 0)).has_type(literal));
        let elements = engine.get_property(object, PropertyId::Elements, false);
        assert!(engine.set(elements).has_type(Type::String));
        assert!(engine
            .object(object)
            .unwrap()
            .has_any_flags(ObjectFlags::NON_PACKED_ARRAY));
    }

    #[test]
    fn test_object_literal_properties() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        w.emit_op_u8(Opcode::NewInit, 0);
        w.emit_double(1.5);
        w.emit_op_u32(Opcode::InitProp, 0);
        w.emit_op(Opcode::True);
        let last = w.emit_op_u32(Opcode::InitProp, 1);
        w.emit_op(Opcode::EndInit);
        w.emit_op(Opcode::Return);
        let id = analyze(
            &mut engine,
            Script {
                atoms: vec!["x".into(), "y".into()],
                ..Script::new(ScriptId(1), "object", w.into_bytes())
            },
        );

        let Type::Object(object) = engine.set(pushed(&engine, id, last, 0)).types()[0] else {
            panic!("expected an object type");
        };
        let x = engine.property_id("x");
        let y = engine.property_id("y");
        let xs = engine.get_property(object, x, false);
        let ys = engine.get_property(object, y, false);
        assert!(engine.set(xs).has_type(Type::Double));
        assert!(engine.set(ys).has_type(Type::Boolean));
    }

    #[test]
    fn test_for_in_yields_strings() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0);
        w.emit_op_u8(Opcode::Iter, 0);
        let head = w.offset();
        w.emit_op(Opcode::LoopHead);
        let next = w.emit_op(Opcode::IterNext);
        w.emit_set_local(0);
        w.emit_op(Opcode::Pop);
        let more = w.emit_op(Opcode::MoreIter);
        w.emit_jump(Opcode::IfNe, head);
        w.emit_op(Opcode::EndIter);
        w.emit_op(Opcode::Stop);
        let id = analyze(
            &mut engine,
            Script {
                nargs: 1,
                nfixed: 1,
                ..Script::new(ScriptId(1), "forin", w.into_bytes())
            },
        );

        assert!(engine.set(pushed(&engine, id, next, 0)).has_type(Type::String));
        assert!(engine.set(pushed(&engine, id, more, 1)).has_type(Type::Boolean));
        let local = engine.type_script(id).unwrap().local_types()[0];
        assert!(engine.set(local).has_type(Type::String));
    }

    #[test]
    fn test_arguments_become_unknown_when_created() {
        let mut engine = InferenceEngine::default();
        let mut w = BytecodeWriter::new();
        let args = w.emit_op(Opcode::Arguments);
        w.emit_op(Opcode::Length);
        w.emit_op(Opcode::Return);
        let id = analyze(
            &mut engine,
            Script {
                uses_arguments: true,
                ..Script::new(ScriptId(1), "count", w.into_bytes())
            },
        );
        let value = pushed(&engine, id, args, 0);
        assert_eq!(engine.set(value).types().as_slice(), &[Type::LazyArgs]);

        engine.mark_arguments_created(id);
        assert!(engine.set(value).is_unknown());
    }
}
