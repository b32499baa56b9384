//! Types observed by the runtime
//!
//! The interpreter reports values the rules could not predict: results of
//! observed-type opcodes, overflowing arithmetic and the actual `this` and
//! arguments of calls. Each report only ever widens the type graph.

use super::engine::InferenceEngine;
use super::script::DynamicResult;
use super::types::Type;
use crate::analysis::Slot;
use tracing::debug;
use tyflow_bytecode::{decode_instr, ScriptId};

impl InferenceEngine {
    /// Record that the instruction at `offset` pushed a value of type `ty`
    ///
    /// Observed-type opcodes take the type into their observed set. Any
    /// other opcode produced a type its rule did not predict: the type is
    /// kept as a dynamic result, replayed whenever the script is analyzed,
    /// and code that inlined the script is recompiled.
    pub fn report_observed_type(&mut self, script: ScriptId, offset: u32, ty: Type) {
        if !self.is_enabled() {
            return;
        }
        let Some(instr) = self
            .script_source(script)
            .and_then(|source| decode_instr(&source.code, offset as usize).ok())
        else {
            return;
        };

        if instr.opcode.is_typeset() {
            if let Some(seen) = self.bytecode_types(script, offset) {
                self.add_type(seen, ty);
            }
            self.flush_nuke();
            return;
        }

        // An overflowing increment also changed the slot it updated
        if instr.opcode.is_inc_dec() && (instr.opcode.is_arg_op() || instr.opcode.is_local_op()) {
            let index = instr.u16_operand();
            let slot = if instr.opcode.is_arg_op() {
                Slot::Arg(index)
            } else {
                Slot::Local(index)
            };
            if let Some(set) = self.type_script(script).and_then(|types| types.slot_types(slot)) {
                self.add_type(set, ty);
            }
        }

        let ran = self.ran_inference(script);
        if ran {
            let known = self
                .pushed_types(script, offset, 0)
                .map_or(false, |pushed| self.set(pushed).has_type(ty));
            if known {
                return;
            }
        } else if let Some(entry) = self.scripts.get_mut(&script) {
            let dynamic = &mut entry.types.dynamic;
            if let Some(position) = dynamic
                .iter()
                .position(|result| result.offset == offset && result.ty == ty)
            {
                // Most recently reported first
                let result = dynamic.remove(position);
                dynamic.insert(0, result);
                return;
            }
        }

        debug!(script = script.0, offset, %ty, "dynamic result");
        if let Some(entry) = self.scripts.get_mut(&script) {
            entry.types.dynamic.insert(0, DynamicResult { offset, ty });
        }
        if ran {
            if let Some(pushed) = self.pushed_types(script, offset, 0) {
                self.add_type(pushed, ty);
            }
        }
        self.recompile_inline_callers(script);
        self.flush_nuke();
    }

    /// Record the actual `this` and arguments of a call to `callee`
    ///
    /// Formals beyond the supplied arguments receive `undefined`; extra
    /// arguments are only reachable through the arguments object.
    pub fn report_observed_call(&mut self, callee: ScriptId, this: Type, args: &[Type], constructing: bool) {
        if !self.is_enabled() {
            return;
        }
        let Some(types) = self.type_script(callee) else {
            return;
        };
        let this_types = types.this_types();
        let formals = types.arg_types().to_vec();

        if !constructing && !self.set(this_types).has_type(this) {
            self.add_type(this_types, this);
        }
        for (index, formal) in formals.iter().enumerate() {
            let ty = args.get(index).copied().unwrap_or(Type::Undefined);
            if !self.set(*formal).has_type(ty) {
                self.add_type(*formal, ty);
            }
        }
        self.flush_nuke();
    }
}
