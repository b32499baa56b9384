//! Script registry and the inference pass driver
//!
//! Every script known to the engine owns a `TypeScript`: the type sets of
//! `this`, its arguments, its locals, its return value and the observed
//! results of its typeset opcodes. Running inference over a script creates
//! one pushed set per stack value, applies the type-effect rules in offset
//! order, and wires the values carried into each join.

use super::barrier::TypeBarrier;
use super::effects::RuleState;
use super::engine::InferenceEngine;
use super::object::{ObjectFlags, ProtoKind};
use super::types::{Type, TypeObjectId, TypeSetId};
use crate::analysis::{InstrFlags, ScriptAnalysis, Slot, StackAnalysis, StackUse, StackValue};
use crate::error::{AnalysisError, InferenceError, InferenceResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;
use tracing::{debug, trace, warn};
use tyflow_bytecode::{Opcode, Script, ScriptId};

/// A type the runtime saw an opcode produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicResult {
    pub offset: u32,
    pub ty: Type,
}

/// Type sets describing one script's inputs and outputs
#[derive(Debug, Clone)]
pub struct TypeScript {
    this_types: TypeSetId,
    arg_types: Vec<TypeSetId>,
    local_types: Vec<TypeSetId>,
    return_types: TypeSetId,
    pub(crate) bytecode: FxHashMap<u32, TypeSetId>,
    pub(crate) dynamic: Vec<DynamicResult>,
}

impl TypeScript {
    /// Types of `this`
    pub fn this_types(&self) -> TypeSetId {
        self.this_types
    }

    /// Types of each formal argument
    pub fn arg_types(&self) -> &[TypeSetId] {
        &self.arg_types
    }

    /// Types of each fixed local
    pub fn local_types(&self) -> &[TypeSetId] {
        &self.local_types
    }

    /// Types of the returned value
    pub fn return_types(&self) -> TypeSetId {
        self.return_types
    }

    /// Types of a frame slot
    pub fn slot_types(&self, slot: Slot) -> Option<TypeSetId> {
        match slot {
            Slot::This => Some(self.this_types),
            Slot::Arg(i) => self.arg_types.get(i as usize).copied(),
            Slot::Local(i) => self.local_types.get(i as usize).copied(),
        }
    }

    /// Observed result types of the typeset opcode at `offset`, if any were recorded
    pub fn observed_types(&self, offset: u32) -> Option<TypeSetId> {
        self.bytecode.get(&offset).copied()
    }

    /// Results reported for opcodes whose effect inference does not model
    pub fn dynamic_results(&self) -> &[DynamicResult] {
        &self.dynamic
    }
}

/// Results of running inference over one script
#[derive(Debug, Clone)]
pub(crate) struct ScriptInference {
    pub(crate) flow: Rc<ScriptAnalysis>,
    pub(crate) stack: Rc<StackAnalysis>,
    pub(crate) pushed: FxHashMap<(u32, u32), TypeSetId>,
    pub(crate) joins: FxHashMap<(u32, u32), TypeSetId>,
    pub(crate) barriers: FxHashMap<u32, Vec<TypeBarrier>>,
    pub(crate) monitored: FxHashSet<u32>,
    pub(crate) monitored_return: FxHashSet<u32>,
}

impl ScriptInference {
    fn new(flow: Rc<ScriptAnalysis>, stack: Rc<StackAnalysis>) -> Self {
        Self {
            flow,
            stack,
            pushed: FxHashMap::default(),
            joins: FxHashMap::default(),
            barriers: FxHashMap::default(),
            monitored: FxHashSet::default(),
            monitored_return: FxHashSet::default(),
        }
    }
}

/// A script registered with the engine
#[derive(Debug, Clone)]
pub(crate) struct ScriptEntry {
    pub(crate) script: Rc<Script>,
    pub(crate) types: TypeScript,
    pub(crate) function_type: Option<TypeObjectId>,
    pub(crate) inference: Option<ScriptInference>,
    pub(crate) analysis_failed: bool,
    pub(crate) created_arguments: bool,
    pub(crate) used_lazy_args: bool,
}

impl InferenceEngine {
    /// Register a script; its input and output type sets start empty
    pub fn add_script(&mut self, script: Script) -> ScriptId {
        let id = script.id;
        let this_types = self.new_set();
        let arg_types = (0..script.nargs).map(|_| self.new_set()).collect();
        let local_types = (0..script.nfixed).map(|_| self.new_set()).collect();
        let return_types = self.new_set();
        debug!(script = id.0, name = %script.name, "add script");

        let entry = ScriptEntry {
            script: Rc::new(script),
            types: TypeScript {
                this_types,
                arg_types,
                local_types,
                return_types,
                bytecode: FxHashMap::default(),
                dynamic: Vec::new(),
            },
            function_type: None,
            inference: None,
            analysis_failed: false,
            created_arguments: false,
            used_lazy_args: false,
        };
        self.scripts.insert(id, entry);
        id
    }

    /// The script as registered
    pub fn script_source(&self, id: ScriptId) -> Option<&Script> {
        self.scripts.get(&id).map(|entry| entry.script.as_ref())
    }

    /// Type sets of a registered script
    pub fn type_script(&self, id: ScriptId) -> Option<&TypeScript> {
        self.scripts.get(&id).map(|entry| &entry.types)
    }

    /// Check whether inference has run over a script
    pub fn ran_inference(&self, id: ScriptId) -> bool {
        self.scripts
            .get(&id)
            .map_or(false, |entry| entry.inference.is_some())
    }

    /// The lazily-named arguments of the script never escape
    pub fn used_lazy_args(&self, id: ScriptId) -> bool {
        self.scripts.get(&id).map_or(false, |entry| entry.used_lazy_args)
    }

    /// Flow analysis computed while inferring a script
    pub fn flow_analysis(&self, id: ScriptId) -> Option<&ScriptAnalysis> {
        self.inference(id).map(|inference| inference.flow.as_ref())
    }

    pub(crate) fn inference(&self, id: ScriptId) -> Option<&ScriptInference> {
        self.scripts.get(&id)?.inference.as_ref()
    }

    pub(crate) fn inference_mut(&mut self, id: ScriptId) -> Option<&mut ScriptInference> {
        self.scripts.get_mut(&id)?.inference.as_mut()
    }

    /// Type object of the function running a script, created on first use
    pub fn function_type(&mut self, id: ScriptId) -> Option<TypeObjectId> {
        let entry = self.scripts.get(&id)?;
        if let Some(object) = entry.function_type {
            return Some(object);
        }
        let name = entry.script.name.clone();
        let proto = self.prototype(ProtoKind::Function);
        let object = self.new_type_object(name, proto, ProtoKind::Function);
        if let Some(o) = self.object_mut(object) {
            o.function_script = Some(id);
        }
        if let Some(entry) = self.scripts.get_mut(&id) {
            entry.function_type = Some(object);
        }
        Some(object)
    }

    /// Observed result types of the typeset opcode at `offset`, created on first use
    pub fn bytecode_types(&mut self, script: ScriptId, offset: u32) -> Option<TypeSetId> {
        let existing = self.scripts.get(&script)?.types.bytecode.get(&offset).copied();
        if existing.is_some() {
            return existing;
        }
        let set = self.new_set();
        self.scripts.get_mut(&script)?.types.bytecode.insert(offset, set);
        Some(set)
    }

    /// Type set of value `index` pushed at `offset`
    pub fn pushed_types(&self, script: ScriptId, offset: u32, index: u32) -> Option<TypeSetId> {
        self.inference(script)?.pushed.get(&(offset, index)).copied()
    }

    /// Type set of operand `which` (0 = top) popped at `offset`
    pub fn popped_types(&mut self, script: ScriptId, offset: u32, which: u32) -> TypeSetId {
        let value = self
            .inference(script)
            .map_or(StackValue::Unknown, |inference| inference.stack.popped(offset, which));
        self.value_types(script, value)
    }

    /// Type set of a named stack value
    pub(crate) fn value_types(&mut self, script: ScriptId, value: StackValue) -> TypeSetId {
        let known = self.inference(script).and_then(|inference| match value {
            StackValue::Pushed { offset, index } => inference.pushed.get(&(offset, index)).copied(),
            StackValue::Join { target, slot } => inference.joins.get(&(target, slot)).copied(),
            StackValue::Unknown => None,
        });
        match known {
            Some(set) => set,
            None => self.unknown_set(),
        }
    }

    /// Run inference over a script unless it already ran
    pub fn ensure_ran_inference(&mut self, id: ScriptId) -> InferenceResult<()> {
        if !self.is_enabled() {
            return Err(InferenceError::TypesNuked);
        }
        let entry = self.scripts.get(&id).ok_or(InferenceError::UnknownScript(id))?;
        if entry.inference.is_some() || entry.analysis_failed {
            return Ok(());
        }
        self.analyze_types(id)
    }

    /// Build the constraint graph of a script
    pub fn analyze_types(&mut self, id: ScriptId) -> InferenceResult<()> {
        let entry = self.scripts.get(&id).ok_or(InferenceError::UnknownScript(id))?;
        let script = entry.script.clone();
        let return_types = entry.types.return_types;
        self.stats.analyses += 1;
        debug!(script = id.0, name = %script.name, "analyzing types");

        let flow = match ScriptAnalysis::analyze(&script, &self.config) {
            Ok(flow) => flow,
            Err(err) => {
                warn!(script = id.0, %err, "analysis failed, script is fully dynamic");
                if let Some(entry) = self.scripts.get_mut(&id) {
                    entry.analysis_failed = true;
                }
                self.add_type(return_types, Type::Unknown);
                return Err(err.into());
            }
        };
        if flow.out_of_memory() {
            self.set_pending_nuke_types();
            self.flush_nuke();
            return Err(AnalysisError::OutOfMemory.into());
        }
        let stack = StackAnalysis::analyze(&flow);
        let flow = Rc::new(flow);
        let stack = Rc::new(stack);

        // Installed before any rule runs so reentrant analysis of this script is a no-op
        let mut inference = ScriptInference::new(flow.clone(), stack.clone());
        for instr in flow.reachable() {
            for index in 0..instr.defs() {
                inference.pushed.insert((instr.offset, index), self.new_set());
            }
            if flow.has_flag(instr.offset, InstrFlags::JUMP_TARGET) {
                let depth = flow.stack_depth(instr.offset).unwrap_or(0);
                for slot in 0..depth {
                    inference.joins.insert((instr.offset, slot), self.new_set());
                }
            }
        }
        if let Some(entry) = self.scripts.get_mut(&id) {
            entry.inference = Some(inference);
        }

        let local_types = self
            .type_script(id)
            .map(|types| types.local_types().to_vec())
            .unwrap_or_default();
        for (local, set) in local_types.iter().enumerate() {
            let local = local as u32;
            if flow.local_has_use_before_def(local) || flow.local_escapes(local) {
                self.add_type(*set, Type::Undefined);
            }
        }

        let mut state = RuleState::default();
        for instr in flow.reachable() {
            self.apply_type_rule(id, &script, instr, &mut state);
        }

        for target in stack.join_targets() {
            for edge in stack.incoming(target) {
                for (slot, value) in edge.iter().enumerate() {
                    let Some(join) = self.inference(id).and_then(|i| i.joins.get(&(target, slot as u32)).copied()) else {
                        continue;
                    };
                    let from = self.value_types(id, *value);
                    self.add_subset(from, join);
                }
            }
        }

        let dynamic = self
            .type_script(id)
            .map(|types| types.dynamic.clone())
            .unwrap_or_default();
        for result in dynamic {
            if let Some(pushed) = self.pushed_types(id, result.offset, 0) {
                self.add_type(pushed, result.ty);
            }
        }

        self.analyze_arguments(id, &script, &flow, &stack);

        trace!(script = id.0, sets = self.live_set_count(), "type analysis finished");
        self.flush_nuke();
        if self.is_enabled() {
            Ok(())
        } else {
            Err(InferenceError::TypesNuked)
        }
    }

    /// Decide whether the script's arguments may stay lazy
    fn analyze_arguments(&mut self, id: ScriptId, script: &Script, flow: &ScriptAnalysis, stack: &StackAnalysis) {
        let created = self.scripts.get(&id).map_or(true, |entry| entry.created_arguments);
        if !script.uses_arguments || created {
            return;
        }
        if script.heavyweight || self.config.debug_mode {
            self.mark_arguments_created(id);
            return;
        }
        let mut seen = FxHashSet::default();
        for instr in flow.reachable() {
            if instr.opcode != Opcode::Arguments {
                continue;
            }
            let value = StackValue::Pushed {
                offset: instr.offset,
                index: 0,
            };
            if !follow_escaping_arguments(flow, stack, value, &mut seen) {
                debug!(script = id.0, offset = instr.offset, "arguments escape");
                self.mark_arguments_created(id);
                return;
            }
        }
        if let Some(entry) = self.scripts.get_mut(&id) {
            entry.used_lazy_args = true;
        }
    }

    /// An arguments object exists, or may exist, for the script's frames
    pub fn mark_arguments_created(&mut self, id: ScriptId) {
        let Some(entry) = self.scripts.get_mut(&id) else {
            return;
        };
        if entry.created_arguments {
            return;
        }
        entry.created_arguments = true;
        debug!(script = id.0, "arguments created");
        if let Some(fun) = self.function_type(id) {
            self.set_object_flags(fun, ObjectFlags::CREATED_ARGUMENTS | ObjectFlags::UNINLINEABLE);
        }
    }

    /// Offset of the call consuming the callee pushed at `offset`, or `offset` itself
    pub fn call_pc(&self, script: ScriptId, offset: u32) -> u32 {
        let Some(inference) = self.inference(script) else {
            return offset;
        };
        let callee = StackValue::Pushed { offset, index: 0 };
        inference
            .stack
            .uses_of(callee)
            .iter()
            .find_map(|consumer| match *consumer {
                StackUse::Popped { offset: call, .. } => inference
                    .flow
                    .instr_at(call)
                    .filter(|instr| instr.opcode.is_invoke())
                    .map(|_| call),
                StackUse::Joined { .. } => None,
            })
            .unwrap_or(offset)
    }

    /// Results of the opcode at `offset` must be observed at runtime
    ///
    /// With `return_only` only the result of a call is monitored, not its
    /// arguments.
    pub fn monitor_bytecode(&mut self, script: ScriptId, offset: u32, return_only: bool) {
        let Some(inference) = self.inference_mut(script) else {
            return;
        };
        let already = if return_only {
            inference.monitored_return.contains(&offset)
        } else {
            inference.monitored.contains(&offset)
        };
        if already {
            return;
        }
        let invoke = inference
            .flow
            .instr_at(offset)
            .map_or(false, |instr| instr.opcode.is_invoke());
        if invoke {
            inference.monitored_return.insert(offset);
        }
        if !return_only {
            inference.monitored.insert(offset);
        }
        debug!(script = script.0, offset, return_only, "monitor bytecode");

        self.add_pending_recompile(script);
        self.recompile_inline_callers(script);
    }

    /// Check whether every value pushed at `offset` is observed at runtime
    pub fn is_monitored(&self, script: ScriptId, offset: u32) -> bool {
        self.inference(script)
            .map_or(false, |inference| inference.monitored.contains(&offset))
    }

    /// Check whether the call result at `offset` is observed at runtime
    pub fn is_monitored_return(&self, script: ScriptId, offset: u32) -> bool {
        self.inference(script)
            .map_or(false, |inference| inference.monitored_return.contains(&offset))
    }

    /// Code that inlined the script depends on its function type's state
    pub(crate) fn recompile_inline_callers(&mut self, script: ScriptId) {
        let fun = self.scripts.get(&script).and_then(|entry| entry.function_type);
        if let Some(fun) = fun {
            self.object_state_change(fun, false, true);
        }
    }

    #[cfg(test)]
    pub(crate) fn add_test_script(&mut self, name: &str, compiled: bool) -> ScriptId {
        let id = ScriptId(self.scripts.keys().map(|s| s.0 + 1).max().unwrap_or(0));
        let code = vec![Opcode::Stop.to_u8()];
        self.add_script(Script::new(id, name, code));
        if compiled {
            self.mark_compiled(id);
        }
        id
    }
}

/// Check that the lazy arguments named by `value` never escape
fn follow_escaping_arguments(
    flow: &ScriptAnalysis,
    stack: &StackAnalysis,
    value: StackValue,
    seen: &mut FxHashSet<StackValue>,
) -> bool {
    if !seen.insert(value) {
        return true;
    }
    stack
        .uses_of(value)
        .iter()
        .all(|consumer| follow_argument_use(flow, stack, *consumer, seen))
}

fn follow_argument_use(
    flow: &ScriptAnalysis,
    stack: &StackAnalysis,
    consumer: StackUse,
    seen: &mut FxHashSet<StackValue>,
) -> bool {
    let (offset, which) = match consumer {
        StackUse::Joined { target, slot } => {
            return follow_escaping_arguments(flow, stack, StackValue::Join { target, slot }, seen);
        }
        StackUse::Popped { offset, which } => (offset, which),
    };
    let Some(instr) = flow.instr_at(offset) else {
        return false;
    };
    match instr.opcode {
        Opcode::Pop | Opcode::PopN | Opcode::Length => true,
        // Integer indexes are checked at the access
        Opcode::GetElem => which == 1,
        Opcode::SetLocal => {
            let local = instr.u16_operand();
            if flow.local_escapes(local) {
                return false;
            }
            let stored = StackValue::Pushed { offset, index: 0 };
            if !follow_escaping_arguments(flow, stack, stored, seen) {
                return false;
            }
            flow.reachable()
                .filter(|read| {
                    matches!(read.opcode, Opcode::GetLocal | Opcode::CallLocal)
                        && read.u16_operand() == local
                })
                .all(|read| {
                    let value = StackValue::Pushed {
                        offset: read.offset,
                        index: 0,
                    };
                    follow_escaping_arguments(flow, stack, value, seen)
                })
        }
        _ => false,
    }
}
