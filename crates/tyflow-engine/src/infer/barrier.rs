//! Type barriers
//!
//! A barrier records that a type may reach `target` at an offset without
//! having been added to it. Compiled code checks the value at the barrier
//! and falls back when it sees the type, keeping `target` precise for the
//! common case.

use super::engine::InferenceEngine;
use super::types::{Type, TypeSetId};
use crate::analysis::StackValue;
use tracing::trace;
use tyflow_bytecode::{Opcode, ScriptId};

/// A type withheld from a set at one offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeBarrier {
    pub target: TypeSetId,
    pub ty: Type,
}

impl InferenceEngine {
    /// Check whether reads at `offset` guard their result with barriers
    ///
    /// Calls guard their argument bindings directly, so only non-invoking
    /// observed-type opcodes use property barriers.
    pub(crate) fn use_property_type_barrier(&self, script: ScriptId, offset: u32) -> bool {
        if !self.config.use_property_type_barriers {
            return false;
        }
        self.inference(script)
            .and_then(|inference| inference.flow.instr_at(offset))
            .map_or(false, |instr| instr.opcode.is_typeset() && !instr.opcode.is_invoke())
    }

    /// Withhold `ty` from `target` at `offset`
    pub fn add_type_barrier(&mut self, script: ScriptId, offset: u32, target: TypeSetId, ty: Type) {
        if ty.is_object() && self.set(target).object_count() >= self.config.barrier_object_limit {
            // Enough objects already: guarding one more buys nothing
            self.add_type(target, ty);
            return;
        }
        let Some(inference) = self.inference_mut(script) else {
            self.add_type(target, ty);
            return;
        };
        let barriers = inference.barriers.entry(offset).or_default();
        let first = barriers.is_empty();
        let barrier = TypeBarrier { target, ty };
        if barriers.contains(&barrier) {
            return;
        }
        barriers.push(barrier);
        trace!(script = script.0, offset, set = target.0, %ty, "type barrier");
        self.stats.barriers += 1;

        // Existing barriers already force recompilation when violated
        if first {
            self.add_pending_recompile(script);
            self.recompile_inline_callers(script);
        }
    }

    /// Barriers currently guarding `offset`
    pub fn type_barriers(&self, script: ScriptId, offset: u32) -> &[TypeBarrier] {
        self.inference(script)
            .and_then(|inference| inference.barriers.get(&offset))
            .map_or(&[], Vec::as_slice)
    }

    /// Drop barriers whose type has since reached their target
    pub fn prune_type_barriers(&mut self, script: ScriptId, offset: u32) {
        let Some(barriers) = self
            .scripts
            .get_mut(&script)
            .and_then(|entry| entry.inference.as_mut())
            .and_then(|inference| inference.barriers.get_mut(&offset))
        else {
            return;
        };
        let sets = &self.sets;
        barriers.retain(|barrier| !sets[barrier.target.index()].has_type(barrier.ty));
    }

    /// Remove barriers at `offset` by adding their types to the targets
    ///
    /// Without `all`, only object barriers on targets already past the
    /// barrier object limit are broken.
    pub fn break_type_barriers(&mut self, script: ScriptId, offset: u32, all: bool) {
        let Some(barriers) = self
            .inference_mut(script)
            .and_then(|inference| inference.barriers.remove(&offset))
        else {
            return;
        };
        let limit = self.config.barrier_object_limit;
        let mut kept = Vec::new();
        for barrier in barriers {
            let target = self.set(barrier.target);
            if target.has_type(barrier.ty) {
                continue;
            }
            let over_limit = barrier.ty.is_object() && target.object_count() >= limit;
            if all || over_limit {
                self.add_type(barrier.target, barrier.ty);
            } else {
                kept.push(barrier);
            }
        }
        if kept.is_empty() {
            return;
        }
        if let Some(inference) = self.inference_mut(script) {
            inference.barriers.entry(offset).or_default().extend(kept);
        }
    }

    /// Break every barrier on the reads producing `value`
    pub(crate) fn break_type_barriers_value(&mut self, script: ScriptId, value: StackValue) {
        let StackValue::Pushed { offset, .. } = value else {
            return;
        };
        let object = self.inference(script).and_then(|inference| {
            let instr = inference.flow.instr_at(offset)?;
            (instr.opcode == Opcode::GetProp).then(|| inference.stack.popped(offset, 0))
        });
        if let Some(object) = object {
            self.break_type_barriers_value(script, object);
        }
        self.break_type_barriers(script, offset, true);
    }
}
