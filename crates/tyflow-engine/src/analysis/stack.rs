//! Stack value tracking
//!
//! A linear pass over the reachable instructions of an analyzed script that
//! names every operand stack value by the instruction that pushed it. Values
//! live at a jump target are renamed to join values, with each incoming
//! edge's stack recorded so type sets can be wired into the join later.

use super::flow::{InstrFlags, ScriptAnalysis};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;
use tyflow_bytecode::Opcode;

/// A named operand stack value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackValue {
    /// Produced on a path the pass could not follow
    Unknown,
    /// Value `index` pushed by the instruction at `offset`, 0 being the deepest
    Pushed { offset: u32, index: u32 },
    /// Merge of the values in `slot` on every edge into `target`
    Join { target: u32, slot: u32 },
}

/// Consumer of a stack value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackUse {
    /// Popped as operand `which` (0 = top of stack) by the instruction at `offset`
    Popped { offset: u32, which: u32 },
    /// Carried into `slot` of the join at `target`
    Joined { target: u32, slot: u32 },
}

/// Stack value names for one analyzed script
#[derive(Debug, Clone, Default)]
pub struct StackAnalysis {
    popped: FxHashMap<u32, SmallVec<[StackValue; 4]>>,
    incoming: FxHashMap<u32, Vec<Vec<StackValue>>>,
    uses: FxHashMap<StackValue, Vec<StackUse>>,
}

impl StackAnalysis {
    /// Name the stack values of every reachable instruction
    pub fn analyze(analysis: &ScriptAnalysis) -> Self {
        let mut result = Self::default();
        let mut stack: Vec<StackValue> = Vec::new();

        for instr in analysis.reachable() {
            let offset = instr.offset;
            let Some(code) = analysis.code(offset) else {
                continue;
            };
            let depth = code.stack_depth as usize;

            stack.resize(depth, StackValue::Unknown);
            if code.has(InstrFlags::JUMP_TARGET) {
                for (slot, value) in stack.iter_mut().enumerate() {
                    *value = StackValue::Join {
                        target: offset,
                        slot: slot as u32,
                    };
                }
            }

            let uses = instr.uses() as usize;
            let popped: SmallVec<[StackValue; 4]> =
                (0..uses).map(|which| stack[depth - 1 - which]).collect();
            for (which, value) in popped.iter().enumerate() {
                result.add_use(
                    *value,
                    StackUse::Popped {
                        offset,
                        which: which as u32,
                    },
                );
            }
            if !popped.is_empty() {
                result.popped.insert(offset, popped);
            }

            stack.truncate(depth - uses);
            for index in 0..instr.defs() {
                stack.push(StackValue::Pushed { offset, index });
            }

            match instr.opcode {
                Opcode::Case => {
                    // The branch drops the switch value
                    if let Some(target) = instr.jump_target() {
                        let branch = &stack[..stack.len().saturating_sub(1)];
                        result.add_edge(target as u32, branch.to_vec());
                    }
                }
                Opcode::Or | Opcode::And => {
                    if let Some(target) = instr.jump_target() {
                        result.add_edge(target as u32, stack.clone());
                    }
                    stack.pop();
                }
                op if op.is_jump() => {
                    if let Some(target) = instr.jump_target() {
                        result.add_edge(target as u32, stack.clone());
                    }
                }
                Opcode::TableSwitch | Opcode::LookupSwitch => {
                    if let Some(default) = instr.switch_default() {
                        result.add_edge(default as u32, stack.clone());
                    }
                    for target in instr.switch_cases() {
                        if instr.opcode == Opcode::TableSwitch && target == offset as i64 {
                            continue;
                        }
                        result.add_edge(target as u32, stack.clone());
                    }
                }
                Opcode::Try => {
                    for handler in instr.try_handlers() {
                        result.add_edge(handler as u32, stack.clone());
                    }
                }
                _ => {}
            }

            if instr.opcode.falls_through() {
                let successor = instr.next_offset();
                if analysis.has_flag(successor, InstrFlags::JUMP_TARGET) {
                    result.add_edge(successor, stack.clone());
                }
            }
        }

        trace!(
            script = analysis.script().0,
            joins = result.incoming.len(),
            "stack analysis finished"
        );
        result
    }

    fn add_use(&mut self, value: StackValue, consumer: StackUse) {
        if value != StackValue::Unknown {
            self.uses.entry(value).or_default().push(consumer);
        }
    }

    fn add_edge(&mut self, target: u32, values: Vec<StackValue>) {
        if values.is_empty() {
            return;
        }
        for (slot, value) in values.iter().enumerate() {
            self.add_use(
                *value,
                StackUse::Joined {
                    target,
                    slot: slot as u32,
                },
            );
        }
        self.incoming.entry(target).or_default().push(values);
    }

    /// Value consumed as operand `which` (0 = top) by the instruction at `offset`
    pub fn popped(&self, offset: u32, which: u32) -> StackValue {
        self.popped
            .get(&offset)
            .and_then(|values| values.get(which as usize))
            .copied()
            .unwrap_or(StackValue::Unknown)
    }

    /// Stacks carried by each edge into a join target
    pub fn incoming(&self, target: u32) -> &[Vec<StackValue>] {
        self.incoming.get(&target).map_or(&[], Vec::as_slice)
    }

    /// Offsets with at least one stack value joined across edges
    pub fn join_targets(&self) -> impl Iterator<Item = u32> + '_ {
        self.incoming.keys().copied()
    }

    /// Every consumer of a value
    pub fn uses_of(&self, value: StackValue) -> &[StackUse] {
        self.uses.get(&value).map_or(&[], Vec::as_slice)
    }
}
