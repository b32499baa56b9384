//! Control-flow and definite-assignment analysis
//!
//! One forward pass over a script's bytecode computes, for every reachable
//! offset, its entry stack depth and jump/switch/exception flags, and for
//! every tracked local the earliest offset after which it is always
//! defined. Backward jumps to code not yet seen rewind the walk, so loop
//! bodies laid out after their test are still visited in one pass.
//!
//! While some forward jump or try block spans the current offset, locals
//! written so far live in per-path define lists carried from instruction to
//! instruction. Once no jump spans an offset, the locals in its define list
//! become permanently defined there and the list is dropped. Jumps leaving
//! a loop body past its back-edge carry an empty define list.

use crate::config::InferenceConfig;
use crate::error::{AnalysisError, AnalysisResult};
use bitflags::bitflags;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};
use tyflow_bytecode::{decode_script, Instr, Opcode, Script, ScriptId};

/// Local never found defined before a use, or reachable by eval/closures
const LOCAL_USE_BEFORE_DEF: u32 = u32::MAX;
/// Local not yet known to be defined anywhere
const LOCAL_CONDITIONALLY_DEFINED: u32 = u32::MAX - 1;
/// Offset that does not start an instruction
const NO_INSTR: u32 = u32::MAX;

/// Locals defined along the current path
pub type DefineList = SmallVec<[u32; 4]>;

bitflags! {
    /// Per-offset facts computed by the flow pass
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstrFlags: u16 {
        /// The instruction has been visited
        const ANALYZED = 1 << 0;
        /// Some jump, switch, handler or branch fallthrough targets this offset
        const JUMP_TARGET = 1 << 1;
        /// Reached by falling through a non-branching instruction
        const FALLTHROUGH = 1 << 2;
        /// Reached by falling through a conditional branch
        const JUMP_FALLTHROUGH = 1 << 3;
        /// Target of a switch case or default
        const SWITCH_TARGET = 1 << 4;
        /// Entry of a catch or finally handler
        const EXCEPTION_ENTRY = 1 << 5;
        /// Inside a try block
        const IN_TRY_BLOCK = 1 << 6;
        /// Compiled code must be able to resume here
        const SAFE_POINT = 1 << 7;
        /// No forward jump or try block spans this offset
        const UNCONDITIONAL = 1 << 8;
    }
}

/// Facts about one reachable instruction
#[derive(Debug, Clone, Default)]
pub struct InstructionRecord {
    /// Flow flags
    pub flags: InstrFlags,
    /// Stack depth on entry
    pub stack_depth: u32,
    /// Locals defined along every path reaching here, while a jump spans this offset
    defines: DefineList,
}

impl InstructionRecord {
    /// Check a flow flag
    pub fn has(&self, flag: InstrFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Check whether a local is in this offset's path define list
    pub fn is_defined(&self, local: u32) -> bool {
        self.defines.contains(&local)
    }
}

/// Definiteness of one local
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    /// Not defined on every path to any offset seen so far
    Conditional,
    /// Defined on every path from this offset to the end of the script
    DefinedAt(u32),
    /// Possibly read before written, or reachable from eval, closures or a debugger
    UseBeforeDef,
}

/// Flow analysis results for one script
#[derive(Debug, Clone)]
pub struct ScriptAnalysis {
    script: ScriptId,
    nargs: u32,
    nfixed: u32,
    local_count: u32,
    instrs: Vec<Instr>,
    index: Vec<u32>,
    codes: Vec<Option<InstructionRecord>>,
    locals: Vec<u32>,
    closed_args: Vec<bool>,
    closed_vars: Vec<bool>,

    uses_eval: bool,
    uses_arguments: bool,
    debug_mode: bool,

    is_inlineable: bool,
    uses_rval: bool,
    uses_scope: bool,
    uses_this: bool,
    has_calls: bool,

    out_of_memory: bool,
    had_failure: bool,
    allocations: usize,
    memory_limit: Option<usize>,
}

impl ScriptAnalysis {
    /// Run the flow pass over a script
    ///
    /// Malformed bytecode is an error. Exhausting the allocation budget is
    /// not: the returned analysis reports `out_of_memory()` and must be
    /// treated as failed.
    pub fn analyze(script: &Script, config: &InferenceConfig) -> AnalysisResult<Self> {
        let instrs = decode_script(&script.code)?;
        let length = script.code.len();

        let mut index = vec![NO_INSTR; length];
        for (i, instr) in instrs.iter().enumerate() {
            index[instr.offset as usize] = i as u32;
        }

        let local_count = script.nfixed.min(config.local_limit);
        let mut closed_args = vec![false; script.nargs as usize];
        for &arg in &script.closed_args {
            if let Some(closed) = closed_args.get_mut(arg as usize) {
                *closed = true;
            }
        }
        let mut closed_vars = vec![false; local_count as usize];
        for &local in &script.closed_vars {
            if let Some(closed) = closed_vars.get_mut(local as usize) {
                *closed = true;
            }
        }

        let mut analysis = Self {
            script: script.id,
            nargs: script.nargs,
            nfixed: script.nfixed,
            local_count,
            instrs: Vec::new(),
            index,
            codes: vec![None; length],
            locals: vec![LOCAL_CONDITIONALLY_DEFINED; local_count as usize],
            closed_args,
            closed_vars,
            uses_eval: script.uses_eval,
            uses_arguments: script.uses_arguments,
            debug_mode: config.debug_mode,
            is_inlineable: true,
            uses_rval: false,
            uses_scope: false,
            uses_this: false,
            has_calls: false,
            out_of_memory: false,
            had_failure: false,
            allocations: 0,
            memory_limit: config.analysis_memory_limit,
        };

        debug!(script = script.id.0, name = %script.name, length, "analyzing bytecode");

        match analysis.run(script, &instrs, config) {
            Ok(()) | Err(AnalysisError::OutOfMemory) => {}
            Err(err) => return Err(err),
        }
        analysis.instrs = instrs;

        debug!(
            script = script.id.0,
            inlineable = analysis.is_inlineable,
            oom = analysis.out_of_memory,
            "bytecode analysis finished"
        );
        Ok(analysis)
    }

    fn run(&mut self, script: &Script, instrs: &[Instr], config: &InferenceConfig) -> AnalysisResult<()> {
        // Locals visible to eval, a debugger or inner functions may be read at any time
        if script.uses_eval || config.debug_mode {
            for local in 0..self.local_count {
                self.set_local(local, LOCAL_USE_BEFORE_DEF);
            }
        }
        for local in 0..self.local_count {
            if self.closed_vars[local as usize] {
                self.set_local(local, LOCAL_USE_BEFORE_DEF);
            }
        }

        // A debugger can set the frame's return value at any safe point
        if config.debug_mode {
            self.uses_rval = true;
        }

        if !script.closed_args.is_empty()
            || !script.closed_vars.is_empty()
            || script.nfixed >= config.local_limit
            || script.heavyweight
            || script.uses_eval
            || script.uses_arguments
            || config.debug_mode
        {
            self.is_inlineable = false;
        }

        if instrs.is_empty() {
            return Ok(());
        }

        let length = self.codes.len() as u32;
        let loops = loop_spans(instrs);

        // Highest target of any jump spanning the current offset, including handlers
        let mut forward_jump: u32 = 0;
        // Highest handler offset of any try block containing the current offset
        let mut forward_catch: u32 = 0;

        self.alloc()?;
        self.codes[0] = Some(InstructionRecord::default());

        let mut next_offset: u32 = 0;
        while next_offset < length {
            let offset = next_offset;
            debug_assert!(forward_catch <= forward_jump);

            if forward_jump != 0 && forward_jump == offset {
                forward_jump = 0;
            }
            if forward_catch != 0 && forward_catch == offset {
                forward_catch = 0;
            }

            let position = self.index[offset as usize];
            if position == NO_INSTR {
                return Err(AnalysisError::InvalidJump {
                    offset,
                    target: offset as i64,
                });
            }
            let instr = &instrs[position as usize];
            let successor = instr.next_offset();
            next_offset = successor;

            let Some(code) = self.codes[offset as usize].as_mut() else {
                // No path reaches this instruction yet
                continue;
            };
            if code.has(InstrFlags::ANALYZED) {
                continue;
            }
            code.flags |= InstrFlags::ANALYZED;
            if forward_catch != 0 {
                code.flags |= InstrFlags::IN_TRY_BLOCK;
            }

            let mut stack_depth = code.stack_depth;
            let mut defines = code.defines.clone();

            if forward_jump == 0 {
                // Nothing jumps over this offset: everything defined on the way
                // here stays defined for the rest of the script.
                code.flags |= InstrFlags::UNCONDITIONAL;
                code.defines.clear();
                for &local in &defines {
                    let state = self.locals[local as usize];
                    debug_assert!(
                        state == LOCAL_CONDITIONALLY_DEFINED
                            || state == LOCAL_USE_BEFORE_DEF
                            || state <= offset
                    );
                    if state == LOCAL_CONDITIONALLY_DEFINED {
                        self.set_local(local, offset);
                    }
                }
                defines.clear();
            }

            let uses = instr.uses();
            if stack_depth < uses {
                return Err(AnalysisError::StackUnderflow(offset));
            }
            stack_depth = stack_depth - uses + instr.defs();

            match instr.opcode {
                Opcode::SetRval | Opcode::PopV => {
                    self.uses_rval = true;
                    self.is_inlineable = false;
                }

                op if op.is_name_op() => {
                    self.uses_scope = true;
                    self.is_inlineable = false;
                }

                Opcode::This => self.uses_this = true,

                // Only potentially inlineable calls count here
                Opcode::Call | Opcode::New => self.has_calls = true,

                Opcode::TableSwitch | Opcode::LookupSwitch => {
                    self.is_inlineable = false;
                    if let Some(default) = instr.switch_default() {
                        self.add_jump(offset, default, &mut next_offset, &mut forward_jump, stack_depth, &defines)?;
                        self.mark(default as u32, InstrFlags::SWITCH_TARGET | InstrFlags::SAFE_POINT);
                    }
                    for target in instr.switch_cases() {
                        // Table entries pointing back at the switch are holes
                        let hole = instr.opcode == Opcode::TableSwitch && target == offset as i64;
                        if !hole {
                            self.add_jump(offset, target, &mut next_offset, &mut forward_jump, stack_depth, &defines)?;
                        }
                        self.mark_existing(target, InstrFlags::SWITCH_TARGET | InstrFlags::SAFE_POINT);
                    }
                }

                Opcode::Try => {
                    // Everything between the try and its handlers is conditional
                    self.is_inlineable = false;
                    for handler in instr.try_handlers() {
                        if handler > forward_catch as i64 {
                            forward_catch = handler as u32;
                        }
                        self.add_jump(offset, handler, &mut next_offset, &mut forward_jump, stack_depth, &defines)?;
                        self.mark(handler as u32, InstrFlags::EXCEPTION_ENTRY | InstrFlags::SAFE_POINT);
                    }
                }

                Opcode::GetLocal => {
                    // `var x;` compiles to GETLOCAL; POP, which is not a read
                    let popped_next = instrs
                        .get(position as usize + 1)
                        .map_or(false, |next| next.opcode == Opcode::Pop);
                    let local = self.check_local(instr)?;
                    if !popped_next {
                        self.check_use(local, offset);
                    }
                }

                Opcode::CallLocal
                | Opcode::IncLocal
                | Opcode::DecLocal
                | Opcode::LocalInc
                | Opcode::LocalDec
                | Opcode::ArrayPush => {
                    let local = self.check_local(instr)?;
                    self.check_use(local, offset);
                }

                Opcode::SetLocal => {
                    let local = self.check_local(instr)?;
                    if local < self.local_count
                        && self.locals[local as usize] == LOCAL_CONDITIONALLY_DEFINED
                    {
                        if forward_jump != 0 {
                            self.alloc()?;
                            defines.push(local);
                        } else {
                            self.set_local(local, offset);
                        }
                    }
                }

                Opcode::GetArg | Opcode::CallArg => {
                    self.check_arg(instr)?;
                }

                Opcode::SetArg
                | Opcode::IncArg
                | Opcode::DecArg
                | Opcode::ArgInc
                | Opcode::ArgDec => {
                    self.check_arg(instr)?;
                    self.is_inlineable = false;
                }

                // Compilable, but never inlined
                Opcode::Arguments
                | Opcode::Eval
                | Opcode::Throw
                | Opcode::Exception
                | Opcode::Lambda
                | Opcode::Debugger
                | Opcode::EnterBlock
                | Opcode::LeaveBlock
                | Opcode::FunCall
                | Opcode::FunApply
                | Opcode::EnterWith
                | Opcode::LeaveWith
                | Opcode::XmlName => {
                    self.is_inlineable = false;
                }

                _ => {}
            }

            let is_jump = instr.opcode.is_jump();
            if is_jump {
                let mut branch_depth = stack_depth;
                match instr.opcode {
                    // OR/AND keep their operand only when branching
                    Opcode::Or | Opcode::And => stack_depth -= 1,
                    // CASE drops the switch value when branching
                    Opcode::Case => branch_depth -= 1,
                    _ => {}
                }
                if let Some(target) = instr.jump_target() {
                    // A break carries no definitions out of the loop it leaves
                    let carried: &[u32] = if leaves_loop(&loops, offset, target) {
                        &[]
                    } else {
                        &defines
                    };
                    self.add_jump(offset, target, &mut next_offset, &mut forward_jump, branch_depth, carried)?;
                }
            }

            if instr.opcode.falls_through() {
                if successor >= length {
                    return Err(AnalysisError::InvalidJump {
                        offset,
                        target: successor as i64,
                    });
                }
                let initial = self.codes[successor as usize].is_none();
                if initial {
                    self.alloc()?;
                    self.codes[successor as usize] = Some(InstructionRecord::default());
                }
                self.merge_defines(successor, initial, stack_depth, &defines)?;
                // The fallthrough of a branch is itself a jump target
                let flags = if is_jump {
                    InstrFlags::JUMP_FALLTHROUGH | InstrFlags::JUMP_TARGET
                } else {
                    InstrFlags::FALLTHROUGH
                };
                self.mark(successor, flags);
            }
        }

        debug_assert!(forward_jump == 0 && forward_catch == 0);
        Ok(())
    }

    /// Register an edge to `target`, rewinding the walk for unseen backward targets
    fn add_jump(
        &mut self,
        offset: u32,
        target: i64,
        current: &mut u32,
        forward_jump: &mut u32,
        stack_depth: u32,
        defines: &[u32],
    ) -> AnalysisResult<()> {
        if target < 0
            || target as usize >= self.index.len()
            || self.index[target as usize] == NO_INSTR
        {
            return Err(AnalysisError::InvalidJump { offset, target });
        }
        let target = target as u32;

        let initial = self.codes[target as usize].is_none();
        if initial {
            self.alloc()?;
            self.codes[target as usize] = Some(InstructionRecord::default());
        }
        self.merge_defines(target, initial, stack_depth, defines)?;
        self.mark(target, InstrFlags::JUMP_TARGET);

        if target < *current {
            // Scripts with loops are never inlined
            self.is_inlineable = false;

            let analyzed = self.codes[target as usize]
                .as_ref()
                .map_or(false, |code| code.has(InstrFlags::ANALYZED));
            if !analyzed {
                if *forward_jump == 0 {
                    *forward_jump = *current;
                }
                trace!(offset, target, "rewinding to backward jump target");
                *current = target;
            }
        } else if target > *forward_jump {
            *forward_jump = target;
        }

        Ok(())
    }

    /// Merge an incoming edge's depth and define list into the record at `offset`
    fn merge_defines(
        &mut self,
        offset: u32,
        initial: bool,
        stack_depth: u32,
        incoming: &[u32],
    ) -> AnalysisResult<()> {
        let Some(code) = self.codes[offset as usize].as_mut() else {
            return Ok(());
        };

        if initial {
            code.stack_depth = stack_depth;
            code.defines = incoming.iter().copied().collect();
            return Ok(());
        }

        if code.stack_depth != stack_depth {
            return Err(AnalysisError::StackMismatch {
                offset,
                expected: code.stack_depth,
                found: stack_depth,
            });
        }

        if code.has(InstrFlags::ANALYZED) {
            // Successors already consumed this record's defines. An edge
            // arriving later with fewer of them can only come from bytecode
            // the emitter would not produce; degrade those locals.
            let missing: DefineList = code
                .defines
                .iter()
                .copied()
                .filter(|local| !incoming.contains(local))
                .collect();
            for local in missing {
                warn!(offset, local, "late edge without local definition");
                self.set_local(local, LOCAL_USE_BEFORE_DEF);
                self.is_inlineable = false;
            }
            return Ok(());
        }

        let before = code.defines.len();
        code.defines.retain(|local| incoming.contains(local));
        if code.defines.len() != before {
            self.alloc()?;
        }
        Ok(())
    }

    fn set_local(&mut self, local: u32, offset: u32) {
        let state = &mut self.locals[local as usize];
        debug_assert!(offset != LOCAL_CONDITIONALLY_DEFINED);
        // The point a local becomes defined can never move, and a use before
        // def is sticky; only a later use-before-def may override a definition.
        debug_assert!(
            *state == LOCAL_CONDITIONALLY_DEFINED
                || *state == offset
                || offset == LOCAL_USE_BEFORE_DEF
        );
        *state = offset;
    }

    fn check_use(&mut self, local: u32, offset: u32) {
        if local < self.local_count && !self.local_defined(local, offset) {
            self.set_local(local, LOCAL_USE_BEFORE_DEF);
            self.is_inlineable = false;
        }
    }

    fn check_local(&self, instr: &Instr) -> AnalysisResult<u32> {
        let local = instr.u16_operand();
        if local >= self.nfixed {
            return Err(AnalysisError::InvalidSlot {
                slot: local,
                offset: instr.offset,
            });
        }
        Ok(local)
    }

    fn check_arg(&self, instr: &Instr) -> AnalysisResult<u32> {
        let arg = instr.u16_operand();
        if arg >= self.nargs {
            return Err(AnalysisError::InvalidSlot {
                slot: arg,
                offset: instr.offset,
            });
        }
        Ok(arg)
    }

    fn mark(&mut self, offset: u32, flags: InstrFlags) {
        if let Some(code) = self.codes[offset as usize].as_mut() {
            code.flags |= flags;
        }
    }

    fn mark_existing(&mut self, target: i64, flags: InstrFlags) {
        if target >= 0 && (target as usize) < self.codes.len() {
            self.mark(target as u32, flags);
        }
    }

    /// Charge one record or define-list allocation against the budget
    fn alloc(&mut self) -> AnalysisResult<()> {
        self.allocations += 1;
        match self.memory_limit {
            Some(limit) if self.allocations > limit => {
                self.set_oom();
                Err(AnalysisError::OutOfMemory)
            }
            _ => Ok(()),
        }
    }

    fn set_oom(&mut self) {
        warn!(script = self.script.0, "analysis memory budget exhausted");
        self.out_of_memory = true;
        self.had_failure = true;
    }

    // ===== Queries =====

    /// Script this analysis describes
    pub fn script(&self) -> ScriptId {
        self.script
    }

    /// Code length in bytes
    pub fn length(&self) -> u32 {
        self.codes.len() as u32
    }

    /// Number of formal arguments
    pub fn nargs(&self) -> u32 {
        self.nargs
    }

    /// Number of fixed local slots
    pub fn nfixed(&self) -> u32 {
        self.nfixed
    }

    /// Number of locals whose definiteness is tracked
    pub fn local_count(&self) -> u32 {
        self.local_count
    }

    /// The allocation budget ran out
    pub fn out_of_memory(&self) -> bool {
        self.out_of_memory
    }

    /// The analysis did not complete
    pub fn failed(&self) -> bool {
        self.had_failure
    }

    /// Error to report for a failed analysis
    pub fn check(&self) -> AnalysisResult<()> {
        if self.out_of_memory {
            return Err(AnalysisError::OutOfMemory);
        }
        Ok(())
    }

    /// Record for a reachable offset
    pub fn code(&self, offset: u32) -> Option<&InstructionRecord> {
        self.codes.get(offset as usize).and_then(Option::as_ref)
    }

    /// Check whether any path reaches the instruction at `offset`
    pub fn is_reachable(&self, offset: u32) -> bool {
        self.code(offset).is_some()
    }

    /// Check a flow flag at `offset`
    pub fn has_flag(&self, offset: u32, flag: InstrFlags) -> bool {
        self.code(offset).map_or(false, |code| code.has(flag))
    }

    /// Stack depth on entry to a reachable offset
    pub fn stack_depth(&self, offset: u32) -> Option<u32> {
        self.code(offset).map(|code| code.stack_depth)
    }

    /// Decoded instruction starting at `offset`
    pub fn instr_at(&self, offset: u32) -> Option<&Instr> {
        let position = *self.index.get(offset as usize)?;
        self.instrs.get(position as usize)
    }

    /// All decoded instructions in offset order
    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Reachable instructions in offset order
    pub fn reachable(&self) -> impl Iterator<Item = &Instr> + '_ {
        self.instrs
            .iter()
            .filter(move |instr| self.is_reachable(instr.offset))
    }

    /// Instruction following the one at `offset`
    pub fn next_instr(&self, offset: u32) -> Option<&Instr> {
        let position = *self.index.get(offset as usize)?;
        self.instrs.get(position as usize + 1)
    }

    /// Closest reachable instruction before `offset`
    pub fn prev_reachable(&self, offset: u32) -> Option<&Instr> {
        let position = *self.index.get(offset as usize)? as usize;
        self.instrs[..position]
            .iter()
            .rev()
            .find(|instr| self.is_reachable(instr.offset))
    }

    /// Definiteness of a tracked local
    pub fn local_state(&self, local: u32) -> LocalState {
        match self.locals.get(local as usize) {
            None | Some(&LOCAL_USE_BEFORE_DEF) => LocalState::UseBeforeDef,
            Some(&LOCAL_CONDITIONALLY_DEFINED) => LocalState::Conditional,
            Some(&offset) => LocalState::DefinedAt(offset),
        }
    }

    /// Check whether a local may be read before it is written
    ///
    /// Locals beyond the tracking limit always report true.
    pub fn local_has_use_before_def(&self, local: u32) -> bool {
        local >= self.local_count || self.locals[local as usize] == LOCAL_USE_BEFORE_DEF
    }

    /// Check whether reading a local at `offset` needs no new use-before-def marking
    ///
    /// True when the local is defined on every path to `offset`, and also when
    /// it is already (or untracked and therefore always) use-before-def.
    pub fn local_defined(&self, local: u32, offset: u32) -> bool {
        if local >= self.local_count {
            return true;
        }
        let state = self.locals[local as usize];
        state == LOCAL_USE_BEFORE_DEF
            || state <= offset
            || self.code(offset).map_or(false, |code| code.is_defined(local))
    }

    /// Check whether an argument may be accessed other than through its slot
    pub fn arg_escapes(&self, arg: u32) -> bool {
        self.uses_eval
            || self.uses_arguments
            || self.debug_mode
            || self.closed_args.get(arg as usize).copied().unwrap_or(true)
    }

    /// Check whether a local may be accessed other than through its slot
    pub fn local_escapes(&self, local: u32) -> bool {
        self.uses_eval
            || self.debug_mode
            || local >= self.local_count
            || self.closed_vars[local as usize]
    }

    /// The script contains nothing that prevents inlining
    pub fn is_inlineable(&self) -> bool {
        self.is_inlineable
    }

    /// The script can be inlined at a call passing `argc` arguments
    pub fn inlineable(&self, argc: u32) -> bool {
        self.is_inlineable && argc == self.nargs
    }

    /// The script writes its return value slot
    pub fn uses_rval(&self) -> bool {
        self.uses_rval
    }

    /// The script resolves names through the scope chain
    pub fn uses_scope(&self) -> bool {
        self.uses_scope
    }

    /// The script reads `this`
    pub fn uses_this(&self) -> bool {
        self.uses_this
    }

    /// The script makes calls or constructs objects
    pub fn has_calls(&self) -> bool {
        self.has_calls
    }
}

/// `(head, backedge)` of every backward jump, one per head with its last back-edge
fn loop_spans(instrs: &[Instr]) -> Vec<(u32, u32)> {
    let mut spans: Vec<(u32, u32)> = Vec::new();
    for instr in instrs.iter().filter(|instr| instr.opcode.is_jump()) {
        let Some(target) = instr.jump_target() else {
            continue;
        };
        if target < 0 || target >= instr.offset as i64 {
            continue;
        }
        let head = target as u32;
        match spans.iter_mut().find(|(h, _)| *h == head) {
            Some(span) => span.1 = span.1.max(instr.offset),
            None => spans.push((head, instr.offset)),
        }
    }
    spans
}

/// Check whether a jump at `offset` exits some loop body containing it
fn leaves_loop(loops: &[(u32, u32)], offset: u32, target: i64) -> bool {
    loops
        .iter()
        .any(|&(head, backedge)| head <= offset && offset < backedge && target > backedge as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tyflow_bytecode::BytecodeWriter;

    fn analyze(code: Vec<u8>, nargs: u32, nfixed: u32) -> ScriptAnalysis {
        let script = Script {
            nargs,
            nfixed,
            ..Script::new(ScriptId(0), "test", code)
        };
        ScriptAnalysis::analyze(&script, &InferenceConfig::default()).unwrap()
    }

    #[test]
    fn test_straight_line() {
        let mut w = BytecodeWriter::new();
        w.emit_int(5); // offset 0
        w.emit_set_local(0); // offset 2
        w.emit_op(Opcode::Pop); // offset 5
        w.emit_get_local(0); // offset 6
        w.emit_op(Opcode::Return); // offset 9

        let analysis = analyze(w.into_bytes(), 0, 1);
        assert_eq!(analysis.local_state(0), LocalState::DefinedAt(2));
        assert!(analysis.local_defined(0, 6));
        assert!(!analysis.local_has_use_before_def(0));
        assert_eq!(analysis.stack_depth(9), Some(1));
        assert!(analysis.is_inlineable());
        assert!(analysis.inlineable(0));
        assert!(!analysis.inlineable(1));
    }

    #[test]
    fn test_read_before_write() {
        let mut w = BytecodeWriter::new();
        w.emit_get_local(0); // offset 0
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::Stop);

        // GETLOCAL followed by POP is a declaration, not a read
        let analysis = analyze(w.buffer().to_vec(), 0, 1);
        assert_eq!(analysis.local_state(0), LocalState::Conditional);

        let mut w = BytecodeWriter::new();
        w.emit_get_local(0);
        w.emit_op(Opcode::Return);
        let analysis = analyze(w.into_bytes(), 0, 1);
        assert_eq!(analysis.local_state(0), LocalState::UseBeforeDef);
        assert!(!analysis.is_inlineable());
    }

    #[test]
    fn test_conditional_write_then_read() {
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0); // offset 0
        let skip = w.emit_forward_jump(Opcode::IfEq); // offset 3
        w.emit_int(1); // offset 8
        w.emit_set_local(0); // offset 9
        w.emit_op(Opcode::Pop); // offset 12
        w.patch_jump(skip);
        let read = w.emit_get_local(0); // offset 13
        w.emit_op(Opcode::Return);

        let analysis = analyze(w.into_bytes(), 1, 1);
        assert_eq!(read, 13);
        assert!(analysis.has_flag(13, InstrFlags::JUMP_TARGET));
        assert!(analysis.has_flag(8, InstrFlags::JUMP_FALLTHROUGH));
        assert!(!analysis.has_flag(8, InstrFlags::UNCONDITIONAL));
        assert!(analysis.has_flag(13, InstrFlags::UNCONDITIONAL));
        assert_eq!(analysis.local_state(0), LocalState::UseBeforeDef);
    }

    #[test]
    fn test_unreachable_code_is_skipped() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Undefined); // offset 0
        w.emit_op(Opcode::Return); // offset 1
        w.emit_get_local(0); // offset 2, dead
        w.emit_op(Opcode::Return);

        let analysis = analyze(w.into_bytes(), 0, 1);
        assert!(!analysis.is_reachable(2));
        assert_eq!(analysis.local_state(0), LocalState::Conditional);
        assert_eq!(analysis.reachable().count(), 2);
    }

    #[test]
    fn test_or_and_stack_depths() {
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0); // offset 0
        let or = w.emit_forward_jump(Opcode::Or); // offset 3
        w.emit_get_arg(1); // offset 8
        w.patch_jump(or);
        w.emit_op(Opcode::Return); // offset 11

        let analysis = analyze(w.into_bytes(), 2, 0);
        // Fallthrough drops the tested operand, the branch keeps it
        assert_eq!(analysis.stack_depth(8), Some(0));
        assert_eq!(analysis.stack_depth(11), Some(1));
    }

    #[test]
    fn test_table_switch_targets() {
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0); // offset 0
        let sw = w.emit_table_switch(0, 2); // offset 3
        let case0 = w.emit_op(Opcode::Nop);
        let case2 = w.emit_op(Opcode::Nop);
        let done = w.emit_op(Opcode::Stop);
        w.patch_table_case(sw, 0, case0);
        w.patch_table_case(sw, 1, sw); // hole
        w.patch_table_case(sw, 2, case2);
        w.patch_switch_default(sw, done);

        let analysis = analyze(w.into_bytes(), 1, 0);
        for target in [case0, case2, done] {
            let target = target as u32;
            assert!(analysis.has_flag(target, InstrFlags::SWITCH_TARGET));
            assert!(analysis.has_flag(target, InstrFlags::SAFE_POINT));
        }
        assert!(!analysis.has_flag(sw as u32, InstrFlags::JUMP_TARGET));
        assert!(!analysis.is_inlineable());
    }

    #[test]
    fn test_flags_from_opcodes() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::This);
        w.emit_op(Opcode::SetRval);
        w.emit_op_u32(Opcode::Name, 0);
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::RetRval);

        let analysis = analyze(w.into_bytes(), 0, 0);
        assert!(analysis.uses_this());
        assert!(analysis.uses_rval());
        assert!(analysis.uses_scope());
        assert!(!analysis.has_calls());
        assert!(!analysis.is_inlineable());
    }

    #[test]
    fn test_with_and_xml_are_not_inlined() {
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0);
        w.emit_op(Opcode::EnterWith);
        w.emit_op(Opcode::LeaveWith);
        w.emit_op(Opcode::Stop);
        let analysis = analyze(w.into_bytes(), 1, 0);
        assert!(!analysis.is_inlineable());
        assert!(!analysis.inlineable(1));

        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Null);
        w.emit_op(Opcode::XmlName);
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::Stop);
        let analysis = analyze(w.into_bytes(), 0, 0);
        assert!(!analysis.is_inlineable());
    }

    #[test]
    fn test_eval_marks_locals_escaping() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Stop);
        let script = Script {
            nfixed: 2,
            uses_eval: true,
            ..Script::new(ScriptId(1), "evaluator", w.into_bytes())
        };
        let analysis = ScriptAnalysis::analyze(&script, &InferenceConfig::default()).unwrap();
        assert_eq!(analysis.local_state(1), LocalState::UseBeforeDef);
        assert!(analysis.local_escapes(0));
        assert!(!analysis.is_inlineable());
    }

    #[test]
    fn test_closed_slots_escape() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Stop);
        let script = Script {
            nargs: 2,
            nfixed: 2,
            closed_args: vec![1],
            closed_vars: vec![0],
            ..Script::new(ScriptId(2), "closure", w.into_bytes())
        };
        let analysis = ScriptAnalysis::analyze(&script, &InferenceConfig::default()).unwrap();
        assert!(!analysis.arg_escapes(0));
        assert!(analysis.arg_escapes(1));
        assert!(analysis.local_escapes(0));
        assert!(!analysis.local_escapes(1));
        assert!(analysis.local_has_use_before_def(0));
    }

    #[test]
    fn test_locals_beyond_limit_are_untracked() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Stop);
        let script = Script {
            nfixed: 4,
            ..Script::new(ScriptId(3), "wide", w.into_bytes())
        };
        let config = InferenceConfig {
            local_limit: 2,
            ..InferenceConfig::default()
        };
        let analysis = ScriptAnalysis::analyze(&script, &config).unwrap();
        assert_eq!(analysis.local_count(), 2);
        assert!(analysis.local_has_use_before_def(3));
        assert!(analysis.local_escapes(2));
        assert!(!analysis.is_inlineable());
    }

    #[test]
    fn test_memory_budget_sets_oom() {
        let mut w = BytecodeWriter::new();
        w.emit_get_arg(0);
        let skip = w.emit_forward_jump(Opcode::IfEq);
        w.emit_op(Opcode::Nop);
        w.patch_jump(skip);
        w.emit_op(Opcode::Stop);

        let script = Script {
            nargs: 1,
            ..Script::new(ScriptId(4), "tiny", w.into_bytes())
        };
        let config = InferenceConfig {
            analysis_memory_limit: Some(2),
            ..InferenceConfig::default()
        };
        let analysis = ScriptAnalysis::analyze(&script, &config).unwrap();
        assert!(analysis.out_of_memory());
        assert!(analysis.failed());
        assert_eq!(analysis.check(), Err(AnalysisError::OutOfMemory));
    }

    #[test]
    fn test_invalid_jump_target() {
        let mut w = BytecodeWriter::new();
        w.emit_jump(Opcode::Goto, 100);
        let script = Script::new(ScriptId(5), "broken", w.into_bytes());
        let err = ScriptAnalysis::analyze(&script, &InferenceConfig::default()).unwrap_err();
        assert_eq!(err, AnalysisError::InvalidJump { offset: 0, target: 100 });
    }

    #[test]
    fn test_stack_underflow() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Pop);
        w.emit_op(Opcode::Stop);
        let script = Script::new(ScriptId(6), "underflow", w.into_bytes());
        let err = ScriptAnalysis::analyze(&script, &InferenceConfig::default()).unwrap_err();
        assert_eq!(err, AnalysisError::StackUnderflow(0));
    }
}
