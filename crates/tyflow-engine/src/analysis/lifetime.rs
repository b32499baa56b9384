//! Live range analysis
//!
//! A single backward pass over an analyzed script computing, for `this`, each
//! argument and each tracked local, the bytecode ranges where the variable
//! may hold a live value. Ranges are kept as a chain of segments per
//! variable, ordered by start offset. Variables that escape through eval,
//! closures or a debugger are not tracked and must be treated as always live.
//!
//! Scanning backward, a read starts or extends the variable's current
//! segment and a write closes it. A closed variable is parked on the saved
//! list until a branch whose target still sees it live reopens it. At a loop
//! head, every variable live there is extended to the back-edge with a
//! loop tail segment.

use super::flow::{InstrFlags, ScriptAnalysis};
use super::loops::{LoopId, LoopRecord};
use crate::config::InferenceConfig;
use crate::error::{AnalysisError, AnalysisResult};
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::{debug, trace};
use tyflow_bytecode::{Instr, Opcode};

/// A variable tracked by the lifetime analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    /// The `this` value
    This,
    /// A formal argument
    Arg(u32),
    /// A fixed local
    Local(u32),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::This => write!(f, "this"),
            Slot::Arg(i) => write!(f, "arg{}", i),
            Slot::Local(i) => write!(f, "local{}", i),
        }
    }
}

/// One live range of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    /// First offset at which the variable is live (inclusive)
    pub start: u32,
    /// Last offset at which the variable is live (inclusive)
    pub end: u32,
    /// Artificial extension to a loop's back-edge
    pub loop_tail: bool,
    /// The instruction at `start` writes the variable
    pub write: bool,
    next: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Variable {
    /// Segment the backward scan is currently growing
    lifetime: Option<usize>,
    /// Next segment while the variable is dead at the scan point
    saved: Option<usize>,
}

/// Live ranges and loop records for one script
#[derive(Debug, Clone)]
pub struct LifetimeScript {
    nargs: u32,
    local_count: u32,
    segments: Vec<Lifetime>,
    variables: Vec<Variable>,
    tracked: Vec<bool>,
    loops: Vec<LoopRecord>,
    loop_heads: FxHashMap<u32, LoopId>,
    memory_limit: Option<usize>,
}

impl LifetimeScript {
    /// Compute live ranges from a completed flow analysis
    pub fn analyze(analysis: &ScriptAnalysis, config: &InferenceConfig) -> AnalysisResult<Self> {
        analysis.check()?;

        let nargs = analysis.nargs();
        let local_count = analysis.local_count();
        let count = (1 + nargs + local_count) as usize;

        let mut lifetimes = Self {
            nargs,
            local_count,
            segments: Vec::new(),
            variables: vec![Variable::default(); count],
            tracked: vec![false; count],
            loops: Vec::new(),
            loop_heads: FxHashMap::default(),
            memory_limit: config.analysis_memory_limit,
        };
        lifetimes.tracked[0] = true;
        for arg in 0..nargs {
            let index = lifetimes.index(Slot::Arg(arg));
            lifetimes.tracked[index] = !analysis.arg_escapes(arg);
        }
        for local in 0..local_count {
            let index = lifetimes.index(Slot::Local(local));
            lifetimes.tracked[index] = !analysis.local_escapes(local);
        }

        lifetimes.run(analysis)?;

        for id in 0..lifetimes.loops.len() {
            if let Some(record) = super::loops::analyze_loop(analysis, &lifetimes, LoopId(id as u32)) {
                lifetimes.loops[id] = record;
            }
        }

        debug!(
            script = analysis.script().0,
            segments = lifetimes.segments.len(),
            loops = lifetimes.loops.len(),
            "lifetime analysis finished"
        );
        Ok(lifetimes)
    }

    fn run(&mut self, analysis: &ScriptAnalysis) -> AnalysisResult<()> {
        let mut saved: Vec<usize> = Vec::new();
        let mut current: Option<LoopId> = None;

        let instrs: Vec<_> = analysis.reachable().cloned().collect();
        for instr in instrs.iter().rev() {
            let offset = instr.offset;

            if let Some(id) = current {
                if analysis.has_flag(offset, InstrFlags::SAFE_POINT) {
                    self.loops[id.0 as usize].has_safe_points = true;
                }
            }

            // Track the last basic block of the loop, other than its entry.
            // A loop's own head belongs to the enclosing loop's blocks.
            let head_loop = self.loop_heads.get(&offset).copied();
            let block_loop = match head_loop {
                Some(id) => self.loops[id.0 as usize].parent,
                None => current,
            };
            if let Some(id) = block_loop {
                let record = &mut self.loops[id.0 as usize];
                if analysis.has_flag(offset, InstrFlags::JUMP_TARGET)
                    && offset != record.entry
                    && offset > record.last_block
                {
                    record.last_block = offset;
                }
            }

            self.step(analysis, instr, &mut saved, &mut current)?;

            if let Some(head_loop) = head_loop {
                // Everything live at the head, including what the head itself
                // reads, stays live through the whole body
                debug_assert_eq!(Some(head_loop), current);
                let backedge = self.loops[head_loop.0 as usize].backedge;
                for var in 0..self.variables.len() {
                    if self.variables[var].lifetime.is_some() {
                        self.extend(var, offset, backedge)?;
                    }
                }
                current = self.loops[head_loop.0 as usize].parent;
            }
        }

        Ok(())
    }

    fn step(
        &mut self,
        analysis: &ScriptAnalysis,
        instr: &Instr,
        saved: &mut Vec<usize>,
        current: &mut Option<LoopId>,
    ) -> AnalysisResult<()> {
        let offset = instr.offset;
        match instr.opcode {
            Opcode::GetArg | Opcode::CallArg => {
                self.read(Slot::Arg(instr.u16_operand()), offset, saved)?;
            }
            Opcode::SetArg => {
                self.write(Slot::Arg(instr.u16_operand()), offset, saved)?;
            }
            Opcode::IncArg | Opcode::DecArg | Opcode::ArgInc | Opcode::ArgDec => {
                let slot = Slot::Arg(instr.u16_operand());
                self.write(slot, offset, saved)?;
                self.read(slot, offset, saved)?;
            }
            Opcode::GetLocal | Opcode::CallLocal => {
                self.read(Slot::Local(instr.u16_operand()), offset, saved)?;
            }
            Opcode::SetLocal => {
                self.write(Slot::Local(instr.u16_operand()), offset, saved)?;
            }
            Opcode::IncLocal
            | Opcode::DecLocal
            | Opcode::LocalInc
            | Opcode::LocalDec
            | Opcode::ArrayPush => {
                let slot = Slot::Local(instr.u16_operand());
                self.write(slot, offset, saved)?;
                self.read(slot, offset, saved)?;
            }
            Opcode::This => {
                self.read(Slot::This, offset, saved)?;
            }

            Opcode::IfEq
            | Opcode::IfNe
            | Opcode::Or
            | Opcode::And
            | Opcode::Goto => {
                let Some(raw) = instr.jump_target() else {
                    return Ok(());
                };
                let mut target = raw as u32;
                if target < offset {
                    let target_op = analysis.instr_at(target).map(|t| t.opcode);
                    if target_op == Some(Opcode::Goto) {
                        // A continue: follow the jump to the loop entry
                        target = analysis
                            .instr_at(target)
                            .and_then(|t| t.jump_target())
                            .map_or(target, |t| t as u32);
                        if let Some(id) = *current {
                            let record = &mut self.loops[id.0 as usize];
                            if record.entry == target && record.entry > record.last_block {
                                record.last_block = record.entry;
                            }
                        }
                    } else {
                        *current = Some(self.open_loop(analysis, *current, target, offset));
                        return Ok(());
                    }
                }

                // Liveness before a branch is the union of both successors
                let mut i = 0;
                while i < saved.len() {
                    let var = saved[i];
                    debug_assert!(self.variables[var].lifetime.is_none());
                    if self.live_var(var, target).is_some() {
                        let next = self.variables[var].saved.take();
                        let segment = self.alloc(offset, next)?;
                        self.variables[var].lifetime = Some(segment);
                        saved.swap_remove(i);
                    } else {
                        i += 1;
                    }
                }
            }

            Opcode::TableSwitch | Opcode::LookupSwitch => {
                // Switch targets are not followed; every saved variable is restored
                for var in saved.drain(..).collect::<Vec<_>>() {
                    let next = self.variables[var].saved.take();
                    let segment = self.alloc(offset, next)?;
                    self.variables[var].lifetime = Some(segment);
                }
            }

            op if op.is_invoke() => {
                if let Some(id) = *current {
                    self.loops[id.0 as usize].has_calls_loops = true;
                }
            }

            _ => {}
        }
        Ok(())
    }

    fn open_loop(
        &mut self,
        analysis: &ScriptAnalysis,
        parent: Option<LoopId>,
        head: u32,
        backedge: u32,
    ) -> LoopId {
        if let Some(outer) = parent {
            // Continues are not tracked for outer loops
            let record = &mut self.loops[outer.0 as usize];
            if record.entry > record.last_block {
                record.last_block = record.entry;
            }
            record.has_calls_loops = true;
        }

        // Entered by a jump over the body, or by falling into a do-while
        let entry = match analysis.prev_reachable(head) {
            Some(prev) if prev.opcode == Opcode::Goto => {
                prev.jump_target().map_or(head, |t| t as u32)
            }
            _ => head,
        };

        let id = LoopId(self.loops.len() as u32);
        self.loops.push(LoopRecord::new(head, backedge, entry, parent));
        self.loop_heads.insert(head, id);
        trace!(head, backedge, entry, "found loop");
        id
    }

    fn read(&mut self, slot: Slot, offset: u32, saved: &mut Vec<usize>) -> AnalysisResult<()> {
        let Some(var) = self.tracked_index(slot) else {
            return Ok(());
        };
        if let Some(current) = self.variables[var].lifetime {
            debug_assert!(offset <= self.segments[current].start);
            self.segments[current].start = offset;
            return Ok(());
        }
        if self.variables[var].saved.is_some() {
            if let Some(pos) = saved.iter().position(|&v| v == var) {
                saved.swap_remove(pos);
            }
        }
        let next = self.variables[var].saved.take();
        let segment = self.alloc(offset, next)?;
        self.variables[var].lifetime = Some(segment);
        Ok(())
    }

    fn write(&mut self, slot: Slot, offset: u32, saved: &mut Vec<usize>) -> AnalysisResult<()> {
        let Some(var) = self.tracked_index(slot) else {
            return Ok(());
        };
        match self.variables[var].lifetime.take() {
            None => {
                // A point segment marking the dead write
                let next = self.variables[var].saved;
                let segment = self.alloc(offset, next)?;
                self.segments[segment].write = true;
                self.variables[var].saved = Some(segment);
            }
            Some(current) => {
                // Live at the write itself, dead before it
                debug_assert!(offset < self.segments[current].start);
                self.segments[current].start = offset;
                self.segments[current].write = true;
                self.variables[var].saved = Some(current);
                saved.push(var);
            }
        }
        Ok(())
    }

    fn extend(&mut self, var: usize, start: u32, end: u32) -> AnalysisResult<()> {
        let Some(first) = self.variables[var].lifetime else {
            return Ok(());
        };
        self.segments[first].start = start;
        if start >= end {
            return Ok(());
        }

        let mut segment = first;
        while let Some(next) = self.segments[segment].next {
            if self.segments[next].start >= end {
                break;
            }
            segment = next;
        }
        if self.segments[segment].end >= end {
            return Ok(());
        }

        let tail_start = self.segments[segment].end;
        let tail = self.alloc(end, self.segments[segment].next)?;
        self.segments[tail].start = tail_start;
        self.segments[tail].loop_tail = true;
        self.segments[segment].next = Some(tail);
        Ok(())
    }

    fn alloc(&mut self, offset: u32, next: Option<usize>) -> AnalysisResult<usize> {
        if let Some(limit) = self.memory_limit {
            if self.segments.len() >= limit {
                return Err(AnalysisError::OutOfMemory);
            }
        }
        self.segments.push(Lifetime {
            start: offset,
            end: offset,
            loop_tail: false,
            write: false,
            next,
        });
        Ok(self.segments.len() - 1)
    }

    fn index(&self, slot: Slot) -> usize {
        match slot {
            Slot::This => 0,
            Slot::Arg(arg) => 1 + arg as usize,
            Slot::Local(local) => (1 + self.nargs + local) as usize,
        }
    }

    fn tracked_index(&self, slot: Slot) -> Option<usize> {
        let in_range = match slot {
            Slot::This => true,
            Slot::Arg(arg) => arg < self.nargs,
            Slot::Local(local) => local < self.local_count,
        };
        if !in_range {
            return None;
        }
        let index = self.index(slot);
        self.tracked[index].then_some(index)
    }

    fn head(&self, var: usize) -> Option<usize> {
        let variable = &self.variables[var];
        variable.lifetime.or(variable.saved)
    }

    fn live_var(&self, var: usize, offset: u32) -> Option<&Lifetime> {
        if let Some(current) = self.variables[var].lifetime {
            if self.segments[current].end >= offset {
                return Some(&self.segments[current]);
            }
        }
        let mut cursor = self.head(var);
        while let Some(index) = cursor {
            let segment = &self.segments[index];
            if segment.start > offset {
                break;
            }
            if segment.end >= offset {
                return Some(segment);
            }
            cursor = segment.next;
        }
        None
    }

    // ===== Queries =====

    /// Check whether a slot's live ranges were computed
    ///
    /// Untracked slots escape and are live everywhere.
    pub fn is_tracked(&self, slot: Slot) -> bool {
        self.tracked_index(slot).is_some()
    }

    /// Segment covering `offset`, if the variable is live there
    pub fn live_at(&self, slot: Slot, offset: u32) -> Option<&Lifetime> {
        let var = self.tracked_index(slot)?;
        self.live_var(var, offset)
    }

    /// All segments of a variable in offset order
    pub fn segments(&self, slot: Slot) -> Vec<Lifetime> {
        let mut result = Vec::new();
        let Some(var) = self.tracked_index(slot) else {
            return result;
        };
        let mut cursor = self.head(var);
        while let Some(index) = cursor {
            result.push(self.segments[index]);
            cursor = self.segments[index].next;
        }
        result
    }

    /// Offset of the first write to a variable within a loop body
    pub fn first_write(&self, slot: Slot, id: LoopId) -> Option<u32> {
        let record = self.loops.get(id.0 as usize)?;
        self.segments(slot)
            .into_iter()
            .take_while(|segment| segment.start <= record.backedge)
            .find(|segment| segment.start >= record.head && segment.write)
            .map(|segment| segment.start)
    }

    /// Offset of the write to a variable when the loop body writes it exactly once
    pub fn only_write(&self, slot: Slot, id: LoopId) -> Option<u32> {
        let record = self.loops.get(id.0 as usize)?;
        let mut writes = self
            .segments(slot)
            .into_iter()
            .take_while(|segment| segment.start <= record.backedge)
            .filter(|segment| segment.start >= record.head && segment.write)
            .map(|segment| segment.start);
        let first = writes.next()?;
        match writes.next() {
            Some(_) => None,
            None => Some(first),
        }
    }

    /// Loop whose head is at `offset`
    pub fn loop_at(&self, head: u32) -> Option<&LoopRecord> {
        let id = self.loop_heads.get(&head)?;
        self.loops.get(id.0 as usize)
    }

    /// Loop by id
    pub fn get_loop(&self, id: LoopId) -> Option<&LoopRecord> {
        self.loops.get(id.0 as usize)
    }

    /// All loops, inner loops after the loops enclosing them
    pub fn loops(&self) -> &[LoopRecord] {
        &self.loops
    }

    /// Tracked slots, `this` first
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        std::iter::once(Slot::This)
            .chain((0..self.nargs).map(Slot::Arg))
            .chain((0..self.local_count).map(Slot::Local))
            .filter(move |slot| self.is_tracked(*slot))
    }
}
