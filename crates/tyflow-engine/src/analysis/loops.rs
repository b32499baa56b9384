//! Loop records
//!
//! Every back-edge found by the lifetime pass opens a loop. Beyond its
//! bounds, a loop records facts a compiler can use to hoist checks out of
//! the body: the comparison controlling the back-edge, variables stepped
//! by exactly one each iteration, and what the body may modify.

use super::flow::ScriptAnalysis;
use super::lifetime::{LifetimeScript, Slot};
use smallvec::SmallVec;
use tyflow_bytecode::{Instr, Opcode};

/// Index of a loop in its script's loop list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

/// Inequality holding whenever the back-edge is taken
///
/// Reads `lhs <= rhs + constant` when `less_equal`, otherwise
/// `lhs >= rhs + constant`. A missing `rhs` reads as zero. The `rhs` slot is
/// never written in the loop body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTest {
    pub lhs: Slot,
    pub rhs: Option<Slot>,
    pub constant: i32,
    pub less_equal: bool,
}

/// A slot changed by exactly one increment or decrement per iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    pub slot: Slot,
    pub offset: u32,
}

/// One loop, discovered at its back-edge
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRecord {
    /// Offset of the first instruction of the body
    pub head: u32,
    /// Offset of the jump back to `head`
    pub backedge: u32,
    /// Target of the initial jump or fallthrough into the loop
    pub entry: u32,
    /// Start of the last basic block, which runs on every iteration
    pub last_block: u32,
    /// Innermost enclosing loop
    pub parent: Option<LoopId>,
    /// The body contains an instruction execution can resume at
    pub has_safe_points: bool,
    /// The body contains a call or a nested loop
    pub has_calls_loops: bool,
    /// Comparison controlling the back-edge, when recognizable
    pub test: Option<LoopTest>,
    /// Slots stepped by one on each iteration
    pub increments: SmallVec<[Increment; 2]>,
    /// The body may modify objects or slots not listed in `modified`
    pub unknown_modset: bool,
    /// Slots written in the body
    pub modified: SmallVec<[Slot; 4]>,
}

impl LoopRecord {
    pub(crate) fn new(head: u32, backedge: u32, entry: u32, parent: Option<LoopId>) -> Self {
        Self {
            head,
            backedge,
            entry,
            last_block: head,
            parent,
            has_safe_points: false,
            has_calls_loops: false,
            test: None,
            increments: SmallVec::new(),
            unknown_modset: false,
            modified: SmallVec::new(),
        }
    }

    /// Check whether an offset lies in the loop body
    pub fn contains(&self, offset: u32) -> bool {
        offset >= self.head && offset <= self.backedge
    }
}

/// Fill in the test, increments and modified set of one loop
pub(crate) fn analyze_loop(
    analysis: &ScriptAnalysis,
    lifetimes: &LifetimeScript,
    id: LoopId,
) -> Option<LoopRecord> {
    let mut record = lifetimes.get_loop(id)?.clone();

    let body: Vec<&Instr> = analysis
        .reachable()
        .filter(|instr| record.contains(instr.offset))
        .collect();

    for instr in &body {
        if let Some(slot) = written_slot(instr) {
            if !record.modified.contains(&slot) {
                record.modified.push(slot);
            }
        }
        if modifies_unknown(instr.opcode) {
            record.unknown_modset = true;
        }
    }

    for &slot in &record.modified {
        let Some(offset) = lifetimes.only_write(slot, id) else {
            continue;
        };
        let stepped = analysis
            .instr_at(offset)
            .map_or(false, |instr| instr.opcode.is_inc_dec());
        if stepped {
            record.increments.push(Increment { slot, offset });
        }
    }

    record.test = loop_test(&body, &record, lifetimes, id);
    Some(record)
}

/// Slot written by a local or argument store
fn written_slot(instr: &Instr) -> Option<Slot> {
    match instr.opcode {
        Opcode::SetLocal
        | Opcode::IncLocal
        | Opcode::DecLocal
        | Opcode::LocalInc
        | Opcode::LocalDec => Some(Slot::Local(instr.u16_operand())),
        Opcode::SetArg | Opcode::IncArg | Opcode::DecArg | Opcode::ArgInc | Opcode::ArgDec => {
            Some(Slot::Arg(instr.u16_operand()))
        }
        _ => None,
    }
}

/// Opcodes whose writes cannot be attributed to a known slot
fn modifies_unknown(op: Opcode) -> bool {
    op.is_invoke()
        || matches!(
            op,
            Opcode::SetProp
                | Opcode::SetElem
                | Opcode::IncProp
                | Opcode::PropInc
                | Opcode::IncElem
                | Opcode::ElemInc
                | Opcode::DelProp
                | Opcode::DelElem
                | Opcode::SetName
                | Opcode::SetGName
                | Opcode::IncName
                | Opcode::NameInc
                | Opcode::IncGName
                | Opcode::GNameInc
                | Opcode::ArrayPush
                | Opcode::EnterWith
        )
}

/// Operand of a loop comparison
#[derive(Debug, Clone, Copy)]
enum TestOperand {
    Slot(Slot),
    Constant(i32),
}

fn test_operand(instr: &Instr) -> Option<TestOperand> {
    match instr.opcode {
        Opcode::GetLocal => Some(TestOperand::Slot(Slot::Local(instr.u16_operand()))),
        Opcode::GetArg => Some(TestOperand::Slot(Slot::Arg(instr.u16_operand()))),
        _ => instr.int_constant().map(TestOperand::Constant),
    }
}

/// Recognize `lhs CMP rhs; IFNE head` ending the loop body
fn loop_test(
    body: &[&Instr],
    record: &LoopRecord,
    lifetimes: &LifetimeScript,
    id: LoopId,
) -> Option<LoopTest> {
    let [.., lhs, rhs, cmp, branch] = body else {
        return None;
    };
    if branch.offset != record.backedge || branch.opcode != Opcode::IfNe {
        return None;
    }

    let (mut less, equal) = match cmp.opcode {
        Opcode::Lt => (true, false),
        Opcode::Le => (true, true),
        Opcode::Gt => (false, false),
        Opcode::Ge => (false, true),
        _ => return None,
    };

    let (lhs, rhs) = match (test_operand(lhs)?, test_operand(rhs)?) {
        (TestOperand::Slot(lhs), rhs) => (lhs, rhs),
        (TestOperand::Constant(c), TestOperand::Slot(slot)) => {
            // Flip `c < x` into `x > c`
            less = !less;
            (slot, TestOperand::Constant(c))
        }
        (TestOperand::Constant(_), TestOperand::Constant(_)) => return None,
    };

    let (rhs, mut constant) = match rhs {
        TestOperand::Slot(slot) => {
            if lifetimes.first_write(slot, id).is_some() || !lifetimes.is_tracked(slot) {
                return None;
            }
            (Some(slot), 0)
        }
        TestOperand::Constant(c) => (None, c),
    };

    if !equal {
        // Strict comparisons tighten by one
        constant = if less {
            constant.checked_sub(1)?
        } else {
            constant.checked_add(1)?
        };
    }

    Some(LoopTest {
        lhs,
        rhs,
        constant,
        less_equal: less,
    })
}
