//! Per-script bytecode analyses
//!
//! - `flow`: reachability, stack depths and definite assignment
//! - `stack`: names of the values on the operand stack
//! - `lifetime`: live ranges of `this`, arguments and locals
//! - `loops`: loop bounds, tests, increments and modified slots

pub mod flow;
pub mod lifetime;
pub mod loops;
pub mod stack;

pub use flow::{InstrFlags, InstructionRecord, LocalState, ScriptAnalysis};
pub use lifetime::{Lifetime, LifetimeScript, Slot};
pub use loops::{Increment, LoopId, LoopRecord, LoopTest};
pub use stack::{StackAnalysis, StackUse, StackValue};
