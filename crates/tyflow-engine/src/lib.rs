//! Tyflow Engine
//!
//! Bytecode analyses and speculative type inference for a dynamically
//! typed virtual machine:
//! - **Flow analysis**: reachability, stack depths and definite assignment
//!   (`analysis::flow`, `analysis::stack`)
//! - **Lifetime analysis**: live ranges and loop records for register
//!   allocation (`analysis::lifetime`, `analysis::loops`)
//! - **Type inference**: the type model, the constraint engine and the
//!   per-opcode type rules (`infer`)
//!
//! # Example
//!
//! ```rust,ignore
//! use tyflow_bytecode::{BytecodeWriter, Opcode, Script, ScriptId};
//! use tyflow_engine::{InferenceEngine, Type};
//!
//! let mut w = BytecodeWriter::new();
//! w.emit_get_arg(0);
//! w.emit_op(Opcode::One);
//! w.emit_op(Opcode::Add);
//! w.emit_op(Opcode::Return);
//!
//! let mut engine = InferenceEngine::default();
//! let id = engine.add_script(Script { nargs: 1, ..Script::new(ScriptId(0), "inc", w.into_bytes()) });
//! engine.ensure_ran_inference(id)?;
//! engine.report_observed_call(id, Type::Undefined, &[Type::Int32], false);
//! ```

#![warn(rust_2018_idioms)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod infer;

pub use analysis::{
    InstrFlags, Lifetime, LifetimeScript, LocalState, LoopRecord, ScriptAnalysis, Slot, StackAnalysis,
};
pub use config::InferenceConfig;
pub use error::{AnalysisError, AnalysisResult, ConfigError, InferenceError, InferenceResult};
pub use infer::{
    HeapObject, InferenceEngine, Liveness, ObjectFlags, ObjectKind, PropertyId, ProtoKind, ScriptSnapshot,
    SweepStats, Type, TypeObjectId, TypeSetId, TypeSetSnapshot, TypeTag,
};
