//! Speculative type inference
//!
//! A compartment-wide graph of type sets linked by constraints. Type sets
//! only grow; constraints forward new types between sets and, for freeze
//! constraints, request recompilation of code that assumed a set would
//! not change.
//!
//! - `types`, `typeset`, `object`: the type model
//! - `engine`, `constraint`, `barrier`: propagation
//! - `script`, `effects`: per-script analysis and the opcode rules
//! - `queries`, `feedback`: the compiler and runtime entry points
//! - `tables`, `new_script`: shared literal types and constructor properties
//! - `sweep`, `snapshot`: collection and inspection

pub mod barrier;
pub mod constraint;
mod effects;
pub mod engine;
mod feedback;
mod new_script;
pub mod object;
mod queries;
pub mod script;
pub mod snapshot;
pub mod sweep;
mod tables;
pub mod types;
pub mod typeset;

pub use barrier::TypeBarrier;
pub use constraint::{CallSite, CallSiteId, Constraint, MarkId};
pub use engine::{EngineStats, InferenceEngine};
pub use object::{
    HeapObject, Initializer, NativeFunction, NewScript, ObjectFlags, ObjectKind, ProtoKind, TypeObject,
    PROPERTY_COUNT_LIMIT,
};
pub use script::{DynamicResult, TypeScript};
pub use snapshot::{PushedSnapshot, ScriptSnapshot, TypeSetSnapshot};
pub use sweep::{Liveness, SweepStats};
pub use types::{AtomId, PropertyId, PropertyFlags, Type, TypeFlags, TypeObjectId, TypeSetId, TypeTag};
pub use typeset::TypeSet;
