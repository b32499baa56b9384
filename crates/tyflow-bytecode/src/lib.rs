//! Tyflow Bytecode Definitions
//!
//! This crate provides the instruction set analyzed by the tyflow engine,
//! its encoder and decoder, and the `Script` descriptor handed to analyses.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod decoder;
pub mod encoder;
pub mod opcode;
pub mod script;

pub use decoder::{decode_instr, decode_script, Instr, Operands};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use opcode::{OperandFormat, Opcode};
pub use script::{HeapRef, Script, ScriptId};
