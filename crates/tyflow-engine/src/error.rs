//! Error types for analysis and inference

use thiserror::Error;
use tyflow_bytecode::{DecodeError, ScriptId};

/// Errors aborting the flow, stack or lifetime analysis of one script
///
/// A script whose analysis fails is treated as not inlineable and fully
/// dynamic; other scripts are unaffected, except for `OutOfMemory` which
/// escalates to discarding all speculative type information.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// Malformed bytecode
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The per-pass allocation budget was exhausted
    #[error("Analysis ran out of memory")]
    OutOfMemory,

    /// A jump target outside the script
    #[error("Jump at offset {offset} targets {target}, outside the script")]
    InvalidJump { offset: u32, target: i64 },

    /// An instruction pops more values than the stack holds
    #[error("Stack underflow at offset {0}")]
    StackUnderflow(u32),

    /// Two paths reach an instruction with different stack depths
    #[error("Stack depth mismatch at offset {offset}: expected {expected}, found {found}")]
    StackMismatch { offset: u32, expected: u32, found: u32 },

    /// A slot index beyond the script's frame
    #[error("Slot {slot} out of range at offset {offset}")]
    InvalidSlot { slot: u32, offset: u32 },
}

/// Errors from the type inference engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// Inference has been disabled after an allocation failure
    #[error("Type information has been discarded")]
    TypesNuked,

    /// The script was never registered with the engine
    #[error("Unknown script {0:?}")]
    UnknownScript(ScriptId),

    /// The underlying analysis failed
    #[error("Analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
}

/// Errors loading an `InferenceConfig`
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Out-of-range setting
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result alias for analyses
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Result alias for inference
pub type InferenceResult<T> = Result<T, InferenceError>;
