//! Script descriptors
//!
//! A `Script` is one function body (or top-level program): its code bytes
//! plus the frame metadata the analyses need. Atoms, object constants,
//! nested functions and object-literal templates are referenced from the
//! bytecode by index.

use serde::{Deserialize, Serialize};

/// Identifier of a script, unique within an inference engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(pub u32);

/// Opaque reference to a heap object owned by the host runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapRef(pub u64);

/// A function body and its frame layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// Script identifier
    pub id: ScriptId,
    /// Function name, for diagnostics
    pub name: String,
    /// Raw bytecode
    pub code: Vec<u8>,
    /// Number of formal arguments
    pub nargs: u32,
    /// Number of fixed local slots
    pub nfixed: u32,
    /// Whether this is a function body rather than a top-level program
    pub is_function: bool,
    /// Argument slots captured by nested closures
    pub closed_args: Vec<u32>,
    /// Local slots captured by nested closures
    pub closed_vars: Vec<u32>,
    /// Contains a direct eval
    pub uses_eval: bool,
    /// Reads the arguments object
    pub uses_arguments: bool,
    /// Needs a heap-allocated call object
    pub heavyweight: bool,
    /// Strict mode code
    pub strict: bool,
    /// Interned names referenced by atom operands
    pub atoms: Vec<String>,
    /// Object constants referenced by OBJECT operands
    pub objects: Vec<HeapRef>,
    /// Nested functions referenced by LAMBDA operands
    pub functions: Vec<ScriptId>,
    /// Property atoms, in slot order, for NEWOBJECT templates
    pub templates: Vec<Vec<u32>>,
}

impl Script {
    /// Create a function script with no arguments, locals or constants
    pub fn new(id: ScriptId, name: impl Into<String>, code: Vec<u8>) -> Self {
        Self {
            id,
            name: name.into(),
            code,
            nargs: 0,
            nfixed: 0,
            is_function: true,
            closed_args: Vec::new(),
            closed_vars: Vec::new(),
            uses_eval: false,
            uses_arguments: false,
            heavyweight: false,
            strict: false,
            atoms: Vec::new(),
            objects: Vec::new(),
            functions: Vec::new(),
            templates: Vec::new(),
        }
    }

    /// Code length in bytes
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the script has no code
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Name for an atom operand
    pub fn atom(&self, index: u32) -> Option<&str> {
        self.atoms.get(index as usize).map(String::as_str)
    }
}
