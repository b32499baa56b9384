//! Type objects and the host's heap objects
//!
//! A `TypeObject` stands for every object allocated at one site or sharing
//! one prototype, or for one specific heap object (a singleton). It holds
//! a type set per property and flags that only ever accumulate.

use super::types::{PropertyId, Type, TypeSetId};
use bitflags::bitflags;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tyflow_bytecode::{HeapRef, ScriptId};

/// Objects with more properties than this have unknown properties
pub const PROPERTY_COUNT_LIMIT: usize = 256;

bitflags! {
    /// Object-level facts, each narrowing what compiled code may assume
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u32 {
        /// Some object is not a dense array
        const NON_DENSE_ARRAY = 1 << 0;
        /// Some object is not a packed array
        const NON_PACKED_ARRAY = 1 << 1;
        /// Some object is not a typed array
        const NON_TYPED_ARRAY = 1 << 2;
        /// An arguments object was created for the function
        const CREATED_ARGUMENTS = 1 << 3;
        /// The function must not be inlined
        const UNINLINEABLE = 1 << 4;
        /// Equality on these objects runs a hook
        const SPECIAL_EQUALITY = 1 << 5;
        /// The object has been iterated with a custom iterator
        const ITERATED = 1 << 6;
        /// The function may be reentered
        const REENTRANT_FUNCTION = 1 << 7;
        /// Definite properties from the constructor were discarded
        const NEW_SCRIPT_CLEARED = 1 << 8;
        /// Constraints backing the definite properties must be rebuilt
        const NEW_SCRIPT_REGENERATE = 1 << 9;
        /// Sets holding this object were widened to any-object
        const SETS_MARKED_UNKNOWN = 1 << 10;
        /// Property types are not tracked
        const UNKNOWN_PROPERTIES = 1 << 11;

        /// Flags set when properties become unknown
        const DYNAMIC_MASK = Self::NON_DENSE_ARRAY.bits()
            | Self::NON_PACKED_ARRAY.bits()
            | Self::NON_TYPED_ARRAY.bits()
            | Self::CREATED_ARGUMENTS.bits()
            | Self::UNINLINEABLE.bits()
            | Self::SPECIAL_EQUALITY.bits()
            | Self::ITERATED.bits()
            | Self::REENTRANT_FUNCTION.bits();
    }
}

/// Built-in class of an allocation or a standard prototype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtoKind {
    Object,
    Array,
    Function,
    Number,
    Boolean,
    String,
    RegExp,
    Generator,
    Iterator,
    TypedArray,
}

impl ProtoKind {
    /// Flags every object of this class starts with
    pub fn initial_flags(self) -> ObjectFlags {
        match self {
            ProtoKind::Array => ObjectFlags::NON_TYPED_ARRAY,
            ProtoKind::TypedArray => ObjectFlags::NON_DENSE_ARRAY | ObjectFlags::NON_PACKED_ARRAY,
            _ => {
                ObjectFlags::NON_DENSE_ARRAY
                    | ObjectFlags::NON_PACKED_ARRAY
                    | ObjectFlags::NON_TYPED_ARRAY
            }
        }
    }
}

/// Natives whose effect on property types is modeled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeFunction {
    ArrayPush,
    ArrayPop,
    FunctionCall,
    FunctionApply,
    Other,
}

/// What a heap object is, as far as inference cares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Plain,
    Array,
    /// An interpreted function
    Function(ScriptId),
    /// A native function
    Native(NativeFunction),
    Global,
}

/// A heap object described by the host runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeapObject {
    pub kind: ObjectKind,
    pub proto: Option<HeapRef>,
    /// Own data properties and their current value types
    pub properties: Vec<(PropertyId, Type)>,
    /// Equality on the object runs a hook
    pub special_equality: bool,
}

impl HeapObject {
    /// A plain object with the given prototype
    pub fn plain(proto: Option<HeapRef>) -> Self {
        Self {
            kind: ObjectKind::Plain,
            proto,
            properties: Vec::new(),
            special_equality: false,
        }
    }

    /// An interpreted function object
    pub fn function(script: ScriptId, proto: Option<HeapRef>) -> Self {
        Self {
            kind: ObjectKind::Function(script),
            ..Self::plain(proto)
        }
    }

    /// A native function object
    pub fn native(native: NativeFunction, proto: Option<HeapRef>) -> Self {
        Self {
            kind: ObjectKind::Native(native),
            ..Self::plain(proto)
        }
    }

    /// Add an own property
    pub fn with_property(mut self, id: PropertyId, ty: Type) -> Self {
        self.properties.push((id, ty));
        self
    }
}

/// A step in initializing an object built by a constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initializer {
    /// A definite property is assigned at this offset
    SetProp(u32),
    /// Initialization continues in a callee called at this offset
    FramePush(u32),
    /// The callee returned
    FramePop,
    /// Every definite property has been assigned
    Done,
}

/// Definite properties a constructor always adds before `this` escapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewScript {
    /// The constructor
    pub script: ScriptId,
    /// Definite properties in slot order
    pub properties: Vec<PropertyId>,
    /// Where each property is assigned
    pub initializers: Vec<Initializer>,
}

/// Abstraction of a group of objects
#[derive(Debug, Clone)]
pub struct TypeObject {
    /// Name for diagnostics
    pub name: String,
    /// Prototype shared by every object of this type
    pub proto: Option<HeapRef>,
    /// Accumulated object flags
    pub flags: ObjectFlags,
    /// Script run when calling objects of this type
    pub function_script: Option<ScriptId>,
    /// The single heap object this type describes
    pub singleton: Option<HeapRef>,
    /// Growth this object has caused in object sets
    pub contribution: u32,
    /// Definite properties from the constructor
    pub new_script: Option<NewScript>,
    pub(crate) properties: FxHashMap<PropertyId, TypeSetId>,
}

impl TypeObject {
    pub(crate) fn new(name: impl Into<String>, proto: Option<HeapRef>, flags: ObjectFlags) -> Self {
        Self {
            name: name.into(),
            proto,
            flags,
            function_script: None,
            singleton: None,
            contribution: 0,
            new_script: None,
            properties: FxHashMap::default(),
        }
    }

    /// Property types are not tracked
    pub fn unknown_properties(&self) -> bool {
        self.flags.contains(ObjectFlags::UNKNOWN_PROPERTIES)
    }

    /// Check whether any of `flags` is set
    pub fn has_any_flags(&self, flags: ObjectFlags) -> bool {
        self.flags.intersects(flags)
    }

    /// Type set of a property, if it has been created
    pub fn maybe_property(&self, id: PropertyId) -> Option<TypeSetId> {
        self.properties.get(&id).copied()
    }

    /// Number of property type sets
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Every property and its type set
    pub fn properties(&self) -> impl Iterator<Item = (PropertyId, TypeSetId)> + '_ {
        self.properties.iter().map(|(id, set)| (*id, *set))
    }
}
