//! Types and handles of the type model

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use tyflow_bytecode::HeapRef;

/// Handle of a type object in the engine's object arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeObjectId(pub u32);

impl TypeObjectId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a type set in the engine's set arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeSetId(pub u32);

impl TypeSetId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interned property name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AtomId(pub u32);

/// Key of a property type set on a type object
///
/// All integer-indexed properties share `Elements`. `Empty` never names a
/// real property: constraints watching the object's own flags attach to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyId {
    /// Object state, not a property
    Empty,
    /// Every integer-indexed element
    Elements,
    /// A named property
    Named(AtomId),
}

/// One possible runtime type of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Undefined,
    Null,
    Boolean,
    Int32,
    Double,
    String,
    /// The not-yet-materialized arguments of a frame
    LazyArgs,
    /// Any value at all
    Unknown,
    /// Any object
    AnyObject,
    /// One specific heap object
    Singleton(HeapRef),
    /// Any object described by a type object
    Object(TypeObjectId),
}

impl Type {
    /// Check whether this is a primitive type
    pub fn is_primitive(self) -> bool {
        self.primitive_flag().is_some()
    }

    /// Check whether this is a concrete object: a singleton or a type object
    pub fn is_object(self) -> bool {
        matches!(self, Type::Singleton(_) | Type::Object(_))
    }

    /// Check whether this type may be any object at all
    pub fn is_unknown_object(self) -> bool {
        matches!(self, Type::Unknown | Type::AnyObject)
    }

    /// Flag recording this type in a set, for primitives
    pub fn primitive_flag(self) -> Option<TypeFlags> {
        match self {
            Type::Undefined => Some(TypeFlags::UNDEFINED),
            Type::Null => Some(TypeFlags::NULL),
            Type::Boolean => Some(TypeFlags::BOOLEAN),
            Type::Int32 => Some(TypeFlags::INT32),
            Type::Double => Some(TypeFlags::DOUBLE),
            Type::String => Some(TypeFlags::STRING),
            Type::LazyArgs => Some(TypeFlags::LAZYARGS),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Undefined => write!(f, "void"),
            Type::Null => write!(f, "null"),
            Type::Boolean => write!(f, "bool"),
            Type::Int32 => write!(f, "int"),
            Type::Double => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::LazyArgs => write!(f, "lazyargs"),
            Type::Unknown => write!(f, "unknown"),
            Type::AnyObject => write!(f, "object"),
            Type::Singleton(heap) => write!(f, "<0x{:x}>", heap.0),
            Type::Object(id) => write!(f, "T{}", id.0),
        }
    }
}

bitflags! {
    /// Primitive and summary flags of a type set
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        const UNDEFINED = 1 << 0;
        const NULL = 1 << 1;
        const BOOLEAN = 1 << 2;
        const INT32 = 1 << 3;
        const DOUBLE = 1 << 4;
        const STRING = 1 << 5;
        const LAZYARGS = 1 << 6;
        const ANYOBJECT = 1 << 7;
        const UNKNOWN = 1 << 8;

        /// Every primitive
        const PRIMITIVE = Self::UNDEFINED.bits()
            | Self::NULL.bits()
            | Self::BOOLEAN.bits()
            | Self::INT32.bits()
            | Self::DOUBLE.bits()
            | Self::STRING.bits()
            | Self::LAZYARGS.bits();
        /// Everything a set may hold once it is unknown
        const BASE_MASK = Self::PRIMITIVE.bits() | Self::ANYOBJECT.bits() | Self::UNKNOWN.bits();
    }
}

bitflags! {
    /// Property state carried by type sets of object properties
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u8 {
        /// Some object has this as an own property
        const OWN = 1 << 0;
        /// The property has been deleted, reconfigured or given a setter
        const CONFIGURED = 1 << 1;
        /// Prototype property types have been wired into this set
        const PROPAGATED = 1 << 2;
    }
}

/// Known representation of every value in a type set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Undefined,
    Null,
    Boolean,
    Int32,
    Double,
    String,
    LazyArgs,
    Object,
    Unknown,
}

impl TypeTag {
    /// Tag for a set holding exactly the given primitive flags
    pub fn from_flags(flags: TypeFlags) -> TypeTag {
        let flags = flags & TypeFlags::BASE_MASK;
        if flags == TypeFlags::UNDEFINED {
            TypeTag::Undefined
        } else if flags == TypeFlags::NULL {
            TypeTag::Null
        } else if flags == TypeFlags::BOOLEAN {
            TypeTag::Boolean
        } else if flags == TypeFlags::INT32 {
            TypeTag::Int32
        } else if flags == TypeFlags::INT32 | TypeFlags::DOUBLE || flags == TypeFlags::DOUBLE {
            TypeTag::Double
        } else if flags == TypeFlags::STRING {
            TypeTag::String
        } else if flags == TypeFlags::LAZYARGS {
            TypeTag::LazyArgs
        } else if flags == TypeFlags::ANYOBJECT {
            TypeTag::Object
        } else {
            TypeTag::Unknown
        }
    }
}
