//! Type sets
//!
//! A type set is a monotonically growing set of `Type`s: primitive flags,
//! an any-object flag, and a small set of concrete objects that collapses
//! into the any-object flag when it grows too large. Each set owns the
//! constraints listening for its new types.

use super::constraint::Constraint;
use super::types::{PropertyFlags, Type, TypeFlags, TypeTag};
use smallvec::SmallVec;

/// A set of possible runtime types
#[derive(Debug, Clone, Default)]
pub struct TypeSet {
    flags: TypeFlags,
    objects: SmallVec<[Type; 4]>,
    property: PropertyFlags,
    definite_slot: Option<u32>,
    pub(crate) constraints: Vec<Constraint>,
}

impl TypeSet {
    /// Create an empty type set
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether the set may hold any value
    pub fn is_unknown(&self) -> bool {
        self.flags.contains(TypeFlags::UNKNOWN)
    }

    /// Check whether the set may hold any object
    pub fn is_unknown_object(&self) -> bool {
        self.flags.intersects(TypeFlags::UNKNOWN | TypeFlags::ANYOBJECT)
    }

    /// Check whether the set holds nothing
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.objects.is_empty()
    }

    /// Primitive, any-object and unknown flags
    pub fn base_flags(&self) -> TypeFlags {
        self.flags & TypeFlags::BASE_MASK
    }

    /// Check whether any of `flags` is present
    pub fn has_any_flag(&self, flags: TypeFlags) -> bool {
        self.flags.intersects(flags)
    }

    /// Number of concrete objects tracked individually
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Concrete objects tracked individually
    pub fn objects(&self) -> &[Type] {
        &self.objects
    }

    /// Check whether adding `ty` would leave the set unchanged
    pub fn has_type(&self, ty: Type) -> bool {
        if self.is_unknown() {
            return true;
        }
        match ty {
            Type::Unknown => false,
            Type::AnyObject => self.flags.contains(TypeFlags::ANYOBJECT),
            Type::Singleton(_) | Type::Object(_) => {
                self.flags.contains(TypeFlags::ANYOBJECT) || self.objects.contains(&ty)
            }
            primitive => primitive
                .primitive_flag()
                .map_or(false, |flag| self.flags.contains(flag)),
        }
    }

    /// Every type in the set, in the order new constraints are told about them
    pub fn types(&self) -> SmallVec<[Type; 8]> {
        let mut types = SmallVec::new();
        if self.is_unknown() {
            types.push(Type::Unknown);
            return types;
        }
        const PRIMITIVES: [Type; 7] = [
            Type::Undefined,
            Type::Null,
            Type::Boolean,
            Type::Int32,
            Type::Double,
            Type::String,
            Type::LazyArgs,
        ];
        for ty in PRIMITIVES {
            if self.has_type(ty) {
                types.push(ty);
            }
        }
        if self.flags.contains(TypeFlags::ANYOBJECT) {
            types.push(Type::AnyObject);
        } else {
            types.extend(self.objects.iter().copied());
        }
        types
    }

    /// The single representation every value in the set shares
    pub fn known_tag(&self) -> TypeTag {
        if !self.objects.is_empty() {
            if self.base_flags().is_empty() {
                TypeTag::Object
            } else {
                TypeTag::Unknown
            }
        } else {
            TypeTag::from_flags(self.base_flags())
        }
    }

    /// Constraints attached to the set
    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    // ===== Mutation, driven by the engine =====

    /// Widen to every type; returns false if already unknown
    pub(crate) fn mark_unknown(&mut self) -> bool {
        if self.is_unknown() {
            return false;
        }
        self.flags |= TypeFlags::BASE_MASK;
        self.objects.clear();
        true
    }

    /// Add a primitive flag; double also adds int32
    pub(crate) fn insert_primitive(&mut self, flag: TypeFlags) -> bool {
        if self.flags.contains(flag) {
            return false;
        }
        self.flags |= flag;
        if flag == TypeFlags::DOUBLE {
            self.flags |= TypeFlags::INT32;
        }
        true
    }

    /// Collapse concrete objects into the any-object flag
    pub(crate) fn mark_any_object(&mut self) -> bool {
        if self.flags.contains(TypeFlags::ANYOBJECT) {
            return false;
        }
        self.flags |= TypeFlags::ANYOBJECT;
        self.objects.clear();
        true
    }

    /// Insert a concrete object; returns false if already present
    pub(crate) fn insert_object(&mut self, ty: Type) -> bool {
        debug_assert!(ty.is_object());
        if self.objects.contains(&ty) {
            return false;
        }
        self.objects.push(ty);
        true
    }

    /// Drop every concrete object failing `keep`; returns how many were dropped
    pub(crate) fn retain_objects(&mut self, mut keep: impl FnMut(Type) -> bool) -> usize {
        let before = self.objects.len();
        self.objects.retain(|ty| keep(*ty));
        before - self.objects.len()
    }

    pub(crate) fn reset(&mut self) {
        *self = TypeSet::default();
    }

    // ===== Property state =====

    /// Property state flags
    pub fn property_flags(&self) -> PropertyFlags {
        self.property
    }

    /// Check whether the property is own (or, with `configurable`, reconfigured) on some object
    pub fn is_own_property(&self, configurable: bool) -> bool {
        let flag = if configurable {
            PropertyFlags::CONFIGURED
        } else {
            PropertyFlags::OWN
        };
        self.property.contains(flag)
    }

    /// Check whether prototype types have been propagated into this set
    pub fn has_propagated_property(&self) -> bool {
        self.property.contains(PropertyFlags::PROPAGATED)
    }

    pub(crate) fn set_propagated_property(&mut self) {
        self.property |= PropertyFlags::PROPAGATED;
    }

    pub(crate) fn clear_propagated_property(&mut self) {
        self.property -= PropertyFlags::PROPAGATED;
    }

    /// Record own (and maybe configured) state; returns true if anything changed
    pub(crate) fn set_own_property(&mut self, configured: bool) -> bool {
        let mut flags = PropertyFlags::OWN;
        if configured {
            flags |= PropertyFlags::CONFIGURED;
        }
        if self.property.contains(flags) {
            return false;
        }
        self.property |= flags;
        true
    }

    /// Fixed slot of a definite property
    pub fn definite_slot(&self) -> Option<u32> {
        self.definite_slot
    }

    pub(crate) fn set_definite(&mut self, slot: u32) {
        self.definite_slot = Some(slot);
    }

    pub(crate) fn clear_definite(&mut self) {
        self.definite_slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::types::TypeObjectId;
    use tyflow_bytecode::HeapRef;

    #[test]
    fn test_double_implies_int() {
        let mut set = TypeSet::new();
        assert!(set.insert_primitive(TypeFlags::DOUBLE));
        assert!(set.has_type(Type::Int32));
        assert!(set.has_type(Type::Double));
        assert!(!set.insert_primitive(TypeFlags::DOUBLE));
        assert_eq!(set.known_tag(), TypeTag::Double);
    }

    #[test]
    fn test_unknown_contains_everything() {
        let mut set = TypeSet::new();
        set.insert_object(Type::Object(TypeObjectId(1)));
        assert!(set.mark_unknown());
        assert!(!set.mark_unknown());
        assert!(set.has_type(Type::String));
        assert!(set.has_type(Type::Singleton(HeapRef(9))));
        assert_eq!(set.object_count(), 0);
        assert_eq!(set.types().as_slice(), &[Type::Unknown]);
    }

    #[test]
    fn test_any_object_absorbs_objects() {
        let mut set = TypeSet::new();
        set.insert_primitive(TypeFlags::NULL);
        set.insert_object(Type::Singleton(HeapRef(1)));
        assert!(set.mark_any_object());
        assert!(set.has_type(Type::Object(TypeObjectId(3))));
        assert!(!set.has_type(Type::Unknown));
        assert_eq!(set.types().as_slice(), &[Type::Null, Type::AnyObject]);
    }

    #[test]
    fn test_known_tag_with_objects() {
        let mut set = TypeSet::new();
        set.insert_object(Type::Object(TypeObjectId(0)));
        assert_eq!(set.known_tag(), TypeTag::Object);
        set.insert_primitive(TypeFlags::UNDEFINED);
        assert_eq!(set.known_tag(), TypeTag::Unknown);
    }

    #[test]
    fn test_property_state() {
        let mut set = TypeSet::new();
        assert!(!set.is_own_property(false));
        assert!(set.set_own_property(false));
        assert!(set.is_own_property(false));
        assert!(!set.is_own_property(true));
        assert!(!set.set_own_property(false));
        assert!(set.set_own_property(true));
        assert!(set.is_own_property(true));
    }
}
