//! Queries made by a compiler generating speculative code
//!
//! Each query answers from the current state of the type graph and, when
//! the answer could later become wrong, attaches a freeze constraint that
//! requests recompilation of the querying script once it does. Once types
//! are nuked nothing is watched any more, so every query gives its
//! conservative answer.

use super::constraint::Constraint;
use super::engine::InferenceEngine;
use super::object::ObjectFlags;
use super::types::{PropertyId, Type, TypeObjectId, TypeSetId, TypeTag};
use tracing::trace;
use tyflow_bytecode::{HeapRef, Opcode, ScriptId};

impl InferenceEngine {
    /// Representation shared by every value in `set`
    ///
    /// A known tag stays valid until the set gains a type of another tag.
    pub fn known_type_tag(&mut self, script: ScriptId, set: TypeSetId) -> TypeTag {
        if !self.is_enabled() {
            return TypeTag::Unknown;
        }
        let tag = self.set(set).known_tag();
        if tag != TypeTag::Unknown {
            self.add_constraint(set, Constraint::FreezeTypeTag { script, marked: false }, false);
        }
        tag
    }

    /// Check whether any object in `set` may have one of `flags`
    ///
    /// A `false` answer is watched: on every object now in the set, and on
    /// objects the set gains later.
    pub fn has_object_flags(&mut self, script: ScriptId, set: TypeSetId, flags: ObjectFlags) -> bool {
        if !self.is_enabled() || self.set(set).is_unknown_object() {
            return true;
        }
        let mut objects = Vec::new();
        for ty in self.set(set).objects().to_vec() {
            match self.type_object_of(ty) {
                Some(object) => objects.push(object),
                None => return true,
            }
        }
        if objects
            .iter()
            .any(|object| self.object(*object).map_or(true, |o| o.has_any_flags(flags)))
        {
            return true;
        }

        let mark = self.new_mark();
        self.add_constraint(set, Constraint::FreezeObjectFlagsSet { script, flags, mark }, false);
        for object in objects {
            let state = self.get_property(object, PropertyId::Empty, false);
            self.add_constraint(state, Constraint::FreezeObjectFlags { script, flags, mark }, false);
        }
        false
    }

    /// Check whether `object` may have one of `flags`, watching a `false` answer
    pub fn object_has_flags(&mut self, script: ScriptId, object: TypeObjectId, flags: ObjectFlags) -> bool {
        if !self.is_enabled() || self.object(object).map_or(true, |o| o.has_any_flags(flags)) {
            return true;
        }
        let mark = self.new_mark();
        let state = self.get_property(object, PropertyId::Empty, false);
        self.add_constraint(state, Constraint::FreezeObjectFlags { script, flags, mark }, false);
        false
    }

    /// Recompile `script` when slots of `object` are reallocated
    pub fn watch_object_reallocation(&mut self, script: ScriptId, object: TypeObjectId) {
        let mark = self.new_mark();
        let state = self.get_property(object, PropertyId::Empty, false);
        self.add_constraint(
            state,
            Constraint::FreezeObjectFlags {
                script,
                flags: ObjectFlags::empty(),
                mark,
            },
            false,
        );
    }

    /// Check whether the property `set` is own on some object
    ///
    /// With `configurable`, also whether it was deleted, reconfigured or
    /// given a setter.
    pub fn is_own_property(&mut self, script: ScriptId, set: TypeSetId, configurable: bool) -> bool {
        if !self.is_enabled() || self.set(set).is_own_property(configurable) {
            return true;
        }
        self.add_constraint(
            set,
            Constraint::FreezeOwnProperty {
                script,
                configurable,
                updated: false,
            },
            false,
        );
        false
    }

    /// Check whether `set` holds any type, watching an empty set
    pub fn known_non_empty(&mut self, script: ScriptId, set: TypeSetId) -> bool {
        if !self.is_enabled() || !self.set(set).is_empty() {
            return true;
        }
        self.add_freeze(script, set);
        false
    }

    /// The one heap object `set` can hold, if that is all it holds
    pub fn singleton(&mut self, script: ScriptId, set: TypeSetId) -> Option<HeapRef> {
        if !self.is_enabled() {
            return None;
        }
        let types = self.set(set);
        if !types.base_flags().is_empty() || types.object_count() != 1 {
            return None;
        }
        let Type::Singleton(heap) = types.objects()[0] else {
            return None;
        };
        self.add_freeze(script, set);
        Some(heap)
    }

    /// Recompile `script` when `set` gains any type
    pub fn add_freeze(&mut self, script: ScriptId, set: TypeSetId) {
        trace!(script = script.0, set = set.0, "freeze");
        self.add_constraint(set, Constraint::Freeze { script, marked: false }, false);
    }

    /// Check a value the runtime pushed against its inferred set
    ///
    /// Returns `false` when inference ran for the script and the set of
    /// pushed value `index` misses `ty`. Values the rules leave untyped
    /// always pass.
    pub fn check_pushed(&self, script: ScriptId, offset: u32, index: u32, ty: Type) -> bool {
        let Some(inference) = self.inference(script) else {
            return true;
        };
        let Some(instr) = inference.flow.instr_at(offset) else {
            return true;
        };
        if ignore_pushed(instr.opcode, index) {
            return true;
        }
        match self.pushed_types(script, offset, index) {
            Some(set) => self.set(set).has_type(ty),
            None => true,
        }
    }
}

/// Pushed values the rules deliberately leave without types
fn ignore_pushed(opcode: Opcode, index: u32) -> bool {
    match opcode {
        // Scope objects
        Opcode::BindName | Opcode::BindGName => true,
        // Hooks may make these produce non-booleans
        Opcode::In | Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
            index == 0
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::object::ProtoKind;

    #[test]
    fn test_known_type_tag_freezes() {
        let mut engine = InferenceEngine::default();
        let script = engine.add_test_script("compiled", true);
        let set = engine.new_set();
        engine.add_type(set, Type::Int32);

        assert_eq!(engine.known_type_tag(script, set), TypeTag::Int32);
        engine.add_type(set, Type::Double);
        assert_eq!(engine.take_pending_recompiles(), vec![script]);
    }

    #[test]
    fn test_has_object_flags_watches_objects() {
        let mut engine = InferenceEngine::default();
        let script = engine.add_test_script("compiled", true);
        let array = engine.new_type_object("a", None, ProtoKind::Array);
        let set = engine.new_set();
        engine.add_type(set, Type::Object(array));

        assert!(!engine.has_object_flags(script, set, ObjectFlags::NON_DENSE_ARRAY));
        engine.set_object_flags(array, ObjectFlags::NON_DENSE_ARRAY);
        assert_eq!(engine.take_pending_recompiles(), vec![script]);
    }

    #[test]
    fn test_has_object_flags_watches_new_objects() {
        let mut engine = InferenceEngine::default();
        let script = engine.add_test_script("compiled", true);
        let array = engine.new_type_object("a", None, ProtoKind::Array);
        let plain = engine.new_type_object("p", None, ProtoKind::Object);
        let set = engine.new_set();
        engine.add_type(set, Type::Object(array));

        assert!(!engine.has_object_flags(script, set, ObjectFlags::NON_DENSE_ARRAY));
        engine.add_type(set, Type::Object(plain));
        assert_eq!(engine.take_pending_recompiles(), vec![script]);
    }

    #[test]
    fn test_has_object_flags_for_unknown_objects() {
        let mut engine = InferenceEngine::default();
        let script = engine.add_test_script("compiled", true);
        let set = engine.new_set();
        engine.add_type(set, Type::AnyObject);
        assert!(engine.has_object_flags(script, set, ObjectFlags::NON_DENSE_ARRAY));
    }

    #[test]
    fn test_watch_object_reallocation() {
        let mut engine = InferenceEngine::default();
        let script = engine.add_test_script("compiled", true);
        let object = engine.new_type_object("o", None, ProtoKind::Object);
        engine.watch_object_reallocation(script, object);

        engine.mark_slot_reallocation(object);
        assert_eq!(engine.take_pending_recompiles(), vec![script]);
    }

    #[test]
    fn test_is_own_property_watches_configuration() {
        let mut engine = InferenceEngine::default();
        let script = engine.add_test_script("compiled", true);
        let object = engine.new_type_object("o", None, ProtoKind::Object);
        let x = engine.property_id("x");
        let set = engine.get_property(object, x, false);

        assert!(!engine.is_own_property(script, set, false));
        engine.mark_property_configured(object, x);
        assert_eq!(engine.take_pending_recompiles(), vec![script]);
        assert!(engine.is_own_property(script, set, true));
    }

    #[test]
    fn test_singleton_and_non_empty() {
        let mut engine = InferenceEngine::default();
        let script = engine.add_test_script("compiled", true);
        let set = engine.new_set();
        assert!(!engine.known_non_empty(script, set));
        assert_eq!(engine.singleton(script, set), None);

        engine.add_type(set, Type::Singleton(HeapRef(3)));
        assert_eq!(engine.take_pending_recompiles(), vec![script]);
        engine.mark_compiled(script);
        assert_eq!(engine.singleton(script, set), Some(HeapRef(3)));

        engine.add_type(set, Type::Null);
        assert_eq!(engine.singleton(script, set), None);
        assert_eq!(engine.take_pending_recompiles(), vec![script]);
    }

    #[test]
    fn test_queries_are_conservative_after_nuke() {
        let mut engine = InferenceEngine::default();
        let script = engine.add_test_script("compiled", true);
        let array = engine.new_type_object("a", None, ProtoKind::Array);
        let x = engine.property_id("x");
        let property = engine.get_property(array, x, false);
        let ints = engine.new_set();
        engine.add_type(ints, Type::Int32);
        let objects = engine.new_set();
        engine.add_type(objects, Type::Object(array));
        let singleton = engine.new_set();
        engine.add_type(singleton, Type::Singleton(HeapRef(5)));
        let empty = engine.new_set();

        engine.set_pending_nuke_types();
        engine.nuke_types();
        assert!(!engine.is_enabled());

        assert_eq!(engine.known_type_tag(script, ints), TypeTag::Unknown);
        assert!(engine.has_object_flags(script, objects, ObjectFlags::NON_DENSE_ARRAY));
        assert!(engine.object_has_flags(script, array, ObjectFlags::NON_PACKED_ARRAY));
        assert!(engine.is_own_property(script, property, true));
        assert!(engine.known_non_empty(script, empty));
        assert_eq!(engine.singleton(script, singleton), None);
    }

    #[test]
    fn test_ignore_pushed() {
        assert!(ignore_pushed(Opcode::BindName, 0));
        assert!(ignore_pushed(Opcode::Lt, 0));
        assert!(!ignore_pushed(Opcode::StrictEq, 0));
        assert!(!ignore_pushed(Opcode::GetProp, 0));
    }
}
