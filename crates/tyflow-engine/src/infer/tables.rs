//! Shared type objects for literals and allocation sites
//!
//! Array and object literals built by the runtime (JSON, constant
//! initializers) with the same shape and element types share one type
//! object, so that code handling many such literals still sees a single
//! object type. Initializer opcodes get one type object per allocation site.

use super::engine::InferenceEngine;
use super::object::ProtoKind;
use super::types::{PropertyId, Type, TypeObjectId};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};
use tyflow_bytecode::{HeapRef, Instr, Opcode, ScriptId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ArrayKey {
    element: Type,
    proto: Option<HeapRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectKey {
    properties: Vec<PropertyId>,
    proto: Option<HeapRef>,
}

#[derive(Debug, Clone)]
struct ObjectEntry {
    object: TypeObjectId,
    /// Type of each property, in key order
    types: Vec<Type>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AllocationKey {
    script: ScriptId,
    offset: u32,
    kind: ProtoKind,
}

/// Interning tables from literal shapes and allocation sites to type objects
#[derive(Debug, Clone, Default)]
pub(crate) struct TypeTables {
    arrays: FxHashMap<ArrayKey, TypeObjectId>,
    objects: FxHashMap<ObjectKey, ObjectEntry>,
    allocations: FxHashMap<AllocationKey, TypeObjectId>,
    /// Objects constructed by a script's function, per prototype
    constructed: FxHashMap<(ScriptId, Option<HeapRef>), TypeObjectId>,
}

impl TypeTables {
    /// Total number of entries
    pub(crate) fn len(&self) -> usize {
        self.arrays.len() + self.objects.len() + self.allocations.len() + self.constructed.len()
    }

    pub(crate) fn constructed(&self, script: ScriptId, proto: Option<HeapRef>) -> Option<TypeObjectId> {
        self.constructed.get(&(script, proto)).copied()
    }

    pub(crate) fn insert_constructed(&mut self, script: ScriptId, proto: Option<HeapRef>, object: TypeObjectId) {
        self.constructed.insert((script, proto), object);
    }

    /// Drop entries mentioning a dead object, prototype or script
    ///
    /// Returns the number of entries removed.
    pub(crate) fn retain(
        &mut self,
        object_alive: impl Fn(TypeObjectId) -> bool,
        heap_alive: impl Fn(HeapRef) -> bool,
        script_alive: impl Fn(ScriptId) -> bool,
    ) -> usize {
        let before = self.len();
        let type_alive = |ty: Type| match ty {
            Type::Object(object) => object_alive(object),
            Type::Singleton(heap) => heap_alive(heap),
            _ => true,
        };
        let proto_alive = |proto: Option<HeapRef>| proto.map_or(true, &heap_alive);

        self.arrays.retain(|key, object| {
            object_alive(*object) && type_alive(key.element) && proto_alive(key.proto)
        });
        self.objects.retain(|key, entry| {
            object_alive(entry.object)
                && proto_alive(key.proto)
                && entry.types.iter().all(|ty| type_alive(*ty))
        });
        self.allocations
            .retain(|key, object| object_alive(*object) && script_alive(key.script));
        self.constructed.retain(|(script, proto), object| {
            object_alive(*object) && script_alive(*script) && proto_alive(*proto)
        });
        before - self.len()
    }
}

/// Both types are numbers
fn number_types(a: Type, b: Type) -> bool {
    matches!(a, Type::Int32 | Type::Double) && matches!(b, Type::Int32 | Type::Double)
}

impl InferenceEngine {
    /// Type object for objects of `kind` allocated at `offset`
    pub fn allocation_type(&mut self, script: ScriptId, offset: u32, kind: ProtoKind) -> TypeObjectId {
        let key = AllocationKey { script, offset, kind };
        if let Some(&object) = self.tables.allocations.get(&key) {
            return object;
        }
        let proto = self.prototype(kind);
        let object = self.new_type_object(format!("#{}:{}", script.0, offset), proto, kind);
        self.tables.allocations.insert(key, object);
        object
    }

    /// Type object of the literal created by an initializer instruction
    ///
    /// Objects from a `NewObject` template always receive the template's
    /// properties before anything observes them, so those are definite.
    pub fn initializer_type(&mut self, script: ScriptId, instr: &Instr) -> Option<TypeObjectId> {
        let kind = match instr.opcode {
            Opcode::NewArray => ProtoKind::Array,
            Opcode::NewInit if instr.u16_operand() == 1 => ProtoKind::Array,
            Opcode::NewInit | Opcode::NewObject => ProtoKind::Object,
            _ => return None,
        };
        let key = AllocationKey {
            script,
            offset: instr.offset,
            kind,
        };
        if let Some(&object) = self.tables.allocations.get(&key) {
            return Some(object);
        }
        let object = self.allocation_type(script, instr.offset, kind);

        if instr.opcode == Opcode::NewObject {
            let names: Vec<String> = self
                .script_source(script)
                .and_then(|source| source.templates.get(instr.index_operand() as usize))
                .map(|template| {
                    template
                        .iter()
                        .map(|atom| self.script_atom(script, *atom))
                        .collect()
                })
                .unwrap_or_default();
            let properties: Vec<PropertyId> = names.iter().map(|name| self.property_id(name)).collect();
            self.add_definite_properties(object, &properties);
        }
        Some(object)
    }

    /// Name of atom `index` of a script; a missing atom reads as the empty name
    pub(crate) fn script_atom(&self, script: ScriptId, index: u32) -> String {
        self.script_source(script)
            .and_then(|source| source.atom(index))
            .unwrap_or_default()
            .to_string()
    }

    /// Check whether `new` at `offset` should give its result a fresh type
    ///
    /// Catches `Sub.prototype = new Super()`, keeping the prototypes of
    /// sibling subclasses apart.
    pub fn use_new_type(&self, script: ScriptId, offset: u32) -> bool {
        let Some(source) = self.script_source(script) else {
            return false;
        };
        let Ok(instr) = tyflow_bytecode::decode_instr(&source.code, offset as usize) else {
            return false;
        };
        if instr.opcode != Opcode::New {
            return false;
        }
        match tyflow_bytecode::decode_instr(&source.code, instr.next_offset() as usize) {
            Ok(next) if next.opcode == Opcode::SetProp => {
                source.atom(next.index_operand()) == Some("prototype")
            }
            _ => false,
        }
    }

    /// Shared type for a packed array literal with these elements
    ///
    /// Arrays mixing int and double elements share the double entry. Returns
    /// `None` for empty or heterogeneous arrays, which keep their own type.
    pub fn fix_array_type(&mut self, elements: &[Type], proto: Option<HeapRef>) -> Option<TypeObjectId> {
        let (&first, rest) = elements.split_first()?;
        let mut element = first;
        for &ty in rest {
            if ty == element {
                continue;
            }
            if number_types(element, ty) {
                element = Type::Double;
            } else {
                return None;
            }
        }

        let key = ArrayKey { element, proto };
        if let Some(&object) = self.tables.arrays.get(&key) {
            return Some(object);
        }
        let name = format!("TableArray:{}", self.tables.arrays.len() + 1);
        let object = self.new_type_object(name, proto, ProtoKind::Array);
        self.add_property_type(object, PropertyId::Elements, element);
        self.tables.arrays.insert(key, object);
        debug!(object = object.0, %element, "array table entry");
        Some(object)
    }

    /// Shared type for an object literal with these properties, in slot order
    ///
    /// A later literal of the same shape whose int property holds a double
    /// widens the entry to double. Any other type mismatch returns `None`.
    pub fn fix_object_type(
        &mut self,
        properties: &[(PropertyId, Type)],
        proto: Option<HeapRef>,
    ) -> Option<TypeObjectId> {
        if properties.is_empty() {
            return None;
        }
        let key = ObjectKey {
            properties: properties.iter().map(|(id, _)| *id).collect(),
            proto,
        };

        if let Some(entry) = self.tables.objects.get(&key) {
            let object = entry.object;
            let mut widened = Vec::new();
            let mut types = entry.types.clone();
            for (slot, &(id, ty)) in properties.iter().enumerate() {
                let existing = types[slot];
                if ty == existing {
                    continue;
                }
                if !number_types(ty, existing) {
                    return None;
                }
                if existing == Type::Int32 {
                    types[slot] = Type::Double;
                    widened.push(id);
                }
            }
            if let Some(entry) = self.tables.objects.get_mut(&key) {
                entry.types = types;
            }
            for id in widened {
                trace!(object = object.0, ?id, "object table widened to double");
                self.add_property_type(object, id, Type::Double);
            }
            return Some(object);
        }

        let name = format!("TableObject:{}", self.tables.objects.len() + 1);
        let object = self.new_type_object(name, proto, ProtoKind::Object);
        for &(id, ty) in properties {
            self.add_property_type(object, id, ty);
        }
        self.add_definite_properties(object, &key.properties);
        let types = properties.iter().map(|(_, ty)| *ty).collect();
        self.tables.objects.insert(key, ObjectEntry { object, types });
        debug!(object = object.0, "object table entry");
        Some(object)
    }
}
