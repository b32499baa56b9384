//! The inference engine
//!
//! Owns every type set, type object and analyzed script of one compartment,
//! together with the constraint worklist, the recompilation queue and the
//! nuke state. All mutation of the type graph goes through here so that
//! each new type is propagated to a fixpoint before control returns.

use super::constraint::{CallSite, CallSiteId, Constraint, MarkId};
use super::object::{HeapObject, ObjectFlags, ObjectKind, ProtoKind, TypeObject, PROPERTY_COUNT_LIMIT};
use super::script::ScriptEntry;
use super::tables::TypeTables;
use super::types::{AtomId, PropertyId, Type, TypeObjectId, TypeSetId};
use super::typeset::TypeSet;
use crate::config::InferenceConfig;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};
use tyflow_bytecode::{HeapRef, ScriptId};

/// Counters describing the work the engine has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Constraint notifications processed
    pub propagations: u64,
    /// Constraints attached
    pub constraints: u64,
    /// Type barriers inserted
    pub barriers: u64,
    /// Recompilations requested
    pub recompiles: u64,
    /// Scripts analyzed
    pub analyses: u64,
    /// Times inference was disabled
    pub nukes: u32,
}

/// A new type waiting to be delivered to one constraint
#[derive(Debug, Clone, Copy)]
struct PendingWork {
    set: TypeSetId,
    index: usize,
    ty: Type,
}

/// A heap object known to the engine and its lazily created type
#[derive(Debug, Clone)]
pub(crate) struct HeapEntry {
    pub(crate) object: HeapObject,
    pub(crate) type_object: Option<TypeObjectId>,
}

/// Names the type-effect rules look for
#[derive(Debug, Clone, Copy)]
pub(crate) struct WellKnownAtoms {
    pub(crate) length: AtomId,
    pub(crate) prototype: AtomId,
    pub(crate) proto: AtomId,
    pub(crate) constructor: AtomId,
    pub(crate) undefined: AtomId,
    pub(crate) nan: AtomId,
    pub(crate) infinity: AtomId,
}

/// Compartment-wide type inference state
pub struct InferenceEngine {
    pub(crate) config: InferenceConfig,

    pub(crate) sets: Vec<TypeSet>,
    free_sets: Vec<TypeSetId>,
    pub(crate) objects: Vec<Option<TypeObject>>,
    pub(crate) heap: FxHashMap<HeapRef, HeapEntry>,

    atoms: Vec<String>,
    atom_ids: FxHashMap<String, AtomId>,
    pub(crate) well_known: WellKnownAtoms,

    pub(crate) scripts: FxHashMap<ScriptId, ScriptEntry>,
    pub(crate) call_sites: Vec<CallSite>,
    pub(crate) marks: Vec<bool>,
    pub(crate) tables: TypeTables,

    pending: VecDeque<PendingWork>,
    resolving: bool,

    enabled: bool,
    pending_nuke: bool,
    pub(crate) compiled: FxHashSet<ScriptId>,
    pub(crate) pending_recompiles: Vec<ScriptId>,

    global: TypeObjectId,
    pub(crate) standard: FxHashMap<ProtoKind, TypeObjectId>,
    prototypes: FxHashMap<ProtoKind, HeapRef>,
    pub(crate) unknown_set: Option<TypeSetId>,

    pub(crate) stats: EngineStats,
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new(InferenceConfig::default())
    }
}

impl InferenceEngine {
    /// Create an engine with an empty type graph
    pub fn new(config: InferenceConfig) -> Self {
        let mut engine = Self {
            config,
            sets: Vec::new(),
            free_sets: Vec::new(),
            objects: Vec::new(),
            heap: FxHashMap::default(),
            atoms: Vec::new(),
            atom_ids: FxHashMap::default(),
            well_known: WellKnownAtoms {
                length: AtomId(0),
                prototype: AtomId(0),
                proto: AtomId(0),
                constructor: AtomId(0),
                undefined: AtomId(0),
                nan: AtomId(0),
                infinity: AtomId(0),
            },
            scripts: FxHashMap::default(),
            call_sites: Vec::new(),
            marks: Vec::new(),
            tables: TypeTables::default(),
            pending: VecDeque::new(),
            resolving: false,
            enabled: true,
            pending_nuke: false,
            compiled: FxHashSet::default(),
            pending_recompiles: Vec::new(),
            global: TypeObjectId(0),
            standard: FxHashMap::default(),
            prototypes: FxHashMap::default(),
            unknown_set: None,
            stats: EngineStats::default(),
        };
        engine.well_known = WellKnownAtoms {
            length: engine.atom("length"),
            prototype: engine.atom("prototype"),
            proto: engine.atom("__proto__"),
            constructor: engine.atom("constructor"),
            undefined: engine.atom("undefined"),
            nan: engine.atom("NaN"),
            infinity: engine.atom("Infinity"),
        };
        engine.global = engine.new_type_object("global", None, ProtoKind::Object);
        engine
    }

    /// Tunables the engine runs with
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Check whether speculative inference is still active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check whether an allocation failure is waiting to disable inference
    pub fn has_pending_nuke(&self) -> bool {
        self.pending_nuke
    }

    /// Work counters
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    // ===== Atoms =====

    /// Intern a property name
    pub fn atom(&mut self, name: &str) -> AtomId {
        if let Some(&id) = self.atom_ids.get(name) {
            return id;
        }
        let id = AtomId(self.atoms.len() as u32);
        self.atoms.push(name.to_string());
        self.atom_ids.insert(name.to_string(), id);
        id
    }

    /// Name of an interned atom
    pub fn atom_name(&self, id: AtomId) -> Option<&str> {
        self.atoms.get(id.0 as usize).map(String::as_str)
    }

    /// Property key for a name; integer names map to `Elements`
    pub fn property_id(&mut self, name: &str) -> PropertyId {
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            return PropertyId::Elements;
        }
        PropertyId::Named(self.atom(name))
    }

    pub(crate) fn length_atom(&self) -> AtomId {
        self.well_known.length
    }

    // ===== Type sets =====

    /// Allocate an empty type set
    pub fn new_set(&mut self) -> TypeSetId {
        if let Some(id) = self.free_sets.pop() {
            return id;
        }
        if let Some(limit) = self.config.max_type_sets {
            if self.sets.len() >= limit {
                self.set_pending_nuke_types();
            }
        }
        let id = TypeSetId(self.sets.len() as u32);
        self.sets.push(TypeSet::new());
        id
    }

    /// Return a set to the free list; its contents and constraints are dropped
    pub(crate) fn free_set(&mut self, id: TypeSetId) {
        if let Some(set) = self.sets.get_mut(id.index()) {
            set.reset();
            self.free_sets.push(id);
        }
    }

    /// A type set by handle
    ///
    /// # Panics
    ///
    /// Panics if the handle was not allocated by this engine.
    pub fn set(&self, id: TypeSetId) -> &TypeSet {
        &self.sets[id.index()]
    }

    /// Check whether a set already holds `ty`
    pub fn has_type(&self, set: TypeSetId, ty: Type) -> bool {
        self.sets.get(set.index()).map_or(false, |s| s.has_type(ty))
    }

    /// Number of allocated, non-free type sets
    pub fn live_set_count(&self) -> usize {
        self.sets.len() - self.free_sets.len()
    }

    /// A set holding every type, shared by accesses that cannot be modeled
    pub(crate) fn unknown_set(&mut self) -> TypeSetId {
        if let Some(set) = self.unknown_set {
            return set;
        }
        let set = self.new_set();
        self.sets[set.index()].mark_unknown();
        self.unknown_set = Some(set);
        set
    }

    // ===== Propagation =====

    /// Add a type to a set and propagate it to a fixpoint
    pub fn add_type(&mut self, set: TypeSetId, ty: Type) {
        if !self.enabled {
            return;
        }
        let contribution_limit = self.config.contribution_limit;
        let Some(target) = self.sets.get_mut(set.index()) else {
            return;
        };
        if target.has_type(ty) {
            return;
        }

        let mut added = ty;
        match ty {
            Type::Unknown => {
                target.mark_unknown();
            }
            Type::AnyObject => {
                target.mark_any_object();
            }
            Type::Singleton(_) => {
                target.insert_object(ty);
            }
            Type::Object(id) => {
                target.insert_object(ty);
                let count = target.object_count() as u32;
                let collapse = match self.objects.get_mut(id.index()).and_then(Option::as_mut) {
                    Some(object) if object.unknown_properties() => true,
                    Some(object) if count > 1 => {
                        object.contribution += (count - 1) * (count - 1);
                        object.contribution >= contribution_limit
                    }
                    _ => false,
                };
                if collapse {
                    trace!(set = set.0, "object set collapsed to any object");
                    let target = &mut self.sets[set.index()];
                    target.mark_any_object();
                    added = Type::AnyObject;
                }
            }
            primitive => {
                if let Some(flag) = primitive.primitive_flag() {
                    target.insert_primitive(flag);
                }
            }
        }

        trace!(set = set.0, ty = %added, "add type");
        let count = self.sets[set.index()].constraints.len();
        for index in 0..count {
            self.pending.push_back(PendingWork {
                set,
                index,
                ty: added,
            });
        }
        self.resolve_pending();
    }

    /// Attach a constraint; with `call_existing` it first sees every type already present
    pub fn add_constraint(&mut self, set: TypeSetId, constraint: Constraint, call_existing: bool) {
        if !self.enabled {
            return;
        }
        let Some(source) = self.sets.get_mut(set.index()) else {
            return;
        };
        trace!(set = set.0, constraint = constraint.kind(), "add constraint");
        let index = source.constraints.len();
        source.constraints.push(constraint);
        self.stats.constraints += 1;

        if !call_existing {
            return;
        }
        for ty in self.sets[set.index()].types() {
            self.pending.push_back(PendingWork { set, index, ty });
        }
        self.resolve_pending();
    }

    /// Every type of `from` flows into `to`
    pub fn add_subset(&mut self, from: TypeSetId, to: TypeSetId) {
        self.add_constraint(from, Constraint::Subset { target: to }, true);
    }

    /// Drain the worklist unless an outer call is already draining it
    fn resolve_pending(&mut self) {
        if self.resolving {
            return;
        }
        self.resolving = true;
        while let Some(work) = self.pending.pop_front() {
            let Some(constraint) = self
                .sets
                .get(work.set.index())
                .and_then(|set| set.constraints.get(work.index))
                .cloned()
            else {
                continue;
            };
            self.stats.propagations += 1;
            self.on_new_type(work.set, work.index, constraint, work.ty);
        }
        self.resolving = false;
        self.flush_nuke();
    }

    /// Overwrite the state of a constraint after it fired
    pub(crate) fn replace_constraint(&mut self, set: TypeSetId, index: usize, constraint: Constraint) {
        if let Some(slot) = self
            .sets
            .get_mut(set.index())
            .and_then(|set| set.constraints.get_mut(index))
        {
            *slot = constraint;
        }
    }

    /// Record own/configured state on a property set and notify its constraints
    pub(crate) fn set_own_property(&mut self, set: TypeSetId, configured: bool) {
        let changed = self
            .sets
            .get_mut(set.index())
            .map_or(false, |s| s.set_own_property(configured));
        if !changed {
            return;
        }
        let constraints = self.sets[set.index()].constraints.clone();
        for (index, constraint) in constraints.iter().enumerate() {
            self.on_property_state(set, index, constraint);
        }
    }

    /// Notify constraints on an object's state set that its flags changed
    pub(crate) fn object_state_change(&mut self, object: TypeObjectId, marking_unknown: bool, force: bool) {
        let Some(entry) = self.objects.get_mut(object.index()).and_then(Option::as_mut) else {
            return;
        };
        if entry.unknown_properties() {
            return;
        }
        let state = entry.maybe_property(PropertyId::Empty);
        if marking_unknown {
            entry.flags |= ObjectFlags::DYNAMIC_MASK | ObjectFlags::UNKNOWN_PROPERTIES;
        }
        if let Some(state) = state {
            let constraints = self.sets[state.index()].constraints.clone();
            for constraint in &constraints {
                self.on_object_state(constraint, object, force);
            }
        }
    }

    // ===== Shared marks =====

    /// Allocate a flag shared by the freeze constraints of one query
    pub(crate) fn new_mark(&mut self) -> MarkId {
        self.marks.push(false);
        MarkId(self.marks.len() as u32 - 1)
    }

    pub(crate) fn is_marked(&self, mark: MarkId) -> bool {
        self.marks.get(mark.0 as usize).copied().unwrap_or(true)
    }

    pub(crate) fn set_marked(&mut self, mark: MarkId) {
        if let Some(flag) = self.marks.get_mut(mark.0 as usize) {
            *flag = true;
        }
    }

    // ===== Call sites =====

    pub(crate) fn add_call_site(&mut self, site: CallSite) -> CallSiteId {
        self.call_sites.push(site);
        CallSiteId(self.call_sites.len() as u32 - 1)
    }

    pub(crate) fn call_site(&self, id: CallSiteId) -> Option<&CallSite> {
        self.call_sites.get(id.0 as usize)
    }

    // ===== Type objects =====

    /// Create a type object for objects of `kind` with prototype `proto`
    pub fn new_type_object(
        &mut self,
        name: impl Into<String>,
        proto: Option<HeapRef>,
        kind: ProtoKind,
    ) -> TypeObjectId {
        let mut flags = kind.initial_flags();
        if !self.enabled {
            flags |= ObjectFlags::DYNAMIC_MASK | ObjectFlags::UNKNOWN_PROPERTIES;
        }
        let name = name.into();
        let id = TypeObjectId(self.objects.len() as u32);
        debug!(object = id.0, %name, "new type object");
        self.objects.push(Some(TypeObject::new(name, proto, flags)));
        id
    }

    /// A type object by handle, unless it was swept
    pub fn object(&self, id: TypeObjectId) -> Option<&TypeObject> {
        self.objects.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn object_mut(&mut self, id: TypeObjectId) -> Option<&mut TypeObject> {
        self.objects.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Number of live type objects
    pub fn object_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_some()).count()
    }

    /// Type set of property `id`, created on first access
    ///
    /// With `assign` the property is recorded as own. Objects with unknown
    /// properties answer with a shared set holding every type.
    pub fn get_property(&mut self, object: TypeObjectId, id: PropertyId, assign: bool) -> TypeSetId {
        let (existing, unknown, count, singleton) = match self.object(object) {
            Some(o) => (o.maybe_property(id), o.unknown_properties(), o.property_count(), o.singleton),
            None => return self.unknown_set(),
        };
        if unknown {
            return self.unknown_set();
        }

        let set = match existing {
            Some(set) => set,
            None => {
                let set = self.new_set();
                if let Some(o) = self.object_mut(object) {
                    o.properties.insert(id, set);
                }
                trace!(object = object.0, set = set.0, ?id, "property set");
                if let Some(heap) = singleton {
                    self.fill_singleton_property(heap, id, set);
                }
                if count + 1 >= PROPERTY_COUNT_LIMIT {
                    warn!(object = object.0, "property count limit reached");
                    self.mark_unknown(object);
                    return self.unknown_set();
                }
                set
            }
        };

        if assign {
            self.set_own_property(set, false);
        }
        set
    }

    /// Seed a singleton's property set from the heap object's own properties
    fn fill_singleton_property(&mut self, heap: HeapRef, id: PropertyId, set: TypeSetId) {
        if id == PropertyId::Empty {
            return;
        }
        let Some(entry) = self.heap.get(&heap) else {
            return;
        };
        let types: Vec<Type> = entry
            .object
            .properties
            .iter()
            .filter(|(key, ty)| *key == id && (id == PropertyId::Elements || *ty != Type::Undefined))
            .map(|(_, ty)| *ty)
            .collect();
        let own = entry.object.properties.iter().any(|(key, _)| *key == id);
        if own {
            self.set_own_property(set, false);
        }
        for ty in types {
            self.add_type(set, ty);
        }
    }

    /// Wire the prototype chain's types for property `id` into `set`
    pub fn get_from_prototypes(&mut self, object: TypeObjectId, id: PropertyId, set: TypeSetId, force: bool) {
        if !force && self.set(set).has_propagated_property() {
            return;
        }
        self.sets[set.index()].set_propagated_property();

        let Some(proto) = self.object(object).and_then(|o| o.proto) else {
            return;
        };
        let Some(proto_type) = self.heap_type(proto) else {
            // A prototype the host never described may hold anything
            self.add_type(set, Type::Unknown);
            return;
        };
        if self.object(proto_type).map_or(true, |o| o.unknown_properties()) {
            self.add_type(set, Type::Unknown);
            return;
        }
        let proto_types = self.get_property(proto_type, id, false);
        self.add_subset(proto_types, set);
        self.get_from_prototypes(proto_type, id, proto_types, false);
    }

    /// Add a type to a property of an object, as observed by the runtime
    pub fn add_property_type(&mut self, object: TypeObjectId, id: PropertyId, ty: Type) {
        if self.object(object).map_or(true, |o| o.unknown_properties()) {
            return;
        }
        let set = self.get_property(object, id, true);
        if self.set(set).has_type(ty) {
            return;
        }
        trace!(object = object.0, ?id, %ty, "property type");
        self.add_type(set, ty);
        self.flush_nuke();
    }

    /// The property was deleted, reconfigured or given an accessor
    pub fn mark_property_configured(&mut self, object: TypeObjectId, id: PropertyId) {
        if self.object(object).map_or(true, |o| o.unknown_properties()) {
            return;
        }
        let set = self.get_property(object, id, true);
        self.set_own_property(set, true);
        self.flush_nuke();
    }

    /// Slots of objects of this type were reallocated
    pub fn mark_slot_reallocation(&mut self, object: TypeObjectId) {
        let Some(state) = self.object(object).and_then(|o| o.maybe_property(PropertyId::Empty)) else {
            return;
        };
        let constraints = self.sets[state.index()].constraints.clone();
        for constraint in &constraints {
            self.on_object_state(constraint, object, true);
        }
        self.flush_nuke();
    }

    /// Add object flags, notifying listeners of the change
    pub fn set_object_flags(&mut self, object: TypeObjectId, flags: ObjectFlags) {
        let Some(entry) = self.object_mut(object) else {
            return;
        };
        if entry.flags.contains(flags) {
            return;
        }
        entry.flags |= flags;
        debug!(object = object.0, ?flags, "object flags");
        self.object_state_change(object, false, false);
        self.flush_nuke();
    }

    /// Add object flags to whatever type object a type stands for
    pub fn set_type_flags(&mut self, ty: Type, flags: ObjectFlags) {
        if let Some(object) = self.type_object_of(ty) {
            self.set_object_flags(object, flags);
        }
    }

    /// Stop tracking the object's property types
    pub fn mark_unknown(&mut self, object: TypeObjectId) {
        if self.object(object).map_or(true, |o| o.unknown_properties()) {
            return;
        }
        debug!(object = object.0, "unknown properties");
        self.object_state_change(object, true, true);

        // Reads already wired to these properties may see anything
        let properties: Vec<TypeSetId> = self
            .object(object)
            .map(|o| o.properties().map(|(_, set)| set).collect())
            .unwrap_or_default();
        for set in properties {
            self.add_type(set, Type::Unknown);
            self.set_own_property(set, true);
        }
        self.flush_nuke();
    }

    /// Widen every set holding this object to any-object
    pub fn mark_sets_unknown(&mut self, object: TypeObjectId) {
        let Some(entry) = self.object_mut(object) else {
            return;
        };
        if entry.flags.contains(ObjectFlags::SETS_MARKED_UNKNOWN) {
            return;
        }
        entry.flags |= ObjectFlags::SETS_MARKED_UNKNOWN;
        debug!(object = object.0, "marking sets unknown");

        let needle = Type::Object(object);
        let holders: Vec<TypeSetId> = self
            .sets
            .iter()
            .enumerate()
            .filter(|(_, set)| set.objects().contains(&needle))
            .map(|(index, _)| TypeSetId(index as u32))
            .collect();
        for set in holders {
            self.add_type(set, Type::AnyObject);
        }
        self.flush_nuke();
    }

    /// Record `properties` as definite, in slot order
    pub fn add_definite_properties(&mut self, object: TypeObjectId, properties: &[PropertyId]) {
        if self.object(object).map_or(true, |o| o.unknown_properties()) {
            return;
        }
        let limit = self.config.max_definite_properties as usize;
        for (slot, id) in properties.iter().enumerate().take(limit) {
            if *id == PropertyId::Elements || *id == PropertyId::Empty {
                continue;
            }
            let set = self.get_property(object, *id, true);
            self.sets[set.index()].set_definite(slot as u32);
        }
    }

    /// Check that every definite property sits at its slot in `properties`
    pub fn match_definite_properties(&self, object: TypeObjectId, properties: &[PropertyId]) -> bool {
        let Some(entry) = self.object(object) else {
            return false;
        };
        entry.properties().all(|(id, set)| match self.set(set).definite_slot() {
            Some(slot) => properties.get(slot as usize) == Some(&id),
            None => true,
        })
    }

    // ===== Heap objects =====

    /// Describe a host heap object to the engine
    pub fn register_object(&mut self, heap: HeapRef, object: HeapObject) {
        self.heap.insert(
            heap,
            HeapEntry {
                object,
                type_object: None,
            },
        );
    }

    /// A registered heap object
    pub fn heap_object(&self, heap: HeapRef) -> Option<&HeapObject> {
        self.heap.get(&heap).map(|entry| &entry.object)
    }

    /// Type object describing a registered heap object, created on first use
    pub fn heap_type(&mut self, heap: HeapRef) -> Option<TypeObjectId> {
        let entry = self.heap.get(&heap)?;
        if let Some(id) = entry.type_object {
            return Some(id);
        }
        let object = entry.object.clone();

        let id = match object.kind {
            ObjectKind::Global => self.global,
            _ => {
                let kind = match object.kind {
                    ObjectKind::Array => ProtoKind::Array,
                    ObjectKind::Function(_) | ObjectKind::Native(_) => ProtoKind::Function,
                    _ => ProtoKind::Object,
                };
                let id = self.new_type_object(format!("<0x{:x}>", heap.0), object.proto, kind);
                if let Some(o) = self.object_mut(id) {
                    o.singleton = Some(heap);
                    if let ObjectKind::Function(script) = object.kind {
                        o.function_script = Some(script);
                    }
                    if object.special_equality {
                        o.flags |= ObjectFlags::SPECIAL_EQUALITY;
                    }
                }
                id
            }
        };
        if let Some(entry) = self.heap.get_mut(&heap) {
            entry.type_object = Some(id);
        }

        if id == self.global {
            if let Some(o) = self.object_mut(id) {
                o.proto = object.proto;
            }
            for (key, ty) in object.properties {
                self.add_property_type(id, key, ty);
            }
        }
        Some(id)
    }

    /// Type object a concrete object type refers to
    pub fn type_object_of(&mut self, ty: Type) -> Option<TypeObjectId> {
        match ty {
            Type::Object(id) => Some(id),
            Type::Singleton(heap) => self.heap_type(heap),
            _ => None,
        }
    }

    /// Provide the prototype objects of the built-in classes
    pub fn set_prototype(&mut self, kind: ProtoKind, proto: HeapRef) {
        self.prototypes.insert(kind, proto);
    }

    /// Prototype registered for a built-in class
    pub fn prototype(&self, kind: ProtoKind) -> Option<HeapRef> {
        self.prototypes.get(&kind).copied()
    }

    /// Type object shared by every object of a built-in class
    pub fn standard_type(&mut self, kind: ProtoKind) -> TypeObjectId {
        if let Some(&id) = self.standard.get(&kind) {
            return id;
        }
        let proto = self.prototype(kind);
        let id = self.new_type_object(format!("{:?}", kind), proto, kind);
        self.standard.insert(kind, id);
        id
    }

    /// Type object of the global object
    pub fn global_type(&self) -> TypeObjectId {
        self.global
    }

    // ===== Recompilation and nuking =====

    /// Record that speculative code exists for a script
    pub fn mark_compiled(&mut self, script: ScriptId) {
        self.compiled.insert(script);
    }

    /// Check whether speculative code exists for a script
    pub fn is_compiled(&self, script: ScriptId) -> bool {
        self.compiled.contains(&script)
    }

    /// Request recompilation of a compiled script
    pub fn add_pending_recompile(&mut self, script: ScriptId) {
        if !self.compiled.contains(&script) || self.pending_recompiles.contains(&script) {
            return;
        }
        debug!(script = script.0, "pending recompile");
        self.stats.recompiles += 1;
        self.pending_recompiles.push(script);
    }

    /// Take the scripts whose speculative code must be discarded
    ///
    /// Each returned script is no longer considered compiled.
    pub fn take_pending_recompiles(&mut self) -> Vec<ScriptId> {
        let scripts = std::mem::take(&mut self.pending_recompiles);
        for script in &scripts {
            self.compiled.remove(script);
        }
        scripts
    }

    /// Record an allocation failure; inference is disabled at the next safe point
    pub fn set_pending_nuke_types(&mut self) {
        if !self.pending_nuke {
            warn!("type inference ran out of memory");
            self.pending_nuke = true;
        }
    }

    /// Disable inference and recompile every compiled script
    pub fn nuke_types(&mut self) {
        if !self.enabled {
            return;
        }
        warn!(compiled = self.compiled.len(), "discarding all type information");
        self.enabled = false;
        self.pending.clear();
        self.stats.nukes += 1;
        let mut scripts: Vec<ScriptId> = self.compiled.iter().copied().collect();
        scripts.sort();
        self.pending_recompiles = scripts;
    }

    /// Nuke if a failure is pending and no resolution is in progress
    pub(crate) fn flush_nuke(&mut self) {
        if self.pending_nuke && !self.resolving {
            self.nuke_types();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_type_is_idempotent() {
        let mut engine = InferenceEngine::default();
        let a = engine.new_set();
        let b = engine.new_set();
        engine.add_subset(a, b);

        engine.add_type(a, Type::Int32);
        let after_first = engine.stats().propagations;
        engine.add_type(a, Type::Int32);
        assert_eq!(engine.stats().propagations, after_first);

        engine.add_type(a, Type::Double);
        let after_double = engine.stats().propagations;
        engine.add_type(a, Type::Int32);
        assert_eq!(engine.stats().propagations, after_double);
        assert!(engine.set(b).has_type(Type::Double));
    }

    #[test]
    fn test_cycle_terminates() {
        let mut engine = InferenceEngine::default();
        let a = engine.new_set();
        let b = engine.new_set();
        let c = engine.new_set();
        engine.add_subset(a, b);
        engine.add_subset(b, c);
        engine.add_subset(c, a);

        engine.add_type(b, Type::String);
        for set in [a, b, c] {
            assert!(engine.set(set).has_type(Type::String));
        }
        let converged = engine.stats().propagations;
        engine.add_type(c, Type::String);
        assert_eq!(engine.stats().propagations, converged);
    }

    #[test]
    fn test_contribution_collapses_object_sets() {
        let config = InferenceConfig {
            contribution_limit: 5,
            ..InferenceConfig::default()
        };
        let mut engine = InferenceEngine::new(config);
        let objects: Vec<TypeObjectId> = (0..4)
            .map(|i| engine.new_type_object(format!("o{i}"), None, ProtoKind::Object))
            .collect();
        let set = engine.new_set();
        for object in &objects[..3] {
            engine.add_type(set, Type::Object(*object));
        }
        assert_eq!(engine.set(set).object_count(), 3);

        engine.add_type(set, Type::Object(objects[3]));
        assert!(engine.set(set).is_unknown_object());
        assert_eq!(engine.set(set).object_count(), 0);
    }

    #[test]
    fn test_get_property_inherits_from_prototype() {
        let mut engine = InferenceEngine::default();
        let proto = HeapRef(10);
        engine.register_object(proto, HeapObject::plain(None));
        let proto_type = engine.heap_type(proto).unwrap();
        let name = engine.property_id("x");
        engine.add_property_type(proto_type, name, Type::String);

        let object = engine.new_type_object("obj", Some(proto), ProtoKind::Object);
        let own = engine.get_property(object, name, false);
        engine.get_from_prototypes(object, name, own, false);
        assert!(engine.set(own).has_type(Type::String));

        engine.add_property_type(proto_type, name, Type::Int32);
        assert!(engine.set(own).has_type(Type::Int32));
    }

    #[test]
    fn test_singleton_properties_seeded_from_heap() {
        let mut engine = InferenceEngine::default();
        let x = engine.property_id("x");
        let y = engine.property_id("y");
        engine.register_object(
            HeapRef(1),
            HeapObject::plain(None)
                .with_property(x, Type::Int32)
                .with_property(y, Type::Undefined),
        );
        let object = engine.heap_type(HeapRef(1)).unwrap();
        let xs = engine.get_property(object, x, false);
        let ys = engine.get_property(object, y, false);
        assert!(engine.set(xs).has_type(Type::Int32));
        assert!(engine.set(xs).is_own_property(false));
        assert!(engine.set(ys).is_empty());
    }

    #[test]
    fn test_mark_unknown_widens_properties() {
        let mut engine = InferenceEngine::default();
        let object = engine.new_type_object("obj", None, ProtoKind::Object);
        let name = engine.property_id("f");
        let set = engine.get_property(object, name, false);
        let reader = engine.new_set();
        engine.add_subset(set, reader);

        engine.mark_unknown(object);
        let flags = engine.object(object).unwrap().flags;
        assert!(flags.contains(ObjectFlags::UNKNOWN_PROPERTIES | ObjectFlags::DYNAMIC_MASK));
        assert!(engine.set(reader).is_unknown());
        assert!(engine.set(set).is_own_property(true));

        let later = engine.get_property(object, name, true);
        assert!(engine.set(later).is_unknown());
    }

    #[test]
    fn test_recompiles_only_compiled_scripts() {
        let mut engine = InferenceEngine::default();
        engine.add_pending_recompile(ScriptId(1));
        assert!(engine.take_pending_recompiles().is_empty());

        engine.mark_compiled(ScriptId(1));
        engine.add_pending_recompile(ScriptId(1));
        engine.add_pending_recompile(ScriptId(1));
        assert_eq!(engine.take_pending_recompiles(), vec![ScriptId(1)]);
        assert!(!engine.is_compiled(ScriptId(1)));
    }

    #[test]
    fn test_set_budget_nukes() {
        let config = InferenceConfig {
            max_type_sets: Some(2),
            ..InferenceConfig::default()
        };
        let mut engine = InferenceEngine::new(config);
        engine.mark_compiled(ScriptId(4));
        let a = engine.new_set();
        let b = engine.new_set();
        let c = engine.new_set();
        assert!(engine.has_pending_nuke());
        engine.add_subset(a, b);
        engine.add_type(a, Type::Int32);

        assert!(!engine.is_enabled());
        assert!(engine.set(b).is_empty());
        assert!(engine.set(c).is_empty());
        assert_eq!(engine.take_pending_recompiles(), vec![ScriptId(4)]);
    }

    #[test]
    fn test_property_count_limit() {
        let mut engine = InferenceEngine::default();
        let object = engine.new_type_object("wide", None, ProtoKind::Object);
        let mut last = None;
        for i in 0..PROPERTY_COUNT_LIMIT {
            let id = engine.property_id(&format!("p{i}"));
            last = Some(engine.get_property(object, id, false));
        }
        assert!(engine.object(object).unwrap().unknown_properties());
        assert!(engine.set(last.unwrap()).is_unknown());
    }
}
