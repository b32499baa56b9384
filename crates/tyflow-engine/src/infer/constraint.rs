//! Type constraints
//!
//! A constraint is attached to one type set and reacts to each type the set
//! gains. The variants form a closed set, dispatched by `match` from the
//! engine's worklist. Freeze variants carry one-shot state and exist only to
//! request recompilation of a consumer that baked in an assumption.

use super::engine::InferenceEngine;
use super::object::{NativeFunction, ObjectFlags, ObjectKind, ProtoKind};
use super::types::{PropertyId, Type, TypeObjectId, TypeSetId};
use smallvec::SmallVec;
use tracing::{debug, trace};
use tyflow_bytecode::ScriptId;

/// Handle of a call site description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSiteId(pub u32);

/// Handle of a flag shared by several freeze constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkId(pub u32);

/// Type sets involved in one call or construction
#[derive(Debug, Clone)]
pub struct CallSite {
    pub script: ScriptId,
    pub offset: u32,
    pub is_new: bool,
    pub args: SmallVec<[TypeSetId; 4]>,
    pub this_types: TypeSetId,
    pub return_types: TypeSetId,
}

/// A subscriber to the types added to one type set
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Forward every type to `target`
    Subset { target: TypeSetId },
    /// Forward types already in `target`; guard the others with a barrier at `offset`
    SubsetBarrier {
        script: ScriptId,
        offset: u32,
        target: TypeSetId,
    },
    /// Property `id` of each object type is read into, or written from, `target`
    Prop {
        script: ScriptId,
        offset: u32,
        target: TypeSetId,
        id: PropertyId,
        assign: bool,
    },
    /// Property `id` of each object type is a callee whose `this` is that object
    CallProp {
        script: ScriptId,
        call_offset: u32,
        id: PropertyId,
    },
    /// Each type is a callee of the call site
    Call { site: CallSiteId },
    /// Each type is a callee whose `this` gets `this_type`
    PropagateThis {
        script: ScriptId,
        call_offset: u32,
        this_type: Type,
    },
    /// Result of arithmetic; `other` is the second operand of an addition
    Arith {
        target: TypeSetId,
        other: Option<TypeSetId>,
    },
    /// `this` after boxing primitives
    TransformThis { script: ScriptId, target: TypeSetId },
    /// Forward objects, and primitives other than null/undefined when `only_null_void`
    FilterPrimitives {
        target: TypeSetId,
        only_null_void: bool,
    },
    /// Unknown once the function creates an arguments object
    LazyArguments { target: TypeSetId },
    /// Values iterated out of the objects in the set
    Generator { target: TypeSetId },
    /// Recompile `script` on any new type
    Freeze { script: ScriptId, marked: bool },
    /// Recompile `script` when the set's type tag is lost
    FreezeTypeTag { script: ScriptId, marked: bool },
    /// Recompile `script` when the object gains one of `flags`
    FreezeObjectFlags {
        script: ScriptId,
        flags: ObjectFlags,
        mark: MarkId,
    },
    /// Recompile `script` when any object in the set has one of `flags`
    FreezeObjectFlagsSet {
        script: ScriptId,
        flags: ObjectFlags,
        mark: MarkId,
    },
    /// Recompile `script` when the property becomes own or configured
    FreezeOwnProperty {
        script: ScriptId,
        configurable: bool,
        updated: bool,
    },
    /// Discard `object`'s definite properties if a prototype property could be a setter
    ClearDefiniteSetter { object: TypeObjectId },
    /// Discard `object`'s definite properties unless the set holds one object
    ClearDefiniteSingle { object: TypeObjectId },
}

impl Constraint {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::Subset { .. } => "subset",
            Constraint::SubsetBarrier { .. } => "subset_barrier",
            Constraint::Prop { assign: false, .. } => "getprop",
            Constraint::Prop { assign: true, .. } => "setprop",
            Constraint::CallProp { .. } => "callprop",
            Constraint::Call { .. } => "call",
            Constraint::PropagateThis { .. } => "propagate_this",
            Constraint::Arith { .. } => "arith",
            Constraint::TransformThis { .. } => "transform_this",
            Constraint::FilterPrimitives { .. } => "filter_primitives",
            Constraint::LazyArguments { .. } => "lazy_arguments",
            Constraint::Generator { .. } => "generator",
            Constraint::Freeze { .. } => "freeze",
            Constraint::FreezeTypeTag { .. } => "freeze_type_tag",
            Constraint::FreezeObjectFlags { .. } => "freeze_object_flags",
            Constraint::FreezeObjectFlagsSet { .. } => "freeze_object_flags_set",
            Constraint::FreezeOwnProperty { .. } => "freeze_own_property",
            Constraint::ClearDefiniteSetter { .. } => "clear_definite_setter",
            Constraint::ClearDefiniteSingle { .. } => "clear_definite_single",
        }
    }
}

impl InferenceEngine {
    /// React to `source` gaining `ty`; `index` locates the constraint on `source`
    pub(crate) fn on_new_type(
        &mut self,
        source: TypeSetId,
        index: usize,
        constraint: Constraint,
        ty: Type,
    ) {
        trace!(set = source.0, constraint = constraint.kind(), %ty, "resolve");
        match constraint {
            Constraint::Subset { target } => self.add_type(target, ty),

            Constraint::SubsetBarrier {
                script,
                offset,
                target,
            } => {
                if !self.set(target).has_type(ty) {
                    self.add_type_barrier(script, offset, target, ty);
                }
            }

            Constraint::Prop {
                script,
                offset,
                target,
                id,
                assign,
            } => self.prop_new_type(script, offset, target, id, assign, ty),

            Constraint::CallProp {
                script,
                call_offset,
                id,
            } => self.call_prop_new_type(script, call_offset, id, ty),

            Constraint::Call { site } => self.call_new_type(site, ty),

            Constraint::PropagateThis {
                script,
                call_offset,
                this_type,
            } => {
                if ty.is_unknown_object() {
                    self.monitor_bytecode(script, call_offset, false);
                    return;
                }
                if let Some(callee) = self.interpreted_callee(ty) {
                    if let Some(this_types) = self.type_script(callee).map(|ts| ts.this_types()) {
                        self.add_type(this_types, this_type);
                    }
                }
            }

            Constraint::Arith { target, other } => self.arith_new_type(target, other, ty),

            Constraint::TransformThis { script, target } => {
                let strict = self.script_source(script).map_or(false, |s| s.strict);
                if ty.is_object() || ty.is_unknown_object() || strict {
                    self.add_type(target, ty);
                    return;
                }
                let boxed = match ty {
                    Type::Int32 | Type::Double => Type::Object(self.standard_type(ProtoKind::Number)),
                    Type::Boolean => Type::Object(self.standard_type(ProtoKind::Boolean)),
                    Type::String => Type::Object(self.standard_type(ProtoKind::String)),
                    // null and undefined become the global object
                    _ => Type::Unknown,
                };
                self.add_type(target, boxed);
            }

            Constraint::FilterPrimitives {
                target,
                only_null_void,
            } => {
                let dropped = if only_null_void {
                    matches!(ty, Type::Null | Type::Undefined)
                } else {
                    ty.is_primitive()
                };
                if !dropped {
                    self.add_type(target, ty);
                }
            }

            Constraint::LazyArguments { .. } => {}

            Constraint::Generator { target } => {
                if ty.is_unknown_object() {
                    self.add_type(target, Type::Unknown);
                    return;
                }
                if ty.is_primitive() {
                    return;
                }
                let proto = match ty {
                    Type::Object(object) => self.object(object).and_then(|o| o.proto),
                    Type::Singleton(heap) => self.heap_object(heap).and_then(|o| o.proto),
                    _ => None,
                };
                let custom = proto.map_or(false, |proto| {
                    self.prototype(ProtoKind::Iterator) == Some(proto)
                        || self.prototype(ProtoKind::Generator) == Some(proto)
                });
                if custom {
                    self.add_type(target, Type::Unknown);
                }
            }

            Constraint::Freeze { script, marked } => {
                if marked {
                    return;
                }
                self.replace_constraint(source, index, Constraint::Freeze {
                    script,
                    marked: true,
                });
                self.add_pending_recompile(script);
            }

            Constraint::FreezeTypeTag { script, marked } => {
                if marked {
                    return;
                }
                if ty.is_object() && self.set(source).object_count() >= 2 {
                    // Already tagged as an object set
                    return;
                }
                self.replace_constraint(source, index, Constraint::FreezeTypeTag {
                    script,
                    marked: true,
                });
                self.add_pending_recompile(script);
            }

            Constraint::FreezeObjectFlags { .. } => {}

            Constraint::FreezeObjectFlagsSet {
                script,
                flags,
                mark,
            } => {
                if self.is_marked(mark) {
                    return;
                }
                match ty {
                    Type::Unknown | Type::AnyObject => {}
                    Type::Singleton(_) | Type::Object(_) => {
                        let Some(object) = self.type_object_of(ty) else {
                            return;
                        };
                        let flagged = self
                            .object(object)
                            .map_or(true, |o| o.has_any_flags(flags));
                        if !flagged {
                            let state = self.get_property(object, PropertyId::Empty, false);
                            self.add_constraint(
                                state,
                                Constraint::FreezeObjectFlags {
                                    script,
                                    flags,
                                    mark,
                                },
                                false,
                            );
                            return;
                        }
                    }
                    _ => return,
                }
                self.set_marked(mark);
                self.add_pending_recompile(script);
            }

            Constraint::FreezeOwnProperty { .. } => {}

            Constraint::ClearDefiniteSetter { object } => {
                let live = self.object(object).map_or(false, |o| {
                    o.new_script.is_some() && !o.flags.contains(ObjectFlags::NEW_SCRIPT_CLEARED)
                });
                if live && ty == Type::Unknown {
                    self.clear_new_script(object);
                }
            }

            Constraint::ClearDefiniteSingle { object } => {
                let cleared = self
                    .object(object)
                    .map_or(true, |o| o.flags.contains(ObjectFlags::NEW_SCRIPT_CLEARED));
                if cleared {
                    return;
                }
                let set = self.set(source);
                if !set.base_flags().is_empty() || set.object_count() > 1 {
                    self.clear_new_script(object);
                }
            }
        }
    }

    /// React to a change of `object`'s flags, seen through its object-state set
    pub(crate) fn on_object_state(
        &mut self,
        constraint: &Constraint,
        object: TypeObjectId,
        force: bool,
    ) {
        match *constraint {
            Constraint::FreezeObjectFlags {
                script,
                flags,
                mark,
            } => {
                let flagged = self.object(object).map_or(false, |o| o.has_any_flags(flags));
                if flagged && !self.is_marked(mark) {
                    self.set_marked(mark);
                    self.add_pending_recompile(script);
                } else if force {
                    self.add_pending_recompile(script);
                }
            }
            Constraint::LazyArguments { target } => {
                let created = self
                    .object(object)
                    .map_or(false, |o| o.has_any_flags(ObjectFlags::CREATED_ARGUMENTS));
                if created {
                    self.add_type(target, Type::Unknown);
                }
            }
            _ => {}
        }
    }

    /// React to the own/configured state of the property set `source` changing
    pub(crate) fn on_property_state(&mut self, source: TypeSetId, index: usize, constraint: &Constraint) {
        match *constraint {
            Constraint::FreezeOwnProperty {
                script,
                configurable,
                updated: false,
            } => {
                if self.set(source).is_own_property(configurable) {
                    self.replace_constraint(source, index, Constraint::FreezeOwnProperty {
                        script,
                        configurable,
                        updated: true,
                    });
                    self.add_pending_recompile(script);
                }
            }
            // A prototype property reconfigured with a setter
            Constraint::ClearDefiniteSetter { object } => {
                if self.set(source).is_own_property(true) {
                    self.clear_new_script(object);
                }
            }
            _ => {}
        }
    }

    // ===== Property accesses =====

    /// Accesses on these types cannot be resolved to a type object
    fn unknown_property_access(ty: Type) -> bool {
        ty.is_unknown_object()
    }

    /// A read whose result cannot be modeled
    fn mark_property_access_unknown(&mut self, script: ScriptId, offset: u32, target: TypeSetId) {
        if self.use_property_type_barrier(script, offset) {
            self.add_type_barrier(script, offset, target, Type::Unknown);
        } else {
            self.add_type(target, Type::Unknown);
        }
    }

    /// Type object whose properties a value of type `ty` exposes
    pub(crate) fn property_object(&mut self, ty: Type) -> Option<TypeObjectId> {
        match ty {
            Type::Singleton(_) | Type::Object(_) => self.type_object_of(ty),
            Type::Int32 | Type::Double => Some(self.standard_type(ProtoKind::Number)),
            Type::Boolean => Some(self.standard_type(ProtoKind::Boolean)),
            Type::String => Some(self.standard_type(ProtoKind::String)),
            _ => None,
        }
    }

    fn prop_new_type(
        &mut self,
        script: ScriptId,
        offset: u32,
        target: TypeSetId,
        id: PropertyId,
        assign: bool,
        ty: Type,
    ) {
        if Self::unknown_property_access(ty) {
            if assign {
                self.monitor_bytecode(script, offset, false);
            } else {
                self.mark_property_access_unknown(script, offset, target);
            }
            return;
        }

        if ty == Type::LazyArgs {
            // Escaping uses of the arguments are handled when the script is analyzed
            let length = PropertyId::Named(self.length_atom());
            if assign || (id != PropertyId::Elements && id != length) {
                return;
            }
            if id == PropertyId::Elements {
                self.mark_property_access_unknown(script, offset, target);
            } else {
                self.add_type(target, Type::Int32);
            }
            return;
        }

        if let Some(object) = self.property_object(ty) {
            self.property_access(script, offset, object, assign, target, id);
        }
    }

    /// Wire a read or write of property `id` on `object`
    pub(crate) fn property_access(
        &mut self,
        script: ScriptId,
        offset: u32,
        object: TypeObjectId,
        assign: bool,
        target: TypeSetId,
        id: PropertyId,
    ) {
        let unknown = self.object(object).map_or(true, |o| o.unknown_properties());
        if unknown {
            if !assign {
                self.mark_property_access_unknown(script, offset, target);
            }
            return;
        }

        let types = self.get_property(object, id, assign);
        if assign {
            self.add_subset(target, types);
            return;
        }
        if !self.set(types).has_propagated_property() {
            self.get_from_prototypes(object, id, types, false);
        }
        let constraint = if self.use_property_type_barrier(script, offset) {
            Constraint::SubsetBarrier {
                script,
                offset,
                target,
            }
        } else {
            Constraint::Subset { target }
        };
        self.add_constraint(types, constraint, true);
    }

    fn call_prop_new_type(&mut self, script: ScriptId, call_offset: u32, id: PropertyId, ty: Type) {
        if Self::unknown_property_access(ty) {
            self.monitor_bytecode(script, call_offset, false);
            return;
        }
        let Some(object) = self.property_object(ty) else {
            return;
        };
        if self.object(object).map_or(true, |o| o.unknown_properties()) {
            self.monitor_bytecode(script, call_offset, false);
            return;
        }
        let types = self.get_property(object, id, false);
        if !self.set(types).has_propagated_property() {
            self.get_from_prototypes(object, id, types, false);
        }
        self.add_constraint(
            types,
            Constraint::PropagateThis {
                script,
                call_offset,
                this_type: ty,
            },
            true,
        );
    }

    // ===== Calls =====

    /// Script run by calling a value of type `ty`, if interpreted
    pub(crate) fn interpreted_callee(&mut self, ty: Type) -> Option<ScriptId> {
        match ty {
            Type::Singleton(heap) => match self.heap_object(heap)?.kind {
                ObjectKind::Function(script) => Some(script),
                _ => None,
            },
            Type::Object(object) => self.object(object)?.function_script,
            _ => None,
        }
    }

    fn call_new_type(&mut self, site: CallSiteId, ty: Type) {
        let Some(site) = self.call_site(site).cloned() else {
            return;
        };

        if ty.is_unknown_object() {
            self.monitor_bytecode(site.script, site.offset, false);
            return;
        }

        let callee = match ty {
            Type::Singleton(heap) => {
                let kind = self.heap_object(heap).map(|o| o.kind.clone());
                match kind {
                    Some(ObjectKind::Function(script)) => script,
                    Some(ObjectKind::Native(native)) => {
                        self.native_call(&site, native);
                        return;
                    }
                    // Calls on non-functions are monitored dynamically
                    _ => return,
                }
            }
            Type::Object(object) => match self.object(object).and_then(|o| o.function_script) {
                Some(script) => script,
                None => return,
            },
            _ => return,
        };

        if let Err(err) = self.ensure_ran_inference(callee) {
            // A callee that failed analysis still has frame sets, with unknown returns
            debug!(callee = callee.0, %err, "callee not analyzed");
            if !self.is_enabled() {
                return;
            }
        }
        let Some(callee_types) = self.type_script(callee) else {
            return;
        };
        let callee_args: SmallVec<[TypeSetId; 4]> = callee_types.arg_types().iter().copied().collect();
        let callee_this = callee_types.this_types();
        let callee_return = callee_types.return_types();

        for (arg, formal) in site.args.iter().zip(callee_args.iter()) {
            self.add_constraint(
                *arg,
                Constraint::SubsetBarrier {
                    script: site.script,
                    offset: site.offset,
                    target: *formal,
                },
                true,
            );
        }
        for formal in callee_args.iter().skip(site.args.len()) {
            self.add_type(*formal, Type::Undefined);
        }

        if site.is_new {
            // The constructed object, unless the callee returns an object
            self.add_subset(callee_this, site.return_types);
            self.add_constraint(
                callee_return,
                Constraint::FilterPrimitives {
                    target: site.return_types,
                    only_null_void: false,
                },
                true,
            );
        } else {
            self.add_subset(callee_return, site.return_types);
        }
    }

    fn native_call(&mut self, site: &CallSite, native: NativeFunction) {
        self.monitor_bytecode(site.script, site.offset, true);
        match native {
            NativeFunction::ArrayPush => {
                for arg in &site.args {
                    self.add_constraint(
                        site.this_types,
                        Constraint::Prop {
                            script: site.script,
                            offset: site.offset,
                            target: *arg,
                            id: PropertyId::Elements,
                            assign: true,
                        },
                        true,
                    );
                }
            }
            NativeFunction::ArrayPop => {
                self.add_constraint(
                    site.this_types,
                    Constraint::Prop {
                        script: site.script,
                        offset: site.offset,
                        target: site.return_types,
                        id: PropertyId::Elements,
                        assign: false,
                    },
                    true,
                );
            }
            _ => {}
        }
    }

    // ===== Arithmetic =====

    fn arith_new_type(&mut self, target: TypeSetId, other: Option<TypeSetId>, ty: Type) {
        use super::types::TypeFlags as F;

        let Some(other) = other else {
            let result = match ty {
                Type::Unknown => Type::Unknown,
                Type::Double => Type::Double,
                _ => Type::Int32,
            };
            self.add_type(target, result);
            return;
        };

        let other_set = self.set(other);
        if ty == Type::Unknown || other_set.is_unknown() {
            self.add_type(target, Type::Unknown);
            return;
        }
        let has_objects = other_set.object_count() != 0;
        match ty {
            Type::Double => {
                let numeric = F::UNDEFINED | F::NULL | F::INT32 | F::DOUBLE | F::BOOLEAN | F::ANYOBJECT;
                if other_set.has_any_flag(numeric) || has_objects {
                    self.add_type(target, Type::Double);
                }
            }
            Type::String => self.add_type(target, Type::String),
            _ => {
                let integral = F::UNDEFINED | F::NULL | F::INT32 | F::BOOLEAN | F::ANYOBJECT;
                let int = other_set.has_any_flag(integral) || has_objects;
                let double = other_set.has_any_flag(F::DOUBLE);
                if int {
                    self.add_type(target, Type::Int32);
                }
                if double {
                    self.add_type(target, Type::Double);
                }
            }
        }
    }
}
