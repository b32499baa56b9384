//! Removing dead objects and scripts from the type graph
//!
//! The host's collector decides what is alive and answers through
//! [`Liveness`]. Sweeping keeps every type recorded for live sets but drops
//! all constraints: analyses are discarded and rebuilt on demand, and every
//! compiled script is queued for recompilation since its freeze constraints
//! are gone.

use super::engine::InferenceEngine;
use super::types::{Type, TypeObjectId, TypeSetId};
use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::debug;
use tyflow_bytecode::{HeapRef, ScriptId};

/// Liveness of the things type sets may refer to, as decided by the host
pub trait Liveness {
    /// Check if objects of a type object can still be reached
    fn is_object_alive(&self, object: TypeObjectId) -> bool;

    /// Check if a heap object is still reachable
    fn is_heap_ref_alive(&self, heap: HeapRef) -> bool;

    /// Check if a script can still run
    fn is_script_alive(&self, script: ScriptId) -> bool;
}

/// What a sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Scripts unregistered
    pub scripts: usize,
    /// Type objects destroyed
    pub objects: usize,
    /// Heap objects forgotten
    pub heap_refs: usize,
    /// Object types dropped from surviving sets
    pub object_types: usize,
    /// Type sets returned to the free list
    pub sets: usize,
    /// Literal and allocation table entries dropped
    pub table_entries: usize,
}

impl InferenceEngine {
    /// Remove everything `liveness` reports dead
    pub fn sweep(&mut self, liveness: &dyn Liveness) -> SweepStats {
        let mut stats = SweepStats::default();
        let mut freed: FxHashSet<TypeSetId> = FxHashSet::default();

        let dead_scripts: Vec<ScriptId> = self
            .scripts
            .keys()
            .copied()
            .filter(|script| !liveness.is_script_alive(*script))
            .collect();
        for script in &dead_scripts {
            let Some(entry) = self.scripts.remove(script) else {
                continue;
            };
            let types = &entry.types;
            freed.insert(types.this_types());
            freed.insert(types.return_types());
            freed.extend(types.arg_types().iter().copied());
            freed.extend(types.local_types().iter().copied());
            freed.extend(types.bytecode.values().copied());
            if let Some(inference) = &entry.inference {
                freed.extend(inference.pushed.values().copied());
                freed.extend(inference.joins.values().copied());
            }
            self.compiled.remove(script);
            self.pending_recompiles.retain(|pending| pending != script);
        }
        stats.scripts = dead_scripts.len();

        let dead_heap: Vec<HeapRef> = self
            .heap
            .keys()
            .copied()
            .filter(|heap| !liveness.is_heap_ref_alive(*heap))
            .collect();
        for heap in &dead_heap {
            self.heap.remove(heap);
        }
        stats.heap_refs = dead_heap.len();

        // Global and standard types are roots
        let global = self.global_type();
        let roots: FxHashSet<TypeObjectId> = self.standard.values().copied().chain([global]).collect();
        let mut dead_objects = FxHashSet::default();
        for (index, slot) in self.objects.iter_mut().enumerate() {
            let id = TypeObjectId(index as u32);
            let Some(object) = slot.as_ref() else {
                continue;
            };
            let dead = !roots.contains(&id)
                && (!liveness.is_object_alive(id)
                    || object.singleton.map_or(false, |heap| !liveness.is_heap_ref_alive(heap))
                    || object
                        .function_script
                        .map_or(false, |script| !liveness.is_script_alive(script)));
            if dead {
                if let Some(object) = slot.take() {
                    freed.extend(object.properties.values().copied());
                }
                dead_objects.insert(id);
            }
        }
        stats.objects = dead_objects.len();

        for entry in self.heap.values_mut() {
            if entry.type_object.map_or(false, |object| dead_objects.contains(&object)) {
                entry.type_object = None;
            }
        }
        for entry in self.scripts.values_mut() {
            if entry.function_type.map_or(false, |object| dead_objects.contains(&object)) {
                entry.function_type = None;
            }
            // Intermediate sets are rebuilt by the next analysis
            if let Some(inference) = entry.inference.take() {
                freed.extend(inference.pushed.values().copied());
                freed.extend(inference.joins.values().copied());
            }
        }
        for object in self.objects.iter_mut().flatten() {
            object.contribution = 0;
            let constructor_dead = object
                .new_script
                .as_ref()
                .map_or(false, |new_script| !liveness.is_script_alive(new_script.script));
            if constructor_dead {
                object.new_script = None;
            }
        }

        if let Some(unknown) = self.unknown_set {
            freed.remove(&unknown);
        }
        let keep = |ty: Type| match ty {
            Type::Object(object) => !dead_objects.contains(&object),
            Type::Singleton(heap) => liveness.is_heap_ref_alive(heap),
            _ => true,
        };
        for (index, set) in self.sets.iter_mut().enumerate() {
            if freed.contains(&TypeSetId(index as u32)) {
                continue;
            }
            stats.object_types += set.retain_objects(&keep);
            set.constraints.clear();
            set.clear_propagated_property();
        }
        stats.sets = freed.len();
        for set in freed {
            self.free_set(set);
        }

        self.call_sites.clear();
        self.marks.clear();
        stats.table_entries = self.tables.retain(
            |object| !dead_objects.contains(&object),
            |heap| liveness.is_heap_ref_alive(heap),
            |script| liveness.is_script_alive(script),
        );

        let mut compiled: Vec<ScriptId> = self.compiled.iter().copied().collect();
        compiled.sort();
        for script in compiled {
            self.add_pending_recompile(script);
        }

        debug!(
            scripts = stats.scripts,
            objects = stats.objects,
            heap_refs = stats.heap_refs,
            object_types = stats.object_types,
            sets = stats.sets,
            table_entries = stats.table_entries,
            "sweep"
        );
        stats
    }
}
