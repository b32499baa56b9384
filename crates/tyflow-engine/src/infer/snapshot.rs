//! JSON snapshots of inferred types
//!
//! A read-only view of a script's type sets for external tooling. Object
//! types print as `T<n>`, singleton objects as `<0x..>`.

use super::engine::InferenceEngine;
use super::types::{TypeSetId, TypeTag};
use serde::{Deserialize, Serialize};
use tyflow_bytecode::ScriptId;

/// Contents of one type set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSetSnapshot {
    pub id: u32,
    pub types: Vec<String>,
    pub tag: TypeTag,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub own_property: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub configured_property: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub definite_slot: Option<u32>,
    /// Kinds of the attached constraints
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub constraints: Vec<String>,
}

/// Type set of value `index` pushed at `offset`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushedSnapshot {
    pub offset: u32,
    pub index: u32,
    pub set: TypeSetSnapshot,
}

/// Every type set of one script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSnapshot {
    pub script: u32,
    pub name: String,
    pub this_types: TypeSetSnapshot,
    pub arg_types: Vec<TypeSetSnapshot>,
    pub local_types: Vec<TypeSetSnapshot>,
    pub return_types: TypeSetSnapshot,
    /// Empty until inference has run
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pushed: Vec<PushedSnapshot>,
}

impl ScriptSnapshot {
    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl InferenceEngine {
    /// Snapshot of a single type set
    pub fn snapshot(&self, id: TypeSetId) -> TypeSetSnapshot {
        let set = self.set(id);
        TypeSetSnapshot {
            id: id.0,
            types: set.types().iter().map(|ty| ty.to_string()).collect(),
            tag: set.known_tag(),
            own_property: set.is_own_property(false),
            configured_property: set.is_own_property(true),
            definite_slot: set.definite_slot(),
            constraints: set.constraints.iter().map(|c| c.kind().to_string()).collect(),
        }
    }

    /// Snapshot of every type set of a registered script
    pub fn script_snapshot(&self, script: ScriptId) -> Option<ScriptSnapshot> {
        let source = self.script_source(script)?;
        let types = self.type_script(script)?;

        let mut pushed: Vec<(u32, u32, TypeSetId)> = self
            .inference(script)
            .map(|inference| {
                inference
                    .pushed
                    .iter()
                    .map(|(&(offset, index), &set)| (offset, index, set))
                    .collect()
            })
            .unwrap_or_default();
        pushed.sort_unstable();

        Some(ScriptSnapshot {
            script: script.0,
            name: source.name.clone(),
            this_types: self.snapshot(types.this_types()),
            arg_types: types.arg_types().iter().map(|set| self.snapshot(*set)).collect(),
            local_types: types.local_types().iter().map(|set| self.snapshot(*set)).collect(),
            return_types: self.snapshot(types.return_types()),
            pushed: pushed
                .into_iter()
                .map(|(offset, index, set)| PushedSnapshot {
                    offset,
                    index,
                    set: self.snapshot(set),
                })
                .collect(),
        })
    }
}
