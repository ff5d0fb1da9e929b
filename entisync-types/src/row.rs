//! Normalized source rows and remote (target) rows.

use crate::value::{FieldSlot, FieldValue};
use crate::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Remote field carrying the entity identifier.
pub const ID_FIELD: &str = "__id";
/// Remote field carrying system metadata, including the version.
pub const SYSTEM_FIELD: &str = "__system";
/// Field carrying the entity label, on both sides.
pub const LABEL_FIELD: &str = "label";

/// Fields that are never diffed or registered as schema properties.
pub const RESERVED_KEYS: [&str; 3] = [ID_FIELD, SYSTEM_FIELD, LABEL_FIELD];

/// Whether `name` is one of [`RESERVED_KEYS`].
pub fn is_reserved(name: &str) -> bool {
    RESERVED_KEYS.contains(&name)
}

/// A source row after label canonicalization and field projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    /// Textual label, always present.
    pub label: String,
    /// Remaining fields, excluding the label.
    pub fields: BTreeMap<String, FieldValue>,
}

impl NormalizedRow {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Three-state lookup of a non-label field.
    pub fn field(&self, name: &str) -> FieldSlot<'_> {
        FieldSlot::from_lookup(self.fields.get(name))
    }

    /// All field names including the label.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(LABEL_FIELD).chain(self.fields.keys().map(String::as_str))
    }
}

/// System metadata attached to every remote row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMeta {
    /// Version used as the optimistic-concurrency precondition on update.
    pub version: u32,
    /// Remaining metadata, carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SystemMeta {
    pub fn with_version(version: u32) -> Self {
        Self {
            version,
            extra: serde_json::Map::new(),
        }
    }
}

/// One row of the remote collection as read in the snapshot.
///
/// Property values are text; the remote reports properties that were never
/// set as null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRow {
    #[serde(rename = "__id")]
    pub id: EntityId,
    #[serde(rename = "__system")]
    pub system: SystemMeta,
    pub label: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Option<String>>,
}

impl TargetRow {
    pub fn new(id: EntityId, version: u32, label: impl Into<String>) -> Self {
        Self {
            id,
            system: SystemMeta::with_version(version),
            label: label.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.properties.insert(name.into(), value.map(str::to_string));
        self
    }

    /// The version captured in this snapshot.
    pub fn version(&self) -> u32 {
        self.system.version
    }

    /// Value of `name` as used in a composite key.
    ///
    /// The label and id resolve to their structural fields; any other name
    /// resolves to the property. Returns `None` when the row has no such
    /// property at all and `Some(None)` when the property is unset.
    pub fn key_component(&self, name: &str) -> Option<Option<String>> {
        match name {
            LABEL_FIELD => Some(Some(self.label.clone())),
            ID_FIELD => Some(Some(self.id.to_string())),
            _ => self.properties.get(name).cloned(),
        }
    }
}
