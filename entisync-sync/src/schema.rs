//! Schema extension: which properties to register and which to send.

use crate::diff::{Diff, RowUpdate};
use crate::error::{MergeError, MergeResult, RemoteOp};
use crate::remote::{EntityListRef, EntityPatch, EntityRemote, NewEntity};
use entisync_types::{
    CompositeKey, FieldValue, MatchKeys, NormalizedRow, TargetRow, RESERVED_KEYS,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Outcome of schema planning for one diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaPlan {
    /// Properties to create remotely, in registration order.
    pub to_register: Vec<String>,
    /// Properties that payloads may carry.
    pub final_keys: BTreeSet<String>,
}

impl SchemaPlan {
    pub fn resolve(diff: &Diff, add_new_properties: bool) -> Self {
        if add_new_properties {
            Self {
                to_register: diff.keys_difference().into_iter().collect(),
                final_keys: diff.keys_union(),
            }
        } else {
            Self {
                to_register: Vec::new(),
                final_keys: diff.keys_intersection(),
            }
        }
    }

    /// Registers every planned property, one at a time.
    ///
    /// Returns the names the remote actually created; a property that already
    /// existed is accepted but not reported. Stops at the first failure.
    pub async fn register(
        &self,
        remote: &dyn EntityRemote,
        list: &EntityListRef,
    ) -> MergeResult<Vec<String>> {
        let mut created = Vec::new();
        for name in &self.to_register {
            let added = remote
                .register_property(list, name)
                .await
                .map_err(|source| MergeError::Remote {
                    op: RemoteOp::RegisterProperty,
                    list: list.to_string(),
                    row: Some(name.clone()),
                    source,
                })?;
            if added {
                created.push(name.clone());
            } else {
                debug!("Property {} already exists on {}", name, list);
            }
        }
        if !created.is_empty() {
            info!("Registered {} new properties on {}", created.len(), list);
        }
        Ok(created)
    }
}

/// A diff with its payload property set fixed; the work a merge performs.
///
/// After a merge, the same value tells the caller what was planned, and any
/// phase skipped by a disabled flag still holds its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeActions {
    pub match_keys: MatchKeys,
    pub to_insert: BTreeMap<CompositeKey, NormalizedRow>,
    pub to_update: BTreeMap<CompositeKey, RowUpdate>,
    pub to_delete: BTreeMap<CompositeKey, TargetRow>,
    pub source_keys: BTreeSet<String>,
    pub target_keys: BTreeSet<String>,
    pub final_keys: BTreeSet<String>,
    pub duplicate_targets: Vec<TargetRow>,
}

impl MergeActions {
    pub fn reserved_keys(&self) -> &'static [&'static str] {
        &RESERVED_KEYS
    }

    /// Create payloads: each insert row reduced to its label and the fields in
    /// `final_keys`.
    pub fn insert_payloads(&self) -> Vec<NewEntity> {
        self.to_insert
            .values()
            .map(|row| NewEntity {
                label: row.label.clone(),
                data: self.filter_fields(&row.fields),
            })
            .collect()
    }

    /// Update payload for one matched row, or `None` when no staged change
    /// survives the `final_keys` filter.
    pub fn update_patch(&self, update: &RowUpdate) -> Option<EntityPatch> {
        let data = self.filter_fields(&update.changes);
        if data.is_empty() {
            return None;
        }
        Some(EntityPatch {
            label: Some(update.label.clone()),
            data: Some(data),
        })
    }

    fn filter_fields(&self, fields: &BTreeMap<String, FieldValue>) -> BTreeMap<String, FieldValue> {
        fields
            .iter()
            .filter(|(name, _)| self.final_keys.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Number of rows across all three phases.
    pub fn total(&self) -> usize {
        self.to_insert.len() + self.to_update.len() + self.to_delete.len()
    }
}
