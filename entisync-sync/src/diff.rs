//! Diff engine: pairs source rows with the remote snapshot and classifies
//! every row as insert, update, delete or unchanged.
//!
//! Everything here is pure. Validation of the source data (labels, match
//! keys, uniqueness) happens in [`SourceIndex::build`] so a bad input is
//! rejected before the remote is ever contacted.

use crate::error::{MergeError, MergeResult};
use crate::normalizer::RowNormalizer;
use crate::schema::MergeActions;
use entisync_types::{
    is_reserved, CompositeKey, EntityId, FieldSlot, FieldValue, MatchKeys, NormalizedRow,
    SourceRow, SystemMeta, TargetRow, LABEL_FIELD,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Normalized source rows keyed by composite key.
#[derive(Debug, Clone)]
pub struct SourceIndex {
    match_keys: MatchKeys,
    rows: BTreeMap<CompositeKey, NormalizedRow>,
    source_keys: BTreeSet<String>,
}

impl SourceIndex {
    /// Normalizes every row and indexes it by its match-key values.
    ///
    /// Fails on the first row missing its label or a match-key field, and on
    /// the first composite key seen twice.
    pub fn build(
        rows: &[SourceRow],
        normalizer: &RowNormalizer,
        match_keys: MatchKeys,
    ) -> MergeResult<Self> {
        let mut index = BTreeMap::new();
        let mut source_keys = BTreeSet::new();

        for (i, raw) in rows.iter().enumerate() {
            let row = normalizer.normalize(raw, i)?;
            let key = source_key(&row, &match_keys, i)?;
            source_keys.extend(row.fields.keys().filter(|k| !is_reserved(k)).cloned());

            if index.contains_key(&key) {
                return Err(MergeError::DuplicateKey { key, match_keys });
            }
            index.insert(key, row);
        }

        Ok(Self {
            match_keys,
            rows: index,
            source_keys,
        })
    }

    pub fn match_keys(&self) -> &MatchKeys {
        &self.match_keys
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &CompositeKey) -> Option<&NormalizedRow> {
        self.rows.get(key)
    }

    /// Non-reserved field names seen across all normalized rows.
    pub fn source_keys(&self) -> &BTreeSet<String> {
        &self.source_keys
    }
}

fn source_key(row: &NormalizedRow, match_keys: &MatchKeys, index: usize) -> MergeResult<CompositeKey> {
    let mut parts = Vec::with_capacity(match_keys.len());
    for name in match_keys.iter() {
        let part = if name == LABEL_FIELD {
            Some(row.label.clone())
        } else {
            match row.field(name) {
                FieldSlot::Present(value) => value.as_text().map(|t| t.into_owned()),
                FieldSlot::PresentNull => None,
                FieldSlot::Absent => {
                    return Err(MergeError::MissingKey {
                        field: name.to_string(),
                        row: index,
                    });
                }
            }
        };
        parts.push(part);
    }
    Ok(CompositeKey::new(parts))
}

fn target_key(row: &TargetRow, match_keys: &MatchKeys) -> MergeResult<CompositeKey> {
    let mut parts = Vec::with_capacity(match_keys.len());
    for name in match_keys.iter() {
        let part = row.key_component(name).ok_or_else(|| MergeError::MissingTargetKey {
            field: name.to_string(),
            id: row.id,
        })?;
        parts.push(part);
    }
    Ok(CompositeKey::new(parts))
}

/// Staged changes for one matched row.
///
/// The id, system metadata and label are always the target's, regardless of
/// what the source holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowUpdate {
    pub id: EntityId,
    pub system: SystemMeta,
    pub label: String,
    /// Fields whose source value differs from the target, plus fields the
    /// target does not have yet. `Null` clears a value.
    pub changes: BTreeMap<String, FieldValue>,
}

impl RowUpdate {
    /// The version to send as the update precondition.
    pub fn version(&self) -> u32 {
        self.system.version
    }
}

/// The raw classification of one source set against one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    pub match_keys: MatchKeys,
    pub to_insert: BTreeMap<CompositeKey, NormalizedRow>,
    pub to_update: BTreeMap<CompositeKey, RowUpdate>,
    pub to_delete: BTreeMap<CompositeKey, TargetRow>,
    pub source_keys: BTreeSet<String>,
    pub target_keys: BTreeSet<String>,
    /// Target rows whose key was already claimed by an earlier target row.
    /// They are neither updated nor deleted.
    pub duplicate_targets: Vec<TargetRow>,
}

impl Diff {
    /// Classifies every target row against the source index.
    ///
    /// Fails when a target row has no property for one of the match keys.
    /// An unset property is fine and yields a null key component.
    pub fn compute(index: SourceIndex, targets: Vec<TargetRow>) -> MergeResult<Self> {
        let SourceIndex {
            match_keys,
            rows: mut unclaimed,
            source_keys,
        } = index;

        let mut to_update = BTreeMap::new();
        let mut to_delete = BTreeMap::new();
        let mut target_keys = BTreeSet::new();
        let mut duplicate_targets = Vec::new();
        let mut seen = BTreeSet::new();

        for target in targets {
            target_keys.extend(target.properties.keys().filter(|k| !is_reserved(k)).cloned());
            let key = target_key(&target, &match_keys)?;

            if !seen.insert(key.clone()) {
                warn!("Target row {} shares key {} with an earlier row; leaving it untouched", target.id, key);
                duplicate_targets.push(target);
                continue;
            }

            match unclaimed.remove(&key) {
                None => {
                    debug!("No source row for {} {}; delete candidate", target.id, key);
                    to_delete.insert(key, target);
                }
                Some(source) => {
                    let changes = stage_changes(&source, &target);
                    if changes.is_empty() {
                        debug!("Row {} {} unchanged", target.id, key);
                    } else {
                        debug!("Row {} {} differs in {} fields", target.id, key, changes.len());
                        to_update.insert(
                            key,
                            RowUpdate {
                                id: target.id,
                                system: target.system,
                                label: target.label,
                                changes,
                            },
                        );
                    }
                }
            }
        }

        for key in unclaimed.keys() {
            debug!("No target row for {}; insert candidate", key);
        }

        Ok(Self {
            match_keys,
            to_insert: unclaimed,
            to_update,
            to_delete,
            source_keys,
            target_keys,
            duplicate_targets,
        })
    }

    /// Source fields the target does not know yet.
    pub fn keys_difference(&self) -> BTreeSet<String> {
        self.source_keys.difference(&self.target_keys).cloned().collect()
    }

    /// Fields known to both sides.
    pub fn keys_intersection(&self) -> BTreeSet<String> {
        self.source_keys.intersection(&self.target_keys).cloned().collect()
    }

    /// Fields known to either side.
    pub fn keys_union(&self) -> BTreeSet<String> {
        self.source_keys.union(&self.target_keys).cloned().collect()
    }

    /// True when applying this diff would not change anything.
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Fixes the property set used for payloads.
    pub fn into_actions(self, final_keys: BTreeSet<String>) -> MergeActions {
        MergeActions {
            match_keys: self.match_keys,
            to_insert: self.to_insert,
            to_update: self.to_update,
            to_delete: self.to_delete,
            source_keys: self.source_keys,
            target_keys: self.target_keys,
            final_keys,
            duplicate_targets: self.duplicate_targets,
        }
    }
}

fn stage_changes(source: &NormalizedRow, target: &TargetRow) -> BTreeMap<String, FieldValue> {
    let mut changes = BTreeMap::new();

    for (name, current) in &target.properties {
        if is_reserved(name) {
            continue;
        }
        match source.field(name) {
            FieldSlot::Absent => {}
            FieldSlot::Present(value) => {
                if !value.matches_text(current.as_deref()) {
                    changes.insert(name.clone(), value.clone());
                }
            }
            FieldSlot::PresentNull => {
                if current.is_some() {
                    changes.insert(name.clone(), FieldValue::Null);
                }
            }
        }
    }

    for (name, value) in &source.fields {
        if is_reserved(name) || target.properties.contains_key(name) || value.is_null() {
            continue;
        }
        changes.insert(name.clone(), value.clone());
    }

    changes
}
