//! Source row normalization: label canonicalization and field projection.

use crate::error::{MergeError, MergeResult};
use entisync_types::{FieldSlot, NormalizedRow, SourceRow, LABEL_FIELD};
use std::collections::BTreeSet;

/// Maps raw source rows onto the label-keyed shape the diff works with.
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    label_key: String,
    allow_list: Option<BTreeSet<String>>,
}

impl RowNormalizer {
    /// Creates a normalizer reading the label from `label_key`.
    ///
    /// An allow-list that does not name `label_key` is rejected, since every
    /// row would then fail for lack of a label.
    pub fn new(
        label_key: impl Into<String>,
        allow_list: Option<BTreeSet<String>>,
    ) -> MergeResult<Self> {
        let label_key = label_key.into();
        if let Some(allowed) = &allow_list
            && !allowed.contains(&label_key)
        {
            return Err(MergeError::Configuration(format!(
                "source_keys must include the label field '{label_key}'"
            )));
        }
        Ok(Self {
            label_key,
            allow_list,
        })
    }

    /// The source field the label is read from.
    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    /// Normalizes one row. `index` is the row's position in the input and is
    /// only used for error context.
    pub fn normalize(&self, row: &SourceRow, index: usize) -> MergeResult<NormalizedRow> {
        let label = match row.lookup(&self.label_key) {
            FieldSlot::Present(value) => value.as_text().map(|t| t.into_owned()),
            FieldSlot::PresentNull | FieldSlot::Absent => None,
        }
        .ok_or_else(|| MergeError::MissingKey {
            field: self.label_key.clone(),
            row: index,
        })?;

        let fields = row
            .iter()
            .filter(|(name, _)| self.keeps(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Ok(NormalizedRow { label, fields })
    }

    fn keeps(&self, name: &str) -> bool {
        if name == self.label_key || name == LABEL_FIELD {
            return false;
        }
        self.allow_list
            .as_ref()
            .is_none_or(|allowed| allowed.contains(name))
    }
}

impl Default for RowNormalizer {
    fn default() -> Self {
        Self {
            label_key: LABEL_FIELD.to_string(),
            allow_list: None,
        }
    }
}
