//! Merge request options and parameter precedence.

use crate::error::{MergeError, MergeResult};
use crate::remote::CreateSource;
use entisync_types::{MatchKeys, LABEL_FIELD};
use std::collections::BTreeSet;

/// Returns the first present value, in order of precedence.
///
/// Used wherever a parameter can come from several places, e.g. an explicit
/// argument, then a per-engine default, then configuration.
pub fn coalesce<T>(candidates: impl IntoIterator<Item = Option<T>>) -> Option<T> {
    candidates.into_iter().flatten().next()
}

/// Everything the caller controls about one merge invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    /// Name of the target entity list.
    pub entity_list: String,
    /// Project holding the entity list. Falls back to the engine default.
    pub project_id: Option<u32>,
    /// Fields used to pair source and target rows. Defaults to the label.
    pub match_keys: Option<Vec<String>>,
    /// Register source-only fields as new remote properties.
    pub add_new_properties: bool,
    /// Send updates for matched rows that differ.
    pub update_matched: bool,
    /// Delete remote rows with no source counterpart.
    pub delete_not_matched: bool,
    /// Source field holding the label.
    pub source_label_key: String,
    /// If set, only these source fields are processed.
    pub source_keys: Option<BTreeSet<String>>,
    /// Name recorded by the remote as the origin of created rows.
    pub create_source: Option<String>,
    /// Size of the source data recorded with created rows.
    pub source_size: Option<String>,
}

impl MergeRequest {
    /// A request with the default flags: add properties, update matched
    /// rows, keep unmatched remote rows.
    pub fn new(entity_list: impl Into<String>) -> Self {
        Self {
            entity_list: entity_list.into(),
            project_id: None,
            match_keys: None,
            add_new_properties: true,
            update_matched: true,
            delete_not_matched: false,
            source_label_key: LABEL_FIELD.to_string(),
            source_keys: None,
            create_source: None,
            source_size: None,
        }
    }

    #[must_use]
    pub fn project(mut self, project_id: u32) -> Self {
        self.project_id = Some(project_id);
        self
    }

    #[must_use]
    pub fn match_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.match_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn add_new_properties(mut self, enabled: bool) -> Self {
        self.add_new_properties = enabled;
        self
    }

    #[must_use]
    pub fn update_matched(mut self, enabled: bool) -> Self {
        self.update_matched = enabled;
        self
    }

    #[must_use]
    pub fn delete_not_matched(mut self, enabled: bool) -> Self {
        self.delete_not_matched = enabled;
        self
    }

    #[must_use]
    pub fn source_label_key(mut self, key: impl Into<String>) -> Self {
        self.source_label_key = key.into();
        self
    }

    #[must_use]
    pub fn source_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn create_source(mut self, name: impl Into<String>, size: Option<String>) -> Self {
        self.create_source = Some(name.into());
        self.source_size = size;
        self
    }

    /// Validated, sorted match keys.
    pub fn resolved_match_keys(&self) -> MergeResult<MatchKeys> {
        match &self.match_keys {
            None => Ok(MatchKeys::default()),
            Some(keys) => MatchKeys::new(keys.iter().cloned())
                .map_err(|e| MergeError::Configuration(e.to_string())),
        }
    }

    /// Source descriptor attached to the batch create call.
    pub fn resolved_create_source(&self) -> CreateSource {
        CreateSource {
            name: coalesce([self.create_source.clone()])
                .unwrap_or_else(CreateSource::default_name),
            size: self.source_size.clone(),
        }
    }
}
