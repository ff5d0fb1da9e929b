//! Remote entity store abstraction.
//!
//! The merge engine talks to the remote only through [`EntityRemote`]. The
//! HTTP binding lives in [`crate::central`]; [`mock::MockRemote`] keeps
//! everything in memory for tests.

use crate::error::RemoteResult;
use async_trait::async_trait;
use entisync_types::{EntityId, FieldValue, TargetRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one entity list on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityListRef {
    pub project_id: u32,
    pub name: String,
}

impl EntityListRef {
    pub fn new(project_id: u32, name: impl Into<String>) -> Self {
        Self {
            project_id,
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityListRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.name)
    }
}

/// A row to create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEntity {
    pub label: String,
    pub data: BTreeMap<String, FieldValue>,
}

/// Partial update of one row. `None` leaves the part unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EntityPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, FieldValue>>,
}

/// Provenance recorded by the remote for a batch of created rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSource {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl CreateSource {
    pub fn default_name() -> String {
        format!("entisync v{}", env!("CARGO_PKG_VERSION"))
    }
}

impl Default for CreateSource {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            size: None,
        }
    }
}

/// Operations the merge engine needs from a remote entity store.
#[async_trait]
pub trait EntityRemote: Send + Sync {
    /// Name of the remote, for logs.
    fn provider_name(&self) -> &'static str;

    /// Reads every row of the list, with its current version.
    async fn fetch_target_rows(&self, list: &EntityListRef) -> RemoteResult<Vec<TargetRow>>;

    /// Adds a property to the list schema.
    ///
    /// Returns `false` when the property already existed.
    async fn register_property(&self, list: &EntityListRef, name: &str) -> RemoteResult<bool>;

    /// Creates all rows in one call.
    async fn batch_create(
        &self,
        list: &EntityListRef,
        rows: Vec<NewEntity>,
        source: &CreateSource,
    ) -> RemoteResult<()>;

    /// Updates one row, failing if its version is no longer `base_version`.
    async fn update_row(
        &self,
        list: &EntityListRef,
        id: EntityId,
        patch: EntityPatch,
        base_version: u32,
    ) -> RemoteResult<TargetRow>;

    /// Deletes one row unconditionally.
    async fn delete_row(&self, list: &EntityListRef, id: EntityId) -> RemoteResult<()>;
}

/// In-memory remote for tests.
pub mod mock {
    use super::*;
    use crate::error::{RemoteError, RemoteOp};
    use std::collections::{BTreeSet, HashMap};
    use std::sync::{Mutex, MutexGuard};

    /// A call observed by [`MockRemote`], in the order it was made.
    #[derive(Debug, Clone, PartialEq)]
    pub enum RemoteCall {
        FetchRows,
        RegisterProperty(String),
        BatchCreate(Vec<NewEntity>),
        Update {
            id: EntityId,
            patch: EntityPatch,
            base_version: u32,
        },
        Delete(EntityId),
    }

    impl RemoteCall {
        pub fn op(&self) -> RemoteOp {
            match self {
                RemoteCall::FetchRows => RemoteOp::FetchRows,
                RemoteCall::RegisterProperty(_) => RemoteOp::RegisterProperty,
                RemoteCall::BatchCreate(_) => RemoteOp::BatchCreate,
                RemoteCall::Update { .. } => RemoteOp::Update,
                RemoteCall::Delete(_) => RemoteOp::Delete,
            }
        }
    }

    #[derive(Debug, Default)]
    struct State {
        rows: Vec<TargetRow>,
        properties: BTreeSet<String>,
        calls: Vec<RemoteCall>,
        counts: HashMap<RemoteOp, usize>,
        failures: Vec<(RemoteOp, usize)>,
        last_source: Option<CreateSource>,
    }

    impl State {
        /// Records the call and fails it if a failure was scheduled for it.
        fn record(&mut self, call: RemoteCall) -> RemoteResult<()> {
            let op = call.op();
            self.calls.push(call);
            let count = self.counts.entry(op).or_insert(0);
            *count += 1;
            if self.failures.contains(&(op, *count)) {
                return Err(api_error(500, format!("injected {op} failure")));
            }
            Ok(())
        }

        fn check_properties<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> RemoteResult<()> {
            for name in names {
                if !self.properties.contains(name) {
                    return Err(api_error(400, format!("property '{name}' does not exist")));
                }
            }
            Ok(())
        }

        fn position(&self, id: EntityId) -> RemoteResult<usize> {
            self.rows
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| api_error(404, format!("entity {id} not found")))
        }
    }

    fn api_error(status: u16, message: String) -> RemoteError {
        RemoteError::Api {
            url: "mock://".to_string(),
            status,
            code: None,
            message,
        }
    }

    fn apply_data(row: &mut TargetRow, data: &BTreeMap<String, FieldValue>) {
        for (name, value) in data {
            row.properties
                .insert(name.clone(), value.as_text().map(|t| t.into_owned()));
        }
    }

    /// A single in-memory entity list.
    ///
    /// Behaves like the real remote where the merge cares: unknown properties
    /// are rejected, updates check and bump the version, and unknown ids are
    /// not found.
    #[derive(Debug, Default)]
    pub struct MockRemote {
        state: Mutex<State>,
    }

    impl MockRemote {
        pub fn new() -> Self {
            Self::default()
        }

        /// Starts from the given rows; their properties form the schema.
        pub fn with_rows(rows: Vec<TargetRow>) -> Self {
            let properties = rows
                .iter()
                .flat_map(|r| r.properties.keys().cloned())
                .collect();
            Self {
                state: Mutex::new(State {
                    rows,
                    properties,
                    ..State::default()
                }),
            }
        }

        /// Adds schema properties without any rows holding them.
        #[must_use]
        pub fn with_properties<I, S>(self, names: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.lock().properties.extend(names.into_iter().map(Into::into));
            self
        }

        /// Makes the `nth` call (1-based) of `op` fail with a server error.
        pub fn fail_on(&self, op: RemoteOp, nth: usize) {
            self.lock().failures.push((op, nth));
        }

        pub fn calls(&self) -> Vec<RemoteCall> {
            self.lock().calls.clone()
        }

        /// Calls made after the snapshot read, i.e. the writes.
        pub fn write_calls(&self) -> Vec<RemoteCall> {
            self.calls()
                .into_iter()
                .filter(|c| !matches!(c, RemoteCall::FetchRows))
                .collect()
        }

        pub fn rows(&self) -> Vec<TargetRow> {
            self.lock().rows.clone()
        }

        pub fn row_by_label(&self, label: &str) -> Option<TargetRow> {
            self.lock().rows.iter().find(|r| r.label == label).cloned()
        }

        pub fn properties(&self) -> BTreeSet<String> {
            self.lock().properties.clone()
        }

        pub fn last_source(&self) -> Option<CreateSource> {
            self.lock().last_source.clone()
        }

        fn lock(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    #[async_trait]
    impl EntityRemote for MockRemote {
        fn provider_name(&self) -> &'static str {
            "mock"
        }

        async fn fetch_target_rows(&self, _list: &EntityListRef) -> RemoteResult<Vec<TargetRow>> {
            let mut state = self.lock();
            state.record(RemoteCall::FetchRows)?;
            Ok(state.rows.clone())
        }

        async fn register_property(&self, _list: &EntityListRef, name: &str) -> RemoteResult<bool> {
            let mut state = self.lock();
            state.record(RemoteCall::RegisterProperty(name.to_string()))?;
            if !state.properties.insert(name.to_string()) {
                return Ok(false);
            }
            // Existing rows report the new property as unset.
            for row in &mut state.rows {
                row.properties.entry(name.to_string()).or_insert(None);
            }
            Ok(true)
        }

        async fn batch_create(
            &self,
            _list: &EntityListRef,
            rows: Vec<NewEntity>,
            source: &CreateSource,
        ) -> RemoteResult<()> {
            let mut state = self.lock();
            state.record(RemoteCall::BatchCreate(rows.clone()))?;
            for row in &rows {
                state.check_properties(row.data.keys())?;
            }
            let schema: Vec<String> = state.properties.iter().cloned().collect();
            for new in rows {
                let mut row = TargetRow::new(EntityId::new(), 1, new.label);
                for name in &schema {
                    row.properties.insert(name.clone(), None);
                }
                apply_data(&mut row, &new.data);
                state.rows.push(row);
            }
            state.last_source = Some(source.clone());
            Ok(())
        }

        async fn update_row(
            &self,
            _list: &EntityListRef,
            id: EntityId,
            patch: EntityPatch,
            base_version: u32,
        ) -> RemoteResult<TargetRow> {
            let mut state = self.lock();
            state.record(RemoteCall::Update {
                id,
                patch: patch.clone(),
                base_version,
            })?;
            let pos = state.position(id)?;
            let current = state.rows[pos].version();
            if current != base_version {
                return Err(api_error(
                    409,
                    format!("base version {base_version} does not match current version {current}"),
                ));
            }
            if let Some(data) = &patch.data {
                state.check_properties(data.keys())?;
            }

            let row = &mut state.rows[pos];
            if let Some(label) = patch.label {
                row.label = label;
            }
            if let Some(data) = &patch.data {
                apply_data(row, data);
            }
            row.system.version += 1;
            Ok(row.clone())
        }

        async fn delete_row(&self, _list: &EntityListRef, id: EntityId) -> RemoteResult<()> {
            let mut state = self.lock();
            state.record(RemoteCall::Delete(id))?;
            let pos = state.position(id)?;
            state.rows.remove(pos);
            Ok(())
        }
    }
}
