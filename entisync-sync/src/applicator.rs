//! Change applicator: turns merge actions into remote calls.
//!
//! Calls are issued one at a time and the first failure stops the phase.
//! Nothing is rolled back; whatever succeeded before the failure stays
//! applied on the remote.

use crate::error::{MergeError, MergeResult, RemoteError, RemoteOp};
use crate::remote::{CreateSource, EntityListRef, EntityRemote};
use crate::schema::MergeActions;
use serde::Serialize;
use tracing::debug;

/// Counts of what a merge actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliedChanges {
    /// Properties newly created on the remote, in registration order.
    pub properties_registered: Vec<String>,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl AppliedChanges {
    pub fn is_empty(&self) -> bool {
        self.properties_registered.is_empty()
            && self.inserted == 0
            && self.updated == 0
            && self.deleted == 0
    }
}

/// Applies the phases of a merge against one entity list.
pub struct ChangeApplicator<'a> {
    remote: &'a dyn EntityRemote,
    list: &'a EntityListRef,
}

impl<'a> ChangeApplicator<'a> {
    pub fn new(remote: &'a dyn EntityRemote, list: &'a EntityListRef) -> Self {
        Self { remote, list }
    }

    fn remote_error(
        &self,
        op: RemoteOp,
        row: Option<String>,
        source: RemoteError,
    ) -> MergeError {
        MergeError::Remote {
            op,
            list: self.list.to_string(),
            row,
            source,
        }
    }

    /// Creates every insert row in a single batch. No call is made when there
    /// is nothing to insert.
    pub async fn apply_inserts(
        &self,
        actions: &MergeActions,
        source: &CreateSource,
    ) -> MergeResult<usize> {
        if actions.to_insert.is_empty() {
            return Ok(0);
        }
        let payloads = actions.insert_payloads();
        let count = payloads.len();
        debug!("Creating {} entities in {}", count, self.list);

        self.remote
            .batch_create(self.list, payloads, source)
            .await
            .map_err(|e| self.remote_error(RemoteOp::BatchCreate, None, e))?;
        Ok(count)
    }

    /// Updates matched rows in key order, each guarded by the version read
    /// in the snapshot.
    pub async fn apply_updates(&self, actions: &MergeActions) -> MergeResult<usize> {
        let mut updated = 0;
        for (key, update) in &actions.to_update {
            let Some(patch) = actions.update_patch(update) else {
                debug!("Skipping update of {} {}: no changes in registered properties", update.id, key);
                continue;
            };
            debug!("Updating {} {} at version {}", update.id, key, update.version());

            self.remote
                .update_row(self.list, update.id, patch, update.version())
                .await
                .map_err(|e| self.remote_error(RemoteOp::Update, Some(key.to_string()), e))?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Deletes unmatched target rows in key order.
    pub async fn apply_deletes(&self, actions: &MergeActions) -> MergeResult<usize> {
        let mut deleted = 0;
        for (key, row) in &actions.to_delete {
            debug!("Deleting {} {}", row.id, key);
            self.remote
                .delete_row(self.list, row.id)
                .await
                .map_err(|e| self.remote_error(RemoteOp::Delete, Some(key.to_string()), e))?;
            deleted += 1;
        }
        Ok(deleted)
    }
}
