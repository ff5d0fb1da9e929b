//! Merge engine: validates the source, reads the snapshot, plans and applies.
//!
//! One call to [`MergeEngine::merge`] is one merge: a single snapshot read,
//! followed by property registration, inserts, updates and deletes, strictly
//! in that order and one remote call at a time.

use crate::applicator::{AppliedChanges, ChangeApplicator};
use crate::diff::{Diff, SourceIndex};
use crate::error::{MergeError, MergeResult, RemoteOp};
use crate::normalizer::RowNormalizer;
use crate::options::{coalesce, MergeRequest};
use crate::remote::{EntityListRef, EntityRemote};
use crate::schema::{MergeActions, SchemaPlan};
use entisync_types::SourceRow;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// What a merge planned and what it wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    /// The full plan. Phases disabled by the request keep their rows here.
    pub actions: MergeActions,
    pub applied: AppliedChanges,
}

/// Per-phase row counts, for logs and CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub insert: usize,
    pub update: usize,
    pub delete: usize,
    pub duplicates: usize,
}

impl From<&MergeActions> for PhaseCounts {
    fn from(actions: &MergeActions) -> Self {
        Self {
            insert: actions.to_insert.len(),
            update: actions.to_update.len(),
            delete: actions.to_delete.len(),
            duplicates: actions.duplicate_targets.len(),
        }
    }
}

/// Reconciles source rows into a remote entity list.
pub struct MergeEngine {
    remote: Arc<dyn EntityRemote>,
    default_project_id: Option<u32>,
}

impl MergeEngine {
    pub fn new(remote: Arc<dyn EntityRemote>) -> Self {
        Self {
            remote,
            default_project_id: None,
        }
    }

    /// Project used when a request does not name one.
    #[must_use]
    pub fn with_default_project(mut self, project_id: Option<u32>) -> Self {
        self.default_project_id = project_id;
        self
    }

    pub fn remote(&self) -> &Arc<dyn EntityRemote> {
        &self.remote
    }

    /// Computes the merge actions without writing anything.
    pub async fn plan(&self, rows: &[SourceRow], request: &MergeRequest) -> MergeResult<MergeActions> {
        let (_, diff) = self.prepare(rows, request).await?;
        let plan = SchemaPlan::resolve(&diff, request.add_new_properties);
        Ok(diff.into_actions(plan.final_keys))
    }

    /// Runs one merge to completion or to the first failure.
    ///
    /// Input problems are reported before the remote is contacted. A remote
    /// failure leaves earlier writes in place.
    pub async fn merge(&self, rows: &[SourceRow], request: &MergeRequest) -> MergeResult<MergeReport> {
        let (list, diff) = self.prepare(rows, request).await?;
        self.apply(&list, diff, request)
            .await
            .inspect_err(|e| error!("Merge into {} aborted: {}", list, e))
    }

    async fn prepare(
        &self,
        rows: &[SourceRow],
        request: &MergeRequest,
    ) -> MergeResult<(EntityListRef, Diff)> {
        if request.entity_list.trim().is_empty() {
            return Err(MergeError::Configuration("entity list name must not be empty".into()));
        }
        let normalizer =
            RowNormalizer::new(request.source_label_key.clone(), request.source_keys.clone())?;
        let match_keys = request.resolved_match_keys()?;
        let project_id = coalesce([request.project_id, self.default_project_id]).ok_or_else(|| {
            MergeError::Configuration("no project id given and no default configured".into())
        })?;
        let list = EntityListRef::new(project_id, request.entity_list.clone());

        let index = SourceIndex::build(rows, &normalizer, match_keys)?;
        info!(
            "Merging {} source rows into {} via {} on {}",
            index.len(),
            list,
            self.remote.provider_name(),
            index.match_keys()
        );

        let targets = self
            .remote
            .fetch_target_rows(&list)
            .await
            .map_err(|source| MergeError::Remote {
                op: RemoteOp::FetchRows,
                list: list.to_string(),
                row: None,
                source,
            })
            .inspect_err(|e| error!("Merge into {} aborted: {}", list, e))?;

        let diff = Diff::compute(index, targets)
            .inspect_err(|e| error!("Merge into {} aborted: {}", list, e))?;
        Ok((list, diff))
    }

    async fn apply(
        &self,
        list: &EntityListRef,
        diff: Diff,
        request: &MergeRequest,
    ) -> MergeResult<MergeReport> {
        let plan = SchemaPlan::resolve(&diff, request.add_new_properties);
        let mut applied = AppliedChanges {
            properties_registered: plan.register(self.remote.as_ref(), list).await?,
            ..AppliedChanges::default()
        };

        let actions = diff.into_actions(plan.final_keys);
        let counts = PhaseCounts::from(&actions);
        info!(
            "Planned {} inserts, {} updates, {} deletes for {}",
            counts.insert, counts.update, counts.delete, list
        );

        let applicator = ChangeApplicator::new(self.remote.as_ref(), list);
        applied.inserted = applicator
            .apply_inserts(&actions, &request.resolved_create_source())
            .await?;
        if request.update_matched {
            applied.updated = applicator.apply_updates(&actions).await?;
        }
        if request.delete_not_matched {
            applied.deleted = applicator.apply_deletes(&actions).await?;
        }

        info!(
            "Merge into {} complete: {} inserted, {} updated, {} deleted",
            list, applied.inserted, applied.updated, applied.deleted
        );
        Ok(MergeReport { actions, applied })
    }
}
