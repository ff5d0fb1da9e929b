//! Merge engine for remote entity lists.
//!
//! Reconciles a batch of source rows (e.g. read from a CSV export) with the
//! rows of a remote entity list:
//! - rows only in the source are created
//! - matched rows that differ are updated, guarded by the version read
//! - rows only on the remote are optionally deleted
//! - source fields the remote does not know are optionally registered
//!
//! # Architecture
//!
//! - **Normalizer**: canonicalizes the label and projects source fields
//! - **Diff**: pairs rows by composite key and classifies them (pure)
//! - **Schema**: decides which properties to register and send
//! - **Applicator**: issues the remote calls, one at a time
//! - **Engine**: runs the phases in order for one merge
//! - **Central**: the HTTP binding for ODK Central
//!
//! # Example
//!
//! ```
//! use entisync_sync::mock::MockRemote;
//! use entisync_sync::{MergeEngine, MergeRequest};
//! use entisync_types::SourceRow;
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let remote = Arc::new(MockRemote::new());
//! let engine = MergeEngine::new(remote.clone()).with_default_project(Some(1));
//!
//! let rows = vec![SourceRow::new().with("label", "Sydney").with("state", "NSW")];
//! let report = engine.merge(&rows, &MergeRequest::new("cities")).await.unwrap();
//! assert_eq!(report.applied.inserted, 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod applicator;
pub mod central;
mod diff;
mod engine;
mod error;
mod normalizer;
mod options;
mod remote;
mod schema;

pub use applicator::{AppliedChanges, ChangeApplicator};
pub use diff::{Diff, RowUpdate, SourceIndex};
pub use engine::{MergeEngine, MergeReport, PhaseCounts};
pub use error::{MergeError, MergeResult, RemoteError, RemoteOp, RemoteResult};
pub use normalizer::RowNormalizer;
pub use options::{coalesce, MergeRequest};
pub use remote::{mock, CreateSource, EntityListRef, EntityPatch, EntityRemote, NewEntity};
pub use schema::{MergeActions, SchemaPlan};
