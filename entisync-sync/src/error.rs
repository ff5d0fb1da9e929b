//! Error types for the merge engine and its remote collaborators.

use entisync_types::{CompositeKey, EntityId, MatchKeys};
use std::fmt;
use thiserror::Error;

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that abort a merge.
///
/// Input errors (`Configuration`, `MissingKey`, `DuplicateKey`) are always
/// raised before the first remote call. `MissingTargetKey` is raised after
/// the snapshot read and before the first write.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Contradictory or incomplete caller input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A source row lacks the label or a match-key field.
    #[error("source row {row} has no value for key field '{field}'")]
    MissingKey { field: String, row: usize },

    /// A target row lacks a match-key property entirely, so no source row
    /// could ever be paired with it.
    #[error("target entity {id} has no property for key field '{field}'")]
    MissingTargetKey { field: String, id: EntityId },

    /// Two source rows share the same composite key.
    #[error("match keys {match_keys} are not unique across the source data: {key} appears more than once")]
    DuplicateKey { key: CompositeKey, match_keys: MatchKeys },

    /// A remote call failed; earlier operations stay applied.
    #[error("{op} failed for entity list '{list}'{}: {source}", row_context(.row))]
    Remote {
        op: RemoteOp,
        list: String,
        row: Option<String>,
        #[source]
        source: RemoteError,
    },
}

fn row_context(row: &Option<String>) -> String {
    row.as_ref().map(|r| format!(" at row {r}")).unwrap_or_default()
}

impl MergeError {
    /// True for errors raised from caller input rather than remote calls.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, MergeError::Remote { .. })
    }

    /// The remote failure behind this error, if any.
    pub fn remote_error(&self) -> Option<&RemoteError> {
        match self {
            MergeError::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The kind of remote call, used in error context and by the mock remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    FetchRows,
    RegisterProperty,
    BatchCreate,
    Update,
    Delete,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteOp::FetchRows => "snapshot read",
            RemoteOp::RegisterProperty => "property registration",
            RemoteOp::BatchCreate => "batch create",
            RemoteOp::Update => "entity update",
            RemoteOp::Delete => "entity delete",
        };
        f.write_str(name)
    }
}

/// Errors returned by an [`EntityRemote`](crate::EntityRemote) implementation.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote answered with a non-success status.
    #[error("request to {url} failed with status {status}: {message}")]
    Api {
        url: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RemoteError {
    /// HTTP status of an API failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Api { status, .. } => Some(*status),
            RemoteError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Remote problem code, when the response carried one.
    pub fn code(&self) -> Option<&str> {
        match self {
            RemoteError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// True for 409 responses: an existing resource or a stale version
    /// precondition.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}
