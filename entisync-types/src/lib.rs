//! Core type definitions for entisync.
//!
//! This crate defines the data model shared by the merge engine and its
//! remote collaborators:
//! - Field values and their canonical textual form
//! - Three-state field lookup (present, present-null, absent)
//! - Source rows, normalized rows and remote (target) rows
//! - Match keys and composite row identity
//! - Remote entity identifiers

mod ids;
mod key;
mod row;
mod value;

pub use ids::EntityId;
pub use key::{CompositeKey, MatchKeys};
pub use row::{
    is_reserved, NormalizedRow, SystemMeta, TargetRow, ID_FIELD, LABEL_FIELD, RESERVED_KEYS,
    SYSTEM_FIELD,
};
pub use value::{FieldSlot, FieldValue, SourceRow};

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("match keys must name at least one field")]
    EmptyMatchKeys,
}
