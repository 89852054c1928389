//! Errors reported by change stores.

use basalt_core::{CoreError, EventId, GlobalIdentifier};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    #[error("Global identifier not found: {0}")]
    IdentifierNotFound(GlobalIdentifier),

    #[error("Expected at most one baseline, found {0}")]
    MultipleBaselines(usize),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt log entry: {0}")]
    Corrupt(#[from] CoreError),
}
