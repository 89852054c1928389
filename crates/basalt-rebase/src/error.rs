//! Errors that abort a rebase.

use basalt_store::StoreError;
use thiserror::Error;

/// Errors that can occur during a rebase.
///
/// Either kind leaves the store exactly as it was before the attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RebaseError {
    /// The store failed; the error is passed through verbatim.
    #[error("Persistence failed: {0}")]
    Persistence(#[source] StoreError),

    /// The log violates an invariant the rebaser relies on. This points at
    /// upstream corruption and is never skipped silently.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

/// Store failures pass through, except a corrupt log entry, which is an
/// invariant violation like any other corruption the rebaser finds.
impl From<StoreError> for RebaseError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Corrupt(cause) => RebaseError::invariant(format!("corrupt log entry: {cause}")),
            other => RebaseError::Persistence(other),
        }
    }
}

impl RebaseError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "rebase invariant violated");
        RebaseError::InvariantViolation(message)
    }

    /// True if this error means the log itself is corrupt.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, RebaseError::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::CoreError;

    #[test]
    fn test_corrupt_store_entry_is_invariant_violation() {
        let err = RebaseError::from(StoreError::Corrupt(CoreError::UnknownChangeType(7)));
        assert!(err.is_invariant_violation());
        assert_eq!(
            err,
            RebaseError::InvariantViolation("corrupt log entry: Unknown change type code: 7".to_string())
        );
    }

    #[test]
    fn test_other_store_errors_pass_through() {
        let err = RebaseError::from(StoreError::CommitFailed("disk full".to_string()));
        assert_eq!(err, RebaseError::Persistence(StoreError::CommitFailed("disk full".to_string())));
        assert!(!err.is_invariant_violation());
    }
}
