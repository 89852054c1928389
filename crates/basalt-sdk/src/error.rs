//! Error types for the Basalt SDK.

use basalt_rebase::RebaseError;
use basalt_store::StoreError;
use std::fmt;

/// Error type for SDK operations.
#[derive(Clone, Debug, PartialEq)]
pub enum SdkError {
    /// A rebase failed and was rolled back.
    Rebase(RebaseError),
    /// The device-local store refused an operation.
    Store(StoreError),
    /// The exchange could not take or hand out events.
    Exchange(String),
    /// The background rebase task went away without reporting back.
    TaskDropped,
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkError::Rebase(e) => write!(f, "Rebase failed: {}", e),
            SdkError::Store(e) => write!(f, "Store error: {}", e),
            SdkError::Exchange(e) => write!(f, "Exchange error: {}", e),
            SdkError::TaskDropped => write!(f, "Rebase task dropped before completing"),
        }
    }
}

impl std::error::Error for SdkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SdkError::Rebase(e) => Some(e),
            SdkError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RebaseError> for SdkError {
    fn from(error: RebaseError) -> Self {
        SdkError::Rebase(error)
    }
}

impl From<StoreError> for SdkError {
    fn from(error: StoreError) -> Self {
        SdkError::Store(error)
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
