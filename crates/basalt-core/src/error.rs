//! Errors raised while decoding log data.

use thiserror::Error;

/// Errors that indicate a corrupt or unreadable log entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown change type code: {0}")]
    UnknownChangeType(u8),

    #[error("Invalid schema fingerprint: {0}")]
    InvalidFingerprint(String),
}
