//! Basalt SDK - async access to a device-local event log
//!
//! This SDK wraps the compaction engine for use from async code. Every
//! mutation of a device's log runs under one lock, so a rebase never
//! interleaves with a local commit or with importing events from other
//! devices.
//!
//! # Quick Start
//!
//! ```rust
//! use basalt_sdk::{Device, GlobalIdentifier, MemoryExchange, SchemaFingerprint};
//!
//! # tokio_test::block_on(async {
//! let exchange = MemoryExchange::new();
//! let laptop = Device::new("laptop", SchemaFingerprint::default());
//!
//! laptop.insert(GlobalIdentifier::new("Note", "1"), &[]).await.unwrap();
//! laptop.leech(&exchange).await.unwrap();
//!
//! let baseline = laptop.baseline().await.unwrap().unwrap();
//! assert_eq!(baseline.changes.len(), 1);
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`handle`] - Serialized log handle with single-completion rebases
//! - [`device`] - Simulated device committing, pulling and pushing events
//! - [`exchange`] - Event exchange abstraction and in-memory implementation
//! - [`error`] - Error types

pub mod device;
pub mod error;
pub mod exchange;
pub mod handle;

// Re-exports for convenience
pub use device::{Device, SyncSummary};
pub use error::{Result, SdkError};
pub use exchange::{EventExchange, MemoryExchange};
pub use handle::{LogHandle, RebaseCompletion, RebaseStats};

pub use basalt_core::{
    ChangeRecord, ChangeType, DeviceId, Event, GlobalIdentifier, PropertyValue, SchemaFingerprint,
};
pub use basalt_rebase::{RebaseConfig, RebaseConfigBuilder, RebaseOutcome, RebaseReport};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::device::Device;
    pub use crate::error::{Result, SdkError};
    pub use crate::exchange::{EventExchange, MemoryExchange};
    pub use crate::handle::{LogHandle, RebaseStats};
    pub use basalt_core::{ChangeRecord, GlobalIdentifier, SchemaFingerprint};
    pub use basalt_rebase::{RebaseConfig, RebaseOutcome};
}
