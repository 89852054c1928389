//! # basalt-core
//!
//! Data model of the Basalt multi-device event log.
//!
//! This crate provides:
//! - Revisions: a device's local counter paired with its global sequence
//! - Revision sets: per-device positions, combined by store-wise maximum
//! - Change records: one mutation of one object, owned by an event
//! - Events: ordered, atomically committed units of change records, one of
//!   which may be the consolidated baseline
//! - Schema fingerprints recorded on every event
//!
//! ## Example
//!
//! ```rust
//! use basalt_core::{DeviceId, Revision, RevisionSet};
//!
//! let mut set = RevisionSet::new();
//! set.insert(Revision::new(DeviceId::new("laptop"), 3, 12));
//! set.insert(Revision::new(DeviceId::new("laptop"), 2, 9));
//!
//! // The newer revision is kept.
//! assert_eq!(set.get(&DeviceId::new("laptop")).unwrap().revision_number, 3);
//! ```

mod change;
mod error;
mod event;
mod identifier;
mod revision;
mod revision_set;
mod schema;

pub use change::{ChangeRecord, ChangeType, PropertyValue};
pub use error::CoreError;
pub use event::{Event, EventId, EventKind};
pub use identifier::{DeviceId, GlobalIdentifier};
pub use revision::{GlobalSequence, Revision};
pub use revision_set::RevisionSet;
pub use schema::{EntityDescription, SchemaFingerprint};
