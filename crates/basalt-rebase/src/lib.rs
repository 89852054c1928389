//! # basalt-rebase
//!
//! Compaction ("rebasing") engine for the Basalt event log.
//!
//! This crate provides:
//! - Compaction trigger: decides whether a rebase is worthwhile
//! - Boundary calculator: the global sequence up to which folding is safe
//! - Baseline merger: ordered, per-object merge of events into the baseline
//! - Baseline consolidation: restores a single baseline after sync
//! - Rebaser: runs all of the above as one atomic operation
//!
//! ## Architecture
//!
//! A rebase bounds the size of a device-local log by:
//! 1. Computing the boundary every advanced device has reached
//! 2. Fetching the non-baseline events at or below it, in commit order
//! 3. Folding them into the baseline, newest values winning per property
//! 4. Deleting the folded events and any identifier nothing refers to
//! 5. Committing the whole thing in one transaction
//!
//! ## Example
//!
//! ```rust
//! use basalt_core::{DeviceId, SchemaFingerprint};
//! use basalt_rebase::{RebaseOutcome, Rebaser};
//! use basalt_store::MemoryChangeStore;
//!
//! let mut store = MemoryChangeStore::new();
//! let mut rebaser = Rebaser::new(&mut store, DeviceId::new("laptop"), SchemaFingerprint::default());
//!
//! // With no baseline, rebasing is how the first one gets created.
//! assert!(rebaser.should_rebase().unwrap());
//! let outcome = rebaser.rebase().unwrap();
//! assert!(matches!(outcome, RebaseOutcome::Rebased(_)));
//!
//! // Nothing new since: the second run changes nothing.
//! assert!(rebaser.rebase().unwrap().is_no_op());
//! ```

mod boundary;
mod config;
mod consolidate;
mod error;
mod merge;
mod rebaser;
mod trigger;

pub use boundary::{global_sequence_for_new_baseline, latest_revision_set};
pub use config::{RebaseConfig, RebaseConfigBuilder};
pub use consolidate::{consolidate_baselines, ConsolidationReport};
pub use error::RebaseError;
pub use merge::{collect_unreferenced_identifiers, BaselineMerger, MergeOutput, MergeStats};
pub use rebaser::{RebaseOutcome, RebaseReport, Rebaser};
pub use trigger::{evaluate, ChangeCounts, TriggerReason};
