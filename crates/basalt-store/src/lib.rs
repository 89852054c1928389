//! # basalt-store
//!
//! Read/write access to the change records and events of one device-local
//! copy of the log.
//!
//! The rebaser only ever talks to a store through the [`ChangeStore`]
//! trait. [`MemoryChangeStore`] is a transactional in-memory
//! implementation: every mutation is staged and becomes visible only when
//! [`ChangeStore::commit`] succeeds.

mod error;
mod memory;
mod store;

pub use error::StoreError;
pub use memory::MemoryChangeStore;
pub use store::ChangeStore;
