//! The change store contract consumed by the rebaser.

use crate::error::StoreError;
use basalt_core::{
    ChangeType, DeviceId, Event, EventId, GlobalIdentifier, GlobalSequence, Revision,
    SchemaFingerprint,
};
use std::collections::BTreeSet;

/// Read/write access to one device-local copy of the log.
///
/// Mutations are staged until [`commit`](ChangeStore::commit) and can be
/// discarded with [`rollback`](ChangeStore::rollback). Reads observe the
/// staged state, so a caller sees its own uncommitted work.
pub trait ChangeStore {
    /// Get the baseline, if one exists.
    ///
    /// Returns [`StoreError::MultipleBaselines`] if more than one is present;
    /// use [`fetch_baselines`](ChangeStore::fetch_baselines) to consolidate.
    fn fetch_baseline(&self) -> Result<Option<Event>, StoreError>;

    /// Get every baseline-kind event.
    fn fetch_baselines(&self) -> Result<Vec<Event>, StoreError>;

    /// Get the non-baseline events with `global_sequence <= up_to`, in
    /// strictly increasing commit order.
    fn fetch_events(&self, up_to: GlobalSequence) -> Result<Vec<Event>, StoreError>;

    /// Get the authoring revision of every non-baseline event.
    fn fetch_event_revisions(&self) -> Result<Vec<Revision>, StoreError>;

    /// Get every device that authored an event or appears in a revision set.
    fn fetch_all_device_identifiers(&self) -> Result<BTreeSet<DeviceId>, StoreError>;

    /// Count change records, optionally of one type only.
    fn count_changes(
        &self,
        change_type: Option<ChangeType>,
        excluding_baseline: bool,
    ) -> Result<usize, StoreError>;

    /// Get the registered identifiers no change record refers to.
    fn fetch_unreferenced_identifiers(&self) -> Result<Vec<GlobalIdentifier>, StoreError>;

    /// Highest global sequence over all events, the baseline included.
    fn max_global_sequence(&self) -> Result<GlobalSequence, StoreError>;

    /// Check if an event exists in the store.
    fn contains_event(&self, id: &EventId) -> Result<bool, StoreError>;

    /// Create a new, empty baseline event. It is not stored until saved.
    fn create_baseline_event(
        &mut self,
        device_id: &DeviceId,
        schema: SchemaFingerprint,
    ) -> Result<Event, StoreError>;

    /// Insert or replace an event, registering every identifier its records
    /// reference.
    fn save_event(&mut self, event: Event) -> Result<(), StoreError>;

    /// Delete an event together with the change records it owns.
    fn delete_event(&mut self, id: &EventId) -> Result<(), StoreError>;

    /// Delete a global identifier from the registry.
    fn delete_identifier(&mut self, identifier: &GlobalIdentifier) -> Result<(), StoreError>;

    /// Atomically publish every staged mutation.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every staged mutation.
    fn rollback(&mut self);

    /// Count change records held by the baseline.
    fn count_baseline_changes(&self) -> Result<usize, StoreError> {
        let all = self.count_changes(None, false)?;
        let outside = self.count_changes(None, true)?;
        Ok(all.saturating_sub(outside))
    }
}
