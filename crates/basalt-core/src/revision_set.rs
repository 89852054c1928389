//! Revision sets: the position of every known device as of some event.
//!
//! A revision set is the log's version vector. Where a plain version vector
//! tracks one counter per replica, each entry here also remembers the global
//! sequence the device's counter corresponded to, which is what the
//! rebaser needs to place a compaction boundary.

use crate::identifier::DeviceId;
use crate::revision::{GlobalSequence, Revision};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Mapping from device to that device's revision. Keys are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSet {
    revisions: BTreeMap<DeviceId, Revision>,
}

impl RevisionSet {
    /// Create an empty revision set.
    pub fn new() -> Self {
        RevisionSet {
            revisions: BTreeMap::new(),
        }
    }

    /// Build a set from revisions, keeping the newest per device.
    pub fn from_revisions(revisions: impl IntoIterator<Item = Revision>) -> Self {
        let mut set = RevisionSet::new();
        for revision in revisions {
            set.insert(revision);
        }
        set
    }

    /// Get the revision recorded for a device.
    pub fn get(&self, device_id: &DeviceId) -> Option<&Revision> {
        self.revisions.get(device_id)
    }

    /// Record a revision, keeping whichever of the existing and incoming
    /// revision for that device is newer.
    pub fn insert(&mut self, revision: Revision) {
        match self.revisions.get(&revision.device_id) {
            Some(existing) if !revision.is_newer_than(existing) => {}
            _ => {
                self.revisions.insert(revision.device_id.clone(), revision);
            }
        }
    }

    /// Store-wise maximum: per device, keep the newer revision.
    pub fn merge(&mut self, other: &RevisionSet) {
        for revision in other.revisions.values() {
            self.insert(revision.clone());
        }
    }

    /// Create a merged revision set without modifying self.
    pub fn merged_with(&self, other: &RevisionSet) -> RevisionSet {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// True if the set already holds a revision for `revision`'s device that
    /// is at least as new.
    pub fn covers(&self, revision: &Revision) -> bool {
        self.get(&revision.device_id)
            .map(|existing| !revision.is_newer_than(existing))
            .unwrap_or(false)
    }

    /// True if every device in `devices` has an entry.
    pub fn covers_devices<'a>(&self, devices: impl IntoIterator<Item = &'a DeviceId>) -> bool {
        devices.into_iter().all(|d| self.revisions.contains_key(d))
    }

    /// Find the first device in `devices` with no entry.
    pub fn first_missing_device<'a>(
        &self,
        devices: impl IntoIterator<Item = &'a DeviceId>,
    ) -> Option<&'a DeviceId> {
        devices.into_iter().find(|d| !self.revisions.contains_key(*d))
    }

    /// True if for every device in `other`, self holds a revision at least
    /// as new.
    pub fn dominates(&self, other: &RevisionSet) -> bool {
        other.revisions.values().all(|r| self.covers(r))
    }

    /// Smallest global sequence over all entries.
    pub fn min_global_sequence(&self) -> Option<GlobalSequence> {
        self.revisions.values().map(|r| r.global_sequence).min()
    }

    /// Largest global sequence over all entries.
    pub fn max_global_sequence(&self) -> Option<GlobalSequence> {
        self.revisions.values().map(|r| r.global_sequence).max()
    }

    /// All devices with an entry.
    pub fn device_ids(&self) -> BTreeSet<DeviceId> {
        self.revisions.keys().cloned().collect()
    }

    /// Iterate over all revisions, ordered by device.
    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

impl FromIterator<Revision> for RevisionSet {
    fn from_iter<T: IntoIterator<Item = Revision>>(iter: T) -> Self {
        RevisionSet::from_revisions(iter)
    }
}
