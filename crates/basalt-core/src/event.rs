//! Events: atomically committed units of change records.

use crate::change::{ChangeRecord, ChangeType};
use crate::identifier::{DeviceId, GlobalIdentifier};
use crate::revision::{GlobalSequence, Revision};
use crate::revision_set::RevisionSet;
use crate::schema::SchemaFingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Unique identifier of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Ulid);

impl EventId {
    pub fn new() -> Self {
        EventId(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether an event is an ordinary commit or the consolidated baseline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Baseline,
}

/// An ordered unit of change records committed atomically by one device.
///
/// The event exclusively owns its change records. Deleting an event deletes
/// them with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub kind: EventKind,
    /// Device that authored the event.
    pub device_id: DeviceId,
    pub global_sequence: GlobalSequence,
    pub timestamp: DateTime<Utc>,
    pub schema_fingerprint: SchemaFingerprint,
    /// Positions of all devices as of this event, including the author's.
    pub revision_set: RevisionSet,
    pub changes: Vec<ChangeRecord>,
}

impl Event {
    /// Create an ordinary event. The author's revision is recorded in the
    /// revision set alongside whatever `others` the device knew about.
    pub fn normal(
        revision: Revision,
        others: RevisionSet,
        schema_fingerprint: SchemaFingerprint,
        changes: Vec<ChangeRecord>,
    ) -> Self {
        let mut revision_set = others;
        let device_id = revision.device_id.clone();
        let global_sequence = revision.global_sequence;
        revision_set.insert(revision);
        Event {
            id: EventId::new(),
            kind: EventKind::Normal,
            device_id,
            global_sequence,
            timestamp: Utc::now(),
            schema_fingerprint,
            revision_set,
            changes,
        }
    }

    /// Create an empty baseline authored by `device_id`.
    pub fn baseline(device_id: DeviceId, schema_fingerprint: SchemaFingerprint) -> Self {
        Event {
            id: EventId::new(),
            kind: EventKind::Baseline,
            device_id,
            global_sequence: 0,
            timestamp: Utc::now(),
            schema_fingerprint,
            revision_set: RevisionSet::new(),
            changes: Vec::new(),
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.kind == EventKind::Baseline
    }

    /// Revision of the authoring device, if recorded.
    pub fn own_revision(&self) -> Option<&Revision> {
        self.revision_set.get(&self.device_id)
    }

    /// Sort key giving the log's commit order.
    pub fn ordering_key(&self) -> (GlobalSequence, &DeviceId, u64) {
        let revision_number = self.own_revision().map(|r| r.revision_number).unwrap_or(0);
        (self.global_sequence, &self.device_id, revision_number)
    }

    /// Number of owned records of a given type.
    pub fn count_changes(&self, change_type: ChangeType) -> usize {
        self.changes.iter().filter(|c| c.change_type == change_type).count()
    }

    /// Identifiers referenced by the owned records.
    pub fn referenced_identifiers(&self) -> impl Iterator<Item = &GlobalIdentifier> {
        self.changes.iter().map(|c| &c.global_identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_event_records_own_revision() {
        let others = RevisionSet::from_revisions([Revision::new(DeviceId::new("b"), 2, 4)]);
        let event = Event::normal(
            Revision::new(DeviceId::new("a"), 3, 7),
            others,
            SchemaFingerprint::default(),
            vec![ChangeRecord::insert(GlobalIdentifier::new("Note", "1"))],
        );

        assert_eq!(event.global_sequence, 7);
        assert_eq!(event.own_revision().unwrap().revision_number, 3);
        assert_eq!(event.revision_set.len(), 2);
        assert_eq!(event.count_changes(ChangeType::Insert), 1);
        assert!(!event.is_baseline());
    }

    #[test]
    fn test_ordering_key() {
        let a = Event::normal(Revision::new(DeviceId::new("a"), 1, 5), RevisionSet::new(), SchemaFingerprint::default(), vec![]);
        let b = Event::normal(Revision::new(DeviceId::new("b"), 1, 5), RevisionSet::new(), SchemaFingerprint::default(), vec![]);
        let c = Event::normal(Revision::new(DeviceId::new("a"), 2, 6), RevisionSet::new(), SchemaFingerprint::default(), vec![]);

        assert!(a.ordering_key() < b.ordering_key());
        assert!(b.ordering_key() < c.ordering_key());
    }
}
