//! Baseline merger: folds ordered events into the baseline snapshot.
//!
//! The merger keeps an arena of the baseline's current records keyed by
//! global identifier. Incoming records are applied strictly in commit order,
//! so a later record for an object always supersedes an earlier one.

use crate::error::RebaseError;
use basalt_core::{
    ChangeRecord, ChangeType, DeviceId, Event, EventId, GlobalIdentifier, GlobalSequence,
    RevisionSet, SchemaFingerprint,
};
use basalt_store::ChangeStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Counters describing one merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Events folded into the baseline.
    pub events_merged: usize,
    /// Insert records placed into the baseline.
    pub inserts: usize,
    /// Update records merged over an existing baseline record.
    pub updates: usize,
    /// Delete records that removed a baseline record.
    pub deletes: usize,
    /// Updates with no baseline record to apply to. These should not occur
    /// in a complete log and are dropped.
    pub orphaned_updates: usize,
    /// Deletes with nothing to delete.
    pub orphaned_deletes: usize,
}

/// The finished baseline and what to remove from the store.
#[derive(Clone, Debug)]
pub struct MergeOutput {
    /// The rebuilt baseline, under a fresh id.
    pub baseline: Event,
    /// Id the baseline had before the merge.
    pub replaces: EventId,
    pub merged_events: Vec<EventId>,
    pub stats: MergeStats,
}

impl MergeOutput {
    /// Write the baseline, delete the merged events with their records and
    /// garbage-collect identifiers nothing refers to any more.
    ///
    /// Returns the number of identifiers collected. Nothing is committed.
    pub fn persist<S: ChangeStore + ?Sized>(self, store: &mut S) -> Result<usize, RebaseError> {
        if store.contains_event(&self.replaces)? {
            store.delete_event(&self.replaces)?;
        }
        store.save_event(self.baseline)?;
        for id in &self.merged_events {
            store.delete_event(id)?;
        }
        collect_unreferenced_identifiers(store)
    }
}

/// Ordered merge of non-baseline events into a baseline.
pub struct BaselineMerger {
    /// The baseline being rebuilt, with its records moved into `records`.
    baseline: Event,
    records: BTreeMap<GlobalIdentifier, ChangeRecord>,
    revision_set: RevisionSet,
    last_merged: Option<(GlobalSequence, DeviceId, u64)>,
    merged_events: Vec<EventId>,
    stats: MergeStats,
}

impl BaselineMerger {
    /// Seed the merger from an existing baseline.
    ///
    /// A baseline is an absolute snapshot: it may only hold insert records,
    /// at most one per object.
    pub fn new(mut baseline: Event) -> Result<Self, RebaseError> {
        if !baseline.is_baseline() {
            return Err(RebaseError::invariant(format!(
                "event {} is not a baseline",
                baseline.id
            )));
        }

        let mut records = BTreeMap::new();
        for record in std::mem::take(&mut baseline.changes) {
            Self::seed(&mut records, record)?;
        }

        Ok(BaselineMerger {
            revision_set: baseline.revision_set.clone(),
            baseline,
            records,
            last_merged: None,
            merged_events: Vec::new(),
            stats: MergeStats::default(),
        })
    }

    fn seed(
        records: &mut BTreeMap<GlobalIdentifier, ChangeRecord>,
        record: ChangeRecord,
    ) -> Result<(), RebaseError> {
        if record.change_type != ChangeType::Insert {
            return Err(RebaseError::invariant(format!(
                "baseline holds a {:?} record for {}",
                record.change_type, record.global_identifier
            )));
        }
        if records.contains_key(&record.global_identifier) {
            return Err(RebaseError::invariant(format!(
                "baseline holds two records for {}",
                record.global_identifier
            )));
        }
        records.insert(record.global_identifier.clone(), record);
        Ok(())
    }

    /// Current record for an object.
    pub fn record(&self, identifier: &GlobalIdentifier) -> Option<&ChangeRecord> {
        self.records.get(identifier)
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// Revisions covered by the baseline and everything merged so far.
    pub fn revision_set(&self) -> &RevisionSet {
        &self.revision_set
    }

    /// Merge a batch of events already in commit order.
    pub fn merge_events(&mut self, events: impl IntoIterator<Item = Event>) -> Result<(), RebaseError> {
        for event in events {
            self.merge_event(event)?;
        }
        Ok(())
    }

    /// Merge one event. Events must arrive in strictly ascending commit order.
    pub fn merge_event(&mut self, event: Event) -> Result<(), RebaseError> {
        if event.is_baseline() {
            return Err(RebaseError::invariant(format!(
                "baseline {} passed as a merge input",
                event.id
            )));
        }

        let (sequence, device_id, revision_number) = event.ordering_key();
        let key = (sequence, device_id.clone(), revision_number);
        if let Some(last) = &self.last_merged {
            if key <= *last {
                return Err(RebaseError::invariant(format!(
                    "event {} at sequence {} arrived out of order",
                    event.id, event.global_sequence
                )));
            }
        }

        for change in event.changes {
            self.merge_change(change);
        }

        self.revision_set.merge(&event.revision_set);
        self.merged_events.push(event.id);
        self.last_merged = Some(key);
        self.stats.events_merged += 1;
        Ok(())
    }

    /// Apply one incoming record against the arena.
    fn merge_change(&mut self, incoming: ChangeRecord) {
        let identifier = incoming.global_identifier.clone();
        let existing = self.records.remove(&identifier);

        match (incoming.change_type, existing) {
            (ChangeType::Delete, Some(_)) => {
                self.stats.deletes += 1;
            }
            (ChangeType::Delete, None) => {
                debug!(object = %identifier, "delete with no baseline record");
                self.stats.orphaned_deletes += 1;
            }
            (ChangeType::Insert, Some(current)) => {
                self.records
                    .insert(identifier, incoming.merged_over(&current).into_snapshot());
                self.stats.inserts += 1;
            }
            (ChangeType::Insert, None) => {
                self.records.insert(identifier, incoming.into_snapshot());
                self.stats.inserts += 1;
            }
            (ChangeType::Update, Some(current)) => {
                // The baseline is absolute, so the merged result is an insert.
                self.records
                    .insert(identifier, incoming.merged_over(&current).into_snapshot());
                self.stats.updates += 1;
            }
            (ChangeType::Update, None) => {
                warn!(object = %identifier, "dropping update with no baseline record");
                self.stats.orphaned_updates += 1;
            }
        }
    }

    /// Fold another baseline in as if it were newer than everything merged
    /// so far: its values win, ours fill the gaps.
    pub fn absorb_baseline(&mut self, other: Event) -> Result<(), RebaseError> {
        let mut incoming = BTreeMap::new();
        for record in other.changes {
            Self::seed(&mut incoming, record)?;
        }
        for (identifier, record) in incoming {
            let merged = match self.records.remove(&identifier) {
                Some(current) => record.merged_over(&current),
                None => record,
            };
            self.records.insert(identifier, merged);
        }
        self.revision_set.merge(&other.revision_set);
        Ok(())
    }

    /// Finish the merge: stamp the baseline and hand back what to persist.
    ///
    /// The baseline gets a new id so that devices which already hold the
    /// previous version pick up the rebuilt one when syncing.
    pub fn finish(
        self,
        global_sequence: GlobalSequence,
        schema_fingerprint: SchemaFingerprint,
        timestamp: DateTime<Utc>,
    ) -> MergeOutput {
        let mut baseline = self.baseline;
        let replaces = baseline.id;
        baseline.id = EventId::new();
        baseline.changes = self.records.into_values().collect();
        baseline.revision_set = self.revision_set;
        baseline.global_sequence = global_sequence;
        baseline.schema_fingerprint = schema_fingerprint;
        baseline.timestamp = timestamp;

        MergeOutput {
            baseline,
            replaces,
            merged_events: self.merged_events,
            stats: self.stats,
        }
    }
}

/// Delete every registered identifier no change record refers to.
pub fn collect_unreferenced_identifiers<S: ChangeStore + ?Sized>(
    store: &mut S,
) -> Result<usize, RebaseError> {
    let unreferenced = store.fetch_unreferenced_identifiers()?;
    for identifier in &unreferenced {
        store.delete_identifier(identifier)?;
    }
    Ok(unreferenced.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{PropertyValue, Revision};
    use serde_json::json;

    fn id(key: &str) -> GlobalIdentifier {
        GlobalIdentifier::new("Note", key)
    }

    fn baseline_with(records: Vec<ChangeRecord>) -> Event {
        let mut baseline = Event::baseline(DeviceId::new("a"), SchemaFingerprint::default());
        baseline.changes = records;
        baseline
    }

    fn event(device: &str, number: u64, sequence: u64, changes: Vec<ChangeRecord>) -> Event {
        Event::normal(
            Revision::new(DeviceId::new(device), number, sequence),
            RevisionSet::new(),
            SchemaFingerprint::default(),
            changes,
        )
    }

    fn merge(baseline: Event, events: Vec<Event>) -> MergeOutput {
        let mut merger = BaselineMerger::new(baseline).unwrap();
        merger.merge_events(events).unwrap();
        merger.finish(10, SchemaFingerprint::default(), Utc::now())
    }

    #[test]
    fn test_update_over_insert_is_retyped_insert() {
        let baseline = baseline_with(vec![ChangeRecord::insert(id("x")).with_attribute("a", 1)]);
        let output = merge(
            baseline,
            vec![event("a", 1, 1, vec![ChangeRecord::update(id("x")).with_attribute("a", 2)])],
        );

        assert_eq!(output.baseline.changes.len(), 1);
        let record = &output.baseline.changes[0];
        assert_eq!(record.change_type, ChangeType::Insert);
        assert_eq!(record.attribute("a"), Some(&json!(2)));
        assert_eq!(output.stats.updates, 1);
    }

    #[test]
    fn test_delete_removes_baseline_record() {
        let baseline = baseline_with(vec![ChangeRecord::insert(id("y")), ChangeRecord::insert(id("z"))]);
        let output = merge(baseline, vec![event("a", 1, 1, vec![ChangeRecord::delete(id("y"))])]);

        assert_eq!(output.baseline.changes.len(), 1);
        assert_eq!(output.baseline.changes[0].global_identifier, id("z"));
        assert_eq!(output.stats.deletes, 1);
    }

    #[test]
    fn test_delete_without_record_is_discarded() {
        let output = merge(baseline_with(vec![]), vec![event("a", 1, 1, vec![ChangeRecord::delete(id("y"))])]);
        assert!(output.baseline.changes.is_empty());
        assert_eq!(output.stats.orphaned_deletes, 1);
    }

    #[test]
    fn test_insert_over_existing_merges_values() {
        let baseline = baseline_with(vec![ChangeRecord::insert(id("x"))
            .with_attribute("a", 1)
            .with_attribute("b", 1)]);
        let output = merge(
            baseline,
            vec![event("a", 1, 1, vec![ChangeRecord::insert(id("x")).with_attribute("a", 5)])],
        );

        let record = &output.baseline.changes[0];
        assert_eq!(record.attribute("a"), Some(&json!(5)));
        assert_eq!(record.attribute("b"), Some(&json!(1)));
    }

    #[test]
    fn test_insert_without_record_is_added() {
        let output = merge(
            baseline_with(vec![]),
            vec![event("a", 1, 1, vec![ChangeRecord::insert(id("x")).with_attribute("a", 1)])],
        );
        assert_eq!(output.baseline.changes.len(), 1);
        assert_eq!(output.stats.inserts, 1);
    }

    // Suspect path: an update that finds nothing to apply to is dropped.
    // It is counted so callers can tell when it happens.
    #[test]
    fn test_orphaned_update_is_dropped_and_counted() {
        let output = merge(
            baseline_with(vec![]),
            vec![event("a", 1, 1, vec![ChangeRecord::update(id("x")).with_attribute("a", 1)])],
        );
        assert!(output.baseline.changes.is_empty());
        assert_eq!(output.stats.orphaned_updates, 1);
    }

    #[test]
    fn test_later_events_supersede_earlier_ones() {
        let output = merge(
            baseline_with(vec![]),
            vec![
                event("a", 1, 1, vec![ChangeRecord::insert(id("x")).with_attribute("v", "first")]),
                event("b", 1, 2, vec![ChangeRecord::update(id("x")).with_attribute("v", "second")]),
                event("a", 2, 3, vec![ChangeRecord::update(id("x")).with_attribute("v", "third")]),
            ],
        );
        assert_eq!(output.baseline.changes[0].attribute("v"), Some(&json!("third")));
        assert_eq!(output.merged_events.len(), 3);
    }

    #[test]
    fn test_insert_then_delete_in_same_batch_leaves_nothing() {
        let output = merge(
            baseline_with(vec![]),
            vec![
                event("a", 1, 1, vec![ChangeRecord::insert(id("x"))]),
                event("a", 2, 2, vec![ChangeRecord::delete(id("x"))]),
            ],
        );
        assert!(output.baseline.changes.is_empty());
    }

    #[test]
    fn test_out_of_order_events_rejected() {
        let mut merger = BaselineMerger::new(baseline_with(vec![])).unwrap();
        merger.merge_event(event("a", 2, 5, vec![])).unwrap();
        let err = merger.merge_event(event("b", 1, 3, vec![])).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_same_sequence_ordered_by_device_then_revision() {
        let mut merger = BaselineMerger::new(baseline_with(vec![])).unwrap();
        merger.merge_event(event("a", 2, 4, vec![])).unwrap();
        merger.merge_event(event("b", 1, 4, vec![])).unwrap();
        // Same sequence, earlier device
        let err = merger.merge_event(event("a", 3, 4, vec![])).unwrap_err();
        assert!(err.is_invariant_violation());
        // Same sequence and device, same revision
        assert!(merger.merge_event(event("b", 1, 4, vec![])).is_err());
        merger.merge_event(event("b", 2, 4, vec![])).unwrap();
        assert_eq!(merger.stats().events_merged, 3);
        assert_eq!(merger.revision_set().get(&DeviceId::new("b")).unwrap().revision_number, 2);
    }

    #[test]
    fn test_non_insert_baseline_record_rejected() {
        let result = BaselineMerger::new(baseline_with(vec![ChangeRecord::update(id("x"))]));
        assert!(matches!(result, Err(RebaseError::InvariantViolation(_))));
    }

    #[test]
    fn test_duplicate_baseline_record_rejected() {
        let result = BaselineMerger::new(baseline_with(vec![
            ChangeRecord::insert(id("x")),
            ChangeRecord::insert(id("x")),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_baseline_event_as_input_rejected() {
        let mut merger = BaselineMerger::new(baseline_with(vec![])).unwrap();
        assert!(merger.merge_event(baseline_with(vec![])).is_err());
    }

    #[test]
    fn test_revision_set_and_stamp() {
        let mut baseline = baseline_with(vec![]);
        baseline.revision_set = RevisionSet::from_revisions([Revision::new(DeviceId::new("a"), 1, 1)]);

        let others = RevisionSet::from_revisions([Revision::new(DeviceId::new("c"), 4, 3)]);
        let incoming = Event::normal(
            Revision::new(DeviceId::new("b"), 2, 6),
            others,
            SchemaFingerprint::default(),
            vec![],
        );

        let mut merger = BaselineMerger::new(baseline).unwrap();
        merger.merge_event(incoming).unwrap();
        let schema = SchemaFingerprint::from_bytes([7u8; 32]);
        let output = merger.finish(6, schema, Utc::now());

        let set = &output.baseline.revision_set;
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(&DeviceId::new("b")).unwrap().global_sequence, 6);
        assert_eq!(output.baseline.global_sequence, 6);
        assert_eq!(output.baseline.schema_fingerprint, schema);
    }

    #[test]
    fn test_absorb_baseline_newer_values_win() {
        let older = baseline_with(vec![
            ChangeRecord::insert(id("x")).with_attribute("a", 1).with_attribute("b", 1),
            ChangeRecord::insert(id("y")),
        ]);
        let newer = baseline_with(vec![
            ChangeRecord::insert(id("x")).with_attribute("a", 2),
            ChangeRecord::insert(id("z")).with_property("tags", PropertyValue::ToOne(None)),
        ]);

        let mut merger = BaselineMerger::new(older).unwrap();
        merger.absorb_baseline(newer).unwrap();
        let output = merger.finish(0, SchemaFingerprint::default(), Utc::now());

        assert_eq!(output.baseline.changes.len(), 3);
        let x = output
            .baseline
            .changes
            .iter()
            .find(|c| c.global_identifier == id("x"))
            .unwrap();
        assert_eq!(x.attribute("a"), Some(&json!(2)));
        assert_eq!(x.attribute("b"), Some(&json!(1)));
    }
}
