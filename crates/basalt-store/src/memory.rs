//! Transactional in-memory change store.

use crate::error::StoreError;
use crate::store::ChangeStore;
use basalt_core::{
    ChangeType, DeviceId, Event, EventId, GlobalIdentifier, GlobalSequence, Revision,
    SchemaFingerprint,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Everything one device-local log holds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct LogState {
    /// All events (baseline included) indexed by id.
    events: BTreeMap<EventId, Event>,

    /// Registry of global identifiers.
    identifiers: BTreeSet<GlobalIdentifier>,
}

/// In-memory implementation of [`ChangeStore`].
///
/// The first mutation after a commit takes a copy of the committed state;
/// all later mutations and reads go to that copy until it is committed or
/// rolled back.
#[derive(Debug, Default)]
pub struct MemoryChangeStore {
    committed: LogState,

    /// Staged state, present while a transaction is open.
    pending: Option<LogState>,

    /// Reason to fail the next commit with (failure injection for tests).
    fail_next_commit: Option<String>,

    commits: u64,
}

impl MemoryChangeStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        MemoryChangeStore::default()
    }

    fn state(&self) -> &LogState {
        self.pending.as_ref().unwrap_or(&self.committed)
    }

    fn state_mut(&mut self) -> &mut LogState {
        let committed = &self.committed;
        self.pending.get_or_insert_with(|| committed.clone())
    }

    /// Make the next `commit()` fail with `reason`.
    pub fn fail_next_commit(&mut self, reason: impl Into<String>) {
        self.fail_next_commit = Some(reason.into());
    }

    /// Check if there are staged, uncommitted mutations.
    pub fn has_pending_changes(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    /// Committed events in commit order, the baseline first.
    pub fn committed_events(&self) -> Vec<&Event> {
        let mut events: Vec<&Event> = self.committed.events.values().collect();
        events.sort_by(|a, b| {
            b.is_baseline()
                .cmp(&a.is_baseline())
                .then_with(|| a.ordering_key().cmp(&b.ordering_key()))
        });
        events
    }

    /// Number of events, the baseline included.
    pub fn event_count(&self) -> usize {
        self.state().events.len()
    }

    /// Number of baseline-kind events.
    pub fn baseline_count(&self) -> usize {
        self.state().events.values().filter(|e| e.is_baseline()).count()
    }

    /// Registered global identifiers.
    pub fn identifiers(&self) -> &BTreeSet<GlobalIdentifier> {
        &self.state().identifiers
    }

    /// Serialize the committed state.
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string(&self.committed).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Load a store from serialized committed state.
    ///
    /// A record with an unknown change type code is reported as
    /// [`StoreError::Corrupt`] rather than as a format error.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        check_change_types(&value)?;
        let committed: LogState =
            serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(MemoryChangeStore {
            committed,
            ..Default::default()
        })
    }
}

fn check_change_types(state: &serde_json::Value) -> Result<(), StoreError> {
    let codes = state["events"]
        .as_object()
        .into_iter()
        .flat_map(|events| events.values())
        .filter_map(|event| event["changes"].as_array())
        .flatten()
        .filter_map(|change| change["change_type"].as_u64());
    for code in codes {
        ChangeType::try_from(u8::try_from(code).unwrap_or(u8::MAX))?;
    }
    Ok(())
}

impl ChangeStore for MemoryChangeStore {
    fn fetch_baseline(&self) -> Result<Option<Event>, StoreError> {
        let mut baselines = self.fetch_baselines()?;
        match baselines.len() {
            0 | 1 => Ok(baselines.pop()),
            n => Err(StoreError::MultipleBaselines(n)),
        }
    }

    fn fetch_baselines(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .state()
            .events
            .values()
            .filter(|e| e.is_baseline())
            .cloned()
            .collect())
    }

    fn fetch_events(&self, up_to: GlobalSequence) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<Event> = self
            .state()
            .events
            .values()
            .filter(|e| !e.is_baseline() && e.global_sequence <= up_to)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));
        Ok(events)
    }

    fn fetch_event_revisions(&self) -> Result<Vec<Revision>, StoreError> {
        Ok(self
            .state()
            .events
            .values()
            .filter(|e| !e.is_baseline())
            .filter_map(|e| e.own_revision().cloned())
            .collect())
    }

    fn fetch_all_device_identifiers(&self) -> Result<BTreeSet<DeviceId>, StoreError> {
        let mut devices = BTreeSet::new();
        for event in self.state().events.values() {
            if !event.is_baseline() {
                devices.insert(event.device_id.clone());
            }
            devices.extend(event.revision_set.device_ids());
        }
        Ok(devices)
    }

    fn count_changes(
        &self,
        change_type: Option<ChangeType>,
        excluding_baseline: bool,
    ) -> Result<usize, StoreError> {
        Ok(self
            .state()
            .events
            .values()
            .filter(|e| !(excluding_baseline && e.is_baseline()))
            .map(|e| match change_type {
                Some(t) => e.count_changes(t),
                None => e.changes.len(),
            })
            .sum())
    }

    fn fetch_unreferenced_identifiers(&self) -> Result<Vec<GlobalIdentifier>, StoreError> {
        let state = self.state();
        let referenced: BTreeSet<&GlobalIdentifier> = state
            .events
            .values()
            .flat_map(|e| e.referenced_identifiers())
            .collect();
        Ok(state
            .identifiers
            .iter()
            .filter(|id| !referenced.contains(id))
            .cloned()
            .collect())
    }

    fn max_global_sequence(&self) -> Result<GlobalSequence, StoreError> {
        Ok(self
            .state()
            .events
            .values()
            .map(|e| e.global_sequence)
            .max()
            .unwrap_or(0))
    }

    fn contains_event(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.state().events.contains_key(id))
    }

    fn create_baseline_event(
        &mut self,
        device_id: &DeviceId,
        schema: SchemaFingerprint,
    ) -> Result<Event, StoreError> {
        Ok(Event::baseline(device_id.clone(), schema))
    }

    fn save_event(&mut self, event: Event) -> Result<(), StoreError> {
        let state = self.state_mut();
        state
            .identifiers
            .extend(event.referenced_identifiers().cloned());
        state.events.insert(event.id, event);
        Ok(())
    }

    fn delete_event(&mut self, id: &EventId) -> Result<(), StoreError> {
        // The event owns its change records, so they go with it.
        self.state_mut()
            .events
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::EventNotFound(*id))
    }

    fn delete_identifier(&mut self, identifier: &GlobalIdentifier) -> Result<(), StoreError> {
        if self.state_mut().identifiers.remove(identifier) {
            Ok(())
        } else {
            Err(StoreError::IdentifierNotFound(identifier.clone()))
        }
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(reason) = self.fail_next_commit.take() {
            return Err(StoreError::CommitFailed(reason));
        }
        if let Some(pending) = self.pending.take() {
            self.committed = pending;
        }
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{ChangeRecord, CoreError, RevisionSet};

    fn event(device: &str, number: u64, sequence: u64, changes: Vec<ChangeRecord>) -> Event {
        Event::normal(
            Revision::new(DeviceId::new(device), number, sequence),
            RevisionSet::new(),
            SchemaFingerprint::default(),
            changes,
        )
    }

    fn id(key: &str) -> GlobalIdentifier {
        GlobalIdentifier::new("Note", key)
    }

    #[test]
    fn test_mutations_invisible_until_commit() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(event("a", 1, 1, vec![ChangeRecord::insert(id("x"))]))
            .unwrap();

        assert!(store.has_pending_changes());
        assert!(store.committed_events().is_empty());

        store.commit().unwrap();
        assert!(!store.has_pending_changes());
        assert_eq!(store.committed_events().len(), 1);
        assert!(store.identifiers().contains(&id("x")));
    }

    #[test]
    fn test_rollback_discards_staged_state() {
        let mut store = MemoryChangeStore::new();
        store.save_event(event("a", 1, 1, vec![])).unwrap();
        store.commit().unwrap();

        store.save_event(event("a", 2, 2, vec![])).unwrap();
        assert_eq!(store.event_count(), 2);

        store.rollback();
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn test_failed_commit_keeps_committed_state() {
        let mut store = MemoryChangeStore::new();
        store.save_event(event("a", 1, 1, vec![])).unwrap();
        store.fail_next_commit("disk full");

        assert_eq!(
            store.commit(),
            Err(StoreError::CommitFailed("disk full".to_string()))
        );
        assert!(store.committed_events().is_empty());
    }

    #[test]
    fn test_fetch_events_in_commit_order() {
        let mut store = MemoryChangeStore::new();
        store.save_event(event("b", 1, 2, vec![])).unwrap();
        store.save_event(event("a", 2, 3, vec![])).unwrap();
        store.save_event(event("a", 1, 2, vec![])).unwrap();
        store.save_event(event("c", 1, 9, vec![])).unwrap();

        let events = store.fetch_events(5).unwrap();
        let keys: Vec<(u64, String)> = events
            .iter()
            .map(|e| (e.global_sequence, e.device_id.to_string()))
            .collect();
        assert_eq!(
            keys,
            vec![(2, "a".to_string()), (2, "b".to_string()), (3, "a".to_string())]
        );
    }

    #[test]
    fn test_multiple_baselines_reported() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(Event::baseline(DeviceId::new("a"), SchemaFingerprint::default()))
            .unwrap();
        assert!(store.fetch_baseline().unwrap().is_some());

        store
            .save_event(Event::baseline(DeviceId::new("b"), SchemaFingerprint::default()))
            .unwrap();
        assert_eq!(store.fetch_baseline(), Err(StoreError::MultipleBaselines(2)));
        assert_eq!(store.fetch_baselines().unwrap().len(), 2);
    }

    #[test]
    fn test_count_changes() {
        let mut store = MemoryChangeStore::new();
        let mut baseline = Event::baseline(DeviceId::new("a"), SchemaFingerprint::default());
        baseline.changes = vec![ChangeRecord::insert(id("x")), ChangeRecord::insert(id("y"))];
        store.save_event(baseline).unwrap();
        store
            .save_event(event(
                "a",
                1,
                1,
                vec![ChangeRecord::update(id("x")), ChangeRecord::delete(id("y"))],
            ))
            .unwrap();

        assert_eq!(store.count_changes(None, false).unwrap(), 4);
        assert_eq!(store.count_changes(None, true).unwrap(), 2);
        assert_eq!(store.count_changes(Some(ChangeType::Insert), false).unwrap(), 2);
        assert_eq!(store.count_changes(Some(ChangeType::Insert), true).unwrap(), 0);
        assert_eq!(store.count_baseline_changes().unwrap(), 2);
    }

    #[test]
    fn test_unreferenced_identifiers() {
        let mut store = MemoryChangeStore::new();
        let e = event("a", 1, 1, vec![ChangeRecord::insert(id("x"))]);
        let event_id = e.id;
        store.save_event(e).unwrap();
        store.save_event(event("a", 2, 2, vec![ChangeRecord::insert(id("y"))])).unwrap();

        assert!(store.fetch_unreferenced_identifiers().unwrap().is_empty());

        store.delete_event(&event_id).unwrap();
        assert_eq!(store.fetch_unreferenced_identifiers().unwrap(), vec![id("x")]);

        store.delete_identifier(&id("x")).unwrap();
        assert!(store.fetch_unreferenced_identifiers().unwrap().is_empty());
        assert!(store.delete_identifier(&id("x")).is_err());
    }

    #[test]
    fn test_device_identifiers_include_revision_sets() {
        let mut store = MemoryChangeStore::new();
        let others = RevisionSet::from_revisions([Revision::new(DeviceId::new("b"), 4, 4)]);
        store
            .save_event(Event::normal(
                Revision::new(DeviceId::new("a"), 1, 5),
                others,
                SchemaFingerprint::default(),
                vec![],
            ))
            .unwrap();

        let devices = store.fetch_all_device_identifiers().unwrap();
        assert!(devices.contains(&DeviceId::new("a")));
        assert!(devices.contains(&DeviceId::new("b")));
        assert_eq!(store.max_global_sequence().unwrap(), 5);
    }

    #[test]
    fn test_json_roundtrip_preserves_committed_state() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(event("a", 1, 1, vec![ChangeRecord::insert(id("x")).with_attribute("n", 1)]))
            .unwrap();
        store.commit().unwrap();

        let json = store.to_json().unwrap();
        let restored = MemoryChangeStore::from_json(&json).unwrap();
        assert_eq!(restored.event_count(), 1);
        assert_eq!(restored.fetch_events(10).unwrap(), store.fetch_events(10).unwrap());
    }

    #[test]
    fn test_unknown_change_type_is_corrupt() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(event("a", 1, 1, vec![ChangeRecord::delete(id("x"))]))
            .unwrap();
        store.commit().unwrap();

        let json = store.to_json().unwrap().replace("\"change_type\":2", "\"change_type\":7");
        assert_eq!(
            MemoryChangeStore::from_json(&json).unwrap_err(),
            StoreError::Corrupt(CoreError::UnknownChangeType(7))
        );

        let garbled = store.to_json().unwrap().replace("\"change_type\":2", "\"change_type\":\"x\"");
        assert!(matches!(
            MemoryChangeStore::from_json(&garbled),
            Err(StoreError::Serialization(_))
        ));
        assert!(matches!(
            MemoryChangeStore::from_json("not json"),
            Err(StoreError::Serialization(_))
        ));
    }
}
