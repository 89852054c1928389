//! Baseline consolidation.
//!
//! Devices rebase independently, so after syncing a store can hold several
//! baselines. Consolidation restores "at most one baseline": baselines whose
//! revision set is dominated by another's are dropped, and the remaining
//! concurrent ones are folded together oldest to newest.

use crate::error::RebaseError;
use crate::merge::{collect_unreferenced_identifiers, BaselineMerger};
use basalt_core::{Event, SchemaFingerprint};
use basalt_store::ChangeStore;
use chrono::Utc;
use tracing::info;

/// What a consolidation did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Baselines present before consolidating.
    pub baselines_found: usize,
    /// Baselines dropped because another baseline already covered them.
    pub baselines_dropped: usize,
    /// Concurrent baselines folded into the survivor.
    pub baselines_folded: usize,
    pub identifiers_collected: usize,
}

/// Reduce the store to a single baseline. Returns `None` if there was
/// nothing to do. Nothing is committed.
pub fn consolidate_baselines<S: ChangeStore + ?Sized>(
    store: &mut S,
    schema: SchemaFingerprint,
) -> Result<Option<ConsolidationReport>, RebaseError> {
    let mut baselines = store.fetch_baselines()?;
    if baselines.len() <= 1 {
        return Ok(None);
    }

    baselines.sort_by(|a, b| {
        (a.global_sequence, a.timestamp, a.id).cmp(&(b.global_sequence, b.timestamp, b.id))
    });

    let redundant: Vec<bool> = (0..baselines.len())
        .map(|i| is_redundant(&baselines, i))
        .collect();

    let mut report = ConsolidationReport {
        baselines_found: baselines.len(),
        ..Default::default()
    };

    let mut survivors = Vec::new();
    for (baseline, redundant) in baselines.into_iter().zip(redundant) {
        if redundant {
            store.delete_event(&baseline.id)?;
            report.baselines_dropped += 1;
        } else {
            survivors.push(baseline);
        }
    }

    let mut survivors = survivors.into_iter();
    if let Some(first) = survivors.next() {
        let global_sequence = first.global_sequence;
        let mut merger = BaselineMerger::new(first)?;
        let mut max_sequence = global_sequence;
        let mut folded = 0;

        for other in survivors {
            max_sequence = max_sequence.max(other.global_sequence);
            store.delete_event(&other.id)?;
            merger.absorb_baseline(other)?;
            folded += 1;
        }
        report.baselines_folded = folded;

        if folded > 0 {
            let output = merger.finish(max_sequence, schema, Utc::now());
            report.identifiers_collected = output.persist(store)?;
        }
    }

    if report.baselines_folded == 0 {
        report.identifiers_collected = collect_unreferenced_identifiers(store)?;
    }

    info!(
        found = report.baselines_found,
        dropped = report.baselines_dropped,
        folded = report.baselines_folded,
        "consolidated baselines"
    );
    Ok(Some(report))
}

/// A baseline is redundant if another one dominates it. Among baselines
/// with identical revision sets only the last in order survives.
fn is_redundant(baselines: &[Event], index: usize) -> bool {
    let candidate = &baselines[index].revision_set;
    baselines.iter().enumerate().any(|(j, other)| {
        j != index
            && other.revision_set.dominates(candidate)
            && (j > index || other.revision_set != *candidate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{ChangeRecord, DeviceId, GlobalIdentifier, Revision, RevisionSet};
    use basalt_store::MemoryChangeStore;

    fn baseline(device: &str, sequence: u64, revisions: &[(&str, u64, u64)], keys: &[&str]) -> Event {
        let mut event = Event::baseline(DeviceId::new(device), SchemaFingerprint::default());
        event.global_sequence = sequence;
        event.revision_set = revisions
            .iter()
            .map(|(d, n, s)| Revision::new(DeviceId::new(*d), *n, *s))
            .collect::<RevisionSet>();
        event.changes = keys
            .iter()
            .map(|k| ChangeRecord::insert(GlobalIdentifier::new("Note", *k)))
            .collect();
        event
    }

    #[test]
    fn test_single_baseline_untouched() {
        let mut store = MemoryChangeStore::new();
        store.save_event(baseline("a", 1, &[("a", 1, 1)], &["x"])).unwrap();
        store.commit().unwrap();

        assert!(consolidate_baselines(&mut store, SchemaFingerprint::default()).unwrap().is_none());
        assert!(!store.has_pending_changes());
    }

    #[test]
    fn test_dominated_baseline_dropped() {
        let mut store = MemoryChangeStore::new();
        store.save_event(baseline("a", 1, &[("a", 1, 1)], &["x"])).unwrap();
        store
            .save_event(baseline("b", 2, &[("a", 1, 1), ("b", 1, 2)], &["x", "y"]))
            .unwrap();

        let report = consolidate_baselines(&mut store, SchemaFingerprint::default())
            .unwrap()
            .unwrap();
        assert_eq!(report.baselines_dropped, 1);
        assert_eq!(report.baselines_folded, 0);

        let survivor = store.fetch_baseline().unwrap().unwrap();
        assert_eq!(survivor.device_id, DeviceId::new("b"));
        assert_eq!(survivor.changes.len(), 2);
    }

    #[test]
    fn test_equal_baselines_keep_one() {
        let mut store = MemoryChangeStore::new();
        store.save_event(baseline("a", 1, &[("a", 1, 1)], &["x"])).unwrap();
        store.save_event(baseline("b", 1, &[("a", 1, 1)], &["x"])).unwrap();

        consolidate_baselines(&mut store, SchemaFingerprint::default()).unwrap();
        assert_eq!(store.baseline_count(), 1);
    }

    #[test]
    fn test_concurrent_baselines_folded() {
        let mut store = MemoryChangeStore::new();
        store.save_event(baseline("a", 1, &[("a", 1, 1)], &["x"])).unwrap();
        store.save_event(baseline("b", 1, &[("b", 1, 1)], &["y"])).unwrap();

        let report = consolidate_baselines(&mut store, SchemaFingerprint::default())
            .unwrap()
            .unwrap();
        assert_eq!(report.baselines_folded, 1);

        let merged = store.fetch_baseline().unwrap().unwrap();
        assert_eq!(merged.changes.len(), 2);
        assert_eq!(merged.revision_set.len(), 2);
        assert_eq!(merged.global_sequence, 1);
    }
}
