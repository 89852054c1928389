//! Rebase orchestrator.
//!
//! Ties trigger, boundary, merge and consolidation together into one
//! operation with a single outcome. Every store mutation happens inside one
//! transaction: either the whole rebase commits or the store is rolled back
//! to where it was.

use crate::boundary::{global_sequence_for_new_baseline, latest_revision_set};
use crate::config::RebaseConfig;
use crate::consolidate::{consolidate_baselines, ConsolidationReport};
use crate::error::RebaseError;
use crate::merge::{BaselineMerger, MergeStats};
use crate::trigger::{self, ChangeCounts, TriggerReason};
use basalt_core::{DeviceId, Event, GlobalSequence, RevisionSet, SchemaFingerprint};
use basalt_store::{ChangeStore, StoreError};
use chrono::Utc;
use tracing::{debug, info, warn};

/// Result of a successful rebase.
#[derive(Clone, Debug, PartialEq)]
pub enum RebaseOutcome {
    /// Nothing was eligible; the store is unchanged.
    NoOp,
    /// The baseline was rebuilt and committed.
    Rebased(RebaseReport),
}

impl RebaseOutcome {
    pub fn is_no_op(&self) -> bool {
        matches!(self, RebaseOutcome::NoOp)
    }

    pub fn report(&self) -> Option<&RebaseReport> {
        match self {
            RebaseOutcome::Rebased(report) => Some(report),
            RebaseOutcome::NoOp => None,
        }
    }
}

/// Details of a committed rebase.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RebaseReport {
    /// Global sequence the new baseline was folded up to.
    pub boundary: GlobalSequence,
    pub merge: MergeStats,
    /// Events deleted because the baseline already covered them.
    pub events_pruned: usize,
    pub identifiers_collected: usize,
    pub consolidation: Option<ConsolidationReport>,
    /// Records in the baseline after the rebase.
    pub baseline_records: usize,
    /// Whether this rebase created the first baseline.
    pub created_baseline: bool,
}

/// Compacts one device-local store.
///
/// The rebaser borrows the store mutably for its whole lifetime, so nothing
/// else can touch the log while a rebase runs.
pub struct Rebaser<'a, S: ChangeStore + ?Sized> {
    store: &'a mut S,
    device_id: DeviceId,
    schema: SchemaFingerprint,
    config: RebaseConfig,
}

impl<'a, S: ChangeStore + ?Sized> Rebaser<'a, S> {
    /// Create a rebaser acting on behalf of `device_id`. New baselines are
    /// stamped with `schema`.
    pub fn new(store: &'a mut S, device_id: DeviceId, schema: SchemaFingerprint) -> Self {
        Rebaser {
            store,
            device_id,
            schema,
            config: RebaseConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RebaseConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RebaseConfig {
        &self.config
    }

    /// Evaluate the trigger rules and report why.
    pub fn trigger(&self) -> Result<TriggerReason, RebaseError> {
        let baselines = self.store.fetch_baselines()?;
        let reason = if baselines.len() > 1 {
            TriggerReason::MultipleBaselines(baselines.len())
        } else {
            let devices = self.store.fetch_all_device_identifiers()?;
            let counts = ChangeCounts::gather(&*self.store)?;
            trigger::evaluate(
                baselines.first().map(|b| &b.revision_set),
                &devices,
                &counts,
                &self.config,
            )
        };
        debug!(device = %self.device_id, ?reason, "evaluated rebase trigger");
        Ok(reason)
    }

    /// Check if a rebase is worthwhile right now.
    pub fn should_rebase(&self) -> Result<bool, RebaseError> {
        Ok(self.trigger()?.should_rebase())
    }

    /// Estimated fraction by which a rebase would shrink the record count.
    pub fn estimated_compaction_ratio(&self) -> Result<f64, RebaseError> {
        Ok(ChangeCounts::gather(&*self.store)?.compaction_ratio())
    }

    /// Global sequence up to which compaction is safe.
    pub fn global_count_for_new_baseline(&self) -> Result<GlobalSequence, RebaseError> {
        let baseline = self.store.fetch_baseline()?;
        let latest = latest_revision_set(self.store.fetch_event_revisions()?);
        Ok(global_sequence_for_new_baseline(
            &latest,
            baseline.as_ref().map(|b| &b.revision_set),
        ))
    }

    /// Run a rebase. On failure the store is rolled back and the first
    /// error is returned.
    pub fn rebase(&mut self) -> Result<RebaseOutcome, RebaseError> {
        let result = self.rebase_in_transaction();
        match &result {
            Ok(RebaseOutcome::Rebased(report)) => info!(
                device = %self.device_id,
                boundary = report.boundary,
                events_merged = report.merge.events_merged,
                events_pruned = report.events_pruned,
                baseline_records = report.baseline_records,
                identifiers_collected = report.identifiers_collected,
                "rebased log"
            ),
            Ok(RebaseOutcome::NoOp) => debug!(device = %self.device_id, "nothing to rebase"),
            Err(error) => {
                self.store.rollback();
                warn!(device = %self.device_id, %error, "rebase failed, rolled back");
            }
        }
        result
    }

    fn rebase_in_transaction(&mut self) -> Result<RebaseOutcome, RebaseError> {
        let consolidation = if self.config.consolidate_baselines {
            consolidate_baselines(&mut *self.store, self.schema)?
        } else {
            None
        };

        let existing = self.single_baseline()?;
        let mut events_pruned = match &existing {
            Some(baseline) if self.config.prune_covered_events => self.prune_covered_events(baseline)?,
            _ => 0,
        };

        let mut boundary = self.global_count_for_new_baseline()?;
        let mut pending = self.store.fetch_events(GlobalSequence::MAX)?;
        let eligible = pending.partition_point(|event| event.global_sequence <= boundary);
        debug!(device = %self.device_id, boundary, eligible, "computed rebase boundary");

        if existing.is_some() && eligible == 0 && consolidation.is_none() && events_pruned == 0 {
            return Ok(RebaseOutcome::NoOp);
        }

        let created_baseline = existing.is_none();
        let baseline = match existing {
            Some(baseline) => baseline,
            None => self.store.create_baseline_event(&self.device_id, self.schema)?,
        };

        let mut global_sequence = if eligible == 0 && !created_baseline {
            baseline.global_sequence
        } else {
            boundary
        };
        let mut reached = boundary;

        // Folding up to one boundary covers the devices that held it back,
        // which can move the next boundary forward. Repeat until nothing is
        // eligible.
        let mut merger = BaselineMerger::new(baseline)?;
        let mut covered = Vec::new();
        loop {
            let eligible = pending.partition_point(|event| event.global_sequence <= boundary);
            if eligible == 0 {
                break;
            }
            merger.merge_events(pending.drain(..eligible))?;
            global_sequence = boundary;
            reached = boundary;

            if self.config.prune_covered_events {
                let (now_covered, rest): (Vec<_>, Vec<_>) = pending
                    .into_iter()
                    .partition(|event| is_covered(merger.revision_set(), event));
                covered.extend(now_covered.into_iter().map(|event| event.id));
                pending = rest;
            }

            let latest = latest_revision_set(pending.iter().filter_map(|event| event.own_revision().cloned()));
            boundary = global_sequence_for_new_baseline(&latest, Some(merger.revision_set()));
            debug!(device = %self.device_id, boundary, remaining = pending.len(), "advanced rebase boundary");
        }

        for id in &covered {
            self.store.delete_event(id)?;
        }
        events_pruned += covered.len();

        let output = merger.finish(global_sequence, self.schema, Utc::now());

        let merge = output.stats.clone();
        let baseline_records = output.baseline.changes.len();
        let identifiers_collected = output.persist(&mut *self.store)?;

        self.store.commit()?;

        Ok(RebaseOutcome::Rebased(RebaseReport {
            boundary: reached,
            merge,
            events_pruned,
            identifiers_collected,
            consolidation,
            baseline_records,
            created_baseline,
        }))
    }

    /// The store's baseline, if any. A second baseline left over at this
    /// point means consolidation was skipped and the log cannot be folded.
    fn single_baseline(&self) -> Result<Option<Event>, RebaseError> {
        match self.store.fetch_baseline() {
            Err(StoreError::MultipleBaselines(count)) => Err(RebaseError::invariant(format!(
                "{count} baselines present and consolidation is disabled"
            ))),
            other => Ok(other?),
        }
    }

    /// Delete events whose authoring revision the baseline already covers.
    /// Another device folded them in; merging them again would roll newer
    /// values back.
    fn prune_covered_events(&mut self, baseline: &Event) -> Result<usize, RebaseError> {
        let covered: Vec<_> = self
            .store
            .fetch_events(GlobalSequence::MAX)?
            .into_iter()
            .filter(|event| is_covered(&baseline.revision_set, event))
            .map(|event| event.id)
            .collect();

        for id in &covered {
            self.store.delete_event(id)?;
        }
        if !covered.is_empty() {
            debug!(device = %self.device_id, pruned = covered.len(), "pruned events covered by baseline");
        }
        Ok(covered.len())
    }
}

fn is_covered(revision_set: &RevisionSet, event: &Event) -> bool {
    event
        .own_revision()
        .map(|revision| revision_set.covers(revision))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{ChangeRecord, GlobalIdentifier, Revision};
    use basalt_store::MemoryChangeStore;

    fn id(key: &str) -> GlobalIdentifier {
        GlobalIdentifier::new("Note", key)
    }

    fn event(device: &str, number: u64, sequence: u64, changes: Vec<ChangeRecord>) -> Event {
        Event::normal(
            Revision::new(DeviceId::new(device), number, sequence),
            RevisionSet::new(),
            SchemaFingerprint::default(),
            changes,
        )
    }

    fn rebaser(store: &mut MemoryChangeStore) -> Rebaser<'_, MemoryChangeStore> {
        Rebaser::new(store, DeviceId::new("a"), SchemaFingerprint::default())
    }

    #[test]
    fn test_empty_store_creates_baseline() {
        let mut store = MemoryChangeStore::new();
        assert!(rebaser(&mut store).should_rebase().unwrap());

        let outcome = rebaser(&mut store).rebase().unwrap();
        let report = outcome.report().unwrap();
        assert!(report.created_baseline);
        assert_eq!(report.boundary, 0);
        assert_eq!(store.baseline_count(), 1);
        assert!(!store.has_pending_changes());
    }

    #[test]
    fn test_rebase_folds_events() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(event("a", 1, 1, vec![ChangeRecord::insert(id("x")).with_attribute("v", 1)]))
            .unwrap();
        store
            .save_event(event("a", 2, 2, vec![ChangeRecord::update(id("x")).with_attribute("v", 2)]))
            .unwrap();
        store.commit().unwrap();

        let outcome = rebaser(&mut store).rebase().unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.boundary, 2);
        assert_eq!(report.merge.events_merged, 2);
        assert_eq!(report.baseline_records, 1);
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn test_second_rebase_is_no_op() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(event("a", 1, 1, vec![ChangeRecord::insert(id("x"))]))
            .unwrap();
        store.commit().unwrap();

        rebaser(&mut store).rebase().unwrap();
        let before = store.fetch_baseline().unwrap();
        let commits = store.commit_count();

        assert_eq!(rebaser(&mut store).rebase().unwrap(), RebaseOutcome::NoOp);
        assert_eq!(store.fetch_baseline().unwrap(), before);
        assert_eq!(store.commit_count(), commits);
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(event("a", 1, 1, vec![ChangeRecord::insert(id("x"))]))
            .unwrap();
        store.commit().unwrap();
        store.fail_next_commit("disk full");

        let err = rebaser(&mut store).rebase().unwrap_err();
        assert!(matches!(err, RebaseError::Persistence(_)));
        assert!(!store.has_pending_changes());
        assert_eq!(store.baseline_count(), 0);
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn test_multiple_baselines_trigger_and_consolidate() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(Event::baseline(DeviceId::new("a"), SchemaFingerprint::default()))
            .unwrap();
        store
            .save_event(Event::baseline(DeviceId::new("b"), SchemaFingerprint::default()))
            .unwrap();
        store.commit().unwrap();

        assert_eq!(
            rebaser(&mut store).trigger().unwrap(),
            TriggerReason::MultipleBaselines(2)
        );
        let outcome = rebaser(&mut store).rebase().unwrap();
        assert!(outcome.report().unwrap().consolidation.is_some());
        assert_eq!(store.baseline_count(), 1);
    }

    #[test]
    fn test_staggered_devices_fold_in_one_rebase() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(event("a", 1, 1, vec![ChangeRecord::insert(id("x"))]))
            .unwrap();
        store
            .save_event(event("b", 1, 2, vec![ChangeRecord::insert(id("y"))]))
            .unwrap();
        store.commit().unwrap();

        let outcome = rebaser(&mut store).rebase().unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.boundary, 2);
        assert_eq!(report.merge.events_merged, 2);
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.commit_count(), 2);

        assert_eq!(rebaser(&mut store).rebase().unwrap(), RebaseOutcome::NoOp);
    }

    #[test]
    fn test_multiple_baselines_without_consolidation_is_invariant_violation() {
        let mut store = MemoryChangeStore::new();
        store
            .save_event(Event::baseline(DeviceId::new("a"), SchemaFingerprint::default()))
            .unwrap();
        store
            .save_event(Event::baseline(DeviceId::new("b"), SchemaFingerprint::default()))
            .unwrap();
        store.commit().unwrap();

        let config = RebaseConfig {
            consolidate_baselines: false,
            ..RebaseConfig::default()
        };
        let err = rebaser(&mut store).with_config(config).rebase().unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(store.baseline_count(), 2);
        assert!(!store.has_pending_changes());
    }
}
