//! Compaction trigger: decides whether a rebase is worth running.
//!
//! The decision is a cost/benefit estimate over record counts, not bytes.

use crate::config::RebaseConfig;
use basalt_core::{ChangeType, DeviceId, RevisionSet};
use basalt_store::{ChangeStore, StoreError};
use std::collections::BTreeSet;

/// Record counts the trigger works from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    /// Records held by the baseline.
    pub baseline: usize,
    /// Non-baseline delete records.
    pub deletes: usize,
    /// Non-baseline insert records.
    pub inserts: usize,
    /// Non-baseline update records.
    pub updates: usize,
}

impl ChangeCounts {
    /// Read the current counts from a store.
    pub fn gather<S: ChangeStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        Ok(ChangeCounts {
            baseline: store.count_baseline_changes()?,
            deletes: store.count_changes(Some(ChangeType::Delete), true)?,
            inserts: store.count_changes(Some(ChangeType::Insert), true)?,
            updates: store.count_changes(Some(ChangeType::Update), true)?,
        })
    }

    /// Records outside the baseline.
    pub fn non_baseline(&self) -> usize {
        self.deletes + self.inserts + self.updates
    }

    /// All records, the baseline's included.
    pub fn total(&self) -> usize {
        self.baseline + self.non_baseline()
    }

    /// Projected baseline size after a full rebase.
    ///
    /// Each delete removes a baseline entry and contributes nothing itself,
    /// each update replaces an entry one for one, each insert adds one. The
    /// projection can go negative when counts are inconsistent.
    pub fn projected_baseline_size(&self) -> i64 {
        self.baseline as i64 - 2 * self.deletes as i64 - self.updates as i64 + self.inserts as i64
    }

    /// Estimated fraction by which the object-change count would shrink,
    /// clamped to `[0, 1]`.
    pub fn compaction_ratio(&self) -> f64 {
        let current = self.total().max(1) as f64;
        let ratio = 1.0 - self.projected_baseline_size() as f64 / current;
        ratio.clamp(0.0, 1.0)
    }
}

/// Why the trigger decided what it did.
#[derive(Clone, Debug, PartialEq)]
pub enum TriggerReason {
    /// There is no baseline yet; rebasing creates it.
    NoBaseline,
    /// Several baselines arrived through sync and must be consolidated.
    MultipleBaselines(usize),
    /// A device the baseline knows nothing about has appeared.
    UncoveredDevice(DeviceId),
    /// Enough changes, and enough of them would fold away.
    Worthwhile { changes: usize, ratio: f64 },
    /// Too few non-baseline changes to bother.
    TooFewChanges { changes: usize },
    /// Rebasing would not shrink the log enough.
    RatioTooLow { ratio: f64 },
}

impl TriggerReason {
    pub fn should_rebase(&self) -> bool {
        matches!(
            self,
            TriggerReason::NoBaseline
                | TriggerReason::MultipleBaselines(_)
                | TriggerReason::UncoveredDevice(_)
                | TriggerReason::Worthwhile { .. }
        )
    }
}

/// Apply the trigger rules in priority order.
///
/// `baseline_revisions` is the baseline's revision set, `None` if there is no
/// baseline.
pub fn evaluate(
    baseline_revisions: Option<&RevisionSet>,
    known_devices: &BTreeSet<DeviceId>,
    counts: &ChangeCounts,
    config: &RebaseConfig,
) -> TriggerReason {
    let Some(revisions) = baseline_revisions else {
        return TriggerReason::NoBaseline;
    };

    if let Some(device) = revisions.first_missing_device(known_devices) {
        return TriggerReason::UncoveredDevice(device.clone());
    }

    let changes = counts.non_baseline();
    if changes < config.min_changes_for_rebase {
        return TriggerReason::TooFewChanges { changes };
    }

    let ratio = counts.compaction_ratio();
    if ratio > config.min_compaction_ratio {
        TriggerReason::Worthwhile { changes, ratio }
    } else {
        TriggerReason::RatioTooLow { ratio }
    }
}
