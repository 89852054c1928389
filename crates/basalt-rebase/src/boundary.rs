//! Boundary calculator: how far the log can safely be folded.
//!
//! The boundary is the global sequence up to which every device that has
//! advanced since the last baseline has actually produced events. Folding
//! past it could make the baseline claim changes a device has not made yet.

use basalt_core::{GlobalSequence, Revision, RevisionSet};

/// Most recent revision each device has reported through its events.
pub fn latest_revision_set(event_revisions: impl IntoIterator<Item = Revision>) -> RevisionSet {
    RevisionSet::from_revisions(event_revisions)
}

/// Global sequence for the new baseline.
///
/// Devices whose latest revision is not newer than the one the baseline
/// already records are skipped: they have not advanced and must rejoin in
/// full rather than be folded in with stale data. Every other device
/// contributes its reported global sequence, and the minimum wins. Returns
/// 0 when no device qualifies.
pub fn global_sequence_for_new_baseline(
    latest: &RevisionSet,
    baseline_revisions: Option<&RevisionSet>,
) -> GlobalSequence {
    latest
        .iter()
        .filter(|revision| match baseline_revisions.and_then(|b| b.get(&revision.device_id)) {
            Some(recorded) => revision.is_newer_than(recorded),
            None => true,
        })
        .map(|revision| revision.global_sequence)
        .min()
        .unwrap_or(0)
}
