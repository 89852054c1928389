//! A single device's position in the log.

use crate::identifier::DeviceId;
use serde::{Deserialize, Serialize};

/// Log-wide commit position. Zero means "nothing committed".
pub type GlobalSequence = u64;

/// One device's state: its local monotonic counter and the global
/// sequence that counter corresponds to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub device_id: DeviceId,
    pub revision_number: u64,
    pub global_sequence: GlobalSequence,
}

impl Revision {
    pub fn new(device_id: DeviceId, revision_number: u64, global_sequence: GlobalSequence) -> Self {
        Revision {
            device_id,
            revision_number,
            global_sequence,
        }
    }

    /// True if this revision is strictly ahead of `other`.
    ///
    /// Revision numbers decide; the global sequence breaks ties so that a
    /// re-stamped revision with a later position still counts as newer.
    pub fn is_newer_than(&self, other: &Revision) -> bool {
        (self.revision_number, self.global_sequence) > (other.revision_number, other.global_sequence)
    }
}
