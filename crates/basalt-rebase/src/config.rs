//! Rebase configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the rebaser.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebaseConfig {
    /// Minimum number of non-baseline change records before a rebase is
    /// considered worthwhile.
    pub min_changes_for_rebase: usize,

    /// Estimated compaction ratio that must be exceeded.
    pub min_compaction_ratio: f64,

    /// Whether to delete events already folded into the baseline by another
    /// device instead of merging them again.
    pub prune_covered_events: bool,

    /// Whether to fold multiple baselines into one before rebasing.
    pub consolidate_baselines: bool,
}

impl Default for RebaseConfig {
    fn default() -> Self {
        RebaseConfig {
            min_changes_for_rebase: 100,
            min_compaction_ratio: 0.5,
            prune_covered_events: true,
            consolidate_baselines: true,
        }
    }
}

impl RebaseConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Builder for rebase configuration.
pub struct RebaseConfigBuilder {
    config: RebaseConfig,
}

impl RebaseConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RebaseConfig::default(),
        }
    }

    pub fn min_changes_for_rebase(mut self, count: usize) -> Self {
        self.config.min_changes_for_rebase = count;
        self
    }

    pub fn min_compaction_ratio(mut self, ratio: f64) -> Self {
        self.config.min_compaction_ratio = ratio;
        self
    }

    pub fn prune_covered_events(mut self, enabled: bool) -> Self {
        self.config.prune_covered_events = enabled;
        self
    }

    pub fn consolidate_baselines(mut self, enabled: bool) -> Self {
        self.config.consolidate_baselines = enabled;
        self
    }

    pub fn build(self) -> RebaseConfig {
        self.config
    }
}

impl Default for RebaseConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
