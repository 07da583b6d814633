//! Drill-down decision.

use serde::{Deserialize, Serialize};

use crate::config::ScanJob;

/// Decide whether a node should be expanded into its subdirectories.
///
/// True iff the node is at least `threshold_bytes` large and sits strictly
/// above `max_depth`. A node at `depth == max_depth` is never drilled.
pub fn should_drill(size_bytes: u64, depth: u32, threshold_bytes: u64, max_depth: u32) -> bool {
    size_bytes >= threshold_bytes && depth < max_depth
}

/// Threshold and depth bound taken from a [`ScanJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrillPolicy {
    /// Minimum size that triggers drill-down.
    pub threshold_bytes: u64,
    /// Depth at which drilling stops.
    pub max_depth: u32,
}

impl DrillPolicy {
    /// Create a policy.
    pub fn new(threshold_bytes: u64, max_depth: u32) -> Self {
        Self {
            threshold_bytes,
            max_depth,
        }
    }

    /// Evaluate the policy for one node.
    pub fn should_drill(&self, size_bytes: u64, depth: u32) -> bool {
        should_drill(size_bytes, depth, self.threshold_bytes, self.max_depth)
    }

    /// Whether a node of this size counts as large, regardless of depth.
    pub fn is_large(&self, size_bytes: u64) -> bool {
        size_bytes >= self.threshold_bytes
    }
}

impl From<&ScanJob> for DrillPolicy {
    fn from(job: &ScanJob) -> Self {
        Self::new(job.threshold_bytes, job.max_depth)
    }
}
