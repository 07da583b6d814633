//! Finished scan report and statistics.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScanJob;
use crate::error::ScanWarning;
use crate::node::{NodeStatus, ScanNode};
use crate::policy::DrillPolicy;

/// Summary statistics for a scan result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    /// Aggregate size of the root.
    pub total_size: u64,
    /// Number of directory nodes in the result.
    pub total_nodes: u64,
    /// Nodes the drill policy accepted.
    pub expanded_nodes: u64,
    /// Terminal nodes without children.
    pub leaf_nodes: u64,
    /// Nodes whose directory could not be read.
    pub skipped_nodes: u64,
    /// Nodes that ended in error (including cancellation).
    pub error_nodes: u64,
    /// Deepest node depth.
    pub max_depth: u32,
    /// Nodes at or above the drill threshold.
    pub large_folders: u64,
}

impl TreeStats {
    /// Compute stats for a finished tree.
    pub fn from_root(root: &ScanNode, policy: &DrillPolicy) -> Self {
        let mut stats = Self {
            total_size: root.size_bytes,
            ..Self::default()
        };
        for node in root.iter() {
            stats.record_node(node, policy);
        }
        stats
    }

    fn record_node(&mut self, node: &ScanNode, policy: &DrillPolicy) {
        self.total_nodes += 1;
        self.max_depth = self.max_depth.max(node.depth);
        if node.expanded {
            self.expanded_nodes += 1;
        }
        if node.status.is_terminal() && node.is_leaf() {
            self.leaf_nodes += 1;
        }
        match node.status {
            NodeStatus::SkippedNoAccess => self.skipped_nodes += 1,
            NodeStatus::Error => self.error_nodes += 1,
            _ => {}
        }
        if node.measured && policy.is_large(node.size_bytes) {
            self.large_folders += 1;
        }
    }
}

/// A large folder together with the chain of folders above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeFolder {
    /// Folder path.
    pub path: PathBuf,
    /// Folder size.
    pub size_bytes: u64,
    /// Folder depth.
    pub depth: u32,
    /// Ancestors as `(path, size)`, nearest parent first, root last.
    pub ancestors: Vec<(PathBuf, u64)>,
}

/// Complete result of one scan job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Root node of the result.
    pub root: ScanNode,

    /// Root path that was scanned (canonical).
    pub root_path: PathBuf,

    /// When the scan finished.
    pub scanned_at: DateTime<Utc>,

    /// Duration of the scan.
    pub duration: Duration,

    /// Job that produced this report.
    pub job: ScanJob,

    /// Summary statistics.
    pub stats: TreeStats,

    /// Warnings encountered during the scan.
    pub warnings: Vec<ScanWarning>,

    /// The scan was cancelled before it finished.
    pub cancelled: bool,
}

impl ScanReport {
    /// Build a report, computing statistics from the tree.
    pub fn new(
        root: ScanNode,
        job: ScanJob,
        duration: Duration,
        warnings: Vec<ScanWarning>,
        cancelled: bool,
    ) -> Self {
        let stats = TreeStats::from_root(&root, &DrillPolicy::from(&job));
        Self {
            root_path: root.path.clone(),
            root,
            scanned_at: Utc::now(),
            duration,
            job,
            stats,
            warnings,
            cancelled,
        }
    }

    /// Aggregate size of the root.
    pub fn total_size(&self) -> u64 {
        self.root.size_bytes
    }

    /// Whether every size in the tree is a full measurement.
    pub fn is_complete(&self) -> bool {
        self.root.complete && !self.cancelled
    }

    /// Check if there were any warnings during scanning.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Every measured folder at or above the job's threshold, largest first.
    pub fn large_folders(&self) -> Vec<LargeFolder> {
        let policy = DrillPolicy::from(&self.job);
        let mut found = Vec::new();
        let mut chain = Vec::new();
        collect_large(&self.root, &policy, &mut chain, &mut found);
        found.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.path.cmp(&b.path)));
        found
    }
}

fn collect_large<'a>(
    node: &'a ScanNode,
    policy: &DrillPolicy,
    chain: &mut Vec<&'a ScanNode>,
    found: &mut Vec<LargeFolder>,
) {
    if node.measured && policy.is_large(node.size_bytes) {
        found.push(LargeFolder {
            path: node.path.clone(),
            size_bytes: node.size_bytes,
            depth: node.depth,
            ancestors: chain
                .iter()
                .rev()
                .map(|a| (a.path.clone(), a.size_bytes))
                .collect(),
        });
    }
    chain.push(node);
    for child in &node.children {
        collect_large(child, policy, chain, found);
    }
    chain.pop();
}
