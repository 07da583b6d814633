//! Scan node types.

use std::path::{Path, PathBuf};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Unique identifier for a node within one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Create a new NodeId from a u64.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Lifecycle of a directory node.
///
/// ```text
/// Pending -> Probing -> Probed -> Drilled            (leaf)
///                              \-> Drilling -> Drilled
///            Probing -> SkippedNoAccess | Error
/// any non-terminal  -> Error                          (cancellation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Created, probe not started.
    Pending,
    /// Probe running.
    Probing,
    /// Probe finished, drill decision not yet applied.
    Probed,
    /// Children created and being probed.
    Drilling,
    /// Finished, with or without children.
    Drilled,
    /// The directory itself could not be read.
    SkippedNoAccess,
    /// Probe failed or the scan was cancelled before the node finished.
    Error,
}

impl NodeStatus {
    /// Whether no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Drilled | Self::SkippedNoAccess | Self::Error)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        match (self, next) {
            (from, Error) => !from.is_terminal(),
            (Pending, Probing) => true,
            (Probing, Probed | SkippedNoAccess) => true,
            (Probed, Drilling | Drilled) => true,
            (Drilling, Drilled) => true,
            _ => false,
        }
    }

    /// Short label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Probing => "probing",
            Self::Probed => "probed",
            Self::Drilling => "drilling",
            Self::Drilled => "drilled",
            Self::SkippedNoAccess => "no access",
            Self::Error => "error",
        }
    }
}

/// Why a node ended in [`NodeStatus::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeFailure {
    /// The scan was cancelled before this node finished.
    Cancelled,
    /// The directory could not be probed.
    Io { message: String },
}

/// One directory in a scan result.
///
/// This is the owned, read-only form handed out by snapshots and the final
/// report. Live nodes are kept by the scanner's result tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanNode {
    /// Absolute directory path.
    pub path: PathBuf,

    /// Final path component (full path for a filesystem root).
    pub name: CompactString,

    /// Aggregate bytes of the directory's subtree.
    pub size_bytes: u64,

    /// Bytes of regular files directly inside the directory.
    pub immediate_file_bytes: u64,

    /// Distance from the scan root.
    pub depth: u32,

    /// Current lifecycle status.
    pub status: NodeStatus,

    /// The drill policy accepted this node.
    pub expanded: bool,

    /// The node itself was measured.
    pub measured: bool,

    /// This node and all descendants were measured without size-affecting skips.
    pub complete: bool,

    /// Entries skipped while measuring this subtree.
    pub skipped_entries: u64,

    /// Failure detail when `status` is `Error`.
    pub failure: Option<NodeFailure>,

    /// Child directories, sorted by size descending.
    pub children: Vec<ScanNode>,
}

impl ScanNode {
    /// Create a pending node.
    pub fn pending(path: impl Into<PathBuf>, depth: u32) -> Self {
        let path = path.into();
        Self {
            name: display_name(&path),
            path,
            size_bytes: 0,
            immediate_file_bytes: 0,
            depth,
            status: NodeStatus::Pending,
            expanded: false,
            measured: false,
            complete: false,
            skipped_entries: 0,
            failure: None,
            children: Vec::new(),
        }
    }

    /// A probed node with no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the node was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, Some(NodeFailure::Cancelled))
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Sum of children sizes.
    pub fn children_bytes(&self) -> u64 {
        self.children.iter().map(|c| c.size_bytes).sum()
    }

    /// Pre-order iterator over this subtree.
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter { stack: vec![self] }
    }

    /// Find a node by path.
    pub fn find(&self, path: &Path) -> Option<&ScanNode> {
        if self.path == path {
            return Some(self);
        }
        if !path.starts_with(&self.path) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(path))
    }

    /// Sort children by size descending (ties broken by path), recursively.
    pub fn sort_children_by_size(&mut self) {
        self.children
            .sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.path.cmp(&b.path)));
        for child in &mut self.children {
            child.sort_children_by_size();
        }
    }
}

/// Pre-order iterator over a [`ScanNode`] subtree.
pub struct NodeIter<'a> {
    stack: Vec<&'a ScanNode>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = &'a ScanNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Name shown for a path: its final component, or the whole path for roots.
pub fn display_name(path: &Path) -> CompactString {
    path.file_name()
        .map(|n| CompactString::new(n.to_string_lossy()))
        .unwrap_or_else(|| CompactString::new(path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(path: &str, size: u64) -> ScanNode {
        let mut node = ScanNode::pending(path, 1);
        node.size_bytes = size;
        node.status = NodeStatus::Drilled;
        node
    }

    #[test]
    fn test_status_forward_transitions() {
        use NodeStatus::*;
        assert!(Pending.can_advance_to(Probing));
        assert!(Probing.can_advance_to(Probed));
        assert!(Probing.can_advance_to(SkippedNoAccess));
        assert!(Probed.can_advance_to(Drilling));
        assert!(Probed.can_advance_to(Drilled));
        assert!(Drilling.can_advance_to(Drilled));
        assert!(Drilling.can_advance_to(Error));
        assert!(Pending.can_advance_to(Error));
    }

    #[test]
    fn test_status_rejects_backward_transitions() {
        use NodeStatus::*;
        assert!(!Probed.can_advance_to(Probing));
        assert!(!Drilled.can_advance_to(Drilling));
        assert!(!Drilled.can_advance_to(Error));
        assert!(!SkippedNoAccess.can_advance_to(Probing));
        assert!(!Pending.can_advance_to(Drilled));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(NodeStatus::Drilled.is_terminal());
        assert!(NodeStatus::SkippedNoAccess.is_terminal());
        assert!(NodeStatus::Error.is_terminal());
        assert!(!NodeStatus::Drilling.is_terminal());
        assert!(!NodeStatus::Probed.is_terminal());
    }

    #[test]
    fn test_sort_and_find() {
        let mut root = ScanNode::pending("/r", 0);
        root.children = vec![leaf("/r/a", 10), leaf("/r/b", 30), leaf("/r/c", 20)];
        root.sort_children_by_size();

        let names: Vec<_> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["b", "c", "a"]);
        assert_eq!(root.children_bytes(), 60);
        assert_eq!(root.node_count(), 4);
        assert_eq!(root.find(Path::new("/r/c")).map(|n| n.size_bytes), Some(20));
        assert!(root.find(Path::new("/other")).is_none());
    }

    #[test]
    fn test_display_name_for_root() {
        assert_eq!(display_name(Path::new("/")).as_str(), "/");
        assert_eq!(display_name(Path::new("/var/log")).as_str(), "log");
    }
}
