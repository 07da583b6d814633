//! Shared, concurrently updated scan result.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use drillscan_core::{NodeFailure, NodeId, NodeStatus, ScanNode, ScanWarning, display_name};

use crate::probe::SubdirSize;

/// Live state of one node.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub path: PathBuf,
    pub depth: u32,
    pub parent: Option<NodeId>,
    pub status: NodeStatus,
    pub size_bytes: u64,
    pub immediate_file_bytes: u64,
    pub expanded: bool,
    pub measured: bool,
    /// This node's own probe saw no size-affecting skip.
    pub self_complete: bool,
    pub skipped_entries: u64,
    pub failure: Option<NodeFailure>,
    pub children: Vec<NodeId>,
    /// Children that reached a terminal status.
    pub children_done: usize,
    /// Sum of terminal children's sizes.
    pub children_bytes: u64,
    /// Size the parent's probe measured for this subtree.
    pub estimate: Option<u64>,
}

impl NodeRecord {
    fn pending(path: PathBuf, depth: u32, parent: Option<NodeId>, estimate: Option<u64>) -> Self {
        Self {
            path,
            depth,
            parent,
            status: NodeStatus::Pending,
            size_bytes: 0,
            immediate_file_bytes: 0,
            expanded: false,
            measured: false,
            self_complete: false,
            skipped_entries: 0,
            failure: None,
            children: Vec::new(),
            children_done: 0,
            children_bytes: 0,
            estimate,
        }
    }

    /// Bytes this node adds to the scan total once terminal: its whole size
    /// as a leaf, only its own files when children account for the rest.
    pub fn own_bytes(&self) -> u64 {
        if self.children.is_empty() {
            self.size_bytes
        } else {
            self.immediate_file_bytes
        }
    }

    /// Mark the node failed. Unstarted nodes fall back to the parent's estimate.
    pub fn fail(&mut self, failure: NodeFailure) {
        if matches!(self.status, NodeStatus::Pending | NodeStatus::Probing) {
            self.measured = false;
            self.size_bytes = self.estimate.unwrap_or(self.size_bytes);
        }
        self.status = NodeStatus::Error;
        self.self_complete = false;
        self.failure = Some(failure);
    }

    fn to_scan_node(&self) -> ScanNode {
        ScanNode {
            path: self.path.clone(),
            name: display_name(&self.path),
            size_bytes: self.size_bytes,
            immediate_file_bytes: self.immediate_file_bytes,
            depth: self.depth,
            status: self.status,
            expanded: self.expanded,
            measured: self.measured,
            complete: self.self_complete && self.status.is_terminal(),
            skipped_entries: self.skipped_entries,
            failure: self.failure.clone(),
            children: Vec::new(),
        }
    }
}

/// Node store shared by the scheduler and its readers.
///
/// Records live in a sharded map so concurrent writers only contend when
/// they touch the same shard. Writers hold the snapshot gate shared;
/// [`snapshot`](Self::snapshot) holds it exclusively, so a snapshot never
/// observes half of a multi-record update.
///
/// No method holds two map references at once.
pub struct ResultTree {
    nodes: DashMap<NodeId, NodeRecord>,
    root: NodeId,
    next_id: AtomicU64,
    gate: RwLock<()>,
    frozen: AtomicBool,
    warnings: DashMap<PathBuf, ScanWarning>,
    terminal_nodes: AtomicU64,
    terminal_bytes: AtomicU64,
}

impl ResultTree {
    /// Create a tree with a single pending root node.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        let root = NodeId::new(0);
        let nodes = DashMap::new();
        nodes.insert(root, NodeRecord::pending(root_path.into(), 0, None, None));
        Self {
            nodes,
            root,
            next_id: AtomicU64::new(1),
            gate: RwLock::new(()),
            frozen: AtomicBool::new(false),
            warnings: DashMap::new(),
            terminal_nodes: AtomicU64::new(0),
            terminal_bytes: AtomicU64::new(0),
        }
    }

    /// Root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Mutate one record. Returns `None` if the node is unknown or the
    /// tree is frozen.
    pub(crate) fn write<R>(&self, id: NodeId, f: impl FnOnce(&mut NodeRecord) -> R) -> Option<R> {
        let _gate = self.gate.read();
        if self.reject_frozen() {
            return None;
        }
        self.nodes.get_mut(&id).map(|mut record| f(record.value_mut()))
    }

    /// Read one record.
    pub fn read<R>(&self, id: NodeId, f: impl FnOnce(&NodeRecord) -> R) -> Option<R> {
        self.nodes.get(&id).map(|record| f(record.value()))
    }

    /// Move a node forward. Returns `false` and leaves the node untouched if
    /// `next` is not a legal successor of its status.
    pub(crate) fn transition(&self, id: NodeId, next: NodeStatus) -> bool {
        self.write(id, |record| {
            if record.status.can_advance_to(next) {
                record.status = next;
                true
            } else {
                debug!(
                    path = %record.path.display(),
                    from = record.status.label(),
                    to = next.label(),
                    "Ignoring backward status change"
                );
                false
            }
        })
        .unwrap_or(false)
    }

    /// Append one pending child per subdirectory and move the parent to
    /// `Drilling`, as one step with respect to snapshots.
    pub(crate) fn add_children(
        &self,
        parent: NodeId,
        depth: u32,
        subdirs: &[SubdirSize],
    ) -> Vec<NodeId> {
        let _gate = self.gate.read();
        if self.reject_frozen() {
            return Vec::new();
        }

        let ids: Vec<NodeId> = subdirs
            .iter()
            .map(|subdir| {
                let id = NodeId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
                let record =
                    NodeRecord::pending(subdir.path.clone(), depth, Some(parent), Some(subdir.bytes));
                self.nodes.insert(id, record);
                id
            })
            .collect();

        let linked = self.nodes.get_mut(&parent).is_some_and(|mut record| {
            if !record.status.can_advance_to(NodeStatus::Drilling) {
                return false;
            }
            record.status = NodeStatus::Drilling;
            record.children = ids.clone();
            true
        });

        if linked {
            ids
        } else {
            for id in &ids {
                self.nodes.remove(id);
            }
            Vec::new()
        }
    }

    /// Record entries skipped during a probe. Each path is kept once.
    pub(crate) fn add_warnings(&self, warnings: impl IntoIterator<Item = ScanWarning>) {
        for warning in warnings {
            self.warnings.entry(warning.path.clone()).or_insert(warning);
        }
    }

    /// Count a node that just became terminal.
    pub(crate) fn record_terminal(&self, own_bytes: u64) {
        self.terminal_nodes.fetch_add(1, Ordering::Relaxed);
        self.terminal_bytes.fetch_add(own_bytes, Ordering::Relaxed);
    }

    /// `(terminal nodes, bytes accounted by terminal nodes, distinct warnings)`.
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.terminal_nodes.load(Ordering::Relaxed),
            self.terminal_bytes.load(Ordering::Relaxed),
            self.warnings.len() as u64,
        )
    }

    /// Whether the root reached a terminal status.
    pub fn is_root_terminal(&self) -> bool {
        self.read(self.root, |r| r.status.is_terminal()).unwrap_or(false)
    }

    /// Point-in-time deep copy of the tree.
    ///
    /// Children exist only on nodes that reached `Drilling` (a cancelled
    /// drill keeps them) and are sorted by size descending. A node is
    /// `complete` only when it is terminal, its own probe was complete and
    /// every child is complete.
    pub fn snapshot(&self) -> ScanNode {
        let _gate = self.gate.write();
        let mut root = self
            .build(self.root)
            .unwrap_or_else(|| ScanNode::pending(PathBuf::new(), 0));
        root.sort_children_by_size();
        root
    }

    fn build(&self, id: NodeId) -> Option<ScanNode> {
        // Copy out and release the shard before descending.
        let (mut node, children) =
            self.read(id, |record| (record.to_scan_node(), record.children.clone()))?;

        for child in children {
            if let Some(child) = self.build(child) {
                node.complete &= child.complete;
                node.children.push(child);
            }
        }
        Some(node)
    }

    /// Fail every node that is not yet terminal with `Cancelled`.
    ///
    /// Returns the number of nodes swept.
    pub(crate) fn sweep_unfinished(&self) -> usize {
        let _gate = self.gate.read();
        if self.reject_frozen() {
            return 0;
        }
        let mut swept = 0;
        for mut entry in self.nodes.iter_mut() {
            let record = entry.value_mut();
            if record.status.is_terminal() {
                continue;
            }
            record.fail(NodeFailure::Cancelled);
            self.record_terminal(record.own_bytes());
            swept += 1;
        }
        if swept > 0 {
            debug!(swept, "Marked unfinished nodes as cancelled");
        }
        swept
    }

    /// Make the tree read-only.
    pub fn freeze(&self) {
        let _gate = self.gate.write();
        self.frozen.store(true, Ordering::Release);
    }

    /// Whether the tree is read-only.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// All distinct skipped entries, sorted by path.
    pub fn warnings(&self) -> Vec<ScanWarning> {
        let mut warnings: Vec<ScanWarning> =
            self.warnings.iter().map(|entry| entry.value().clone()).collect();
        warnings.sort_by(|a, b| a.path.cmp(&b.path));
        warnings
    }

    fn reject_frozen(&self) -> bool {
        let frozen = self.is_frozen();
        if frozen {
            warn!("Write to a frozen scan result ignored");
        }
        frozen
    }
}
