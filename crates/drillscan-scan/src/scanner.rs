//! Drill-down scan scheduler.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use drillscan_core::{
    DrillPolicy, NodeFailure, NodeId, NodeStatus, ReportSink, ScanError, ScanJob, ScanNode,
    ScanReport, ScanWarning, WarningKind,
};

use crate::pool::{PoolHandle, WorkerPool};
use crate::probe::{ProbeOutcome, ProbeReport, SizeProbe};
use crate::progress::{ProgressReporter, ProgressSnapshot, ProgressTracker};
use crate::result_tree::ResultTree;

/// Everything a probe task needs, shared by all tasks of one job.
struct ScanContext {
    tree: Arc<ResultTree>,
    probe: SizeProbe,
    policy: DrillPolicy,
    pool: PoolHandle,
    cancel: Arc<AtomicBool>,
}

impl ScanContext {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn submit(self: &Arc<Self>, id: NodeId) {
        let ctx = Arc::clone(self);
        if !self.pool.submit(move || ctx.run_node(id)) {
            warn!(?id, "Worker pool closed; node left unscanned");
        }
    }

    /// Probe one node, apply the drill policy, and either queue its children
    /// or finish it.
    fn run_node(self: &Arc<Self>, id: NodeId) {
        if self.is_cancelled() {
            self.tree.write(id, |r| r.fail(NodeFailure::Cancelled));
            self.finish(id);
            return;
        }

        let Some((path, depth)) = self.tree.read(id, |r| (r.path.clone(), r.depth)) else {
            return;
        };
        if !self.tree.transition(id, NodeStatus::Probing) {
            return;
        }

        match self.probe.probe(&path, &self.cancel) {
            ProbeOutcome::NoAccess { message } => {
                self.tree.write(id, |r| {
                    r.status = NodeStatus::SkippedNoAccess;
                    r.size_bytes = 0;
                    r.measured = false;
                    r.self_complete = false;
                });
                self.tree.add_warnings([ScanWarning::new(
                    &path,
                    message,
                    WarningKind::PermissionDenied,
                )]);
            }
            ProbeOutcome::Failed { message } => {
                debug!(path = %path.display(), %message, "Probe failed");
                self.tree.write(id, |r| {
                    r.fail(NodeFailure::Io { message });
                    r.size_bytes = 0;
                });
            }
            ProbeOutcome::Cancelled { partial_bytes } => {
                self.tree.write(id, |r| {
                    if r.estimate.is_none() {
                        r.size_bytes = partial_bytes;
                    }
                    r.fail(NodeFailure::Cancelled);
                });
            }
            ProbeOutcome::Measured(report) => {
                if self.settle_measured(id, &path, depth, report) {
                    return;
                }
            }
        }

        self.finish(id);
    }

    /// Record a measured probe and apply the drill policy. Returns `true`
    /// when children were queued and the node is left `Drilling`.
    fn settle_measured(
        self: &Arc<Self>,
        id: NodeId,
        path: &Path,
        depth: u32,
        report: ProbeReport,
    ) -> bool {
        let drill = self.policy.should_drill(report.total_bytes, depth);
        debug!(
            path = %path.display(),
            size = report.total_bytes,
            depth,
            drill,
            "Probed"
        );

        let complete = report.is_complete();
        self.tree.write(id, |r| {
            r.size_bytes = report.total_bytes;
            r.immediate_file_bytes = report.immediate_file_bytes;
            r.measured = true;
            r.self_complete = complete;
            r.skipped_entries = report.warnings.len() as u64;
            r.expanded = drill;
        });
        self.tree.add_warnings(report.warnings);
        self.tree.transition(id, NodeStatus::Probed);

        if drill && !report.subdirs.is_empty() {
            if self.is_cancelled() {
                // Keeps the measured size.
                self.tree.write(id, |r| {
                    r.expanded = false;
                    r.fail(NodeFailure::Cancelled);
                });
                return false;
            }
            let children = self.tree.add_children(id, depth + 1, &report.subdirs);
            if !children.is_empty() {
                for child in children {
                    self.submit(child);
                }
                return true;
            }
        }
        if !complete {
            debug!(path = %path.display(), "Subtree measured with skipped entries");
        }
        self.tree.transition(id, NodeStatus::Drilled);
        false
    }

    /// Account for a node that just became terminal and propagate upward:
    /// the last child to finish reconciles its parent's size and moves the
    /// parent to `Drilled`.
    fn finish(&self, id: NodeId) {
        let mut current = id;
        loop {
            let Some((parent, own_bytes, size)) =
                self.tree.read(current, |r| (r.parent, r.own_bytes(), r.size_bytes))
            else {
                return;
            };
            self.tree.record_terminal(own_bytes);

            let Some(parent) = parent else {
                return;
            };

            let parent_done = self
                .tree
                .write(parent, |p| {
                    p.children_done += 1;
                    p.children_bytes += size;
                    if p.children_done < p.children.len()
                        || !p.status.can_advance_to(NodeStatus::Drilled)
                    {
                        return false;
                    }
                    p.size_bytes = p.immediate_file_bytes + p.children_bytes;
                    p.status = NodeStatus::Drilled;
                    true
                })
                .unwrap_or(false);

            if !parent_done {
                return;
            }
            current = parent;
        }
    }
}

/// Drill-down disk usage scanner.
///
/// Probes the root, and every directory the [`DrillPolicy`] accepts is
/// expanded into its subdirectories, each probed in turn on a fixed pool of
/// worker threads.
pub struct DrillScanner {
    progress_tx: broadcast::Sender<ProgressSnapshot>,
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl DrillScanner {
    /// Create a new scanner.
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            progress_tx,
            sinks: Vec::new(),
        }
    }

    /// Register a collaborator that receives every finished report.
    pub fn with_sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    /// Validate `job` and start scanning in the background.
    ///
    /// Every request error is returned here, before any task is queued.
    pub fn start(&self, job: &ScanJob) -> Result<ScanHandle, ScanError> {
        job.validate()?;

        let root_path = job
            .root
            .canonicalize()
            .map_err(|e| ScanError::root_io(&job.root, e))?;
        let root_metadata = fs::metadata(&root_path).map_err(|e| ScanError::root_io(&root_path, e))?;
        if !root_metadata.is_dir() {
            return Err(ScanError::NotADirectory { path: root_path });
        }
        // Surface an unreadable root now rather than as a skipped node.
        fs::read_dir(&root_path).map_err(|e| ScanError::root_io(&root_path, e))?;

        let pool = WorkerPool::new(job.worker_count(), "drillscan-worker")
            .map_err(|source| ScanError::WorkerSpawn { source })?;
        let tree = Arc::new(ResultTree::new(root_path.clone()));
        let cancel = Arc::new(AtomicBool::new(false));

        let tracker = ProgressTracker::new(Arc::clone(&tree), pool.handle());
        let reporter =
            ProgressReporter::spawn(tracker.clone(), self.progress_tx.clone(), job.progress_interval)
                .map_err(|source| ScanError::WorkerSpawn { source })?;

        let ctx = Arc::new(ScanContext {
            tree: Arc::clone(&tree),
            probe: SizeProbe::for_job(root_path.clone(), job, &root_metadata),
            policy: DrillPolicy::from(job),
            pool: pool.handle(),
            cancel: Arc::clone(&cancel),
        });

        info!(
            root = %root_path.display(),
            threshold = job.threshold_bytes,
            max_depth = job.max_depth,
            workers = pool.size(),
            "Starting drill-down scan"
        );
        ctx.submit(tree.root());

        Ok(ScanHandle {
            job: job.clone(),
            tree,
            pool,
            cancel,
            tracker,
            reporter: Some(reporter),
            progress_tx: self.progress_tx.clone(),
            sinks: self.sinks.clone(),
            started: Instant::now(),
        })
    }

    /// Run a scan to completion.
    pub fn scan(&self, job: &ScanJob) -> Result<ScanReport, ScanError> {
        Ok(self.start(job)?.wait())
    }
}

impl Default for DrillScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// A running scan.
///
/// Dropping the handle without calling [`wait`](Self::wait) cancels the scan.
pub struct ScanHandle {
    job: ScanJob,
    tree: Arc<ResultTree>,
    pool: WorkerPool,
    cancel: Arc<AtomicBool>,
    tracker: ProgressTracker,
    reporter: Option<ProgressReporter>,
    progress_tx: broadcast::Sender<ProgressSnapshot>,
    sinks: Vec<Arc<dyn ReportSink>>,
    started: Instant,
}

impl ScanHandle {
    /// Request cancellation. Running probes stop at their next entry and
    /// no further children are queued.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Current progress.
    pub fn progress(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    /// Point-in-time copy of the partial result.
    pub fn snapshot(&self) -> ScanNode {
        self.tree.snapshot()
    }

    /// Whether every task has finished.
    pub fn is_done(&self) -> bool {
        self.pool.pending() == 0 && self.tree.is_root_terminal()
    }

    /// Block until the scan drains, freeze the result and hand the report
    /// to every registered sink.
    pub fn wait(mut self) -> ScanReport {
        self.pool.wait_idle();

        let cancelled = self.is_cancelled();
        if cancelled || !self.tree.is_root_terminal() {
            self.tree.sweep_unfinished();
        }
        self.tree.freeze();

        if let Some(mut reporter) = self.reporter.take() {
            reporter.stop();
        }
        let mut last = self.tracker.snapshot();
        last.done = true;
        let _ = self.progress_tx.send(last);

        let report = ScanReport::new(
            self.tree.snapshot(),
            self.job.clone(),
            self.started.elapsed(),
            self.tree.warnings(),
            cancelled,
        );

        info!(
            root = %report.root_path.display(),
            total_size = report.total_size(),
            nodes = report.stats.total_nodes,
            expanded = report.stats.expanded_nodes,
            warnings = report.warnings.len(),
            cancelled,
            duration_ms = report.duration.as_millis() as u64,
            "Scan finished"
        );

        for sink in &self.sinks {
            if let Err(err) = sink.accept(&report) {
                warn!(sink = sink.name(), error = %err, "Report sink failed");
            }
        }

        report
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        if !self.tree.is_frozen() {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::probe::SubdirSize;
    use drillscan_core::ExcludeSet;
    use tempfile::TempDir;

    fn write_bytes(path: &Path, n: usize) {
        fs::write(path, vec![0u8; n]).unwrap();
    }

    fn job(root: &Path, threshold: u64, depth: u32) -> ScanJob {
        ScanJob::builder()
            .root(root)
            .threshold_bytes(threshold)
            .max_depth(depth)
            .threads(2usize)
            .build()
            .unwrap()
    }

    #[test]
    fn test_scan_single_directory() {
        let temp = TempDir::new().unwrap();
        write_bytes(&temp.path().join("a.bin"), 10);
        write_bytes(&temp.path().join("b.bin"), 20);

        let report = DrillScanner::new().scan(&job(temp.path(), 1, 3)).unwrap();

        assert_eq!(report.total_size(), 30);
        assert_eq!(report.root.status, NodeStatus::Drilled);
        // Large enough but nothing to drill into.
        assert!(report.root.expanded);
        assert!(report.root.is_leaf());
        assert!(report.is_complete());
    }

    #[test]
    fn test_empty_directory() {
        let temp = TempDir::new().unwrap();
        let report = DrillScanner::new().scan(&job(temp.path(), 1, 3)).unwrap();
        assert_eq!(report.total_size(), 0);
        assert!(!report.root.expanded);
        assert_eq!(report.stats.total_nodes, 1);
    }

    #[test]
    fn test_drilled_size_reconciles_with_children() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        write_bytes(&root.join("top.bin"), 5);
        write_bytes(&root.join("a/x.bin"), 50);
        write_bytes(&root.join("a/b/y.bin"), 500);

        let report = DrillScanner::new().scan(&job(root, 1, 5)).unwrap();

        assert_eq!(report.total_size(), 555);
        let a = &report.root.children[0];
        assert_eq!(a.size_bytes, 550);
        assert_eq!(a.immediate_file_bytes, 50);
        assert_eq!(a.children[0].size_bytes, 500);
        for node in report.root.iter() {
            if node.status == NodeStatus::Drilled && !node.is_leaf() {
                assert_eq!(node.size_bytes, node.immediate_file_bytes + node.children_bytes());
            }
        }
    }

    #[test]
    fn test_cancel_between_probe_and_drill_fails_node() {
        let pool = WorkerPool::new(1, "test-pool").unwrap();
        let tree = Arc::new(ResultTree::new("/r"));
        let ctx = Arc::new(ScanContext {
            tree: Arc::clone(&tree),
            probe: SizeProbe::new("/r", ExcludeSet::default(), None),
            policy: DrillPolicy::new(0, 5),
            pool: pool.handle(),
            cancel: Arc::new(AtomicBool::new(false)),
        });
        let root = tree.root();
        assert!(tree.transition(root, NodeStatus::Probing));

        // Raised after the probe returned, before any child is queued.
        ctx.cancel.store(true, Ordering::Relaxed);
        let report = ProbeReport {
            immediate_file_bytes: 10,
            file_count: 1,
            subdirs: vec![SubdirSize {
                path: PathBuf::from("/r/a"),
                bytes: 90,
            }],
            total_bytes: 100,
            warnings: Vec::new(),
        };
        let queued = ctx.settle_measured(root, Path::new("/r"), 0, report);
        ctx.finish(root);
        pool.wait_idle();

        assert!(!queued);
        assert_eq!(pool.pending(), 0);
        let node = tree.snapshot();
        assert_eq!(node.status, NodeStatus::Error);
        assert!(node.is_cancelled());
        assert!(node.measured);
        assert_eq!(node.size_bytes, 100);
        assert!(!node.complete);
        assert!(!node.expanded);
        assert!(node.children.is_empty());
        assert!(tree.is_root_terminal());
    }

    #[test]
    fn test_dropping_handle_cancels() {
        let temp = TempDir::new().unwrap();
        let handle = DrillScanner::new().start(&job(temp.path(), 1, 3)).unwrap();
        let cancel = Arc::clone(&handle.cancel);
        drop(handle);
        assert!(cancel.load(Ordering::Relaxed));
    }
}
