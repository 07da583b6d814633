//! Scan progress reporting.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use tokio::sync::broadcast;
use tracing::warn;

use crate::pool::PoolHandle;
use crate::result_tree::ResultTree;

/// Progress information during a scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Nodes that reached a terminal status.
    pub nodes_scanned: u64,
    /// Bytes accounted for by terminal nodes, each byte counted once.
    pub bytes_scanned: u64,
    /// Probe tasks queued or running.
    pub pending_task_count: u64,
    /// Distinct entries skipped so far.
    pub warnings_count: u64,
    /// Time elapsed since the scan started.
    pub elapsed: Duration,
    /// The scan has finished.
    pub done: bool,
}

impl ProgressSnapshot {
    /// Rough completion estimate in `0.0..=1.0`.
    ///
    /// This is `nodes / (nodes + pending)`. The number of nodes still to be
    /// discovered is unknown, so the value can move backwards when a drill
    /// queues new children.
    pub fn estimated_fraction(&self) -> f64 {
        if self.done {
            return 1.0;
        }
        let total = self.nodes_scanned + self.pending_task_count;
        if total == 0 {
            0.0
        } else {
            self.nodes_scanned as f64 / total as f64
        }
    }

    /// Calculate scan rate in nodes per second.
    pub fn nodes_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.nodes_scanned as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Calculate scan rate in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.bytes_scanned as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Derives snapshots from the live tree and the pool.
#[derive(Clone)]
pub struct ProgressTracker {
    tree: Arc<ResultTree>,
    pool: PoolHandle,
    started: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(tree: Arc<ResultTree>, pool: PoolHandle) -> Self {
        Self {
            tree,
            pool,
            started: Instant::now(),
        }
    }

    /// Current progress.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let (nodes_scanned, bytes_scanned, warnings_count) = self.tree.counters();
        let pending = self.pool.pending();
        ProgressSnapshot {
            nodes_scanned,
            bytes_scanned,
            pending_task_count: pending as u64,
            warnings_count,
            elapsed: self.started.elapsed(),
            done: pending == 0 && self.tree.is_root_terminal(),
        }
    }
}

/// Background thread publishing a snapshot every interval.
pub(crate) struct ProgressReporter {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub(crate) fn spawn(
        tracker: ProgressTracker,
        tx: broadcast::Sender<ProgressSnapshot>,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("drillscan-progress".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            // No receivers is fine.
                            let _ = tx.send(tracker.snapshot());
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    /// Stop publishing and join the thread.
    pub(crate) fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Progress reporter exited abnormally");
            }
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_fraction() {
        let mut snap = ProgressSnapshot::default();
        assert_eq!(snap.estimated_fraction(), 0.0);

        snap.nodes_scanned = 3;
        snap.pending_task_count = 1;
        assert_eq!(snap.estimated_fraction(), 0.75);

        snap.done = true;
        assert_eq!(snap.estimated_fraction(), 1.0);
    }

    #[test]
    fn test_rates() {
        let snap = ProgressSnapshot {
            nodes_scanned: 10,
            bytes_scanned: 2048,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(snap.nodes_per_second(), 5.0);
        assert_eq!(snap.bytes_per_second(), 1024.0);
        assert_eq!(ProgressSnapshot::default().bytes_per_second(), 0.0);
    }

    #[test]
    fn test_reporter_publishes_until_stopped() {
        let tree = Arc::new(ResultTree::new("/r"));
        let pool = crate::pool::WorkerPool::new(1, "test-pool").unwrap();
        let tracker = ProgressTracker::new(tree, pool.handle());
        let (tx, mut rx) = broadcast::channel(1024);

        let mut reporter =
            ProgressReporter::spawn(tracker, tx, Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(50));
        reporter.stop();

        let first = rx.try_recv().unwrap();
        assert!(!first.done);
        assert_eq!(first.nodes_scanned, 0);
    }
}
