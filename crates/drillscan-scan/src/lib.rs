//! Drill-down scanning engine for drillscan.
//!
//! This crate measures directory sizes and expands only the subtrees that
//! are large enough to matter.
//!
//! # Overview
//!
//! `drillscan-scan` probes the scan root, asks the [`DrillPolicy`] whether
//! it is worth expanding, and if so probes each of its subdirectories the
//! same way. Key features:
//!
//! - **Adaptive expansion** bounded by a size threshold and a maximum depth
//! - **Fixed worker pool** where tasks queue their own children
//! - **Live snapshots** of the partial tree while the scan runs
//! - **Progress updates** via broadcast channels
//! - **Cancellation** that leaves every node in a terminal state
//!
//! # Example
//!
//! ```rust,no_run
//! use drillscan_scan::{DrillScanner, ScanJob};
//!
//! let job = ScanJob::new("/path/to/scan");
//! let report = DrillScanner::new().scan(&job).unwrap();
//!
//! println!("Total size: {} bytes", report.total_size());
//! for folder in report.large_folders() {
//!     println!("{} {}", folder.size_bytes, folder.path.display());
//! }
//! ```
//!
//! # Progress Monitoring
//!
//! Subscribe to real-time progress updates:
//!
//! ```rust,no_run
//! use drillscan_scan::{DrillScanner, ScanJob};
//!
//! let scanner = DrillScanner::new();
//! let mut progress_rx = scanner.subscribe();
//!
//! // Handle progress in a separate thread
//! std::thread::spawn(move || {
//!     while let Ok(progress) = progress_rx.blocking_recv() {
//!         println!("Scanned {} directories", progress.nodes_scanned);
//!     }
//! });
//!
//! let handle = scanner.start(&ScanJob::new("/path/to/scan")).unwrap();
//! let report = handle.wait();
//! ```

mod pool;
mod probe;
mod progress;
mod result_tree;
mod scanner;

pub use pool::{PoolHandle, WorkerPool};
pub use probe::{ProbeOutcome, ProbeReport, SizeProbe, SubdirSize};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use result_tree::{NodeRecord, ResultTree};
pub use scanner::{DrillScanner, ScanHandle};

// Re-export core types for convenience
pub use drillscan_core::{
    DrillPolicy, ExcludeSet, JsonFileSink, LargeFolder, NodeFailure, NodeId, NodeStatus,
    ReportSink, ScanError, ScanJob, ScanNode, ScanReport, ScanWarning, SinkError, TreeStats,
    WarningKind, should_drill,
};
