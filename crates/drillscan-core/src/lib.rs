//! Core types for drillscan.
//!
//! This crate holds the data model shared by the scanning engine and its
//! consumers: scan jobs and their configuration, the drill policy, node and
//! report types, the error taxonomy, and the completion handoff trait.

mod config;
mod error;
mod node;
mod policy;
mod sink;
mod tree;

pub use config::{
    DEFAULT_MAX_DEPTH, DEFAULT_PROGRESS_INTERVAL, DEFAULT_THRESHOLD_BYTES, ExcludeSet,
    MAX_DEPTH_LIMIT, MIN_DEPTH, ScanJob, ScanJobBuilder, ScanJobBuilderError,
};
pub use error::{ScanError, ScanWarning, WarningKind};
pub use node::{NodeFailure, NodeId, NodeIter, NodeStatus, ScanNode, display_name};
pub use policy::{DrillPolicy, should_drill};
pub use sink::{JsonFileSink, ReportSink, SinkError};
pub use tree::{LargeFolder, ScanReport, TreeStats};
