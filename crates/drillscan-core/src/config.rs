//! Scan job configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Default drill threshold: 1 GiB.
pub const DEFAULT_THRESHOLD_BYTES: u64 = 1 << 30;

/// Default maximum drill depth.
pub const DEFAULT_MAX_DEPTH: u32 = 5;

/// Smallest accepted `max_depth`.
pub const MIN_DEPTH: u32 = 1;

/// Largest accepted `max_depth`.
pub const MAX_DEPTH_LIMIT: u32 = 10;

/// Default interval between progress snapshots.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// One scan request.
///
/// The threshold and depth bound are carried here and passed explicitly to
/// the drill policy; nothing about a scan is process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanJob {
    /// Root directory to scan.
    pub root: PathBuf,

    /// Minimum aggregate size (bytes) that makes a directory worth drilling.
    #[builder(default = "DEFAULT_THRESHOLD_BYTES")]
    #[serde(default = "default_threshold")]
    pub threshold_bytes: u64,

    /// Maximum drill depth, in `[1, 10]`. Nodes at this depth are never drilled.
    #[builder(default = "DEFAULT_MAX_DEPTH")]
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Number of worker threads (0 = available parallelism).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Paths left out of the scan entirely (case-insensitive prefix match).
    #[builder(default)]
    #[serde(default)]
    pub exclude_paths: Vec<PathBuf>,

    /// Descend into directories that live on another filesystem.
    #[builder(default = "false")]
    #[serde(default)]
    pub cross_filesystems: bool,

    /// How often progress snapshots are published.
    #[builder(default = "DEFAULT_PROGRESS_INTERVAL")]
    #[serde(default = "default_progress_interval")]
    pub progress_interval: Duration,
}

fn default_threshold() -> u64 {
    DEFAULT_THRESHOLD_BYTES
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_progress_interval() -> Duration {
    DEFAULT_PROGRESS_INTERVAL
}

impl ScanJobBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.root {
            Some(ref root) if root.as_os_str().is_empty() => {
                return Err("Root path cannot be empty".to_string());
            }
            None => return Err("Root path is required".to_string()),
            _ => {}
        }
        if let Some(depth) = self.max_depth {
            check_depth(depth)?;
        }
        Ok(())
    }
}

fn check_depth(depth: u32) -> Result<(), String> {
    if (MIN_DEPTH..=MAX_DEPTH_LIMIT).contains(&depth) {
        Ok(())
    } else {
        Err(format!(
            "max_depth must be between {MIN_DEPTH} and {MAX_DEPTH_LIMIT}, got {depth}"
        ))
    }
}

impl ScanJob {
    /// Create a new scan job builder.
    pub fn builder() -> ScanJobBuilder {
        ScanJobBuilder::default()
    }

    /// Create a job for `root` with default threshold and depth.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
            threads: 0,
            exclude_paths: Vec::new(),
            cross_filesystems: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Check the job's own values. Root existence is checked by the scanner.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.root.as_os_str().is_empty() {
            return Err(ScanError::invalid("Root path cannot be empty"));
        }
        check_depth(self.max_depth).map_err(ScanError::invalid)?;
        if self.progress_interval.is_zero() {
            return Err(ScanError::invalid("progress_interval must be non-zero"));
        }
        Ok(())
    }

    /// Resolve the configured thread count.
    pub fn worker_count(&self) -> usize {
        match self.threads {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            n => n,
        }
    }

    /// Build the exclusion matcher for this job, with every entry resolved
    /// against the current directory.
    pub fn exclude_set(&self) -> ExcludeSet {
        ExcludeSet::resolved(&self.exclude_paths)
    }
}

impl Default for ScanJob {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Case-insensitive path-prefix exclusion list.
///
/// A path is excluded when it equals an entry or lies beneath one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeSet {
    prefixes: Vec<String>,
}

impl ExcludeSet {
    /// Build from raw paths. Blank entries are dropped.
    pub fn new<P: AsRef<Path>>(paths: &[P]) -> Self {
        let prefixes = paths
            .iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    /// Build from user-supplied paths. Relative entries are made absolute
    /// against the current directory and symlinks are resolved, so entries
    /// compare equal to canonical scan paths. An entry that does not exist
    /// is only made absolute.
    pub fn resolved<P: AsRef<Path>>(paths: &[P]) -> Self {
        let resolved: Vec<PathBuf> = paths.iter().map(|p| resolve(p.as_ref())).collect();
        Self::new(&resolved)
    }

    /// Returns true when nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Check whether `path` is excluded.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.prefixes.is_empty() {
            return false;
        }
        let candidate = normalize(path);
        self.prefixes.iter().any(|prefix| {
            candidate == *prefix
                || (prefix == "/" && candidate.starts_with('/'))
                || (candidate.starts_with(prefix.as_str())
                    && candidate.as_bytes().get(prefix.len()) == Some(&b'/'))
        })
    }
}

fn resolve(path: &Path) -> PathBuf {
    if path.to_string_lossy().trim().is_empty() {
        return path.to_path_buf();
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    fs::canonicalize(&absolute).unwrap_or(absolute)
}

fn normalize(path: &Path) -> String {
    let lowered = path.to_string_lossy().trim().to_lowercase().replace('\\', "/");
    let trimmed = lowered.trim_end_matches('/');
    if trimmed.is_empty() && lowered.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
