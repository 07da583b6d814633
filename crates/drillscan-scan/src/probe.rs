//! Single-directory size probe.

use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use jwalk::{Parallelism, WalkDirGeneric};
use tracing::trace;

use drillscan_core::{ExcludeSet, ScanJob, ScanWarning, WarningKind};

/// Per-entry state: set when a directory was left unread because it sits on
/// another filesystem.
type ProbeWalkState = ((), bool);

/// Size of one immediate subdirectory, measured over its whole subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdirSize {
    /// Subdirectory path.
    pub path: PathBuf,
    /// Bytes of all regular files beneath it.
    pub bytes: u64,
}

/// What a successful probe found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Bytes of regular files directly inside the directory.
    pub immediate_file_bytes: u64,
    /// Number of regular files directly inside the directory.
    pub file_count: u64,
    /// Immediate subdirectories with their subtree sizes, sorted by path.
    pub subdirs: Vec<SubdirSize>,
    /// `immediate_file_bytes + Σ subdirs.bytes`.
    pub total_bytes: u64,
    /// Entries that were skipped, with the reason.
    pub warnings: Vec<ScanWarning>,
}

impl ProbeReport {
    /// No skipped entry could have hidden bytes.
    pub fn is_complete(&self) -> bool {
        !self.warnings.iter().any(|w| w.kind.affects_size())
    }

    fn bytes_so_far(&self) -> u64 {
        self.immediate_file_bytes + self.subdirs.iter().map(|s| s.bytes).sum::<u64>()
    }
}

/// Result of probing one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The directory was read.
    Measured(ProbeReport),
    /// Permission denied on the directory itself.
    NoAccess { message: String },
    /// Any other failure on the directory itself.
    Failed { message: String },
    /// Cancellation was observed; `partial_bytes` is what had been counted.
    Cancelled { partial_bytes: u64 },
}

/// Measures directories below one scan root.
///
/// Symlinks are never followed: each one is reported as a skipped entry and
/// classified as leaving the root, forming a cycle, aliasing content inside
/// the root, or broken.
#[derive(Debug, Clone)]
pub struct SizeProbe {
    root: PathBuf,
    root_device: Option<u64>,
    excludes: ExcludeSet,
}

impl SizeProbe {
    /// Create a probe for the canonical `root`.
    ///
    /// `root_device` pins probing to one filesystem; `None` allows crossing.
    pub fn new(root: impl Into<PathBuf>, excludes: ExcludeSet, root_device: Option<u64>) -> Self {
        Self {
            root: root.into(),
            root_device,
            excludes,
        }
    }

    /// Create a probe from a job and the root's metadata.
    pub fn for_job(root: impl Into<PathBuf>, job: &ScanJob, root_metadata: &Metadata) -> Self {
        let device = (!job.cross_filesystems).then(|| get_dev(root_metadata));
        Self::new(root, job.exclude_set(), device)
    }

    /// Probe `dir`: immediate file bytes, immediate subdirectories and the
    /// size of each subdirectory's subtree.
    ///
    /// `cancel` is checked after every entry.
    pub fn probe(&self, dir: &Path, cancel: &AtomicBool) -> ProbeOutcome {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                return ProbeOutcome::NoAccess {
                    message: err.to_string(),
                };
            }
            Err(err) => {
                return ProbeOutcome::Failed {
                    message: err.to_string(),
                };
            }
        };

        let mut report = ProbeReport::default();

        for entry in entries {
            if cancel.load(Ordering::Relaxed) {
                return ProbeOutcome::Cancelled {
                    partial_bytes: report.bytes_so_far(),
                };
            }

            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    report.warnings.push(ScanWarning::from_io(dir, &err, false));
                    continue;
                }
            };
            let path = entry.path();

            if self.excludes.is_excluded(&path) {
                trace!(path = %path.display(), "excluded");
                continue;
            }

            let metadata = match fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(err) => {
                    report.warnings.push(ScanWarning::from_io(&path, &err, true));
                    continue;
                }
            };

            let file_type = metadata.file_type();
            if file_type.is_symlink() {
                report.warnings.push(self.classify_symlink(&path));
            } else if file_type.is_dir() {
                if !self.same_filesystem(&metadata) {
                    report.warnings.push(ScanWarning::cross_filesystem(&path));
                    continue;
                }
                match self.measure_subtree(&path, cancel, &mut report.warnings) {
                    Some(bytes) => report.subdirs.push(SubdirSize { path, bytes }),
                    None => {
                        return ProbeOutcome::Cancelled {
                            partial_bytes: report.bytes_so_far(),
                        };
                    }
                }
            } else if file_type.is_file() {
                report.immediate_file_bytes += metadata.len();
                report.file_count += 1;
            }
        }

        report.subdirs.sort_by(|a, b| a.path.cmp(&b.path));
        report.total_bytes = report.bytes_so_far();
        ProbeOutcome::Measured(report)
    }

    /// Sum regular file bytes beneath `dir`. Returns `None` on cancellation.
    fn measure_subtree(
        &self,
        dir: &Path,
        cancel: &AtomicBool,
        warnings: &mut Vec<ScanWarning>,
    ) -> Option<u64> {
        let excludes = self.excludes.clone();
        let root_device = self.root_device;

        let walker = WalkDirGeneric::<ProbeWalkState>::new(dir)
            .parallelism(Parallelism::Serial)
            .skip_hidden(false)
            .follow_links(false)
            .process_read_dir(move |_depth, _path, _state, children| {
                if !excludes.is_empty() {
                    children.retain(|child| match child {
                        Ok(entry) => !excludes.is_excluded(&entry.path()),
                        Err(_) => true,
                    });
                }
                let Some(device) = root_device else {
                    return;
                };
                for entry in children.iter_mut().flatten() {
                    if entry.file_type.is_dir()
                        && entry.metadata().is_ok_and(|m| get_dev(&m) != device)
                    {
                        entry.read_children_path = None;
                        entry.client_state = true;
                    }
                }
            });

        let mut total: u64 = 0;
        let mut unreadable: HashSet<PathBuf> = HashSet::new();
        let mut record = |warning: ScanWarning, warnings: &mut Vec<ScanWarning>| {
            if unreadable.insert(warning.path.clone()) {
                warnings.push(warning);
            }
        };

        for entry_result in walker {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }

            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    record(walk_warning(&err, dir), warnings);
                    continue;
                }
            };
            if let Some(err) = entry.read_children_error.as_ref() {
                record(walk_warning(err, &entry.path()), warnings);
            }
            if entry.depth() == 0 {
                continue;
            }

            let file_type = entry.file_type();
            if entry.client_state {
                warnings.push(ScanWarning::cross_filesystem(entry.path()));
            } else if file_type.is_symlink() {
                warnings.push(self.classify_symlink(&entry.path()));
            } else if file_type.is_file() {
                match entry.metadata() {
                    Ok(m) => total += m.len(),
                    Err(err) => warnings.push(walk_warning(&err, &entry.path())),
                }
            }
        }

        Some(total)
    }

    fn same_filesystem(&self, metadata: &Metadata) -> bool {
        self.root_device.is_none_or(|device| get_dev(metadata) == device)
    }

    /// Classify a symlink that will not be followed.
    fn classify_symlink(&self, link: &Path) -> ScanWarning {
        let target = fs::read_link(link)
            .map(|t| t.to_string_lossy().to_string())
            .unwrap_or_default();

        let kind = match fs::canonicalize(link) {
            Err(_) => WarningKind::BrokenSymlink,
            Ok(resolved) if !resolved.starts_with(&self.root) => WarningKind::SymlinkOutsideRoot,
            Ok(resolved) if link.parent().is_some_and(|p| p.starts_with(&resolved)) => {
                WarningKind::SymlinkCycle
            }
            Ok(_) => WarningKind::SymlinkInsideRoot,
        };
        trace!(link = %link.display(), ?kind, "symlink skipped");
        ScanWarning::symlink(link, &target, kind)
    }
}

fn walk_warning(err: &jwalk::Error, fallback: &Path) -> ScanWarning {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| fallback.to_path_buf());
    match err.io_error() {
        Some(io) => ScanWarning::from_io(path, io, false),
        None => ScanWarning::new(path, err.to_string(), WarningKind::ReadError),
    }
}

/// Get the device ID from metadata.
#[cfg(unix)]
fn get_dev(metadata: &Metadata) -> u64 {
    metadata.dev()
}

#[cfg(not(unix))]
fn get_dev(_metadata: &Metadata) -> u64 {
    0
}
