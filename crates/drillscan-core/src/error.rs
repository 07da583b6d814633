//! Error and warning types for scanning operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that fail a scan request as a whole.
///
/// Everything that goes wrong after the first task is queued is recorded on
/// nodes and warnings instead; these variants only come out of request
/// validation and pool start-up.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The job's configuration is out of range.
    #[error("Invalid scan request: {message}")]
    InvalidRequest { message: String },

    /// Root path does not exist.
    #[error("Root path not found: {path}")]
    RootNotFound { path: PathBuf },

    /// Root path exists but cannot be read.
    #[error("Permission denied on root path: {path}")]
    RootNoAccess { path: PathBuf },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Unexpected I/O error while validating the root.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Worker threads could not be started.
    #[error("Failed to spawn scan worker: {source}")]
    WorkerSpawn {
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Create an invalid-request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Classify an I/O error on the root path.
    pub fn root_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::RootNoAccess { path },
            std::io::ErrorKind::NotFound => Self::RootNotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether the request itself was rejected before any work started.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::RootNotFound { .. }
                | Self::RootNoAccess { .. }
                | Self::NotADirectory { .. }
        )
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied on a nested entry.
    PermissionDenied,
    /// Error reading a directory.
    ReadError,
    /// Error reading metadata.
    MetadataError,
    /// Symlink target does not exist.
    BrokenSymlink,
    /// Symlink pointing outside the scan root; not followed.
    SymlinkOutsideRoot,
    /// Symlink pointing at one of its own ancestors; not followed.
    SymlinkCycle,
    /// Symlink to content already counted inside the scan root; not followed.
    SymlinkInsideRoot,
    /// Filesystem boundary crossed (when not allowed).
    CrossFilesystem,
}

impl WarningKind {
    /// Whether the warning means some bytes may be missing from a size.
    pub fn affects_size(self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::ReadError | Self::MetadataError
        )
    }
}

/// Non-fatal warning encountered during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Classify an I/O error on a nested entry.
    pub fn from_io(path: impl Into<PathBuf>, error: &std::io::Error, metadata: bool) -> Self {
        let path = path.into();
        let kind = match error.kind() {
            std::io::ErrorKind::PermissionDenied => WarningKind::PermissionDenied,
            _ if metadata => WarningKind::MetadataError,
            _ => WarningKind::ReadError,
        };
        Self {
            message: format!("{error}"),
            path,
            kind,
        }
    }

    /// Create a skipped-symlink warning.
    pub fn symlink(path: impl Into<PathBuf>, target: &str, kind: WarningKind) -> Self {
        let path = path.into();
        let reason = match kind {
            WarningKind::BrokenSymlink => "broken symlink",
            WarningKind::SymlinkOutsideRoot => "symlink leaves scan root",
            WarningKind::SymlinkCycle => "symlink cycle",
            _ => "symlink not followed",
        };
        Self {
            message: format!("{reason}: {} -> {target}", path.display()),
            path,
            kind,
        }
    }

    /// Create a cross-filesystem warning.
    pub fn cross_filesystem(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            message: format!("Different filesystem, skipped: {}", path.display()),
            path,
            kind: WarningKind::CrossFilesystem,
        }
    }
}
