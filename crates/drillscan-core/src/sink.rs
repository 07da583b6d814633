//! Completion handoff for finished reports.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use thiserror::Error;

use crate::tree::ScanReport;

/// Errors a sink may report. They are logged by the scanner, never fatal.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing the report failed.
    #[error("I/O error writing report to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoding the report failed.
    #[error("Failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),

    /// Collaborator-specific failure.
    #[error("{message}")]
    Other { message: String },
}

/// Receives the frozen report once a scan is done.
///
/// Persistence and summarization collaborators implement this.
pub trait ReportSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Accept a finished report.
    fn accept(&self, report: &ScanReport) -> Result<(), SinkError>;
}

/// Writes the report as pretty-printed JSON to a file.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    /// Create a sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonFileSink {
    fn name(&self) -> &str {
        "json-file"
    }

    fn accept(&self, report: &ScanReport) -> Result<(), SinkError> {
        let io_err = |source| SinkError::Io {
            path: self.path.clone(),
            source,
        };
        let file = File::create(&self.path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, report)?;
        writer.flush().map_err(io_err)?;
        Ok(())
    }
}
