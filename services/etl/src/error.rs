//! Error types for the ETL stages.
//!
//! Resource-scoped failures ([`ExtractError`], collector errors) are caught by
//! the orchestrator and recorded; [`PipelineError`] is what aborts a run.

use ida_collector::CollectorError;

use crate::pipeline::RunSummary;

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} env var missing")]
    Missing(&'static str),

    #[error("{key}: cannot parse '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("{0}")]
    OutOfRange(String),
}

/// Failures turning spreadsheet bytes into an extracted table.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("service {0} has no sheet mapping")]
    UnknownServiceMapping(String),

    #[error("failed to read workbook {file}: {reason}")]
    SheetRead { file: String, reason: String },

    #[error("sheet '{sheet}' not found in {file} (available: {available})")]
    SheetMissing {
        file: String,
        sheet: String,
        available: String,
    },

    #[error("sheet '{sheet}' in {file} is malformed: {reason}")]
    MalformedSheet {
        file: String,
        sheet: String,
        reason: String,
    },

    #[error("no extractor for resource format '{0}'")]
    UnsupportedFormat(String),
}

/// Why a single resource was skipped. Recorded, never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error(transparent)]
    Fetch(#[from] CollectorError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Failures talking to the warehouse.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A batch was rolled back; earlier batches of the same load stay committed.
    #[error("batch {index} rolled back after {inserted_before} rows committed: {source}")]
    Batch {
        index: usize,
        inserted_before: u64,
        #[source]
        source: Box<LoadError>,
    },

    #[error("warehouse not ready: {0}")]
    NotReady(String),

    #[error("warehouse state lock poisoned")]
    Poisoned,
}

impl LoadError {
    /// Rows committed by earlier batches before this error.
    pub fn committed_rows(&self) -> u64 {
        match self {
            LoadError::Batch {
                inserted_before, ..
            } => *inserted_before,
            _ => 0,
        }
    }
}

/// Failures that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("preflight check failed: {0}")]
    Preflight(#[source] LoadError),

    /// The final flush failed; the summary reflects everything before it.
    #[error("final flush failed: {source}")]
    FinalFlush {
        #[source]
        source: LoadError,
        summary: Box<RunSummary>,
    },
}
