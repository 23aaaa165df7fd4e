//! Error types for the transcoder.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for transcoder operations
pub type Result<T> = std::result::Result<T, TranscoError>;

/// Errors that abort a run.
///
/// Field-level problems never show up here: they are absorbed by the record
/// processor and surface as reject messages instead.
#[derive(Error, Debug)]
pub enum TranscoError {
    /// Failed to open, read or write a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reference or descriptor file could not be parsed as delimited text
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Missing or malformed reference/layout file
    #[error("Invalid configuration file {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    /// Column descriptor does not describe the expected columns
    #[error("Unexpected column layout in {}: expected \"{expected}\", found \"{found}\"", path.display())]
    UnexpectedHeader {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// Accounting date is not a calendar date in YYYYMMDD form
    #[error("Invalid accounting date \"{0}\": expected a calendar date in YYYYMMDD format")]
    InvalidDate(String),

    /// Worker pool could not be started
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// A worker failed outright while processing a chunk
    #[error("Worker failed on chunk {chunk}: {message}")]
    WorkerFailed { chunk: usize, message: String },

    /// A chunk of the current batch never produced a result
    #[error("Chunk {chunk} of {expected} never reported a result")]
    MissingChunk { chunk: usize, expected: usize },
}

impl TranscoError {
    pub(crate) fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        TranscoError::Config {
            path: path.into(),
            message: message.into(),
        }
    }
}
