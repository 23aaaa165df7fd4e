//! Run configuration.

use crate::error::{Result, TranscoError};
use crate::reject::DEFAULT_REJECT_THRESHOLD;
use crate::schema::Variant;
use chrono::NaiveDate;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming the reference directory.
pub const REFERENCE_DIR_ENV: &str = "RDJ_DAT";

pub const OUTPUT_EXTENSION: &str = ".out";
pub const REJECT_EXTENSION: &str = ".rej";

/// Accounting date, validated as a real calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountingDate(NaiveDate);

impl AccountingDate {
    /// `YYYYMMDD`, as written into record headers.
    pub fn compact(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl FromStr for AccountingDate {
    type Err = TranscoError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TranscoError::InvalidDate(s.to_string()));
        }
        NaiveDate::parse_from_str(s, "%Y%m%d")
            .map(AccountingDate)
            .map_err(|_| TranscoError::InvalidDate(s.to_string()))
    }
}

impl fmt::Display for AccountingDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact())
    }
}

/// Selects which classification data file is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Site {
    #[default]
    Default,
    Casa,
}

impl Site {
    pub fn classification_file(&self) -> &'static str {
        match self {
            Site::Default => "REF_RCA_CPT.dat",
            Site::Casa => "REF_RCA_CPT_CAS.dat",
        }
    }
}

impl FromStr for Site {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "" | "NULL" => Ok(Site::Default),
            "CASA" => Ok(Site::Casa),
            other => Err(format!("unknown site \"{}\" (expected NULL or CASA)", other)),
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Site::Default => f.write_str("NULL"),
            Site::Casa => f.write_str("CASA"),
        }
    }
}

/// Batching and parallelism knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Records read before a batch is dispatched.
    pub batch_size: usize,
    /// Records per chunk handed to one worker task.
    pub chunk_size: usize,
    pub workers: usize,
    /// Processed-record interval between progress log lines.
    pub progress_interval: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            batch_size: 80_000,
            chunk_size: 10_000,
            workers: 8,
            progress_interval: 100_000,
        }
    }
}

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub accounting_date: AccountingDate,
    pub site: Site,
    pub variant: Variant,
    pub reference_dir: PathBuf,
    pub pipeline: PipelineSettings,
    pub reject_threshold: usize,
}

impl RunConfig {
    pub fn new(
        input: impl Into<PathBuf>,
        accounting_date: AccountingDate,
        variant: Variant,
        reference_dir: impl Into<PathBuf>,
    ) -> Self {
        RunConfig {
            input: input.into(),
            accounting_date,
            site: Site::default(),
            variant,
            reference_dir: reference_dir.into(),
            pipeline: PipelineSettings::default(),
            reject_threshold: DEFAULT_REJECT_THRESHOLD,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        with_suffix(&self.input, OUTPUT_EXTENSION)
    }

    pub fn reject_path(&self) -> PathBuf {
        with_suffix(&self.input, REJECT_EXTENSION)
    }
}

// appends rather than replacing any existing extension
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
