//! Transco CLI
//!
//! Converts one input file into `<input>.out`, writing rejected values to
//! `<input>.rej`.
//!
//! # Usage
//!
//! ```bash
//! RDJ_DAT=/data/ref transco positions.txt 20240131
//! transco --variant ledger --reference-dir /data/ref entries.txt 20240131 CASA
//! ```
//!
//! # Environment Variables
//!
//! - `RDJ_DAT`: reference directory when `--reference-dir` is not given
//! - `RUST_LOG`: log filter, `info` by default

use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use transco::{
    transcode_file, AccountingDate, PipelineSettings, RunConfig, Site, Variant,
    REFERENCE_DIR_ENV,
};

#[derive(Parser, Debug)]
#[command(
    name = "transco",
    version,
    about = "Transcode financial records into enriched fixed-width accounting records"
)]
struct Cli {
    /// Input file to convert
    input: PathBuf,

    /// Accounting date, YYYYMMDD
    accounting_date: AccountingDate,

    /// Site selecting the classification table: NULL or CASA
    #[arg(default_value = "NULL")]
    site: Site,

    /// Record layout: inventory or ledger
    #[arg(long, default_value = "inventory")]
    variant: Variant,

    /// Directory holding layout descriptors and reference tables
    #[arg(long, env = REFERENCE_DIR_ENV)]
    reference_dir: PathBuf,

    /// Worker threads
    #[arg(long, default_value_t = 8, value_parser = parse_positive)]
    workers: usize,

    /// Records read per batch
    #[arg(long, default_value_t = 80_000, value_parser = parse_positive)]
    batch_size: usize,

    /// Records per worker chunk
    #[arg(long, default_value_t = 10_000, value_parser = parse_positive)]
    chunk_size: usize,

    /// Reject messages buffered before they are written
    #[arg(long, default_value_t = 5_000, value_parser = parse_positive)]
    reject_threshold: usize,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        RunConfig {
            input: self.input,
            accounting_date: self.accounting_date,
            site: self.site,
            variant: self.variant,
            reference_dir: self.reference_dir,
            pipeline: PipelineSettings {
                batch_size: self.batch_size,
                chunk_size: self.chunk_size,
                workers: self.workers,
                ..PipelineSettings::default()
            },
            reject_threshold: self.reject_threshold,
        }
    }
}

fn parse_positive(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("'{}' is not a positive integer", raw))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = err.print();
                process::exit(0);
            }
            _ => {
                let _ = err.print();
                process::exit(1);
            }
        },
    };

    if let Err(e) = transcode_file(&cli.into_config()) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
