//! # Transco
//!
//! A batch transcoder that turns delimited or fixed-width financial records
//! into enriched fixed-width accounting records.
//!
//! ## Design Principles
//!
//! - **Declarative layouts**: output fields come from a `name;format;length`
//!   descriptor compiled once into a [`Schema`]
//! - **Never lose a record**: field-level faults fill the slot with `#` and
//!   produce a reject line instead of aborting
//! - **Exact amounts**: currency precision correction uses `rust_decimal`
//! - **Deterministic output**: parallel runs are byte-identical to sequential
//!   ones; lot numbers are assigned in output order
//!
//! ## Example
//!
//! ```no_run
//! use transco::{transcode_file, RunConfig, Variant};
//!
//! let date = "20240131".parse().unwrap();
//! let config = RunConfig::new("positions.txt", date, Variant::Inventory, "/data/ref");
//! let stats = transcode_file(&config).unwrap();
//! println!("{} records written", stats.processed);
//! ```

pub mod amount;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod lot;
pub mod pipeline;
pub mod processor;
pub mod reference;
pub mod reject;
pub mod schema;

pub use catalog::Catalog;
pub use config::{AccountingDate, PipelineSettings, RunConfig, Site, REFERENCE_DIR_ENV};
pub use error::{Result, TranscoError};
pub use pipeline::{transcode_file, RunStats, Transcoder};
pub use reject::RejectSink;
pub use schema::{Schema, Variant};
