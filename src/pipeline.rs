//! Ordered parallel pipeline.
//!
//! Input lines are read into batches. Small batches are converted inline;
//! larger ones are cut into chunks, tagged with ascending ids and converted
//! on a fixed-size worker pool. Results are put back in id order before
//! anything is written, so output is byte-identical to a sequential run.
//! Lot numbers are stamped afterwards, on the calling thread.

use crate::catalog::Catalog;
use crate::config::{PipelineSettings, RunConfig};
use crate::error::{Result, TranscoError};
use crate::header;
use crate::lot::{LotAllocator, LotKey};
use crate::processor::RecordProcessor;
use crate::reject::RejectSink;
use log::{debug, info};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

const IO_BUFFER_SIZE: usize = 1 << 20;

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub lines_read: usize,
    /// Lines of at most one byte, skipped without a reject.
    pub empty_lines: usize,
    pub processed: usize,
    /// Lines that could not be split into columns.
    pub dropped: usize,
    /// Reject messages written, including reference-load rejects.
    pub rejects: usize,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Converted output of one chunk, or of a whole reassembled batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutput {
    /// Records, each followed by `\n`.
    pub bytes: Vec<u8>,
    /// One key per record when the layout allocates lots, empty otherwise.
    pub lot_keys: Vec<LotKey>,
    pub rejects: Vec<String>,
    pub records: usize,
    pub dropped: usize,
}

impl ChunkOutput {
    fn append(&mut self, mut other: ChunkOutput) {
        self.bytes.append(&mut other.bytes);
        self.lot_keys.append(&mut other.lot_keys);
        self.rejects.append(&mut other.rejects);
        self.records += other.records;
        self.dropped += other.dropped;
    }
}

/// Read-only state every worker task receives.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    catalog: Arc<Catalog>,
}

impl WorkerContext {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        WorkerContext { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Converts one chunk. `chunk` only labels errors.
    ///
    /// A record of the wrong length means the snapshot itself is
    /// inconsistent and fails the whole chunk.
    pub fn process_chunk(&self, chunk: usize, lines: &[Vec<u8>]) -> Result<ChunkOutput> {
        let processor = RecordProcessor::new(&self.catalog);
        let record_len = self.catalog.schema().record_len();
        let mut output = ChunkOutput {
            bytes: Vec::with_capacity(lines.len() * (record_len + 1)),
            ..Default::default()
        };

        for line in lines {
            let Some(record) = processor.process(line, &mut output.rejects) else {
                output.dropped += 1;
                continue;
            };
            if record.bytes.len() != record_len {
                return Err(TranscoError::WorkerFailed {
                    chunk,
                    message: format!(
                        "produced a {} byte record, expected {}",
                        record.bytes.len(),
                        record_len
                    ),
                });
            }
            output.bytes.extend_from_slice(&record.bytes);
            output.bytes.push(b'\n');
            if let Some(key) = record.lot_key {
                output.lot_keys.push(key);
            }
            output.records += 1;
        }

        Ok(output)
    }
}

/// Concatenates chunk results in ascending id order, whatever order they
/// arrived in. The first failing chunk (by id) fails the batch.
pub fn reassemble<I>(results: I, expected: usize) -> Result<ChunkOutput>
where
    I: IntoIterator<Item = (usize, Result<ChunkOutput>)>,
{
    let mut pending: BTreeMap<usize, Result<ChunkOutput>> = results.into_iter().collect();
    let mut combined = ChunkOutput::default();
    for chunk in 0..expected {
        match pending.remove(&chunk) {
            Some(Ok(output)) => combined.append(output),
            Some(Err(e)) => return Err(e),
            None => return Err(TranscoError::MissingChunk { chunk, expected }),
        }
    }
    Ok(combined)
}

/// Drives batches through the worker pool and the lot allocator.
pub struct Transcoder {
    context: WorkerContext,
    settings: PipelineSettings,
    pool: ThreadPool,
    lots: Option<LotAllocator>,
}

impl Transcoder {
    /// Freezes `catalog` and starts the worker pool.
    pub fn new(catalog: Catalog, settings: PipelineSettings) -> Result<Self> {
        let workers = settings.workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("transco-worker-{}", i))
            .build()?;
        let lots = catalog
            .schema()
            .variant()
            .allocates_lots()
            .then(LotAllocator::new);

        info!("Using a pool of {} workers", workers);
        Ok(Transcoder {
            context: WorkerContext::new(Arc::new(catalog)),
            settings,
            pool,
            lots,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        self.context.catalog()
    }

    /// Converts one batch and stamps lot numbers in output order.
    pub fn process_batch(&mut self, lines: &[Vec<u8>]) -> Result<ChunkOutput> {
        let chunk_size = self.settings.chunk_size.max(1);
        let mut output = if lines.len() < 2 * chunk_size {
            debug!("Converting {} records inline", lines.len());
            guarded(0, || self.context.process_chunk(0, lines))?
        } else {
            self.dispatch(lines, chunk_size)?
        };
        self.stamp_lots(&mut output);
        Ok(output)
    }

    fn dispatch(&self, lines: &[Vec<u8>], chunk_size: usize) -> Result<ChunkOutput> {
        let chunks: Vec<&[Vec<u8>]> = lines.chunks(chunk_size).collect();
        let expected = chunks.len();
        debug!(
            "Dispatching {} records in {} chunks",
            lines.len(),
            expected
        );

        let (tx, rx) = mpsc::channel();
        self.pool.scope(|scope| {
            for (id, chunk) in chunks.into_iter().enumerate() {
                let tx = tx.clone();
                let context = self.context.clone();
                scope.spawn(move |_| {
                    let result = guarded(id, || context.process_chunk(id, chunk));
                    // rx lives until reassembly, so this cannot fail
                    let _ = tx.send((id, result));
                });
            }
        });
        drop(tx);

        reassemble(rx, expected)
    }

    fn stamp_lots(&mut self, output: &mut ChunkOutput) {
        let stride = self.context.catalog().schema().record_len() + 1;
        let Some(lots) = self.lots.as_mut() else {
            return;
        };
        for (record, key) in output.bytes.chunks_mut(stride).zip(&output.lot_keys) {
            header::stamp_lot(record, lots.assign(key));
        }
    }

    /// Streams `input` to `output`, one batch in flight at a time.
    pub fn run<R, W, S>(&mut self, input: R, mut output: W, rejects: &RejectSink<S>) -> Result<RunStats>
    where
        R: BufRead,
        W: Write,
        S: Write,
    {
        let started = Instant::now();
        let batch_size = self.settings.batch_size.max(1);
        let interval = self.settings.progress_interval;
        let mut next_progress = interval;
        let mut stats = RunStats::default();
        let mut batch: Vec<Vec<u8>> = Vec::with_capacity(batch_size);

        for line in input.split(b'\n') {
            let mut line = line?;
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            stats.lines_read += 1;
            if line.len() <= 1 {
                stats.empty_lines += 1;
                continue;
            }
            batch.push(line);

            if batch.len() >= batch_size {
                self.flush_batch(&mut batch, &mut output, rejects, &mut stats)?;
                if interval > 0 && stats.processed >= next_progress {
                    stats.elapsed = started.elapsed();
                    info!(
                        "Progress: {} read, {} processed, {} dropped, {} rejects, {:.0} records/s",
                        stats.lines_read,
                        stats.processed,
                        stats.dropped,
                        rejects.total(),
                        stats.records_per_second()
                    );
                    next_progress = (stats.processed / interval + 1) * interval;
                }
            }
        }
        if !batch.is_empty() {
            self.flush_batch(&mut batch, &mut output, rejects, &mut stats)?;
        }

        output.flush()?;
        rejects.flush()?;
        stats.rejects = rejects.total();
        stats.elapsed = started.elapsed();

        info!(
            "Done: {} lines read ({} empty), {} records written, {} dropped, {} rejects in {:.2}s",
            stats.lines_read,
            stats.empty_lines,
            stats.processed,
            stats.dropped,
            stats.rejects,
            stats.elapsed.as_secs_f64()
        );
        if let Some(lots) = &self.lots {
            info!("{} lots allocated", lots.lot_count());
        }
        Ok(stats)
    }

    fn flush_batch<W, S>(
        &mut self,
        batch: &mut Vec<Vec<u8>>,
        output: &mut W,
        rejects: &RejectSink<S>,
        stats: &mut RunStats,
    ) -> Result<()>
    where
        W: Write,
        S: Write,
    {
        let converted = self.process_batch(batch)?;
        output.write_all(&converted.bytes)?;
        rejects.extend(converted.rejects)?;
        stats.processed += converted.records;
        stats.dropped += converted.dropped;
        batch.clear();
        Ok(())
    }
}

/// Runs one chunk conversion, turning a panic into `WorkerFailed`.
fn guarded<F>(chunk: usize, convert: F) -> Result<ChunkOutput>
where
    F: FnOnce() -> Result<ChunkOutput>,
{
    panic::catch_unwind(AssertUnwindSafe(convert)).unwrap_or_else(|payload| {
        Err(TranscoError::WorkerFailed {
            chunk,
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Runs one complete transcoding: loads the catalog, converts `input` to
/// `input.out` and writes rejects to `input.rej`.
pub fn transcode_file(config: &RunConfig) -> Result<RunStats> {
    info!("Input file: {}", config.input.display());
    info!(
        "Accounting date: {}, site: {}, layout: {}",
        config.accounting_date, config.site, config.variant
    );

    let rejects = RejectSink::create(&config.reject_path(), config.reject_threshold)?;
    let mut load_rejects = Vec::new();
    let catalog = Catalog::load(
        &config.reference_dir,
        config.variant,
        config.site,
        &config.accounting_date,
        &mut load_rejects,
    )?;
    rejects.extend(load_rejects)?;

    let mut transcoder = Transcoder::new(catalog, config.pipeline)?;
    let input = BufReader::with_capacity(IO_BUFFER_SIZE, File::open(&config.input)?);
    let output_path = config.output_path();
    let output = BufWriter::with_capacity(IO_BUFFER_SIZE, File::create(&output_path)?);
    info!("Writing {}", output_path.display());

    let stats = transcoder.run(input, output, &rejects)?;
    rejects.finish()?;
    Ok(stats)
}
