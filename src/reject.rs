//! Buffered, timestamped reject log.
//!
//! Messages are collected in memory and written out once the buffer reaches
//! its threshold, on explicit flush, and when the sink is finished.

use crate::error::Result;
use chrono::Local;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Messages buffered before a flush is forced.
pub const DEFAULT_REJECT_THRESHOLD: usize = 5_000;

#[derive(Debug)]
struct SinkState<W> {
    writer: W,
    pending: Vec<(String, String)>,
    total: usize,
}

/// Append-only reject log shared by the loaders and the pipeline.
#[derive(Debug)]
pub struct RejectSink<W: Write> {
    state: Mutex<SinkState<W>>,
    threshold: usize,
}

impl RejectSink<BufWriter<File>> {
    /// Creates (or truncates) the reject file at `path`.
    pub fn create(path: &Path, threshold: usize) -> Result<Self> {
        let file = File::create(path)?;
        Ok(RejectSink::new(BufWriter::new(file), threshold))
    }
}

impl<W: Write> RejectSink<W> {
    pub fn new(writer: W, threshold: usize) -> Self {
        RejectSink {
            state: Mutex::new(SinkState {
                writer,
                pending: Vec::new(),
                total: 0,
            }),
            threshold: threshold.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState<W>> {
        // a panic elsewhere never leaves the buffer half-written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, message: impl Into<String>) -> Result<()> {
        self.extend(std::iter::once(message.into()))
    }

    /// Appends messages in order, stamped with the current local time.
    pub fn extend<I>(&self, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut state = self.lock();
        for message in messages {
            state.pending.push((stamp.clone(), message));
            state.total += 1;
        }
        if state.pending.len() >= self.threshold {
            write_pending(&mut state)?;
        }
        Ok(())
    }

    /// Writes all buffered messages through to the underlying writer.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        write_pending(&mut state)?;
        state.writer.flush()?;
        Ok(())
    }

    /// Messages accepted so far, flushed or not.
    pub fn total(&self) -> usize {
        self.lock().total
    }

    /// Flushes and hands back the writer.
    pub fn finish(self) -> Result<W> {
        let mut state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        write_pending(&mut state)?;
        state.writer.flush()?;
        Ok(state.writer)
    }
}

fn write_pending<W: Write>(state: &mut SinkState<W>) -> Result<()> {
    for (stamp, message) in state.pending.drain(..) {
        writeln!(state.writer, "[{}] {}", stamp, message)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(bytes: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(bytes).lines().map(str::to_string).collect()
    }

    #[test]
    fn test_messages_are_timestamped_in_order() {
        let sink = RejectSink::new(Vec::new(), 10);
        sink.push("first").unwrap();
        sink.extend(vec!["second".to_string(), "third".to_string()]).unwrap();
        assert_eq!(sink.total(), 3);

        let out = lines(&sink.finish().unwrap());
        assert_eq!(out.len(), 3);
        assert!(out[0].starts_with('['));
        // "[YYYY-mm-dd HH:MM:SS] "
        assert_eq!(&out[0][20..22], "] ");
        assert!(out[0].ends_with("] first"));
        assert!(out[2].ends_with("] third"));
    }

    #[test]
    fn test_buffer_holds_until_threshold() {
        let sink = RejectSink::new(Vec::new(), 3);
        sink.push("a").unwrap();
        sink.push("b").unwrap();
        assert!(sink.lock().writer.is_empty());

        sink.push("c").unwrap();
        assert_eq!(lines(&sink.lock().writer).len(), 3);
        assert!(sink.lock().pending.is_empty());
    }

    #[test]
    fn test_flush_writes_partial_buffer() {
        let sink = RejectSink::new(Vec::new(), 100);
        sink.push("only").unwrap();
        sink.flush().unwrap();
        assert_eq!(lines(&sink.lock().writer).len(), 1);
        assert_eq!(sink.total(), 1);
    }
}
