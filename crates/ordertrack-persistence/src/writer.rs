//! JSON Lines audit trail for orders and ledger entries.
//!
//! One file per stream per UTC day (`<stream>_<YYYY-MM-DD>.jsonl`), opened
//! in append mode so restarts never truncate earlier records.

use crate::error::PersistenceResult;
use chrono::Utc;
use ordertrack_core::{OrderRecord, WalletLedgerEntry};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Active writer state for daily file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Append-only JSON Lines writer for a single record stream.
pub struct JsonLinesWriter {
    base_dir: PathBuf,
    stream: String,
    /// Serialized lines waiting for flush.
    buffer: Vec<String>,
    max_buffer_size: usize,
    active_writer: Option<ActiveWriter>,
}

impl JsonLinesWriter {
    pub fn new(base_dir: impl Into<PathBuf>, stream: &str, max_buffer_size: usize) -> Self {
        let base_dir = base_dir.into();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create audit directory");
        }

        Self {
            base_dir,
            stream: stream.to_string(),
            buffer: Vec::with_capacity(max_buffer_size.max(1)),
            max_buffer_size: max_buffer_size.max(1),
            active_writer: None,
        }
    }

    /// Serialize a record into the buffer, flushing when full.
    pub fn add_record<T: Serialize>(&mut self, record: &T) -> PersistenceResult<()> {
        self.buffer.push(serde_json::to_string(record)?);

        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    fn close_active_writer(&mut self) {
        if let Some(mut active) = self.active_writer.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, stream = %self.stream, "Failed to flush writer on close");
            }
            info!(
                stream = %self.stream,
                date = %active.date,
                records = active.records_written,
                "Closed audit writer"
            );
        }
    }

    fn open_writer(&self, date: &str) -> PersistenceResult<ActiveWriter> {
        let path = self.base_dir.join(format!("{}_{}.jsonl", self.stream, date));
        info!(path = %path.display(), "Opening audit writer (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(ActiveWriter {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        })
    }

    /// Write buffered lines to today's file.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();

        if self
            .active_writer
            .as_ref()
            .is_some_and(|w| w.date != today)
        {
            self.close_active_writer();
        }

        let mut active = match self.active_writer.take() {
            Some(active) => active,
            None => self.open_writer(&today)?,
        };

        let record_count = self.buffer.len();
        let written = self
            .buffer
            .iter()
            .try_for_each(|line| writeln!(active.writer, "{line}"))
            .and_then(|_| active.writer.flush());
        if written.is_ok() {
            active.records_written += record_count;
        }
        self.active_writer = Some(active);
        written?;

        debug!(
            stream = %self.stream,
            date = %today,
            records = record_count,
            "Flushed audit records"
        );

        self.buffer.clear();
        Ok(())
    }

    /// Flush pending data and release the file.
    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active_writer();
        Ok(())
    }
}

impl Drop for JsonLinesWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, stream = %self.stream, "Failed to flush buffer on drop");
        }
        self.close_active_writer();
    }
}

/// Order and ledger streams written side by side.
pub struct AuditWriter {
    orders: JsonLinesWriter,
    ledger: JsonLinesWriter,
}

impl AuditWriter {
    pub fn new(base_dir: impl Into<PathBuf>, buffer_size: usize) -> Self {
        let base_dir = base_dir.into();
        Self {
            orders: JsonLinesWriter::new(base_dir.clone(), "orders", buffer_size),
            ledger: JsonLinesWriter::new(base_dir, "ledger", buffer_size),
        }
    }

    pub fn record_order(&mut self, order: &OrderRecord) -> PersistenceResult<()> {
        self.orders.add_record(order)
    }

    pub fn record_ledger(&mut self, entry: &WalletLedgerEntry) -> PersistenceResult<()> {
        self.ledger.add_record(entry)
    }

    pub fn flush(&mut self) -> PersistenceResult<()> {
        self.orders.flush()?;
        self.ledger.flush()
    }

    pub fn close(&mut self) -> PersistenceResult<()> {
        self.orders.close()?;
        self.ledger.close()
    }
}
