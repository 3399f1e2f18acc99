//! Reader: replay persisted or buffered records to a consumer
//!
//! Records are opaque; interpreting them is the job of a [`RecordSink`].
//! Closures taking `&[u8]` are sinks, and [`HexDump`] prints raw bytes for
//! callers without a decoder.

use crate::error::{FlashLogError, Result, StorageOp};
use crate::ring::RingLog;
use crate::storage::FlashStorage;
use std::io::{self, Stderr, Write};
use tracing::{info, warn};

/// Bytes per hex dump line
pub const DUMP_WIDTH: usize = 16;

/// Consumer of one record at a time
pub trait RecordSink {
    /// Receive exactly one record
    fn consume(&mut self, record: &[u8]);

    /// Called instead of `consume` when the traversed range holds no records
    fn no_entries(&mut self) {}
}

impl<F> RecordSink for F
where
    F: FnMut(&[u8]),
{
    fn consume(&mut self, record: &[u8]) {
        self(record)
    }
}

/// Fixed-width hex dump, one line per 16 bytes
pub struct HexDump<W: Write> {
    out: W,
    index: usize,
    write_errors: usize,
}

impl HexDump<Stderr> {
    /// Dump to standard error
    pub fn stderr() -> Self {
        HexDump::new(io::stderr())
    }
}

impl<W: Write> HexDump<W> {
    pub fn new(out: W) -> Self {
        HexDump {
            out,
            index: 0,
            write_errors: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes to the output that failed so far
    pub fn write_errors(&self) -> usize {
        self.write_errors
    }

    /// Count a failed write; only the first one is logged
    fn note_error(&mut self, err: io::Error) {
        if self.write_errors == 0 {
            warn!("Hex dump output failed: {}; further failures are counted only", err);
        }
        self.write_errors += 1;
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        writeln!(self.out, "record {}:", self.index)?;
        for (line, chunk) in record.chunks(DUMP_WIDTH).enumerate() {
            write!(self.out, "  {:04x}:", line * DUMP_WIDTH)?;
            for byte in chunk {
                write!(self.out, " {:02x}", byte)?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }
}

impl<W: Write> RecordSink for HexDump<W> {
    fn consume(&mut self, record: &[u8]) {
        // A broken diagnostic stream must not stop the traversal
        if let Err(err) = self.write_record(record) {
            self.note_error(err);
        }
        self.index += 1;
    }

    fn no_entries(&mut self) {
        if let Err(err) = writeln!(self.out, "No entries found") {
            self.note_error(err);
        }
    }
}

/// What a read traversed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSummary {
    pub records: usize,
    pub bytes: usize,
}

impl ReadSummary {
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }
}

/// Replay the records persisted between `base` and `cursor`
pub fn read_region<S, K>(
    storage: &S,
    base: u32,
    cursor: u32,
    record_length: usize,
    sink: &mut K,
) -> Result<ReadSummary>
where
    S: FlashStorage + ?Sized,
    K: RecordSink + ?Sized,
{
    let records = cursor.saturating_sub(base) as usize / record_length;
    if records == 0 {
        info!("No entries found in log region at {:#x}", base);
        sink.no_entries();
        return Ok(ReadSummary {
            records: 0,
            bytes: 0,
        });
    }

    let mut record = vec![0u8; record_length];
    for index in 0..records {
        let address = base + (index * record_length) as u32;
        storage
            .read(address, &mut record)
            .map_err(|source| FlashLogError::Storage {
                op: StorageOp::Read,
                address,
                source,
            })?;
        sink.consume(&record);
    }

    Ok(ReadSummary {
        records,
        bytes: records * record_length,
    })
}

/// Replay the records held by a ring, oldest first
pub fn read_ring<K>(ring: &RingLog, sink: &mut K) -> ReadSummary
where
    K: RecordSink + ?Sized,
{
    if ring.is_empty() {
        info!("No entries found in ring log");
        sink.no_entries();
        return ReadSummary {
            records: 0,
            bytes: 0,
        };
    }

    for record in ring.iter() {
        sink.consume(record);
    }

    ReadSummary {
        records: ring.record_count(),
        bytes: ring.len(),
    }
}
