//! Ring log for triggered capture
//!
//! Keeps only the most recent records in memory, overwriting the oldest once
//! full, so that draining it after an event of interest persists the window
//! leading up to that event.
//!
//! Oldest-first traversal depends on whether the buffer has ever wrapped:
//! - not yet full: the oldest record is at offset 0 and traversal stops at
//!   the write offset
//! - full: the oldest record is the one at the write offset (the next to be
//!   overwritten) and traversal goes once around the buffer from there

use crate::error::{FlashLogError, Result};
use crate::page::PageWriter;
use crate::storage::{CriticalSection, FlashStorage};
use tracing::debug;

pub struct RingLog {
    buffer: Box<[u8]>,
    record_length: usize,
    /// Bytes holding valid records, saturates at capacity
    length: usize,
    /// Where the next record goes
    write_offset: usize,
}

impl RingLog {
    /// Allocate a ring of `capacity` bytes
    ///
    /// The capacity is rounded down to a whole number of records and must hold
    /// at least one.
    pub fn new(capacity: usize, record_length: usize) -> Result<Self> {
        if record_length == 0 {
            return Err(FlashLogError::InvalidConfig(
                "record length must be non-zero".to_string(),
            ));
        }

        let capacity = capacity - capacity % record_length;
        if capacity == 0 {
            return Err(FlashLogError::InvalidConfig(format!(
                "ring capacity cannot hold a single {}-byte record",
                record_length
            )));
        }

        Ok(RingLog {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            record_length,
            length: 0,
            write_offset: 0,
        })
    }

    /// Allocate a ring holding exactly `records` records
    pub fn with_records(records: usize, record_length: usize) -> Result<Self> {
        Self::new(records * record_length, record_length)
    }

    /// Store one record, overwriting the oldest when full
    ///
    /// An empty packet is a no-op.
    pub fn record(&mut self, packet: &[u8]) -> Result<()> {
        if packet.is_empty() {
            return Ok(());
        }

        if packet.len() != self.record_length {
            return Err(FlashLogError::RecordLength {
                expected: self.record_length,
                actual: packet.len(),
            });
        }

        let start = self.write_offset;
        self.buffer[start..start + self.record_length].copy_from_slice(packet);
        self.write_offset = (start + self.record_length) % self.capacity();
        self.length = (self.length + self.record_length).min(self.capacity());
        Ok(())
    }

    /// Visit every held record, oldest first
    pub fn replay_in_order<F>(&self, mut consumer: F)
    where
        F: FnMut(&[u8]),
    {
        for record in self.iter() {
            consumer(record);
        }
    }

    /// Iterate held records, oldest first
    pub fn iter(&self) -> RingIter<'_> {
        let start = if self.is_wrapped() {
            self.write_offset
        } else {
            0
        };

        RingIter {
            ring: self,
            offset: start,
            remaining: self.record_count(),
        }
    }

    /// Replay every record into the page writer and force a final flush
    ///
    /// The ring is emptied afterwards so the next capture window starts
    /// fresh; the same records are never persisted twice. Returns the number
    /// of records drained.
    pub fn drain_into<S, C>(&mut self, writer: &mut PageWriter<S, C>) -> Result<usize>
    where
        S: FlashStorage,
        C: CriticalSection,
    {
        let mut drained = 0;
        for record in self.iter() {
            writer.record(record, false)?;
            drained += 1;
        }
        writer.flush()?;

        debug!("Drained {} ring records", drained);
        self.clear();
        Ok(drained)
    }

    /// Forget every held record without releasing the buffer
    pub fn clear(&mut self) {
        self.length = 0;
        self.write_offset = 0;
    }

    /// True once the ring has been filled at least once
    pub fn is_wrapped(&self) -> bool {
        self.length == self.capacity()
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Capacity in records
    pub fn capacity_records(&self) -> usize {
        self.capacity() / self.record_length
    }

    /// Valid bytes held
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn record_count(&self) -> usize {
        self.length / self.record_length
    }

    pub fn write_offset(&self) -> usize {
        self.write_offset
    }

    pub fn record_length(&self) -> usize {
        self.record_length
    }
}

/// Oldest-first iterator over a ring's records
pub struct RingIter<'a> {
    ring: &'a RingLog,
    offset: usize,
    remaining: usize,
}

impl<'a> Iterator for RingIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let len = self.ring.record_length;
        let record = &self.ring.buffer[self.offset..self.offset + len];
        self.offset = (self.offset + len) % self.ring.capacity();
        self.remaining -= 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for RingIter<'_> {}
