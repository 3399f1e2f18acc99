//! Page write buffer
//!
//! Records are staged in a page-sized buffer and only reach flash as whole
//! page programs: when the next record would not fit, or when a flush is
//! forced. Unused bytes of the staging buffer always hold the erased value,
//! so programming a partly filled page leaves the flash cells behind the
//! staged data untouched.

use crate::config::LoggerConfig;
use crate::error::{FlashLogError, Result, StorageError, StorageOp};
use crate::locator::ResumePoint;
use crate::storage::{CriticalSection, FlashStorage};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One page of staged record bytes
#[derive(Debug, Clone)]
pub struct PendingPage {
    bytes: Box<[u8]>,
    fill: usize,
    erased_value: u8,
}

impl PendingPage {
    pub fn new(page_size: usize, erased_value: u8) -> Self {
        PendingPage {
            bytes: vec![erased_value; page_size].into_boxed_slice(),
            fill: 0,
            erased_value,
        }
    }

    /// Bytes currently staged
    pub fn fill_len(&self) -> usize {
        self.fill
    }

    /// Free bytes left in the page
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    /// Append `data`; returns false (and stages nothing) if it does not fit
    pub fn stage(&mut self, data: &[u8]) -> bool {
        if data.len() > self.remaining() {
            return false;
        }
        self.bytes[self.fill..self.fill + data.len()].copy_from_slice(data);
        self.fill += data.len();
        true
    }

    /// The staged bytes only
    pub fn staged(&self) -> &[u8] {
        &self.bytes[..self.fill]
    }

    /// The whole page, padded with the erased value
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Drop staged data and restore the erased padding
    pub fn clear(&mut self) {
        self.bytes.fill(self.erased_value);
        self.fill = 0;
    }
}

/// Buffered writer over the log region; the only code that programs or erases
pub struct PageWriter<S, C> {
    storage: S,
    critical: C,
    page: PendingPage,
    record_length: usize,
    base: u32,
    end: u32,
    sector_size: usize,
    cursor: u32,
    space_available: bool,
    initialized: bool,
    faulted: bool,
    timeout: Duration,
}

impl<S: FlashStorage, C: CriticalSection> PageWriter<S, C> {
    /// Create a writer positioned at the region base
    ///
    /// Nothing can be recorded until [`PageWriter::resume`] or
    /// [`PageWriter::erase_all`] establishes the write cursor.
    pub fn new(storage: S, critical: C, config: &LoggerConfig) -> Self {
        let geometry = config.geometry;
        let base = config.base_address();
        PageWriter {
            storage,
            critical,
            page: PendingPage::new(geometry.page_size, geometry.erased_value),
            record_length: config.record_length,
            base,
            end: config.region_end(),
            sector_size: geometry.sector_size,
            cursor: base,
            space_available: false,
            initialized: false,
            faulted: false,
            timeout: config.lockout_timeout(),
        }
    }

    /// Position the cursor from a locator result
    ///
    /// Records still staged are kept only if they fit between the new cursor
    /// and the region end; an exhausted region discards them.
    pub fn resume(&mut self, point: ResumePoint) {
        match point {
            ResumePoint::Resumed { cursor, .. } => {
                self.cursor = cursor;
                self.space_available = true;
            }
            ResumePoint::Exhausted { cursor } => {
                self.cursor = cursor;
                self.space_available = false;
            }
        }
        self.initialized = true;

        if !self.page.is_empty()
            && (!self.space_available || self.page.fill_len() > self.room())
        {
            warn!(
                "Discarding {} staged bytes: no room at {:#x}",
                self.page.fill_len(),
                self.cursor
            );
            self.page.clear();
        }
    }

    /// Stage one record, flushing first if the page cannot hold it
    ///
    /// An empty packet is a no-op. A record is never split across two
    /// program operations.
    pub fn record(&mut self, packet: &[u8], force_flush: bool) -> Result<()> {
        self.ensure_healthy()?;

        if packet.is_empty() {
            return Ok(());
        }

        if packet.len() != self.record_length {
            return Err(FlashLogError::RecordLength {
                expected: self.record_length,
                actual: packet.len(),
            });
        }

        if !self.space_available {
            return Err(FlashLogError::OutOfSpace);
        }

        if self.page.remaining() < self.record_length {
            self.flush()?;
        }

        let next_end = self.cursor as u64 + (self.page.fill_len() + self.record_length) as u64;
        if next_end > self.end as u64 {
            self.space_available = false;
            info!(
                "Log region exhausted at {:#x}; logging disabled until erase",
                self.cursor as usize + self.page.fill_len()
            );
            return Err(FlashLogError::OutOfSpace);
        }

        self.page.stage(packet);
        debug!(
            "Staged record ({} of {} page bytes used)",
            self.page.fill_len(),
            self.page.as_bytes().len()
        );

        if force_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Program the staged bytes at the cursor
    ///
    /// A flush with nothing staged issues no storage operation.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_healthy()?;

        if self.page.is_empty() {
            debug!("Flush skipped: nothing staged");
            return Ok(());
        }

        let address = self.cursor;
        let fill = self.page.fill_len();
        let room = self.room();
        if fill > room {
            self.space_available = false;
            info!(
                "Cannot flush {} bytes at {:#x}: only {} left in log region",
                fill, address, room
            );
            return Err(FlashLogError::OutOfSpace);
        }
        // The whole page goes out; only the tail past the region end is cut
        let len = self.page.as_bytes().len().min(room);

        let storage = &mut self.storage;
        let bytes = &self.page.as_bytes()[..len];
        let result = self
            .critical
            .run_exclusive(self.timeout, || storage.program_page(address, bytes))
            .and_then(|programmed| programmed);

        if let Err(source) = result {
            return Err(self.fault(StorageOp::Program, address, source));
        }

        self.cursor += fill as u32;
        self.page.clear();
        debug!("Flushed {} bytes at {:#x}", fill, address);
        Ok(())
    }

    /// Erase every sector of the log region and rewind the cursor to its base
    ///
    /// Records still staged are discarded along with the log.
    pub fn erase_all(&mut self) -> Result<()> {
        self.ensure_healthy()?;

        info!("Erasing log region {:#x}..{:#x}", self.base, self.end);

        let (base, end, sector_size) = (self.base, self.end, self.sector_size);
        let storage = &mut self.storage;
        let result = self
            .critical
            .run_exclusive(self.timeout, || -> std::result::Result<(), (u32, StorageError)> {
                let mut sector = base;
                while sector < end {
                    storage
                        .erase_sector(sector)
                        .map_err(|source| (sector, source))?;
                    sector += sector_size as u32;
                }
                Ok(())
            })
            .map_err(|source| (base, source))
            .and_then(|erased| erased);

        if let Err((address, source)) = result {
            return Err(self.fault(StorageOp::Erase, address, source));
        }

        self.page.clear();
        self.cursor = self.base;
        self.space_available = true;
        self.initialized = true;
        info!("Log region erased");
        Ok(())
    }

    /// Bytes left between the cursor and the region end
    fn room(&self) -> usize {
        self.end.saturating_sub(self.cursor) as usize
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.faulted {
            return Err(FlashLogError::Faulted);
        }
        Ok(())
    }

    /// Latch the fault; flash contents are unverified from here on
    fn fault(&mut self, op: StorageOp, address: u32, source: StorageError) -> FlashLogError {
        self.faulted = true;
        error!(
            "Storage {} failed at {:#x}: {}; logger halted",
            op, address, source
        );
        FlashLogError::Storage {
            op,
            address,
            source,
        }
    }

    /// Next free byte in the region
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn record_length(&self) -> usize {
        self.record_length
    }

    pub fn space_available(&self) -> bool {
        self.space_available
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn pending(&self) -> &PendingPage {
        &self.page
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn critical_section(&self) -> &C {
        &self.critical
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}
