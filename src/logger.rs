//! Logger: one handle over one flash log region
//!
//! Two ways to record:
//! - linear: [`Logger::write`] stages records straight into the page buffer
//! - triggered capture: [`Logger::capture`] keeps the latest records in a
//!   ring log, [`Logger::drain_ring`] persists that window on demand
//!
//! A logger owns its region, page buffer and ring exclusively. Contexts that
//! need to log get a `&mut Logger` (or an `Arc<Mutex<Logger>>` built by the
//! caller); the logger itself does no locking beyond the flash critical
//! section.

use crate::config::LoggerConfig;
use crate::error::{FlashLogError, Result};
use crate::locator::{self, ResumePoint};
use crate::page::PageWriter;
use crate::reader::{self, HexDump, ReadSummary, RecordSink};
use crate::ring::RingLog;
use crate::storage::{CriticalSection, FlashStorage, Unguarded};
use tracing::{debug, info};

pub struct Logger<S, C = Unguarded> {
    config: LoggerConfig,
    writer: PageWriter<S, C>,
    ring: Option<RingLog>,
}

impl<S: FlashStorage> Logger<S, Unguarded> {
    /// Create a logger for a single-context deployment
    pub fn new(storage: S, config: LoggerConfig) -> Result<Self> {
        Self::with_critical_section(storage, Unguarded, config)
    }
}

impl<S: FlashStorage, C: CriticalSection> Logger<S, C> {
    /// Create a logger whose program/erase operations run inside `critical`
    pub fn with_critical_section(storage: S, critical: C, config: LoggerConfig) -> Result<Self> {
        config.validate()?;
        check_geometry(&storage, &config)?;

        let writer = PageWriter::new(storage, critical, &config);
        let mut logger = Logger {
            config,
            writer,
            ring: None,
        };

        if let Some(capacity) = logger.config.ring_capacity {
            logger.allocate_ring(capacity)?;
        }

        info!(
            "Logger ready: {}-byte records, region {:#x}..{:#x}",
            logger.config.record_length,
            logger.writer.base(),
            logger.writer.end()
        );
        Ok(logger)
    }

    /// Find where the previous log ended and resume there
    ///
    /// An exhausted region is reported through the returned point, not as an
    /// error; writes are refused until [`Logger::erase_all`].
    pub fn initialize(&mut self) -> Result<ResumePoint> {
        let point = locator::locate(self.writer.storage(), &self.config)?;
        self.writer.resume(point);
        Ok(point)
    }

    /// Record one packet in linear mode
    pub fn write(&mut self, packet: &[u8], force_flush: bool) -> Result<()> {
        self.writer.record(packet, force_flush)
    }

    /// Program whatever is staged
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    /// Erase the whole log region
    pub fn erase_all(&mut self) -> Result<()> {
        self.writer.erase_all()
    }

    /// Record one packet in whichever mode is active
    ///
    /// With a ring allocated the packet is captured, otherwise it is written.
    pub fn log(&mut self, packet: &[u8]) -> Result<()> {
        if self.ring.is_some() {
            self.capture(packet)
        } else {
            self.write(packet, false)
        }
    }

    /// Allocate the ring log; a no-op if one is already allocated
    pub fn allocate_ring(&mut self, capacity: usize) -> Result<()> {
        if let Some(ring) = &self.ring {
            debug!(
                "Ring log already allocated ({} bytes); free it before resizing",
                ring.capacity()
            );
            return Ok(());
        }

        let ring = RingLog::new(capacity, self.config.record_length)?;
        info!(
            "Ring log allocated: {} records ({} bytes)",
            ring.capacity_records(),
            ring.capacity()
        );
        self.ring = Some(ring);
        Ok(())
    }

    /// Release the ring log and everything it holds
    pub fn free_ring(&mut self) {
        if self.ring.take().is_some() {
            info!("Ring log freed");
        }
    }

    /// Store a packet in the ring log; a no-op without one
    pub fn capture(&mut self, packet: &[u8]) -> Result<()> {
        match self.ring.as_mut() {
            Some(ring) => ring.record(packet),
            None => {
                debug!("Capture ignored: no ring log allocated");
                Ok(())
            }
        }
    }

    /// Persist the ring's window, oldest first, and force a final flush
    ///
    /// With `free_after` the ring is released whether or not the drain
    /// succeeds. Returns the number of records drained.
    pub fn drain_ring(&mut self, free_after: bool) -> Result<usize> {
        if self.writer.is_faulted() {
            if free_after {
                self.free_ring();
            }
            return Err(FlashLogError::Faulted);
        }

        let drained = if free_after {
            // Owned here so the buffer is dropped on every exit path
            let Some(mut ring) = self.ring.take() else {
                debug!("Drain ignored: no ring log allocated");
                return Ok(0);
            };
            let drained = ring.drain_into(&mut self.writer)?;
            info!("Ring log freed");
            drained
        } else {
            let Some(ring) = self.ring.as_mut() else {
                debug!("Drain ignored: no ring log allocated");
                return Ok(0);
            };
            ring.drain_into(&mut self.writer)?
        };

        info!("Drained {} records from ring log", drained);
        Ok(drained)
    }

    /// Replay every persisted record, oldest first
    ///
    /// Records still staged in the page buffer are not visible until flushed.
    pub fn read<K>(&self, sink: &mut K) -> Result<ReadSummary>
    where
        K: RecordSink + ?Sized,
    {
        let summary = reader::read_region(
            self.writer.storage(),
            self.writer.base(),
            self.writer.cursor(),
            self.config.record_length,
            sink,
        )?;
        if !self.writer.pending().is_empty() {
            debug!(
                "{} staged bytes not yet flushed",
                self.writer.pending().fill_len()
            );
        }
        Ok(summary)
    }

    /// Replay the ring log, oldest first
    pub fn read_ring<K>(&self, sink: &mut K) -> ReadSummary
    where
        K: RecordSink + ?Sized,
    {
        match &self.ring {
            Some(ring) => reader::read_ring(ring, sink),
            None => {
                info!("No entries found: no ring log allocated");
                sink.no_entries();
                ReadSummary {
                    records: 0,
                    bytes: 0,
                }
            }
        }
    }

    /// Hex dump every persisted record to standard error
    pub fn dump(&self) -> Result<ReadSummary> {
        self.read(&mut HexDump::stderr())
    }

    /// Hex dump the ring log to standard error
    pub fn dump_ring(&self) -> ReadSummary {
        self.read_ring(&mut HexDump::stderr())
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn record_length(&self) -> usize {
        self.config.record_length
    }

    pub fn base_address(&self) -> u32 {
        self.writer.base()
    }

    pub fn write_cursor(&self) -> u32 {
        self.writer.cursor()
    }

    pub fn space_available(&self) -> bool {
        self.writer.space_available()
    }

    pub fn is_faulted(&self) -> bool {
        self.writer.is_faulted()
    }

    /// Bytes staged but not yet programmed
    pub fn staged_len(&self) -> usize {
        self.writer.pending().fill_len()
    }

    /// Records persisted so far
    pub fn persisted_records(&self) -> usize {
        (self.writer.cursor() - self.writer.base()) as usize / self.config.record_length
    }

    pub fn ring(&self) -> Option<&RingLog> {
        self.ring.as_ref()
    }

    pub fn storage(&self) -> &S {
        self.writer.storage()
    }

    pub fn storage_mut(&mut self) -> &mut S {
        self.writer.storage_mut()
    }

    pub fn critical_section(&self) -> &C {
        self.writer.critical_section()
    }

    /// Give the storage back; staged bytes that were never flushed are lost
    pub fn into_storage(self) -> S {
        self.writer.into_storage()
    }
}

fn check_geometry<S: FlashStorage>(storage: &S, config: &LoggerConfig) -> Result<()> {
    let actual = storage.geometry();
    let expected = config.geometry;

    if actual.page_size != expected.page_size
        || actual.sector_size != expected.sector_size
        || actual.erased_value != expected.erased_value
    {
        return Err(FlashLogError::InvalidConfig(format!(
            "storage geometry (page {}, sector {}, erased {:#04x}) does not match \
             configuration (page {}, sector {}, erased {:#04x})",
            actual.page_size,
            actual.sector_size,
            actual.erased_value,
            expected.page_size,
            expected.sector_size,
            expected.erased_value
        )));
    }

    if actual.region_size < expected.region_size {
        return Err(FlashLogError::InvalidConfig(format!(
            "storage holds {} bytes but the log region ends at {:#x}",
            actual.region_size, expected.region_size
        )));
    }

    Ok(())
}
