//! Region locator: find where a previous log ended
//!
//! Flash reads back as a uniform erased value until it is programmed, so the
//! first run of one full page of erased bytes marks "nothing written beyond
//! here". Shorter erased runs inside written data (records that happen to
//! contain erased-value bytes) do not end the scan.

use crate::config::LoggerConfig;
use crate::error::{FlashLogError, Result, StorageOp};
use crate::storage::FlashStorage;
use tracing::{debug, info};

/// Outcome of scanning the log region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// Logging can continue at `cursor`
    Resumed { cursor: u32, bytes_used: usize },
    /// No full erased page left; logging is refused until the region is erased
    ///
    /// `cursor` is where the written data ends, so the log stays readable.
    Exhausted { cursor: u32 },
}

impl ResumePoint {
    /// Where logging continues, if it can
    pub fn cursor(&self) -> Option<u32> {
        match self {
            ResumePoint::Resumed { cursor, .. } => Some(*cursor),
            ResumePoint::Exhausted { .. } => None,
        }
    }

    /// End of the persisted records, exhausted or not
    pub fn data_end(&self) -> u32 {
        match self {
            ResumePoint::Resumed { cursor, .. } | ResumePoint::Exhausted { cursor } => *cursor,
        }
    }

    pub fn space_available(&self) -> bool {
        matches!(self, ResumePoint::Resumed { .. })
    }
}

/// Scan the region from its base for the first full erased page
///
/// The cursor is not the start of that run itself: it is rounded up to the
/// next record boundary, so a record whose last bytes equal the erased value
/// is not overwritten by the next session. Since a record never exceeds a
/// page the rounded cursor is still inside the erased run.
///
/// When no full erased page is left the result is
/// [`ResumePoint::Exhausted`], carrying the end of the written data (the
/// start of the trailing erased run, rounded the same way) so that reads
/// never return erased slots as records.
pub fn locate<S: FlashStorage + ?Sized>(storage: &S, config: &LoggerConfig) -> Result<ResumePoint> {
    let base = config.base_address();
    let end = config.region_end();
    let page_size = config.geometry.page_size;
    let erased = config.geometry.erased_value;

    debug!("Scanning log region {:#x}..{:#x}", base, end);

    let mut chunk = vec![0u8; page_size];
    let mut run_start = base;
    let mut run_len = 0usize;
    let mut address = base;

    while address < end {
        let len = page_size.min((end - address) as usize);
        storage
            .read(address, &mut chunk[..len])
            .map_err(|source| FlashLogError::Storage {
                op: StorageOp::Read,
                address,
                source,
            })?;

        for (offset, &byte) in chunk[..len].iter().enumerate() {
            if byte != erased {
                run_len = 0;
                continue;
            }

            if run_len == 0 {
                run_start = address + offset as u32;
            }
            run_len += 1;

            if run_len == page_size {
                let cursor = align_to_record(base, run_start, end, config.record_length);
                let bytes_used = (cursor - base) as usize;
                info!(
                    "Log resumes at {:#x} ({} bytes, {} records already written)",
                    cursor,
                    bytes_used,
                    bytes_used / config.record_length
                );
                return Ok(ResumePoint::Resumed { cursor, bytes_used });
            }
        }

        address += len as u32;
    }

    let data_end = if run_len > 0 { run_start } else { end };
    let cursor = align_to_record(base, data_end, end, config.record_length);
    info!(
        "Log region {:#x}..{:#x} is full ({} erased bytes left at {:#x}); erase it before logging again",
        base,
        end,
        end - cursor,
        cursor
    );
    Ok(ResumePoint::Exhausted { cursor })
}

fn align_to_record(base: u32, address: u32, end: u32, record_length: usize) -> u32 {
    let offset = (address - base) as usize;
    let aligned = base as u64 + (offset.div_ceil(record_length) * record_length) as u64;
    aligned.min(end as u64) as u32
}
