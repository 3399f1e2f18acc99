//! Storage adapter seam
//!
//! The logger never touches raw memory. Everything it needs from the medium
//! goes through [`FlashStorage`] (read, program, erase) and every program or
//! erase runs inside a [`CriticalSection`] scope.
//!
//! Host-side implementations:
//! - [`ram::RamFlash`] - in-memory NOR model with fault injection
//! - [`file::FileFlash`] - memory-mapped flash image that survives restarts
//! - [`lockout::CoreLockout`] - pauses other execution contexts during writes

pub mod file;
pub mod lockout;
pub mod ram;

pub use file::FileFlash;
pub use lockout::{CoreLockout, FlashExecGuard};
pub use ram::RamFlash;

use crate::config::FlashGeometry;
use crate::error::StorageError;
use std::time::Duration;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Program/erase/read primitives of an erase-before-write medium
pub trait FlashStorage {
    /// Physical constants of the medium
    fn geometry(&self) -> FlashGeometry;

    /// Copy `buf.len()` bytes starting at `address` out of the medium
    fn read(&self, address: u32, buf: &mut [u8]) -> StorageResult<()>;

    /// Program up to one page of bytes starting at `address`
    ///
    /// Programming can only move bits towards the programmed state, so bytes
    /// equal to the erased value leave the existing contents untouched.
    fn program_page(&mut self, address: u32, data: &[u8]) -> StorageResult<()>;

    /// Reset one sector to the erased value; `address` must be sector aligned
    fn erase_sector(&mut self, address: u32) -> StorageResult<()>;
}

/// Scope during which no other context may fetch from the medium
pub trait CriticalSection {
    /// Run `f` exclusively, or fail if exclusivity is not obtained in `timeout`
    fn run_exclusive<R, F>(&self, timeout: Duration, f: F) -> StorageResult<R>
    where
        F: FnOnce() -> R;
}

/// Critical section for single-context deployments
#[derive(Debug, Clone, Copy, Default)]
pub struct Unguarded;

impl CriticalSection for Unguarded {
    fn run_exclusive<R, F>(&self, _timeout: Duration, f: F) -> StorageResult<R>
    where
        F: FnOnce() -> R,
    {
        Ok(f())
    }
}

/// Bounds check shared by the host adapters
pub(crate) fn check_range(geometry: &FlashGeometry, address: u32, len: usize) -> StorageResult<()> {
    let end = address as u64 + len as u64;
    if end > geometry.region_size as u64 {
        return Err(StorageError::OutOfBounds { address, len });
    }
    Ok(())
}

/// Checks shared by the host adapters before a program operation
pub(crate) fn check_program(geometry: &FlashGeometry, address: u32, len: usize) -> StorageResult<()> {
    if len > geometry.page_size {
        return Err(StorageError::OutOfBounds { address, len });
    }
    check_range(geometry, address, len)
}

/// Checks shared by the host adapters before an erase operation
pub(crate) fn check_erase(geometry: &FlashGeometry, address: u32) -> StorageResult<()> {
    if address as usize % geometry.sector_size != 0 {
        return Err(StorageError::Misaligned {
            address,
            alignment: geometry.sector_size,
        });
    }
    check_range(geometry, address, geometry.sector_size)
}

/// Apply NOR program semantics: a cell keeps only the bits set in both
/// its erased pattern and the programmed byte.
pub(crate) fn program_cells(cells: &mut [u8], data: &[u8], erased_value: u8) {
    // Relative to the erased pattern, programming is a bitwise OR of the
    // "programmed" bits; for 0xFF-erased parts this reduces to `cell & byte`.
    for (cell, &byte) in cells.iter_mut().zip(data) {
        *cell = ((*cell ^ erased_value) | (byte ^ erased_value)) ^ erased_value;
    }
}
