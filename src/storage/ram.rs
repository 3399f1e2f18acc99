//! In-memory NOR flash model
//!
//! Byte-exact simulation of an erase-before-write part: programming can only
//! clear bits, erasing a sector resets it to the erased value. Counters and
//! one-shot fault injection let tests observe exactly what the logger asked
//! the medium to do.

use super::{check_erase, check_program, check_range, program_cells, FlashStorage, StorageResult};
use crate::config::FlashGeometry;
use crate::error::StorageError;

pub struct RamFlash {
    geometry: FlashGeometry,
    cells: Vec<u8>,
    program_count: usize,
    erase_count: usize,
    fail_next_program: bool,
    fail_next_erase: bool,
}

impl RamFlash {
    /// Create a fully erased part
    pub fn new(geometry: FlashGeometry) -> Self {
        RamFlash {
            cells: vec![geometry.erased_value; geometry.region_size],
            geometry,
            program_count: 0,
            erase_count: 0,
            fail_next_program: false,
            fail_next_erase: false,
        }
    }

    /// Create a part pre-loaded with an image (e.g. firmware below the log region)
    pub fn from_image(geometry: FlashGeometry, image: &[u8]) -> Self {
        let mut flash = RamFlash::new(geometry);
        let len = image.len().min(flash.cells.len());
        flash.cells[..len].copy_from_slice(&image[..len]);
        flash
    }

    /// Raw view of the whole part
    pub fn as_bytes(&self) -> &[u8] {
        &self.cells
    }

    /// Overwrite cells directly, bypassing NOR semantics (test setup only)
    pub fn poke(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        self.cells[start..start + data.len()].copy_from_slice(data);
    }

    /// Number of successful program operations so far
    pub fn program_count(&self) -> usize {
        self.program_count
    }

    /// Number of successful sector erases so far
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    /// Make the next program operation report failure
    pub fn fail_next_program(&mut self) {
        self.fail_next_program = true;
    }

    /// Make the next sector erase report failure
    pub fn fail_next_erase(&mut self) {
        self.fail_next_erase = true;
    }
}

impl FlashStorage for RamFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> StorageResult<()> {
        check_range(&self.geometry, address, buf.len())?;
        let start = address as usize;
        buf.copy_from_slice(&self.cells[start..start + buf.len()]);
        Ok(())
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> StorageResult<()> {
        check_program(&self.geometry, address, data.len())?;
        if std::mem::take(&mut self.fail_next_program) {
            return Err(StorageError::ProgramFailed(address));
        }

        let start = address as usize;
        program_cells(
            &mut self.cells[start..start + data.len()],
            data,
            self.geometry.erased_value,
        );
        self.program_count += 1;
        Ok(())
    }

    fn erase_sector(&mut self, address: u32) -> StorageResult<()> {
        check_erase(&self.geometry, address)?;
        if std::mem::take(&mut self.fail_next_erase) {
            return Err(StorageError::EraseFailed(address));
        }

        let start = address as usize;
        self.cells[start..start + self.geometry.sector_size].fill(self.geometry.erased_value);
        self.erase_count += 1;
        Ok(())
    }
}
