//! Memory-mapped flash image
//!
//! Host analogue of on-chip flash: a file the size of the part, created in
//! the erased state and mapped read/write. A log written through it survives
//! process restarts the way a device log survives power cycles.

use super::{check_erase, check_program, check_range, program_cells, FlashStorage, StorageResult};
use crate::config::FlashGeometry;
use crate::error::{FlashLogError, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Flash image backed by a memory-mapped file
pub struct FileFlash {
    mmap: MmapMut,
    geometry: FlashGeometry,
    path: PathBuf,
}

impl FileFlash {
    /// Create a new, fully erased image (truncates any existing file)
    pub fn create<P: AsRef<Path>>(path: P, geometry: FlashGeometry) -> Result<Self> {
        geometry.validate()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(geometry.region_size as u64)?;

        // SAFETY: the file is owned by this process for the mapping's lifetime
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        mmap.fill(geometry.erased_value);
        mmap.flush()?;

        Ok(FileFlash {
            mmap,
            geometry,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing image
    pub fn open<P: AsRef<Path>>(path: P, geometry: FlashGeometry) -> Result<Self> {
        geometry.validate()?;

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len != geometry.region_size as u64 {
            return Err(FlashLogError::InvalidConfig(format!(
                "flash image {:?} is {} bytes, geometry expects {}",
                path.as_ref(),
                len,
                geometry.region_size
            )));
        }

        // SAFETY: see `create`
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        Ok(FileFlash {
            mmap,
            geometry,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open the image if it exists, otherwise create an erased one
    pub fn open_or_create<P: AsRef<Path>>(path: P, geometry: FlashGeometry) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path, geometry)
        } else {
            Self::create(path, geometry)
        }
    }

    /// Get image path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the mapping to disk
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

impl FlashStorage for FileFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> StorageResult<()> {
        check_range(&self.geometry, address, buf.len())?;
        let start = address as usize;
        buf.copy_from_slice(&self.mmap[start..start + buf.len()]);
        Ok(())
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> StorageResult<()> {
        check_program(&self.geometry, address, data.len())?;
        let start = address as usize;
        program_cells(
            &mut self.mmap[start..start + data.len()],
            data,
            self.geometry.erased_value,
        );
        self.mmap.flush_range(start, data.len())?;
        Ok(())
    }

    fn erase_sector(&mut self, address: u32) -> StorageResult<()> {
        check_erase(&self.geometry, address)?;
        let start = address as usize;
        let len = self.geometry.sector_size;
        self.mmap[start..start + len].fill(self.geometry.erased_value);
        self.mmap.flush_range(start, len)?;
        Ok(())
    }
}
