//! Construction-time configuration for a logger instance
//!
//! A configuration pins down the flash geometry, the fixed record length and
//! where in the device the log region begins. It can be built in code or
//! loaded from a TOML file:
//!
//! ```toml
//! record_length = 32
//! base_address = 0x100000
//! lockout_timeout_ms = 100
//!
//! [geometry]
//! page_size = 256
//! sector_size = 4096
//! region_size = 0x200000
//! erased_value = 0xFF
//! reserved_offset = 0x100000
//! ```

use crate::error::{FlashLogError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Program granularity of a typical QSPI NOR part
pub const DEFAULT_PAGE_SIZE: usize = 256;
/// Erase granularity of a typical QSPI NOR part
pub const DEFAULT_SECTOR_SIZE: usize = 4096;
/// 2 MiB of addressable flash
pub const DEFAULT_REGION_SIZE: usize = 2 * 1024 * 1024;
/// First 1 MiB holds the firmware image
pub const DEFAULT_RESERVED_OFFSET: u32 = 1024 * 1024;
pub const ERASED_BYTE: u8 = 0xFF;
pub const DEFAULT_LOCKOUT_TIMEOUT_MS: u64 = 100;

/// Physical constants of the storage medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashGeometry {
    /// Smallest unit that can be programmed in one operation
    pub page_size: usize,
    /// Smallest unit that can be erased in one operation
    pub sector_size: usize,
    /// Total addressable size; the log region always ends here
    pub region_size: usize,
    /// Value every byte reads as after an erase
    pub erased_value: u8,
    /// Offsets below this belong to code/data and are never touched
    pub reserved_offset: u32,
}

impl Default for FlashGeometry {
    fn default() -> Self {
        FlashGeometry {
            page_size: DEFAULT_PAGE_SIZE,
            sector_size: DEFAULT_SECTOR_SIZE,
            region_size: DEFAULT_REGION_SIZE,
            erased_value: ERASED_BYTE,
            reserved_offset: DEFAULT_RESERVED_OFFSET,
        }
    }
}

impl FlashGeometry {
    pub fn new(page_size: usize, sector_size: usize, region_size: usize) -> Self {
        FlashGeometry {
            page_size,
            sector_size,
            region_size,
            erased_value: ERASED_BYTE,
            reserved_offset: 0,
        }
    }

    pub fn with_erased_value(mut self, erased_value: u8) -> Self {
        self.erased_value = erased_value;
        self
    }

    pub fn with_reserved_offset(mut self, reserved_offset: u32) -> Self {
        self.reserved_offset = reserved_offset;
        self
    }

    /// Check the granularities nest the way NOR flash requires
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.sector_size == 0 || self.region_size == 0 {
            return Err(FlashLogError::InvalidConfig(
                "page, sector and region sizes must be non-zero".to_string(),
            ));
        }

        if self.sector_size % self.page_size != 0 {
            return Err(FlashLogError::InvalidConfig(format!(
                "sector size {} is not a multiple of page size {}",
                self.sector_size, self.page_size
            )));
        }

        if self.region_size % self.sector_size != 0 {
            return Err(FlashLogError::InvalidConfig(format!(
                "region size {} is not a multiple of sector size {}",
                self.region_size, self.sector_size
            )));
        }

        if self.region_size > u32::MAX as usize {
            return Err(FlashLogError::InvalidConfig(format!(
                "region size {} exceeds the 32-bit address space",
                self.region_size
            )));
        }

        Ok(())
    }

    /// Round an address up to the next sector boundary
    pub fn align_up_to_sector(&self, address: u32) -> u64 {
        let sector = self.sector_size as u64;
        (address as u64).div_ceil(sector) * sector
    }
}

/// Logger configuration fixed for the lifetime of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Size of every record in bytes
    pub record_length: usize,

    /// Requested start of the log region (clamped, see [`LoggerConfig::base_address`])
    #[serde(rename = "base_address")]
    pub requested_base: u32,

    #[serde(default)]
    pub geometry: FlashGeometry,

    /// How long to wait for other contexts to leave flash before giving up
    #[serde(default = "default_lockout_timeout_ms")]
    pub lockout_timeout_ms: u64,

    /// Ring log size in bytes to allocate at startup, if any
    #[serde(default)]
    pub ring_capacity: Option<usize>,
}

fn default_lockout_timeout_ms() -> u64 {
    DEFAULT_LOCKOUT_TIMEOUT_MS
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig::new(32, DEFAULT_RESERVED_OFFSET)
    }
}

impl LoggerConfig {
    pub fn new(record_length: usize, base_address: u32) -> Self {
        LoggerConfig {
            record_length,
            requested_base: base_address,
            geometry: FlashGeometry::default(),
            lockout_timeout_ms: DEFAULT_LOCKOUT_TIMEOUT_MS,
            ring_capacity: None,
        }
    }

    pub fn with_geometry(mut self, geometry: FlashGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_lockout_timeout(mut self, timeout: Duration) -> Self {
        self.lockout_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = Some(capacity);
        self
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: LoggerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Effective start of the log region
    ///
    /// The requested address is raised to the reserved offset and then to the
    /// next sector boundary, so erasing the region can never touch bytes that
    /// belong to code or data below it.
    pub fn base_address(&self) -> u32 {
        let clamped = self.requested_base.max(self.geometry.reserved_offset);
        let aligned = self.geometry.align_up_to_sector(clamped);
        aligned.min(self.geometry.region_size as u64) as u32
    }

    /// One past the last byte of the log region
    pub fn region_end(&self) -> u32 {
        self.geometry.region_size as u32
    }

    /// Size of the log region in bytes
    pub fn region_len(&self) -> usize {
        (self.region_end() - self.base_address()) as usize
    }

    pub fn lockout_timeout(&self) -> Duration {
        Duration::from_millis(self.lockout_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;

        if self.record_length == 0 {
            return Err(FlashLogError::InvalidConfig(
                "record length must be non-zero".to_string(),
            ));
        }

        if self.record_length > self.geometry.page_size {
            return Err(FlashLogError::InvalidConfig(format!(
                "record length {} exceeds page size {}",
                self.record_length, self.geometry.page_size
            )));
        }

        if self.region_len() < self.geometry.sector_size {
            return Err(FlashLogError::InvalidConfig(format!(
                "log region starting at {:#x} leaves less than one sector before {:#x}",
                self.base_address(),
                self.region_end()
            )));
        }

        if let Some(capacity) = self.ring_capacity {
            if capacity < self.record_length {
                return Err(FlashLogError::InvalidConfig(format!(
                    "ring capacity {} cannot hold a single {}-byte record",
                    capacity, self.record_length
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_geometry() -> FlashGeometry {
        FlashGeometry::new(256, 4096, 64 * 1024)
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = LoggerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.base_address(), DEFAULT_RESERVED_OFFSET);
        assert_eq!(config.region_len(), 1024 * 1024);
    }

    #[test]
    fn test_base_clamped_to_reserved_offset() {
        let geometry = small_geometry().with_reserved_offset(8192);
        let config = LoggerConfig::new(32, 0).with_geometry(geometry);
        assert_eq!(config.base_address(), 8192);
    }

    #[test]
    fn test_base_rounded_up_to_sector() {
        let config = LoggerConfig::new(32, 5000).with_geometry(small_geometry());
        assert_eq!(config.base_address(), 8192);
    }

    #[test]
    fn test_record_longer_than_page_rejected() {
        let config = LoggerConfig::new(512, 0).with_geometry(small_geometry());
        assert!(matches!(
            config.validate(),
            Err(FlashLogError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_geometry_rejected() {
        let geometry = FlashGeometry::new(256, 1000, 64 * 1024);
        assert!(geometry.validate().is_err());

        let geometry = FlashGeometry::new(256, 4096, 10_000);
        assert!(geometry.validate().is_err());
    }

    #[test]
    fn test_region_without_room_rejected() {
        let config = LoggerConfig::new(32, 64 * 1024).with_geometry(small_geometry());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
            record_length = 16
            base_address = 4096
            ring_capacity = 160

            [geometry]
            page_size = 256
            sector_size = 4096
            region_size = 65536
        "#;
        let config = LoggerConfig::from_toml_str(text).unwrap();
        assert_eq!(config.record_length, 16);
        assert_eq!(config.base_address(), 4096);
        assert_eq!(config.geometry.erased_value, 0xFF);
        assert_eq!(config.lockout_timeout_ms, DEFAULT_LOCKOUT_TIMEOUT_MS);
        assert_eq!(config.ring_capacity, Some(160));
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        let text = r#"
            record_length = 0
            base_address = 0
        "#;
        assert!(LoggerConfig::from_toml_str(text).is_err());
        assert!(matches!(
            LoggerConfig::from_toml_str("record_length = \"x\""),
            Err(FlashLogError::ConfigParse(_))
        ));
    }
}
