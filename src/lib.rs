//! # flashlog - Append-Only Record Logger for Raw Flash
//!
//! `flashlog` persists fixed-length binary records (telemetry packets, state
//! transitions, sensor samples) directly into the byte-addressable storage of
//! an erase-before-write device. No filesystem, no allocation beyond one page
//! buffer and an optional ring log.
//!
//! ## Features
//!
//! - **Resume after reboot**: the first fully erased page marks the end of the log
//! - **Page-aligned buffering**: records reach flash only as whole page programs
//! - **Triggered capture**: a ring log keeps the latest N records until drained
//! - **Critical sections**: every program/erase pauses other flash users
//!
//! ## Quick Start
//!
//! ```rust
//! use flashlog::{FlashGeometry, Logger, LoggerConfig, RamFlash, Result};
//!
//! # fn main() -> Result<()> {
//! let geometry = FlashGeometry::new(256, 4096, 64 * 1024);
//! let config = LoggerConfig::new(32, 0).with_geometry(geometry);
//! let mut logger = Logger::new(RamFlash::new(geometry), config)?;
//!
//! logger.initialize()?;
//! logger.write(&[0x42; 32], false)?;
//! logger.flush()?;
//!
//! let mut count = 0;
//! logger.read(&mut |_record: &[u8]| count += 1)?;
//! assert_eq!(count, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persisted Layout
//!
//! ```text
//! ┌──────────────────────────────────────┐ 0x000000
//! │ Reserved (code / data)               │
//! ├──────────────────────────────────────┤ base address (sector aligned)
//! │ Record 0 │ Record 1 │ ... │ Record n │
//! ├──────────────────────────────────────┤ write cursor
//! │ Erased (0xFF ...)                    │
//! └──────────────────────────────────────┘ region end
//! ```
//!
//! Records carry no header, checksum or end marker; their field layout belongs
//! to whoever decodes them.

pub mod config;
pub mod error;
pub mod locator;
pub mod logger;
pub mod page;
pub mod reader;
pub mod ring;
pub mod storage;

pub use config::{FlashGeometry, LoggerConfig, ERASED_BYTE};
pub use error::{FlashLogError, Result, StorageError, StorageOp};
pub use locator::ResumePoint;
pub use logger::Logger;
pub use page::{PageWriter, PendingPage};
pub use reader::{HexDump, ReadSummary, RecordSink};
pub use ring::RingLog;
pub use storage::{
    CoreLockout, CriticalSection, FileFlash, FlashExecGuard, FlashStorage, RamFlash, Unguarded,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
