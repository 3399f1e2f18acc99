//! Resume-after-reboot tests over a flash image file
//!
//! Dropping a logger and reopening its image is the host equivalent of a
//! power cycle: only what was flushed survives.

use flashlog::{FileFlash, FlashGeometry, Logger, LoggerConfig, ResumePoint};
use std::path::Path;
use tempfile::TempDir;

fn geometry() -> FlashGeometry {
    FlashGeometry::new(256, 4096, 32 * 1024).with_reserved_offset(4096)
}

fn config() -> LoggerConfig {
    LoggerConfig::new(16, 4096).with_geometry(geometry())
}

fn boot(path: &Path) -> Logger<FileFlash> {
    let flash = FileFlash::open_or_create(path, geometry()).unwrap();
    let mut logger = Logger::new(flash, config()).unwrap();
    logger.initialize().unwrap();
    logger
}

fn record(i: u32) -> [u8; 16] {
    let mut r = [0u8; 16];
    r[..4].copy_from_slice(&i.to_le_bytes());
    r[4..].copy_from_slice(b"session-log!");
    r
}

fn ids(logger: &Logger<FileFlash>) -> Vec<u32> {
    let mut ids = Vec::new();
    logger
        .read(&mut |r: &[u8]| ids.push(u32::from_le_bytes([r[0], r[1], r[2], r[3]])))
        .unwrap();
    ids
}

#[test]
fn test_log_resumes_across_restarts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flash.img");

    {
        let mut logger = boot(&path);
        for i in 0..10 {
            logger.write(&record(i), false).unwrap();
        }
        logger.flush().unwrap();
    }

    {
        let mut logger = boot(&path);
        assert_eq!(logger.write_cursor(), 4096 + 160);
        for i in 10..25 {
            logger.write(&record(i), false).unwrap();
        }
        logger.flush().unwrap();
    }

    let logger = boot(&path);
    assert_eq!(ids(&logger), (0..25).collect::<Vec<_>>());
}

#[test]
fn test_unflushed_records_lost_on_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flash.img");

    {
        let mut logger = boot(&path);
        logger.write(&record(1), true).unwrap();
        logger.write(&record(2), false).unwrap();
        // Dropped without flushing
    }

    let logger = boot(&path);
    assert_eq!(ids(&logger), vec![1]);
}

#[test]
fn test_erase_persists_across_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flash.img");

    {
        let mut logger = boot(&path);
        logger.write(&record(1), true).unwrap();
        logger.erase_all().unwrap();
    }

    let mut logger = boot(&path);
    assert_eq!(
        logger.initialize().unwrap(),
        ResumePoint::Resumed {
            cursor: 4096,
            bytes_used: 0
        }
    );
    assert!(ids(&logger).is_empty());
}

#[test]
fn test_drained_window_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flash.img");

    {
        let mut logger = boot(&path);
        logger.allocate_ring(4 * 16).unwrap();
        for i in 0..50 {
            logger.capture(&record(i)).unwrap();
        }
        logger.drain_ring(true).unwrap();
        logger.storage().sync().unwrap();
    }

    let logger = boot(&path);
    assert_eq!(ids(&logger), vec![46, 47, 48, 49]);
}
