//! End-to-end logger scenarios
//!
//! Each test drives a logger over an in-memory NOR part and checks what the
//! reader gets back and what the medium was asked to do.

use flashlog::{
    FlashGeometry, FlashLogError, HexDump, Logger, LoggerConfig, RamFlash, ResumePoint,
};

const BASE: u32 = 8192;

fn geometry() -> FlashGeometry {
    FlashGeometry::new(256, 4096, 64 * 1024).with_reserved_offset(BASE)
}

fn new_logger(record_length: usize) -> Logger<RamFlash> {
    let config = LoggerConfig::new(record_length, BASE).with_geometry(geometry());
    let mut logger = Logger::new(RamFlash::new(geometry()), config).unwrap();
    logger.initialize().unwrap();
    logger
}

/// Record `i`: every byte derived from the index, never all erased bytes
fn record(i: usize, len: usize) -> Vec<u8> {
    (0..len).map(|b| (i * 7 + b) as u8 & 0x7F).collect()
}

fn read_all(logger: &Logger<RamFlash>) -> Vec<Vec<u8>> {
    let mut records = Vec::new();
    logger.read(&mut |r: &[u8]| records.push(r.to_vec())).unwrap();
    records
}

#[test]
fn test_five_records_then_forced_flush() {
    let mut logger = new_logger(32);
    let written: Vec<_> = (0..5).map(|i| record(i, 32)).collect();

    for r in &written {
        logger.write(r, false).unwrap();
    }
    // 160 bytes is less than a page: nothing programmed yet
    assert_eq!(logger.storage().program_count(), 0);
    assert_eq!(logger.staged_len(), 160);

    logger.flush().unwrap();

    let mut seen = Vec::new();
    let summary = logger
        .read(&mut |r: &[u8]| seen.push(r.to_vec()))
        .unwrap();
    assert_eq!(summary.records, 5);
    assert_eq!(summary.bytes, 160);
    assert_eq!(seen, written);
    assert_eq!(logger.write_cursor(), BASE + 160);
}

#[test]
fn test_ring_of_three_keeps_last_three() {
    let mut logger = new_logger(32);
    logger.allocate_ring(3 * 32).unwrap();

    for i in 0..4 {
        logger.capture(&record(i, 32)).unwrap();
    }

    let mut window = Vec::new();
    logger.read_ring(&mut |r: &[u8]| window.push(r.to_vec()));
    assert_eq!(window, vec![record(1, 32), record(2, 32), record(3, 32)]);

    assert_eq!(logger.drain_ring(true).unwrap(), 3);
    assert_eq!(read_all(&logger), window);
}

#[test]
fn test_read_freshly_erased_region_reports_no_entries() {
    let mut logger = new_logger(32);
    logger.erase_all().unwrap();

    let mut dump = HexDump::new(Vec::new());
    let summary = logger.read(&mut dump).unwrap();
    assert!(summary.is_empty());

    let text = String::from_utf8(dump.into_inner()).unwrap();
    assert_eq!(text, "No entries found\n");
}

#[test]
fn test_flush_idempotent_when_nothing_staged() {
    let mut logger = new_logger(32);
    logger.write(&record(0, 32), true).unwrap();
    let programs = logger.storage().program_count();
    let cursor = logger.write_cursor();

    logger.flush().unwrap();
    logger.flush().unwrap();

    assert_eq!(logger.storage().program_count(), programs);
    assert_eq!(logger.write_cursor(), cursor);
}

#[test]
fn test_overflowing_record_triggers_exactly_one_flush() {
    // 100-byte records: two fit in a 256-byte page
    let mut logger = new_logger(100);
    logger.write(&record(0, 100), false).unwrap();
    logger.write(&record(1, 100), false).unwrap();
    assert_eq!(logger.storage().program_count(), 0);

    logger.write(&record(2, 100), false).unwrap();
    assert_eq!(logger.storage().program_count(), 1);
    assert_eq!(logger.write_cursor(), BASE + 200);
    assert_eq!(logger.staged_len(), 100);

    logger.flush().unwrap();
    assert_eq!(
        read_all(&logger),
        vec![record(0, 100), record(1, 100), record(2, 100)]
    );
}

#[test]
fn test_erase_then_initialize_resets_to_base() {
    let mut logger = new_logger(32);
    for i in 0..40 {
        logger.write(&record(i, 32), false).unwrap();
    }
    logger.flush().unwrap();
    assert_eq!(logger.persisted_records(), 40);

    logger.erase_all().unwrap();
    let point = logger.initialize().unwrap();
    assert_eq!(
        point,
        ResumePoint::Resumed {
            cursor: BASE,
            bytes_used: 0
        }
    );
    assert!(read_all(&logger).is_empty());
}

#[test]
fn test_reinitialize_finds_existing_log() {
    let mut logger = new_logger(32);
    for i in 0..20 {
        logger.write(&record(i, 32), false).unwrap();
    }
    logger.flush().unwrap();
    let cursor = logger.write_cursor();

    // Same storage, fresh logger: the boot path
    let flash = logger.into_storage();
    let config = LoggerConfig::new(32, BASE).with_geometry(geometry());
    let mut rebooted = Logger::new(flash, config).unwrap();
    assert_eq!(rebooted.initialize().unwrap().cursor(), Some(cursor));
    assert_eq!(rebooted.persisted_records(), 20);
}

#[test]
fn test_region_exhaustion_and_recovery() {
    let mut logger = new_logger(64);
    let capacity = logger.config().region_len() / 64;

    for i in 0..capacity {
        logger.write(&record(i, 64), false).unwrap();
    }
    assert!(matches!(
        logger.write(&record(0, 64), false),
        Err(FlashLogError::OutOfSpace)
    ));
    logger.flush().unwrap();
    assert_eq!(logger.persisted_records(), capacity);

    // A full region is reported as exhausted on the next boot
    assert_eq!(
        logger.initialize().unwrap(),
        ResumePoint::Exhausted {
            cursor: logger.config().region_end()
        }
    );
    assert!(!logger.space_available());
    assert!(matches!(
        logger.write(&record(0, 64), false),
        Err(FlashLogError::OutOfSpace)
    ));

    // Erasing makes room again
    logger.erase_all().unwrap();
    logger.write(&record(5, 64), true).unwrap();
    assert_eq!(read_all(&logger), vec![record(5, 64)]);
}

#[test]
fn test_reserved_area_survives_erase() {
    let mut image = vec![0xFFu8; 64 * 1024];
    image[..BASE as usize].fill(0x5A);
    let config = LoggerConfig::new(32, 0).with_geometry(geometry());
    let mut logger = Logger::new(RamFlash::from_image(geometry(), &image), config).unwrap();

    assert_eq!(logger.base_address(), BASE);
    logger.erase_all().unwrap();
    assert!(logger.storage().as_bytes()[..BASE as usize]
        .iter()
        .all(|&b| b == 0x5A));
}

#[test]
fn test_null_packets_are_ignored() {
    let mut logger = new_logger(32);
    logger.write(&[], true).unwrap();
    logger.capture(&[]).unwrap();
    logger.log(&[]).unwrap();

    assert_eq!(logger.staged_len(), 0);
    assert_eq!(logger.storage().program_count(), 0);
}

#[test]
fn test_reboot_with_less_than_a_page_erased_reads_only_written_records() {
    // 96-byte records leave 32 erased bytes at the end of the region
    let mut logger = new_logger(96);
    let mut written = Vec::new();
    loop {
        let r = record(written.len(), 96);
        match logger.write(&r, false) {
            Ok(()) => written.push(r),
            Err(FlashLogError::OutOfSpace) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    logger.flush().unwrap();
    let end = logger.config().region_end();
    assert!(end - logger.write_cursor() < 256);

    let flash = logger.into_storage();
    let config = LoggerConfig::new(96, BASE).with_geometry(geometry());
    let mut rebooted = Logger::new(flash, config).unwrap();
    let point = rebooted.initialize().unwrap();
    assert_eq!(
        point,
        ResumePoint::Exhausted {
            cursor: BASE + (written.len() * 96) as u32
        }
    );

    assert_eq!(rebooted.persisted_records(), written.len());
    assert_eq!(read_all(&rebooted), written);
}

#[test]
fn test_reinitialize_on_full_region_drops_staged_record() {
    let mut logger = new_logger(96);
    let capacity = logger.config().region_len() / 96;
    for i in 0..capacity - 1 {
        logger.write(&record(i, 96), false).unwrap();
    }
    logger.flush().unwrap();

    // One more record staged, then a rescan finds the region exhausted
    logger.write(&record(capacity, 96), false).unwrap();
    assert!(matches!(
        logger.initialize().unwrap(),
        ResumePoint::Exhausted { .. }
    ));
    assert_eq!(logger.staged_len(), 0);

    logger.flush().unwrap();
    assert!(logger.write_cursor() <= logger.config().region_end());
    assert_eq!(read_all(&logger).len(), capacity - 1);
}
