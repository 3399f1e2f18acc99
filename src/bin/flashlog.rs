//! flashlog CLI
//!
//! Drives a logger over a flash image file: the telemetry demo, raw dumps,
//! erasing, and a triggered-capture run.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crossbeam::channel::{self, RecvTimeoutError};
use flashlog::{
    CoreLockout, FileFlash, Logger, LoggerConfig, RecordSink, ResumePoint,
};
use rand::Rng;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const PACKET_LEN: usize = 32;
const TAG: &[u8; 14] = b"DAWSYN_SCHRAIB";

#[derive(Parser, Debug)]
#[command(name = "flashlog")]
#[command(about = "Append-only record logger over a flash image")]
struct Args {
    /// Flash image file (created erased if missing)
    #[arg(short = 'i', long, default_value = "flash.img")]
    image: PathBuf,

    /// Logger configuration (TOML); defaults to 32-byte records on a 2 MiB part
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read, erase, write telemetry packets, read back
    Demo {
        /// Number of packets to write
        #[arg(short = 'n', long, default_value = "500")]
        count: u16,
    },
    /// Hex dump every persisted record
    Dump,
    /// Decode every persisted record as telemetry
    Show,
    /// Erase the whole log region
    Erase,
    /// Capture packets into a ring log, then persist only the last window
    Triggered {
        /// Ring size in records
        #[arg(short = 'w', long, default_value = "16")]
        window: usize,
        /// Number of packets to capture
        #[arg(short = 'n', long, default_value = "100")]
        count: u16,
    },
}

/// One demo telemetry sample
#[derive(Debug, Clone, Copy, PartialEq)]
struct Telemetry {
    time_us: u64,
    state: u8,
    deploy_percent: u8,
    altitude: f32,
    velocity: f32,
}

impl Telemetry {
    fn sample(i: u16, time_us: u64) -> Self {
        Telemetry {
            time_us,
            state: i as u8,
            deploy_percent: ((i as u32 * 100) / 200) as u8,
            altitude: 10.0 * i as f32,
            velocity: 5.0 * i as f32,
        }
    }

    /// Big-endian fields followed by the fixed tag
    fn encode(&self) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        packet[0..8].copy_from_slice(&self.time_us.to_be_bytes());
        packet[8] = self.state;
        packet[9] = self.deploy_percent;
        packet[10..14].copy_from_slice(&self.altitude.to_bits().to_be_bytes());
        packet[14..18].copy_from_slice(&self.velocity.to_bits().to_be_bytes());
        packet[18..32].copy_from_slice(TAG);
        packet
    }

    fn decode(packet: &[u8]) -> Option<(Self, String)> {
        if packet.len() != PACKET_LEN {
            return None;
        }
        let word = |at: usize| {
            u32::from_be_bytes([packet[at], packet[at + 1], packet[at + 2], packet[at + 3]])
        };
        let mut time = [0u8; 8];
        time.copy_from_slice(&packet[0..8]);

        let telemetry = Telemetry {
            time_us: u64::from_be_bytes(time),
            state: packet[8],
            deploy_percent: packet[9],
            altitude: f32::from_bits(word(10)),
            velocity: f32::from_bits(word(14)),
        };
        let tag = String::from_utf8_lossy(&packet[18..32]).into_owned();
        Some((telemetry, tag))
    }
}

/// Prints telemetry records as a table on stdout
#[derive(Default)]
struct TelemetryTable {
    header_printed: bool,
}

impl TelemetryTable {
    fn header(&mut self) {
        if !self.header_printed {
            println!("time (us)\t|\tstate\t|\tdep pcnt\t|\talt (m)\t|\tvel (m/s)\t|\ttag");
            self.header_printed = true;
        }
    }
}

impl RecordSink for TelemetryTable {
    fn consume(&mut self, record: &[u8]) {
        self.header();
        match Telemetry::decode(record) {
            Some((t, tag)) => println!(
                "{}\t|\t{}\t|\t{}\t|\t{:4.2}\t|\t{:4.2}\t|\t{}",
                t.time_us, t.state, t.deploy_percent, t.altitude, t.velocity, tag
            ),
            None => println!("<{}-byte record>", record.len()),
        }
    }

    fn no_entries(&mut self) {
        println!("No entries found");
    }
}

/// Stand-in for the second core: keeps executing "from flash" until stopped
fn spawn_other_core(lockout: CoreLockout) -> (channel::Sender<()>, thread::JoinHandle<u64>) {
    let (stop_tx, stop_rx) = channel::bounded::<()>(1);

    let handle = thread::spawn(move || {
        let mut rng = rand::thread_rng();
        let mut counter: u32 = 0;
        let mut hits = 0u64;

        loop {
            {
                let _in_flash = lockout.enter_flash();
                for _ in 0..rng.gen_range(100..1000) {
                    if counter == rng.gen::<u32>() {
                        hits += 1;
                    }
                    counter = counter.wrapping_add(rng.gen::<u32>());
                }
            }

            match stop_rx.recv_timeout(Duration::from_micros(rng.gen_range(10..200))) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        hits
    });

    (stop_tx, handle)
}

fn load_config(args: &Args) -> anyhow::Result<LoggerConfig> {
    let config = match &args.config {
        Some(path) => LoggerConfig::load(path)
            .with_context(|| format!("loading configuration from {:?}", path))?,
        None => LoggerConfig::default(),
    };
    if config.record_length != PACKET_LEN {
        info!(
            "Configured record length is {}; telemetry commands need {}",
            config.record_length, PACKET_LEN
        );
    }
    Ok(config)
}

fn run_demo(logger: &mut Logger<FileFlash, CoreLockout>, count: u16) -> anyhow::Result<()> {
    if logger.record_length() != PACKET_LEN {
        bail!("demo needs {}-byte records", PACKET_LEN);
    }

    info!("Reading memory");
    logger.read(&mut TelemetryTable::default())?;
    info!("Erasing memory");
    logger.erase_all()?;
    info!("Reading memory");
    logger.read(&mut TelemetryTable::default())?;
    logger.initialize()?;

    let (stop, other_core) = spawn_other_core(logger.critical_section().clone());

    info!("Writing {} packets", count);
    let start = Instant::now();
    for i in 0..count {
        let sample = Telemetry::sample(i, start.elapsed().as_micros() as u64);
        logger.write(&sample.encode(), false)?;
    }
    logger.flush()?;

    let _ = stop.send(());
    let hits = other_core
        .join()
        .map_err(|_| anyhow::anyhow!("other core panicked"))?;
    info!(
        "Other core done ({} hits); {} exclusive flash sections",
        hits,
        logger.critical_section().exclusive_sections()
    );

    info!("Reading memory");
    let summary = logger.read(&mut TelemetryTable::default())?;
    info!("Read back {} records", summary.records);
    Ok(())
}

fn run_triggered(
    logger: &mut Logger<FileFlash, CoreLockout>,
    window: usize,
    count: u16,
) -> anyhow::Result<()> {
    if logger.record_length() != PACKET_LEN {
        bail!("triggered capture needs {}-byte records", PACKET_LEN);
    }

    logger.allocate_ring(window * PACKET_LEN)?;
    let start = Instant::now();
    for i in 0..count {
        let sample = Telemetry::sample(i, start.elapsed().as_micros() as u64);
        logger.capture(&sample.encode())?;
    }

    info!("Trigger fired after {} packets", count);
    let drained = logger.drain_ring(true)?;
    info!("Persisted the last {} packets", drained);

    logger.read(&mut TelemetryTable::default())?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Flash image: {:?}", args.image);
    let flash = FileFlash::open_or_create(&args.image, config.geometry)
        .with_context(|| format!("opening flash image {:?}", args.image))?;
    let lockout = CoreLockout::new();
    let mut logger = Logger::with_critical_section(flash, lockout, config)?;

    if let ResumePoint::Exhausted { .. } = logger.initialize()? {
        info!("Log region is full; only dump, show and erase are useful");
    }

    match args.command {
        Command::Demo { count } => run_demo(&mut logger, count)?,
        Command::Dump => {
            let summary = logger.dump()?;
            info!("{} records", summary.records);
        }
        Command::Show => {
            logger.read(&mut TelemetryTable::default())?;
        }
        Command::Erase => logger.erase_all()?,
        Command::Triggered { window, count } => run_triggered(&mut logger, window, count)?,
    }

    logger.storage().sync()?;
    Ok(())
}
