use thiserror::Error;

/// Failures reported by a storage adapter
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Address range out of bounds: {address:#x}+{len}")]
    OutOfBounds { address: u32, len: usize },

    #[error("Address {address:#x} is not aligned to {alignment} bytes")]
    Misaligned { address: u32, alignment: usize },

    #[error("Program operation failed at {0:#x}")]
    ProgramFailed(u32),

    #[error("Erase operation failed at {0:#x}")]
    EraseFailed(u32),

    #[error("Timed out after {0} ms waiting for exclusive flash access")]
    LockoutTimeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which storage operation a fatal failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Read,
    Program,
    Erase,
}

impl std::fmt::Display for StorageOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageOp::Read => write!(f, "read"),
            StorageOp::Program => write!(f, "program"),
            StorageOp::Erase => write!(f, "erase"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FlashLogError {
    #[error("Out of space: no erased page left in the log region")]
    OutOfSpace,

    #[error("Storage {op} failed at {address:#x}: {source}")]
    Storage {
        op: StorageOp,
        address: u32,
        #[source]
        source: StorageError,
    },

    #[error("Logger is faulted after a storage failure; flash state is unverified")]
    Faulted,

    #[error("Record length mismatch: expected {expected} bytes, got {actual}")]
    RecordLength { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlashLogError {
    /// True for failures after which the flash contents can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlashLogError::Storage { .. } | FlashLogError::Faulted)
    }
}

pub type Result<T> = std::result::Result<T, FlashLogError>;
