//! Error types for shared-memory setup and verification.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("bad magic {found:#010x}, expected {expected:#010x}")]
    BadMagic { found: u32, expected: u32 },

    #[error("unsupported region version {found}, expected {expected}")]
    BadVersion { found: u16, expected: u16 },

    #[error("region geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("ring capacity {0} is not a nonzero power of two")]
    BadRingCapacity(u32),

    #[error("region too small: {actual} bytes, need {required}")]
    RegionTooSmall { actual: usize, required: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
