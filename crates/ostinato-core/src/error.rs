//! Error types shared across the engine crates.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid loop range [{start}, {end})")]
    InvalidLoopRange { start: u64, end: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
