//! Engine-level error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("engine setup failed: {0}")]
    Setup(String),

    #[error("no such track {0}")]
    NoSuchTrack(u32),

    #[error(transparent)]
    Core(#[from] ostinato_core::Error),

    #[error(transparent)]
    Shm(#[from] ostinato_shm::Error),

    #[error(transparent)]
    Host(#[from] ostinato_host::Error),

    #[error(transparent)]
    Patcher(#[from] ostinato_patcher::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
