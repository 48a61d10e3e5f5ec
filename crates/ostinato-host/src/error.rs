//! Error types for host lifecycle management.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("host connection failed: {0}")]
    ConnectionFailed(String),

    #[error("host socket never appeared at {path}")]
    SocketTimeout { path: PathBuf },

    #[error("failed to spawn host process {path}: {reason}")]
    SpawnFailed { path: PathBuf, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("host is not connected")]
    NotConnected,

    #[error("region geometry does not match engine config: {0}")]
    GeometryMismatch(String),

    #[error("plugin cache error at {path}: {reason}")]
    PluginCache { path: PathBuf, reason: String },

    #[error("shared memory error: {0}")]
    Shm(#[from] ostinato_shm::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
