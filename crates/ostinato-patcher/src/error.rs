//! Error types for graph edits and preset IO.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("preset IO failed at {path}: {reason}")]
    PresetIo { path: PathBuf, reason: String },

    #[error("preset schema version {found} unsupported (expected {expected})")]
    PresetSchema { found: u32, expected: u32 },

    #[error("preset references unknown node type {0:?}")]
    UnknownNodeType(String),

    #[error("preset graph is invalid: {0}")]
    InvalidPresetGraph(String),
}

pub type Result<T> = std::result::Result<T, Error>;
