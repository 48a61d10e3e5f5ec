//! Time base, delay compensation, and shared primitives for the Ostinato engine.
//!
//! Everything in this crate is allocation-free after construction and safe to
//! call from the producer thread.

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub mod latency;
pub mod lockfree;
pub mod loops;
pub mod time;
pub mod uid;

pub use config::EngineConfig;
pub use latency::LatencyManager;
pub use lockfree::{AtomicFlag, AtomicU32Cell, AtomicU64Cell};
pub use loops::{LoopRange, WindowSpan};
pub use time::{NanotickConverter, StaticTempoProvider, TempoProvider, NANOTICKS_PER_QUARTER};
pub use uid::{fnv1a64, uid16_for_stable_id, Uid16};
