//! The Ostinato engine scheduler.
//!
//! Converts the versioned musical model into per-block, sample-accurate,
//! priority-ordered event streams for out-of-process plugin hosts; applies
//! plugin delay compensation; survives host hangs through a watchdog and
//! parameter-mirror replay; and speaks the versioned diff protocol to the
//! editor over the UI shared-memory region.
//!
//! Thread layout (one engine process):
//! - producer: drives per-track block emission,
//! - consumer: mailbox polling, watchdog pump, restart orchestration, UI
//!   snapshot publication,
//! - ui: drains the editor command ring and applies edits,
//! - audio callback: mixes completed output slots (driven by the device).

pub mod error;
pub use error::{Error, Result};

pub mod consumer;
pub mod engine;
pub mod mirror;
pub mod mix;
pub mod notes;
pub mod patcher_eval;
pub mod producer;
pub mod runtime;
pub mod scratchpad;
pub mod ui;
pub mod ui_region;

pub use engine::{Engine, EngineOptions, EngineShared};
pub use mirror::ParamMirror;
pub use mix::{AudioMixer, TrackMixSource};
pub use notes::{ActiveNote, ActiveNoteTable};
pub use runtime::{ClipSnapshot, TrackModel, TrackRuntime, TrackStateSnapshot};
pub use scratchpad::{priority_band, Scratchpad, SCRATCHPAD_CAPACITY};
pub use ui_region::UiRegion;
