//! # Ostinato - engine scheduler for a multi-track DAW
//!
//! Umbrella crate coordinating the engine subsystems:
//! - **ostinato-core** - time base, delay compensation, loop wrap, config
//! - **ostinato-model** - clips, harmony, device chains, routing, modulation
//! - **ostinato-shm** - shared-memory layout, event rings, wire payloads
//! - **ostinato-host** - host process lifecycle, control socket, watchdog
//! - **ostinato-patcher** - patcher DAG, kernels, presets
//! - **ostinato-engine** - block scheduler, consumer, UI protocol, mixer
//!
//! ## Quick start
//!
//! ```ignore
//! use ostinato::prelude::*;
//!
//! let engine = Engine::start(EngineConfig::default(), EngineOptions::from_env())?;
//! engine.shared.playing.set(true);
//! // ... render via the audio callback, edit via the UI region ...
//! engine.stop();
//! ```

/// Re-export of ostinato-core for direct access.
pub use ostinato_core as core;

pub use ostinato_core::{
    EngineConfig, LatencyManager, LoopRange, NanotickConverter, StaticTempoProvider,
    TempoProvider, NANOTICKS_PER_QUARTER,
};

pub use ostinato_model::{
    AutomationClip, ChordEvent, ClipEvent, Device, DeviceKind, HarmonyEvent, HarmonyTimeline,
    ModLink, ModRegistry, MusicalClip, NoteEvent, ScaleRegistry, TrackChain, TrackRouting,
};

pub use ostinato_shm::{
    EventEntry, EventRing, EventType, MidiPayload, ParamPayload, SharedMemoryRegion, ShmHeader,
    UiCommand, UiDiff,
};

pub use ostinato_host::{HostConfig, HostController, PluginCache, Watchdog};

pub use ostinato_patcher::{PatcherGraph, PatcherGraphState, PatcherNodeType, PresetLibrary};

pub use ostinato_engine::{
    engine::{Engine, EngineOptions, EngineShared},
    ActiveNoteTable, AudioMixer, ParamMirror, Scratchpad, TrackRuntime, UiRegion,
};

/// Common imports for engine embedders.
pub mod prelude {
    pub use ostinato_core::{EngineConfig, LoopRange, NANOTICKS_PER_QUARTER};
    pub use ostinato_engine::engine::{Engine, EngineOptions};
    pub use ostinato_model::{HarmonyEvent, MusicalClip};
    pub use ostinato_shm::{UiCommand, UiDiff};
}
