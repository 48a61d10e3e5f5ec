//! Shared-memory transport between the engine, its plugin host children,
//! and the UI editor process.
//!
//! Each track gets one region carrying audio slot rings, three SPSC event
//! rings (std, ctrl, ui-in), and a completion mailbox. A separate UI region
//! carries the command/diff rings and snapshot windows. All cross-process
//! exchange happens through atomic indexes on 64-byte-aligned entries; no
//! lock ever crosses a process boundary.

pub mod error;
pub use error::{Error, Result};

pub mod layout;
pub mod payload;
pub mod region;
pub mod ring;
pub mod ui_layout;
pub mod ui_protocol;

pub use layout::{
    align_up, channel_stride_bytes, ring_bytes, track_region_size, BlockMailbox, RingHeader,
    ShmHeader, TrackRegionGeometry, SHM_MAGIC, SHM_VERSION,
};
pub use payload::{
    EventEntry, EventType, MidiPayload, MusicalLogicPayload, ParamPayload, TransportPayload,
    EVENT_FLAG_MUSICAL_LOGIC, MIDI_STATUS_NOTE_OFF, MIDI_STATUS_NOTE_ON,
    MUSICAL_LOGIC_KIND_DEGREE, MUSICAL_LOGIC_KIND_GATE,
};
pub use region::{create_track_region, create_ui_region, SharedMemoryRegion};
pub use ring::EventRing;
pub use ui_layout::{
    ui_region_size, UiClipChord, UiClipNote, UiClipSnapshot, UiClipTrack, UiHarmonyEvent,
    UiHarmonySnapshot, UiRegionGeometry, UiShmHeader, UI_MAX_CLIP_CHORDS, UI_MAX_CLIP_NOTES,
    UI_MAX_HARMONY_EVENTS, UI_MAX_TRACKS, UI_SHM_MAGIC, UI_SHM_VERSION,
};
pub use ui_protocol::{
    UiChordDiffType, UiCommand, UiCommandType, UiDiff, UiDiffType, UiHarmonyDiffType,
    WireEuclideanConfig, WirePatcherConfig,
};
