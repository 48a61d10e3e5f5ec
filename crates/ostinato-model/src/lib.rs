//! The versioned musical model: clips, automation, harmony, device chains,
//! routing, and modulation links.
//!
//! Everything here is plain data plus ordered-container operations; the
//! engine crate owns the mutexes, version counters, and snapshot publication
//! that make the model safe to read from the producer thread. Cross-references
//! between parts of the model are arena-style ids (track, device, node, link,
//! note, chord, scale), never pointers, so snapshots are shallow value copies.

pub mod automation;
pub mod chain;
pub mod chord;
pub mod clip;
pub mod harmony;
pub mod modulation;
pub mod routing;
pub mod scale;
pub mod undo;

pub use automation::{AutomationClip, AutomationPoint};
pub use chain::{Device, DeviceCapability, DeviceKind, EuclideanConfig, TrackChain, DEVICE_ID_AUTO, HOST_SLOT_DIRECT};
pub use chord::{chord_degrees_for_quality, deterministic_jitter, resolve_chord_pitches, ChordQuality};
pub use clip::{ChordEvent, ClipEvent, ClipEventKind, MusicalClip, NoteEvent, ParamEvent, PARAM_TARGET_ALL};
pub use harmony::{harmony_at, HarmonyEvent, HarmonyTimeline};
pub use modulation::{ModLink, ModLinkError, ModRate, ModRegistry, ModSourceKind, ModSourceRef, ModSourceState, ModTargetKind, ModTargetRef, MOD_LINK_ID_AUTO};
pub use routing::{validate_route, RouteError, TrackRoute, TrackRouteKind, TrackRouting};
pub use scale::{interval_to_cents, quantize_to_scale, resolve_degree, resolved_pitch_from_cents, Interval, ResolvedPitch, Scale, ScaleRegistry};
pub use undo::UndoEntry;
