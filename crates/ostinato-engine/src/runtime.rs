//! Per-track model state and its runtime wrapper.
//!
//! Edits take the track mutex, bump the clip version, and swap freshly
//! built immutable snapshots; the producer loads the snapshot pointers once
//! per block with acquire semantics and never locks on the render path.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use ostinato_core::AtomicFlag;
use ostinato_host::HostController;
use ostinato_model::{
    AutomationClip, ClipEvent, Device, ModLink, ModSourceState, MusicalClip, TrackChain,
    TrackRouting,
};

use crate::mirror::ParamMirror;
use crate::notes::ActiveNoteTable;

/// The editable model for one track.
#[derive(Debug, Default)]
pub struct TrackModel {
    pub clip: MusicalClip,
    pub automation: Vec<AutomationClip>,
    pub harmony_quantize: bool,
    pub chain: TrackChain,
    pub routing: TrackRouting,
    pub mod_registry: ostinato_model::ModRegistry,
}

/// Immutable per-block view of the clip.
#[derive(Debug, Default)]
pub struct ClipSnapshot {
    pub events: Vec<ClipEvent>,
}

impl ClipSnapshot {
    /// Events with `start <= nanotick < end`.
    pub fn events_in_range(&self, start: u64, end: u64) -> &[ClipEvent] {
        let from = self.events.partition_point(|e| e.nanotick() < start);
        let to = self.events.partition_point(|e| e.nanotick() < end);
        &self.events[from..to]
    }
}

/// Immutable per-block view of everything else the scheduler reads.
#[derive(Debug, Default)]
pub struct TrackStateSnapshot {
    pub devices: Vec<Device>,
    pub mod_links: Vec<ModLink>,
    pub mod_sources: Vec<ModSourceState>,
    pub automation: Vec<AutomationClip>,
    pub routing: TrackRouting,
    pub harmony_quantize: bool,
}

/// One contiguous run of enabled VST devices, processed by the host as a
/// unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSegment {
    pub start_slot: u32,
    pub len: u32,
}

impl TrackStateSnapshot {
    /// Contiguous runs of enabled VST devices, in chain order.
    pub fn vst_segments(&self) -> smallvec::SmallVec<[ChainSegment; 4]> {
        let mut segments = smallvec::SmallVec::new();
        let mut current: Option<ChainSegment> = None;
        for device in &self.devices {
            if device.kind.is_vst() && !device.bypass {
                match &mut current {
                    Some(segment) => segment.len += 1,
                    None => {
                        current = Some(ChainSegment {
                            start_slot: device.host_slot_index,
                            len: 1,
                        })
                    }
                }
            } else if let Some(segment) = current.take() {
                segments.push(segment);
            }
        }
        if let Some(segment) = current {
            segments.push(segment);
        }
        segments
    }

    /// Default param target: the first enabled VST device's host slot.
    pub fn first_vst_slot(&self) -> Option<u32> {
        self.devices
            .iter()
            .find(|d| d.kind.is_vst() && !d.bypass)
            .map(|d| d.host_slot_index)
    }
}

/// Cross-track MIDI and audio arriving from other tracks' routing.
#[derive(Debug, Default)]
pub struct InboundQueue {
    pub midi: Vec<ostinato_shm::EventEntry>,
    pub audio: Vec<f32>,
}

/// Everything the engine holds for one track.
pub struct TrackRuntime {
    pub track_id: u32,
    model: Mutex<TrackModel>,
    clip_snapshot: ArcSwap<ClipSnapshot>,
    state_snapshot: ArcSwap<TrackStateSnapshot>,
    clip_version: AtomicU32,

    pub controller: Mutex<HostController>,
    pub needs_restart: AtomicFlag,
    /// Shared with the audio callback's track bindings.
    pub host_ready: Arc<AtomicFlag>,
    /// Becomes true after the host completes its first block; also shared
    /// with the audio callback.
    pub active: Arc<AtomicFlag>,

    pub mirror: ParamMirror,
    pub active_notes: Mutex<ActiveNoteTable>,
    pub inbound: Mutex<InboundQueue>,
    /// MIDI emitted this block, staged for cross-track routing.
    pub routed_midi: Mutex<Vec<ostinato_shm::EventEntry>>,

    pub ring_std_drop_count: ostinato_core::AtomicU64Cell,
    pub ring_std_drop_sample: ostinato_core::AtomicU64Cell,
    pub ring_std_panic_pending: AtomicFlag,
}

impl TrackRuntime {
    pub fn new(track_id: u32) -> Arc<Self> {
        Arc::new(Self {
            track_id,
            model: Mutex::new(TrackModel {
                harmony_quantize: true,
                ..TrackModel::default()
            }),
            clip_snapshot: ArcSwap::from_pointee(ClipSnapshot::default()),
            state_snapshot: ArcSwap::from_pointee(TrackStateSnapshot {
                harmony_quantize: true,
                ..TrackStateSnapshot::default()
            }),
            clip_version: AtomicU32::new(0),
            controller: Mutex::new(HostController::new()),
            needs_restart: AtomicFlag::new(false),
            host_ready: Arc::new(AtomicFlag::new(false)),
            active: Arc::new(AtomicFlag::new(false)),
            mirror: ParamMirror::new(),
            active_notes: Mutex::new(ActiveNoteTable::new()),
            inbound: Mutex::new(InboundQueue::default()),
            routed_midi: Mutex::new(Vec::new()),
            ring_std_drop_count: ostinato_core::AtomicU64Cell::new(0),
            ring_std_drop_sample: ostinato_core::AtomicU64Cell::new(0),
            ring_std_panic_pending: AtomicFlag::new(false),
        })
    }

    pub fn clip_version(&self) -> u32 {
        self.clip_version.load(Ordering::Acquire)
    }

    pub fn host_ready_arc(&self) -> Arc<AtomicFlag> {
        Arc::clone(&self.host_ready)
    }

    pub fn active_arc(&self) -> Arc<AtomicFlag> {
        Arc::clone(&self.active)
    }

    /// Bump the clip version; returns the new value. Callers publish a
    /// snapshot right after.
    pub fn bump_clip_version(&self) -> u32 {
        self.clip_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn clip_snapshot(&self) -> Arc<ClipSnapshot> {
        self.clip_snapshot.load_full()
    }

    pub fn state_snapshot(&self) -> Arc<TrackStateSnapshot> {
        self.state_snapshot.load_full()
    }

    /// Run an edit under the track mutex, then rebuild and publish both
    /// snapshots.
    pub fn edit_model<R>(&self, edit: impl FnOnce(&mut TrackModel) -> R) -> R {
        let mut model = self.model.lock();
        let result = edit(&mut model);
        self.publish_snapshots(&model);
        result
    }

    /// Read the model under the mutex without publishing.
    pub fn read_model<R>(&self, read: impl FnOnce(&TrackModel) -> R) -> R {
        read(&self.model.lock())
    }

    fn publish_snapshots(&self, model: &TrackModel) {
        self.clip_snapshot.store(Arc::new(ClipSnapshot {
            events: model.clip.events().to_vec(),
        }));
        self.state_snapshot.store(Arc::new(TrackStateSnapshot {
            devices: model.chain.devices().to_vec(),
            mod_links: model.mod_registry.links().to_vec(),
            mod_sources: model.mod_registry.sources().to_vec(),
            automation: model.automation.clone(),
            routing: model.routing,
            harmony_quantize: model.harmony_quantize,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_model::{DeviceKind, EuclideanConfig, DEVICE_ID_AUTO};

    fn device(kind: DeviceKind, slot: u32, bypass: bool) -> Device {
        Device {
            id: DEVICE_ID_AUTO,
            kind,
            capability_mask: 0,
            patcher_node_id: 0,
            host_slot_index: slot,
            bypass,
            euclidean: None,
        }
    }

    #[test]
    fn edits_publish_fresh_snapshots() {
        let runtime = TrackRuntime::new(0);
        let before = runtime.clip_snapshot();
        runtime.edit_model(|model| {
            model.clip.write_note(0, 960_000, 60, 100, 0, None);
        });
        let after = runtime.clip_snapshot();
        assert!(before.events.is_empty());
        assert_eq!(after.events.len(), 1);
    }

    #[test]
    fn old_snapshots_stay_valid_after_edit() {
        let runtime = TrackRuntime::new(0);
        runtime.edit_model(|model| {
            model.clip.write_note(0, 100, 60, 100, 0, None);
        });
        let held = runtime.clip_snapshot();
        runtime.edit_model(|model| {
            model.clip.write_note(960_000, 100, 64, 100, 0, None);
        });
        // The held snapshot is immutable; the new one sees both notes.
        assert_eq!(held.events.len(), 1);
        assert_eq!(runtime.clip_snapshot().events.len(), 2);
    }

    #[test]
    fn clip_version_is_strictly_increasing() {
        let runtime = TrackRuntime::new(0);
        let v1 = runtime.bump_clip_version();
        let v2 = runtime.bump_clip_version();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
        assert_eq!(runtime.clip_version(), 2);
    }

    #[test]
    fn snapshot_range_query_is_half_open() {
        let runtime = TrackRuntime::new(0);
        runtime.edit_model(|model| {
            for tick in [0u64, 960_000, 1_920_000] {
                model.clip.write_note(tick, 100, 60, 100, 0, None);
            }
        });
        let snapshot = runtime.clip_snapshot();
        assert_eq!(snapshot.events_in_range(0, 960_000).len(), 1);
        assert_eq!(snapshot.events_in_range(0, 960_001).len(), 2);
    }

    #[test]
    fn vst_segments_split_on_bypass_and_patchers() {
        let mut snapshot = TrackStateSnapshot::default();
        snapshot.devices = vec![
            device(DeviceKind::VstInstrument, 0, false),
            device(DeviceKind::VstEffect, 1, false),
            device(DeviceKind::PatcherAudio, 0, false),
            device(DeviceKind::VstEffect, 2, true),
            device(DeviceKind::VstEffect, 3, false),
        ];
        let segments = snapshot.vst_segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], ChainSegment { start_slot: 0, len: 2 });
        assert_eq!(segments[1], ChainSegment { start_slot: 3, len: 1 });
        assert_eq!(snapshot.first_vst_slot(), Some(0));
    }

    #[test]
    fn euclidean_override_reaches_snapshot() {
        let runtime = TrackRuntime::new(0);
        runtime.edit_model(|model| {
            let id = model
                .chain
                .add_device(device(DeviceKind::PatcherEvent, 0, false), DEVICE_ID_AUTO)
                .unwrap();
            model.chain.set_euclidean_config(id, EuclideanConfig { hits: 9, ..Default::default() });
        });
        let snapshot = runtime.state_snapshot();
        assert_eq!(snapshot.devices[0].euclidean.unwrap().hits, 9);
    }
}
