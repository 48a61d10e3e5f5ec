//! The engine-owned UI shared-memory region.
//!
//! The engine creates and initializes the region; the editor process maps
//! it read-write. Snapshot and header publication happens under the
//! double-bump `ui_version` protocol, serialized engine-side by a writer
//! mutex (the seqlock has exactly one writer at a time).

use parking_lot::Mutex;

use ostinato_core::EngineConfig;
use ostinato_model::HarmonyEvent;
use ostinato_shm::{
    create_ui_region, EventRing, SharedMemoryRegion, UiClipSnapshot, UiHarmonyEvent,
    UiHarmonySnapshot, UiRegionGeometry, UiShmHeader, UI_MAX_HARMONY_EVENTS, UI_MAX_TRACKS,
};

use crate::error::Result;

/// Transport/playhead fields published each consumer tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct UiTransportState {
    pub visual_sample_count: u64,
    pub global_nanotick_playhead: u64,
    pub track_count: u32,
    pub transport_playing: bool,
    pub clip_version: u32,
    pub harmony_version: u32,
    pub track_peak_rms: [f32; UI_MAX_TRACKS],
}

pub struct UiRegion {
    region: SharedMemoryRegion,
    ring_ui_in: EventRing,
    ring_ui_out: EventRing,
    writer: Mutex<()>,
}

impl UiRegion {
    pub fn create(name: &str, config: &EngineConfig) -> Result<Self> {
        SharedMemoryRegion::unlink_stale(name);
        let geometry = UiRegionGeometry::from_config(config);
        let region = create_ui_region(name, &geometry)?;
        // Safety: the region was initialized by create_ui_region above.
        let header = unsafe { region.at::<UiShmHeader>(0) };
        let ring_ui_in =
            unsafe { EventRing::from_base(region.base_ptr(), header.ring_ui_in_offset) }
                .expect("ui-in ring initialized by create_ui_region");
        let ring_ui_out =
            unsafe { EventRing::from_base(region.base_ptr(), header.ring_ui_out_offset) }
                .expect("ui-out ring initialized by create_ui_region");
        Ok(Self {
            region,
            ring_ui_in,
            ring_ui_out,
            writer: Mutex::new(()),
        })
    }

    fn header(&self) -> &UiShmHeader {
        // Safety: written at create time, atomics inside.
        unsafe { self.region.at::<UiShmHeader>(0) }
    }

    pub fn ring_ui_in(&self) -> EventRing {
        self.ring_ui_in
    }

    pub fn ring_ui_out(&self) -> EventRing {
        self.ring_ui_out
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn ui_version(&self) -> u64 {
        self.header().read_version()
    }

    /// Publish transport/header state under the double bump.
    pub fn publish_transport(&self, state: &UiTransportState) {
        let _writer = self.writer.lock();
        let header = self.header();
        header.begin_publish();
        // Safety: single writer held by the mutex; readers retry on odd or
        // changed versions.
        unsafe {
            let header = self.region.at_mut::<UiShmHeader>(0);
            (*header).ui_visual_sample_count = state.visual_sample_count;
            (*header).ui_global_nanotick_playhead = state.global_nanotick_playhead;
            (*header).ui_track_count = state.track_count.min(UI_MAX_TRACKS as u32);
            (*header).ui_transport_state = u32::from(state.transport_playing);
            (*header).ui_clip_version = state.clip_version;
            (*header).ui_harmony_version = state.harmony_version;
            (*header).ui_track_peak_rms = state.track_peak_rms;
        }
        header.end_publish();
    }

    /// Publish the harmony snapshot, capped at the UI limit.
    pub fn publish_harmony(&self, events: &[HarmonyEvent], harmony_version: u32) {
        let _writer = self.writer.lock();
        let header = self.header();
        header.begin_publish();
        unsafe {
            let snapshot = self
                .region
                .at_mut::<UiHarmonySnapshot>(header.harmony_snapshot_offset);
            let count = events.len().min(UI_MAX_HARMONY_EVENTS);
            (*snapshot).event_count = count as u32;
            for (slot, event) in (&mut (*snapshot).events)[..count].iter_mut().zip(events) {
                *slot = UiHarmonyEvent {
                    nanotick: event.nanotick,
                    root: event.root,
                    scale_id: event.scale_id,
                    flags: 0,
                    reserved: 0,
                };
            }
            let header_mut = self.region.at_mut::<UiShmHeader>(0);
            (*header_mut).ui_harmony_version = harmony_version;
        }
        header.end_publish();
    }

    /// Publish a prepared clip-window snapshot.
    pub fn publish_clip_window(&self, snapshot: &UiClipSnapshot) {
        let _writer = self.writer.lock();
        let header = self.header();
        header.begin_publish();
        unsafe {
            let slot = self
                .region
                .at_mut::<UiClipSnapshot>(header.clip_snapshot_offset);
            *slot = *snapshot;
        }
        header.end_publish();
    }

    /// Seqlock-style consistent read of the harmony snapshot (test and
    /// editor-side helper).
    pub fn read_harmony(&self) -> (u32, Vec<UiHarmonyEvent>) {
        let header = self.header();
        loop {
            let before = header.read_version();
            if before % 2 != 0 {
                std::hint::spin_loop();
                continue;
            }
            let (version, events) = unsafe {
                let snapshot = self
                    .region
                    .at::<UiHarmonySnapshot>(header.harmony_snapshot_offset);
                let count = snapshot.event_count.min(UI_MAX_HARMONY_EVENTS as u32) as usize;
                (header.ui_harmony_version, snapshot.events[..count].to_vec())
            };
            if header.read_version() == before {
                return (version, events);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("ostinato_ui_{}_{}", tag, std::process::id())
    }

    #[test]
    fn create_initializes_rings() {
        let region = UiRegion::create(&unique_name("init"), &EngineConfig::default()).unwrap();
        assert!(region.ring_ui_in().is_empty());
        assert!(region.ring_ui_out().is_empty());
        assert_eq!(region.ui_version(), 0);
    }

    #[test]
    fn transport_publish_is_even_versioned() {
        let region = UiRegion::create(&unique_name("transport"), &EngineConfig::default()).unwrap();
        region.publish_transport(&UiTransportState {
            visual_sample_count: 24_000,
            global_nanotick_playhead: 960_000,
            track_count: 1,
            transport_playing: true,
            clip_version: 3,
            harmony_version: 1,
            track_peak_rms: [0.0; UI_MAX_TRACKS],
        });
        assert_eq!(region.ui_version(), 2);
        assert_eq!(region.ui_version() % 2, 0);
    }

    #[test]
    fn harmony_snapshot_round_trips() {
        let region = UiRegion::create(&unique_name("harmony"), &EngineConfig::default()).unwrap();
        let events = vec![
            HarmonyEvent { nanotick: 0, root: 0, scale_id: 1 },
            HarmonyEvent { nanotick: 960_000, root: 7, scale_id: 2 },
        ];
        region.publish_harmony(&events, 2);
        let (version, read) = region.read_harmony();
        assert_eq!(version, 2);
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].root, 7);
        assert_eq!(read[1].scale_id, 2);
    }

    #[test]
    fn harmony_snapshot_caps_at_limit() {
        let region = UiRegion::create(&unique_name("cap"), &EngineConfig::default()).unwrap();
        let events: Vec<HarmonyEvent> = (0..UI_MAX_HARMONY_EVENTS as u64 + 10)
            .map(|i| HarmonyEvent { nanotick: i, root: 0, scale_id: 1 })
            .collect();
        region.publish_harmony(&events, 1);
        let (_, read) = region.read_harmony();
        assert_eq!(read.len(), UI_MAX_HARMONY_EVENTS);
    }
}
