//! UI region layout: command/diff rings, snapshot windows, and the
//! double-bump publication counter.
//!
//! The engine owns this region and maps it read-write into the editor
//! process. Mutable state is published under `ui_version`: the writer
//! increments (odd = in flux), writes fields, increments again (even =
//! stable). Readers spin until they see the same even value before and
//! after reading.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::layout::{align_up, ring_bytes};

/// 'DWU0' little-endian; distinct from the track region magic.
pub const UI_SHM_MAGIC: u32 = 0x3055_5744;
pub const UI_SHM_VERSION: u16 = 6;

pub const UI_MAX_TRACKS: usize = 8;
pub const UI_MAX_CLIP_NOTES: usize = 4096;
pub const UI_MAX_CLIP_CHORDS: usize = 1024;
pub const UI_MAX_HARMONY_EVENTS: usize = 512;

/// UI region header.
#[derive(Debug)]
#[repr(C, align(64))]
pub struct UiShmHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    /// Double-bump publication counter; even when fields are stable.
    pub ui_version: AtomicU64,
    /// Visual playhead in samples (already PDC-aligned).
    pub ui_visual_sample_count: u64,
    pub ui_global_nanotick_playhead: u64,
    pub ui_track_count: u32,
    pub ui_transport_state: u32,
    pub ui_clip_version: u32,
    pub ui_harmony_version: u32,
    pub ring_ui_in_offset: u64,
    pub ring_ui_out_offset: u64,
    pub clip_snapshot_offset: u64,
    pub clip_snapshot_bytes: u64,
    pub harmony_snapshot_offset: u64,
    pub harmony_snapshot_bytes: u64,
    pub ui_track_peak_rms: [f32; UI_MAX_TRACKS],
}

impl UiShmHeader {
    pub fn verify(&self) -> Result<()> {
        if self.magic != UI_SHM_MAGIC {
            return Err(Error::BadMagic {
                found: self.magic,
                expected: UI_SHM_MAGIC,
            });
        }
        if self.version != UI_SHM_VERSION {
            return Err(Error::BadVersion {
                found: self.version,
                expected: UI_SHM_VERSION,
            });
        }
        Ok(())
    }

    /// First half of the double bump; leaves the counter odd.
    #[inline]
    pub fn begin_publish(&self) -> u64 {
        self.ui_version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Second half; the counter returns to even and readers may proceed.
    #[inline]
    pub fn end_publish(&self) {
        self.ui_version.fetch_add(1, Ordering::AcqRel);
    }

    /// Read the counter for the seqlock-style read protocol.
    #[inline]
    pub fn read_version(&self) -> u64 {
        self.ui_version.load(Ordering::Acquire)
    }
}

/// Per-track window descriptor inside the clip snapshot.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct UiClipTrack {
    pub track_id: u32,
    pub note_offset: u32,
    pub note_count: u32,
    pub chord_offset: u32,
    pub chord_count: u32,
    pub reserved: u32,
    pub clip_start_nanotick: u64,
    pub clip_end_nanotick: u64,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct UiClipNote {
    pub t_on: u64,
    pub t_off: u64,
    pub note_id: u32,
    pub pitch: u8,
    pub velocity: u8,
    pub column: u8,
    pub reserved: u8,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct UiClipChord {
    pub nanotick: u64,
    pub duration_nanoticks: u64,
    pub spread_nanoticks: u32,
    pub humanize_timing: u16,
    pub humanize_velocity: u16,
    pub chord_id: u32,
    pub degree: u8,
    pub quality: u8,
    pub inversion: u8,
    pub base_octave: u8,
    pub column: u32,
}

/// Clip window snapshot: per-track descriptors plus flat note/chord pools.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct UiClipSnapshot {
    pub track_count: u32,
    pub note_count: u32,
    pub chord_count: u32,
    /// Continuation cursor for paged window reads.
    pub next_event_index: u32,
    pub request_id: u32,
    /// Nonzero when the window fit completely.
    pub complete: u32,
    pub tracks: [UiClipTrack; UI_MAX_TRACKS],
    pub notes: [UiClipNote; UI_MAX_CLIP_NOTES],
    pub chords: [UiClipChord; UI_MAX_CLIP_CHORDS],
}

impl Default for UiClipSnapshot {
    fn default() -> Self {
        // The arrays are too large for derived Default; all-zero is the
        // valid empty snapshot.
        unsafe { std::mem::zeroed() }
    }
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct UiHarmonyEvent {
    pub nanotick: u64,
    pub root: u32,
    pub scale_id: u32,
    pub flags: u32,
    pub reserved: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct UiHarmonySnapshot {
    pub event_count: u32,
    pub reserved: [u32; 3],
    pub events: [UiHarmonyEvent; UI_MAX_HARMONY_EVENTS],
}

impl Default for UiHarmonySnapshot {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Geometry inputs for the UI region.
#[derive(Debug, Clone, Copy)]
pub struct UiRegionGeometry {
    pub ring_ui_in_capacity: u32,
    pub ring_ui_out_capacity: u32,
}

impl UiRegionGeometry {
    pub fn from_config(config: &ostinato_core::EngineConfig) -> Self {
        Self {
            ring_ui_in_capacity: config.ring_ui_capacity,
            ring_ui_out_capacity: config.ring_ui_out_capacity,
        }
    }

    /// Populate a header with computed offsets: ring-ui-in, ring-ui-out,
    /// clip snapshot, harmony snapshot.
    pub fn build_header(&self) -> Result<(UiShmHeader, usize)> {
        for cap in [self.ring_ui_in_capacity, self.ring_ui_out_capacity] {
            if cap == 0 || !cap.is_power_of_two() {
                return Err(Error::BadRingCapacity(cap));
            }
        }
        let mut offset = align_up(std::mem::size_of::<UiShmHeader>(), 64);

        let ring_ui_in_offset = offset as u64;
        offset += align_up(ring_bytes(self.ring_ui_in_capacity), 64);

        let ring_ui_out_offset = offset as u64;
        offset += align_up(ring_bytes(self.ring_ui_out_capacity), 64);

        let clip_snapshot_offset = offset as u64;
        let clip_snapshot_bytes = align_up(std::mem::size_of::<UiClipSnapshot>(), 64) as u64;
        offset += clip_snapshot_bytes as usize;

        let harmony_snapshot_offset = offset as u64;
        let harmony_snapshot_bytes = align_up(std::mem::size_of::<UiHarmonySnapshot>(), 64) as u64;
        offset += harmony_snapshot_bytes as usize;

        let header = UiShmHeader {
            magic: UI_SHM_MAGIC,
            version: UI_SHM_VERSION,
            flags: 0,
            ui_version: AtomicU64::new(0),
            ui_visual_sample_count: 0,
            ui_global_nanotick_playhead: 0,
            ui_track_count: 0,
            ui_transport_state: 0,
            ui_clip_version: 0,
            ui_harmony_version: 0,
            ring_ui_in_offset,
            ring_ui_out_offset,
            clip_snapshot_offset,
            clip_snapshot_bytes,
            harmony_snapshot_offset,
            harmony_snapshot_bytes,
            ui_track_peak_rms: [0.0; UI_MAX_TRACKS],
        };
        Ok((header, align_up(offset, 64)))
    }
}

/// Total bytes of the UI region.
pub fn ui_region_size(geometry: &UiRegionGeometry) -> Result<usize> {
    geometry.build_header().map(|(_, size)| size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(std::mem::align_of::<UiShmHeader>(), 64);

    fn geometry() -> UiRegionGeometry {
        UiRegionGeometry {
            ring_ui_in_capacity: 128,
            ring_ui_out_capacity: 256,
        }
    }

    #[test]
    fn sections_are_ordered_and_aligned() {
        let (header, size) = geometry().build_header().unwrap();
        assert!(header.ring_ui_in_offset < header.ring_ui_out_offset);
        assert!(header.ring_ui_out_offset < header.clip_snapshot_offset);
        assert!(header.clip_snapshot_offset < header.harmony_snapshot_offset);
        for offset in [
            header.ring_ui_in_offset,
            header.ring_ui_out_offset,
            header.clip_snapshot_offset,
            header.harmony_snapshot_offset,
        ] {
            assert_eq!(offset % 64, 0);
        }
        assert_eq!(size % 64, 0);
        assert!(
            size as u64 >= header.harmony_snapshot_offset + header.harmony_snapshot_bytes
        );
    }

    #[test]
    fn double_bump_protocol() {
        let (header, _) = geometry().build_header().unwrap();
        assert_eq!(header.read_version(), 0);
        let in_flux = header.begin_publish();
        assert_eq!(in_flux % 2, 1);
        header.end_publish();
        assert_eq!(header.read_version(), 2);
        assert_eq!(header.read_version() % 2, 0);
    }

    #[test]
    fn verify_rejects_track_region_magic() {
        let (mut header, _) = geometry().build_header().unwrap();
        assert!(header.verify().is_ok());
        header.magic = crate::layout::SHM_MAGIC;
        assert!(header.verify().is_err());
    }

    #[test]
    fn snapshot_caps_match_contract() {
        assert_eq!(UI_MAX_TRACKS, 8);
        assert_eq!(UI_MAX_CLIP_NOTES, 4096);
        assert_eq!(UI_MAX_CLIP_CHORDS, 1024);
        assert_eq!(UI_MAX_HARMONY_EVENTS, 512);
        let snapshot = UiClipSnapshot::default();
        assert_eq!(snapshot.track_count, 0);
        assert_eq!(snapshot.notes.len(), UI_MAX_CLIP_NOTES);
    }
}
