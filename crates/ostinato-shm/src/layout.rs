//! Track region layout: header, ring headers, mailbox, and sizing math.
//!
//! Layout is position-independent: the header stores byte offsets to every
//! section, all 64-byte aligned. Audio slots are an N-block ring; block `b`
//! lands in slot `b % num_blocks`.

use std::sync::atomic::{AtomicU32, AtomicU64};

use crate::error::{Error, Result};
use crate::payload::EventEntry;

/// 'DAW0' little-endian.
pub const SHM_MAGIC: u32 = 0x3041_5744;
pub const SHM_VERSION: u16 = 6;

/// Per-track region header. Written once by the region owner before any
/// consumer maps in; read-only afterwards.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(64))]
pub struct ShmHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub block_size: u32,
    pub sample_rate: f64,
    pub num_channels_in: u32,
    pub num_channels_out: u32,
    pub num_blocks: u32,
    pub channel_stride_bytes: u32,
    pub audio_in_offset: u64,
    pub audio_out_offset: u64,
    pub ring_std_offset: u64,
    pub ring_ctrl_offset: u64,
    pub ring_ui_offset: u64,
    pub mailbox_offset: u64,
}

impl ShmHeader {
    /// Verify magic and version; `Err` means an incompatible peer.
    pub fn verify(&self) -> Result<()> {
        if self.magic != SHM_MAGIC {
            return Err(Error::BadMagic {
                found: self.magic,
                expected: SHM_MAGIC,
            });
        }
        if self.version != SHM_VERSION {
            return Err(Error::BadVersion {
                found: self.version,
                expected: SHM_VERSION,
            });
        }
        Ok(())
    }

    /// Byte offset of one channel of one audio-in slot.
    #[inline]
    pub fn audio_in_slot_offset(&self, block_id: u32, channel: u32) -> u64 {
        let slot = u64::from(block_id % self.num_blocks.max(1));
        let stride = u64::from(self.channel_stride_bytes);
        let block_bytes = u64::from(self.num_channels_in) * stride;
        self.audio_in_offset + slot * block_bytes + u64::from(channel) * stride
    }

    /// Byte offset of one channel of one audio-out slot.
    #[inline]
    pub fn audio_out_slot_offset(&self, block_id: u32, channel: u32) -> u64 {
        let slot = u64::from(block_id % self.num_blocks.max(1));
        let stride = u64::from(self.channel_stride_bytes);
        let block_bytes = u64::from(self.num_channels_out) * stride;
        self.audio_out_offset + slot * block_bytes + u64::from(channel) * stride
    }
}

/// SPSC ring bookkeeping; one writer process, one reader process.
#[derive(Debug)]
#[repr(C, align(64))]
pub struct RingHeader {
    pub capacity: u32,
    pub entry_size: u32,
    pub read_index: AtomicU32,
    pub write_index: AtomicU32,
    pub reserved: [u32; 12],
}

/// Host-to-engine completion mailbox.
#[derive(Debug)]
#[repr(C, align(64))]
pub struct BlockMailbox {
    pub completed_block_id: AtomicU32,
    pub completed_sample_time: AtomicU64,
    pub replay_ack_sample_time: AtomicU64,
    pub reserved: [u32; 10],
}

#[inline]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Bytes of one audio channel in one slot, 64-byte aligned.
pub fn channel_stride_bytes(block_size: u32) -> usize {
    align_up(block_size as usize * std::mem::size_of::<f32>(), 64)
}

/// Bytes of one ring: header plus entries, 64-byte aligned.
pub fn ring_bytes(capacity: u32) -> usize {
    let header = align_up(std::mem::size_of::<RingHeader>(), 64);
    let entries = capacity as usize * std::mem::size_of::<EventEntry>();
    header + align_up(entries, 64)
}

/// Geometry inputs for computing a track region layout.
#[derive(Debug, Clone, Copy)]
pub struct TrackRegionGeometry {
    pub block_size: u32,
    pub sample_rate: f64,
    pub num_channels_in: u32,
    pub num_channels_out: u32,
    pub num_blocks: u32,
    pub ring_std_capacity: u32,
    pub ring_ctrl_capacity: u32,
    pub ring_ui_capacity: u32,
}

impl TrackRegionGeometry {
    pub fn from_config(config: &ostinato_core::EngineConfig) -> Self {
        Self {
            block_size: config.block_size,
            sample_rate: config.sample_rate,
            num_channels_in: config.num_channels_in,
            num_channels_out: config.num_channels_out,
            num_blocks: config.num_blocks,
            ring_std_capacity: config.ring_std_capacity,
            ring_ctrl_capacity: config.ring_ctrl_capacity,
            ring_ui_capacity: config.ring_ui_capacity,
        }
    }

    fn check_rings(&self) -> Result<()> {
        for cap in [
            self.ring_std_capacity,
            self.ring_ctrl_capacity,
            self.ring_ui_capacity,
        ] {
            if cap == 0 || !cap.is_power_of_two() {
                return Err(Error::BadRingCapacity(cap));
            }
        }
        Ok(())
    }

    /// Populate a header with computed offsets. Sections are laid out in
    /// order: audio-in, audio-out, ring-std, ring-ctrl, ring-ui, mailbox.
    pub fn build_header(&self) -> Result<(ShmHeader, usize)> {
        self.check_rings()?;
        let stride = channel_stride_bytes(self.block_size);
        let mut offset = align_up(std::mem::size_of::<ShmHeader>(), 64);

        let audio_in_offset = offset as u64;
        let in_bytes = self.num_channels_in as usize * stride * self.num_blocks as usize;
        offset += align_up(in_bytes, 64);

        let audio_out_offset = offset as u64;
        let out_bytes = self.num_channels_out as usize * stride * self.num_blocks as usize;
        offset += align_up(out_bytes, 64);

        let ring_std_offset = offset as u64;
        offset += align_up(ring_bytes(self.ring_std_capacity), 64);

        let ring_ctrl_offset = offset as u64;
        offset += align_up(ring_bytes(self.ring_ctrl_capacity), 64);

        let ring_ui_offset = offset as u64;
        offset += align_up(ring_bytes(self.ring_ui_capacity), 64);

        let mailbox_offset = offset as u64;
        offset += align_up(std::mem::size_of::<BlockMailbox>(), 64);

        let header = ShmHeader {
            magic: SHM_MAGIC,
            version: SHM_VERSION,
            flags: 0,
            block_size: self.block_size,
            sample_rate: self.sample_rate,
            num_channels_in: self.num_channels_in,
            num_channels_out: self.num_channels_out,
            num_blocks: self.num_blocks,
            channel_stride_bytes: stride as u32,
            audio_in_offset,
            audio_out_offset,
            ring_std_offset,
            ring_ctrl_offset,
            ring_ui_offset,
            mailbox_offset,
        };
        Ok((header, align_up(offset, 64)))
    }
}

/// Total bytes of a track region with the given geometry.
pub fn track_region_size(geometry: &TrackRegionGeometry) -> Result<usize> {
    geometry.build_header().map(|(_, size)| size)
}
