//! Per-block evaluation context handed to each kernel.

use ostinato_model::HarmonyEvent;
use ostinato_shm::EventEntry;

/// Capacity of one node's event output buffer.
pub const NODE_EVENT_CAPACITY: usize = 1024;

/// Fixed-capacity event output buffer for one node. Overflow is recorded,
/// never silently swallowed.
#[derive(Clone)]
pub struct NodeEventBuffer {
    entries: Vec<EventEntry>,
    count: usize,
    last_overflow_tick: Option<u64>,
}

impl Default for NodeEventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeEventBuffer {
    pub fn new() -> Self {
        Self {
            entries: vec![EventEntry::default(); NODE_EVENT_CAPACITY],
            count: 0,
            last_overflow_tick: None,
        }
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.last_overflow_tick = None;
    }

    pub fn push(&mut self, entry: EventEntry, overflow_tick: u64) -> bool {
        if self.count < self.entries.len() {
            self.entries[self.count] = entry;
            self.count += 1;
            true
        } else {
            self.last_overflow_tick = Some(overflow_tick);
            false
        }
    }

    pub fn events(&self) -> &[EventEntry] {
        &self.entries[..self.count]
    }

    pub fn events_mut(&mut self) -> &mut [EventEntry] {
        &mut self.entries[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn last_overflow_tick(&self) -> Option<u64> {
        self.last_overflow_tick
    }

    /// Adopt events produced by an upstream node.
    pub fn extend_from(&mut self, other: &NodeEventBuffer) {
        for entry in other.events() {
            self.push(*entry, entry.sample_time);
        }
    }
}

/// Planar audio scratch: `channels * frames` f32 samples.
pub struct PatcherAudioBlock {
    data: Vec<f32>,
    channels: usize,
    frames: usize,
}

impl PatcherAudioBlock {
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            data: vec![0.0; channels * frames],
            channels,
            frames,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, ch: usize) -> &[f32] {
        &self.data[ch * self.frames..(ch + 1) * self.frames]
    }

    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        &mut self.data[ch * self.frames..(ch + 1) * self.frames]
    }

    pub fn silence(&mut self) {
        self.data.fill(0.0);
    }
}

/// Everything a kernel may read or write during one block.
///
/// Buffers are borrowed from the track runtime; kernels never allocate.
pub struct PatcherContext<'a> {
    pub block_start_tick: u64,
    pub block_end_tick: u64,
    pub block_start_sample: u64,
    pub sample_rate: f32,
    pub tempo_bpm: f32,
    pub num_frames: u32,

    /// The node's event output buffer.
    pub events: &'a mut NodeEventBuffer,

    /// Audio scratch for audio-kind nodes.
    pub audio: Option<&'a mut PatcherAudioBlock>,

    /// Harmony timeline snapshot for degree-aware kernels.
    pub harmony: &'a [HarmonyEvent],

    /// Block-rate modulation outputs, one slot per output.
    pub mod_outputs: &'a mut [f32],
    /// Sample-rate modulation outputs, `mod_outputs.len() * stride`.
    pub mod_output_samples: &'a mut [f32],
    pub mod_output_stride: usize,

    /// Sample-rate modulation inputs from upstream nodes.
    pub mod_inputs: &'a [f32],
    pub mod_input_stride: usize,
}

impl PatcherContext<'_> {
    /// Samples per nanotick at the context tempo.
    #[inline]
    pub fn samples_per_tick(&self) -> f64 {
        let bpm = if self.tempo_bpm > 0.0 {
            f64::from(self.tempo_bpm)
        } else {
            120.0
        };
        f64::from(self.sample_rate) * 60.0 / (bpm * ostinato_core::NANOTICKS_PER_QUARTER as f64)
    }

    /// Sample time of a nanotick inside this block.
    #[inline]
    pub fn sample_for_tick(&self, tick: u64) -> u64 {
        let delta = tick.saturating_sub(self.block_start_tick);
        self.block_start_sample + (delta as f64 * self.samples_per_tick()).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_shm::EventType;

    #[test]
    fn buffer_records_overflow_tick() {
        let mut buffer = NodeEventBuffer::new();
        for i in 0..NODE_EVENT_CAPACITY {
            assert!(buffer.push(
                EventEntry::typed(EventType::Midi, i as u64, 0),
                i as u64
            ));
        }
        assert!(!buffer.push(EventEntry::typed(EventType::Midi, 9999, 0), 4242));
        assert_eq!(buffer.len(), NODE_EVENT_CAPACITY);
        assert_eq!(buffer.last_overflow_tick(), Some(4242));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.last_overflow_tick(), None);
    }

    #[test]
    fn audio_block_channels_are_disjoint() {
        let mut block = PatcherAudioBlock::new(2, 4);
        block.channel_mut(0).fill(1.0);
        block.channel_mut(1).fill(2.0);
        assert_eq!(block.channel(0), &[1.0; 4]);
        assert_eq!(block.channel(1), &[2.0; 4]);
        block.silence();
        assert_eq!(block.channel(1), &[0.0; 4]);
    }
}
