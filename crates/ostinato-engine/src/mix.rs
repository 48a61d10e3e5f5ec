//! Audio device callback: mix completed track blocks into the output.
//!
//! The callback never blocks and never allocates. Track bindings are
//! published to it as an atomically swapped immutable vector, rebuilt by
//! the consumer whenever a host connects or restarts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use ostinato_core::AtomicFlag;
use ostinato_shm::SharedMemoryRegion;

/// UI meters are published as f32 bit patterns so the callback stays
/// lock-free.
pub struct TrackMeter {
    peak_bits: AtomicU32,
    rms_bits: AtomicU32,
}

impl Default for TrackMeter {
    fn default() -> Self {
        Self {
            peak_bits: AtomicU32::new(0),
            rms_bits: AtomicU32::new(0),
        }
    }
}

impl TrackMeter {
    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak_bits.load(Ordering::Acquire))
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms_bits.load(Ordering::Acquire))
    }

    fn publish(&self, peak: f32, rms: f32) {
        self.peak_bits.store(peak.to_bits(), Ordering::Release);
        self.rms_bits.store(rms.to_bits(), Ordering::Release);
    }
}

/// One track's audio-out binding as seen by the callback.
pub struct TrackMixSource {
    pub track_id: u32,
    pub region: Arc<SharedMemoryRegion>,
    pub audio_out_offset: u64,
    pub channel_stride_bytes: u32,
    pub num_channels_out: u32,
    pub num_blocks: u32,
    pub mailbox_offset: u64,
    pub host_ready: Arc<AtomicFlag>,
    pub active: Arc<AtomicFlag>,
    pub meter: Arc<TrackMeter>,
}

impl TrackMixSource {
    fn completed_block_id(&self) -> u32 {
        // Safety: the mailbox offset was verified when the region bound.
        let mailbox = unsafe {
            self.region
                .at::<ostinato_shm::BlockMailbox>(self.mailbox_offset)
        };
        mailbox.completed_block_id.load(Ordering::Acquire)
    }
}

/// Mixes completed blocks at a fixed per-track gain and publishes playback
/// position for producer back-pressure.
pub struct AudioMixer {
    block_size: u32,
    num_blocks: u32,
    mix_gain: f32,
    tracks: ArcSwap<Vec<TrackMixSource>>,
    playback_block_id: Arc<AtomicU32>,
    last_played_block_id: u32,
}

impl AudioMixer {
    /// `playback_block_id` is the engine-shared counter the producer reads
    /// for back-pressure.
    pub fn new(
        block_size: u32,
        num_blocks: u32,
        mix_gain: f32,
        playback_block_id: Arc<AtomicU32>,
    ) -> Self {
        Self {
            block_size,
            num_blocks,
            mix_gain,
            tracks: ArcSwap::from_pointee(Vec::new()),
            playback_block_id,
            last_played_block_id: 0,
        }
    }

    /// Shared playback counter read by the producer for back-pressure.
    pub fn playback_block_id(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.playback_block_id)
    }

    /// Swap in fresh bindings (consumer thread, after connect/restart).
    pub fn update_tracks(&self, tracks: Vec<TrackMixSource>) {
        self.tracks.store(Arc::new(tracks));
    }

    pub fn reset_for_start(&mut self) {
        self.last_played_block_id = 0;
        self.playback_block_id.store(0, Ordering::Release);
    }

    /// Render one device block. `outputs` is one slice per channel.
    pub fn process(&mut self, outputs: &mut [&mut [f32]], num_frames: usize) {
        for channel in outputs.iter_mut() {
            channel[..num_frames].fill(0.0);
        }
        if num_frames != self.block_size as usize {
            return;
        }

        let mut next_block_to_play = self.last_played_block_id + 1;
        self.playback_block_id
            .store(next_block_to_play, Ordering::Release);

        let tracks = self.tracks.load();
        if tracks.is_empty() {
            return;
        }

        let mut played = false;
        for track in tracks.iter() {
            if !track.host_ready.get() || !track.active.get() {
                continue;
            }
            if track.num_blocks == 0 || track.num_channels_out == 0 {
                continue;
            }
            let completed = track.completed_block_id();

            // First audio after start: sync near the freshest block rather
            // than chasing from 1.
            if self.last_played_block_id == 0 && completed > 2 {
                next_block_to_play = completed - 2;
            }
            if completed < next_block_to_play {
                continue;
            }
            played = true;

            let slot = next_block_to_play % track.num_blocks;
            let stride = u64::from(track.channel_stride_bytes);
            let block_bytes = u64::from(track.num_channels_out) * stride;
            let mut peak = 0.0f32;
            let mut square_sum = 0.0f64;
            for (ch, output) in outputs
                .iter_mut()
                .enumerate()
                .take(track.num_channels_out as usize)
            {
                let offset = track.audio_out_offset
                    + u64::from(slot) * block_bytes
                    + ch as u64 * stride;
                if offset as usize + num_frames * 4 > track.region.len() {
                    continue;
                }
                // Safety: offset stays inside the verified audio-out
                // section; the completed check makes the slot stable.
                let samples = unsafe { track.region.audio_slice_mut(offset, num_frames) };
                for (out, &sample) in output[..num_frames].iter_mut().zip(samples.iter()) {
                    *out += sample * self.mix_gain;
                    peak = peak.max(sample.abs());
                    square_sum += f64::from(sample) * f64::from(sample);
                }
            }
            let denom = (num_frames * track.num_channels_out as usize).max(1);
            let rms = (square_sum / denom as f64).sqrt() as f32;
            track.meter.publish(peak, rms);
        }

        if played {
            self.last_played_block_id = next_block_to_play;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_shm::{create_track_region, ShmHeader, TrackRegionGeometry};

    fn geometry() -> TrackRegionGeometry {
        TrackRegionGeometry {
            block_size: 64,
            sample_rate: 48_000.0,
            num_channels_in: 0,
            num_channels_out: 2,
            num_blocks: 3,
            ring_std_capacity: 64,
            ring_ctrl_capacity: 16,
            ring_ui_capacity: 16,
        }
    }

    fn source(tag: &str) -> (Arc<SharedMemoryRegion>, TrackMixSource) {
        let name = format!("ostinato_mix_{}_{}", tag, std::process::id());
        let region = Arc::new(create_track_region(&name, &geometry()).unwrap());
        let header = unsafe { region.at::<ShmHeader>(0) };
        let source = TrackMixSource {
            track_id: 0,
            region: Arc::clone(&region),
            audio_out_offset: header.audio_out_offset,
            channel_stride_bytes: header.channel_stride_bytes,
            num_channels_out: header.num_channels_out,
            num_blocks: header.num_blocks,
            mailbox_offset: header.mailbox_offset,
            host_ready: Arc::new(AtomicFlag::new(true)),
            active: Arc::new(AtomicFlag::new(true)),
            meter: Arc::new(TrackMeter::default()),
        };
        (region, source)
    }

    fn fill_slot(region: &SharedMemoryRegion, block_id: u32, value: f32) {
        let header = unsafe { region.at::<ShmHeader>(0) };
        for ch in 0..header.num_channels_out {
            let offset = header.audio_out_slot_offset(block_id, ch);
            let samples = unsafe { region.audio_slice_mut(offset, header.block_size as usize) };
            samples.fill(value);
        }
    }

    fn complete_block(region: &SharedMemoryRegion, block_id: u32) {
        let header = unsafe { region.at::<ShmHeader>(0) };
        let mailbox =
            unsafe { region.at::<ostinato_shm::BlockMailbox>(header.mailbox_offset) };
        mailbox.completed_block_id.store(block_id, Ordering::Release);
    }

    fn run_block(mixer: &mut AudioMixer) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; 64];
        let mut right = vec![0.0f32; 64];
        {
            let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
            mixer.process(&mut outputs, 64);
        }
        (left, right)
    }

    fn mixer() -> AudioMixer {
        AudioMixer::new(64, 3, 0.5, Arc::new(AtomicU32::new(0)))
    }

    #[test]
    fn silent_until_a_block_completes() {
        let (_region, source) = source("silent");
        let mut mixer = mixer();
        mixer.update_tracks(vec![source]);
        let (left, _) = run_block(&mut mixer);
        assert!(left.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn mixes_completed_block_at_half_gain() {
        let (region, source) = source("gain");
        fill_slot(&region, 1, 0.8);
        complete_block(&region, 1);
        let mut mixer = mixer();
        mixer.update_tracks(vec![source]);
        let (left, right) = run_block(&mut mixer);
        assert!((left[0] - 0.4).abs() < 1e-6);
        assert!((right[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn publishes_playback_position() {
        let (region, source) = source("position");
        fill_slot(&region, 1, 0.1);
        fill_slot(&region, 2, 0.1);
        complete_block(&region, 2);
        let mut mixer = mixer();
        let playback = mixer.playback_block_id();
        mixer.update_tracks(vec![source]);
        run_block(&mut mixer);
        assert!(playback.load(Ordering::Acquire) >= 1);
        run_block(&mut mixer);
        assert_eq!(playback.load(Ordering::Acquire), 2);
    }

    #[test]
    fn meters_track_block_content() {
        let (region, source) = source("meters");
        let meter = Arc::clone(&source.meter);
        fill_slot(&region, 1, 0.6);
        complete_block(&region, 1);
        let mut mixer = mixer();
        mixer.update_tracks(vec![source]);
        run_block(&mut mixer);
        assert!((meter.peak() - 0.6).abs() < 1e-6);
        assert!((meter.rms() - 0.6).abs() < 1e-3);
    }

    #[test]
    fn wrong_frame_count_outputs_silence() {
        let (region, source) = source("frames");
        fill_slot(&region, 1, 0.8);
        complete_block(&region, 1);
        let mut mixer = mixer();
        mixer.update_tracks(vec![source]);
        let mut left = vec![0.5f32; 32];
        {
            let mut outputs: Vec<&mut [f32]> = vec![&mut left];
            mixer.process(&mut outputs, 32);
        }
        assert!(left.iter().all(|&s| s == 0.0));
    }
}
