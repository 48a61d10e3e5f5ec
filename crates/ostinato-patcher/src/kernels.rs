//! Kernel implementations and the closed dispatch table.
//!
//! Kernels emit degree-encoded `MusicalLogic` events or modulation
//! samples; the block scheduler resolves them against the harmony
//! timeline downstream. All randomness is hash-derived from the block
//! window, so identical transport positions render identical output.

use ostinato_core::NANOTICKS_PER_QUARTER;
use ostinato_model::EuclideanConfig;
use ostinato_shm::{
    EventEntry, EventType, MusicalLogicPayload, MUSICAL_LOGIC_KIND_DEGREE,
    MUSICAL_LOGIC_KIND_GATE,
};

use crate::context::PatcherContext;
use crate::graph::{LfoConfig, NodeConfig, PatcherNodeType, RandomDegreeConfig};

const EUCLIDEAN_MAX_STEPS: usize = 64;
/// Euclidean patterns repeat over one bar of 4/4.
const EUCLIDEAN_LOOP_TICKS: u64 = NANOTICKS_PER_QUARTER * 4;

/// Run the kernel for a node type. `RustKernel` is the legacy generic slot
/// and evaluates as a euclidean generator.
pub fn dispatch_kernel(node_type: PatcherNodeType, config: &NodeConfig, ctx: &mut PatcherContext) {
    match node_type {
        PatcherNodeType::Euclidean | PatcherNodeType::RustKernel => euclidean_kernel(config, ctx),
        PatcherNodeType::RandomDegree => random_degree_kernel(config, ctx),
        PatcherNodeType::Lfo => lfo_kernel(config, ctx),
        PatcherNodeType::AudioPassthrough => audio_passthrough_kernel(ctx),
        // Event-out and passthrough forward whatever arrived upstream; the
        // merge happens in the evaluation loop.
        PatcherNodeType::EventOut | PatcherNodeType::Passthrough => {}
    }
}

/// Evenly distribute `hits` over `steps` (Bjorklund). Falls back to the
/// modular distribution for oversized step counts.
fn bjorklund_pattern(steps: u32, hits: u32, pattern: &mut [u8; EUCLIDEAN_MAX_STEPS]) {
    pattern.fill(0);
    let steps_usize = steps as usize;
    let hits_usize = hits.min(steps) as usize;
    if steps_usize == 0 || hits_usize == 0 {
        return;
    }

    let mut counts = [0usize; EUCLIDEAN_MAX_STEPS];
    let mut remainders = [0usize; EUCLIDEAN_MAX_STEPS];
    remainders[0] = hits_usize;
    let mut divisor = steps_usize - hits_usize;
    let mut level = 0usize;
    while remainders[level] > 1 {
        counts[level] = divisor / remainders[level];
        remainders[level + 1] = divisor % remainders[level];
        divisor = remainders[level];
        level += 1;
        if level + 1 >= steps_usize {
            break;
        }
    }
    counts[level] = divisor;

    fn build(
        level: isize,
        counts: &[usize],
        remainders: &[usize],
        out: &mut [u8; EUCLIDEAN_MAX_STEPS],
        out_index: &mut usize,
        max_len: usize,
    ) {
        if *out_index >= max_len {
            return;
        }
        if level == -1 {
            out[*out_index] = 0;
            *out_index += 1;
        } else if level == -2 {
            out[*out_index] = 1;
            *out_index += 1;
        } else {
            let idx = level as usize;
            for _ in 0..counts[idx] {
                build(level - 1, counts, remainders, out, out_index, max_len);
                if *out_index >= max_len {
                    return;
                }
            }
            if remainders[idx] != 0 {
                build(level - 2, counts, remainders, out, out_index, max_len);
            }
        }
    }

    let mut out_index = 0usize;
    build(
        level as isize,
        &counts,
        &remainders,
        pattern,
        &mut out_index,
        steps_usize,
    );
}

fn euclidean_hit(step_index: u64, hits: u32, steps: u32) -> bool {
    if steps == 0 || hits == 0 {
        return false;
    }
    (step_index * u64::from(hits)) % u64::from(steps) < u64::from(hits)
}

/// Emit gate pulses on euclidean steps falling inside the block window.
fn euclidean_kernel(config: &NodeConfig, ctx: &mut PatcherContext) {
    let config = match config {
        NodeConfig::Euclidean(c) => *c,
        _ => EuclideanConfig::default(),
    };
    let steps = if config.steps == 0 { 16 } else { config.steps };
    let hits = if config.hits == 0 { 5 } else { config.hits };
    let step_ticks = EUCLIDEAN_LOOP_TICKS / u64::from(steps);
    if step_ticks == 0 {
        return;
    }
    let offset_ticks = u64::from(config.offset) * step_ticks;

    let mut pattern = [0u8; EUCLIDEAN_MAX_STEPS];
    let use_table = steps as usize <= EUCLIDEAN_MAX_STEPS;
    if use_table {
        bjorklund_pattern(steps, hits, &mut pattern);
    }

    // Snap forward to the first step boundary at or after the window start.
    let mut tick = ctx.block_start_tick;
    let remainder = (tick + offset_ticks) % step_ticks;
    if remainder != 0 {
        tick = tick.saturating_add(step_ticks - remainder);
    }

    while tick < ctx.block_end_tick {
        let step_index = ((tick + offset_ticks) % EUCLIDEAN_LOOP_TICKS) / step_ticks;
        let hit = if use_table {
            pattern[step_index as usize] != 0
        } else {
            euclidean_hit(step_index, hits, steps)
        };
        if hit {
            let mut entry =
                EventEntry::typed(EventType::MusicalLogic, ctx.sample_for_tick(tick), 0);
            let payload = MusicalLogicPayload {
                degree: config.degree,
                octave_offset: config.octave_offset,
                chord_id: 0,
                duration_ticks: if config.duration_ticks == 0 {
                    step_ticks / 2
                } else {
                    config.duration_ticks
                },
                priority_hint: 0,
                velocity: config.velocity,
                base_octave: config.base_octave,
                kind: MUSICAL_LOGIC_KIND_GATE,
            };
            entry.size = payload.write_to(&mut entry.payload);
            ctx.events.push(entry, tick);
        }
        tick = tick.saturating_add(step_ticks);
    }
}

/// SplitMix64 finalizer; stable across runs and platforms.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    x
}

/// Bind upstream gate pulses to deterministic pseudo-random degrees.
fn random_degree_kernel(config: &NodeConfig, ctx: &mut PatcherContext) {
    let config = match config {
        NodeConfig::RandomDegree(c) => *c,
        _ => RandomDegreeConfig::default(),
    };
    let degree_max = u64::from(config.degree.max(1)).max(1);
    let block_start_tick = ctx.block_start_tick;

    for (index, entry) in ctx.events.events_mut().iter_mut().enumerate() {
        if entry.type_of() != Some(EventType::MusicalLogic) {
            continue;
        }
        let mut payload = MusicalLogicPayload::read_from(&entry.payload);
        if payload.kind != MUSICAL_LOGIC_KIND_GATE {
            continue;
        }
        let seed = block_start_tick
            ^ entry.sample_time
            ^ (index as u64).wrapping_mul(0x9e37_79b9);
        payload.degree = (mix64(seed) % degree_max) as u8 + 1;
        if config.velocity != 0 {
            payload.velocity = config.velocity;
        } else if payload.velocity == 0 {
            payload.velocity = 100;
        }
        if config.duration_ticks != 0 {
            payload.duration_ticks = config.duration_ticks;
        } else if payload.duration_ticks == 0 {
            payload.duration_ticks = NANOTICKS_PER_QUARTER / 8;
        }
        payload.kind = MUSICAL_LOGIC_KIND_DEGREE;
        entry.size = payload.write_to(&mut entry.payload);
    }
}

/// Sine LFO into the node's modulation outputs, per-sample plus the
/// block-rate value (the last sample of the block).
fn lfo_kernel(config: &NodeConfig, ctx: &mut PatcherContext) {
    let config = match config {
        NodeConfig::Lfo(c) => *c,
        _ => LfoConfig::default(),
    };
    if ctx.mod_outputs.is_empty() {
        return;
    }
    ctx.mod_outputs.fill(config.bias);
    if ctx.mod_output_samples.is_empty() || ctx.mod_output_stride == 0 {
        return;
    }

    let tempo_bpm = if ctx.tempo_bpm > 0.0 { f64::from(ctx.tempo_bpm) } else { 120.0 };
    let seconds_per_tick = 60.0 / (tempo_bpm * NANOTICKS_PER_QUARTER as f64);
    let block_time = ctx.block_start_tick as f64 * seconds_per_tick;
    let phase_base = (block_time as f32) * (config.frequency_hz * std::f32::consts::TAU)
        + config.phase_offset * std::f32::consts::TAU;
    let phase_step = config.frequency_hz * std::f32::consts::TAU / ctx.sample_rate.max(1.0);

    let stride = ctx.mod_output_stride;
    for i in 0..stride {
        let phase = phase_base + phase_step * (i as f32);
        ctx.mod_output_samples[i] = phase.sin() * config.depth + config.bias;
    }
    ctx.mod_outputs[0] = ctx.mod_output_samples[stride - 1];
}

/// Apply per-sample modulation gain to the audio scratch; without a
/// modulation input the node is a plain wire.
fn audio_passthrough_kernel(ctx: &mut PatcherContext) {
    if ctx.mod_inputs.is_empty() || ctx.mod_input_stride == 0 {
        return;
    }
    let Some(audio) = ctx.audio.as_deref_mut() else {
        return;
    };
    let frames = (ctx.num_frames as usize)
        .min(audio.frames())
        .min(ctx.mod_input_stride);
    let gains = &ctx.mod_inputs[..frames];
    for ch in 0..audio.channels() {
        let channel = audio.channel_mut(ch);
        for (sample, gain) in channel[..frames].iter_mut().zip(gains) {
            *sample *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{NodeEventBuffer, PatcherAudioBlock};

    fn context<'a>(
        events: &'a mut NodeEventBuffer,
        mod_outputs: &'a mut [f32],
        mod_output_samples: &'a mut [f32],
        stride: usize,
    ) -> PatcherContext<'a> {
        PatcherContext {
            block_start_tick: 0,
            block_end_tick: EUCLIDEAN_LOOP_TICKS,
            block_start_sample: 0,
            sample_rate: 48_000.0,
            tempo_bpm: 120.0,
            num_frames: 512,
            events,
            audio: None,
            harmony: &[],
            mod_outputs,
            mod_output_samples,
            mod_output_stride: stride,
            mod_inputs: &[],
            mod_input_stride: 0,
        }
    }

    #[test]
    fn bjorklund_distributes_hit_count() {
        let mut pattern = [0u8; EUCLIDEAN_MAX_STEPS];
        bjorklund_pattern(16, 5, &mut pattern);
        let count: u32 = pattern[..16].iter().map(|&x| u32::from(x)).sum();
        assert_eq!(count, 5);
        bjorklund_pattern(8, 3, &mut pattern);
        let count: u32 = pattern[..8].iter().map(|&x| u32::from(x)).sum();
        assert_eq!(count, 3);
    }

    #[test]
    fn euclidean_emits_hits_for_one_bar() {
        let mut events = NodeEventBuffer::new();
        let mut ctx = context(&mut events, &mut [], &mut [], 0);
        euclidean_kernel(&NodeConfig::None, &mut ctx);
        // Default 5 hits over 16 steps in one bar.
        assert_eq!(events.len(), 5);
        for entry in events.events() {
            assert_eq!(entry.type_of(), Some(EventType::MusicalLogic));
            let payload = MusicalLogicPayload::read_from(&entry.payload);
            assert_eq!(payload.kind, MUSICAL_LOGIC_KIND_GATE);
            assert!(payload.duration_ticks > 0);
        }
        // Sample times must be nondecreasing across the bar.
        let times: Vec<u64> = events.events().iter().map(|e| e.sample_time).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(times, sorted);
    }

    #[test]
    fn euclidean_respects_window_bounds() {
        let mut events = NodeEventBuffer::new();
        let mut ctx = context(&mut events, &mut [], &mut [], 0);
        // A window in the middle of the bar covering exactly one step.
        let step_ticks = EUCLIDEAN_LOOP_TICKS / 16;
        ctx.block_start_tick = step_ticks * 3;
        ctx.block_end_tick = step_ticks * 4;
        euclidean_kernel(&NodeConfig::None, &mut ctx);
        assert!(events.len() <= 1);
    }

    #[test]
    fn random_degree_is_deterministic() {
        let run = || {
            let mut events = NodeEventBuffer::new();
            let mut ctx = context(&mut events, &mut [], &mut [], 0);
            euclidean_kernel(&NodeConfig::None, &mut ctx);
            random_degree_kernel(
                &NodeConfig::RandomDegree(RandomDegreeConfig {
                    degree: 8,
                    velocity: 0,
                    duration_ticks: 0,
                }),
                &mut ctx,
            );
            events
                .events()
                .iter()
                .map(|e| MusicalLogicPayload::read_from(&e.payload).degree)
                .collect::<Vec<_>>()
        };
        let a = run();
        let b = run();
        assert_eq!(a, b);
        assert!(a.iter().all(|&d| (1..=8).contains(&d)));
        // Every gate became a degree event.
        let mut events = NodeEventBuffer::new();
        let mut ctx = context(&mut events, &mut [], &mut [], 0);
        euclidean_kernel(&NodeConfig::None, &mut ctx);
        random_degree_kernel(&NodeConfig::None, &mut ctx);
        for entry in events.events() {
            let payload = MusicalLogicPayload::read_from(&entry.payload);
            assert_eq!(payload.kind, MUSICAL_LOGIC_KIND_DEGREE);
        }
    }

    #[test]
    fn lfo_fills_sample_stride_and_block_value() {
        let mut events = NodeEventBuffer::new();
        let mut outputs = [0.0f32; 1];
        let mut samples = [0.0f32; 512];
        let mut ctx = context(&mut events, &mut outputs, &mut samples, 512);
        lfo_kernel(
            &NodeConfig::Lfo(LfoConfig {
                frequency_hz: 2.0,
                depth: 1.0,
                bias: 0.0,
                phase_offset: 0.0,
            }),
            &mut ctx,
        );
        assert!(samples.iter().any(|&s| s != 0.0));
        assert!(samples.iter().all(|&s| (-1.0..=1.0).contains(&s)));
        assert_eq!(outputs[0], samples[511]);
    }

    #[test]
    fn lfo_bias_shifts_range() {
        let mut events = NodeEventBuffer::new();
        let mut outputs = [0.0f32; 1];
        let mut samples = [0.0f32; 64];
        let mut ctx = context(&mut events, &mut outputs, &mut samples, 64);
        lfo_kernel(
            &NodeConfig::Lfo(LfoConfig {
                frequency_hz: 1.0,
                depth: 0.5,
                bias: 0.5,
                phase_offset: 0.0,
            }),
            &mut ctx,
        );
        assert!(samples.iter().all(|&s| (0.0..=1.0).contains(&s)));
    }

    #[test]
    fn audio_passthrough_applies_gain() {
        let mut events = NodeEventBuffer::new();
        let mut audio = PatcherAudioBlock::new(2, 4);
        audio.channel_mut(0).fill(1.0);
        audio.channel_mut(1).fill(2.0);
        let gains = [0.5f32, 0.5, 0.5, 0.5];
        let mut ctx = PatcherContext {
            block_start_tick: 0,
            block_end_tick: 1000,
            block_start_sample: 0,
            sample_rate: 48_000.0,
            tempo_bpm: 120.0,
            num_frames: 4,
            events: &mut events,
            audio: Some(&mut audio),
            harmony: &[],
            mod_outputs: &mut [],
            mod_output_samples: &mut [],
            mod_output_stride: 0,
            mod_inputs: &gains,
            mod_input_stride: 4,
        };
        audio_passthrough_kernel(&mut ctx);
        assert_eq!(audio.channel(0), &[0.5; 4]);
        assert_eq!(audio.channel(1), &[1.0; 4]);
    }

    #[test]
    fn audio_passthrough_without_mod_is_a_wire() {
        let mut events = NodeEventBuffer::new();
        let mut audio = PatcherAudioBlock::new(1, 4);
        audio.channel_mut(0).fill(0.7);
        let mut ctx = PatcherContext {
            block_start_tick: 0,
            block_end_tick: 1000,
            block_start_sample: 0,
            sample_rate: 48_000.0,
            tempo_bpm: 120.0,
            num_frames: 4,
            events: &mut events,
            audio: Some(&mut audio),
            harmony: &[],
            mod_outputs: &mut [],
            mod_output_samples: &mut [],
            mod_output_stride: 0,
            mod_inputs: &[],
            mod_input_stride: 0,
        };
        audio_passthrough_kernel(&mut ctx);
        assert_eq!(audio.channel(0), &[0.7; 4]);
    }
}
