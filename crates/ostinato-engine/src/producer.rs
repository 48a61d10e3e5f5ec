//! The block scheduler: per-track, per-block event emission.
//!
//! For each block the producer loads the track's immutable snapshots,
//! assembles events for the window (split in two when it crosses the loop
//! boundary), resolves harmony, applies block-rate modulation, stably
//! sorts by priority, compensates for pipeline delay, and writes the
//! result to the track's std ring. Overflow is never silent: a dropped
//! note event arms the panic flush and re-primes the parameter mirror.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{trace, warn};

use ostinato_core::{
    LatencyManager, LoopRange, NanotickConverter, TempoProvider, WindowSpan,
};
use ostinato_model::{
    chord::{deterministic_jitter, resolve_chord_pitches},
    harmony_at,
    scale::{quantize_to_scale, ScaleRegistry},
    ChordEvent, ClipEvent, HarmonyEvent, NoteEvent, PARAM_TARGET_ALL,
};
use ostinato_patcher::{PatcherGraph, WorkerPool};
use ostinato_shm::{
    EventEntry, EventRing, EventType, MidiPayload, MusicalLogicPayload, ParamPayload,
    TransportPayload, EVENT_FLAG_MUSICAL_LOGIC, MUSICAL_LOGIC_KIND_DEGREE,
};

use crate::notes::ActiveNote;
use crate::patcher_eval::{evaluate_patcher, EvalWindow, PatcherEvalScratch};
use crate::runtime::{TrackRuntime, TrackStateSnapshot};
use crate::scratchpad::Scratchpad;

/// Nanoticks per unit of chord timing humanization.
const HUMANIZE_TICKS_PER_UNIT: i64 = 480;
/// Base velocity for chord voices.
const CHORD_BASE_VELOCITY: i32 = 100;
/// Fallback harmony when the timeline is empty: C major.
const DEFAULT_HARMONY: HarmonyEvent = HarmonyEvent {
    nanotick: 0,
    root: 0,
    scale_id: 1,
};

/// Shared inputs for scheduling one block across tracks.
pub struct BlockContext<'a> {
    pub tempo: &'a dyn TempoProvider,
    pub sample_rate: u32,
    pub block_size: u32,
    pub latency: LatencyManager,
    pub loop_range: LoopRange,
    pub harmony: &'a [HarmonyEvent],
    pub graph: Arc<PatcherGraph>,
    pub pool: Option<&'a WorkerPool>,
    pub block_id: u32,
    pub engine_sample_start: u64,
    /// Half-windows in nanoticks; two when the block crosses the loop end.
    pub spans: SmallVec<[WindowSpan; 2]>,
    pub playing: bool,
    pub tempo_bpm: f64,
}

impl<'a> BlockContext<'a> {
    /// Compute the window for a block starting at `transport_tick`.
    #[allow(clippy::too_many_arguments)]
    pub fn for_block(
        tempo: &'a dyn TempoProvider,
        sample_rate: u32,
        block_size: u32,
        latency: LatencyManager,
        loop_range: LoopRange,
        harmony: &'a [HarmonyEvent],
        graph: Arc<PatcherGraph>,
        pool: Option<&'a WorkerPool>,
        block_id: u32,
        transport_tick: u64,
        playing: bool,
    ) -> Self {
        let converter = NanotickConverter::new(tempo, sample_rate);
        let block_ticks = converter.block_ticks(block_size, transport_tick);
        let (first, second) = loop_range.split_window(transport_tick, block_ticks);
        let mut spans = SmallVec::new();
        spans.push(first);
        if let Some(second) = second {
            spans.push(second);
        }
        let engine_sample_start = u64::from(block_id.saturating_sub(1)) * u64::from(block_size);
        let tempo_bpm = tempo.bpm_at_nanotick(transport_tick);
        Self {
            tempo,
            sample_rate,
            block_size,
            latency,
            loop_range,
            harmony,
            graph,
            pool,
            block_id,
            engine_sample_start,
            spans,
            playing,
            tempo_bpm,
        }
    }

    #[inline]
    fn samples_per_tick(&self, at_tick: u64) -> f64 {
        let bpm = self.tempo.bpm_at_nanotick(at_tick);
        f64::from(self.sample_rate) * 60.0 / (bpm * ostinato_core::NANOTICKS_PER_QUARTER as f64)
    }
}

/// Producer-thread state for one track, untouched by any other thread.
pub struct ProducerScratch {
    pub scratchpad: Scratchpad,
    pub eval: PatcherEvalScratch,
    next_note_id: u32,
    /// Last emitted value per automation lane, for change detection.
    automation_last: Vec<Option<f32>>,
}

impl ProducerScratch {
    pub fn new(block_size: u32, num_channels: u32) -> Self {
        Self {
            scratchpad: Scratchpad::new(),
            eval: PatcherEvalScratch::new(block_size, num_channels),
            next_note_id: 0,
            automation_last: Vec::new(),
        }
    }

    fn alloc_note_id(&mut self) -> u32 {
        let id = self.next_note_id;
        self.next_note_id += 1;
        id
    }
}

/// Where one track's block output goes.
#[derive(Clone, Copy)]
pub struct TrackBlockIo {
    pub ring_std: EventRing,
    pub ring_ctrl: EventRing,
}

/// What the scheduler did for one track-block.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScheduleOutcome {
    pub events_written: usize,
    pub events_dropped: u64,
}

fn midi_entry(sample_time: u64, block_id: u32, payload: MidiPayload, flags: u32) -> EventEntry {
    let mut entry = EventEntry::typed(EventType::Midi, sample_time, block_id);
    entry.size = payload.write_to(&mut entry.payload);
    entry.flags = flags;
    entry
}

fn param_entry(sample_time: u64, block_id: u32, payload: &ParamPayload) -> EventEntry {
    let mut entry = EventEntry::typed(EventType::Param, sample_time, block_id);
    entry.size = payload.write_to(&mut entry.payload);
    entry
}

/// Schedule one block for one track. Ring writes are PDC-compensated; the
/// scratchpad is assembled in engine time.
pub fn schedule_track_block(
    ctx: &BlockContext,
    runtime: &TrackRuntime,
    scratch: &mut ProducerScratch,
    io: &TrackBlockIo,
) -> ScheduleOutcome {
    let clip = runtime.clip_snapshot();
    let state = runtime.state_snapshot();
    scratch.scratchpad.clear();

    // A replay owed from a restart or overflow recovery goes out first, so
    // the host sees the parameter vector before any fresh events.
    if runtime.mirror.needs_write() {
        let sample = ctx.latency.compensated_start(ctx.engine_sample_start);
        runtime
            .mirror
            .write_replay(&io.ring_std, sample, state.first_vst_slot());
    }
    let params_gated = runtime.mirror.params_gated();

    drain_inbound(runtime, scratch);

    if ctx.playing {
        let mut span_sample_base = ctx.engine_sample_start;
        for span_index in 0..ctx.spans.len() {
            let span = ctx.spans[span_index];
            if span.is_empty() {
                continue;
            }
            let spt = ctx.samples_per_tick(span.start);
            let span_samples = (span.len() as f64 * spt).round().max(1.0) as u64;

            let window = EvalWindow {
                start_tick: span.start,
                end_tick: span.end,
                start_sample: span_sample_base,
                sample_rate: ctx.sample_rate as f32,
                tempo_bpm: ctx.tempo_bpm as f32,
                num_frames: span_samples.min(u64::from(ctx.block_size)) as u32,
            };
            evaluate_patcher(
                &ctx.graph,
                &state.devices,
                ctx.harmony,
                &window,
                &mut scratch.eval,
                &mut scratch.scratchpad,
                ctx.pool,
            );

            if !params_gated {
                emit_automation(ctx, &state, scratch, span, span_sample_base, spt);
            }
            emit_clip_events(
                ctx,
                runtime,
                &state,
                clip.events_in_range(span.start, span.end),
                scratch,
                span,
                span_sample_base,
                spt,
                params_gated,
            );
            emit_scheduled_note_offs(ctx, runtime, scratch, span, span_sample_base, spt);
            resolve_musical_logic(ctx, runtime, scratch, span, span_sample_base, spt);

            span_sample_base += span_samples;
        }

        if !params_gated {
            emit_block_mods(ctx, runtime, &state, scratch);
        }
    }

    scratch.scratchpad.sort();
    route_midi_out(runtime, &state, scratch);

    flush_panic_notes(ctx, runtime, io);
    let outcome = write_events(ctx, runtime, scratch, io);
    write_transport(ctx, io);
    outcome
}

fn drain_inbound(runtime: &TrackRuntime, scratch: &mut ProducerScratch) {
    let mut inbound = runtime.inbound.lock();
    for entry in inbound.midi.drain(..) {
        scratch.scratchpad.push(entry);
    }
}

fn emit_automation(
    ctx: &BlockContext,
    state: &TrackStateSnapshot,
    scratch: &mut ProducerScratch,
    span: WindowSpan,
    span_sample_base: u64,
    spt: f64,
) {
    if scratch.automation_last.len() < state.automation.len() {
        scratch.automation_last.resize(state.automation.len(), None);
    }
    let fallback_target = state.first_vst_slot().unwrap_or(PARAM_TARGET_ALL);
    for (index, lane) in state.automation.iter().enumerate() {
        if lane.points().is_empty() {
            continue;
        }
        let target = if lane.target_plugin_index() == PARAM_TARGET_ALL {
            fallback_target
        } else {
            lane.target_plugin_index()
        };
        if lane.discrete_only() {
            for point in lane.points_in_range(span.start, span.end) {
                let sample = span_sample_base
                    + ((point.nanotick - span.start) as f64 * spt).round() as u64;
                let payload = ParamPayload {
                    uid16: lane.uid16(),
                    value: point.value,
                    target_plugin_index: target,
                };
                scratch.scratchpad.push(param_entry(sample, ctx.block_id, &payload));
                scratch.automation_last[index] = Some(point.value);
            }
        } else {
            // One param event per sample where the interpolated value moves.
            let span_samples = (span.len() as f64 * spt).round().max(1.0) as u64;
            let ticks_per_sample = 1.0 / spt;
            for s in 0..span_samples {
                let tick = span.start + (s as f64 * ticks_per_sample) as u64;
                let value = lane.value_at(tick);
                if scratch.automation_last[index] == Some(value) {
                    continue;
                }
                scratch.automation_last[index] = Some(value);
                let payload = ParamPayload {
                    uid16: lane.uid16(),
                    value,
                    target_plugin_index: target,
                };
                scratch
                    .scratchpad
                    .push(param_entry(span_sample_base + s, ctx.block_id, &payload));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_clip_events(
    ctx: &BlockContext,
    runtime: &TrackRuntime,
    state: &TrackStateSnapshot,
    events: &[ClipEvent],
    scratch: &mut ProducerScratch,
    span: WindowSpan,
    span_sample_base: u64,
    spt: f64,
    params_gated: bool,
) {
    let fallback_target = state.first_vst_slot().unwrap_or(PARAM_TARGET_ALL);
    for event in events {
        match event {
            ClipEvent::Note(note) => {
                emit_note(ctx, runtime, state, scratch, note, span, span_sample_base, spt);
            }
            ClipEvent::Chord(chord) => {
                emit_chord(ctx, runtime, scratch, chord, span, span_sample_base, spt);
            }
            ClipEvent::Param(param) => {
                if params_gated {
                    continue;
                }
                let sample = span_sample_base
                    + ((param.nanotick - span.start) as f64 * spt).round() as u64;
                let target = if param.target_plugin_index == PARAM_TARGET_ALL {
                    fallback_target
                } else {
                    param.target_plugin_index
                };
                let payload = ParamPayload {
                    uid16: param.uid16,
                    value: param.value,
                    target_plugin_index: target,
                };
                runtime.mirror.record(param.uid16, param.value, target);
                scratch.scratchpad.push(param_entry(sample, ctx.block_id, &payload));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_note(
    ctx: &BlockContext,
    runtime: &TrackRuntime,
    state: &TrackStateSnapshot,
    scratch: &mut ProducerScratch,
    note: &NoteEvent,
    span: WindowSpan,
    span_sample_base: u64,
    spt: f64,
) {
    let sample = span_sample_base + ((note.nanotick - span.start) as f64 * spt).round() as u64;

    let mut table = runtime.active_notes.lock();
    for cut in table.cut_column(note.column) {
        scratch.scratchpad.push(midi_entry(
            sample,
            ctx.block_id,
            MidiPayload::note_off(cut.pitch),
            0,
        ));
    }

    let mut pitch = note.pitch;
    if state.harmony_quantize {
        if let Some(harmony) = harmony_at(ctx.harmony, note.nanotick) {
            if let Some(scale) = ScaleRegistry::instance().find(harmony.scale_id) {
                pitch = quantize_to_scale(pitch, harmony.root, scale).midi;
            }
        }
    }

    let note_id = scratch.alloc_note_id();
    scratch.scratchpad.push(midi_entry(
        sample,
        ctx.block_id,
        MidiPayload::note_on(pitch, note.velocity),
        0,
    ));

    if note.duration_nanoticks == 0 {
        table.insert(ActiveNote {
            note_id,
            pitch,
            column: note.column,
            start_nanotick: note.nanotick,
            end_nanotick: u64::MAX,
            has_scheduled_end: false,
        });
        return;
    }
    let end_tick = note.nanotick + note.duration_nanoticks;
    if end_tick < span.end {
        let end_sample =
            span_sample_base + ((end_tick - span.start) as f64 * spt).round() as u64;
        scratch.scratchpad.push(midi_entry(
            end_sample,
            ctx.block_id,
            MidiPayload::note_off(pitch),
            0,
        ));
    } else {
        table.insert(ActiveNote {
            note_id,
            pitch,
            column: note.column,
            start_nanotick: note.nanotick,
            end_nanotick: ctx.loop_range.wrap(end_tick),
            has_scheduled_end: true,
        });
    }
}

fn emit_chord(
    ctx: &BlockContext,
    runtime: &TrackRuntime,
    scratch: &mut ProducerScratch,
    chord: &ChordEvent,
    span: WindowSpan,
    span_sample_base: u64,
    spt: f64,
) {
    let harmony = harmony_at(ctx.harmony, chord.nanotick).unwrap_or(DEFAULT_HARMONY);
    let Some(scale) = ScaleRegistry::instance().find(harmony.scale_id) else {
        warn!(scale_id = harmony.scale_id, "chord references unknown scale");
        return;
    };
    let pitches = resolve_chord_pitches(
        chord.degree,
        chord.quality,
        chord.inversion,
        chord.base_octave,
        harmony.root,
        scale,
    );
    if pitches.is_empty() {
        return;
    }

    let chord_sample =
        span_sample_base + ((chord.nanotick - span.start) as f64 * spt).round() as u64;
    let mut table = runtime.active_notes.lock();
    for cut in table.cut_column(chord.column) {
        scratch.scratchpad.push(midi_entry(
            chord_sample,
            ctx.block_id,
            MidiPayload::note_off(cut.pitch),
            0,
        ));
    }

    let voices = pitches.len() as u64;
    for (voice, pitch) in pitches.iter().enumerate() {
        let spread_offset = if voices > 1 {
            u64::from(chord.spread_nanoticks) * voice as u64 / (voices - 1)
        } else {
            0
        };
        let timing_jitter = i64::from(deterministic_jitter(
            chord.chord_id.wrapping_add(voice as u32),
            i32::from(chord.humanize_timing),
        )) * HUMANIZE_TICKS_PER_UNIT;
        let onset_tick = (chord.nanotick + spread_offset)
            .saturating_add_signed(timing_jitter)
            .clamp(span.start, span.end.saturating_sub(1));

        let velocity_jitter = deterministic_jitter(
            chord.chord_id.wrapping_add(voice as u32) ^ 0x9e37_79b9,
            i32::from(chord.humanize_velocity),
        );
        let velocity = (CHORD_BASE_VELOCITY + velocity_jitter).clamp(0, 127) as u8;

        let onset_sample =
            span_sample_base + ((onset_tick - span.start) as f64 * spt).round() as u64;
        let note_id = scratch.alloc_note_id();
        scratch.scratchpad.push(midi_entry(
            onset_sample,
            ctx.block_id,
            MidiPayload::note_on(pitch.midi, velocity),
            0,
        ));

        let end_tick = onset_tick + chord.duration_nanoticks;
        if chord.duration_nanoticks > 0 && end_tick < span.end {
            let end_sample =
                span_sample_base + ((end_tick - span.start) as f64 * spt).round() as u64;
            scratch.scratchpad.push(midi_entry(
                end_sample,
                ctx.block_id,
                MidiPayload::note_off(pitch.midi),
                0,
            ));
        } else {
            table.insert(ActiveNote {
                note_id,
                pitch: pitch.midi,
                column: chord.column,
                start_nanotick: onset_tick,
                end_nanotick: if chord.duration_nanoticks == 0 {
                    u64::MAX
                } else {
                    ctx.loop_range.wrap(end_tick)
                },
                has_scheduled_end: chord.duration_nanoticks > 0,
            });
        }
    }
}

fn emit_scheduled_note_offs(
    ctx: &BlockContext,
    runtime: &TrackRuntime,
    scratch: &mut ProducerScratch,
    span: WindowSpan,
    span_sample_base: u64,
    spt: f64,
) {
    let mut table = runtime.active_notes.lock();
    for note in table.ending_in(span.start, span.end) {
        let sample =
            span_sample_base + ((note.end_nanotick - span.start) as f64 * spt).round() as u64;
        scratch.scratchpad.push(midi_entry(
            sample,
            ctx.block_id,
            MidiPayload::note_off(note.pitch),
            0,
        ));
        table.remove(note.note_id);
    }
}

/// Turn degree-encoded patcher events into concrete MIDI, stamped with the
/// musical-logic flag for the priority sort.
fn resolve_musical_logic(
    ctx: &BlockContext,
    runtime: &TrackRuntime,
    scratch: &mut ProducerScratch,
    span: WindowSpan,
    span_sample_base: u64,
    spt: f64,
) {
    let span_samples = (span.len() as f64 * spt).round().max(1.0) as u64;
    let span_sample_end = span_sample_base + span_samples;
    let ticks_per_sample = 1.0 / spt;

    let mut pending_offs: SmallVec<[EventEntry; 16]> = SmallVec::new();
    let mut pending_active: SmallVec<[(u8, u64, u64); 16]> = SmallVec::new();

    for entry in scratch.scratchpad.events_mut() {
        if entry.type_of() != Some(EventType::MusicalLogic) {
            continue;
        }
        if entry.sample_time < span_sample_base || entry.sample_time >= span_sample_end {
            continue;
        }
        let payload = MusicalLogicPayload::read_from(&entry.payload);
        if payload.kind != MUSICAL_LOGIC_KIND_DEGREE {
            // Unresolved gates never reach a plugin; neutralize the entry
            // and let the write pass skip it.
            entry.event_type = 0;
            entry.size = 0;
            continue;
        }
        let tick = span.start
            + ((entry.sample_time - span_sample_base) as f64 * ticks_per_sample) as u64;
        let harmony = harmony_at(ctx.harmony, tick).unwrap_or(DEFAULT_HARMONY);
        let Some(scale) = ScaleRegistry::instance().find(harmony.scale_id) else {
            continue;
        };
        let base_octave = payload
            .base_octave
            .saturating_add_signed(payload.octave_offset);
        let pitch = ostinato_model::resolve_degree(
            u32::from(payload.degree),
            base_octave,
            harmony.root,
            scale,
        )
        .midi;
        let velocity = if payload.velocity == 0 { 100 } else { payload.velocity };

        let sample_time = entry.sample_time;
        *entry = midi_entry(
            sample_time,
            ctx.block_id,
            MidiPayload::note_on(pitch, velocity),
            EVENT_FLAG_MUSICAL_LOGIC,
        );

        let end_tick = tick + payload.duration_ticks.max(1);
        if end_tick < span.end {
            let end_sample =
                span_sample_base + ((end_tick - span.start) as f64 * spt).round() as u64;
            pending_offs.push(midi_entry(
                end_sample,
                ctx.block_id,
                MidiPayload::note_off(pitch),
                EVENT_FLAG_MUSICAL_LOGIC,
            ));
        } else {
            pending_active.push((pitch, tick, ctx.loop_range.wrap(end_tick)));
        }
    }

    for entry in pending_offs {
        scratch.scratchpad.push(entry);
    }
    if !pending_active.is_empty() {
        let mut table = runtime.active_notes.lock();
        for (pitch, start, end) in pending_active {
            let note_id = scratch.alloc_note_id();
            table.insert(ActiveNote {
                note_id,
                pitch,
                column: u8::MAX,
                start_nanotick: start,
                end_nanotick: end,
                has_scheduled_end: true,
            });
        }
    }
}

/// One param event per enabled block-rate link, at the block start.
fn emit_block_mods(
    ctx: &BlockContext,
    runtime: &TrackRuntime,
    state: &TrackStateSnapshot,
    scratch: &mut ProducerScratch,
) {
    use ostinato_model::{ModRate, ModSourceKind};

    let block_start_sample = ctx.engine_sample_start;
    for link in &state.mod_links {
        if !link.enabled || link.rate != ModRate::Block {
            continue;
        }
        let source_value = match link.source.kind {
            ModSourceKind::PatcherNodeOutput => state
                .devices
                .iter()
                .find(|d| d.id == link.source.device_id)
                .and_then(|d| scratch.eval.node_mod_value(d.patcher_node_id)),
            _ => state
                .mod_sources
                .iter()
                .find(|s| s.source == link.source)
                .map(|s| s.value),
        };
        let Some(source_value) = source_value else {
            continue;
        };
        let value = (link.depth * source_value + link.bias).clamp(0.0, 1.0);
        let target = state
            .devices
            .iter()
            .find(|d| d.id == link.target.device_id)
            .map(|d| d.host_slot_index)
            .unwrap_or(PARAM_TARGET_ALL);
        let payload = ParamPayload {
            uid16: link.target.uid16,
            value,
            target_plugin_index: target,
        };
        runtime.mirror.record(link.target.uid16, value, target);
        scratch
            .scratchpad
            .push(param_entry(block_start_sample, ctx.block_id, &payload));
    }
}

/// Copy this block's MIDI to the routed target track's inbound queue.
fn route_midi_out(runtime: &TrackRuntime, state: &TrackStateSnapshot, scratch: &mut ProducerScratch) {
    use ostinato_model::TrackRouteKind;
    if state.routing.midi_out.kind != TrackRouteKind::Track {
        return;
    }
    let mut routed = runtime.routed_midi.lock();
    routed.clear();
    routed.extend(
        scratch
            .scratchpad
            .events()
            .iter()
            .filter(|e| e.type_of() == Some(EventType::Midi))
            .copied(),
    );
}

/// Sweep note-offs for every active note when a prior overflow dropped a
/// note event. The flag clears only when the whole sweep lands.
fn flush_panic_notes(ctx: &BlockContext, runtime: &TrackRuntime, io: &TrackBlockIo) {
    if !runtime.ring_std_panic_pending.get() {
        return;
    }
    let sample = ctx.latency.compensated_start(ctx.engine_sample_start);
    let mut table = runtime.active_notes.lock();
    let notes: Vec<ActiveNote> = table.drain_all();
    let mut all_written = true;
    for note in &notes {
        let entry = midi_entry(sample, ctx.block_id, MidiPayload::note_off(note.pitch), 0);
        if !io.ring_std.write(&entry) {
            // Sweep incomplete: keep the note and the flag for next block.
            table.insert(*note);
            all_written = false;
        }
    }
    if all_written {
        runtime.ring_std_panic_pending.set(false);
        trace!(swept = notes.len(), "panic flush complete");
    }
}

/// Compensate and write the sorted scratchpad to the std ring.
fn write_events(
    ctx: &BlockContext,
    runtime: &TrackRuntime,
    scratch: &mut ProducerScratch,
    io: &TrackBlockIo,
) -> ScheduleOutcome {
    let mut outcome = ScheduleOutcome::default();
    let count = scratch.scratchpad.len();
    let events = scratch.scratchpad.events_mut();
    for index in 0..count {
        let mut entry = events[index];
        if entry.event_type == 0 {
            continue;
        }
        entry.sample_time = ctx.latency.compensated_start(entry.sample_time);
        entry.block_id = ctx.block_id;
        if io.ring_std.write(&entry) {
            outcome.events_written += 1;
            continue;
        }
        // Ring full: everything from here on is dropped and accounted.
        let mut dropped_note = false;
        for dropped in &events[index..count] {
            outcome.events_dropped += 1;
            if dropped.is_note_event() {
                dropped_note = true;
            }
        }
        runtime.ring_std_drop_count.fetch_add(outcome.events_dropped);
        runtime.ring_std_drop_sample.set(entry.sample_time);
        if dropped_note {
            // Stuck notes are inevitable; arm the recovery path.
            runtime.ring_std_panic_pending.set(true);
            runtime.mirror.enqueue_replay();
        }
        warn!(
            track = runtime.track_id,
            dropped = outcome.events_dropped,
            dropped_note,
            "std ring overflow"
        );
        break;
    }
    if scratch.scratchpad.dropped() > 0 {
        runtime
            .ring_std_drop_count
            .fetch_add(scratch.scratchpad.dropped());
        if scratch.scratchpad.dropped_note_event() {
            runtime.ring_std_panic_pending.set(true);
            runtime.mirror.enqueue_replay();
        }
    }
    outcome
}

/// Producer thread body: block pacing, back-pressure, per-track
/// scheduling, and host kick-off.
pub fn producer_loop(shared: &std::sync::Arc<crate::engine::EngineShared>, pool: Option<WorkerPool>) {
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    let block_duration = shared.config.block_duration();
    let converter = NanotickConverter::new(&shared.tempo, shared.config.sample_rate as u32);
    let mut scratches: HashMap<u32, ProducerScratch> = HashMap::new();

    while shared.running.get() {
        let tracks = shared.snapshot_tracks();
        if tracks.is_empty() {
            std::thread::sleep(std::time::Duration::from_millis(1));
            continue;
        }

        let playing = shared.playing.get();
        let loop_range = shared.loop_range();
        let advance_transport = |current: u64| {
            let block_ticks = converter.block_ticks(shared.config.block_size, current);
            loop_range.wrap(current + block_ticks)
        };

        let restart_pending = tracks.iter().any(|t| t.needs_restart.get());
        let any_ready = tracks.iter().any(|t| t.host_ready.get());
        if !any_ready || restart_pending {
            if playing {
                let current = shared.transport_nanotick.get();
                shared.transport_nanotick.set(advance_transport(current));
            }
            std::thread::sleep(block_duration);
            continue;
        }

        if shared.reset_timeline.swap(false) {
            shared.transport_nanotick.set(loop_range.start());
            shared.audio_playback_block_id.store(0, Ordering::Release);
        }

        // Mirror acks clear the param gate as soon as the host reports.
        for track in &tracks {
            if track.mirror.params_gated() {
                let controller = track.controller.lock();
                if let Some(mailbox) = controller.mailbox() {
                    track.mirror.check_ack(mailbox);
                }
            }
        }

        // Back-pressure: never run more than the pipeline depth ahead of
        // the slowest active host, nor far past the audio callback.
        let mut min_completed = u32::MAX;
        let mut any_active = false;
        for track in &tracks {
            if !track.host_ready.get() {
                continue;
            }
            let completed = {
                let controller = track.controller.lock();
                controller
                    .mailbox()
                    .map(|m| m.completed_block_id.load(Ordering::Acquire))
                    .unwrap_or(0)
            };
            if completed > 0 {
                track.active.set(true);
            }
            if track.active.get() {
                any_active = true;
                min_completed = min_completed.min(completed);
            }
        }
        let next_id = shared.next_block_id.load(Ordering::Relaxed);
        if !any_active {
            min_completed = next_id.saturating_sub(1);
        }
        let in_flight = next_id.saturating_sub(1).saturating_sub(min_completed);
        if in_flight >= shared.config.num_blocks {
            std::thread::sleep(std::time::Duration::from_millis(1));
            continue;
        }
        let playback = shared.audio_playback_block_id.load(Ordering::Acquire);
        if playback > 0 && next_id.saturating_sub(playback) > 10 {
            std::thread::sleep(std::time::Duration::from_millis(1));
            continue;
        }

        let block_id = shared.next_block_id.fetch_add(1, Ordering::AcqRel);
        let transport_tick = shared.transport_nanotick.get();
        let harmony = shared.harmony_snapshot.load_full();
        let graph = shared.patcher.snapshot();

        for track in &tracks {
            if !track.host_ready.get() {
                continue;
            }
            let ctx = BlockContext::for_block(
                &shared.tempo,
                shared.config.sample_rate as u32,
                shared.config.block_size,
                shared.latency,
                loop_range,
                &harmony,
                Arc::clone(&graph),
                pool.as_ref(),
                block_id,
                transport_tick,
                playing,
            );
            let scratch = scratches
                .entry(track.track_id)
                .or_insert_with(|| {
                    ProducerScratch::new(shared.config.block_size, shared.config.num_channels_out)
                });

            let io = {
                let controller = track.controller.lock();
                match (controller.ring_std(), controller.ring_ctrl()) {
                    (Some(ring_std), Some(ring_ctrl)) => TrackBlockIo { ring_std, ring_ctrl },
                    _ => continue,
                }
            };
            schedule_track_block(&ctx, track, scratch, &io);
            deliver_routed(track, scratch, &tracks);
            write_audio_in(&ctx, track);
            kick_host_segments(&ctx, track);
        }

        if playing {
            shared.transport_nanotick.set(advance_transport(transport_tick));
        }
        if !any_active || shared.options.test_mode {
            // No completions to pace against yet; run at wall-clock rate.
            std::thread::sleep(block_duration);
        }
    }
    trace!("producer thread exiting");
}

/// Hand this block's routed MIDI and patcher audio to the targets' inbound
/// queues.
fn deliver_routed(
    track: &Arc<TrackRuntime>,
    scratch: &ProducerScratch,
    tracks: &[Arc<TrackRuntime>],
) {
    use ostinato_model::TrackRouteKind;
    let routing = track.state_snapshot().routing;

    if routing.midi_out.kind == TrackRouteKind::Track {
        if let Some(target) = tracks.iter().find(|t| t.track_id == routing.midi_out.track_id) {
            let mut staged = track.routed_midi.lock();
            if !staged.is_empty() {
                let mut inbound = target.inbound.lock();
                inbound.midi.extend(staged.drain(..));
            }
        }
    }

    if routing.audio_out.kind == TrackRouteKind::Track {
        if let Some(target) = tracks.iter().find(|t| t.track_id == routing.audio_out.track_id) {
            let audio = &scratch.eval.audio;
            let mut inbound = target.inbound.lock();
            inbound.audio.clear();
            for ch in 0..audio.channels() {
                inbound.audio.extend_from_slice(audio.channel(ch));
            }
        }
    }
}

/// Stage inbound cross-track audio into this block's audio-in slot.
fn write_audio_in(ctx: &BlockContext, track: &Arc<TrackRuntime>) {
    let controller = track.controller.lock();
    let Some(region) = controller.region() else {
        return;
    };
    // Safety: header verified at bind time.
    let header = unsafe { region.at::<ostinato_shm::ShmHeader>(0) };
    if header.num_channels_in == 0 {
        return;
    }
    let frames = header.block_size as usize;
    let mut inbound = track.inbound.lock();
    for ch in 0..header.num_channels_in {
        let offset = header.audio_in_slot_offset(ctx.block_id, ch);
        // Safety: slot offsets derive from the verified header; the
        // producer is the only audio-in writer.
        let slot = unsafe { region.audio_slice_mut(offset, frames) };
        let base = ch as usize * frames;
        for (index, sample) in slot.iter_mut().enumerate() {
            *sample = inbound.audio.get(base + index).copied().unwrap_or(0.0);
        }
    }
    inbound.audio.clear();
}

/// One `ProcessBlock` per contiguous run of enabled VST devices.
fn kick_host_segments(ctx: &BlockContext, track: &Arc<TrackRuntime>) {
    let state = track.state_snapshot();
    let segments = state.vst_segments();
    let plugin_sample_start = ctx.latency.compensated_start(ctx.engine_sample_start);
    let mut controller = track.controller.lock();
    if segments.is_empty() {
        // No VST chain; the host still advances its mailbox for the block.
        let request = ostinato_host::ProcessBlockRequest {
            block_id: ctx.block_id,
            engine_sample_start: ctx.engine_sample_start,
            plugin_sample_start,
            segment_start: 0,
            segment_len: 0,
        };
        let _ = controller.send_process_block(&request);
        return;
    }
    for segment in segments {
        let request = ostinato_host::ProcessBlockRequest {
            block_id: ctx.block_id,
            engine_sample_start: ctx.engine_sample_start,
            plugin_sample_start,
            segment_start: segment.start_slot,
            segment_len: segment.len,
        };
        if let Err(e) = controller.send_process_block(&request) {
            warn!(track = track.track_id, error = %e, "process-block send failed");
            break;
        }
    }
}

fn write_transport(ctx: &BlockContext, io: &TrackBlockIo) {
    let mut entry = EventEntry::typed(
        EventType::Transport,
        ctx.latency.compensated_start(ctx.engine_sample_start),
        ctx.block_id,
    );
    entry.size = TransportPayload {
        tempo_bpm: ctx.tempo_bpm,
        time_sig_num: 4,
        time_sig_den: 4,
        play_state: u8::from(ctx.playing),
    }
    .write_to(&mut entry.payload);
    io.ring_ctrl.write(&entry);
}
