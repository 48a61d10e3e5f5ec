//! Command application: version gates, model edits, diff emission, and
//! undo/redo bookkeeping.
//!
//! Every successful edit bumps the relevant version counter and emits a
//! diff carrying the post-edit version. A stale `base_version` rejects the
//! command with a single resync diff and no model change.

use std::sync::Arc;

use tracing::{debug, warn};

use ostinato_model::{
    Device, DeviceCapability, DeviceKind, EuclideanConfig, HarmonyEvent, ModLink, ModLinkError,
    ModRate, ModSourceKind, ModSourceRef, ModTargetKind, ModTargetRef, TrackRoute, TrackRouteKind,
    UndoEntry, DEVICE_ID_AUTO,
};
use ostinato_patcher::{GraphEditError, LfoConfig, NodeConfig, PatcherNodeType, RandomDegreeConfig};
use ostinato_shm::{UiCommand, UiDiff, WireEuclideanConfig, WirePatcherConfig};

use crate::engine::EngineShared;
use crate::runtime::TrackRuntime;

use super::{chain_err, emit_diff, mod_err, patcher_delta, patcher_err, routing_err};

fn wire_to_euclidean(config: WireEuclideanConfig) -> EuclideanConfig {
    EuclideanConfig {
        steps: config.steps,
        hits: config.hits,
        offset: config.offset,
        duration_ticks: config.duration_ticks,
        degree: config.degree,
        octave_offset: config.octave_offset,
        velocity: config.velocity,
        base_octave: config.base_octave,
    }
}

/// Record an undo entry from a successful user command; any new edit
/// invalidates the redo branch.
fn record_undo(shared: &EngineShared, entry: UndoEntry) {
    shared.undo_stack.lock().push(entry);
    shared.redo_stack.lock().clear();
}

pub fn apply_command(shared: &Arc<EngineShared>, command: UiCommand) {
    match command {
        UiCommand::TogglePlay => {
            let now_playing = !shared.playing.get();
            shared.playing.set(now_playing);
            if now_playing {
                shared.reset_timeline.set(true);
            }
            debug!(playing = now_playing, "transport toggled");
        }
        UiCommand::SetLoopRange {
            start_nanotick,
            end_nanotick,
        } => {
            if shared.set_loop_range(start_nanotick, end_nanotick) {
                debug!(start = start_nanotick, end = end_nanotick, "loop range set");
            } else {
                warn!(start = start_nanotick, end = end_nanotick, "invalid loop range");
            }
        }
        UiCommand::WriteNote {
            track_id,
            base_version,
            nanotick,
            duration_nanoticks,
            pitch,
            velocity,
            column,
        } => write_note(
            shared,
            track_id,
            base_version,
            nanotick,
            duration_nanoticks,
            pitch,
            velocity,
            column,
        ),
        UiCommand::DeleteNote {
            track_id,
            base_version,
            nanotick,
            column,
        } => delete_note(shared, track_id, base_version, nanotick, column),
        UiCommand::WriteChord {
            track_id,
            base_version,
            nanotick,
            duration_nanoticks,
            degree,
            quality,
            inversion,
            base_octave,
            column,
            spread_nanoticks,
            humanize_timing,
            humanize_velocity,
        } => write_chord(
            shared,
            track_id,
            base_version,
            nanotick,
            duration_nanoticks,
            degree,
            quality,
            inversion,
            base_octave,
            column,
            spread_nanoticks,
            humanize_timing,
            humanize_velocity,
        ),
        UiCommand::DeleteChord {
            track_id,
            base_version,
            chord_id,
        } => delete_chord(shared, track_id, base_version, chord_id),
        UiCommand::WriteHarmony {
            base_version,
            nanotick,
            root,
            scale_id,
        } => write_harmony(shared, base_version, nanotick, root, scale_id),
        UiCommand::DeleteHarmony {
            base_version,
            nanotick,
        } => delete_harmony(shared, base_version, nanotick),
        UiCommand::Undo => undo(shared),
        UiCommand::Redo => redo(shared),
        UiCommand::SetTrackHarmonyQuantize { track_id, enabled } => {
            if let Some(track) = shared.track(track_id) {
                track.edit_model(|model| model.harmony_quantize = enabled);
            }
        }
        UiCommand::LoadPluginOnTrack {
            track_id,
            plugin_index,
        } => load_plugin_on_track(shared, track_id, plugin_index),
        UiCommand::OpenPluginEditor {
            track_id,
            plugin_index,
        } => {
            if let Some(track) = shared.track(track_id) {
                let mut controller = track.controller.lock();
                if let Err(e) = controller.send_open_editor(plugin_index) {
                    warn!(track = track_id, error = %e, "open editor failed");
                }
            }
        }
        UiCommand::AddDevice {
            track_id,
            kind,
            host_slot_index,
            patcher_node_id,
            insert_index,
        } => add_device(shared, track_id, kind, host_slot_index, patcher_node_id, insert_index),
        UiCommand::RemoveDevice { track_id, device_id } => {
            remove_device(shared, track_id, device_id)
        }
        UiCommand::MoveDevice {
            track_id,
            device_id,
            insert_index,
        } => move_device(shared, track_id, device_id, insert_index),
        UiCommand::UpdateDevice {
            track_id,
            device_id,
            bypass,
            host_slot_index,
            patcher_node_id,
        } => update_device(shared, track_id, device_id, bypass, host_slot_index, patcher_node_id),
        UiCommand::SetDeviceEuclideanConfig {
            track_id,
            device_id,
            config,
        } => {
            let Some(track) = shared.track(track_id) else {
                emit_diff(
                    shared,
                    &UiDiff::ChainError {
                        error_code: chain_err::UPDATE_FAILED,
                        track_id,
                        device_id,
                        kind: 0,
                        insert_index: 0,
                    },
                );
                return;
            };
            let updated = track.edit_model(|model| {
                model.chain.set_euclidean_config(device_id, wire_to_euclidean(config))
            });
            if updated {
                emit_chain_snapshot(shared, &track);
            } else {
                emit_diff(
                    shared,
                    &UiDiff::ChainError {
                        error_code: chain_err::UPDATE_FAILED,
                        track_id,
                        device_id,
                        kind: 0,
                        insert_index: 0,
                    },
                );
            }
        }
        UiCommand::SetTrackRouting {
            track_id,
            kinds,
            targets,
            input_ids,
            pre_fader_send,
        } => set_track_routing(shared, track_id, kinds, targets, input_ids, pre_fader_send),
        UiCommand::AddModLink {
            track_id,
            link_id,
            source_device_id,
            source_id,
            source_kind,
            target_device_id,
            target_id,
            target_kind,
            depth,
            bias,
            rate,
            enabled,
        } => add_mod_link(
            shared,
            track_id,
            link_id,
            source_device_id,
            source_id,
            source_kind,
            target_device_id,
            target_id,
            target_kind,
            depth,
            bias,
            rate,
            enabled,
        ),
        UiCommand::RemoveModLink { track_id, link_id } => {
            remove_mod_link(shared, track_id, link_id)
        }
        UiCommand::SetModLinkUid16 {
            track_id,
            link_id,
            uid16,
        } => {
            let Some(track) = shared.track(track_id) else {
                emit_mod_error(shared, mod_err::TRACK_MISSING, track_id, link_id);
                return;
            };
            let updated = track.edit_model(|model| model.mod_registry.set_link_uid16(link_id, uid16));
            if updated {
                emit_diff(shared, &UiDiff::ModLinkUid16 { track_id, link_id, uid16 });
            } else {
                emit_mod_error(shared, mod_err::LINK_MISSING, track_id, link_id);
            }
        }
        UiCommand::SetModSourceValue {
            track_id,
            device_id,
            source_id,
            source_kind,
            value,
        } => {
            let Some(kind) = ModSourceKind::from_u8(source_kind) else {
                emit_mod_error(shared, mod_err::INVALID_KIND, track_id, 0);
                return;
            };
            let Some(track) = shared.track(track_id) else {
                emit_mod_error(shared, mod_err::TRACK_MISSING, track_id, 0);
                return;
            };
            track.edit_model(|model| {
                model.mod_registry.set_source_value(
                    ModSourceRef {
                        device_id,
                        source_id: u32::from(source_id),
                        kind,
                    },
                    value,
                );
            });
        }
        UiCommand::AddPatcherNode { node_type } => add_patcher_node(shared, node_type),
        UiCommand::RemovePatcherNode { node_id } => remove_patcher_node(shared, node_id),
        UiCommand::ConnectPatcherNodes { src, dst } => connect_patcher_nodes(shared, src, dst),
        UiCommand::SetPatcherNodeConfig { node_id, config } => {
            set_patcher_node_config(shared, node_id, config)
        }
        UiCommand::SavePatcherPreset { preset_index } => {
            let graph = shared.patcher.snapshot();
            let name = format!("preset_{preset_index}");
            match shared.preset_library.save(&name, &graph) {
                Ok(()) => debug!(name, "patcher preset saved"),
                Err(e) => {
                    warn!(name, error = %e, "patcher preset save failed");
                    emit_diff(
                        shared,
                        &UiDiff::PatcherGraphError {
                            error_code: patcher_err::PRESET_FAILED,
                            node_id: preset_index,
                            peer_node_id: 0,
                        },
                    );
                }
            }
        }
        UiCommand::SetAutomationTarget {
            track_id,
            clip_index,
            target_plugin_index,
        } => {
            if let Some(track) = shared.track(track_id) {
                track.edit_model(|model| {
                    if let Some(lane) = model.automation.get_mut(clip_index as usize) {
                        lane.set_target_plugin_index(target_plugin_index);
                    }
                });
            }
        }
        UiCommand::RequestClipWindow {
            track_id,
            window_start_nanotick,
            window_end_nanotick,
            cursor_event_index,
            request_id,
        } => {
            if let Some(track) = shared.track(track_id) {
                let snapshot = super::clip_window::build_clip_window(
                    &track,
                    window_start_nanotick,
                    window_end_nanotick,
                    cursor_event_index,
                    request_id,
                );
                shared.ui.publish_clip_window(&snapshot);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Clip edits
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn write_note(
    shared: &EngineShared,
    track_id: u32,
    base_version: u32,
    nanotick: u64,
    duration_nanoticks: u64,
    pitch: u8,
    velocity: u8,
    column: u8,
) {
    let Some(track) = shared.track(track_id) else {
        return;
    };
    let current = track.clip_version();
    if base_version != current {
        emit_diff(shared, &UiDiff::ResyncNeeded { track_id, clip_version: current });
        return;
    }
    let note = track.edit_model(|model| {
        model
            .clip
            .write_note(nanotick, duration_nanoticks, pitch, velocity, column, None)
    });
    let clip_version = track.bump_clip_version();
    emit_diff(
        shared,
        &UiDiff::AddNote {
            track_id,
            clip_version,
            nanotick,
            duration_nanoticks,
            pitch,
            velocity,
            column,
        },
    );
    record_undo(shared, UndoEntry::RemoveNote { track_id, note });
}

fn delete_note(shared: &EngineShared, track_id: u32, base_version: u32, nanotick: u64, column: u8) {
    let Some(track) = shared.track(track_id) else {
        return;
    };
    let current = track.clip_version();
    if base_version != current {
        emit_diff(shared, &UiDiff::ResyncNeeded { track_id, clip_version: current });
        return;
    }
    let Some(removed) = track.edit_model(|model| model.clip.remove_note_at(nanotick, column)) else {
        return;
    };
    let clip_version = track.bump_clip_version();
    emit_diff(
        shared,
        &UiDiff::RemoveNote {
            track_id,
            clip_version,
            nanotick: removed.nanotick,
            duration_nanoticks: removed.duration_nanoticks,
            pitch: removed.pitch,
            velocity: removed.velocity,
            column: removed.column,
        },
    );
    record_undo(shared, UndoEntry::AddNote { track_id, note: removed });
}

#[allow(clippy::too_many_arguments)]
fn write_chord(
    shared: &EngineShared,
    track_id: u32,
    base_version: u32,
    nanotick: u64,
    duration_nanoticks: u64,
    degree: u8,
    quality: u8,
    inversion: u8,
    base_octave: u8,
    column: u8,
    spread_nanoticks: u32,
    humanize_timing: u8,
    humanize_velocity: u8,
) {
    let Some(track) = shared.track(track_id) else {
        return;
    };
    let current = track.clip_version();
    if base_version != current {
        emit_diff(shared, &UiDiff::ChordResyncNeeded { track_id, clip_version: current });
        return;
    }
    let chord = track.edit_model(|model| {
        model.clip.write_chord(
            nanotick,
            duration_nanoticks,
            degree,
            quality,
            inversion,
            base_octave,
            column,
            spread_nanoticks,
            u16::from(humanize_timing),
            u16::from(humanize_velocity),
            None,
        )
    });
    let clip_version = track.bump_clip_version();
    emit_diff(
        shared,
        &UiDiff::AddChord {
            track_id,
            clip_version,
            nanotick,
            duration_nanoticks,
            chord_id: chord.chord_id,
            spread_nanoticks,
            degree,
            quality,
            inversion,
            base_octave,
        },
    );
    record_undo(shared, UndoEntry::RemoveChord { track_id, chord });
}

fn delete_chord(shared: &EngineShared, track_id: u32, base_version: u32, chord_id: u32) {
    let Some(track) = shared.track(track_id) else {
        return;
    };
    let current = track.clip_version();
    if base_version != current {
        emit_diff(shared, &UiDiff::ChordResyncNeeded { track_id, clip_version: current });
        return;
    }
    let Some(removed) = track.edit_model(|model| model.clip.remove_chord_by_id(chord_id)) else {
        return;
    };
    let clip_version = track.bump_clip_version();
    emit_diff(
        shared,
        &UiDiff::RemoveChord {
            track_id,
            clip_version,
            nanotick: removed.nanotick,
            duration_nanoticks: removed.duration_nanoticks,
            chord_id: removed.chord_id,
            spread_nanoticks: removed.spread_nanoticks,
            degree: removed.degree,
            quality: removed.quality,
            inversion: removed.inversion,
            base_octave: removed.base_octave,
        },
    );
    record_undo(shared, UndoEntry::AddChord { track_id, chord: removed });
}

// ---------------------------------------------------------------------------
// Harmony edits
// ---------------------------------------------------------------------------

fn write_harmony(shared: &EngineShared, base_version: u32, nanotick: u64, root: u32, scale_id: u32) {
    let current = shared.harmony_version_now();
    if base_version != current {
        emit_diff(shared, &UiDiff::HarmonyResyncNeeded { harmony_version: current });
        return;
    }
    let event = HarmonyEvent { nanotick, root: root % 12, scale_id };
    let previous = {
        let mut timeline = shared.harmony.lock();
        let previous = timeline.write(event);
        shared.publish_harmony_snapshot(&timeline);
        previous
    };
    let harmony_version = shared.bump_harmony_version();
    match previous {
        Some(previous) => {
            emit_diff(
                shared,
                &UiDiff::UpdateHarmony {
                    harmony_version,
                    nanotick,
                    root: event.root,
                    scale_id,
                },
            );
            record_undo(shared, UndoEntry::UpdateHarmony { previous });
        }
        None => {
            emit_diff(
                shared,
                &UiDiff::AddHarmony {
                    harmony_version,
                    nanotick,
                    root: event.root,
                    scale_id,
                },
            );
            record_undo(shared, UndoEntry::RemoveHarmony { event });
        }
    }
}

fn delete_harmony(shared: &EngineShared, base_version: u32, nanotick: u64) {
    let current = shared.harmony_version_now();
    if base_version != current {
        emit_diff(shared, &UiDiff::HarmonyResyncNeeded { harmony_version: current });
        return;
    }
    let removed = {
        let mut timeline = shared.harmony.lock();
        let removed = timeline.remove(nanotick);
        if removed.is_some() {
            shared.publish_harmony_snapshot(&timeline);
        }
        removed
    };
    let Some(removed) = removed else {
        return;
    };
    let harmony_version = shared.bump_harmony_version();
    emit_diff(
        shared,
        &UiDiff::RemoveHarmony {
            harmony_version,
            nanotick: removed.nanotick,
            root: removed.root,
            scale_id: removed.scale_id,
        },
    );
    record_undo(shared, UndoEntry::AddHarmony { event: removed });
}

// ---------------------------------------------------------------------------
// Undo / redo
// ---------------------------------------------------------------------------

fn undo(shared: &Arc<EngineShared>) {
    let Some(entry) = shared.undo_stack.lock().pop() else {
        return;
    };
    if let Some(redo) = apply_undo_entry(shared, entry) {
        shared.redo_stack.lock().push(redo);
    }
}

fn redo(shared: &Arc<EngineShared>) {
    let Some(entry) = shared.redo_stack.lock().pop() else {
        return;
    };
    if let Some(undo) = apply_undo_entry(shared, entry) {
        shared.undo_stack.lock().push(undo);
    }
}

/// Apply one recorded entry without touching the undo stacks; returns the
/// entry that reverses it (via [`UndoEntry::inverse`], except the harmony
/// update, whose inverse carries the event this application replaced).
fn apply_undo_entry(shared: &EngineShared, entry: UndoEntry) -> Option<UndoEntry> {
    match entry {
        UndoEntry::RemoveNote { track_id, note } => {
            let track = shared.track(track_id)?;
            track.edit_model(|model| {
                model
                    .clip
                    .remove_note_by_id(note.note_id)
                    .or_else(|| model.clip.remove_note_at(note.nanotick, note.column))
            })?;
            let clip_version = track.bump_clip_version();
            emit_diff(
                shared,
                &UiDiff::RemoveNote {
                    track_id,
                    clip_version,
                    nanotick: note.nanotick,
                    duration_nanoticks: note.duration_nanoticks,
                    pitch: note.pitch,
                    velocity: note.velocity,
                    column: note.column,
                },
            );
            Some(entry.inverse())
        }
        UndoEntry::AddNote { track_id, note } => {
            let track = shared.track(track_id)?;
            track.edit_model(|model| {
                model.clip.write_note(
                    note.nanotick,
                    note.duration_nanoticks,
                    note.pitch,
                    note.velocity,
                    note.column,
                    Some(note.note_id),
                )
            });
            let clip_version = track.bump_clip_version();
            emit_diff(
                shared,
                &UiDiff::AddNote {
                    track_id,
                    clip_version,
                    nanotick: note.nanotick,
                    duration_nanoticks: note.duration_nanoticks,
                    pitch: note.pitch,
                    velocity: note.velocity,
                    column: note.column,
                },
            );
            Some(entry.inverse())
        }
        UndoEntry::RemoveChord { track_id, chord } => {
            let track = shared.track(track_id)?;
            track.edit_model(|model| model.clip.remove_chord_by_id(chord.chord_id))?;
            let clip_version = track.bump_clip_version();
            emit_diff(
                shared,
                &UiDiff::RemoveChord {
                    track_id,
                    clip_version,
                    nanotick: chord.nanotick,
                    duration_nanoticks: chord.duration_nanoticks,
                    chord_id: chord.chord_id,
                    spread_nanoticks: chord.spread_nanoticks,
                    degree: chord.degree,
                    quality: chord.quality,
                    inversion: chord.inversion,
                    base_octave: chord.base_octave,
                },
            );
            Some(entry.inverse())
        }
        UndoEntry::AddChord { track_id, chord } => {
            let track = shared.track(track_id)?;
            track.edit_model(|model| {
                model.clip.write_chord(
                    chord.nanotick,
                    chord.duration_nanoticks,
                    chord.degree,
                    chord.quality,
                    chord.inversion,
                    chord.base_octave,
                    chord.column,
                    chord.spread_nanoticks,
                    chord.humanize_timing,
                    chord.humanize_velocity,
                    Some(chord.chord_id),
                )
            });
            let clip_version = track.bump_clip_version();
            emit_diff(
                shared,
                &UiDiff::AddChord {
                    track_id,
                    clip_version,
                    nanotick: chord.nanotick,
                    duration_nanoticks: chord.duration_nanoticks,
                    chord_id: chord.chord_id,
                    spread_nanoticks: chord.spread_nanoticks,
                    degree: chord.degree,
                    quality: chord.quality,
                    inversion: chord.inversion,
                    base_octave: chord.base_octave,
                },
            );
            Some(entry.inverse())
        }
        UndoEntry::RemoveHarmony { event } => {
            let removed = {
                let mut timeline = shared.harmony.lock();
                let removed = timeline.remove(event.nanotick);
                if removed.is_some() {
                    shared.publish_harmony_snapshot(&timeline);
                }
                removed
            }?;
            let harmony_version = shared.bump_harmony_version();
            emit_diff(
                shared,
                &UiDiff::RemoveHarmony {
                    harmony_version,
                    nanotick: removed.nanotick,
                    root: removed.root,
                    scale_id: removed.scale_id,
                },
            );
            Some(entry.inverse())
        }
        UndoEntry::AddHarmony { event } => {
            {
                let mut timeline = shared.harmony.lock();
                timeline.write(event);
                shared.publish_harmony_snapshot(&timeline);
            }
            let harmony_version = shared.bump_harmony_version();
            emit_diff(
                shared,
                &UiDiff::AddHarmony {
                    harmony_version,
                    nanotick: event.nanotick,
                    root: event.root,
                    scale_id: event.scale_id,
                },
            );
            Some(entry.inverse())
        }
        UndoEntry::UpdateHarmony { previous } => {
            let replaced = {
                let mut timeline = shared.harmony.lock();
                let replaced = timeline.write(previous);
                shared.publish_harmony_snapshot(&timeline);
                replaced
            };
            let harmony_version = shared.bump_harmony_version();
            emit_diff(
                shared,
                &UiDiff::UpdateHarmony {
                    harmony_version,
                    nanotick: previous.nanotick,
                    root: previous.root,
                    scale_id: previous.scale_id,
                },
            );
            Some(UndoEntry::UpdateHarmony {
                previous: replaced.unwrap_or(previous),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Chain edits
// ---------------------------------------------------------------------------

/// Emit one `ChainSnapshot` diff per device, indexed for reassembly.
pub(crate) fn emit_chain_snapshot(shared: &EngineShared, track: &TrackRuntime) {
    let state = track.state_snapshot();
    let count = state.devices.len() as u16;
    for (index, device) in state.devices.iter().enumerate() {
        emit_diff(
            shared,
            &UiDiff::ChainSnapshot {
                track_id: track.track_id,
                device_index: index as u16,
                device_count: count,
                device_id: device.id,
                kind: device.kind as u8,
                capability_mask: device.capability_mask,
                bypass: device.bypass,
                host_slot_index: device.host_slot_index,
                patcher_node_id: device.patcher_node_id,
            },
        );
    }
}

fn default_capability_for(kind: DeviceKind) -> u8 {
    match kind {
        DeviceKind::PatcherEvent => DeviceCapability::PRODUCES_MIDI,
        DeviceKind::PatcherInstrument => {
            DeviceCapability::CONSUMES_MIDI | DeviceCapability::PROCESSES_AUDIO
        }
        DeviceKind::PatcherAudio => DeviceCapability::PROCESSES_AUDIO,
        DeviceKind::VstInstrument => {
            DeviceCapability::CONSUMES_MIDI | DeviceCapability::PROCESSES_AUDIO
        }
        DeviceKind::VstEffect => DeviceCapability::PROCESSES_AUDIO,
    }
}

fn add_device(
    shared: &EngineShared,
    track_id: u32,
    kind: u8,
    host_slot_index: u32,
    patcher_node_id: u32,
    insert_index: u32,
) {
    let chain_error = |error_code| UiDiff::ChainError {
        error_code,
        track_id,
        device_id: 0,
        kind,
        insert_index,
    };
    let Some(kind) = DeviceKind::from_u8(kind) else {
        emit_diff(shared, &chain_error(chain_err::ADD_FAILED));
        return;
    };
    let Some(track) = shared.track(track_id) else {
        emit_diff(shared, &chain_error(chain_err::ADD_FAILED));
        return;
    };
    let device = Device {
        id: DEVICE_ID_AUTO,
        kind,
        capability_mask: default_capability_for(kind),
        patcher_node_id,
        host_slot_index,
        bypass: false,
        euclidean: None,
    };
    let added = track.edit_model(|model| model.chain.add_device(device, insert_index));
    if added.is_some() {
        emit_chain_snapshot(shared, &track);
    } else {
        emit_diff(shared, &chain_error(chain_err::ADD_FAILED));
    }
}

fn remove_device(shared: &EngineShared, track_id: u32, device_id: u32) {
    let error = UiDiff::ChainError {
        error_code: chain_err::REMOVE_MISSING,
        track_id,
        device_id,
        kind: 0,
        insert_index: 0,
    };
    let Some(track) = shared.track(track_id) else {
        emit_diff(shared, &error);
        return;
    };
    if track.edit_model(|model| model.chain.remove_device(device_id)).is_some() {
        emit_chain_snapshot(shared, &track);
    } else {
        emit_diff(shared, &error);
    }
}

fn move_device(shared: &EngineShared, track_id: u32, device_id: u32, insert_index: u32) {
    let error = UiDiff::ChainError {
        error_code: chain_err::MOVE_FAILED,
        track_id,
        device_id,
        kind: 0,
        insert_index,
    };
    let Some(track) = shared.track(track_id) else {
        emit_diff(shared, &error);
        return;
    };
    if track.edit_model(|model| model.chain.move_device(device_id, insert_index)) {
        emit_chain_snapshot(shared, &track);
    } else {
        emit_diff(shared, &error);
    }
}

fn update_device(
    shared: &EngineShared,
    track_id: u32,
    device_id: u32,
    bypass: bool,
    host_slot_index: u32,
    patcher_node_id: u32,
) {
    let error = UiDiff::ChainError {
        error_code: chain_err::UPDATE_FAILED,
        track_id,
        device_id,
        kind: 0,
        insert_index: 0,
    };
    let Some(track) = shared.track(track_id) else {
        emit_diff(shared, &error);
        return;
    };
    let updated = track.edit_model(|model| {
        model.chain.set_bypass(device_id, bypass)
            && model.chain.set_host_slot_index(device_id, host_slot_index)
            && model.chain.set_patcher_node_id(device_id, patcher_node_id)
    });
    if updated {
        let mut controller = track.controller.lock();
        if controller.is_connected() {
            let _ = controller.send_set_bypass(host_slot_index, bypass);
        }
        drop(controller);
        emit_chain_snapshot(shared, &track);
    } else {
        emit_diff(shared, &error);
    }
}

fn load_plugin_on_track(shared: &EngineShared, track_id: u32, plugin_index: u32) {
    let Some(track) = shared.track(track_id) else {
        return;
    };
    track.edit_model(|model| {
        let instrument_id = model
            .chain
            .devices()
            .iter()
            .find(|d| d.kind.is_instrument())
            .map(|d| d.id);
        match instrument_id {
            Some(id) => {
                model.chain.set_host_slot_index(id, plugin_index);
            }
            None => {
                model
                    .chain
                    .add_device(Device::vst_instrument(plugin_index), DEVICE_ID_AUTO);
            }
        }
    });
    emit_chain_snapshot(shared, &track);
}

// ---------------------------------------------------------------------------
// Routing edits
// ---------------------------------------------------------------------------

fn set_track_routing(
    shared: &EngineShared,
    track_id: u32,
    kinds: [u8; 4],
    targets: [u32; 4],
    input_ids: [u16; 4],
    pre_fader_send: bool,
) {
    let Some(track) = shared.track(track_id) else {
        emit_diff(
            shared,
            &UiDiff::RoutingError {
                error_code: routing_err::TRACK_MISSING,
                track_id,
            },
        );
        return;
    };

    let mut routes = [TrackRoute::default(); 4];
    for slot in 0..4 {
        let Some(kind) = TrackRouteKind::from_u8(kinds[slot]) else {
            emit_diff(
                shared,
                &UiDiff::RoutingError {
                    error_code: routing_err::INVALID_KIND,
                    track_id,
                },
            );
            return;
        };
        routes[slot] = TrackRoute {
            kind,
            track_id: targets[slot],
            input_id: u32::from(input_ids[slot]),
        };
        if ostinato_model::validate_route(routes[slot], track_id, |id| shared.track_exists(id))
            .is_err()
        {
            emit_diff(
                shared,
                &UiDiff::RoutingError {
                    error_code: routing_err::INVALID_TARGET,
                    track_id,
                },
            );
            return;
        }
    }

    track.edit_model(|model| {
        model.routing.midi_in = routes[0];
        model.routing.midi_out = routes[1];
        model.routing.audio_in = routes[2];
        model.routing.audio_out = routes[3];
        model.routing.pre_fader_send = pre_fader_send;
    });
    emit_routing_snapshot(shared, &track);
}

fn emit_routing_snapshot(shared: &EngineShared, track: &TrackRuntime) {
    let routing = track.state_snapshot().routing;
    let routes = [
        routing.midi_in,
        routing.midi_out,
        routing.audio_in,
        routing.audio_out,
    ];
    emit_diff(
        shared,
        &UiDiff::RoutingSnapshot {
            track_id: track.track_id,
            kinds: routes.map(|r| r.kind as u8),
            targets: routes.map(|r| r.track_id),
            input_ids: routes.map(|r| r.input_id as u16),
            pre_fader_send: routing.pre_fader_send,
        },
    );
}

// ---------------------------------------------------------------------------
// Modulation edits
// ---------------------------------------------------------------------------

fn emit_mod_error(shared: &EngineShared, error_code: u16, track_id: u32, link_id: u32) {
    emit_diff(
        shared,
        &UiDiff::ModError {
            error_code,
            track_id,
            link_id,
        },
    );
}

fn emit_mod_snapshot(shared: &EngineShared, track: &TrackRuntime) {
    let state = track.state_snapshot();
    let count = state.mod_links.len() as u16;
    for (index, link) in state.mod_links.iter().enumerate() {
        emit_diff(
            shared,
            &UiDiff::ModSnapshot {
                track_id: track.track_id,
                link_index: index as u16,
                link_count: count,
                link_id: link.link_id,
                source_device_id: link.source.device_id,
                source_id: link.source.source_id as u16,
                source_kind: link.source.kind as u8,
                target_device_id: link.target.device_id,
                target_id: link.target.target_id as u16,
                target_kind: link.target.kind as u8,
                rate: link.rate as u8,
                enabled: link.enabled,
                depth: link.depth,
                bias: link.bias,
            },
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn add_mod_link(
    shared: &EngineShared,
    track_id: u32,
    link_id: u32,
    source_device_id: u32,
    source_id: u16,
    source_kind: u8,
    target_device_id: u32,
    target_id: u16,
    target_kind: u8,
    depth: f32,
    bias: f32,
    rate: u8,
    enabled: bool,
) {
    let (Some(source_kind), Some(target_kind), Some(rate)) = (
        ModSourceKind::from_u8(source_kind),
        ModTargetKind::from_u8(target_kind),
        ModRate::from_u8(rate),
    ) else {
        emit_mod_error(shared, mod_err::INVALID_KIND, track_id, link_id);
        return;
    };
    let Some(track) = shared.track(track_id) else {
        emit_mod_error(shared, mod_err::TRACK_MISSING, track_id, link_id);
        return;
    };
    let link = ModLink {
        link_id,
        source: ModSourceRef {
            device_id: source_device_id,
            source_id: u32::from(source_id),
            kind: source_kind,
        },
        target: ModTargetRef {
            device_id: target_device_id,
            target_id: u32::from(target_id),
            kind: target_kind,
            uid16: [0; 16],
        },
        depth,
        bias,
        rate,
        enabled,
    };
    let result = track.edit_model(|model| {
        let chain = &model.chain;
        model.mod_registry.add_link(chain, link)
    });
    match result {
        Ok(_) => emit_mod_snapshot(shared, &track),
        Err(error) => {
            let code = match error {
                ModLinkError::MissingSourceDevice | ModLinkError::MissingTargetDevice => {
                    mod_err::INVALID_DEVICE
                }
                ModLinkError::OrderViolation => mod_err::ORDER_VIOLATION,
                ModLinkError::LinkExists => mod_err::LINK_EXISTS,
            };
            emit_mod_error(shared, code, track_id, link_id);
        }
    }
}

fn remove_mod_link(shared: &EngineShared, track_id: u32, link_id: u32) {
    let Some(track) = shared.track(track_id) else {
        emit_mod_error(shared, mod_err::TRACK_MISSING, track_id, link_id);
        return;
    };
    if track
        .edit_model(|model| model.mod_registry.remove_link(link_id))
        .is_some()
    {
        emit_mod_snapshot(shared, &track);
    } else {
        emit_mod_error(shared, mod_err::LINK_MISSING, track_id, link_id);
    }
}

// ---------------------------------------------------------------------------
// Patcher edits
// ---------------------------------------------------------------------------

fn wire_to_node_config(config: WirePatcherConfig) -> NodeConfig {
    match config {
        WirePatcherConfig::Euclidean(euclid) => NodeConfig::Euclidean(wire_to_euclidean(euclid)),
        WirePatcherConfig::RandomDegree {
            degree,
            velocity,
            duration_ticks,
        } => NodeConfig::RandomDegree(RandomDegreeConfig {
            degree,
            velocity,
            duration_ticks,
        }),
        WirePatcherConfig::Lfo {
            frequency_hz,
            depth,
            bias,
            phase_offset,
        } => NodeConfig::Lfo(LfoConfig {
            frequency_hz,
            depth,
            bias,
            phase_offset,
        }),
    }
}

fn add_patcher_node(shared: &EngineShared, node_type: u8) {
    let Some(node_type) = PatcherNodeType::from_u8(node_type) else {
        emit_diff(
            shared,
            &UiDiff::PatcherGraphError {
                error_code: patcher_err::ADD_FAILED,
                node_id: 0,
                peer_node_id: 0,
            },
        );
        return;
    };
    match shared.patcher.add_node(node_type) {
        Ok((node_id, graph_version)) => emit_diff(
            shared,
            &UiDiff::PatcherGraphDelta {
                delta_kind: patcher_delta::NODE_ADDED,
                graph_version,
                node_id,
                peer_node_id: 0,
                node_type: node_type as u8,
            },
        ),
        Err(_) => emit_diff(
            shared,
            &UiDiff::PatcherGraphError {
                error_code: patcher_err::ADD_FAILED,
                node_id: 0,
                peer_node_id: 0,
            },
        ),
    }
}

fn remove_patcher_node(shared: &EngineShared, node_id: u32) {
    match shared.patcher.remove_node(node_id) {
        Ok(graph_version) => emit_diff(
            shared,
            &UiDiff::PatcherGraphDelta {
                delta_kind: patcher_delta::NODE_REMOVED,
                graph_version,
                node_id,
                peer_node_id: 0,
                node_type: 0,
            },
        ),
        Err(_) => emit_diff(
            shared,
            &UiDiff::PatcherGraphError {
                error_code: patcher_err::REMOVE_MISSING,
                node_id,
                peer_node_id: 0,
            },
        ),
    }
}

fn connect_patcher_nodes(shared: &EngineShared, src: u32, dst: u32) {
    match shared.patcher.connect(src, dst) {
        Ok(graph_version) => emit_diff(
            shared,
            &UiDiff::PatcherGraphDelta {
                delta_kind: patcher_delta::CONNECTED,
                graph_version,
                node_id: src,
                peer_node_id: dst,
                node_type: 0,
            },
        ),
        Err(error) => {
            debug!(src, dst, ?error, "patcher connect rejected");
            emit_diff(
                shared,
                &UiDiff::PatcherGraphError {
                    error_code: patcher_err::CONNECT_REJECTED,
                    node_id: src,
                    peer_node_id: dst,
                },
            );
        }
    }
}

fn set_patcher_node_config(shared: &EngineShared, node_id: u32, config: WirePatcherConfig) {
    match shared.patcher.set_config(node_id, wire_to_node_config(config)) {
        Ok(graph_version) => emit_diff(
            shared,
            &UiDiff::PatcherGraphDelta {
                delta_kind: patcher_delta::CONFIG_SET,
                graph_version,
                node_id,
                peer_node_id: 0,
                node_type: 0,
            },
        ),
        Err(GraphEditError::MissingNode) => emit_diff(
            shared,
            &UiDiff::PatcherGraphError {
                error_code: patcher_err::REMOVE_MISSING,
                node_id,
                peer_node_id: 0,
            },
        ),
        Err(_) => emit_diff(
            shared,
            &UiDiff::PatcherGraphError {
                error_code: patcher_err::CONFIG_REJECTED,
                node_id,
                peer_node_id: 0,
            },
        ),
    }
}
