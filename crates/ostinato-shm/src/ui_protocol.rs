//! Versioned UI command/diff wire protocol.
//!
//! Commands flow editor-to-engine on `ring-ui-in`, diffs flow back on
//! `ring-ui-out`, both as 64-byte [`EventEntry`] values. The first u16 of
//! the payload is the command/diff code; dispatch is size-typed, so a
//! decoder rejects any entry whose `size` does not match its code. Unknown
//! codes or sizes decode to `None` and are dropped by the caller after
//! logging, never applied.

use crate::payload::{
    get_f32, get_u16, get_u32, get_u64, put_f32, put_u16, put_u32, put_u64, EventEntry, EventType,
    PAYLOAD_BYTES,
};

/// Command codes, editor to engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum UiCommandType {
    LoadPluginOnTrack = 1,
    WriteNote = 2,
    TogglePlay = 3,
    DeleteNote = 4,
    Undo = 5,
    WriteHarmony = 6,
    DeleteHarmony = 7,
    WriteChord = 8,
    DeleteChord = 9,
    SetTrackHarmonyQuantize = 10,
    Redo = 11,
    SetLoopRange = 12,
    AddDevice = 13,
    RemoveDevice = 14,
    MoveDevice = 15,
    UpdateDevice = 16,
    SetTrackRouting = 17,
    AddModLink = 18,
    RemoveModLink = 19,
    SetModLinkUid16 = 20,
    SetModSourceValue = 21,
    AddPatcherNode = 22,
    RemovePatcherNode = 23,
    ConnectPatcherNodes = 24,
    SetPatcherNodeConfig = 25,
    SetDeviceEuclideanConfig = 26,
    SavePatcherPreset = 27,
    SetAutomationTarget = 28,
    RequestClipWindow = 29,
    OpenPluginEditor = 30,
}

/// Diff codes, engine to editor, on `UiDiff` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum UiDiffType {
    AddNote = 1,
    RemoveNote = 2,
    ResyncNeeded = 4,
    ChainSnapshot = 5,
    ChainError = 6,
    RoutingSnapshot = 7,
    RoutingError = 8,
    ModSnapshot = 9,
    ModLinkUid16 = 10,
    ModError = 11,
    PatcherGraphDelta = 12,
    PatcherGraphError = 13,
}

/// Harmony diff codes, on `UiHarmonyDiff` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum UiHarmonyDiffType {
    Add = 1,
    Remove = 2,
    Update = 3,
    ResyncNeeded = 4,
}

/// Chord diff codes, on `UiChordDiff` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum UiChordDiffType {
    Add = 1,
    Remove = 2,
    ResyncNeeded = 4,
}

/// Wire form of a euclidean pattern config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireEuclideanConfig {
    pub steps: u32,
    pub hits: u32,
    pub offset: u32,
    pub duration_ticks: u64,
    pub degree: u8,
    pub octave_offset: i8,
    pub velocity: u8,
    pub base_octave: u8,
}

impl WireEuclideanConfig {
    const BYTES: usize = 24;

    fn write_to(&self, buf: &mut [u8], at: usize) {
        put_u32(buf, at, self.steps);
        put_u32(buf, at + 4, self.hits);
        put_u32(buf, at + 8, self.offset);
        put_u64(buf, at + 12, self.duration_ticks);
        buf[at + 20] = self.degree;
        buf[at + 21] = self.octave_offset as u8;
        buf[at + 22] = self.velocity;
        buf[at + 23] = self.base_octave;
    }

    fn read_from(buf: &[u8], at: usize) -> Self {
        Self {
            steps: get_u32(buf, at),
            hits: get_u32(buf, at + 4),
            offset: get_u32(buf, at + 8),
            duration_ticks: get_u64(buf, at + 12),
            degree: buf[at + 20],
            octave_offset: buf[at + 21] as i8,
            velocity: buf[at + 22],
            base_octave: buf[at + 23],
        }
    }
}

/// Per-node-type config carried by `SetPatcherNodeConfig`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WirePatcherConfig {
    Euclidean(WireEuclideanConfig),
    RandomDegree {
        degree: u8,
        velocity: u8,
        duration_ticks: u64,
    },
    Lfo {
        frequency_hz: f32,
        depth: f32,
        bias: f32,
        phase_offset: f32,
    },
}

const CONFIG_KIND_EUCLIDEAN: u8 = 1;
const CONFIG_KIND_RANDOM_DEGREE: u8 = 2;
const CONFIG_KIND_LFO: u8 = 3;

/// One decoded editor command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UiCommand {
    LoadPluginOnTrack {
        track_id: u32,
        plugin_index: u32,
    },
    TogglePlay,
    WriteNote {
        track_id: u32,
        base_version: u32,
        nanotick: u64,
        duration_nanoticks: u64,
        pitch: u8,
        velocity: u8,
        column: u8,
    },
    DeleteNote {
        track_id: u32,
        base_version: u32,
        nanotick: u64,
        column: u8,
    },
    WriteChord {
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
    },
    DeleteChord {
        track_id: u32,
        base_version: u32,
        chord_id: u32,
    },
    WriteHarmony {
        base_version: u32,
        nanotick: u64,
        root: u32,
        scale_id: u32,
    },
    DeleteHarmony {
        base_version: u32,
        nanotick: u64,
    },
    Undo,
    Redo,
    SetLoopRange {
        start_nanotick: u64,
        end_nanotick: u64,
    },
    SetTrackHarmonyQuantize {
        track_id: u32,
        enabled: bool,
    },
    AddDevice {
        track_id: u32,
        kind: u8,
        host_slot_index: u32,
        patcher_node_id: u32,
        insert_index: u32,
    },
    RemoveDevice {
        track_id: u32,
        device_id: u32,
    },
    MoveDevice {
        track_id: u32,
        device_id: u32,
        insert_index: u32,
    },
    UpdateDevice {
        track_id: u32,
        device_id: u32,
        bypass: bool,
        host_slot_index: u32,
        patcher_node_id: u32,
    },
    SetTrackRouting {
        track_id: u32,
        kinds: [u8; 4],
        targets: [u32; 4],
        input_ids: [u16; 4],
        pre_fader_send: bool,
    },
    AddModLink {
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
    },
    RemoveModLink {
        track_id: u32,
        link_id: u32,
    },
    SetModLinkUid16 {
        track_id: u32,
        link_id: u32,
        uid16: [u8; 16],
    },
    SetModSourceValue {
        track_id: u32,
        device_id: u32,
        source_id: u16,
        source_kind: u8,
        value: f32,
    },
    AddPatcherNode {
        node_type: u8,
    },
    RemovePatcherNode {
        node_id: u32,
    },
    ConnectPatcherNodes {
        src: u32,
        dst: u32,
    },
    SetPatcherNodeConfig {
        node_id: u32,
        config: WirePatcherConfig,
    },
    SetDeviceEuclideanConfig {
        track_id: u32,
        device_id: u32,
        config: WireEuclideanConfig,
    },
    SavePatcherPreset {
        preset_index: u32,
    },
    SetAutomationTarget {
        track_id: u32,
        clip_index: u32,
        target_plugin_index: u32,
    },
    RequestClipWindow {
        track_id: u32,
        window_start_nanotick: u64,
        window_end_nanotick: u64,
        cursor_event_index: u32,
        request_id: u32,
    },
    OpenPluginEditor {
        track_id: u32,
        plugin_index: u32,
    },
}

// Payload sizes per command code; dispatch rejects entries that disagree.
const SIZE_PAIR: u16 = 12; // code + pad + two u32 fields
const SIZE_BARE: u16 = 4;
const SIZE_NOTE_WRITE: u16 = 32;
const SIZE_NOTE_DELETE: u16 = 24;
const SIZE_CHORD_WRITE: u16 = 40;
const SIZE_CHORD_DELETE: u16 = 16;
const SIZE_HARMONY_WRITE: u16 = 24;
const SIZE_HARMONY_DELETE: u16 = 16;
const SIZE_LOOP_RANGE: u16 = 20;
const SIZE_QUANTIZE: u16 = 12;
const SIZE_ADD_DEVICE: u16 = 24;
const SIZE_MOVE_DEVICE: u16 = 16;
const SIZE_UPDATE_DEVICE: u16 = 24;
const SIZE_ROUTING: u16 = 36;
const SIZE_ADD_MOD_LINK: u16 = 40;
const SIZE_MOD_UID16: u16 = 28;
const SIZE_MOD_SOURCE_VALUE: u16 = 20;
const SIZE_NODE_BARE: u16 = 8;
const SIZE_NODE_CONFIG: u16 = 36;
const SIZE_DEVICE_EUCLIDEAN: u16 = 36;
const SIZE_AUTOMATION_TARGET: u16 = 16;
const SIZE_CLIP_WINDOW: u16 = 32;

impl UiCommand {
    pub fn code(&self) -> UiCommandType {
        match self {
            UiCommand::LoadPluginOnTrack { .. } => UiCommandType::LoadPluginOnTrack,
            UiCommand::TogglePlay => UiCommandType::TogglePlay,
            UiCommand::WriteNote { .. } => UiCommandType::WriteNote,
            UiCommand::DeleteNote { .. } => UiCommandType::DeleteNote,
            UiCommand::WriteChord { .. } => UiCommandType::WriteChord,
            UiCommand::DeleteChord { .. } => UiCommandType::DeleteChord,
            UiCommand::WriteHarmony { .. } => UiCommandType::WriteHarmony,
            UiCommand::DeleteHarmony { .. } => UiCommandType::DeleteHarmony,
            UiCommand::Undo => UiCommandType::Undo,
            UiCommand::Redo => UiCommandType::Redo,
            UiCommand::SetLoopRange { .. } => UiCommandType::SetLoopRange,
            UiCommand::SetTrackHarmonyQuantize { .. } => UiCommandType::SetTrackHarmonyQuantize,
            UiCommand::AddDevice { .. } => UiCommandType::AddDevice,
            UiCommand::RemoveDevice { .. } => UiCommandType::RemoveDevice,
            UiCommand::MoveDevice { .. } => UiCommandType::MoveDevice,
            UiCommand::UpdateDevice { .. } => UiCommandType::UpdateDevice,
            UiCommand::SetTrackRouting { .. } => UiCommandType::SetTrackRouting,
            UiCommand::AddModLink { .. } => UiCommandType::AddModLink,
            UiCommand::RemoveModLink { .. } => UiCommandType::RemoveModLink,
            UiCommand::SetModLinkUid16 { .. } => UiCommandType::SetModLinkUid16,
            UiCommand::SetModSourceValue { .. } => UiCommandType::SetModSourceValue,
            UiCommand::AddPatcherNode { .. } => UiCommandType::AddPatcherNode,
            UiCommand::RemovePatcherNode { .. } => UiCommandType::RemovePatcherNode,
            UiCommand::ConnectPatcherNodes { .. } => UiCommandType::ConnectPatcherNodes,
            UiCommand::SetPatcherNodeConfig { .. } => UiCommandType::SetPatcherNodeConfig,
            UiCommand::SetDeviceEuclideanConfig { .. } => UiCommandType::SetDeviceEuclideanConfig,
            UiCommand::SavePatcherPreset { .. } => UiCommandType::SavePatcherPreset,
            UiCommand::SetAutomationTarget { .. } => UiCommandType::SetAutomationTarget,
            UiCommand::RequestClipWindow { .. } => UiCommandType::RequestClipWindow,
            UiCommand::OpenPluginEditor { .. } => UiCommandType::OpenPluginEditor,
        }
    }

    /// Encode into a ring entry.
    pub fn encode(&self) -> EventEntry {
        let mut entry = EventEntry::typed(EventType::UiCommand, 0, 0);
        let buf = &mut entry.payload;
        put_u16(buf, 0, self.code() as u16);
        let size: u16 = match *self {
            UiCommand::LoadPluginOnTrack {
                track_id,
                plugin_index,
            }
            | UiCommand::OpenPluginEditor {
                track_id,
                plugin_index,
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, plugin_index);
                SIZE_PAIR
            }
            UiCommand::TogglePlay | UiCommand::Undo | UiCommand::Redo => SIZE_BARE,
            UiCommand::WriteNote {
                track_id,
                base_version,
                nanotick,
                duration_nanoticks,
                pitch,
                velocity,
                column,
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, base_version);
                put_u64(buf, 12, nanotick);
                put_u64(buf, 20, duration_nanoticks);
                buf[28] = pitch;
                buf[29] = velocity;
                buf[30] = column;
                SIZE_NOTE_WRITE
            }
            UiCommand::DeleteNote {
                track_id,
                base_version,
                nanotick,
                column,
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, base_version);
                put_u64(buf, 12, nanotick);
                buf[20] = column;
                SIZE_NOTE_DELETE
            }
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
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, base_version);
                put_u64(buf, 12, nanotick);
                put_u64(buf, 20, duration_nanoticks);
                buf[28] = degree;
                buf[29] = quality;
                buf[30] = inversion;
                buf[31] = base_octave;
                put_u32(buf, 32, spread_nanoticks);
                buf[36] = humanize_timing;
                buf[37] = humanize_velocity;
                buf[38] = column;
                SIZE_CHORD_WRITE
            }
            UiCommand::DeleteChord {
                track_id,
                base_version,
                chord_id,
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, base_version);
                // chord_id in its own field; the old spread-field overload
                // is gone.
                put_u32(buf, 12, chord_id);
                SIZE_CHORD_DELETE
            }
            UiCommand::WriteHarmony {
                base_version,
                nanotick,
                root,
                scale_id,
            } => {
                put_u32(buf, 4, base_version);
                put_u64(buf, 8, nanotick);
                put_u32(buf, 16, root);
                put_u32(buf, 20, scale_id);
                SIZE_HARMONY_WRITE
            }
            UiCommand::DeleteHarmony {
                base_version,
                nanotick,
            } => {
                put_u32(buf, 4, base_version);
                put_u64(buf, 8, nanotick);
                SIZE_HARMONY_DELETE
            }
            UiCommand::SetLoopRange {
                start_nanotick,
                end_nanotick,
            } => {
                put_u64(buf, 4, start_nanotick);
                put_u64(buf, 12, end_nanotick);
                SIZE_LOOP_RANGE
            }
            UiCommand::SetTrackHarmonyQuantize { track_id, enabled } => {
                put_u32(buf, 4, track_id);
                buf[8] = u8::from(enabled);
                SIZE_QUANTIZE
            }
            UiCommand::AddDevice {
                track_id,
                kind,
                host_slot_index,
                patcher_node_id,
                insert_index,
            } => {
                buf[2] = kind;
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, host_slot_index);
                put_u32(buf, 12, patcher_node_id);
                put_u32(buf, 16, insert_index);
                SIZE_ADD_DEVICE
            }
            UiCommand::RemoveDevice {
                track_id,
                device_id,
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, device_id);
                SIZE_PAIR
            }
            UiCommand::MoveDevice {
                track_id,
                device_id,
                insert_index,
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, device_id);
                put_u32(buf, 12, insert_index);
                SIZE_MOVE_DEVICE
            }
            UiCommand::UpdateDevice {
                track_id,
                device_id,
                bypass,
                host_slot_index,
                patcher_node_id,
            } => {
                buf[2] = u8::from(bypass);
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, device_id);
                put_u32(buf, 12, host_slot_index);
                put_u32(buf, 16, patcher_node_id);
                SIZE_UPDATE_DEVICE
            }
            UiCommand::SetTrackRouting {
                track_id,
                kinds,
                targets,
                input_ids,
                pre_fader_send,
            } => {
                buf[2] = u8::from(pre_fader_send);
                put_u32(buf, 4, track_id);
                buf[8..12].copy_from_slice(&kinds);
                for (i, target) in targets.iter().enumerate() {
                    put_u32(buf, 12 + i * 4, *target);
                }
                for (i, input) in input_ids.iter().enumerate() {
                    put_u16(buf, 28 + i * 2, *input);
                }
                SIZE_ROUTING
            }
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
            } => {
                buf[2] = rate;
                buf[3] = u8::from(enabled);
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, link_id);
                put_u32(buf, 12, source_device_id);
                put_u16(buf, 16, source_id);
                buf[18] = source_kind;
                buf[19] = target_kind;
                put_u32(buf, 20, target_device_id);
                put_u16(buf, 24, target_id);
                put_f32(buf, 28, depth);
                put_f32(buf, 32, bias);
                SIZE_ADD_MOD_LINK
            }
            UiCommand::RemoveModLink { track_id, link_id } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, link_id);
                SIZE_PAIR
            }
            UiCommand::SetModLinkUid16 {
                track_id,
                link_id,
                uid16,
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, link_id);
                buf[12..28].copy_from_slice(&uid16);
                SIZE_MOD_UID16
            }
            UiCommand::SetModSourceValue {
                track_id,
                device_id,
                source_id,
                source_kind,
                value,
            } => {
                buf[2] = source_kind;
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, device_id);
                put_u16(buf, 12, source_id);
                put_f32(buf, 16, value);
                SIZE_MOD_SOURCE_VALUE
            }
            UiCommand::AddPatcherNode { node_type } => {
                buf[2] = node_type;
                SIZE_BARE
            }
            UiCommand::RemovePatcherNode { node_id } => {
                put_u32(buf, 4, node_id);
                SIZE_NODE_BARE
            }
            UiCommand::ConnectPatcherNodes { src, dst } => {
                put_u32(buf, 4, src);
                put_u32(buf, 8, dst);
                SIZE_PAIR
            }
            UiCommand::SetPatcherNodeConfig { node_id, config } => {
                put_u32(buf, 4, node_id);
                match config {
                    WirePatcherConfig::Euclidean(euclid) => {
                        buf[2] = CONFIG_KIND_EUCLIDEAN;
                        euclid.write_to(buf, 8);
                    }
                    WirePatcherConfig::RandomDegree {
                        degree,
                        velocity,
                        duration_ticks,
                    } => {
                        buf[2] = CONFIG_KIND_RANDOM_DEGREE;
                        buf[8] = degree;
                        buf[9] = velocity;
                        put_u64(buf, 12, duration_ticks);
                    }
                    WirePatcherConfig::Lfo {
                        frequency_hz,
                        depth,
                        bias,
                        phase_offset,
                    } => {
                        buf[2] = CONFIG_KIND_LFO;
                        put_f32(buf, 8, frequency_hz);
                        put_f32(buf, 12, depth);
                        put_f32(buf, 16, bias);
                        put_f32(buf, 20, phase_offset);
                    }
                }
                SIZE_NODE_CONFIG
            }
            UiCommand::SetDeviceEuclideanConfig {
                track_id,
                device_id,
                config,
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, device_id);
                config.write_to(buf, 12);
                SIZE_DEVICE_EUCLIDEAN
            }
            UiCommand::SavePatcherPreset { preset_index } => {
                put_u32(buf, 4, preset_index);
                SIZE_NODE_BARE
            }
            UiCommand::SetAutomationTarget {
                track_id,
                clip_index,
                target_plugin_index,
            } => {
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, clip_index);
                put_u32(buf, 12, target_plugin_index);
                SIZE_AUTOMATION_TARGET
            }
            UiCommand::RequestClipWindow {
                track_id,
                window_start_nanotick,
                window_end_nanotick,
                cursor_event_index,
                request_id,
            } => {
                put_u32(buf, 4, track_id);
                put_u64(buf, 8, window_start_nanotick);
                put_u64(buf, 16, window_end_nanotick);
                put_u32(buf, 24, cursor_event_index);
                put_u32(buf, 28, request_id);
                SIZE_CLIP_WINDOW
            }
        };
        entry.size = size;
        entry
    }

    /// Decode a `UiCommand` ring entry; `None` for unknown codes or
    /// mismatched sizes.
    pub fn decode(entry: &EventEntry) -> Option<Self> {
        if entry.type_of() != Some(EventType::UiCommand) {
            return None;
        }
        let buf = &entry.payload;
        let code = get_u16(buf, 0);
        let size = entry.size;
        let expect = |expected: u16| -> Option<()> { (size == expected).then_some(()) };
        Some(match code {
            c if c == UiCommandType::LoadPluginOnTrack as u16 => {
                expect(SIZE_PAIR)?;
                UiCommand::LoadPluginOnTrack {
                    track_id: get_u32(buf, 4),
                    plugin_index: get_u32(buf, 8),
                }
            }
            c if c == UiCommandType::TogglePlay as u16 => {
                expect(SIZE_BARE)?;
                UiCommand::TogglePlay
            }
            c if c == UiCommandType::WriteNote as u16 => {
                expect(SIZE_NOTE_WRITE)?;
                UiCommand::WriteNote {
                    track_id: get_u32(buf, 4),
                    base_version: get_u32(buf, 8),
                    nanotick: get_u64(buf, 12),
                    duration_nanoticks: get_u64(buf, 20),
                    pitch: buf[28],
                    velocity: buf[29],
                    column: buf[30],
                }
            }
            c if c == UiCommandType::DeleteNote as u16 => {
                expect(SIZE_NOTE_DELETE)?;
                UiCommand::DeleteNote {
                    track_id: get_u32(buf, 4),
                    base_version: get_u32(buf, 8),
                    nanotick: get_u64(buf, 12),
                    column: buf[20],
                }
            }
            c if c == UiCommandType::Undo as u16 => {
                expect(SIZE_BARE)?;
                UiCommand::Undo
            }
            c if c == UiCommandType::Redo as u16 => {
                expect(SIZE_BARE)?;
                UiCommand::Redo
            }
            c if c == UiCommandType::WriteHarmony as u16 => {
                expect(SIZE_HARMONY_WRITE)?;
                UiCommand::WriteHarmony {
                    base_version: get_u32(buf, 4),
                    nanotick: get_u64(buf, 8),
                    root: get_u32(buf, 16),
                    scale_id: get_u32(buf, 20),
                }
            }
            c if c == UiCommandType::DeleteHarmony as u16 => {
                expect(SIZE_HARMONY_DELETE)?;
                UiCommand::DeleteHarmony {
                    base_version: get_u32(buf, 4),
                    nanotick: get_u64(buf, 8),
                }
            }
            c if c == UiCommandType::WriteChord as u16 => {
                expect(SIZE_CHORD_WRITE)?;
                UiCommand::WriteChord {
                    track_id: get_u32(buf, 4),
                    base_version: get_u32(buf, 8),
                    nanotick: get_u64(buf, 12),
                    duration_nanoticks: get_u64(buf, 20),
                    degree: buf[28],
                    quality: buf[29],
                    inversion: buf[30],
                    base_octave: buf[31],
                    spread_nanoticks: get_u32(buf, 32),
                    humanize_timing: buf[36],
                    humanize_velocity: buf[37],
                    column: buf[38],
                }
            }
            c if c == UiCommandType::DeleteChord as u16 => {
                expect(SIZE_CHORD_DELETE)?;
                UiCommand::DeleteChord {
                    track_id: get_u32(buf, 4),
                    base_version: get_u32(buf, 8),
                    chord_id: get_u32(buf, 12),
                }
            }
            c if c == UiCommandType::SetTrackHarmonyQuantize as u16 => {
                expect(SIZE_QUANTIZE)?;
                UiCommand::SetTrackHarmonyQuantize {
                    track_id: get_u32(buf, 4),
                    enabled: buf[8] != 0,
                }
            }
            c if c == UiCommandType::SetLoopRange as u16 => {
                expect(SIZE_LOOP_RANGE)?;
                UiCommand::SetLoopRange {
                    start_nanotick: get_u64(buf, 4),
                    end_nanotick: get_u64(buf, 12),
                }
            }
            c if c == UiCommandType::AddDevice as u16 => {
                expect(SIZE_ADD_DEVICE)?;
                UiCommand::AddDevice {
                    kind: buf[2],
                    track_id: get_u32(buf, 4),
                    host_slot_index: get_u32(buf, 8),
                    patcher_node_id: get_u32(buf, 12),
                    insert_index: get_u32(buf, 16),
                }
            }
            c if c == UiCommandType::RemoveDevice as u16 => {
                expect(SIZE_PAIR)?;
                UiCommand::RemoveDevice {
                    track_id: get_u32(buf, 4),
                    device_id: get_u32(buf, 8),
                }
            }
            c if c == UiCommandType::MoveDevice as u16 => {
                expect(SIZE_MOVE_DEVICE)?;
                UiCommand::MoveDevice {
                    track_id: get_u32(buf, 4),
                    device_id: get_u32(buf, 8),
                    insert_index: get_u32(buf, 12),
                }
            }
            c if c == UiCommandType::UpdateDevice as u16 => {
                expect(SIZE_UPDATE_DEVICE)?;
                UiCommand::UpdateDevice {
                    bypass: buf[2] != 0,
                    track_id: get_u32(buf, 4),
                    device_id: get_u32(buf, 8),
                    host_slot_index: get_u32(buf, 12),
                    patcher_node_id: get_u32(buf, 16),
                }
            }
            c if c == UiCommandType::SetTrackRouting as u16 => {
                expect(SIZE_ROUTING)?;
                let mut kinds = [0u8; 4];
                kinds.copy_from_slice(&buf[8..12]);
                let mut targets = [0u32; 4];
                for (i, target) in targets.iter_mut().enumerate() {
                    *target = get_u32(buf, 12 + i * 4);
                }
                let mut input_ids = [0u16; 4];
                for (i, input) in input_ids.iter_mut().enumerate() {
                    *input = get_u16(buf, 28 + i * 2);
                }
                UiCommand::SetTrackRouting {
                    pre_fader_send: buf[2] != 0,
                    track_id: get_u32(buf, 4),
                    kinds,
                    targets,
                    input_ids,
                }
            }
            c if c == UiCommandType::AddModLink as u16 => {
                expect(SIZE_ADD_MOD_LINK)?;
                UiCommand::AddModLink {
                    rate: buf[2],
                    enabled: buf[3] != 0,
                    track_id: get_u32(buf, 4),
                    link_id: get_u32(buf, 8),
                    source_device_id: get_u32(buf, 12),
                    source_id: get_u16(buf, 16),
                    source_kind: buf[18],
                    target_kind: buf[19],
                    target_device_id: get_u32(buf, 20),
                    target_id: get_u16(buf, 24),
                    depth: get_f32(buf, 28),
                    bias: get_f32(buf, 32),
                }
            }
            c if c == UiCommandType::RemoveModLink as u16 => {
                expect(SIZE_PAIR)?;
                UiCommand::RemoveModLink {
                    track_id: get_u32(buf, 4),
                    link_id: get_u32(buf, 8),
                }
            }
            c if c == UiCommandType::SetModLinkUid16 as u16 => {
                expect(SIZE_MOD_UID16)?;
                let mut uid16 = [0u8; 16];
                uid16.copy_from_slice(&buf[12..28]);
                UiCommand::SetModLinkUid16 {
                    track_id: get_u32(buf, 4),
                    link_id: get_u32(buf, 8),
                    uid16,
                }
            }
            c if c == UiCommandType::SetModSourceValue as u16 => {
                expect(SIZE_MOD_SOURCE_VALUE)?;
                UiCommand::SetModSourceValue {
                    source_kind: buf[2],
                    track_id: get_u32(buf, 4),
                    device_id: get_u32(buf, 8),
                    source_id: get_u16(buf, 12),
                    value: get_f32(buf, 16),
                }
            }
            c if c == UiCommandType::AddPatcherNode as u16 => {
                expect(SIZE_BARE)?;
                UiCommand::AddPatcherNode { node_type: buf[2] }
            }
            c if c == UiCommandType::RemovePatcherNode as u16 => {
                expect(SIZE_NODE_BARE)?;
                UiCommand::RemovePatcherNode {
                    node_id: get_u32(buf, 4),
                }
            }
            c if c == UiCommandType::ConnectPatcherNodes as u16 => {
                expect(SIZE_PAIR)?;
                UiCommand::ConnectPatcherNodes {
                    src: get_u32(buf, 4),
                    dst: get_u32(buf, 8),
                }
            }
            c if c == UiCommandType::SetPatcherNodeConfig as u16 => {
                expect(SIZE_NODE_CONFIG)?;
                let node_id = get_u32(buf, 4);
                let config = match buf[2] {
                    CONFIG_KIND_EUCLIDEAN => {
                        WirePatcherConfig::Euclidean(WireEuclideanConfig::read_from(buf, 8))
                    }
                    CONFIG_KIND_RANDOM_DEGREE => WirePatcherConfig::RandomDegree {
                        degree: buf[8],
                        velocity: buf[9],
                        duration_ticks: get_u64(buf, 12),
                    },
                    CONFIG_KIND_LFO => WirePatcherConfig::Lfo {
                        frequency_hz: get_f32(buf, 8),
                        depth: get_f32(buf, 12),
                        bias: get_f32(buf, 16),
                        phase_offset: get_f32(buf, 20),
                    },
                    _ => return None,
                };
                UiCommand::SetPatcherNodeConfig { node_id, config }
            }
            c if c == UiCommandType::SetDeviceEuclideanConfig as u16 => {
                expect(SIZE_DEVICE_EUCLIDEAN)?;
                UiCommand::SetDeviceEuclideanConfig {
                    track_id: get_u32(buf, 4),
                    device_id: get_u32(buf, 8),
                    config: WireEuclideanConfig::read_from(buf, 12),
                }
            }
            c if c == UiCommandType::SavePatcherPreset as u16 => {
                expect(SIZE_NODE_BARE)?;
                UiCommand::SavePatcherPreset {
                    preset_index: get_u32(buf, 4),
                }
            }
            c if c == UiCommandType::SetAutomationTarget as u16 => {
                expect(SIZE_AUTOMATION_TARGET)?;
                UiCommand::SetAutomationTarget {
                    track_id: get_u32(buf, 4),
                    clip_index: get_u32(buf, 8),
                    target_plugin_index: get_u32(buf, 12),
                }
            }
            c if c == UiCommandType::RequestClipWindow as u16 => {
                expect(SIZE_CLIP_WINDOW)?;
                UiCommand::RequestClipWindow {
                    track_id: get_u32(buf, 4),
                    window_start_nanotick: get_u64(buf, 8),
                    window_end_nanotick: get_u64(buf, 16),
                    cursor_event_index: get_u32(buf, 24),
                    request_id: get_u32(buf, 28),
                }
            }
            c if c == UiCommandType::OpenPluginEditor as u16 => {
                expect(SIZE_PAIR)?;
                UiCommand::OpenPluginEditor {
                    track_id: get_u32(buf, 4),
                    plugin_index: get_u32(buf, 8),
                }
            }
            _ => return None,
        })
    }
}

/// One engine-to-editor diff. The version carried is always the version
/// after the edit it describes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UiDiff {
    AddNote {
        track_id: u32,
        clip_version: u32,
        nanotick: u64,
        duration_nanoticks: u64,
        pitch: u8,
        velocity: u8,
        column: u8,
    },
    RemoveNote {
        track_id: u32,
        clip_version: u32,
        nanotick: u64,
        duration_nanoticks: u64,
        pitch: u8,
        velocity: u8,
        column: u8,
    },
    ResyncNeeded {
        track_id: u32,
        clip_version: u32,
    },
    AddChord {
        track_id: u32,
        clip_version: u32,
        nanotick: u64,
        duration_nanoticks: u64,
        chord_id: u32,
        spread_nanoticks: u32,
        degree: u8,
        quality: u8,
        inversion: u8,
        base_octave: u8,
    },
    RemoveChord {
        track_id: u32,
        clip_version: u32,
        nanotick: u64,
        duration_nanoticks: u64,
        chord_id: u32,
        spread_nanoticks: u32,
        degree: u8,
        quality: u8,
        inversion: u8,
        base_octave: u8,
    },
    ChordResyncNeeded {
        track_id: u32,
        clip_version: u32,
    },
    AddHarmony {
        harmony_version: u32,
        nanotick: u64,
        root: u32,
        scale_id: u32,
    },
    RemoveHarmony {
        harmony_version: u32,
        nanotick: u64,
        root: u32,
        scale_id: u32,
    },
    UpdateHarmony {
        harmony_version: u32,
        nanotick: u64,
        root: u32,
        scale_id: u32,
    },
    HarmonyResyncNeeded {
        harmony_version: u32,
    },
    ChainSnapshot {
        track_id: u32,
        device_index: u16,
        device_count: u16,
        device_id: u32,
        kind: u8,
        capability_mask: u8,
        bypass: bool,
        host_slot_index: u32,
        patcher_node_id: u32,
    },
    ChainError {
        error_code: u16,
        track_id: u32,
        device_id: u32,
        kind: u8,
        insert_index: u32,
    },
    RoutingSnapshot {
        track_id: u32,
        kinds: [u8; 4],
        targets: [u32; 4],
        input_ids: [u16; 4],
        pre_fader_send: bool,
    },
    RoutingError {
        error_code: u16,
        track_id: u32,
    },
    ModSnapshot {
        track_id: u32,
        link_index: u16,
        link_count: u16,
        link_id: u32,
        source_device_id: u32,
        source_id: u16,
        source_kind: u8,
        target_device_id: u32,
        target_id: u16,
        target_kind: u8,
        rate: u8,
        enabled: bool,
        depth: f32,
        bias: f32,
    },
    ModLinkUid16 {
        track_id: u32,
        link_id: u32,
        uid16: [u8; 16],
    },
    ModError {
        error_code: u16,
        track_id: u32,
        link_id: u32,
    },
    PatcherGraphDelta {
        delta_kind: u8,
        graph_version: u32,
        node_id: u32,
        peer_node_id: u32,
        node_type: u8,
    },
    PatcherGraphError {
        error_code: u16,
        node_id: u32,
        peer_node_id: u32,
    },
}

const SIZE_DIFF_NOTE: u16 = 32;
const SIZE_DIFF_RESYNC: u16 = 12;
const SIZE_DIFF_CHORD: u16 = 40;
const SIZE_DIFF_HARMONY: u16 = 24;
const SIZE_DIFF_HARMONY_RESYNC: u16 = 8;
const SIZE_DIFF_CHAIN_SNAPSHOT: u16 = 24;
const SIZE_DIFF_CHAIN_ERROR: u16 = 20;
const SIZE_DIFF_ROUTING: u16 = 36;
const SIZE_DIFF_ROUTING_ERROR: u16 = 8;
const SIZE_DIFF_MOD_SNAPSHOT: u16 = 40;
const SIZE_DIFF_MOD_UID16: u16 = 28;
const SIZE_DIFF_MOD_ERROR: u16 = 12;
const SIZE_DIFF_PATCHER_DELTA: u16 = 20;
const SIZE_DIFF_PATCHER_ERROR: u16 = 12;

impl UiDiff {
    fn note_family(&self) -> bool {
        matches!(
            self,
            UiDiff::AddNote { .. } | UiDiff::RemoveNote { .. } | UiDiff::ResyncNeeded { .. }
        )
    }

    fn entry_type(&self) -> EventType {
        if self.note_family() {
            return EventType::UiDiff;
        }
        match self {
            UiDiff::AddChord { .. }
            | UiDiff::RemoveChord { .. }
            | UiDiff::ChordResyncNeeded { .. } => EventType::UiChordDiff,
            UiDiff::AddHarmony { .. }
            | UiDiff::RemoveHarmony { .. }
            | UiDiff::UpdateHarmony { .. }
            | UiDiff::HarmonyResyncNeeded { .. } => EventType::UiHarmonyDiff,
            _ => EventType::UiDiff,
        }
    }

    pub fn encode(&self) -> EventEntry {
        let mut entry = EventEntry::typed(self.entry_type(), 0, 0);
        let buf = &mut entry.payload;
        let size: u16 = match *self {
            UiDiff::AddNote {
                track_id,
                clip_version,
                nanotick,
                duration_nanoticks,
                pitch,
                velocity,
                column,
            }
            | UiDiff::RemoveNote {
                track_id,
                clip_version,
                nanotick,
                duration_nanoticks,
                pitch,
                velocity,
                column,
            } => {
                let code = if matches!(self, UiDiff::AddNote { .. }) {
                    UiDiffType::AddNote
                } else {
                    UiDiffType::RemoveNote
                };
                put_u16(buf, 0, code as u16);
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, clip_version);
                put_u64(buf, 12, nanotick);
                put_u64(buf, 20, duration_nanoticks);
                buf[28] = pitch;
                buf[29] = velocity;
                buf[30] = column;
                SIZE_DIFF_NOTE
            }
            UiDiff::ResyncNeeded {
                track_id,
                clip_version,
            } => {
                put_u16(buf, 0, UiDiffType::ResyncNeeded as u16);
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, clip_version);
                SIZE_DIFF_RESYNC
            }
            UiDiff::AddChord {
                track_id,
                clip_version,
                nanotick,
                duration_nanoticks,
                chord_id,
                spread_nanoticks,
                degree,
                quality,
                inversion,
                base_octave,
            }
            | UiDiff::RemoveChord {
                track_id,
                clip_version,
                nanotick,
                duration_nanoticks,
                chord_id,
                spread_nanoticks,
                degree,
                quality,
                inversion,
                base_octave,
            } => {
                let code = if matches!(self, UiDiff::AddChord { .. }) {
                    UiChordDiffType::Add
                } else {
                    UiChordDiffType::Remove
                };
                put_u16(buf, 0, code as u16);
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, clip_version);
                put_u64(buf, 12, nanotick);
                put_u64(buf, 20, duration_nanoticks);
                put_u32(buf, 28, chord_id);
                put_u32(buf, 32, spread_nanoticks);
                buf[36] = degree;
                buf[37] = quality;
                buf[38] = inversion;
                buf[39] = base_octave;
                SIZE_DIFF_CHORD
            }
            UiDiff::ChordResyncNeeded {
                track_id,
                clip_version,
            } => {
                put_u16(buf, 0, UiChordDiffType::ResyncNeeded as u16);
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, clip_version);
                SIZE_DIFF_RESYNC
            }
            UiDiff::AddHarmony {
                harmony_version,
                nanotick,
                root,
                scale_id,
            }
            | UiDiff::RemoveHarmony {
                harmony_version,
                nanotick,
                root,
                scale_id,
            }
            | UiDiff::UpdateHarmony {
                harmony_version,
                nanotick,
                root,
                scale_id,
            } => {
                let code = match self {
                    UiDiff::AddHarmony { .. } => UiHarmonyDiffType::Add,
                    UiDiff::RemoveHarmony { .. } => UiHarmonyDiffType::Remove,
                    _ => UiHarmonyDiffType::Update,
                };
                put_u16(buf, 0, code as u16);
                put_u32(buf, 4, harmony_version);
                put_u64(buf, 8, nanotick);
                put_u32(buf, 16, root);
                put_u32(buf, 20, scale_id);
                SIZE_DIFF_HARMONY
            }
            UiDiff::HarmonyResyncNeeded { harmony_version } => {
                put_u16(buf, 0, UiHarmonyDiffType::ResyncNeeded as u16);
                put_u32(buf, 4, harmony_version);
                SIZE_DIFF_HARMONY_RESYNC
            }
            UiDiff::ChainSnapshot {
                track_id,
                device_index,
                device_count,
                device_id,
                kind,
                capability_mask,
                bypass,
                host_slot_index,
                patcher_node_id,
            } => {
                put_u16(buf, 0, UiDiffType::ChainSnapshot as u16);
                buf[2] = kind;
                buf[3] = capability_mask | (u8::from(bypass) << 7);
                put_u32(buf, 4, track_id);
                put_u16(buf, 8, device_index);
                put_u16(buf, 10, device_count);
                put_u32(buf, 12, device_id);
                put_u32(buf, 16, host_slot_index);
                put_u32(buf, 20, patcher_node_id);
                SIZE_DIFF_CHAIN_SNAPSHOT
            }
            UiDiff::ChainError {
                error_code,
                track_id,
                device_id,
                kind,
                insert_index,
            } => {
                put_u16(buf, 0, UiDiffType::ChainError as u16);
                put_u16(buf, 2, error_code);
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, device_id);
                buf[12] = kind;
                put_u32(buf, 16, insert_index);
                SIZE_DIFF_CHAIN_ERROR
            }
            UiDiff::RoutingSnapshot {
                track_id,
                kinds,
                targets,
                input_ids,
                pre_fader_send,
            } => {
                put_u16(buf, 0, UiDiffType::RoutingSnapshot as u16);
                buf[2] = u8::from(pre_fader_send);
                put_u32(buf, 4, track_id);
                buf[8..12].copy_from_slice(&kinds);
                for (i, target) in targets.iter().enumerate() {
                    put_u32(buf, 12 + i * 4, *target);
                }
                for (i, input) in input_ids.iter().enumerate() {
                    put_u16(buf, 28 + i * 2, *input);
                }
                SIZE_DIFF_ROUTING
            }
            UiDiff::RoutingError {
                error_code,
                track_id,
            } => {
                put_u16(buf, 0, UiDiffType::RoutingError as u16);
                put_u16(buf, 2, error_code);
                put_u32(buf, 4, track_id);
                SIZE_DIFF_ROUTING_ERROR
            }
            UiDiff::ModSnapshot {
                track_id,
                link_index,
                link_count,
                link_id,
                source_device_id,
                source_id,
                source_kind,
                target_device_id,
                target_id,
                target_kind,
                rate,
                enabled,
                depth,
                bias,
            } => {
                put_u16(buf, 0, UiDiffType::ModSnapshot as u16);
                buf[2] = rate;
                buf[3] = u8::from(enabled);
                put_u32(buf, 4, track_id);
                put_u16(buf, 8, link_index);
                put_u16(buf, 10, link_count);
                put_u32(buf, 12, link_id);
                put_u32(buf, 16, source_device_id);
                put_u16(buf, 20, source_id);
                buf[22] = source_kind;
                buf[23] = target_kind;
                put_u32(buf, 24, target_device_id);
                put_u16(buf, 28, target_id);
                put_f32(buf, 32, depth);
                put_f32(buf, 36, bias);
                SIZE_DIFF_MOD_SNAPSHOT
            }
            UiDiff::ModLinkUid16 {
                track_id,
                link_id,
                uid16,
            } => {
                put_u16(buf, 0, UiDiffType::ModLinkUid16 as u16);
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, link_id);
                buf[12..28].copy_from_slice(&uid16);
                SIZE_DIFF_MOD_UID16
            }
            UiDiff::ModError {
                error_code,
                track_id,
                link_id,
            } => {
                put_u16(buf, 0, UiDiffType::ModError as u16);
                put_u16(buf, 2, error_code);
                put_u32(buf, 4, track_id);
                put_u32(buf, 8, link_id);
                SIZE_DIFF_MOD_ERROR
            }
            UiDiff::PatcherGraphDelta {
                delta_kind,
                graph_version,
                node_id,
                peer_node_id,
                node_type,
            } => {
                put_u16(buf, 0, UiDiffType::PatcherGraphDelta as u16);
                buf[2] = delta_kind;
                buf[3] = node_type;
                put_u32(buf, 4, graph_version);
                put_u32(buf, 8, node_id);
                put_u32(buf, 12, peer_node_id);
                SIZE_DIFF_PATCHER_DELTA
            }
            UiDiff::PatcherGraphError {
                error_code,
                node_id,
                peer_node_id,
            } => {
                put_u16(buf, 0, UiDiffType::PatcherGraphError as u16);
                put_u16(buf, 2, error_code);
                put_u32(buf, 4, node_id);
                put_u32(buf, 8, peer_node_id);
                SIZE_DIFF_PATCHER_ERROR
            }
        };
        entry.size = size;
        entry
    }

    pub fn decode(entry: &EventEntry) -> Option<Self> {
        let buf = &entry.payload;
        let code = get_u16(buf, 0);
        let size = entry.size;
        let expect = |expected: u16| -> Option<()> { (size == expected).then_some(()) };
        match entry.type_of()? {
            EventType::UiDiff => Some(match code {
                c if c == UiDiffType::AddNote as u16 || c == UiDiffType::RemoveNote as u16 => {
                    expect(SIZE_DIFF_NOTE)?;
                    let fields = (
                        get_u32(buf, 4),
                        get_u32(buf, 8),
                        get_u64(buf, 12),
                        get_u64(buf, 20),
                        buf[28],
                        buf[29],
                        buf[30],
                    );
                    if c == UiDiffType::AddNote as u16 {
                        UiDiff::AddNote {
                            track_id: fields.0,
                            clip_version: fields.1,
                            nanotick: fields.2,
                            duration_nanoticks: fields.3,
                            pitch: fields.4,
                            velocity: fields.5,
                            column: fields.6,
                        }
                    } else {
                        UiDiff::RemoveNote {
                            track_id: fields.0,
                            clip_version: fields.1,
                            nanotick: fields.2,
                            duration_nanoticks: fields.3,
                            pitch: fields.4,
                            velocity: fields.5,
                            column: fields.6,
                        }
                    }
                }
                c if c == UiDiffType::ResyncNeeded as u16 => {
                    expect(SIZE_DIFF_RESYNC)?;
                    UiDiff::ResyncNeeded {
                        track_id: get_u32(buf, 4),
                        clip_version: get_u32(buf, 8),
                    }
                }
                c if c == UiDiffType::ChainSnapshot as u16 => {
                    expect(SIZE_DIFF_CHAIN_SNAPSHOT)?;
                    UiDiff::ChainSnapshot {
                        kind: buf[2],
                        capability_mask: buf[3] & 0x7F,
                        bypass: buf[3] & 0x80 != 0,
                        track_id: get_u32(buf, 4),
                        device_index: get_u16(buf, 8),
                        device_count: get_u16(buf, 10),
                        device_id: get_u32(buf, 12),
                        host_slot_index: get_u32(buf, 16),
                        patcher_node_id: get_u32(buf, 20),
                    }
                }
                c if c == UiDiffType::ChainError as u16 => {
                    expect(SIZE_DIFF_CHAIN_ERROR)?;
                    UiDiff::ChainError {
                        error_code: get_u16(buf, 2),
                        track_id: get_u32(buf, 4),
                        device_id: get_u32(buf, 8),
                        kind: buf[12],
                        insert_index: get_u32(buf, 16),
                    }
                }
                c if c == UiDiffType::RoutingSnapshot as u16 => {
                    expect(SIZE_DIFF_ROUTING)?;
                    let mut kinds = [0u8; 4];
                    kinds.copy_from_slice(&buf[8..12]);
                    let mut targets = [0u32; 4];
                    for (i, target) in targets.iter_mut().enumerate() {
                        *target = get_u32(buf, 12 + i * 4);
                    }
                    let mut input_ids = [0u16; 4];
                    for (i, input) in input_ids.iter_mut().enumerate() {
                        *input = get_u16(buf, 28 + i * 2);
                    }
                    UiDiff::RoutingSnapshot {
                        pre_fader_send: buf[2] != 0,
                        track_id: get_u32(buf, 4),
                        kinds,
                        targets,
                        input_ids,
                    }
                }
                c if c == UiDiffType::RoutingError as u16 => {
                    expect(SIZE_DIFF_ROUTING_ERROR)?;
                    UiDiff::RoutingError {
                        error_code: get_u16(buf, 2),
                        track_id: get_u32(buf, 4),
                    }
                }
                c if c == UiDiffType::ModSnapshot as u16 => {
                    expect(SIZE_DIFF_MOD_SNAPSHOT)?;
                    UiDiff::ModSnapshot {
                        rate: buf[2],
                        enabled: buf[3] != 0,
                        track_id: get_u32(buf, 4),
                        link_index: get_u16(buf, 8),
                        link_count: get_u16(buf, 10),
                        link_id: get_u32(buf, 12),
                        source_device_id: get_u32(buf, 16),
                        source_id: get_u16(buf, 20),
                        source_kind: buf[22],
                        target_kind: buf[23],
                        target_device_id: get_u32(buf, 24),
                        target_id: get_u16(buf, 28),
                        depth: get_f32(buf, 32),
                        bias: get_f32(buf, 36),
                    }
                }
                c if c == UiDiffType::ModLinkUid16 as u16 => {
                    expect(SIZE_DIFF_MOD_UID16)?;
                    let mut uid16 = [0u8; 16];
                    uid16.copy_from_slice(&buf[12..28]);
                    UiDiff::ModLinkUid16 {
                        track_id: get_u32(buf, 4),
                        link_id: get_u32(buf, 8),
                        uid16,
                    }
                }
                c if c == UiDiffType::ModError as u16 => {
                    expect(SIZE_DIFF_MOD_ERROR)?;
                    UiDiff::ModError {
                        error_code: get_u16(buf, 2),
                        track_id: get_u32(buf, 4),
                        link_id: get_u32(buf, 8),
                    }
                }
                c if c == UiDiffType::PatcherGraphDelta as u16 => {
                    expect(SIZE_DIFF_PATCHER_DELTA)?;
                    UiDiff::PatcherGraphDelta {
                        delta_kind: buf[2],
                        node_type: buf[3],
                        graph_version: get_u32(buf, 4),
                        node_id: get_u32(buf, 8),
                        peer_node_id: get_u32(buf, 12),
                    }
                }
                c if c == UiDiffType::PatcherGraphError as u16 => {
                    expect(SIZE_DIFF_PATCHER_ERROR)?;
                    UiDiff::PatcherGraphError {
                        error_code: get_u16(buf, 2),
                        node_id: get_u32(buf, 4),
                        peer_node_id: get_u32(buf, 8),
                    }
                }
                _ => return None,
            }),
            EventType::UiChordDiff => Some(match code {
                c if c == UiChordDiffType::Add as u16 || c == UiChordDiffType::Remove as u16 => {
                    expect(SIZE_DIFF_CHORD)?;
                    let fields = (
                        get_u32(buf, 4),
                        get_u32(buf, 8),
                        get_u64(buf, 12),
                        get_u64(buf, 20),
                        get_u32(buf, 28),
                        get_u32(buf, 32),
                    );
                    let chord = (buf[36], buf[37], buf[38], buf[39]);
                    if c == UiChordDiffType::Add as u16 {
                        UiDiff::AddChord {
                            track_id: fields.0,
                            clip_version: fields.1,
                            nanotick: fields.2,
                            duration_nanoticks: fields.3,
                            chord_id: fields.4,
                            spread_nanoticks: fields.5,
                            degree: chord.0,
                            quality: chord.1,
                            inversion: chord.2,
                            base_octave: chord.3,
                        }
                    } else {
                        UiDiff::RemoveChord {
                            track_id: fields.0,
                            clip_version: fields.1,
                            nanotick: fields.2,
                            duration_nanoticks: fields.3,
                            chord_id: fields.4,
                            spread_nanoticks: fields.5,
                            degree: chord.0,
                            quality: chord.1,
                            inversion: chord.2,
                            base_octave: chord.3,
                        }
                    }
                }
                c if c == UiChordDiffType::ResyncNeeded as u16 => {
                    expect(SIZE_DIFF_RESYNC)?;
                    UiDiff::ChordResyncNeeded {
                        track_id: get_u32(buf, 4),
                        clip_version: get_u32(buf, 8),
                    }
                }
                _ => return None,
            }),
            EventType::UiHarmonyDiff => Some(match code {
                c if c == UiHarmonyDiffType::Add as u16
                    || c == UiHarmonyDiffType::Remove as u16
                    || c == UiHarmonyDiffType::Update as u16 =>
                {
                    expect(SIZE_DIFF_HARMONY)?;
                    let harmony_version = get_u32(buf, 4);
                    let nanotick = get_u64(buf, 8);
                    let root = get_u32(buf, 16);
                    let scale_id = get_u32(buf, 20);
                    if c == UiHarmonyDiffType::Add as u16 {
                        UiDiff::AddHarmony {
                            harmony_version,
                            nanotick,
                            root,
                            scale_id,
                        }
                    } else if c == UiHarmonyDiffType::Remove as u16 {
                        UiDiff::RemoveHarmony {
                            harmony_version,
                            nanotick,
                            root,
                            scale_id,
                        }
                    } else {
                        UiDiff::UpdateHarmony {
                            harmony_version,
                            nanotick,
                            root,
                            scale_id,
                        }
                    }
                }
                c if c == UiHarmonyDiffType::ResyncNeeded as u16 => {
                    expect(SIZE_DIFF_HARMONY_RESYNC)?;
                    UiDiff::HarmonyResyncNeeded {
                        harmony_version: get_u32(buf, 4),
                    }
                }
                _ => return None,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_command(command: UiCommand) {
        let entry = command.encode();
        assert!(entry.size as usize <= PAYLOAD_BYTES);
        let decoded = UiCommand::decode(&entry).expect("decode");
        assert_eq!(decoded, command);
    }

    fn round_trip_diff(diff: UiDiff) {
        let entry = diff.encode();
        assert!(entry.size as usize <= PAYLOAD_BYTES);
        let decoded = UiDiff::decode(&entry).expect("decode");
        assert_eq!(decoded, diff);
    }

    #[test]
    fn write_note_round_trips() {
        round_trip_command(UiCommand::WriteNote {
            track_id: 3,
            base_version: 17,
            nanotick: 480_000,
            duration_nanoticks: 960_000,
            pitch: 64,
            velocity: 100,
            column: 2,
        });
    }

    #[test]
    fn chord_commands_round_trip() {
        round_trip_command(UiCommand::WriteChord {
            track_id: 0,
            base_version: 4,
            nanotick: 100,
            duration_nanoticks: 960,
            degree: 1,
            quality: 1,
            inversion: 2,
            base_octave: 4,
            column: 1,
            spread_nanoticks: 1000,
            humanize_timing: 5,
            humanize_velocity: 7,
        });
        round_trip_command(UiCommand::DeleteChord {
            track_id: 0,
            base_version: 5,
            chord_id: 42,
        });
    }

    #[test]
    fn transport_and_edit_commands_round_trip() {
        round_trip_command(UiCommand::TogglePlay);
        round_trip_command(UiCommand::Undo);
        round_trip_command(UiCommand::Redo);
        round_trip_command(UiCommand::SetLoopRange {
            start_nanotick: 0,
            end_nanotick: 3_840_000,
        });
        round_trip_command(UiCommand::SetTrackHarmonyQuantize {
            track_id: 1,
            enabled: false,
        });
        round_trip_command(UiCommand::DeleteNote {
            track_id: 2,
            base_version: 9,
            nanotick: 960_000,
            column: 3,
        });
        round_trip_command(UiCommand::WriteHarmony {
            base_version: 0,
            nanotick: 0,
            root: 7,
            scale_id: 2,
        });
        round_trip_command(UiCommand::DeleteHarmony {
            base_version: 1,
            nanotick: 960_000,
        });
    }

    #[test]
    fn chain_commands_round_trip() {
        round_trip_command(UiCommand::AddDevice {
            track_id: 0,
            kind: 3,
            host_slot_index: 2,
            patcher_node_id: 0,
            insert_index: u32::MAX,
        });
        round_trip_command(UiCommand::RemoveDevice {
            track_id: 0,
            device_id: 5,
        });
        round_trip_command(UiCommand::MoveDevice {
            track_id: 0,
            device_id: 5,
            insert_index: 0,
        });
        round_trip_command(UiCommand::UpdateDevice {
            track_id: 0,
            device_id: 5,
            bypass: true,
            host_slot_index: 1,
            patcher_node_id: 2,
        });
        round_trip_command(UiCommand::SetDeviceEuclideanConfig {
            track_id: 0,
            device_id: 5,
            config: WireEuclideanConfig {
                steps: 16,
                hits: 5,
                offset: 2,
                duration_ticks: 120_000,
                degree: 1,
                octave_offset: -1,
                velocity: 100,
                base_octave: 4,
            },
        });
    }

    #[test]
    fn routing_and_mod_commands_round_trip() {
        round_trip_command(UiCommand::SetTrackRouting {
            track_id: 1,
            kinds: [0, 1, 2, 3],
            targets: [0, 0, 2, 0],
            input_ids: [0, 0, 0, 4],
            pre_fader_send: false,
        });
        round_trip_command(UiCommand::AddModLink {
            track_id: 1,
            link_id: u32::MAX,
            source_device_id: 0,
            source_id: 3,
            source_kind: 1,
            target_device_id: 2,
            target_id: 0,
            target_kind: 0,
            depth: 0.8,
            bias: -0.1,
            rate: 0,
            enabled: true,
        });
        round_trip_command(UiCommand::RemoveModLink {
            track_id: 1,
            link_id: 2,
        });
        round_trip_command(UiCommand::SetModLinkUid16 {
            track_id: 1,
            link_id: 2,
            uid16: [9u8; 16],
        });
        round_trip_command(UiCommand::SetModSourceValue {
            track_id: 1,
            device_id: 0,
            source_id: 3,
            source_kind: 0,
            value: 0.42,
        });
    }

    #[test]
    fn patcher_commands_round_trip() {
        round_trip_command(UiCommand::AddPatcherNode { node_type: 1 });
        round_trip_command(UiCommand::RemovePatcherNode { node_id: 3 });
        round_trip_command(UiCommand::ConnectPatcherNodes { src: 1, dst: 2 });
        round_trip_command(UiCommand::SetPatcherNodeConfig {
            node_id: 1,
            config: WirePatcherConfig::Euclidean(WireEuclideanConfig::default()),
        });
        round_trip_command(UiCommand::SetPatcherNodeConfig {
            node_id: 2,
            config: WirePatcherConfig::Lfo {
                frequency_hz: 2.0,
                depth: 1.0,
                bias: 0.0,
                phase_offset: 0.25,
            },
        });
        round_trip_command(UiCommand::SetPatcherNodeConfig {
            node_id: 3,
            config: WirePatcherConfig::RandomDegree {
                degree: 8,
                velocity: 100,
                duration_ticks: 60_000,
            },
        });
        round_trip_command(UiCommand::SavePatcherPreset { preset_index: 2 });
    }

    #[test]
    fn misc_commands_round_trip() {
        round_trip_command(UiCommand::LoadPluginOnTrack {
            track_id: 0,
            plugin_index: 4,
        });
        round_trip_command(UiCommand::OpenPluginEditor {
            track_id: 0,
            plugin_index: 4,
        });
        round_trip_command(UiCommand::SetAutomationTarget {
            track_id: 0,
            clip_index: 1,
            target_plugin_index: 2,
        });
        round_trip_command(UiCommand::RequestClipWindow {
            track_id: 0,
            window_start_nanotick: 0,
            window_end_nanotick: 3_840_000,
            cursor_event_index: 128,
            request_id: 7,
        });
    }

    #[test]
    fn note_diffs_round_trip() {
        round_trip_diff(UiDiff::AddNote {
            track_id: 0,
            clip_version: 1,
            nanotick: 480_000,
            duration_nanoticks: 960_000,
            pitch: 64,
            velocity: 100,
            column: 0,
        });
        round_trip_diff(UiDiff::RemoveNote {
            track_id: 0,
            clip_version: 2,
            nanotick: 480_000,
            duration_nanoticks: 960_000,
            pitch: 64,
            velocity: 100,
            column: 0,
        });
        round_trip_diff(UiDiff::ResyncNeeded {
            track_id: 0,
            clip_version: 1,
        });
    }

    #[test]
    fn chord_and_harmony_diffs_round_trip() {
        round_trip_diff(UiDiff::AddChord {
            track_id: 0,
            clip_version: 3,
            nanotick: 100,
            duration_nanoticks: 960,
            chord_id: 42,
            spread_nanoticks: 1000,
            degree: 1,
            quality: 1,
            inversion: 0,
            base_octave: 4,
        });
        round_trip_diff(UiDiff::ChordResyncNeeded {
            track_id: 0,
            clip_version: 3,
        });
        round_trip_diff(UiDiff::AddHarmony {
            harmony_version: 1,
            nanotick: 0,
            root: 0,
            scale_id: 1,
        });
        round_trip_diff(UiDiff::UpdateHarmony {
            harmony_version: 2,
            nanotick: 0,
            root: 7,
            scale_id: 2,
        });
        round_trip_diff(UiDiff::HarmonyResyncNeeded { harmony_version: 2 });
    }

    #[test]
    fn structured_diffs_round_trip() {
        round_trip_diff(UiDiff::ChainSnapshot {
            track_id: 0,
            device_index: 1,
            device_count: 3,
            device_id: 7,
            kind: 4,
            capability_mask: 0b101,
            bypass: true,
            host_slot_index: 2,
            patcher_node_id: 0,
        });
        round_trip_diff(UiDiff::ChainError {
            error_code: 2,
            track_id: 0,
            device_id: 7,
            kind: 4,
            insert_index: 1,
        });
        round_trip_diff(UiDiff::RoutingSnapshot {
            track_id: 1,
            kinds: [0, 0, 2, 1],
            targets: [0, 0, 3, 0],
            input_ids: [0, 0, 0, 0],
            pre_fader_send: true,
        });
        round_trip_diff(UiDiff::RoutingError {
            error_code: 3,
            track_id: 1,
        });
        round_trip_diff(UiDiff::ModSnapshot {
            track_id: 1,
            link_index: 0,
            link_count: 1,
            link_id: 5,
            source_device_id: 0,
            source_id: 1,
            source_kind: 1,
            target_device_id: 2,
            target_id: 0,
            target_kind: 0,
            rate: 0,
            enabled: true,
            depth: 0.8,
            bias: 0.0,
        });
        round_trip_diff(UiDiff::ModLinkUid16 {
            track_id: 1,
            link_id: 5,
            uid16: [3u8; 16],
        });
        round_trip_diff(UiDiff::ModError {
            error_code: 5,
            track_id: 1,
            link_id: 5,
        });
        round_trip_diff(UiDiff::PatcherGraphDelta {
            delta_kind: 1,
            graph_version: 9,
            node_id: 2,
            peer_node_id: 0,
            node_type: 1,
        });
        round_trip_diff(UiDiff::PatcherGraphError {
            error_code: 1,
            node_id: 2,
            peer_node_id: 3,
        });
    }

    #[test]
    fn unknown_code_is_rejected() {
        let mut entry = EventEntry::typed(EventType::UiCommand, 0, 0);
        put_u16(&mut entry.payload, 0, 999);
        entry.size = 4;
        assert!(UiCommand::decode(&entry).is_none());
    }

    #[test]
    fn wrong_size_is_rejected() {
        let mut entry = UiCommand::TogglePlay.encode();
        entry.size = 17;
        assert!(UiCommand::decode(&entry).is_none());
    }

    #[test]
    fn wrong_entry_type_is_rejected() {
        let mut entry = UiCommand::TogglePlay.encode();
        entry.event_type = EventType::Midi as u16;
        assert!(UiCommand::decode(&entry).is_none());
    }
}
