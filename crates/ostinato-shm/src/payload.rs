//! The 64-byte event entry and its typed payloads.
//!
//! Every ring carries the same entry shape. The payload is 40 bytes of
//! little-endian packed fields; each payload type encodes and decodes
//! itself so no struct layout ever leaks across the process boundary.

/// Set on events produced by degree-encoded patcher output; sorts ahead of
/// plain note-ons at the same sample.
pub const EVENT_FLAG_MUSICAL_LOGIC: u32 = 1 << 0;

pub const MIDI_STATUS_NOTE_ON: u8 = 0x90;
pub const MIDI_STATUS_NOTE_OFF: u8 = 0x80;

pub const PAYLOAD_BYTES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EventType {
    Midi = 1,
    Param = 2,
    Transport = 3,
    ReplayComplete = 4,
    UiCommand = 5,
    UiDiff = 6,
    UiHarmonyDiff = 7,
    UiChordDiff = 8,
    MusicalLogic = 9,
}

impl EventType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Midi),
            2 => Some(Self::Param),
            3 => Some(Self::Transport),
            4 => Some(Self::ReplayComplete),
            5 => Some(Self::UiCommand),
            6 => Some(Self::UiDiff),
            7 => Some(Self::UiHarmonyDiff),
            8 => Some(Self::UiChordDiff),
            9 => Some(Self::MusicalLogic),
            _ => None,
        }
    }
}

/// One ring entry. Exactly 64 bytes, 64-byte aligned, plain old data.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(64))]
pub struct EventEntry {
    pub sample_time: u64,
    pub block_id: u32,
    pub event_type: u16,
    pub size: u16,
    pub flags: u32,
    pub payload: [u8; PAYLOAD_BYTES],
}

impl Default for EventEntry {
    fn default() -> Self {
        Self {
            sample_time: 0,
            block_id: 0,
            event_type: 0,
            size: 0,
            flags: 0,
            payload: [0; PAYLOAD_BYTES],
        }
    }
}

impl EventEntry {
    pub fn typed(event_type: EventType, sample_time: u64, block_id: u32) -> Self {
        Self {
            sample_time,
            block_id,
            event_type: event_type as u16,
            size: 0,
            flags: 0,
            payload: [0; PAYLOAD_BYTES],
        }
    }

    #[inline]
    pub fn type_of(&self) -> Option<EventType> {
        EventType::from_u16(self.event_type)
    }

    /// True for MIDI note-on/off entries; these must never be dropped
    /// silently.
    pub fn is_note_event(&self) -> bool {
        if self.type_of() != Some(EventType::Midi) {
            return false;
        }
        matches!(
            self.payload[0] & 0xF0,
            MIDI_STATUS_NOTE_ON | MIDI_STATUS_NOTE_OFF
        )
    }
}

// Little-endian field packing helpers.
#[inline]
pub(crate) fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_f32(buf: &mut [u8], at: usize, value: f32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_f64(buf: &mut [u8], at: usize, value: f64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn get_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(buf[at..at + 2].try_into().unwrap())
}

#[inline]
pub(crate) fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

#[inline]
pub(crate) fn get_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

#[inline]
pub(crate) fn get_f32(buf: &[u8], at: usize) -> f32 {
    f32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

#[inline]
pub(crate) fn get_f64(buf: &[u8], at: usize) -> f64 {
    f64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

/// Three-byte MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiPayload {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiPayload {
    pub fn note_on(pitch: u8, velocity: u8) -> Self {
        Self {
            status: MIDI_STATUS_NOTE_ON,
            data1: pitch,
            data2: velocity,
        }
    }

    pub fn note_off(pitch: u8) -> Self {
        Self {
            status: MIDI_STATUS_NOTE_OFF,
            data1: pitch,
            data2: 0,
        }
    }

    pub fn is_note_on(&self) -> bool {
        self.status & 0xF0 == MIDI_STATUS_NOTE_ON && self.data2 > 0
    }

    pub fn is_note_off(&self) -> bool {
        self.status & 0xF0 == MIDI_STATUS_NOTE_OFF
            || (self.status & 0xF0 == MIDI_STATUS_NOTE_ON && self.data2 == 0)
    }

    pub fn write_to(&self, payload: &mut [u8; PAYLOAD_BYTES]) -> u16 {
        payload[0] = self.status;
        payload[1] = self.data1;
        payload[2] = self.data2;
        payload[3] = 0;
        4
    }

    pub fn read_from(payload: &[u8; PAYLOAD_BYTES]) -> Self {
        Self {
            status: payload[0],
            data1: payload[1],
            data2: payload[2],
        }
    }
}

/// Parameter change addressed by 16-byte stable id hash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamPayload {
    pub uid16: [u8; 16],
    pub value: f32,
    /// Host slot index, or `u32::MAX` for every plugin.
    pub target_plugin_index: u32,
}

impl ParamPayload {
    pub fn write_to(&self, payload: &mut [u8; PAYLOAD_BYTES]) -> u16 {
        payload[..16].copy_from_slice(&self.uid16);
        put_f32(payload, 16, self.value);
        put_u32(payload, 20, self.target_plugin_index);
        24
    }

    pub fn read_from(payload: &[u8; PAYLOAD_BYTES]) -> Self {
        let mut uid16 = [0u8; 16];
        uid16.copy_from_slice(&payload[..16]);
        Self {
            uid16,
            value: get_f32(payload, 16),
            target_plugin_index: get_u32(payload, 20),
        }
    }
}

/// Per-block transport state for the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportPayload {
    pub tempo_bpm: f64,
    pub time_sig_num: u16,
    pub time_sig_den: u16,
    pub play_state: u8,
}

impl Default for TransportPayload {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            time_sig_num: 4,
            time_sig_den: 4,
            play_state: 1,
        }
    }
}

impl TransportPayload {
    pub fn write_to(&self, payload: &mut [u8; PAYLOAD_BYTES]) -> u16 {
        put_f64(payload, 0, self.tempo_bpm);
        put_u16(payload, 8, self.time_sig_num);
        put_u16(payload, 10, self.time_sig_den);
        payload[12] = self.play_state;
        13
    }

    pub fn read_from(payload: &[u8; PAYLOAD_BYTES]) -> Self {
        Self {
            tempo_bpm: get_f64(payload, 0),
            time_sig_num: get_u16(payload, 8),
            time_sig_den: get_u16(payload, 10),
            play_state: payload[12],
        }
    }
}

/// A gate pulse not yet bound to a scale degree.
pub const MUSICAL_LOGIC_KIND_GATE: u8 = 1;
/// A concrete degree ready for harmony resolution.
pub const MUSICAL_LOGIC_KIND_DEGREE: u8 = 2;

/// Degree-encoded musical event emitted by patcher kernels; the scheduler
/// resolves it against the harmony timeline into concrete MIDI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MusicalLogicPayload {
    pub degree: u8,
    pub octave_offset: i8,
    pub chord_id: u32,
    pub duration_ticks: u64,
    pub priority_hint: u8,
    pub velocity: u8,
    pub base_octave: u8,
    /// [`MUSICAL_LOGIC_KIND_GATE`] or [`MUSICAL_LOGIC_KIND_DEGREE`].
    pub kind: u8,
}

impl MusicalLogicPayload {
    pub fn write_to(&self, payload: &mut [u8; PAYLOAD_BYTES]) -> u16 {
        payload[0] = self.degree;
        payload[1] = self.octave_offset as u8;
        put_u32(payload, 4, self.chord_id);
        put_u64(payload, 8, self.duration_ticks);
        payload[16] = self.priority_hint;
        payload[17] = self.velocity;
        payload[18] = self.base_octave;
        payload[19] = self.kind;
        20
    }

    pub fn read_from(payload: &[u8; PAYLOAD_BYTES]) -> Self {
        Self {
            degree: payload[0],
            octave_offset: payload[1] as i8,
            chord_id: get_u32(payload, 4),
            duration_ticks: get_u64(payload, 8),
            priority_hint: payload[16],
            velocity: payload[17],
            base_octave: payload[18],
            kind: payload[19],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(std::mem::size_of::<EventEntry>(), 64);
    const_assert_eq!(std::mem::align_of::<EventEntry>(), 64);

    #[test]
    fn midi_payload_round_trips() {
        let mut buf = [0u8; PAYLOAD_BYTES];
        let size = MidiPayload::note_on(60, 100).write_to(&mut buf);
        assert_eq!(size, 4);
        let back = MidiPayload::read_from(&buf);
        assert_eq!(back.status, MIDI_STATUS_NOTE_ON);
        assert_eq!(back.data1, 60);
        assert!(back.is_note_on());
    }

    #[test]
    fn note_on_with_zero_velocity_counts_as_off() {
        let payload = MidiPayload {
            status: MIDI_STATUS_NOTE_ON,
            data1: 60,
            data2: 0,
        };
        assert!(payload.is_note_off());
        assert!(!payload.is_note_on());
    }

    #[test]
    fn param_payload_round_trips() {
        let mut buf = [0u8; PAYLOAD_BYTES];
        let param = ParamPayload {
            uid16: [7u8; 16],
            value: 0.4,
            target_plugin_index: u32::MAX,
        };
        param.write_to(&mut buf);
        assert_eq!(ParamPayload::read_from(&buf), param);
    }

    #[test]
    fn transport_payload_round_trips() {
        let mut buf = [0u8; PAYLOAD_BYTES];
        let transport = TransportPayload {
            tempo_bpm: 174.5,
            time_sig_num: 7,
            time_sig_den: 8,
            play_state: 1,
        };
        transport.write_to(&mut buf);
        assert_eq!(TransportPayload::read_from(&buf), transport);
    }

    #[test]
    fn musical_logic_round_trips_negative_octave() {
        let mut buf = [0u8; PAYLOAD_BYTES];
        let logic = MusicalLogicPayload {
            degree: 5,
            octave_offset: -2,
            chord_id: 42,
            duration_ticks: 960_000,
            priority_hint: 1,
            velocity: 96,
            base_octave: 4,
            kind: MUSICAL_LOGIC_KIND_DEGREE,
        };
        logic.write_to(&mut buf);
        assert_eq!(MusicalLogicPayload::read_from(&buf), logic);
    }

    #[test]
    fn note_event_detection_checks_type_and_status() {
        let mut entry = EventEntry::typed(EventType::Midi, 0, 0);
        entry.size = MidiPayload::note_off(60).write_to(&mut entry.payload);
        assert!(entry.is_note_event());

        let mut param = EventEntry::typed(EventType::Param, 0, 0);
        param.payload[0] = MIDI_STATUS_NOTE_ON;
        assert!(!param.is_note_event());
    }
}
