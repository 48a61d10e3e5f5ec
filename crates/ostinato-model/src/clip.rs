//! Musical clip: an insertion-ordered sequence of note, chord, and parameter
//! events keyed by nanotick.
//!
//! Invariants maintained by the mutation ops:
//! - at most one note and one chord per `(column, nanotick)` slot; writing a
//!   new one replaces the old,
//! - note and chord ids are dense, monotonic, and never reused.

use ostinato_core::Uid16;

/// Param events with this target address every plugin in the chain.
pub const PARAM_TARGET_ALL: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub nanotick: u64,
    pub duration_nanoticks: u64,
    pub pitch: u8,
    pub velocity: u8,
    pub column: u8,
    /// Dense id unique within the clip, never reused.
    pub note_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChordEvent {
    pub nanotick: u64,
    pub duration_nanoticks: u64,
    pub chord_id: u32,
    pub degree: u8,
    /// 0 = mono, 1 = triad, 2 = tetrad.
    pub quality: u8,
    pub inversion: u8,
    pub base_octave: u8,
    pub column: u8,
    pub spread_nanoticks: u32,
    pub humanize_timing: u16,
    pub humanize_velocity: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamEvent {
    pub nanotick: u64,
    pub uid16: Uid16,
    pub value: f32,
    /// Host slot index, or [`PARAM_TARGET_ALL`].
    pub target_plugin_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClipEvent {
    Note(NoteEvent),
    Chord(ChordEvent),
    Param(ParamEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipEventKind {
    Note,
    Chord,
    Param,
}

impl ClipEvent {
    #[inline]
    pub fn nanotick(&self) -> u64 {
        match self {
            ClipEvent::Note(n) => n.nanotick,
            ClipEvent::Chord(c) => c.nanotick,
            ClipEvent::Param(p) => p.nanotick,
        }
    }

    #[inline]
    pub fn kind(&self) -> ClipEventKind {
        match self {
            ClipEvent::Note(_) => ClipEventKind::Note,
            ClipEvent::Chord(_) => ClipEventKind::Chord,
            ClipEvent::Param(_) => ClipEventKind::Param,
        }
    }
}

/// Ordered event container for one track.
#[derive(Debug, Clone, Default)]
pub struct MusicalClip {
    events: Vec<ClipEvent>,
    next_note_id: u32,
    next_chord_id: u32,
}

impl MusicalClip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ClipEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Next dense note id; `override_id` restores an id during undo replay
    /// and pushes the allocator past it.
    pub fn allocate_note_id(&mut self, override_id: Option<u32>) -> u32 {
        match override_id {
            Some(id) => {
                self.next_note_id = self.next_note_id.max(id + 1);
                id
            }
            None => {
                let id = self.next_note_id;
                self.next_note_id += 1;
                id
            }
        }
    }

    pub fn allocate_chord_id(&mut self, override_id: Option<u32>) -> u32 {
        match override_id {
            Some(id) => {
                self.next_chord_id = self.next_chord_id.max(id + 1);
                id
            }
            None => {
                let id = self.next_chord_id;
                self.next_chord_id += 1;
                id
            }
        }
    }

    fn insert_sorted(&mut self, event: ClipEvent) {
        let tick = event.nanotick();
        let index = self.events.partition_point(|e| e.nanotick() <= tick);
        self.events.insert(index, event);
    }

    /// Write a note, replacing any note or chord already on the same
    /// `(column, nanotick)` slot. Returns the stored event.
    pub fn write_note(
        &mut self,
        nanotick: u64,
        duration_nanoticks: u64,
        pitch: u8,
        velocity: u8,
        column: u8,
        note_id_override: Option<u32>,
    ) -> NoteEvent {
        self.remove_chord_at(nanotick, column);
        self.remove_note_at(nanotick, column);
        let note = NoteEvent {
            nanotick,
            duration_nanoticks,
            pitch,
            velocity,
            column,
            note_id: self.allocate_note_id(note_id_override),
        };
        self.insert_sorted(ClipEvent::Note(note));
        note
    }

    /// Write a chord, replacing any chord or note already on the same slot.
    #[allow(clippy::too_many_arguments)]
    pub fn write_chord(
        &mut self,
        nanotick: u64,
        duration_nanoticks: u64,
        degree: u8,
        quality: u8,
        inversion: u8,
        base_octave: u8,
        column: u8,
        spread_nanoticks: u32,
        humanize_timing: u16,
        humanize_velocity: u16,
        chord_id_override: Option<u32>,
    ) -> ChordEvent {
        self.remove_note_at(nanotick, column);
        self.remove_chord_at(nanotick, column);
        let chord = ChordEvent {
            nanotick,
            duration_nanoticks,
            chord_id: self.allocate_chord_id(chord_id_override),
            degree,
            quality,
            inversion,
            base_octave,
            column,
            spread_nanoticks,
            humanize_timing,
            humanize_velocity,
        };
        self.insert_sorted(ClipEvent::Chord(chord));
        chord
    }

    pub fn write_param(&mut self, param: ParamEvent) {
        self.insert_sorted(ClipEvent::Param(param));
    }

    /// Remove the note at `(nanotick, column)`, returning it if present.
    pub fn remove_note_at(&mut self, nanotick: u64, column: u8) -> Option<NoteEvent> {
        let index = self.events.iter().position(|e| {
            matches!(e, ClipEvent::Note(n) if n.nanotick == nanotick && n.column == column)
        })?;
        match self.events.remove(index) {
            ClipEvent::Note(n) => Some(n),
            _ => None,
        }
    }

    pub fn remove_note_by_id(&mut self, note_id: u32) -> Option<NoteEvent> {
        let index = self
            .events
            .iter()
            .position(|e| matches!(e, ClipEvent::Note(n) if n.note_id == note_id))?;
        match self.events.remove(index) {
            ClipEvent::Note(n) => Some(n),
            _ => None,
        }
    }

    /// Remove the chord at `(nanotick, column)`, returning it if present.
    pub fn remove_chord_at(&mut self, nanotick: u64, column: u8) -> Option<ChordEvent> {
        let index = self.events.iter().position(|e| {
            matches!(e, ClipEvent::Chord(c) if c.nanotick == nanotick && c.column == column)
        })?;
        match self.events.remove(index) {
            ClipEvent::Chord(c) => Some(c),
            _ => None,
        }
    }

    pub fn remove_chord_by_id(&mut self, chord_id: u32) -> Option<ChordEvent> {
        let index = self
            .events
            .iter()
            .position(|e| matches!(e, ClipEvent::Chord(c) if c.chord_id == chord_id))?;
        match self.events.remove(index) {
            ClipEvent::Chord(c) => Some(c),
            _ => None,
        }
    }

    pub fn find_note_at(&self, nanotick: u64, column: u8) -> Option<&NoteEvent> {
        self.events.iter().find_map(|e| match e {
            ClipEvent::Note(n) if n.nanotick == nanotick && n.column == column => Some(n),
            _ => None,
        })
    }

    pub fn find_chord_at(&self, nanotick: u64, column: u8) -> Option<&ChordEvent> {
        self.events.iter().find_map(|e| match e {
            ClipEvent::Chord(c) if c.nanotick == nanotick && c.column == column => Some(c),
            _ => None,
        })
    }

    /// Iterate events with `start <= nanotick < end`.
    pub fn events_in_range(&self, start: u64, end: u64) -> impl Iterator<Item = &ClipEvent> {
        let from = self.events.partition_point(|e| e.nanotick() < start);
        self.events[from..]
            .iter()
            .take_while(move |e| e.nanotick() < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_ids_are_dense_and_monotonic() {
        let mut clip = MusicalClip::new();
        let a = clip.write_note(0, 100, 60, 100, 0, None);
        let b = clip.write_note(500, 100, 62, 100, 0, None);
        assert_eq!(a.note_id, 0);
        assert_eq!(b.note_id, 1);
        clip.remove_note_by_id(0);
        let c = clip.write_note(1000, 100, 64, 100, 0, None);
        assert_eq!(c.note_id, 2, "removed ids are never reused");
    }

    #[test]
    fn override_id_advances_allocator() {
        let mut clip = MusicalClip::new();
        let restored = clip.write_note(0, 100, 60, 100, 0, Some(7));
        assert_eq!(restored.note_id, 7);
        let next = clip.write_note(100, 100, 61, 100, 0, None);
        assert_eq!(next.note_id, 8);
    }

    #[test]
    fn writing_same_slot_replaces() {
        let mut clip = MusicalClip::new();
        clip.write_note(480_000, 100, 60, 100, 2, None);
        clip.write_note(480_000, 200, 65, 90, 2, None);
        let notes: Vec<_> = clip
            .events()
            .iter()
            .filter(|e| matches!(e, ClipEvent::Note(_)))
            .collect();
        assert_eq!(notes.len(), 1);
        let note = clip.find_note_at(480_000, 2).unwrap();
        assert_eq!(note.pitch, 65);
    }

    #[test]
    fn note_displaces_chord_on_same_slot() {
        let mut clip = MusicalClip::new();
        clip.write_chord(100, 960, 1, 1, 0, 4, 0, 0, 0, 0, None);
        assert!(clip.find_chord_at(100, 0).is_some());
        clip.write_note(100, 480, 60, 100, 0, None);
        assert!(clip.find_chord_at(100, 0).is_none());
        assert!(clip.find_note_at(100, 0).is_some());
    }

    #[test]
    fn different_columns_coexist() {
        let mut clip = MusicalClip::new();
        clip.write_note(100, 480, 60, 100, 0, None);
        clip.write_note(100, 480, 64, 100, 1, None);
        assert!(clip.find_note_at(100, 0).is_some());
        assert!(clip.find_note_at(100, 1).is_some());
    }

    #[test]
    fn events_stay_sorted_by_nanotick() {
        let mut clip = MusicalClip::new();
        clip.write_note(2_880_000, 100, 63, 100, 0, None);
        clip.write_note(0, 100, 60, 100, 0, None);
        clip.write_note(960_000, 100, 61, 100, 0, None);
        let ticks: Vec<u64> = clip.events().iter().map(ClipEvent::nanotick).collect();
        assert_eq!(ticks, vec![0, 960_000, 2_880_000]);
    }

    #[test]
    fn range_query_is_half_open() {
        let mut clip = MusicalClip::new();
        for tick in [0u64, 960_000, 1_920_000, 2_880_000] {
            clip.write_note(tick, 100, 60, 100, 0, None);
        }
        let hits: Vec<u64> = clip
            .events_in_range(960_000, 2_880_000)
            .map(ClipEvent::nanotick)
            .collect();
        assert_eq!(hits, vec![960_000, 1_920_000]);
    }
}
