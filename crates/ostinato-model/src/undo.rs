//! Undo entries: inverse operations with full restoration payloads.

use crate::clip::{ChordEvent, NoteEvent};
use crate::harmony::HarmonyEvent;

/// One recorded inverse of a successful edit. Applying the entry restores
/// the model to its pre-edit shape; the ids carried here let the clip
/// re-seat the exact note/chord identity on redo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UndoEntry {
    AddNote { track_id: u32, note: NoteEvent },
    RemoveNote { track_id: u32, note: NoteEvent },
    AddChord { track_id: u32, chord: ChordEvent },
    RemoveChord { track_id: u32, chord: ChordEvent },
    AddHarmony { event: HarmonyEvent },
    RemoveHarmony { event: HarmonyEvent },
    UpdateHarmony { previous: HarmonyEvent },
}

impl UndoEntry {
    /// The entry that undoes this entry.
    ///
    /// `UpdateHarmony` is self-inverse in shape only: its true inverse
    /// carries the event the update replaced, which only the applier
    /// knows. Callers applying an update substitute that payload.
    pub fn inverse(&self) -> UndoEntry {
        match *self {
            UndoEntry::AddNote { track_id, note } => UndoEntry::RemoveNote { track_id, note },
            UndoEntry::RemoveNote { track_id, note } => UndoEntry::AddNote { track_id, note },
            UndoEntry::AddChord { track_id, chord } => UndoEntry::RemoveChord { track_id, chord },
            UndoEntry::RemoveChord { track_id, chord } => UndoEntry::AddChord { track_id, chord },
            UndoEntry::AddHarmony { event } => UndoEntry::RemoveHarmony { event },
            UndoEntry::RemoveHarmony { event } => UndoEntry::AddHarmony { event },
            UndoEntry::UpdateHarmony { previous } => UndoEntry::UpdateHarmony { previous },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> NoteEvent {
        NoteEvent {
            nanotick: 100,
            duration_nanoticks: 50,
            pitch: 60,
            velocity: 100,
            column: 0,
            note_id: 3,
        }
    }

    #[test]
    fn add_and_remove_are_inverses() {
        let add = UndoEntry::AddNote { track_id: 1, note: note() };
        let remove = add.inverse();
        assert_eq!(remove, UndoEntry::RemoveNote { track_id: 1, note: note() });
        assert_eq!(remove.inverse(), add);
    }

    #[test]
    fn harmony_update_is_self_inverse_in_shape() {
        let event = HarmonyEvent { nanotick: 0, root: 5, scale_id: 2 };
        let entry = UndoEntry::UpdateHarmony { previous: event };
        match entry.inverse() {
            UndoEntry::UpdateHarmony { previous } => assert_eq!(previous, event),
            other => panic!("unexpected inverse {other:?}"),
        }
    }
}
