//! Active-note lifecycle table.
//!
//! One table owns both the by-id map and the by-column index; every
//! mutation goes through a single operation so the two views can never
//! disagree, including during panic flushes.

use std::collections::BTreeMap;

use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveNote {
    pub note_id: u32,
    pub pitch: u8,
    pub column: u8,
    pub start_nanotick: u64,
    pub end_nanotick: u64,
    /// True when the note-off is left for a future block to emit.
    pub has_scheduled_end: bool,
}

#[derive(Debug, Default)]
pub struct ActiveNoteTable {
    by_id: BTreeMap<u32, ActiveNote>,
    by_column: BTreeMap<u8, SmallVec<[u32; 4]>>,
}

impl ActiveNoteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, note_id: u32) -> Option<&ActiveNote> {
        self.by_id.get(&note_id)
    }

    /// Start tracking a sounding note.
    pub fn insert(&mut self, note: ActiveNote) {
        self.by_column.entry(note.column).or_default().push(note.note_id);
        self.by_id.insert(note.note_id, note);
    }

    /// Retire one note (normal note-off path).
    pub fn remove(&mut self, note_id: u32) -> Option<ActiveNote> {
        let note = self.by_id.remove(&note_id)?;
        if let Some(ids) = self.by_column.get_mut(&note.column) {
            ids.retain(|id| *id != note_id);
            if ids.is_empty() {
                self.by_column.remove(&note.column);
            }
        }
        Some(note)
    }

    /// Retire every note sounding on a column (a new note on the column
    /// cuts whatever was playing there). Returns the cut notes.
    pub fn cut_column(&mut self, column: u8) -> SmallVec<[ActiveNote; 4]> {
        let Some(ids) = self.by_column.remove(&column) else {
            return SmallVec::new();
        };
        ids.into_iter()
            .filter_map(|id| self.by_id.remove(&id))
            .collect()
    }

    /// Notes whose scheduled end falls in `[start, end)`.
    pub fn ending_in(&self, start: u64, end: u64) -> SmallVec<[ActiveNote; 8]> {
        self.by_id
            .values()
            .filter(|note| {
                note.has_scheduled_end && note.end_nanotick >= start && note.end_nanotick < end
            })
            .copied()
            .collect()
    }

    /// Retire everything (panic sweep). Both views clear together.
    pub fn drain_all(&mut self) -> Vec<ActiveNote> {
        self.by_column.clear();
        let drained = self.by_id.values().copied().collect();
        self.by_id.clear();
        drained
    }

    #[cfg(test)]
    fn column_index_is_consistent(&self) -> bool {
        let column_total: usize = self.by_column.values().map(SmallVec::len).sum();
        column_total == self.by_id.len()
            && self.by_column.iter().all(|(&column, ids)| {
                ids.iter().all(|id| {
                    self.by_id
                        .get(id)
                        .is_some_and(|note| note.column == column)
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(note_id: u32, column: u8, end: u64) -> ActiveNote {
        ActiveNote {
            note_id,
            pitch: 60,
            column,
            start_nanotick: 0,
            end_nanotick: end,
            has_scheduled_end: true,
        }
    }

    #[test]
    fn insert_remove_keeps_views_consistent() {
        let mut table = ActiveNoteTable::new();
        table.insert(note(1, 0, 100));
        table.insert(note(2, 0, 200));
        table.insert(note(3, 1, 300));
        assert!(table.column_index_is_consistent());
        assert_eq!(table.len(), 3);

        let removed = table.remove(2).unwrap();
        assert_eq!(removed.end_nanotick, 200);
        assert!(table.column_index_is_consistent());
        assert!(table.remove(2).is_none());
    }

    #[test]
    fn cut_column_retires_only_that_column() {
        let mut table = ActiveNoteTable::new();
        table.insert(note(1, 0, 100));
        table.insert(note(2, 0, 200));
        table.insert(note(3, 1, 300));
        let cut = table.cut_column(0);
        assert_eq!(cut.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.get(3).is_some());
        assert!(table.column_index_is_consistent());
        assert!(table.cut_column(0).is_empty());
    }

    #[test]
    fn ending_in_is_half_open() {
        let mut table = ActiveNoteTable::new();
        table.insert(note(1, 0, 100));
        table.insert(note(2, 1, 200));
        table.insert(note(3, 2, 300));
        let ending: Vec<u32> = table.ending_in(100, 300).iter().map(|n| n.note_id).collect();
        assert_eq!(ending, vec![1, 2]);
    }

    #[test]
    fn unscheduled_ends_are_skipped() {
        let mut table = ActiveNoteTable::new();
        let mut open_ended = note(1, 0, 100);
        open_ended.has_scheduled_end = false;
        table.insert(open_ended);
        assert!(table.ending_in(0, 1000).is_empty());
    }

    #[test]
    fn drain_all_clears_both_views() {
        let mut table = ActiveNoteTable::new();
        table.insert(note(1, 0, 100));
        table.insert(note(2, 3, 200));
        let drained = table.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
        assert!(table.column_index_is_consistent());
        // After the sweep a fresh note on a previously-swept column works.
        table.insert(note(4, 3, 400));
        assert_eq!(table.cut_column(3).len(), 1);
    }
}
