//! Per-block event scratchpad and the priority sort.
//!
//! Events for one track and one block are assembled here, stably sorted by
//! `(sample_time, priority_band)`, then compensated and written to the std
//! ring. Stability preserves patcher topo order among ties.

use ostinato_shm::{EventEntry, EventType, MidiPayload, EVENT_FLAG_MUSICAL_LOGIC};

/// Fixed scratchpad capacity per block.
pub const SCRATCHPAD_CAPACITY: usize = 1024;

/// Priority bands: lower sorts first at equal sample time.
pub fn priority_band(entry: &EventEntry) -> u8 {
    match entry.type_of() {
        Some(EventType::Transport) => 0,
        Some(EventType::Param) => 1,
        Some(EventType::Midi) => {
            let midi = MidiPayload::read_from(&entry.payload);
            if midi.is_note_off() {
                2
            } else if entry.flags & EVENT_FLAG_MUSICAL_LOGIC != 0 {
                3
            } else {
                4
            }
        }
        Some(EventType::MusicalLogic) => 3,
        _ => 4,
    }
}

/// Fixed-capacity assembly buffer. Overflow is counted, never silent, and
/// the caller checks `dropped_note_event` to schedule the panic flush.
pub struct Scratchpad {
    entries: Vec<EventEntry>,
    count: usize,
    dropped: u64,
    dropped_note_event: bool,
}

impl Default for Scratchpad {
    fn default() -> Self {
        Self::new()
    }
}

impl Scratchpad {
    pub fn new() -> Self {
        Self {
            entries: vec![EventEntry::default(); SCRATCHPAD_CAPACITY],
            count: 0,
            dropped: 0,
            dropped_note_event: false,
        }
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.dropped = 0;
        self.dropped_note_event = false;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn dropped_note_event(&self) -> bool {
        self.dropped_note_event
    }

    pub fn push(&mut self, entry: EventEntry) -> bool {
        if self.count < self.entries.len() {
            self.entries[self.count] = entry;
            self.count += 1;
            true
        } else {
            self.dropped += 1;
            if entry.is_note_event() {
                self.dropped_note_event = true;
            }
            false
        }
    }

    pub fn events(&self) -> &[EventEntry] {
        &self.entries[..self.count]
    }

    pub fn events_mut(&mut self) -> &mut [EventEntry] {
        &mut self.entries[..self.count]
    }

    /// Stable sort by `(sample_time, priority_band)`.
    pub fn sort(&mut self) {
        self.entries[..self.count]
            .sort_by_key(|entry| (entry.sample_time, priority_band(entry)));
    }
}
