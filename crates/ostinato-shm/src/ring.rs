//! Single-producer/single-consumer event ring over mapped memory.
//!
//! The ring lives inside a shared-memory region: a [`RingHeader`] followed
//! by `capacity` 64-byte entries. Exactly one process writes and one reads.
//! Indexes are published with release stores and observed with acquire
//! loads; the ring never blocks and never allocates.

use std::sync::atomic::Ordering;

use crate::layout::{align_up, RingHeader};
use crate::payload::EventEntry;

/// A non-owning view of a ring inside a mapped region.
///
/// Copyable so producer/consumer threads can each hold their own view.
#[derive(Clone, Copy)]
pub struct EventRing {
    header: *const RingHeader,
    entries: *mut EventEntry,
    mask: u32,
}

// The ring is designed for cross-thread use: the header holds atomics and
// entry slots are only written before the release store that publishes them.
unsafe impl Send for EventRing {}
unsafe impl Sync for EventRing {}

impl EventRing {
    /// Build a view of the ring at `offset` inside the region at `base`.
    ///
    /// Returns `None` when the header capacity is not a nonzero power of
    /// two (an uninitialized or corrupt region).
    ///
    /// # Safety
    ///
    /// `base + offset` must point at an initialized [`RingHeader`] followed
    /// by `capacity` entries, and the mapping must outlive the view.
    pub unsafe fn from_base(base: *mut u8, offset: u64) -> Option<Self> {
        let header = base.add(offset as usize) as *const RingHeader;
        let capacity = (*header).capacity;
        if capacity == 0 || !capacity.is_power_of_two() {
            return None;
        }
        let entries_offset = align_up(std::mem::size_of::<RingHeader>(), 64);
        let entries = base.add(offset as usize + entries_offset) as *mut EventEntry;
        Some(Self {
            header,
            entries,
            mask: capacity - 1,
        })
    }

    /// Initialize the header at `offset` for `capacity` entries. Done once
    /// by the region owner before any peer maps in.
    ///
    /// # Safety
    ///
    /// Same aliasing requirements as [`Self::from_base`], and no other
    /// process may be using the ring yet.
    pub unsafe fn initialize(base: *mut u8, offset: u64, capacity: u32) {
        let header = base.add(offset as usize) as *mut RingHeader;
        (*header).capacity = capacity;
        (*header).entry_size = std::mem::size_of::<EventEntry>() as u32;
        (*header).read_index.store(0, Ordering::Release);
        (*header).write_index.store(0, Ordering::Release);
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // Safety: construction guarantees a live initialized header.
        unsafe { &*self.header }
    }

    pub fn capacity(&self) -> u32 {
        self.mask + 1
    }

    /// Entries currently readable.
    pub fn len(&self) -> u32 {
        let header = self.header();
        let write = header.write_index.load(Ordering::Acquire);
        let read = header.read_index.load(Ordering::Acquire);
        write.wrapping_sub(read) & self.mask
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write one entry. Returns `false` when the ring is full; the caller
    /// owns overflow accounting, a full ring is never silent.
    pub fn write(&self, entry: &EventEntry) -> bool {
        let header = self.header();
        let write = header.write_index.load(Ordering::Relaxed);
        let read = header.read_index.load(Ordering::Acquire);
        let next = (write + 1) & self.mask;
        if next == read {
            return false;
        }
        // Safety: the slot at `write` is not visible to the reader until the
        // release store below, and only one producer exists.
        unsafe {
            *self.entries.add(write as usize) = *entry;
        }
        header.write_index.store(next, Ordering::Release);
        true
    }

    /// Copy the oldest entry without consuming it.
    pub fn peek(&self) -> Option<EventEntry> {
        let header = self.header();
        let read = header.read_index.load(Ordering::Relaxed);
        let write = header.write_index.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        // Safety: the producer published this slot before moving write_index.
        Some(unsafe { *self.entries.add(read as usize) })
    }

    /// Consume and return the oldest entry.
    pub fn pop(&self) -> Option<EventEntry> {
        let entry = self.peek()?;
        let header = self.header();
        let read = header.read_index.load(Ordering::Relaxed);
        header.read_index.store((read + 1) & self.mask, Ordering::Release);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ring_bytes;
    use crate::payload::EventType;

    struct TestRing {
        // Vec<u8> does not guarantee 64-byte alignment; over-allocate and
        // align the base by hand.
        _storage: Vec<u8>,
    }

    fn make_ring(capacity: u32) -> (TestRing, EventRing) {
        let bytes = ring_bytes(capacity) + 64;
        let mut storage = vec![0u8; bytes];
        let misalign = storage.as_ptr() as usize % 64;
        let base = unsafe { storage.as_mut_ptr().add((64 - misalign) % 64) };
        unsafe {
            EventRing::initialize(base, 0, capacity);
        }
        let ring = unsafe { EventRing::from_base(base, 0) }.unwrap();
        (TestRing { _storage: storage }, ring)
    }

    fn entry_at(sample_time: u64) -> EventEntry {
        EventEntry::typed(EventType::Midi, sample_time, 1)
    }

    #[test]
    fn write_then_pop_round_trips() {
        let (_mem, ring) = make_ring(8);
        assert!(ring.write(&entry_at(42)));
        let out = ring.pop().unwrap();
        assert_eq!(out.sample_time, 42);
        assert!(ring.pop().is_none());
    }

    #[test]
    fn preserves_fifo_order() {
        let (_mem, ring) = make_ring(8);
        for i in 0..5 {
            assert!(ring.write(&entry_at(i)));
        }
        for i in 0..5 {
            assert_eq!(ring.pop().unwrap().sample_time, i);
        }
    }

    #[test]
    fn full_ring_rejects_writes() {
        let (_mem, ring) = make_ring(4);
        // One slot stays open to distinguish full from empty.
        for i in 0..3 {
            assert!(ring.write(&entry_at(i)));
        }
        assert!(!ring.write(&entry_at(99)));
        assert_eq!(ring.len(), 3);
        ring.pop().unwrap();
        assert!(ring.write(&entry_at(99)));
    }

    #[test]
    fn wraps_around_capacity() {
        let (_mem, ring) = make_ring(4);
        for round in 0..10u64 {
            assert!(ring.write(&entry_at(round)));
            assert_eq!(ring.pop().unwrap().sample_time, round);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn peek_does_not_consume() {
        let (_mem, ring) = make_ring(8);
        ring.write(&entry_at(7));
        assert_eq!(ring.peek().unwrap().sample_time, 7);
        assert_eq!(ring.peek().unwrap().sample_time, 7);
        assert_eq!(ring.pop().unwrap().sample_time, 7);
    }

    #[test]
    fn uninitialized_ring_is_rejected() {
        let mut storage = vec![0u8; 256];
        let misalign = storage.as_ptr() as usize % 64;
        let base = unsafe { storage.as_mut_ptr().add((64 - misalign) % 64) };
        assert!(unsafe { EventRing::from_base(base, 0) }.is_none());
    }

    #[test]
    fn concurrent_producer_consumer() {
        let (mem, ring) = make_ring(64);
        let producer_ring = ring;
        let count = 10_000u64;
        std::thread::scope(|scope| {
            scope.spawn(move || {
                let mut written = 0;
                while written < count {
                    if producer_ring.write(&entry_at(written)) {
                        written += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            });
            let mut expected = 0;
            while expected < count {
                if let Some(entry) = ring.pop() {
                    assert_eq!(entry.sample_time, expected);
                    expected += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
        });
        drop(mem);
    }
}
