//! Parameter mirror: the engine-side copy of every parameter value sent to
//! a host, replayed after restarts.
//!
//! Replay is at-least-once: the full mirror is rewritten to the std ring,
//! terminated by a `ReplayComplete` fence. The host acks the fence's sample
//! time into its mailbox; until the ack reaches the gate, new param events
//! are held back while MIDI keeps flowing.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use ostinato_core::{AtomicFlag, AtomicU64Cell, Uid16};
use ostinato_model::PARAM_TARGET_ALL;
use ostinato_shm::{BlockMailbox, EventEntry, EventRing, EventType, ParamPayload};

#[derive(Debug, Clone, Copy, PartialEq)]
struct MirrorEntry {
    value: f32,
    target_plugin_index: u32,
}

#[derive(Default)]
pub struct ParamMirror {
    entries: Mutex<BTreeMap<Uid16, MirrorEntry>>,
    /// A replay is owed (queued at restart or after a dropped note event).
    pending: AtomicFlag,
    /// The replay has been written and is waiting for the ack.
    primed: AtomicFlag,
    gate_sample_time: AtomicU64Cell,
}

impl ParamMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parameter on its way to the host.
    pub fn record(&self, uid16: Uid16, value: f32, target_plugin_index: u32) {
        self.entries.lock().insert(
            uid16,
            MirrorEntry {
                value,
                target_plugin_index,
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn value_of(&self, uid16: &Uid16) -> Option<f32> {
        self.entries.lock().get(uid16).map(|e| e.value)
    }

    /// Queue a replay for the next block.
    pub fn enqueue_replay(&self) {
        self.gate_sample_time.set(0);
        self.primed.set(false);
        self.pending.set(true);
        debug!("parameter mirror replay enqueued");
    }

    /// A replay is owed but not yet written.
    pub fn needs_write(&self) -> bool {
        self.pending.get() && !self.primed.get()
    }

    /// New param events are held back while a replay is in flight.
    pub fn params_gated(&self) -> bool {
        self.pending.get()
    }

    /// Write the whole mirror plus the `ReplayComplete` fence at
    /// `sample_time`. Entries targeting all plugins are narrowed to
    /// `fallback_target` when one exists.
    pub fn write_replay(&self, ring: &EventRing, sample_time: u64, fallback_target: Option<u32>) {
        let entries = self.entries.lock();
        for (uid16, entry) in entries.iter() {
            let mut target = entry.target_plugin_index;
            if target == PARAM_TARGET_ALL {
                if let Some(fallback) = fallback_target {
                    target = fallback;
                }
            }
            let mut event = EventEntry::typed(EventType::Param, sample_time, 0);
            event.size = ParamPayload {
                uid16: *uid16,
                value: entry.value,
                target_plugin_index: target,
            }
            .write_to(&mut event.payload);
            ring.write(&event);
        }

        // Gate time zero would ack immediately against a zeroed mailbox.
        let gate = sample_time.max(1);
        let fence = EventEntry::typed(EventType::ReplayComplete, gate, 0);
        ring.write(&fence);
        self.gate_sample_time.set(gate);
        self.primed.set(true);
        info!(
            params = entries.len(),
            gate, "parameter mirror replay written"
        );
    }

    /// Check the host's ack; clears the gate once
    /// `replay_ack_sample_time >= gate`.
    pub fn check_ack(&self, mailbox: &BlockMailbox) -> bool {
        if !self.pending.get() || !self.primed.get() {
            return false;
        }
        let ack = mailbox
            .replay_ack_sample_time
            .load(std::sync::atomic::Ordering::Acquire);
        if ack >= self.gate_sample_time.get() {
            self.pending.set(false);
            debug!(ack, "parameter mirror replay acknowledged");
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_shm::{create_track_region, TrackRegionGeometry};
    use std::sync::atomic::Ordering;

    fn test_ring(tag: &str) -> (ostinato_shm::SharedMemoryRegion, EventRing) {
        let geometry = TrackRegionGeometry {
            block_size: 64,
            sample_rate: 48_000.0,
            num_channels_in: 0,
            num_channels_out: 2,
            num_blocks: 3,
            ring_std_capacity: 64,
            ring_ctrl_capacity: 16,
            ring_ui_capacity: 16,
        };
        let name = format!("ostinato_mirror_{}_{}", tag, std::process::id());
        let region = create_track_region(&name, &geometry).unwrap();
        let header = unsafe { region.at::<ostinato_shm::ShmHeader>(0) };
        let ring = unsafe { EventRing::from_base(region.base_ptr(), header.ring_std_offset) }.unwrap();
        (region, ring)
    }

    fn mailbox() -> BlockMailbox {
        BlockMailbox {
            completed_block_id: std::sync::atomic::AtomicU32::new(0),
            completed_sample_time: std::sync::atomic::AtomicU64::new(0),
            replay_ack_sample_time: std::sync::atomic::AtomicU64::new(0),
            reserved: [0; 10],
        }
    }

    #[test]
    fn record_overwrites_per_uid() {
        let mirror = ParamMirror::new();
        let uid = [1u8; 16];
        mirror.record(uid, 0.2, 0);
        mirror.record(uid, 0.4, 0);
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror.value_of(&uid), Some(0.4));
    }

    #[test]
    fn replay_writes_params_then_fence() {
        let (_region, ring) = test_ring("fence");
        let mirror = ParamMirror::new();
        mirror.record([1u8; 16], 0.4, PARAM_TARGET_ALL);
        mirror.record([2u8; 16], 0.7, 3);
        mirror.enqueue_replay();
        assert!(mirror.needs_write());

        mirror.write_replay(&ring, 1000, Some(5));
        assert!(!mirror.needs_write());
        assert!(mirror.params_gated());

        let first = ring.pop().unwrap();
        assert_eq!(first.type_of(), Some(EventType::Param));
        let payload = ParamPayload::read_from(&first.payload);
        assert_eq!(payload.value, 0.4);
        // PARAM_TARGET_ALL narrowed to the chain's first usable plugin.
        assert_eq!(payload.target_plugin_index, 5);

        let second = ring.pop().unwrap();
        let payload = ParamPayload::read_from(&second.payload);
        assert_eq!(payload.target_plugin_index, 3);

        let fence = ring.pop().unwrap();
        assert_eq!(fence.type_of(), Some(EventType::ReplayComplete));
        assert_eq!(fence.sample_time, 1000);
        assert!(ring.pop().is_none());
    }

    #[test]
    fn gate_clears_only_at_or_past_ack() {
        let (_region, ring) = test_ring("gate");
        let mirror = ParamMirror::new();
        mirror.record([1u8; 16], 0.4, 0);
        mirror.enqueue_replay();
        mirror.write_replay(&ring, 2048, None);

        let mailbox = mailbox();
        mailbox.replay_ack_sample_time.store(2047, Ordering::Release);
        assert!(!mirror.check_ack(&mailbox));
        assert!(mirror.params_gated());

        mailbox.replay_ack_sample_time.store(2048, Ordering::Release);
        assert!(mirror.check_ack(&mailbox));
        assert!(!mirror.params_gated());
    }

    #[test]
    fn zero_sample_replay_gates_at_one() {
        let (_region, ring) = test_ring("zero");
        let mirror = ParamMirror::new();
        mirror.record([1u8; 16], 0.4, 0);
        mirror.enqueue_replay();
        mirror.write_replay(&ring, 0, None);

        let mailbox = mailbox();
        assert!(!mirror.check_ack(&mailbox), "zeroed mailbox must not ack");
        mailbox.replay_ack_sample_time.store(1, Ordering::Release);
        assert!(mirror.check_ack(&mailbox));
    }
}
