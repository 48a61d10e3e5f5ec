//! Late-block detection and hard-timeout restart triggering.

use tracing::warn;

use ostinato_shm::BlockMailbox;

/// Injectable fault modes for exercising the recovery paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultType {
    #[default]
    None,
    /// One missed deadline, then healthy again.
    TransientLate,
    /// Every check reads as late until reset.
    HardHang,
}

/// Watches a track's completion mailbox. When the host falls
/// `hard_timeout_blocks` checks behind, the restart callback fires once and
/// the late counter resets.
pub struct Watchdog {
    hard_timeout_blocks: u32,
    consecutive_late_blocks: u32,
    fault: FaultType,
    on_restart: Box<dyn FnMut() + Send>,
}

impl Watchdog {
    pub fn new(hard_timeout_blocks: u32, on_restart: impl FnMut() + Send + 'static) -> Self {
        Self {
            hard_timeout_blocks: hard_timeout_blocks.max(1),
            consecutive_late_blocks: 0,
            fault: FaultType::None,
            on_restart: Box::new(on_restart),
        }
    }

    pub fn inject_fault(&mut self, fault: FaultType) {
        self.fault = fault;
    }

    pub fn consecutive_late_blocks(&self) -> u32 {
        self.consecutive_late_blocks
    }

    /// One consumer tick: compare the mailbox against the block the engine
    /// expects done. Returns `true` when the host is on time.
    pub fn check(&mut self, mailbox: &BlockMailbox, expected_block_id: u32) -> bool {
        if self.fault == FaultType::TransientLate {
            // One-shot: reads as late this once but never counts toward
            // the hard timeout.
            self.fault = FaultType::None;
            return false;
        }

        let completed = mailbox
            .completed_block_id
            .load(std::sync::atomic::Ordering::Acquire);
        let late = self.fault == FaultType::HardHang || completed < expected_block_id;
        if !late {
            self.consecutive_late_blocks = 0;
            return true;
        }
        self.note_late();
        false
    }

    fn note_late(&mut self) {
        self.consecutive_late_blocks += 1;
        if self.consecutive_late_blocks >= self.hard_timeout_blocks {
            warn!(
                late_blocks = self.consecutive_late_blocks,
                "host hard timeout, triggering restart"
            );
            (self.on_restart)();
            self.reset();
        }
    }

    /// Clear fault and late state, e.g. after a restart completes.
    pub fn reset(&mut self) {
        self.consecutive_late_blocks = 0;
        self.fault = FaultType::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::{
        atomic::{AtomicU32, AtomicU64},
        Arc,
    };

    fn mailbox_at(completed: u32) -> BlockMailbox {
        BlockMailbox {
            completed_block_id: AtomicU32::new(completed),
            completed_sample_time: AtomicU64::new(0),
            replay_ack_sample_time: AtomicU64::new(0),
            reserved: [0; 10],
        }
    }

    fn counting_watchdog(timeout: u32) -> (Watchdog, Arc<AtomicU32>) {
        let restarts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&restarts);
        let watchdog = Watchdog::new(timeout, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (watchdog, restarts)
    }

    #[test]
    fn on_time_host_resets_late_counter() {
        let (mut watchdog, restarts) = counting_watchdog(3);
        let mailbox = mailbox_at(5);
        assert!(watchdog.check(&mailbox, 5));
        assert_eq!(watchdog.consecutive_late_blocks(), 0);
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn restart_fires_after_hard_timeout() {
        let (mut watchdog, restarts) = counting_watchdog(2);
        let mailbox = mailbox_at(1);
        assert!(!watchdog.check(&mailbox, 5));
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
        assert!(!watchdog.check(&mailbox, 5));
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
        // Counter cleared after firing; no double restart.
        assert_eq!(watchdog.consecutive_late_blocks(), 0);
    }

    #[test]
    fn transient_fault_is_one_shot() {
        let (mut watchdog, restarts) = counting_watchdog(3);
        let mailbox = mailbox_at(10);
        watchdog.inject_fault(FaultType::TransientLate);
        assert!(!watchdog.check(&mailbox, 5));
        // The transient never counts toward the hard timeout.
        assert_eq!(watchdog.consecutive_late_blocks(), 0);
        // Next check sees the healthy mailbox again.
        assert!(watchdog.check(&mailbox, 5));
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transient_fault_does_not_advance_a_late_run() {
        let (mut watchdog, restarts) = counting_watchdog(3);
        // Two genuinely late blocks put the counter one short of firing.
        assert!(!watchdog.check(&mailbox_at(0), 2));
        assert!(!watchdog.check(&mailbox_at(0), 2));
        assert_eq!(watchdog.consecutive_late_blocks(), 2);

        // A transient on top must not tip it over the threshold.
        watchdog.inject_fault(FaultType::TransientLate);
        assert!(!watchdog.check(&mailbox_at(10), 3));
        assert_eq!(watchdog.consecutive_late_blocks(), 2);
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn hard_hang_ignores_mailbox_progress() {
        let (mut watchdog, restarts) = counting_watchdog(2);
        let mailbox = mailbox_at(100);
        watchdog.inject_fault(FaultType::HardHang);
        assert!(!watchdog.check(&mailbox, 5));
        assert!(!watchdog.check(&mailbox, 5));
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recovery_interrupts_late_run() {
        let (mut watchdog, restarts) = counting_watchdog(3);
        assert!(!watchdog.check(&mailbox_at(0), 2));
        assert!(!watchdog.check(&mailbox_at(1), 2));
        assert!(watchdog.check(&mailbox_at(2), 2));
        assert!(!watchdog.check(&mailbox_at(2), 3));
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }
}
