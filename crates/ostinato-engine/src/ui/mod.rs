//! UI command thread: drains the editor's command ring, applies edits
//! under the appropriate locks, and emits versioned diffs.

pub mod apply;
pub mod clip_window;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use ostinato_shm::{UiCommand, UiDiff};

use crate::engine::EngineShared;

/// Chain edit error codes carried by `ChainError` diffs.
pub mod chain_err {
    pub const ADD_FAILED: u16 = 1;
    pub const REMOVE_MISSING: u16 = 2;
    pub const MOVE_FAILED: u16 = 3;
    pub const UPDATE_FAILED: u16 = 4;
}

/// Routing edit error codes.
pub mod routing_err {
    pub const TRACK_MISSING: u16 = 1;
    pub const INVALID_KIND: u16 = 2;
    pub const INVALID_TARGET: u16 = 3;
}

/// Modulation edit error codes.
pub mod mod_err {
    pub const TRACK_MISSING: u16 = 1;
    pub const LINK_MISSING: u16 = 2;
    pub const INVALID_KIND: u16 = 3;
    pub const INVALID_DEVICE: u16 = 4;
    pub const ORDER_VIOLATION: u16 = 5;
    pub const LINK_EXISTS: u16 = 6;
}

/// Patcher graph edit error codes.
pub mod patcher_err {
    pub const ADD_FAILED: u16 = 1;
    pub const REMOVE_MISSING: u16 = 2;
    pub const CONNECT_REJECTED: u16 = 3;
    pub const CONFIG_REJECTED: u16 = 4;
    pub const PRESET_FAILED: u16 = 5;
}

/// Patcher graph delta kinds.
pub mod patcher_delta {
    pub const NODE_ADDED: u8 = 1;
    pub const NODE_REMOVED: u8 = 2;
    pub const CONNECTED: u8 = 3;
    pub const CONFIG_SET: u8 = 4;
}

/// Write a diff to the UI-out ring. Overflow is counted and logged at most
/// once a second; the UI never sees a partial error channel.
pub fn emit_diff(shared: &EngineShared, diff: &UiDiff) {
    let entry = diff.encode();
    if shared.ui.ring_ui_out().write(&entry) {
        return;
    }
    shared.ui_out_drops.fetch_add(1);
    let mut last_warn = shared.ui_out_last_warn.lock();
    let now = Instant::now();
    if last_warn.map_or(true, |at| now.duration_since(at) >= Duration::from_secs(1)) {
        *last_warn = Some(now);
        warn!(
            dropped = shared.ui_out_drops.get(),
            "ui-out ring overflow"
        );
    }
}

/// UI thread body: drain, decode, apply; sleep when idle.
pub fn ui_loop(shared: &Arc<EngineShared>) {
    let ring = shared.ui.ring_ui_in();
    while shared.running.get() {
        let mut handled = false;
        while let Some(entry) = ring.pop() {
            handled = true;
            match UiCommand::decode(&entry) {
                Some(command) => {
                    trace!(?command, "ui command");
                    apply::apply_command(shared, command);
                }
                None => {
                    // Unknown size or type code: logged and dropped, no
                    // state change.
                    debug!(
                        event_type = entry.event_type,
                        size = entry.size,
                        "malformed ui command dropped"
                    );
                }
            }
        }
        if !handled {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    trace!("ui thread exiting");
}
