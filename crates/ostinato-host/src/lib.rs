//! Plugin host child-process lifecycle: launch, handshake, shared-memory
//! binding, per-block control messages, and hang detection.
//!
//! The host child loads the actual plugin instances; this crate owns the
//! engine side of the contract. The control socket carries framed,
//! low-frequency messages; everything per-block rides the shared-memory
//! rings from `ostinato-shm`.

pub mod error;
pub use error::{Error, Result};

pub mod cache;
pub mod controller;
pub mod protocol;
pub mod transport;
pub mod watchdog;

pub use cache::{PluginCache, PluginCacheEntry, ScanStatus};
pub use controller::{HostConfig, HostController};
pub use protocol::{
    ControlHeader, ControlMessageType, HelloRequest, HelloResponse, OpenEditorRequest,
    ProcessBlockRequest, SetBypassRequest, CONTROL_MAGIC, CONTROL_VERSION,
};
pub use transport::ControlSocket;
pub use watchdog::{FaultType, Watchdog};
