//! Engine-side controller for one plugin host child process.
//!
//! Lifecycle: unlink any stale socket, spawn the host binary, poll for the
//! socket, connect and handshake, then map and verify the region the host
//! created. Disconnect unmaps, closes, and SIGKILLs a still-live child.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use ostinato_core::EngineConfig;
use ostinato_shm::{
    BlockMailbox, EventRing, SharedMemoryRegion, ShmHeader, TrackRegionGeometry,
};

use crate::error::{Error, Result};
use crate::protocol::{
    ControlMessageType, HelloRequest, HelloResponse, OpenEditorRequest, ProcessBlockRequest,
    SetBypassRequest,
};
use crate::transport::ControlSocket;

const SOCKET_POLL_ATTEMPTS: u32 = 100;
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub socket_path: PathBuf,
    /// Host binary to spawn.
    pub host_binary: PathBuf,
    /// Plugin passed through with `--plugin`; empty means host default.
    pub plugin_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl HostConfig {
    pub fn new(socket_path: impl Into<PathBuf>, host_binary: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            host_binary: host_binary.into(),
            plugin_path: None,
            engine: EngineConfig::default(),
        }
    }
}

/// Everything the producer needs from a connected host, resolved once at
/// connect time so the per-block path is lookups only. The region is an
/// `Arc` so the audio callback can keep the mapping alive across a host
/// restart without holding the controller lock.
struct HostBinding {
    region: Arc<SharedMemoryRegion>,
    ring_std: EventRing,
    ring_ctrl: EventRing,
    #[allow(dead_code)]
    ring_ui: EventRing,
    mailbox_offset: u64,
}

#[derive(Default)]
pub struct HostController {
    socket: Option<ControlSocket>,
    binding: Option<HostBinding>,
    child: Option<Child>,
}

impl HostController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some() && self.binding.is_some()
    }

    /// Spawn the host child and connect to it.
    pub fn launch(&mut self, config: &HostConfig) -> Result<()> {
        self.disconnect();

        // A stale socket from a dead host would satisfy the existence poll
        // immediately and then fail to connect.
        let _ = std::fs::remove_file(&config.socket_path);

        let mut command = Command::new(&config.host_binary);
        command
            .arg("--socket")
            .arg(&config.socket_path)
            .stdin(Stdio::null());
        if let Some(plugin) = &config.plugin_path {
            command.arg("--plugin").arg(plugin);
        }
        let child = command.spawn().map_err(|e| Error::SpawnFailed {
            path: config.host_binary.clone(),
            reason: e.to_string(),
        })?;
        info!(pid = child.id(), host = %config.host_binary.display(), "spawned host process");
        self.child = Some(child);

        if !self.wait_for_socket(config) {
            self.kill_child();
            return Err(Error::SocketTimeout {
                path: config.socket_path.clone(),
            });
        }

        match self.connect(config) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.kill_child();
                Err(e)
            }
        }
    }

    fn wait_for_socket(&self, config: &HostConfig) -> bool {
        for _ in 0..SOCKET_POLL_ATTEMPTS {
            if config.socket_path.exists() {
                return true;
            }
            std::thread::sleep(SOCKET_POLL_INTERVAL);
        }
        false
    }

    /// Connect to an already-listening host: hello handshake, then map and
    /// verify its region.
    pub fn connect(&mut self, config: &HostConfig) -> Result<()> {
        let mut socket = ControlSocket::connect(&config.socket_path)?;

        let request = HelloRequest {
            block_size: config.engine.block_size,
            num_channels_in: config.engine.num_channels_in,
            num_channels_out: config.engine.num_channels_out,
            num_blocks: config.engine.num_blocks,
            ring_std_capacity: config.engine.ring_std_capacity,
            ring_ctrl_capacity: config.engine.ring_ctrl_capacity,
            ring_ui_capacity: config.engine.ring_ui_capacity,
            sample_rate: config.engine.sample_rate,
        };
        socket.send(ControlMessageType::Hello, &request)?;
        let response: HelloResponse = socket.recv_expect(ControlMessageType::Hello)?;
        debug!(shm = %response.shm_name, bytes = response.shm_size_bytes, "hello response");

        let binding = Self::bind_region(&response, config)?;
        self.socket = Some(socket);
        self.binding = Some(binding);
        Ok(())
    }

    fn bind_region(response: &HelloResponse, config: &HostConfig) -> Result<HostBinding> {
        let geometry = TrackRegionGeometry::from_config(&config.engine);
        let expected = ostinato_shm::track_region_size(&geometry)?;
        if (response.shm_size_bytes as usize) < expected {
            return Err(Error::GeometryMismatch(format!(
                "host offered {} bytes, layout needs {expected}",
                response.shm_size_bytes
            )));
        }
        let region = Arc::new(SharedMemoryRegion::open(&response.shm_name, expected)?);

        // Safety: offset 0 of a track region is its header by contract; we
        // verify before trusting any other offset.
        let header: &ShmHeader = unsafe { region.at::<ShmHeader>(0) };
        header.verify()?;
        let want = &config.engine;
        if header.block_size != want.block_size
            || header.sample_rate != want.sample_rate
            || header.num_channels_in != want.num_channels_in
            || header.num_channels_out != want.num_channels_out
            || header.num_blocks != want.num_blocks
        {
            return Err(Error::GeometryMismatch(format!(
                "host built {}x{}ch@{} x{} blocks, engine wants {}x{}ch@{} x{} blocks",
                header.block_size,
                header.num_channels_out,
                header.sample_rate,
                header.num_blocks,
                want.block_size,
                want.num_channels_out,
                want.sample_rate,
                want.num_blocks,
            )));
        }

        let base = region.base_ptr();
        // Safety: the header offsets were just produced by a verified layout.
        let ring_std = unsafe { EventRing::from_base(base, header.ring_std_offset) }
            .ok_or_else(|| Error::Protocol("std ring not initialized".into()))?;
        let ring_ctrl = unsafe { EventRing::from_base(base, header.ring_ctrl_offset) }
            .ok_or_else(|| Error::Protocol("ctrl ring not initialized".into()))?;
        let ring_ui = unsafe { EventRing::from_base(base, header.ring_ui_offset) }
            .ok_or_else(|| Error::Protocol("ui ring not initialized".into()))?;
        let mailbox_offset = header.mailbox_offset;

        Ok(HostBinding {
            region,
            ring_std,
            ring_ctrl,
            ring_ui,
            mailbox_offset,
        })
    }

    pub fn shm_header(&self) -> Option<&ShmHeader> {
        self.binding
            .as_ref()
            // Safety: verified at bind time.
            .map(|b| unsafe { b.region.at::<ShmHeader>(0) })
    }

    pub fn mailbox(&self) -> Option<&BlockMailbox> {
        self.binding
            .as_ref()
            // Safety: offset verified at bind time; mailbox is all atomics.
            .map(|b| unsafe { b.region.at::<BlockMailbox>(b.mailbox_offset) })
    }

    pub fn ring_std(&self) -> Option<EventRing> {
        self.binding.as_ref().map(|b| b.ring_std)
    }

    pub fn ring_ctrl(&self) -> Option<EventRing> {
        self.binding.as_ref().map(|b| b.ring_ctrl)
    }

    pub fn region(&self) -> Option<Arc<SharedMemoryRegion>> {
        self.binding.as_ref().map(|b| Arc::clone(&b.region))
    }

    pub fn mailbox_offset(&self) -> Option<u64> {
        self.binding.as_ref().map(|b| b.mailbox_offset)
    }

    /// Hot path: no allocation, single frame write.
    pub fn send_process_block(&mut self, request: &ProcessBlockRequest) -> Result<()> {
        self.socket
            .as_mut()
            .ok_or(Error::NotConnected)?
            .send_process_block(request)
    }

    pub fn send_set_bypass(&mut self, slot_index: u32, bypass: bool) -> Result<()> {
        self.socket
            .as_mut()
            .ok_or(Error::NotConnected)?
            .send(ControlMessageType::SetBypass, &SetBypassRequest { slot_index, bypass })
    }

    pub fn send_open_editor(&mut self, slot_index: u32) -> Result<()> {
        self.socket
            .as_mut()
            .ok_or(Error::NotConnected)?
            .send(ControlMessageType::OpenEditor, &OpenEditorRequest { slot_index })
    }

    pub fn send_shutdown(&mut self) -> Result<()> {
        self.socket
            .as_mut()
            .ok_or(Error::NotConnected)?
            .send_bare(ControlMessageType::Shutdown)
    }

    /// Unmap, close, and reap; SIGKILL the child if it is still alive.
    pub fn disconnect(&mut self) {
        self.binding = None;
        self.socket = None;
        self.kill_child();
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => debug!(%status, "host already exited"),
                _ => {
                    if let Err(e) = child.kill() {
                        warn!(error = %e, "failed to kill host child");
                    }
                    let _ = child.wait();
                }
            }
        }
    }
}

impl Drop for HostController {
    fn drop(&mut self) {
        self.disconnect();
    }
}
