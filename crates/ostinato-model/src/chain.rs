//! Per-track device chain: an ordered list of patcher and VST devices.

/// Sentinel asking the chain to allocate the next device id.
pub const DEVICE_ID_AUTO: u32 = 0xFFFF_FFFF;

/// Host slot sentinel for a plugin loaded outside the cache index.
pub const HOST_SLOT_DIRECT: u32 = 0xFFFF_FFFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceKind {
    PatcherEvent = 0,
    PatcherInstrument = 1,
    PatcherAudio = 2,
    VstInstrument = 3,
    VstEffect = 4,
}

impl DeviceKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PatcherEvent),
            1 => Some(Self::PatcherInstrument),
            2 => Some(Self::PatcherAudio),
            3 => Some(Self::VstInstrument),
            4 => Some(Self::VstEffect),
            _ => None,
        }
    }

    pub fn is_vst(self) -> bool {
        matches!(self, Self::VstInstrument | Self::VstEffect)
    }

    pub fn is_instrument(self) -> bool {
        matches!(self, Self::PatcherInstrument | Self::VstInstrument)
    }
}

/// Capability bits advertised by a device.
pub struct DeviceCapability;

impl DeviceCapability {
    pub const NONE: u8 = 0;
    pub const CONSUMES_MIDI: u8 = 1 << 0;
    pub const PRODUCES_MIDI: u8 = 1 << 1;
    pub const PROCESSES_AUDIO: u8 = 1 << 2;
}

/// Euclidean pattern override stored on a chain device; shadows the patcher
/// node's own config during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EuclideanConfig {
    pub steps: u32,
    pub hits: u32,
    pub offset: u32,
    pub duration_ticks: u64,
    pub degree: u8,
    pub octave_offset: i8,
    pub velocity: u8,
    pub base_octave: u8,
}

impl Default for EuclideanConfig {
    fn default() -> Self {
        Self {
            steps: 16,
            hits: 5,
            offset: 0,
            duration_ticks: 0,
            degree: 1,
            octave_offset: 0,
            velocity: 100,
            base_octave: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Device {
    pub id: u32,
    pub kind: DeviceKind,
    pub capability_mask: u8,
    /// Patcher node driven by this device, when kind is a Patcher*.
    pub patcher_node_id: u32,
    /// Index of the plugin slot in the host process, chain order.
    pub host_slot_index: u32,
    pub bypass: bool,
    pub euclidean: Option<EuclideanConfig>,
}

impl Device {
    pub fn vst_instrument(host_slot_index: u32) -> Self {
        Self {
            id: DEVICE_ID_AUTO,
            kind: DeviceKind::VstInstrument,
            capability_mask: DeviceCapability::CONSUMES_MIDI | DeviceCapability::PROCESSES_AUDIO,
            patcher_node_id: 0,
            host_slot_index,
            bypass: false,
            euclidean: None,
        }
    }
}

/// Ordered device list for one track. At most one instrument, enforced when
/// a device is added (reorders are not re-validated).
#[derive(Debug, Clone, Default)]
pub struct TrackChain {
    devices: Vec<Device>,
    next_device_id: u32,
}

impl TrackChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn has_instrument(&self) -> bool {
        self.devices.iter().any(|d| d.kind.is_instrument())
    }

    pub fn find(&self, device_id: u32) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == device_id)
    }

    fn find_mut(&mut self, device_id: u32) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == device_id)
    }

    /// Insert a device at `insert_index` (or append when `DEVICE_ID_AUTO`).
    /// Fails when the chain already has an instrument and another arrives.
    pub fn add_device(&mut self, mut device: Device, insert_index: u32) -> Option<u32> {
        if device.kind.is_instrument() && self.has_instrument() {
            return None;
        }
        if device.id == DEVICE_ID_AUTO {
            device.id = self.next_device_id;
        }
        self.next_device_id = self.next_device_id.max(device.id + 1);
        let index = if insert_index == DEVICE_ID_AUTO {
            self.devices.len()
        } else {
            (insert_index as usize).min(self.devices.len())
        };
        let id = device.id;
        self.devices.insert(index, device);
        Some(id)
    }

    pub fn remove_device(&mut self, device_id: u32) -> Option<Device> {
        let index = self.devices.iter().position(|d| d.id == device_id)?;
        Some(self.devices.remove(index))
    }

    pub fn move_device(&mut self, device_id: u32, insert_index: u32) -> bool {
        let Some(from) = self.devices.iter().position(|d| d.id == device_id) else {
            return false;
        };
        let device = self.devices.remove(from);
        let to = (insert_index as usize).min(self.devices.len());
        self.devices.insert(to, device);
        true
    }

    pub fn set_bypass(&mut self, device_id: u32, bypass: bool) -> bool {
        match self.find_mut(device_id) {
            Some(device) => {
                device.bypass = bypass;
                true
            }
            None => false,
        }
    }

    pub fn set_patcher_node_id(&mut self, device_id: u32, patcher_node_id: u32) -> bool {
        match self.find_mut(device_id) {
            Some(device) => {
                device.patcher_node_id = patcher_node_id;
                true
            }
            None => false,
        }
    }

    pub fn set_host_slot_index(&mut self, device_id: u32, host_slot_index: u32) -> bool {
        match self.find_mut(device_id) {
            Some(device) => {
                device.host_slot_index = host_slot_index;
                true
            }
            None => false,
        }
    }

    pub fn set_euclidean_config(&mut self, device_id: u32, config: EuclideanConfig) -> bool {
        match self.find_mut(device_id) {
            Some(device) => {
                device.euclidean = Some(config);
                true
            }
            None => false,
        }
    }

    pub fn clear_euclidean_config(&mut self, device_id: u32) -> bool {
        match self.find_mut(device_id) {
            Some(device) => {
                device.euclidean = None;
                true
            }
            None => false,
        }
    }

    /// Chain position of a device id, used for modulation link ordering.
    pub fn position(&self, device_id: u32) -> Option<usize> {
        self.devices.iter().position(|d| d.id == device_id)
    }

    /// First enabled VST device's host slot, the default param target.
    pub fn first_vst_slot(&self) -> Option<u32> {
        self.devices
            .iter()
            .find(|d| d.kind.is_vst() && !d.bypass)
            .map(|d| d.host_slot_index)
    }
}
