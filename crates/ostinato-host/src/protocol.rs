//! Framed control-socket protocol between the engine and a host child.
//!
//! Every message is a fixed 16-byte [`ControlHeader`] followed by a
//! bincode-encoded payload of `size` bytes. The header is packed by hand so
//! the frame boundary never depends on serializer internals.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 'DWH0' little-endian.
pub const CONTROL_MAGIC: u32 = 0x3048_5744;
pub const CONTROL_VERSION: u16 = 1;

pub const CONTROL_HEADER_BYTES: usize = 16;

/// Upper bound on control payloads; anything larger is a protocol error.
pub const CONTROL_MAX_PAYLOAD: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ControlMessageType {
    Hello = 1,
    ProcessBlock = 2,
    Shutdown = 3,
    SetBypass = 4,
    OpenEditor = 5,
}

impl ControlMessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Hello),
            2 => Some(Self::ProcessBlock),
            3 => Some(Self::Shutdown),
            4 => Some(Self::SetBypass),
            5 => Some(Self::OpenEditor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    pub magic: u32,
    pub version: u16,
    pub message_type: u16,
    pub size: u32,
    pub reserved: u32,
}

impl ControlHeader {
    pub fn new(message_type: ControlMessageType, size: u32) -> Self {
        Self {
            magic: CONTROL_MAGIC,
            version: CONTROL_VERSION,
            message_type: message_type as u16,
            size,
            reserved: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; CONTROL_HEADER_BYTES] {
        let mut out = [0u8; CONTROL_HEADER_BYTES];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.message_type.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; CONTROL_HEADER_BYTES]) -> Result<Self> {
        let header = Self {
            magic: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            version: u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
            message_type: u16::from_le_bytes(bytes[6..8].try_into().unwrap()),
            size: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            reserved: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        };
        if header.magic != CONTROL_MAGIC {
            return Err(Error::Protocol(format!(
                "bad control magic {:#010x}",
                header.magic
            )));
        }
        if header.version != CONTROL_VERSION {
            return Err(Error::Protocol(format!(
                "unsupported control version {}",
                header.version
            )));
        }
        if header.size > CONTROL_MAX_PAYLOAD {
            return Err(Error::Protocol(format!(
                "oversized control payload {} bytes",
                header.size
            )));
        }
        Ok(header)
    }
}

/// Engine-to-host hello: the geometry the host must build its region with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub block_size: u32,
    pub num_channels_in: u32,
    pub num_channels_out: u32,
    pub num_blocks: u32,
    pub ring_std_capacity: u32,
    pub ring_ctrl_capacity: u32,
    pub ring_ui_capacity: u32,
    pub sample_rate: f64,
}

/// Host-to-engine hello: where to map the region it created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloResponse {
    pub shm_size_bytes: u64,
    pub shm_name: String,
}

/// Kick off processing of one block segment. Hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessBlockRequest {
    pub block_id: u32,
    pub engine_sample_start: u64,
    pub plugin_sample_start: u64,
    /// First host plugin slot of this chain segment.
    pub segment_start: u32,
    /// Number of consecutive slots in the segment.
    pub segment_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBypassRequest {
    pub slot_index: u32,
    pub bypass: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenEditorRequest {
    pub slot_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = ControlHeader::new(ControlMessageType::ProcessBlock, 28);
        let bytes = header.to_bytes();
        let back = ControlHeader::from_bytes(&bytes).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = ControlHeader::new(ControlMessageType::Hello, 0).to_bytes();
        bytes[0] = 0;
        assert!(ControlHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn header_rejects_wrong_version() {
        let header = ControlHeader {
            version: 9,
            ..ControlHeader::new(ControlMessageType::Hello, 0)
        };
        assert!(ControlHeader::from_bytes(&header.to_bytes()).is_err());
    }

    #[test]
    fn header_rejects_oversized_payload() {
        let header = ControlHeader::new(ControlMessageType::Hello, CONTROL_MAX_PAYLOAD + 1);
        assert!(ControlHeader::from_bytes(&header.to_bytes()).is_err());
    }

    #[test]
    fn payloads_round_trip_through_bincode() {
        let hello = HelloRequest {
            block_size: 512,
            num_channels_in: 0,
            num_channels_out: 2,
            num_blocks: 3,
            ring_std_capacity: 1024,
            ring_ctrl_capacity: 128,
            ring_ui_capacity: 128,
            sample_rate: 48_000.0,
        };
        let bytes = bincode::serialize(&hello).unwrap();
        let back: HelloRequest = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, hello);

        let block = ProcessBlockRequest {
            block_id: 7,
            engine_sample_start: 3584,
            plugin_sample_start: 2560,
            segment_start: 0,
            segment_len: 2,
        };
        let bytes = bincode::serialize(&block).unwrap();
        let back: ProcessBlockRequest = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, block);
    }
}
